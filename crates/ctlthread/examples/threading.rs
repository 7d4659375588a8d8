// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Counter and failure-propagation walkthrough.
//!
//! Run with `cargo run -p ctlthread --example threading`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ctlthread::{Priority, Thread, ThreadOptions, Work};

fn count(counter: Arc<AtomicUsize>) -> i32 {
    for _ in 0..1_000_000 {
        counter.fetch_add(1, Ordering::Relaxed);
    }
    42
}

fn main() -> ctlthread::Result<()> {
    let counter = Arc::new(AtomicUsize::new(0));
    let options = ThreadOptions::new().name("counter").priority(Priority::Low);
    let mut t1 = Thread::with_options(&options, Work::with_arg(count, counter.clone()))?;
    t1.start()?;
    t1.join()?;

    let code = t1.exit_code()?;
    println!("Counter: {}", counter.load(Ordering::SeqCst));
    println!("Exit code: {}", code);
    let ok = code == 42 && counter.load(Ordering::SeqCst) == 1_000_000;
    println!("{}", if ok { "SUCCESS" } else { "FAILED" });

    let mut t2 = Thread::with_work(Work::new(|| panic!("callback failed")))?;
    t2.start()?;
    t2.join()?;
    match t2.exit_code() {
        Ok(_) => println!("Failure was not propagated!"),
        Err(err) => println!("Propagated worker failure: {}", err),
    }
    Ok(())
}
