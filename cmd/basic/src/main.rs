//! Basic dispatcher example
//!
//! Attaches a function, subscribes to an event, makes an async call and
//! arms a timer, all on the default network plus one named network.
//!
//! # Environment Variables
//!
//! - `DSP_FLUSH_EPRINT=1` - Flush log output immediately (useful for crash debugging)
//! - `DSP_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `DSP_NUM_WORKERS=4` - Worker threads per network

use dispatcher::{
    async_call_on, attach, call, expect, network, publish, shutdown_all, signature, subscribe,
    Timer,
};
use dispatcher::{kinfo, kprintln};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

signature!(Addition(i32, i32) -> i32);
signature!(ModifyString<'a>(&'a mut String));
signature!(Greeted(String));

network!(Audio);

// DSP_LOG_LEVEL=debug DSP_FLUSH_EPRINT=1 cargo run -p dispatcher-basic
fn main() {
    kprintln!("=== Dispatcher Basic Example ===\n");

    // Function slots: inline calls
    attach::<Addition, _>(|(a, b): (i32, i32)| a + b);
    attach::<ModifyString, _>(|(s,): (&mut String,)| s.push_str(", world"));

    match call::<Addition>((2, 3)) {
        Ok(sum) => kinfo!("2 + 3 = {}", sum),
        Err(e) => kinfo!("call failed: {}", e),
    }
    let mut text = String::from("hello");
    if call::<ModifyString>((&mut text,)).is_ok() {
        kinfo!("modified in place: {}", text);
    }

    // Event slots: fan-out on a worker
    let received = Arc::new(AtomicUsize::new(0));
    for i in 1..=2 {
        let r = received.clone();
        subscribe::<Greeted, _>(move |(name,): (String,)| {
            kinfo!("[subscriber {}] greeted {}", i, name);
            r.fetch_add(1, Ordering::SeqCst);
        });
    }
    let delivered = expect::<Greeted>();
    if let Err(e) = publish::<Greeted>(("everyone".to_string(),)) {
        kinfo!("publish failed: {}", e);
    }
    delivered.wait_for(Duration::from_secs(5));
    kinfo!("{} subscriber(s) ran", received.load(Ordering::SeqCst));

    // Async call on a named network
    match async_call_on::<Addition, Audio>((20, 22)).get() {
        Ok(v) => kinfo!("async 20 + 22 = {} (on Audio)", v),
        Err(e) => kinfo!("async call failed: {}", e),
    }

    // Timer: real time, since the clock is not pinned here
    let ticks = Arc::new(AtomicUsize::new(0));
    let timer = Timer::<Audio>::for_network();
    let t = ticks.clone();
    timer.do_every(Duration::from_millis(20), move || {
        t.fetch_add(1, Ordering::SeqCst);
    });
    std::thread::sleep(Duration::from_millis(110));
    timer.cancel();
    kinfo!("timer ticked {} time(s)", ticks.load(Ordering::SeqCst));

    shutdown_all();
    kprintln!("\n=== Example Complete ===");
}
