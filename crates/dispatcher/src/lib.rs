//! # dispatcher - type-safe call and event dispatch
//!
//! Components talk through *signatures* instead of direct references:
//!
//! - **Function slots**: one handler per signature, called inline
//!   (`attach` / `call` / `detach`).
//! - **Event slots**: any number of subscribers per signature and network,
//!   fired asynchronously on that network's event loop (`subscribe` /
//!   `publish` / `expect`).
//! - **Async calls**: run a function slot on an event loop and get a
//!   `Future` back (`async_call`).
//! - **Timers**: post callbacks to a network after a delay or periodically,
//!   against a clock tests can pin and advance.
//!
//! ## Quick Start
//!
//! ```ignore
//! use dispatcher::{attach, call, publish, subscribe, signature};
//!
//! signature!(Addition(i32, i32) -> i32);
//! signature!(Started(u32));
//!
//! attach::<Addition>(|(a, b): (i32, i32)| a + b);
//! assert_eq!(call::<Addition>((2, 3)), Ok(5));
//!
//! subscribe::<Started>(|(id,): (u32,)| println!("started {id}"));
//! publish::<Started>((7,)).unwrap();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │     attach/call    subscribe/publish    async_call, Timer   │
//! └─────────────────────────────────────────────────────────────┘
//!          │                   │                   │
//!          ▼                   ▼                   ▼
//!   FunctionRegistry     EventRegistry (per network)   timer thread
//!   (inline, lock-free)        │                   │
//!                              └─────────┬─────────┘
//!                                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Event loop of the target network               │
//! │        workers running posted tasks on fibers               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod signature;
pub mod function;
pub mod event;
pub mod timer;
mod slot_map;

use std::panic::{self, AssertUnwindSafe};

pub use dispatch_core::{kdebug, kerror, kinfo, kprintln, ktrace, kwarn};
pub use dispatch_core::{
    kprint, CancellationToken, DispatchError, DispatchResult, LoopState, NoHandler, SchedError,
    SchedResult,
};
pub use dispatch_runtime::clock::{self, advance_time, clear_now, is_mocked, now, set_now};
pub use dispatch_runtime::{
    in_fiber, network, promise, sleep, yield_now, DefaultNetwork, EventLoop, Future, LoopConfig,
    Network, Promise,
};

pub use event::{Connection, EventRegistry};
pub use function::{FunctionRegistry, Handler};
pub use signature::Signature;
pub use timer::{Timer, TimerState};

use dispatch_runtime::event_loop;

// ============================================================================
// Function slots
// ============================================================================

/// Attach `handler` for `S` in the global registry, replacing any previous one
pub fn attach<S, F>(handler: F)
where
    S: Signature,
    F: for<'a> Fn(S::Args<'a>) -> S::Output + Send + Sync + 'static,
{
    FunctionRegistry::global().attach::<S, F>(handler);
}

/// Remove the global handler for `S`; returns whether one was attached
pub fn detach<S: Signature>() -> bool {
    FunctionRegistry::global().detach::<S>()
}

/// Call the global handler for `S` on this thread
pub fn call<S: Signature>(args: S::Args<'_>) -> Result<S::Output, NoHandler> {
    FunctionRegistry::global().call::<S>(args)
}

pub fn is_attached<S: Signature>() -> bool {
    FunctionRegistry::global().is_attached::<S>()
}

// ============================================================================
// Event slots
// ============================================================================

pub fn subscribe<S, F>(handler: F) -> Connection
where
    S: Signature,
    F: Fn(S::Args<'static>) + Send + Sync + 'static,
{
    subscribe_on::<S, DefaultNetwork, F>(handler)
}

pub fn subscribe_on<S, N, F>(handler: F) -> Connection
where
    S: Signature,
    N: Network,
    F: Fn(S::Args<'static>) + Send + Sync + 'static,
{
    EventRegistry::of::<N>().subscribe::<S, F>(handler)
}

/// Fire `S` on the default network; subscribers run on its workers
pub fn publish<S>(args: S::Args<'static>) -> SchedResult<()>
where
    S: Signature,
    S::Args<'static>: Clone + Send,
{
    publish_on::<S, DefaultNetwork>(args)
}

pub fn publish_on<S, N>(args: S::Args<'static>) -> SchedResult<()>
where
    S: Signature,
    N: Network,
    S::Args<'static>: Clone + Send,
{
    EventRegistry::of::<N>().publish::<S>(args)
}

pub fn subscriber_count<S: Signature>() -> usize {
    subscriber_count_on::<S, DefaultNetwork>()
}

pub fn subscriber_count_on<S: Signature, N: Network>() -> usize {
    EventRegistry::of::<N>().subscriber_count::<S>()
}

/// Resolves the next time `S` is published on the default network
pub fn expect<S: Signature>() -> Future<()> {
    expect_on::<S, DefaultNetwork>()
}

pub fn expect_on<S: Signature, N: Network>() -> Future<()> {
    EventRegistry::of::<N>().expect::<S>()
}

pub fn expect_with<S, F>(callback: F) -> Future<()>
where
    S: Signature,
    F: FnOnce(S::Args<'static>) + Send + 'static,
{
    expect_with_on::<S, DefaultNetwork, F>(callback)
}

pub fn expect_with_on<S, N, F>(callback: F) -> Future<()>
where
    S: Signature,
    N: Network,
    F: FnOnce(S::Args<'static>) + Send + 'static,
{
    EventRegistry::of::<N>().expect_with::<S, F>(callback)
}

// ============================================================================
// Async calls
// ============================================================================

/// Call the global handler for `S` on a default-network worker
pub fn async_call<S>(args: S::Args<'static>) -> Future<S::Output>
where
    S: Signature,
    S::Args<'static>: Send,
    S::Output: Send,
{
    async_call_on::<S, DefaultNetwork>(args)
}

/// Call the global handler for `S` on a worker of `N`.
///
/// The handler is looked up when the task runs, not when it is posted.
/// A missing handler or a panic fails the future. A stopped network fails
/// it with `DispatchError::Sched`; a task dropped at stop breaks it.
pub fn async_call_on<S, N>(args: S::Args<'static>) -> Future<S::Output>
where
    S: Signature,
    N: Network,
    S::Args<'static>: Send,
    S::Output: Send,
{
    let (promise, future) = promise();
    let posted = event_loop::<N>().post(move || {
        match panic::catch_unwind(AssertUnwindSafe(|| call::<S>(args))) {
            Ok(Ok(value)) => promise.set_value(value),
            Ok(Err(no_handler)) => promise.set_error(no_handler.into()),
            Err(payload) => {
                let msg = dispatch_core::panic_message(&*payload);
                kerror!("async call {} panicked: {}", S::name(), msg);
                promise.set_error(DispatchError::Panicked(msg));
            }
        }
    });
    match posted {
        Ok(()) => future,
        Err(e) => {
            // The rejected task took the first promise with it
            let (promise, refused) = dispatch_runtime::promise();
            promise.set_error(e.into());
            refused
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Run `task` on a default-network worker
pub fn post<F>(task: F) -> SchedResult<()>
where
    F: FnOnce() + Send + 'static,
{
    post_on::<DefaultNetwork, F>(task)
}

pub fn post_on<N, F>(task: F) -> SchedResult<()>
where
    N: Network,
    F: FnOnce() + Send + 'static,
{
    event_loop::<N>().post(task)
}

/// Grow the default network to `count` workers; returns the new count
pub fn set_worker_threads(count: usize) -> SchedResult<usize> {
    set_worker_threads_on::<DefaultNetwork>(count)
}

pub fn set_worker_threads_on<N: Network>(count: usize) -> SchedResult<usize> {
    event_loop::<N>().set_worker_threads(count)
}

/// Stop network `N`. Idempotent; a stopped network cannot be restarted.
pub fn stop<N: Network>() {
    event_loop::<N>().stop();
}

/// Stop every network created so far
pub fn shutdown_all() {
    dispatch_runtime::shutdown_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    crate::signature!(HelloWorld);
    crate::signature!(Addition(i32, i32) -> i32);
    crate::signature!(ModifyString<'a>(&'a mut String));
    crate::signature!(Message(String));
    crate::signature!(Ready);
    crate::signature!(Unattached(u8) -> u8);
    crate::signature!(Exploding -> u32);
    crate::signature!(Replaced(u8) -> u8);
    crate::signature!(Multiply(i64, i64) -> i64);

    network!(BridgeNet);
    network!(StopNet);
    network!(CountNet);

    #[test]
    fn test_call_without_attach_is_no_handler() {
        let err = call::<HelloWorld>(()).unwrap_err();
        assert_eq!(err, NoHandler::new(HelloWorld::name()));
        assert!(err.to_string().contains("HelloWorld"));
    }

    #[test]
    fn test_attach_call_detach() {
        attach::<Addition, _>(|(a, b): (i32, i32)| a + b);
        assert!(is_attached::<Addition>());
        assert_eq!(call::<Addition>((40, 2)), Ok(42));

        assert!(detach::<Addition>());
        assert!(!is_attached::<Addition>());
        assert!(call::<Addition>((40, 2)).is_err());
    }

    #[test]
    fn test_last_attach_wins() {
        attach::<Replaced, _>(|(x,): (u8,)| x);
        attach::<Replaced, _>(|(x,): (u8,)| x + 1);
        assert_eq!(call::<Replaced>((1,)), Ok(2));
    }

    #[test]
    fn test_modify_string_in_place() {
        attach::<ModifyString, _>(|(s,): (&mut String,)| s.push_str(" world"));
        let mut greeting = String::from("hello");
        call::<ModifyString>((&mut greeting,)).unwrap();
        assert_eq!(greeting, "hello world");
    }

    #[test]
    fn test_publish_reaches_subscribers_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l1 = log.clone();
        let l2 = log.clone();
        let c1 = subscribe::<Message, _>(move |(m,): (String,)| l1.lock().unwrap().push(format!("h1:{m}")));
        let c2 = subscribe::<Message, _>(move |(m,): (String,)| l2.lock().unwrap().push(format!("h2:{m}")));

        let done = expect::<Message>();
        publish::<Message>(("hi".to_string(),)).unwrap();
        assert!(done.wait_for(Duration::from_secs(5)));

        // expect subscribed last, so both handlers already ran
        assert_eq!(*log.lock().unwrap(), vec!["h1:hi", "h2:hi"]);
        c1.disconnect();
        c2.disconnect();
    }

    #[test]
    fn test_expect_with_sees_arguments() {
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let fut = expect_with::<Ready, _>(move |(): ()| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(subscriber_count::<Ready>(), 1);

        publish::<Ready>(()).unwrap();
        publish::<Ready>(()).unwrap();
        assert_eq!(fut.get(), Ok(()));

        let (p, f) = promise();
        post(move || p.set_value(())).unwrap();
        f.get().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(subscriber_count::<Ready>(), 0);
    }

    #[test]
    fn test_async_call_matches_call() {
        attach::<Multiply, _>(|(a, b): (i64, i64)| a * b);
        let sync = call::<Multiply>((3, 4));
        let fut = async_call_on::<Multiply, BridgeNet>((3, 4));
        assert_eq!(fut.get(), sync.map_err(DispatchError::from));
    }

    #[test]
    fn test_async_call_without_handler() {
        let fut = async_call_on::<Unattached, BridgeNet>((1,));
        assert_eq!(
            fut.get(),
            Err(DispatchError::NoHandler(NoHandler::new(Unattached::name())))
        );
    }

    #[test]
    fn test_async_call_handler_panics() {
        attach::<Exploding, _>(|(): ()| -> u32 { panic!("kaboom") });
        let fut = async_call_on::<Exploding, BridgeNet>(());
        assert_eq!(fut.get(), Err(DispatchError::Panicked("kaboom".to_string())));
    }

    #[test]
    fn test_two_threads_post_ten_thousand_each() {
        let el = event_loop::<CountNet>();
        let hits = Arc::new(AtomicUsize::new(0));
        let posters: Vec<_> = (0..2)
            .map(|_| {
                let hits = hits.clone();
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        let hits = hits.clone();
                        post_on::<CountNet, _>(move || {
                            hits.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for p in posters {
            p.join().unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(20);
        while hits.load(Ordering::SeqCst) < 20_000 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 20_000);
        assert_eq!(el.worker_count(), el.config().num_workers);
    }

    #[test]
    fn test_stop_is_idempotent_and_rejects_posts() {
        post_on::<StopNet, _>(|| {}).unwrap();
        stop::<StopNet>();
        stop::<StopNet>();
        assert_eq!(event_loop::<StopNet>().state(), LoopState::Stopped);
        assert_eq!(post_on::<StopNet, _>(|| {}), Err(SchedError::Stopped));
        assert_eq!(
            async_call_on::<Multiply, StopNet>((1, 1)).get(),
            Err(DispatchError::Sched(SchedError::Stopped))
        );
    }
}
