//! Event slots: ordered subscribers fired asynchronously on a network
//!
//! `publish` captures the arguments into a single task on the network's
//! event loop. When the task runs it walks a snapshot of the subscriber
//! list, skipping entries disconnected in the meantime, and hands each
//! subscriber its own clone of the arguments.

use std::any::TypeId;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, Weak};

use dispatch_core::{kerror, ktrace, panic_message, SchedResult};
use dispatch_runtime::{event_loop, promise, EventLoop, Future, Network, Promise};

use crate::signature::Signature;
use crate::slot_map::SlotMap;

type EventHandler<S> = Box<dyn Fn(<S as Signature>::Args<'static>) + Send + Sync + 'static>;

struct Subscriber<S: Signature> {
    id: u64,
    connected: AtomicBool,
    handler: EventHandler<S>,
}

struct EventSlot<S: Signature> {
    subscribers: RwLock<Vec<Arc<Subscriber<S>>>>,
}

impl<S: Signature> EventSlot<S> {
    fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    fn snapshot(&self) -> Vec<Arc<Subscriber<S>>> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remove(&self, id: u64) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|s| s.id != id);
    }

    fn connected(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.connected.load(Ordering::Acquire))
            .count()
    }

    fn fire(&self, args: S::Args<'static>)
    where
        S::Args<'static>: Clone,
    {
        for subscriber in self.snapshot() {
            if !subscriber.connected.load(Ordering::Acquire) {
                continue;
            }
            let args = args.clone();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(args))) {
                kerror!(
                    "subscriber {} of {} panicked: {}",
                    subscriber.id,
                    S::name(),
                    panic_message(&*payload)
                );
            }
        }
    }
}

trait Link: Send + Sync {
    fn disconnect(&self);
    fn is_connected(&self) -> bool;
}

struct SubscriberLink<S: Signature> {
    slot: Weak<EventSlot<S>>,
    subscriber: Arc<Subscriber<S>>,
}

impl<S: Signature> Link for SubscriberLink<S> {
    fn disconnect(&self) {
        if !self.subscriber.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(slot) = self.slot.upgrade() {
            slot.remove(self.subscriber.id);
        }
        ktrace!("disconnect {} subscriber {}", S::name(), self.subscriber.id);
    }

    fn is_connected(&self) -> bool {
        self.subscriber.connected.load(Ordering::Acquire)
    }
}

/// Handle to one subscription. Dropping it leaves the subscriber connected.
#[derive(Clone)]
pub struct Connection {
    link: Arc<dyn Link>,
}

impl Connection {
    /// Stop delivering events to this subscriber. Idempotent.
    pub fn disconnect(&self) {
        self.link.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// One-shot subscription state behind `expect_with`
struct Expectation<F> {
    pending: Mutex<Option<(Promise<()>, F)>>,
    connection: Mutex<Option<Connection>>,
}

/// Event slots for one event loop
pub struct EventRegistry {
    event_loop: Arc<EventLoop>,
    slots: SlotMap,
    next_id: AtomicU64,
}

impl EventRegistry {
    /// A registry whose events fire on `event_loop`
    pub fn new(event_loop: Arc<EventLoop>) -> Self {
        Self {
            event_loop,
            slots: SlotMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// The registry for network `N`, created on first use
    pub fn of<N: Network>() -> Arc<EventRegistry> {
        static REGISTRIES: OnceLock<SlotMap> = OnceLock::new();
        REGISTRIES
            .get_or_init(SlotMap::new)
            .get_or_insert_with(TypeId::of::<N>(), || EventRegistry::new(event_loop::<N>()))
    }

    pub fn event_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }

    fn slot<S: Signature>(&self) -> Arc<EventSlot<S>> {
        self.slots
            .get_or_insert_with(TypeId::of::<S>(), EventSlot::<S>::new)
    }

    /// Append `handler` to the subscribers of `S`
    pub fn subscribe<S, F>(&self, handler: F) -> Connection
    where
        S: Signature,
        F: Fn(S::Args<'static>) + Send + Sync + 'static,
    {
        let slot = self.slot::<S>();
        let subscriber = Arc::new(Subscriber {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            connected: AtomicBool::new(true),
            handler: Box::new(handler) as EventHandler<S>,
        });
        slot.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber.clone());
        ktrace!("subscribe {} subscriber {}", S::name(), subscriber.id);

        Connection {
            link: Arc::new(SubscriberLink {
                slot: Arc::downgrade(&slot),
                subscriber,
            }),
        }
    }

    /// Fire `S` with `args` on this registry's event loop
    pub fn publish<S>(&self, args: S::Args<'static>) -> SchedResult<()>
    where
        S: Signature,
        S::Args<'static>: Clone + Send,
    {
        let slot = self.slot::<S>();
        ktrace!("publish {} to {} subscribers", S::name(), slot.connected());
        self.event_loop.post(move || slot.fire(args))
    }

    /// Connected subscribers of `S`
    pub fn subscriber_count<S: Signature>(&self) -> usize {
        self.slots
            .get::<EventSlot<S>>(TypeId::of::<S>())
            .map_or(0, |slot| slot.connected())
    }

    /// Resolves the next time `S` fires
    pub fn expect<S: Signature>(&self) -> Future<()> {
        self.expect_with::<S, _>(|_| {})
    }

    /// Resolves the next time `S` fires, after running `callback` with the
    /// event's arguments
    pub fn expect_with<S, F>(&self, callback: F) -> Future<()>
    where
        S: Signature,
        F: FnOnce(S::Args<'static>) + Send + 'static,
    {
        let (promise, future) = promise();
        let expectation = Arc::new(Expectation {
            pending: Mutex::new(Some((promise, callback))),
            connection: Mutex::new(None),
        });

        let exp = expectation.clone();
        let connection = self.subscribe::<S, _>(move |args| {
            let taken = exp.pending.lock().unwrap_or_else(PoisonError::into_inner).take();
            let Some((promise, callback)) = taken else {
                return;
            };
            let connection = exp.connection.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(connection) = connection {
                connection.disconnect();
            }
            callback(args);
            promise.set_value(());
        });

        // The event may already have fired on a worker
        let mut slot = expectation.connection.lock().unwrap_or_else(PoisonError::into_inner);
        let fired = expectation
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none();
        if fired {
            connection.disconnect();
        } else {
            *slot = Some(connection);
        }
        future
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("event_loop", &self.event_loop.name())
            .field("signatures", &self.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_runtime::{network, LoopConfig};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    crate::signature!(Tick(u32));
    crate::signature!(Named(String));
    crate::signature!(Silent);

    fn registry(name: &str) -> EventRegistry {
        let el = EventLoop::start(name, LoopConfig::new().num_workers(1)).unwrap();
        EventRegistry::new(Arc::new(el))
    }

    /// Wait for everything posted to the (single-worker) loop so far
    fn flush(registry: &EventRegistry) {
        let (p, f) = promise();
        registry.event_loop().post(move || p.set_value(())).unwrap();
        assert!(f.wait_for(Duration::from_secs(5)));
    }

    #[test]
    fn test_subscribers_run_in_order() {
        let registry = registry("ev-order");
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let log = log.clone();
            registry.subscribe::<Tick, _>(move |(n,): (u32,)| log.lock().unwrap().push((tag, n)));
        }
        assert_eq!(registry.subscriber_count::<Tick>(), 2);

        registry.publish::<Tick>((7,)).unwrap();
        flush(&registry);
        assert_eq!(*log.lock().unwrap(), vec![("first", 7), ("second", 7)]);
        registry.event_loop().stop();
    }

    #[test]
    fn test_publish_is_asynchronous() {
        let registry = registry("ev-async");
        // Hold the only worker thread (not just a fiber) until released
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        registry
            .event_loop()
            .post(move || {
                let _ = gate_rx.recv();
            })
            .unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        registry.subscribe::<Silent, _>(move |(): ()| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        registry.publish::<Silent>(()).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        gate_tx.send(()).unwrap();
        flush(&registry);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        registry.event_loop().stop();
    }

    #[test]
    fn test_disconnect_stops_delivery() {
        let registry = registry("ev-disconnect");
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let conn = registry.subscribe::<Tick, _>(move |_: (u32,)| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        registry.publish::<Tick>((1,)).unwrap();
        flush(&registry);
        conn.disconnect();
        conn.disconnect();
        assert!(!conn.is_connected());
        assert_eq!(registry.subscriber_count::<Tick>(), 0);

        registry.publish::<Tick>((2,)).unwrap();
        flush(&registry);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        registry.event_loop().stop();
    }

    #[test]
    fn test_dropping_connection_keeps_subscriber() {
        let registry = registry("ev-drop-conn");
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        drop(registry.subscribe::<Silent, _>(move |(): ()| {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        registry.publish::<Silent>(()).unwrap();
        flush(&registry);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        registry.event_loop().stop();
    }

    #[test]
    fn test_subscriber_disconnecting_another_mid_publish() {
        let registry = registry("ev-mid-publish");
        let later_hits = Arc::new(AtomicUsize::new(0));
        let victim: Arc<Mutex<Option<Connection>>> = Arc::new(Mutex::new(None));

        let v = victim.clone();
        registry.subscribe::<Silent, _>(move |(): ()| {
            if let Some(conn) = v.lock().unwrap().as_ref() {
                conn.disconnect();
            }
        });
        let h = later_hits.clone();
        let conn = registry.subscribe::<Silent, _>(move |(): ()| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        *victim.lock().unwrap() = Some(conn);

        registry.publish::<Silent>(()).unwrap();
        flush(&registry);
        assert_eq!(later_hits.load(Ordering::SeqCst), 0);
        registry.event_loop().stop();
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let registry = registry("ev-panic");
        let hits = Arc::new(AtomicUsize::new(0));
        registry.subscribe::<Tick, _>(|_: (u32,)| panic!("subscriber failure"));
        let h = hits.clone();
        registry.subscribe::<Tick, _>(move |_: (u32,)| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        registry.publish::<Tick>((0,)).unwrap();
        flush(&registry);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        registry.event_loop().stop();
    }

    #[test]
    fn test_expect_resolves_once() {
        let registry = registry("ev-expect");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let future = registry.expect_with::<Named, _>(move |(name,): (String,)| {
            s.lock().unwrap().push(name)
        });
        assert!(!future.is_ready());
        assert_eq!(registry.subscriber_count::<Named>(), 1);

        registry.publish::<Named>(("one".to_string(),)).unwrap();
        registry.publish::<Named>(("two".to_string(),)).unwrap();
        assert_eq!(future.get(), Ok(()));
        flush(&registry);

        assert_eq!(*seen.lock().unwrap(), vec!["one".to_string()]);
        assert_eq!(registry.subscriber_count::<Named>(), 0);
        registry.event_loop().stop();
    }

    #[test]
    fn test_publish_without_subscribers() {
        let registry = registry("ev-empty");
        registry.publish::<Silent>(()).unwrap();
        flush(&registry);
        registry.event_loop().stop();
        assert!(registry.publish::<Silent>(()).is_err());
    }

    network!(EventNet);

    #[test]
    fn test_registry_per_network() {
        let a = EventRegistry::of::<EventNet>();
        let b = EventRegistry::of::<EventNet>();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.event_loop().name(), "EventNet");
    }
}
