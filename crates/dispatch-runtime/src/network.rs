//! Networks: named, lazily created event loops selected by marker type
//!
//! ```rust,ignore
//! network!(pub Audio);
//!
//! event_loop::<Audio>().post(|| { /* runs on an "Audio" worker */ });
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use dispatch_core::{kdebug, kwarn};

use crate::config::LoopConfig;
use crate::event_loop::EventLoop;

/// Marker type naming an event loop
pub trait Network: Send + Sync + 'static {
    /// Loop name; workers are called `<NAME>-worker-<i>`
    const NAME: &'static str;

    /// Configuration used when the loop is first created
    fn config() -> LoopConfig {
        LoopConfig::from_env()
    }
}

/// The network used when none is named
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNetwork;

impl Network for DefaultNetwork {
    const NAME: &'static str = "default";
}

/// Declare a network marker type named after itself
#[macro_export]
macro_rules! network {
    ($vis:vis $name:ident) => {
        #[derive(Debug, Clone, Copy, Default)]
        $vis struct $name;

        impl $crate::network::Network for $name {
            const NAME: &'static str = stringify!($name);
        }
    };
}

type Loops = RwLock<HashMap<TypeId, Arc<EventLoop>>>;

fn loops() -> &'static Loops {
    static LOOPS: OnceLock<Loops> = OnceLock::new();
    LOOPS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// The event loop for `N`, created and started on first use.
///
/// Panics if not a single worker thread can be spawned.
pub fn event_loop<N: Network>() -> Arc<EventLoop> {
    let id = TypeId::of::<N>();
    if let Some(el) = loops().read().unwrap_or_else(PoisonError::into_inner).get(&id) {
        return el.clone();
    }

    let mut map = loops().write().unwrap_or_else(PoisonError::into_inner);
    map.entry(id)
        .or_insert_with(|| {
            let mut config = N::config();
            if let Err(e) = config.validate() {
                kwarn!("network {}: {}, using defaults", N::NAME, e);
                config = LoopConfig::new();
            }
            kdebug!("creating network {} ({} workers)", N::NAME, config.num_workers);
            match EventLoop::start(N::NAME, config) {
                Ok(el) => Arc::new(el),
                Err(e) => panic!("failed to start network {}: {}", N::NAME, e),
            }
        })
        .clone()
}

/// Stop every network created so far
pub fn shutdown_all() {
    let all: Vec<Arc<EventLoop>> = loops()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .values()
        .cloned()
        .collect();
    for el in all {
        el.stop();
    }
}
