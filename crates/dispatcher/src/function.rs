//! Function slots: one replaceable handler per signature
//!
//! `call` runs the handler inline on the caller's thread. Attaching,
//! detaching and calling may race freely: the slot is an atomically swapped
//! pointer, and a call keeps the handler it loaded alive until it returns.

use std::any::TypeId;
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwapOption;
use dispatch_core::{ktrace, NoHandler};

use crate::signature::Signature;
use crate::slot_map::SlotMap;

/// A callable that can be attached for signature `S`
pub trait Handler<S: Signature>: Send + Sync + 'static {
    fn invoke(&self, args: S::Args<'_>) -> S::Output;
}

impl<S, F> Handler<S> for F
where
    S: Signature,
    F: for<'a> Fn(S::Args<'a>) -> S::Output + Send + Sync + 'static,
{
    #[inline]
    fn invoke(&self, args: S::Args<'_>) -> S::Output {
        self(args)
    }
}

/// `ArcSwap` wants a sized pointee
struct HandlerCell<S: Signature> {
    handler: Box<dyn Handler<S>>,
}

struct FunctionSlot<S: Signature> {
    handler: ArcSwapOption<HandlerCell<S>>,
}

impl<S: Signature> FunctionSlot<S> {
    fn new() -> Self {
        Self {
            handler: ArcSwapOption::empty(),
        }
    }
}

/// Function slots for any number of signatures
#[derive(Default)]
pub struct FunctionRegistry {
    slots: SlotMap,
}

impl FunctionRegistry {
    /// An empty registry, independent of the global one
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry behind the free functions
    pub fn global() -> &'static FunctionRegistry {
        static GLOBAL: OnceLock<FunctionRegistry> = OnceLock::new();
        GLOBAL.get_or_init(FunctionRegistry::new)
    }

    fn slot<S: Signature>(&self) -> Arc<FunctionSlot<S>> {
        self.slots
            .get_or_insert_with(TypeId::of::<S>(), FunctionSlot::<S>::new)
    }

    /// Attach `handler` for `S`, replacing any previous handler
    pub fn attach<S, F>(&self, handler: F)
    where
        S: Signature,
        F: for<'a> Fn(S::Args<'a>) -> S::Output + Send + Sync + 'static,
    {
        self.attach_handler::<S>(Box::new(handler));
    }

    /// Attach an already boxed handler
    pub fn attach_handler<S: Signature>(&self, handler: Box<dyn Handler<S>>) {
        let previous = self.slot::<S>().handler.swap(Some(Arc::new(HandlerCell { handler })));
        ktrace!(
            "attach {}{}",
            S::name(),
            if previous.is_some() { " (replaced)" } else { "" }
        );
    }

    /// Remove the handler for `S`. Returns whether one was attached.
    pub fn detach<S: Signature>(&self) -> bool {
        let removed = match self.slots.get::<FunctionSlot<S>>(TypeId::of::<S>()) {
            Some(slot) => slot.handler.swap(None).is_some(),
            None => false,
        };
        ktrace!("detach {} (removed={})", S::name(), removed);
        removed
    }

    pub fn is_attached<S: Signature>(&self) -> bool {
        self.slots
            .get::<FunctionSlot<S>>(TypeId::of::<S>())
            .is_some_and(|slot| slot.handler.load().is_some())
    }

    /// Invoke the handler for `S` on the calling thread
    pub fn call<S: Signature>(&self, args: S::Args<'_>) -> Result<S::Output, NoHandler> {
        let cell = self
            .slots
            .get::<FunctionSlot<S>>(TypeId::of::<S>())
            .and_then(|slot| slot.handler.load_full())
            .ok_or(NoHandler::new(S::name()))?;
        Ok(cell.handler.invoke(args))
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("signatures", &self.slots.len())
            .finish()
    }
}
