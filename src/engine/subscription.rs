use crate::binding_set::BindingSet;
use crate::engine::query_engine::EngineInner;
use crate::sparql::{SolutionSequenceModifier, SparqlSelect};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Callback invoked with each query answer
pub type SolutionHandler = Arc<dyn Fn(&BindingSet) + Send + Sync>;

/// Per-subscription state shared between the engine and the handle.
/// Handlers are only invoked while `active` holds.
pub(crate) struct SubscriptionState {
    pub(crate) id: Arc<str>,
    select: SparqlSelect,
    modifier: Mutex<SolutionSequenceModifier>,
    handler: SolutionHandler,
    active: AtomicBool,
}

impl SubscriptionState {
    pub fn new(id: Arc<str>, select: SparqlSelect, handler: SolutionHandler) -> Self {
        let modifier = select.sequence_modifier().clone();
        SubscriptionState {
            id,
            select,
            modifier: Mutex::new(modifier),
            handler,
            active: AtomicBool::new(true),
        }
    }

    pub fn select(&self) -> &SparqlSelect {
        &self.select
    }

    pub fn modifier(&self) -> &Mutex<SolutionSequenceModifier> {
        &self.modifier
    }

    pub fn handler(&self) -> &SolutionHandler {
        &self.handler
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns whether the subscription was active before this call
    pub fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }
}

/// The durable handle tying a registered query to its handler.
///
/// Dropping the handle does not cancel the subscription; the query keeps
/// answering until cancelled, expired, or the engine is cleared.
pub struct Subscription {
    state: Arc<SubscriptionState>,
    engine: Weak<Mutex<EngineInner>>,
}

impl Subscription {
    pub(crate) fn new(state: Arc<SubscriptionState>, engine: Weak<Mutex<EngineInner>>) -> Self {
        Subscription { state, engine }
    }

    /// The subscription's unique id
    pub fn id(&self) -> &str {
        &self.state.id
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Stops this subscription and reclaims its index storage.
    /// Idempotent; matches already in flight are dropped silently.
    /// Safe to call from within the subscription's own handler.
    pub fn cancel(&self) {
        self.state.deactivate();
        if let Some(inner) = self.engine.upgrade() {
            let mut engine = inner.lock().unwrap();
            engine.index.remove_query(&self.state.id);
            engine.subscriptions.remove(&self.state.id);
        }
    }

    /// Resets the query's expiration to `now + ttl`. Partial solutions
    /// already derived keep the expiration they were given at creation.
    pub fn renew(&self, ttl_secs: u64) {
        if let Some(inner) = self.engine.upgrade() {
            let mut engine = inner.lock().unwrap();
            let now = engine.clock.now();
            engine.index.renew(&self.state.id, ttl_secs, now);
        }
    }
}
