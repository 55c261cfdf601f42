use crate::binding_set::BindingSet;
use crate::core::{expiration, Bindings, PatternEvent, Query, QueryIndex, Timestamp};
use crate::engine::metrics::{Metrics, Quantity};
use crate::engine::reaper::{
    CleanupPolicy, Clock, IntervalCleanupPolicy, ReaperMessage, SystemClock,
};
use crate::engine::subscription::{SolutionHandler, Subscription, SubscriptionState};
use crate::error::{StreamError, StreamResult};
use crate::sparql::{FilterEvaluator, SparqlSelect};
use crate::TUPLE_SIZE;
use oxrdf::{Term, Triple};
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use tracing::error;

/// Engine construction options. Performance metrics count [`Quantity`]
/// values and write a TSV side channel to stdout; compact logging
/// suppresses `LOG` lines on which no counted quantity changed.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub performance_metrics: bool,
    pub compact_log: bool,
}

/// A continuous SPARQL SELECT engine over an unbounded stream of RDF
/// triples.
///
/// Queries are registered before the data arrives; each ingested triple
/// is matched forward-chaining style against every active query, and
/// newly completed solutions are pushed to the per-subscription handlers.
/// Queries and statements both carry a TTL (in seconds, 0 = infinite);
/// a background reaper evicts expired state on a configurable policy.
///
/// All index mutation is serialized by one internal lock. Handlers run
/// on the ingesting thread after that lock is released, so they may
/// freely call back into the engine — add statements, register further
/// queries, or cancel their own subscription.
pub struct QueryEngine {
    inner: Arc<Mutex<EngineInner>>,
    metrics: Arc<Metrics>,
}

pub(crate) struct EngineInner {
    pub(crate) index: QueryIndex<Term, TUPLE_SIZE>,
    pub(crate) subscriptions: HashMap<Arc<str>, Arc<SubscriptionState>>,
    pub(crate) clock: Arc<dyn Clock>,
    cleanup_policy: Box<dyn CleanupPolicy>,
    reaper: mpsc::Sender<ReaperMessage>,
    metrics: Arc<Metrics>,
    time_of_last_cleanup: Timestamp,
    queries_added_since_cleanup: u64,
    statements_added_since_cleanup: u64,
    time_operation_began: Timestamp,
    active: bool,
}

/// A solution accepted under the engine lock, delivered after it drops
struct Delivery {
    state: Arc<SubscriptionState>,
    solution: BindingSet,
}

impl QueryEngine {
    pub fn new() -> Self {
        QueryEngine::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let metrics = Arc::new(Metrics::new(
            config.performance_metrics,
            config.compact_log,
        ));
        let (reaper_tx, reaper_rx) = mpsc::channel();

        let inner = Arc::new(Mutex::new(EngineInner {
            index: QueryIndex::new(),
            subscriptions: HashMap::new(),
            clock: Arc::new(SystemClock),
            cleanup_policy: Box::new(IntervalCleanupPolicy::default()),
            reaper: reaper_tx,
            metrics: metrics.clone(),
            time_of_last_cleanup: 0,
            queries_added_since_cleanup: 0,
            statements_added_since_cleanup: 0,
            time_operation_began: 0,
            active: true,
        }));

        spawn_reaper(Arc::downgrade(&inner), reaper_rx);
        metrics.log_header();

        QueryEngine { inner, metrics }
    }

    /// Parses and admits a continuous query. The handler receives every
    /// future answer while the subscription stays active.
    pub fn add_query<F>(&self, ttl_secs: u64, query: &str, handler: F) -> StreamResult<Subscription>
    where
        F: Fn(&BindingSet) + Send + Sync + 'static,
    {
        let select = SparqlSelect::parse(query)?;
        self.subscribe(ttl_secs, select, Arc::new(handler))
    }

    /// Admits an already-parsed query
    pub fn add_query_algebra<F>(
        &self,
        ttl_secs: u64,
        query: spargebra::Query,
        handler: F,
    ) -> StreamResult<Subscription>
    where
        F: Fn(&BindingSet) + Send + Sync + 'static,
    {
        let select = SparqlSelect::new(query)?;
        self.subscribe(ttl_secs, select, Arc::new(handler))
    }

    fn subscribe(
        &self,
        ttl_secs: u64,
        select: SparqlSelect,
        handler: SolutionHandler,
    ) -> StreamResult<Subscription> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.active {
            return Err(StreamError::ShutDown);
        }

        self.metrics.increment(Quantity::Queries, true);
        let now = inner.clock.now();
        inner.time_operation_began = now;

        let id: Arc<str> = uuid::Uuid::new_v4().to_string().into();
        let query = Query::new(
            id.clone(),
            select.patterns().to_vec(),
            expiration(ttl_secs, now),
        );
        inner.index.add_query(query);

        let state = Arc::new(SubscriptionState::new(id.clone(), select, handler));
        inner.subscriptions.insert(id, state.clone());

        inner.queries_added_since_cleanup += 1;
        inner.check_cleanup(now);
        self.metrics
            .log_entry(inner.time_operation_began, inner.clock.now());

        Ok(Subscription::new(state, Arc::downgrade(&self.inner)))
    }

    /// Ingests one triple. Never fails: a triple that matches nothing is
    /// simply discarded.
    pub fn add_statement(&self, ttl_secs: u64, statement: Triple) {
        self.add_statements(ttl_secs, [statement]);
    }

    /// Ingests a batch of triples with a shared TTL
    pub fn add_statements<I>(&self, ttl_secs: u64, statements: I)
    where
        I: IntoIterator<Item = Triple>,
    {
        let mut deliveries = Vec::new();
        let clock;
        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.active {
                return;
            }
            clock = inner.clock.clone();
            for statement in statements {
                inner.ingest(statement, ttl_secs, &mut deliveries);
                inner.statements_added_since_cleanup += 1;
            }
            let now = inner.clock.now();
            inner.check_cleanup(now);
        }
        self.deliver(deliveries, &clock);
    }

    /// Invokes handlers outside the engine lock, in match order, so they
    /// can reenter the engine. A subscription cancelled mid-delivery has
    /// its queued answers dropped.
    fn deliver(&self, deliveries: Vec<Delivery>, clock: &Arc<dyn Clock>) {
        for delivery in deliveries {
            if !delivery.state.is_active() {
                continue;
            }
            self.metrics.increment(Quantity::Solutions, true);
            self.metrics.log_solution(clock.now(), &delivery.solution);
            (delivery.state.handler())(&delivery.solution);
        }
    }

    /// Drops every query, subscription, and partial solution
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.index.clear();
        for (_, state) in inner.subscriptions.drain() {
            state.deactivate();
        }
        self.metrics.reset();
        self.metrics.log_header();
    }

    /// Terminates the reaper task; the engine accepts no further work
    pub fn shut_down(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.active = false;
        let _ = inner.reaper.send(ReaperMessage::Shutdown);
    }

    /// Runs an eviction pass synchronously, regardless of the policy
    pub fn cleanup_now(&self) {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.clock.now();
        inner.remove_expired(now);
    }

    pub fn set_cleanup_policy(&self, policy: impl CleanupPolicy + 'static) {
        self.inner.lock().unwrap().cleanup_policy = Box::new(policy);
    }

    pub fn set_clock(&self, clock: Arc<dyn Clock>) {
        self.inner.lock().unwrap().clock = clock;
    }

    /// Installs a listener for pattern lifecycle events, as consumed by a
    /// Linked Data fetcher. The listener runs while the engine lock is
    /// held and must hand any engine reentry off to another thread.
    pub fn set_pattern_listener<F>(&self, listener: F)
    where
        F: FnMut(PatternEvent<'_, Term, TUPLE_SIZE>) + Send + 'static,
    {
        self.inner
            .lock()
            .unwrap()
            .index
            .set_pattern_listener(Some(Box::new(listener)));
    }

    /// A quantity counted while performance metrics are enabled
    pub fn get(&self, quantity: Quantity) -> Option<u64> {
        self.metrics.get(quantity)
    }

    pub fn query_count(&self) -> usize {
        self.inner.lock().unwrap().index.query_count()
    }

    pub fn pattern_count(&self) -> usize {
        self.inner.lock().unwrap().index.pattern_count()
    }

    pub fn partial_solution_count(&self) -> usize {
        self.inner.lock().unwrap().index.partial_solution_count()
    }

    /// Structural self-check of the index; see
    /// [`QueryIndex::check_invariants`]
    pub fn check_invariants(&self) -> Result<(), String> {
        self.inner.lock().unwrap().index.check_invariants()
    }
}

impl Default for QueryEngine {
    fn default() -> Self {
        QueryEngine::new()
    }
}

impl EngineInner {
    fn ingest(&mut self, statement: Triple, ttl_secs: u64, deliveries: &mut Vec<Delivery>) {
        self.metrics.increment(Quantity::Statements, false);
        let now = self.clock.now();
        self.time_operation_began = now;

        let tuple: [Term; TUPLE_SIZE] = [
            statement.subject.into(),
            statement.predicate.into(),
            statement.object,
        ];

        let mut exhausted: Vec<Arc<str>> = Vec::new();
        {
            let EngineInner {
                index,
                subscriptions,
                ..
            } = self;
            index.add_tuple(&tuple, ttl_secs, now, &mut |id, bindings| {
                match subscriptions.get(id) {
                    Some(state) => {
                        handle_candidate(state, &bindings, deliveries, &mut exhausted)
                    }
                    None => {
                        debug_assert!(false, "solution for an unregistered subscription");
                        error!(subscription = id, "dropping solution for an unregistered subscription");
                    }
                }
            });
        }

        // subscriptions whose LIMIT was reached during this ingest
        for id in exhausted {
            self.index.remove_query(&id);
            self.subscriptions.remove(&id);
        }

        self.metrics
            .log_entry(self.time_operation_began, self.clock.now());
    }

    pub(crate) fn remove_expired(&mut self, now: Timestamp) {
        for id in self.index.remove_expired(now) {
            if let Some(state) = self.subscriptions.remove(&id) {
                state.deactivate();
            }
        }
    }

    fn check_cleanup(&mut self, now: Timestamp) {
        let seconds = now.saturating_sub(self.time_of_last_cleanup) / 1000;
        if self.cleanup_policy.should_run(
            seconds,
            self.queries_added_since_cleanup,
            self.statements_added_since_cleanup,
        ) {
            self.time_of_last_cleanup = now;
            self.queries_added_since_cleanup = 0;
            self.statements_added_since_cleanup = 0;
            let _ = self.reaper.send(ReaperMessage::Cleanup(now));
        }
    }
}

/// Runs a candidate solution through the subscription's filters,
/// projection, and sequence modifier, queueing it for delivery if it
/// survives. Runs under the engine lock; no user code is invoked here.
fn handle_candidate(
    state: &Arc<SubscriptionState>,
    bindings: &Bindings<Term>,
    deliveries: &mut Vec<Delivery>,
    exhausted: &mut Vec<Arc<str>>,
) {
    // matches arriving after cancellation are dropped silently
    if !state.is_active() {
        return;
    }

    // filters see the pre-projection bindings; an evaluation error
    // rejects the candidate
    for filter in state.select().filters() {
        match FilterEvaluator::apply(filter, bindings) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                error!(error = %e, "filter evaluation failed; dropping candidate solution");
                return;
            }
        }
    }

    let solution = state.select().project(bindings);

    let mut modifier = state.modifier().lock().unwrap();
    let accepted = modifier.try_solution(&solution);
    let limit_reached = modifier.exhausted();
    drop(modifier);

    if accepted {
        deliveries.push(Delivery {
            state: state.clone(),
            solution,
        });
    }
    if limit_reached && state.deactivate() {
        exhausted.push(state.id.clone());
    }
}

fn spawn_reaper(inner: Weak<Mutex<EngineInner>>, messages: mpsc::Receiver<ReaperMessage>) {
    thread::spawn(move || {
        while let Ok(message) = messages.recv() {
            match message {
                ReaperMessage::Cleanup(now) => {
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    match inner.lock() {
                        Ok(mut engine) => engine.remove_expired(now),
                        Err(poisoned) => {
                            error!("engine lock poisoned; stopping TTL cleanup");
                            drop(poisoned);
                            return;
                        }
                    };
                }
                ReaperMessage::Shutdown => return,
            }
        }
    });
}
