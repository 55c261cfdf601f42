use crate::core::bindings::Bindings;
use crate::core::term::Pattern;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Milliseconds since the Unix epoch
pub type Timestamp = u64;

/// Expiration sentinel: an item with this expiration never expires
pub const NEVER: Timestamp = 0;

/// Expiration time for a TTL in seconds; a TTL of 0 means infinite
pub fn expiration(ttl_secs: u64, now: Timestamp) -> Timestamp {
    if ttl_secs == 0 {
        NEVER
    } else {
        now + 1000 * ttl_secs
    }
}

pub(crate) fn is_expired(expires_at: Timestamp, now: Timestamp) -> bool {
    expires_at != NEVER && expires_at <= now
}

/// The earlier of two expiration times, treating [`NEVER`] as infinity
pub(crate) fn earliest(a: Timestamp, b: Timestamp) -> Timestamp {
    match (a, b) {
        (NEVER, other) | (other, NEVER) => other,
        (a, b) => a.min(b),
    }
}

/// Most queries have few patterns, so the remaining-pattern set is kept
/// inline up to four entries.
pub(crate) type PatternSet<V, const N: usize> = SmallVec<[Arc<Pattern<V, N>>; 4]>;

/// A query in progress: the patterns still to be satisfied and the
/// bindings accumulated from the patterns satisfied so far.
///
/// A partial solution with a single remaining pattern is terminal;
/// satisfying that pattern produces a final solution instead of a child.
/// The expiration is the minimum over every input that contributed to
/// this derivation, fixed at creation — except for a query's root, whose
/// expiration is rewritten by renewal.
#[derive(Debug)]
pub struct PartialSolution<V, const N: usize> {
    subscription_id: Arc<str>,
    patterns: PatternSet<V, N>,
    bindings: Bindings<V>,
    expires_at: AtomicU64,
}

impl<V, const N: usize> PartialSolution<V, N> {
    pub(crate) fn new(
        subscription_id: Arc<str>,
        patterns: PatternSet<V, N>,
        bindings: Bindings<V>,
        expires_at: Timestamp,
    ) -> Self {
        debug_assert!(!patterns.is_empty());
        PartialSolution {
            subscription_id,
            patterns,
            bindings,
            expires_at: AtomicU64::new(expires_at),
        }
    }

    pub fn subscription_id(&self) -> &Arc<str> {
        &self.subscription_id
    }

    pub fn patterns(&self) -> &[Arc<Pattern<V, N>>] {
        &self.patterns
    }

    pub fn bindings(&self) -> &Bindings<V> {
        &self.bindings
    }

    pub fn expires_at(&self) -> Timestamp {
        self.expires_at.load(Ordering::Relaxed)
    }

    pub(crate) fn set_expires_at(&self, expires_at: Timestamp) {
        self.expires_at.store(expires_at, Ordering::Relaxed);
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        is_expired(self.expires_at(), now)
    }
}

/// A query as admitted into the index: an owner id, the triple patterns
/// of its basic graph pattern, and an expiration time.
#[derive(Debug)]
pub struct Query<V, const N: usize> {
    id: Arc<str>,
    patterns: Vec<Pattern<V, N>>,
    expires_at: Timestamp,
}

impl<V, const N: usize> Query<V, N> {
    pub fn new(id: impl Into<Arc<str>>, patterns: Vec<Pattern<V, N>>, expires_at: Timestamp) -> Self {
        Query {
            id: id.into(),
            patterns,
            expires_at,
        }
    }

    pub fn id(&self) -> &Arc<str> {
        &self.id
    }

    pub(crate) fn into_parts(self) -> (Arc<str>, Vec<Pattern<V, N>>, Timestamp) {
        (self.id, self.patterns, self.expires_at)
    }
}
