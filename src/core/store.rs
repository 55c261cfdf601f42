use crate::core::solution::PartialSolution;
use crate::core::term::Pattern;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

/// Lifecycle notifications for indexed patterns.
///
/// `FirstSeen` fires when a pattern gains its first waiting partial
/// solution; a Linked Data collaborator uses it to dereference the
/// constant URIs of the pattern. `Forgotten` fires when the last waiting
/// partial solution goes away and the pattern is dropped from the store.
pub enum PatternEvent<'a, V, const N: usize> {
    FirstSeen(&'a Pattern<V, N>),
    Forgotten(&'a Pattern<V, N>),
}

/// Callback for [`PatternEvent`]s. Invoked while the index is being
/// mutated, so it must not reenter the engine synchronously; hand work
/// off to another thread the way the Linked Data fetcher does.
pub type PatternListener<V, const N: usize> =
    Box<dyn FnMut(PatternEvent<'_, V, N>) + Send>;

/// Canonicalizing store of triple patterns and the reverse index from
/// each pattern to the partial solutions awaiting it.
///
/// Every structurally distinct pattern has exactly one representative
/// `Arc`; all references to equal patterns are clones of it, so "same
/// pattern" can be decided with `Arc::ptr_eq`. A pattern with no waiting
/// partial solutions is not retained.
pub struct PatternStore<V, const N: usize> {
    representatives: HashSet<Arc<Pattern<V, N>>>,
    subscribers: HashMap<Arc<Pattern<V, N>>, Vec<Arc<PartialSolution<V, N>>>>,
    listener: Option<PatternListener<V, N>>,
}

impl<V: Clone + Eq + Hash, const N: usize> PatternStore<V, N> {
    pub fn new() -> Self {
        PatternStore {
            representatives: HashSet::new(),
            subscribers: HashMap::new(),
            listener: None,
        }
    }

    pub fn set_listener(&mut self, listener: Option<PatternListener<V, N>>) {
        self.listener = listener;
    }

    /// Returns the canonical instance for `pattern`, interning it if this
    /// equivalence class has not been seen before.
    pub fn intern(&mut self, pattern: Pattern<V, N>) -> Arc<Pattern<V, N>> {
        if let Some(canonical) = self.representatives.get(&pattern) {
            return canonical.clone();
        }
        let canonical = Arc::new(pattern);
        self.representatives.insert(canonical.clone());
        canonical
    }

    /// The canonical instance for an equivalent pattern, if one is interned
    pub fn canonical(&self, pattern: &Pattern<V, N>) -> Option<Arc<Pattern<V, N>>> {
        self.representatives.get(pattern).cloned()
    }

    /// Registers `solution` as waiting on `pattern`. Fires `FirstSeen`
    /// when this is the first subscription to the pattern.
    pub fn subscribe(
        &mut self,
        pattern: &Arc<Pattern<V, N>>,
        solution: Arc<PartialSolution<V, N>>,
    ) {
        let first_seen = !self.subscribers.contains_key(pattern);
        self.subscribers
            .entry(pattern.clone())
            .or_default()
            .push(solution);

        if first_seen {
            if let Some(listener) = self.listener.as_mut() {
                listener(PatternEvent::FirstSeen(pattern));
            }
        }
    }

    /// Buffered copy of the currently indexed patterns.
    ///
    /// Iteration during matching goes through this snapshot because
    /// extending a partial solution interns and subscribes new patterns
    /// mid-loop; the snapshot keeps the walk well-defined.
    pub fn snapshot_patterns(&self) -> Vec<Arc<Pattern<V, N>>> {
        self.subscribers.keys().cloned().collect()
    }

    /// Buffered copy of the partial solutions waiting on `pattern`
    pub fn snapshot_subscribers(
        &self,
        pattern: &Arc<Pattern<V, N>>,
    ) -> Vec<Arc<PartialSolution<V, N>>> {
        self.subscribers.get(pattern).cloned().unwrap_or_default()
    }

    /// Keeps only the partial solutions accepted by `keep`, dropping
    /// patterns (and their representatives) that end up with no waiting
    /// partial solution. Fires `Forgotten` for each dropped pattern.
    pub fn retain_solutions(
        &mut self,
        mut keep: impl FnMut(&Arc<PartialSolution<V, N>>) -> bool,
    ) {
        let mut forgotten = Vec::new();
        self.subscribers.retain(|pattern, waiting| {
            waiting.retain(&mut keep);
            if waiting.is_empty() {
                forgotten.push(pattern.clone());
                false
            } else {
                true
            }
        });
        for pattern in forgotten {
            self.representatives.remove(&pattern);
            if let Some(listener) = self.listener.as_mut() {
                listener(PatternEvent::Forgotten(&pattern));
            }
        }
    }

    pub fn clear(&mut self) {
        self.representatives.clear();
        self.subscribers.clear();
    }

    /// Number of patterns currently awaited by at least one partial solution
    pub fn pattern_count(&self) -> usize {
        self.subscribers.len()
    }

    pub(crate) fn entries(
        &self,
    ) -> impl Iterator<Item = (&Arc<Pattern<V, N>>, &Vec<Arc<PartialSolution<V, N>>>)> {
        self.subscribers.iter()
    }

    pub(crate) fn representative_count(&self) -> usize {
        self.representatives.len()
    }
}

impl<V: Clone + Eq + Hash, const N: usize> Default for PatternStore<V, N> {
    fn default() -> Self {
        PatternStore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bindings::Bindings;
    use crate::core::solution::NEVER;
    use crate::core::term::Term;
    use smallvec::smallvec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pattern(s: &str, p: &str, o: &str) -> Pattern<String, 3> {
        let term = |t: &str| {
            if let Some(name) = t.strip_prefix('?') {
                Term::Variable(name.to_string())
            } else {
                Term::Constant(t.to_string())
            }
        };
        Pattern::new([term(s), term(p), term(o)])
    }

    fn waiting_on(
        store: &mut PatternStore<String, 3>,
        canonical: &Arc<Pattern<String, 3>>,
    ) -> Arc<PartialSolution<String, 3>> {
        let ps = Arc::new(PartialSolution::new(
            Arc::from("q"),
            smallvec![canonical.clone()],
            Bindings::new(),
            NEVER,
        ));
        store.subscribe(canonical, ps.clone());
        ps
    }

    #[test]
    fn interning_is_idempotent() {
        let mut store: PatternStore<String, 3> = PatternStore::new();
        let a = store.intern(pattern("?s", "knows", "?o"));
        let b = store.intern(pattern("?s", "knows", "?o"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.representative_count(), 1);
    }

    #[test]
    fn first_and_last_subscription_fire_events() {
        let seen = Arc::new(AtomicUsize::new(0));
        let gone = Arc::new(AtomicUsize::new(0));

        let mut store: PatternStore<String, 3> = PatternStore::new();
        let (seen2, gone2) = (seen.clone(), gone.clone());
        store.set_listener(Some(Box::new(move |event| match event {
            PatternEvent::FirstSeen(_) => {
                seen2.fetch_add(1, Ordering::SeqCst);
            }
            PatternEvent::Forgotten(_) => {
                gone2.fetch_add(1, Ordering::SeqCst);
            }
        })));

        let canonical = store.intern(pattern("?s", "knows", "?o"));
        waiting_on(&mut store, &canonical);
        waiting_on(&mut store, &canonical);
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        store.retain_solutions(|_| false);
        assert_eq!(gone.load(Ordering::SeqCst), 1);
        assert_eq!(store.pattern_count(), 0);
        assert_eq!(store.representative_count(), 0);
    }

    #[test]
    fn retain_drops_only_unwanted_solutions() {
        let mut store: PatternStore<String, 3> = PatternStore::new();
        let canonical = store.intern(pattern("?s", "knows", "?o"));
        let keep = waiting_on(&mut store, &canonical);
        let drop = waiting_on(&mut store, &canonical);

        store.retain_solutions(|ps| !Arc::ptr_eq(ps, &drop));
        let remaining = store.snapshot_subscribers(&canonical);
        assert_eq!(remaining.len(), 1);
        assert!(Arc::ptr_eq(&remaining[0], &keep));
    }
}
