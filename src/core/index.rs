use crate::core::bindings::Bindings;
use crate::core::solution::{
    earliest, expiration, PartialSolution, PatternSet, Query, Timestamp,
};
use crate::core::store::{PatternListener, PatternStore};
use crate::core::term::Pattern;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

/// The continuous-query index: active queries broken into canonical
/// triple patterns, the partial solutions produced as those patterns are
/// progressively satisfied, and the forward-chaining matcher that folds
/// each ingested tuple into them.
///
/// The index is single-writer: ingestion, admission, removal, renewal,
/// and expiry reclamation must be serialized by the caller (the engine
/// wraps the index in one mutex).
pub struct QueryIndex<V, const N: usize> {
    store: PatternStore<V, N>,
    queries: HashMap<Arc<str>, QueryRecord<V, N>>,
}

/// The root partial solution doubles as the query record's clock: it and
/// the query expire together, and renewal rewrites both through it.
struct QueryRecord<V, const N: usize> {
    root: Arc<PartialSolution<V, N>>,
}

impl<V: Clone + Eq + Hash, const N: usize> QueryIndex<V, N> {
    pub fn new() -> Self {
        QueryIndex {
            store: PatternStore::new(),
            queries: HashMap::new(),
        }
    }

    pub fn set_pattern_listener(&mut self, listener: Option<PatternListener<V, N>>) {
        self.store.set_listener(listener);
    }

    /// Admits a query: interns its patterns and plants the root partial
    /// solution (all patterns unsatisfied, no bindings) under each of them.
    pub fn add_query(&mut self, query: Query<V, N>) {
        let (id, patterns, expires_at) = query.into_parts();
        debug_assert!(!self.queries.contains_key(&id), "duplicate query id");

        let mut canonical: PatternSet<V, N> = SmallVec::new();
        for pattern in patterns {
            let interned = self.store.intern(pattern);
            if !canonical.iter().any(|p| Arc::ptr_eq(p, &interned)) {
                canonical.push(interned);
            }
        }

        let root = Arc::new(PartialSolution::new(
            id.clone(),
            canonical,
            Bindings::new(),
            expires_at,
        ));
        for pattern in root.patterns().to_vec() {
            self.store.subscribe(&pattern, root.clone());
        }
        self.queries.insert(id, QueryRecord { root });
    }

    /// Drops a query and every partial solution it has spawned
    pub fn remove_query(&mut self, id: &str) -> bool {
        if self.queries.remove(id).is_none() {
            return false;
        }
        self.store
            .retain_solutions(|ps| ps.subscription_id().as_ref() != id);
        true
    }

    /// Resets the query's expiration to `now + ttl`. Child partial
    /// solutions keep the expiration clamped at their creation.
    pub fn renew(&mut self, id: &str, ttl_secs: u64, now: Timestamp) -> bool {
        match self.queries.get(id) {
            Some(record) => {
                record.root.set_expires_at(expiration(ttl_secs, now));
                true
            }
            None => false,
        }
    }

    /// Incorporates one tuple: unifies it against every indexed pattern,
    /// extends each waiting partial solution, and reports completed
    /// solutions through `on_solution` in match order. Returns whether
    /// any pattern matched.
    ///
    /// Both loops run over buffered snapshots, so extensions may freely
    /// grow the index mid-iteration.
    pub fn add_tuple(
        &mut self,
        tuple: &[V; N],
        ttl_secs: u64,
        now: Timestamp,
        on_solution: &mut dyn FnMut(&str, Bindings<V>),
    ) -> bool {
        let expires_at = expiration(ttl_secs, now);
        let mut changed = false;

        for pattern in self.store.snapshot_patterns() {
            let Some(fragment) = pattern.unify(tuple) else {
                continue;
            };
            changed = true;

            for ps in self.store.snapshot_subscribers(&pattern) {
                // Expired state must not contribute, even before the next
                // reap cycle runs.
                if ps.is_expired(now) {
                    continue;
                }
                let child_expires = earliest(expires_at, ps.expires_at());
                self.extend(&ps, &pattern, &fragment, child_expires, on_solution);
            }
        }

        changed
    }

    /// Applies a satisfied pattern's bindings to one waiting partial
    /// solution: either completes it, or spawns a child with the
    /// satisfied pattern removed and the remaining patterns rewritten
    /// under the new bindings.
    fn extend(
        &mut self,
        ps: &Arc<PartialSolution<V, N>>,
        satisfied: &Arc<Pattern<V, N>>,
        fragment: &Bindings<V>,
        child_expires: Timestamp,
        on_solution: &mut dyn FnMut(&str, Bindings<V>),
    ) {
        let next_bindings = fragment.prepend(ps.bindings());

        if ps.patterns().len() == 1 {
            on_solution(ps.subscription_id(), next_bindings);
            return;
        }

        let mut next_patterns: PatternSet<V, N> = SmallVec::new();
        for pattern in ps.patterns() {
            // Canonicalization makes the identity test sufficient here.
            if Arc::ptr_eq(pattern, satisfied) {
                continue;
            }
            let next = match pattern.substitute(fragment) {
                None => pattern.clone(),
                Some(rewritten) => self.store.intern(rewritten),
            };
            if !next_patterns.iter().any(|p| Arc::ptr_eq(p, &next)) {
                next_patterns.push(next);
            }
        }

        let child = Arc::new(PartialSolution::new(
            ps.subscription_id().clone(),
            next_patterns,
            next_bindings,
            child_expires,
        ));
        debug!(
            remaining = child.patterns().len(),
            bound = child.bindings().len(),
            "spawned partial solution"
        );
        for pattern in child.patterns().to_vec() {
            self.store.subscribe(&pattern, child.clone());
        }
    }

    /// Evicts every expired query and partial solution, reclaiming the
    /// patterns nothing waits on any more. Returns the ids of the
    /// queries that expired, so the caller can retire their
    /// subscriptions.
    pub fn remove_expired(&mut self, now: Timestamp) -> Vec<Arc<str>> {
        let expired: Vec<Arc<str>> = self
            .queries
            .iter()
            .filter(|(_, record)| record.root.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.queries.remove(id);
        }

        self.store.retain_solutions(|ps| !ps.is_expired(now));
        expired
    }

    pub fn clear(&mut self) {
        self.store.clear();
        self.queries.clear();
    }

    pub fn query_count(&self) -> usize {
        self.queries.len()
    }

    /// Number of patterns currently awaited by at least one partial solution
    pub fn pattern_count(&self) -> usize {
        self.store.pattern_count()
    }

    /// Number of distinct partial solutions currently in the index
    pub fn partial_solution_count(&self) -> usize {
        let mut seen: Vec<*const PartialSolution<V, N>> = Vec::new();
        for (_, waiting) in self.store.entries() {
            for ps in waiting {
                let ptr = Arc::as_ptr(ps);
                if !seen.contains(&ptr) {
                    seen.push(ptr);
                }
            }
        }
        seen.len()
    }
}

impl<V: Clone + Eq + Hash + Debug, const N: usize> QueryIndex<V, N> {
    /// Structural self-check used by tests and debugging: canonical
    /// patterns are unique per equivalence class, the reverse index and
    /// the partial solutions agree exactly, no empty entry is retained,
    /// and no two partial solutions of one query duplicate each other's
    /// remaining patterns and bindings.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.store.representative_count() != self.store.pattern_count() {
            return Err(format!(
                "{} interned patterns but {} awaited ones",
                self.store.representative_count(),
                self.store.pattern_count()
            ));
        }

        let mut canon: HashMap<&Pattern<V, N>, *const Pattern<V, N>> = HashMap::new();
        for (pattern, waiting) in self.store.entries() {
            if waiting.is_empty() {
                return Err(format!("pattern retained with no subscribers: {pattern:?}"));
            }
            if let Some(&other) = canon.get(pattern.as_ref()) {
                if !std::ptr::eq(other, Arc::as_ptr(pattern)) {
                    return Err(format!("two representatives for {pattern:?}"));
                }
            }
            canon.insert(pattern.as_ref(), Arc::as_ptr(pattern));

            for ps in waiting {
                if !ps.patterns().iter().any(|p| Arc::ptr_eq(p, pattern)) {
                    return Err(format!(
                        "reverse index lists a partial solution not waiting on {pattern:?}"
                    ));
                }
            }
        }

        let mut solutions: Vec<Arc<PartialSolution<V, N>>> = Vec::new();
        for (_, waiting) in self.store.entries() {
            for ps in waiting {
                if !solutions.iter().any(|s| Arc::ptr_eq(s, ps)) {
                    solutions.push(ps.clone());
                }
            }
        }
        for ps in &solutions {
            for pattern in ps.patterns() {
                if let Some(&other) = canon.get(pattern.as_ref()) {
                    if !std::ptr::eq(other, Arc::as_ptr(pattern)) {
                        return Err(format!(
                            "partial solution holds a non-canonical copy of {pattern:?}"
                        ));
                    }
                }
                let listed = self
                    .store
                    .entries()
                    .find(|(p, _)| Arc::ptr_eq(*p, pattern))
                    .map(|(_, waiting)| waiting.iter().any(|s| Arc::ptr_eq(s, ps)))
                    .unwrap_or(false);
                if !listed {
                    return Err(format!(
                        "partial solution waits on {pattern:?} but the reverse index misses it"
                    ));
                }
            }
        }

        for (i, a) in solutions.iter().enumerate() {
            for b in &solutions[i + 1..] {
                if a.subscription_id() == b.subscription_id()
                    && same_pattern_set(a.patterns(), b.patterns())
                    && same_bindings(a.bindings(), b.bindings())
                {
                    return Err(format!(
                        "duplicate partial solutions for query {}",
                        a.subscription_id()
                    ));
                }
            }
        }

        Ok(())
    }
}

fn same_pattern_set<V, const N: usize>(
    a: &[Arc<Pattern<V, N>>],
    b: &[Arc<Pattern<V, N>>],
) -> bool {
    a.len() == b.len() && a.iter().all(|p| b.iter().any(|q| Arc::ptr_eq(p, q)))
}

fn same_bindings<V: Eq>(a: &Bindings<V>, b: &Bindings<V>) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(name, value)| b.get(name) == Some(value))
}

impl<V: Clone + Eq + Hash, const N: usize> Default for QueryIndex<V, N> {
    fn default() -> Self {
        QueryIndex::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::solution::NEVER;
    use crate::core::term::Term;

    type Index = QueryIndex<String, 3>;

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

    fn tuple(s: &str, p: &str, o: &str) -> [String; 3] {
        [s.to_string(), p.to_string(), o.to_string()]
    }

    fn ingest(index: &mut Index, t: [String; 3], now: Timestamp) -> Vec<(String, Vec<(String, String)>)> {
        let mut out = Vec::new();
        index.add_tuple(&t, 0, now, &mut |id, bindings| {
            let mut pairs: Vec<(String, String)> = bindings
                .iter()
                .map(|(n, v)| (n.to_string(), v.clone()))
                .collect();
            pairs.sort();
            out.push((id.to_string(), pairs));
        });
        out
    }

    #[test]
    fn single_pattern_query_answers_each_matching_tuple() {
        let mut index = Index::new();
        index.add_query(Query::new("q", vec![pattern("?s", "p", "o")], NEVER));

        let solutions = ingest(&mut index, tuple("a", "p", "o"), 1);
        assert_eq!(
            solutions,
            vec![("q".to_string(), vec![("s".to_string(), "a".to_string())])]
        );

        assert!(ingest(&mut index, tuple("b", "p", "other"), 2).is_empty());
        index.check_invariants().unwrap();
    }

    #[test]
    fn join_completes_in_either_arrival_order() {
        for reversed in [false, true] {
            let mut index = Index::new();
            index.add_query(Query::new(
                "q",
                vec![pattern("?x", "knows", "?y"), pattern("?y", "age", "30")],
                NEVER,
            ));

            let mut tuples = vec![tuple("a", "knows", "b"), tuple("b", "age", "30")];
            if reversed {
                tuples.reverse();
            }

            let mut solutions = Vec::new();
            for (i, t) in tuples.into_iter().enumerate() {
                solutions.extend(ingest(&mut index, t, i as Timestamp + 1));
            }

            assert_eq!(solutions.len(), 1, "reversed={reversed}");
            let (_, pairs) = &solutions[0];
            assert_eq!(
                pairs,
                &vec![
                    ("x".to_string(), "a".to_string()),
                    ("y".to_string(), "b".to_string()),
                ]
            );
            index.check_invariants().unwrap();
        }
    }

    #[test]
    fn structurally_equal_patterns_collapse_to_one_canonical_entry() {
        // Both patterns collapse to the same canonical instance; the set
        // keeps a single entry, so one matching tuple completes the query.
        let mut index = Index::new();
        index.add_query(Query::new(
            "q",
            vec![pattern("?s", "p", "?o"), pattern("?s", "p", "?o")],
            NEVER,
        ));
        assert_eq!(index.pattern_count(), 1);

        let solutions = ingest(&mut index, tuple("a", "p", "b"), 1);
        assert_eq!(solutions.len(), 1);
    }

    #[test]
    fn remaining_patterns_are_rewritten_under_new_bindings() {
        let mut index = Index::new();
        index.add_query(Query::new(
            "q",
            vec![pattern("?x", "knows", "?y"), pattern("?y", "age", "?a")],
            NEVER,
        ));

        ingest(&mut index, tuple("a", "knows", "b"), 1);
        // the child waits on the concrete form (b, age, ?a)
        assert!(index
            .store
            .canonical(&pattern("b", "age", "?a"))
            .is_some());

        let solutions = ingest(&mut index, tuple("b", "age", "33"), 2);
        assert_eq!(solutions.len(), 1);
        index.check_invariants().unwrap();
    }

    #[test]
    fn expired_queries_and_solutions_are_reclaimed() {
        let mut index = Index::new();
        index.add_query(Query::new(
            "q",
            vec![pattern("?x", "knows", "?y"), pattern("?y", "age", "?a")],
            5_000,
        ));
        ingest(&mut index, tuple("a", "knows", "b"), 1_000);
        assert_eq!(index.partial_solution_count(), 2);

        let expired = index.remove_expired(4_999);
        assert!(expired.is_empty());

        let expired = index.remove_expired(5_000);
        assert_eq!(expired, vec![Arc::<str>::from("q")]);
        assert_eq!(index.partial_solution_count(), 0);
        assert_eq!(index.pattern_count(), 0);
        index.check_invariants().unwrap();
    }

    #[test]
    fn expired_partial_solutions_do_not_match_before_reap() {
        let mut index = Index::new();
        index.add_query(Query::new(
            "q",
            vec![pattern("?x", "knows", "?y"), pattern("?y", "age", "?a")],
            NEVER,
        ));
        // statement TTL of 5s: the derived partial solution dies at 6s
        index.add_tuple(&tuple("a", "knows", "b"), 5, 1_000, &mut |_, _| {});

        let solutions = ingest(&mut index, tuple("b", "age", "33"), 7_000);
        assert!(solutions.is_empty());
    }

    #[test]
    fn renewal_extends_the_root_but_not_spawned_children() {
        let mut index = Index::new();
        index.add_query(Query::new(
            "q",
            vec![pattern("?x", "knows", "?y"), pattern("?y", "age", "?a")],
            5_000,
        ));
        index.add_tuple(&tuple("a", "knows", "b"), 0, 1_000, &mut |_, _| {});

        assert!(index.renew("q", 20, 1_000));

        index.remove_expired(6_000);
        // the root survives under its renewed clock; the child was
        // clamped to the old expiration and is gone
        assert_eq!(index.query_count(), 1);
        assert_eq!(index.partial_solution_count(), 1);
    }

    #[test]
    fn removing_a_query_reclaims_its_patterns() {
        let mut index = Index::new();
        index.add_query(Query::new("a", vec![pattern("?s", "p", "?o")], NEVER));
        index.add_query(Query::new("b", vec![pattern("?s", "p", "?o")], NEVER));

        assert!(index.remove_query("a"));
        assert_eq!(index.pattern_count(), 1);

        assert!(index.remove_query("b"));
        assert!(!index.remove_query("b"));
        assert_eq!(index.pattern_count(), 0);
        index.check_invariants().unwrap();
    }
}
