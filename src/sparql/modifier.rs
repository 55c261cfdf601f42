use crate::binding_set::BindingSet;
use std::collections::HashSet;

/// Applies a query's DISTINCT / REDUCED, OFFSET, and LIMIT behavior to
/// the stream of candidate solutions, one instance per subscription.
///
/// DISTINCT bookkeeping lives and dies with the subscription; it is not
/// trimmed separately by the reaper.
#[derive(Debug, Clone, Default)]
pub struct SolutionSequenceModifier {
    distinct: bool,
    reduced: bool,
    offset: u64,
    limit: Option<u64>,
    seen: HashSet<BindingSet>,
    previous: Option<BindingSet>,
    skipped: u64,
    accepted: u64,
}

impl SolutionSequenceModifier {
    pub fn make_distinct(&mut self) {
        self.distinct = true;
    }

    pub fn make_reduced(&mut self) {
        self.reduced = true;
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    pub fn set_limit(&mut self, limit: u64) {
        self.limit = Some(limit);
    }

    /// Decides whether `solution` passes this query's sequence modifiers.
    /// Check [`exhausted`](Self::exhausted) afterwards: once the LIMIT is
    /// reached the subscription has no further answers to give.
    pub fn try_solution(&mut self, solution: &BindingSet) -> bool {
        if self.exhausted() {
            return false;
        }

        if self.distinct {
            if !self.seen.insert(solution.clone()) {
                return false;
            }
        } else if self.reduced {
            if self.previous.as_ref() == Some(solution) {
                return false;
            }
            self.previous = Some(solution.clone());
        }

        if self.skipped < self.offset {
            self.skipped += 1;
            return false;
        }

        self.accepted += 1;
        true
    }

    /// True once a LIMIT has been reached
    pub fn exhausted(&self) -> bool {
        self.limit.is_some_and(|limit| self.accepted >= limit)
    }
}
