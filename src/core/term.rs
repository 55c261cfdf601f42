use crate::core::bindings::Bindings;
use std::hash::Hash;

/// A single position of a tuple pattern: either a concrete value or a
/// named variable. Equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term<V> {
    Constant(V),
    Variable(String),
}

impl<V> Term<V> {
    pub fn is_constant(&self) -> bool {
        matches!(self, Term::Constant(_))
    }

    /// The concrete value, if this term is a constant
    pub fn value(&self) -> Option<&V> {
        match self {
            Term::Constant(v) => Some(v),
            Term::Variable(_) => None,
        }
    }

    /// The variable name, if this term is a variable
    pub fn var_name(&self) -> Option<&str> {
        match self {
            Term::Constant(_) => None,
            Term::Variable(name) => Some(name),
        }
    }
}

/// An ordered tuple of terms of fixed arity `N` (3 for triple patterns).
///
/// Patterns are compared structurally; the pattern store interns them so
/// that structurally equal patterns reachable from the index are one and
/// the same allocation (see [`PatternStore`](crate::core::PatternStore)).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern<V, const N: usize> {
    terms: [Term<V>; N],
}

impl<V, const N: usize> Pattern<V, N> {
    pub fn new(terms: [Term<V>; N]) -> Self {
        Pattern { terms }
    }

    pub fn terms(&self) -> &[Term<V>; N] {
        &self.terms
    }

    /// True if every position holds a constant
    pub fn is_ground(&self) -> bool {
        self.terms.iter().all(Term::is_constant)
    }
}

impl<V: Clone + Eq + Hash, const N: usize> Pattern<V, N> {
    /// Position-wise unification against a concrete tuple.
    ///
    /// A constant term must equal the tuple element at its position; a
    /// variable term binds its name to that element. A variable name
    /// occurring at several positions must bind the same value each time.
    /// On success the returned bindings contain exactly the variables of
    /// this pattern, ready to be prepended onto a partial solution's
    /// accumulated bindings.
    pub fn unify(&self, tuple: &[V; N]) -> Option<Bindings<V>> {
        let mut fragment = Bindings::new();
        for (term, value) in self.terms.iter().zip(tuple.iter()) {
            match term {
                Term::Constant(c) => {
                    if c != value {
                        return None;
                    }
                }
                Term::Variable(name) => match fragment.get(name) {
                    Some(bound) if bound != value => return None,
                    Some(_) => {}
                    None => fragment = fragment.bind(name.clone(), value.clone()),
                },
            }
        }
        Some(fragment)
    }

    /// Replaces each variable term whose name is bound with the bound
    /// constant. Returns `None` when no variable was substituted, so the
    /// caller can keep the existing canonical instance.
    pub fn substitute(&self, bindings: &Bindings<V>) -> Option<Pattern<V, N>> {
        let mut changed = false;
        let terms: [Term<V>; N] = std::array::from_fn(|i| match &self.terms[i] {
            Term::Variable(name) => match bindings.get(name) {
                Some(value) => {
                    changed = true;
                    Term::Constant(value.clone())
                }
                None => self.terms[i].clone(),
            },
            constant => constant.clone(),
        });
        changed.then_some(Pattern { terms })
    }
}
