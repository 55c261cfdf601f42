use oxrdf::Term;
use std::fmt;

/// An ordered set of `variable name -> RDF term` pairs, as delivered to
/// subscription handlers. Order follows the query's projection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BindingSet {
    entries: Vec<(String, Term)>,
}

impl BindingSet {
    pub fn new() -> Self {
        BindingSet {
            entries: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, name: String, value: Term) {
        self.entries.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&Term> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Term)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for BindingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{name}:{value}")?;
        }
        Ok(())
    }
}
