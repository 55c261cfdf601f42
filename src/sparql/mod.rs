mod filter;
mod modifier;
mod query;

pub use filter::{FilterError, FilterEvaluator};
pub use modifier::SolutionSequenceModifier;
pub use query::SparqlSelect;
