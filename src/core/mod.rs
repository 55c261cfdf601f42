mod bindings;
mod index;
mod solution;
mod store;
mod term;

pub use bindings::Bindings;
pub use index::QueryIndex;
pub use solution::{expiration, PartialSolution, Query, Timestamp, NEVER};
pub use store::{PatternEvent, PatternListener, PatternStore};
pub use term::{Pattern, Term};
