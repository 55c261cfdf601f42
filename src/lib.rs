//! # SesameStream
//!
//! A continuous-query engine over unbounded streams of RDF triples.
//! Queries (a conjunctive subset of SPARQL SELECT) are registered
//! *before* data arrives; every ingested triple is matched
//! forward-chaining style against all active queries, and newly
//! completed solutions are pushed to per-subscription handlers as they
//! appear.
//!
//! This library provides:
//! - Incremental evaluation: each triple extends stored partial
//!   solutions instead of re-running queries over accumulated data
//! - Per-query and per-statement time-to-live with background eviction
//! - DISTINCT / REDUCED / OFFSET / LIMIT solution modifiers and a
//!   filter subset (comparisons, boolean connectives, BOUND, IN)
//! - Subscription handles with cancellation and TTL renewal
//!
//! ## When Are Results Emitted?
//!
//! Results are pushed the moment the triple completing a solution is
//! ingested; there is no polling and no batching. A join waiting on a
//! triple that never arrives never emits. TTLs bound how long the
//! engine waits: a partial join whose inputs expire is evicted and can
//! no longer complete.
//!
//! ```rust,no_run
//! use oxrdf::{Literal, NamedNode, Triple};
//! use sesamestream::QueryEngine;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = QueryEngine::new();
//!
//!     let query = r#"
//!         PREFIX ex: <http://example.org/>
//!         SELECT ?person ?age
//!         WHERE {
//!             ?person ex:knows ex:arthur .
//!             ?person ex:age ?age .
//!         }
//!     "#;
//!
//!     // TTL of 0 keeps the query registered indefinitely
//!     let subscription = engine.add_query(0, query, |solution| {
//!         println!("solution: {solution}");
//!     })?;
//!
//!     engine.add_statement(
//!         0,
//!         Triple::new(
//!             NamedNode::new("http://example.org/ford")?,
//!             NamedNode::new("http://example.org/knows")?,
//!             NamedNode::new("http://example.org/arthur")?,
//!         ),
//!     );
//!     // completes the join; the handler fires before this call returns
//!     engine.add_statement(
//!         0,
//!         Triple::new(
//!             NamedNode::new("http://example.org/ford")?,
//!             NamedNode::new("http://example.org/age")?,
//!             Literal::new_simple_literal("42"),
//!         ),
//!     );
//!
//!     subscription.cancel();
//!     engine.shut_down();
//!     Ok(())
//! }
//! ```

mod binding_set;
pub mod core;
mod engine;
mod error;
mod sparql;

/// Tuple arity of the index; triples throughout this crate
pub const TUPLE_SIZE: usize = 3;

pub use binding_set::BindingSet;
pub use engine::{
    CleanupPolicy, Clock, EngineConfig, IntervalCleanupPolicy, ManualClock, Quantity,
    QueryEngine, SolutionHandler, Subscription, SystemClock,
};
pub use error::{StreamError, StreamResult};
pub use sparql::{FilterError, FilterEvaluator, SolutionSequenceModifier, SparqlSelect};
