mod metrics;
mod query_engine;
mod reaper;
mod subscription;

pub use metrics::Quantity;
pub use query_engine::{EngineConfig, QueryEngine};
pub use reaper::{CleanupPolicy, Clock, IntervalCleanupPolicy, ManualClock, SystemClock};
pub use subscription::{SolutionHandler, Subscription};
