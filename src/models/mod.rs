// Domain models: samples, snapshots, stored rows, perf intervals, retention policy, wire messages.

mod live;
mod perf;
mod retention;
mod row;
mod sample;

pub use live::{ClientMessage, LiveData, LiveMessage};
pub use perf::{PerfEventValue, PerfIntervalSample};
pub use retention::RetentionPolicy;
pub use row::{METRIC_TYPES, MetricRow, is_known_metric_type};
pub use sample::{AggregatedSnapshot, Fields};
