mod change;
mod consistency;
mod latency;
mod overhead;
mod remote_calls;

pub use change::{
    ConsistencyChange, ConsistencyChangeAnalysis, DurationChange, DurationChangeAnalysis,
    DurationSummary,
};
pub use consistency::{ConsistencyIssuesAnalyzer, ConsistencyReport, WriteRecord};
pub use latency::{LatencyAnalyzer, LatencyResult};
pub use overhead::{OverheadAnalyzer, OverheadResult};
pub use remote_calls::{RemoteCall, RemoteCallsAnalyzer};
