pub mod analysis;
pub mod config;
pub mod cursor;
pub mod error;
pub mod event;
pub mod fanout;
pub mod issue;
pub mod model;
pub mod rewrite;
pub mod simulator;
pub mod transaction;

pub use analysis::{
    ConsistencyChange, ConsistencyChangeAnalysis, ConsistencyIssuesAnalyzer, ConsistencyReport,
    DurationChange, DurationChangeAnalysis, LatencyAnalyzer, OverheadAnalyzer,
    RemoteCallsAnalyzer,
};
pub use config::Config;
pub use error::{AnalysisError, FanOutError, ModelError, ProtocolViolation, ViolationKind};
pub use event::{Entity, EventKind, Location, MonitoringEvent, Trace, TraceBuilder};
pub use fanout::{run_per_trace, FanOutOutcome};
pub use issue::{ConsistencyIssue, IssueKind};
pub use model::{DeploymentModel, Modification};
pub use rewrite::{RewrittenTrace, TraceRewriter};
pub use simulator::{SimulationListener, SimulationMode, TraceSimulator};
