use crate::event::{MonitoringEvent, Timestamp};
use thiserror::Error;
use uuid::Uuid;

/// What made a trace unreplayable against a model
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    #[error("transaction {transaction_id} is already bound at this location")]
    DuplicateTransaction { transaction_id: String },

    #[error("no transaction is bound at this location")]
    NoBoundTransaction,

    #[error("expected bound transaction {bound}, event names {found}")]
    TransactionMismatch { bound: String, found: String },

    #[error("invocation of {candidate} is not immediately followed by its entry")]
    MissingEntry { candidate: String },

    #[error("exit of {candidate} is not immediately followed by its return")]
    MissingReturn { candidate: String },

    #[error("exit of {candidate} does not match the active invocation {active:?}")]
    UnbalancedExit {
        candidate: String,
        active: Option<String>,
    },

    #[error("entry or return of {candidate} without its invocation or exit")]
    UnpairedEvent { candidate: String },

    #[error("no use case is active")]
    NoActiveUseCase,

    #[error("use case {use_case} is not allocated to a component")]
    UnallocatedUseCase { use_case: String },

    #[error("service candidate {candidate} is not allocated to a component")]
    UnallocatedServiceCandidate { candidate: String },

    #[error("entity type {entity_type} is not declared")]
    UnknownEntityType { entity_type: String },

    #[error("no connection from {from} to {to}")]
    MissingConnection { from: String, to: String },

    #[error("timestamp went backwards from {previous}")]
    TimestampRegression { previous: Timestamp },
}

/// Fatal replay error: the offending event plus a diagnostic
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("protocol violation at {event}: {kind}")]
pub struct ProtocolViolation {
    pub event: Box<MonitoringEvent>,
    pub kind: ViolationKind,
}

impl ProtocolViolation {
    pub fn new(event: &MonitoringEvent, kind: ViolationKind) -> Self {
        Self {
            event: Box::new(event.clone()),
            kind,
        }
    }
}

pub type Result<T, E = ProtocolViolation> = std::result::Result<T, E>;

/// Errors raised while building or modifying a deployment model
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown component {0}")]
    UnknownComponent(String),

    #[error("unknown use case {0}")]
    UnknownUseCase(String),

    #[error("unknown service candidate {0}")]
    UnknownServiceCandidate(String),

    #[error("unknown data store {0}")]
    UnknownDataStore(String),

    #[error("unknown entity type {0}")]
    UnknownEntityType(String),

    #[error("no connection from {from} to {to}")]
    UnknownConnection { from: String, to: String },

    #[error("invalid model document: {0}")]
    Document(String),
}

/// One trace task that failed during a fan-out
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("trace {trace_id}: {violation}")]
pub struct TaskFailure {
    pub trace_id: Uuid,
    pub violation: ProtocolViolation,
}

/// Aggregated failure of a fan-out: the first failure in trace order plus the rest
#[derive(Error, Debug, Clone)]
#[error("{} trace task(s) failed; first: {primary}", .suppressed.len() + 1)]
pub struct FanOutError {
    pub primary: TaskFailure,
    pub suppressed: Vec<TaskFailure>,
}

impl FanOutError {
    pub fn failure_count(&self) -> usize {
        1 + self.suppressed.len()
    }

    /// All failures, primary first
    pub fn failures(&self) -> impl Iterator<Item = &TaskFailure> {
        std::iter::once(&self.primary).chain(self.suppressed.iter())
    }
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    Failed(#[from] FanOutError),

    /// A task panicked or was cancelled while the analysis awaited it
    #[error("analysis interrupted: {0}")]
    Interrupted(#[from] tokio::task::JoinError),

    #[error("analysis interrupted: {0}")]
    Closed(#[from] tokio::sync::AcquireError),
}
