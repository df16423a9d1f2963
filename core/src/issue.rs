use crate::event::{Entity, MonitoringEvent};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IssueKind {
    PotentialDeadlock,
    StaleRead,
    WriteConflict,
    CrossComponentAccess,
    InterleavedWrite,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssueKind::PotentialDeadlock => "potential-deadlock",
            IssueKind::StaleRead => "stale-read",
            IssueKind::WriteConflict => "write-conflict",
            IssueKind::CrossComponentAccess => "cross-component-access",
            IssueKind::InterleavedWrite => "interleaved-write",
        };
        f.write_str(name)
    }
}

/// A consistency problem found during replay. Issues are data, not errors:
/// replay continues after every one of them.
///
/// Ordering and equality follow (kind, entity, event), which is what result
/// sets deduplicate on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConsistencyIssue {
    PotentialDeadlock {
        entity: Entity,
        event: MonitoringEvent,
    },
    StaleRead {
        entity: Entity,
        event: MonitoringEvent,
    },
    WriteConflict {
        entity: Entity,
        event: MonitoringEvent,
    },
    CrossComponentAccess {
        entity: Entity,
        event: MonitoringEvent,
        accessing_component: String,
        owning_component: String,
    },
    InterleavedWrite {
        entity: Entity,
        event: MonitoringEvent,
    },
}

impl ConsistencyIssue {
    pub fn kind(&self) -> IssueKind {
        match self {
            ConsistencyIssue::PotentialDeadlock { .. } => IssueKind::PotentialDeadlock,
            ConsistencyIssue::StaleRead { .. } => IssueKind::StaleRead,
            ConsistencyIssue::WriteConflict { .. } => IssueKind::WriteConflict,
            ConsistencyIssue::CrossComponentAccess { .. } => IssueKind::CrossComponentAccess,
            ConsistencyIssue::InterleavedWrite { .. } => IssueKind::InterleavedWrite,
        }
    }

    pub fn entity(&self) -> &Entity {
        match self {
            ConsistencyIssue::PotentialDeadlock { entity, .. }
            | ConsistencyIssue::StaleRead { entity, .. }
            | ConsistencyIssue::WriteConflict { entity, .. }
            | ConsistencyIssue::CrossComponentAccess { entity, .. }
            | ConsistencyIssue::InterleavedWrite { entity, .. } => entity,
        }
    }

    /// The event that triggered the issue
    pub fn event(&self) -> &MonitoringEvent {
        match self {
            ConsistencyIssue::PotentialDeadlock { event, .. }
            | ConsistencyIssue::StaleRead { event, .. }
            | ConsistencyIssue::WriteConflict { event, .. }
            | ConsistencyIssue::CrossComponentAccess { event, .. }
            | ConsistencyIssue::InterleavedWrite { event, .. } => event,
        }
    }

    /// Same issue attributed to a different triggering event
    pub fn with_event(&self, event: MonitoringEvent) -> Self {
        let mut issue = self.clone();
        match &mut issue {
            ConsistencyIssue::PotentialDeadlock { event: e, .. }
            | ConsistencyIssue::StaleRead { event: e, .. }
            | ConsistencyIssue::WriteConflict { event: e, .. }
            | ConsistencyIssue::CrossComponentAccess { event: e, .. }
            | ConsistencyIssue::InterleavedWrite { event: e, .. } => *e = event,
        }
        issue
    }
}

impl fmt::Display for ConsistencyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {} at {}", self.kind(), self.entity(), self.event())
    }
}
