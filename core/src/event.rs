use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Logical clock value carried by every monitoring event
pub type Timestamp = u64;

/// Where an event was observed
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Location {
    /// A process (and optionally a thread) on a real host
    Observed {
        host: String,
        process_id: u32,
        thread_id: Option<u64>,
    },
    /// A location introduced by a rewriter; never present in a recorded trace
    Synthetic { id: u64 },
}

impl Location {
    pub fn observed(host: impl Into<String>, process_id: u32) -> Self {
        Location::Observed {
            host: host.into(),
            process_id,
            thread_id: None,
        }
    }

    pub fn thread(host: impl Into<String>, process_id: u32, thread_id: u64) -> Self {
        Location::Observed {
            host: host.into(),
            process_id,
            thread_id: Some(thread_id),
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, Location::Synthetic { .. })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Observed {
                host,
                process_id,
                thread_id: Some(thread),
            } => write!(f, "{}:{}#{}", host, process_id, thread),
            Location::Observed {
                host,
                process_id,
                thread_id: None,
            } => write!(f, "{}:{}", host, process_id),
            Location::Synthetic { id } => write!(f, "synthetic-{}", id),
        }
    }
}

/// The unit of conflict detection. Compared by value only.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: String,
    pub id: String,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.entity_type, self.id)
    }
}

/// How a transaction boundary was demarcated
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Demarcation {
    Explicit,
    Implicit,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    UseCaseStart {
        use_case: String,
    },
    UseCaseEnd {
        use_case: String,
    },
    /// Observed at the caller
    ServiceCandidateInvocation {
        candidate: String,
    },
    /// Observed at the callee
    ServiceCandidateEntry {
        candidate: String,
    },
    /// Observed at the callee
    ServiceCandidateExit {
        candidate: String,
    },
    /// Observed at the caller
    ServiceCandidateReturn {
        candidate: String,
    },
    TransactionStart {
        transaction_id: String,
        demarcation: Demarcation,
    },
    TransactionCommit {
        transaction_id: String,
        demarcation: Demarcation,
    },
    TransactionAbort {
        transaction_id: String,
        demarcation: Demarcation,
        cause: String,
    },
    EntityRead {
        entity: Entity,
    },
    EntityWrite {
        entity: Entity,
    },
}

/// A single recorded event of one trace
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonitoringEvent {
    pub timestamp: Timestamp,
    pub trace_id: Uuid,
    pub location: Location,
    pub kind: EventKind,
}

impl MonitoringEvent {
    pub fn new(trace_id: Uuid, timestamp: Timestamp, location: Location, kind: EventKind) -> Self {
        Self {
            timestamp,
            trace_id,
            location,
            kind,
        }
    }

    /// Copy of this event observed at another time
    pub fn at(&self, timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            ..self.clone()
        }
    }

    /// Copy of this event observed at another location
    pub fn relocated(&self, location: Location) -> Self {
        Self {
            location,
            ..self.clone()
        }
    }

    /// Service candidate named by an invocation/entry/exit/return event
    pub fn candidate(&self) -> Option<&str> {
        match &self.kind {
            EventKind::ServiceCandidateInvocation { candidate }
            | EventKind::ServiceCandidateEntry { candidate }
            | EventKind::ServiceCandidateExit { candidate }
            | EventKind::ServiceCandidateReturn { candidate } => Some(candidate),
            _ => None,
        }
    }

    /// Entity touched by a read or write event
    pub fn entity(&self) -> Option<&Entity> {
        match &self.kind {
            EventKind::EntityRead { entity } | EventKind::EntityWrite { entity } => Some(entity),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            EventKind::UseCaseStart { .. } => "UseCaseStart",
            EventKind::UseCaseEnd { .. } => "UseCaseEnd",
            EventKind::ServiceCandidateInvocation { .. } => "ServiceCandidateInvocation",
            EventKind::ServiceCandidateEntry { .. } => "ServiceCandidateEntry",
            EventKind::ServiceCandidateExit { .. } => "ServiceCandidateExit",
            EventKind::ServiceCandidateReturn { .. } => "ServiceCandidateReturn",
            EventKind::TransactionStart { .. } => "TransactionStart",
            EventKind::TransactionCommit { .. } => "TransactionCommit",
            EventKind::TransactionAbort { .. } => "TransactionAbort",
            EventKind::EntityRead { .. } => "EntityRead",
            EventKind::EntityWrite { .. } => "EntityWrite",
        }
    }
}

impl fmt::Display for MonitoringEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let detail = match &self.kind {
            EventKind::UseCaseStart { use_case } | EventKind::UseCaseEnd { use_case } => {
                use_case.clone()
            }
            EventKind::ServiceCandidateInvocation { candidate }
            | EventKind::ServiceCandidateEntry { candidate }
            | EventKind::ServiceCandidateExit { candidate }
            | EventKind::ServiceCandidateReturn { candidate } => candidate.clone(),
            EventKind::TransactionStart { transaction_id, .. }
            | EventKind::TransactionCommit { transaction_id, .. } => transaction_id.clone(),
            EventKind::TransactionAbort {
                transaction_id,
                cause,
                ..
            } => format!("{} ({})", transaction_id, cause),
            EventKind::EntityRead { entity } | EventKind::EntityWrite { entity } => {
                entity.to_string()
            }
        };
        write!(
            f,
            "{}({}) at t={} on {}",
            self.kind_name(),
            detail,
            self.timestamp,
            self.location
        )
    }
}

/// An ordered, finite sequence of events belonging to one trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub id: Uuid,
    pub events: Vec<MonitoringEvent>,
}

impl Trace {
    pub fn new(id: Uuid, events: Vec<MonitoringEvent>) -> Self {
        Self { id, events }
    }

    pub fn empty(id: Uuid) -> Self {
        Self::new(id, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Convenience for assembling traces event by event.
///
/// Every event is stamped with the builder's trace id; the location defaults
/// to the one given at construction and can be switched with [`TraceBuilder::on`].
#[derive(Debug, Clone)]
pub struct TraceBuilder {
    trace_id: Uuid,
    location: Location,
    events: Vec<MonitoringEvent>,
}

impl TraceBuilder {
    pub fn new(trace_id: Uuid, location: Location) -> Self {
        Self {
            trace_id,
            location,
            events: Vec::new(),
        }
    }

    /// Switch the location used for subsequent events
    pub fn on(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    pub fn push(mut self, timestamp: Timestamp, kind: EventKind) -> Self {
        self.events.push(MonitoringEvent::new(
            self.trace_id,
            timestamp,
            self.location.clone(),
            kind,
        ));
        self
    }

    pub fn use_case_start(self, timestamp: Timestamp, use_case: &str) -> Self {
        self.push(
            timestamp,
            EventKind::UseCaseStart {
                use_case: use_case.to_string(),
            },
        )
    }

    pub fn use_case_end(self, timestamp: Timestamp, use_case: &str) -> Self {
        self.push(
            timestamp,
            EventKind::UseCaseEnd {
                use_case: use_case.to_string(),
            },
        )
    }

    pub fn invocation(self, timestamp: Timestamp, candidate: &str) -> Self {
        self.push(
            timestamp,
            EventKind::ServiceCandidateInvocation {
                candidate: candidate.to_string(),
            },
        )
    }

    pub fn entry(self, timestamp: Timestamp, candidate: &str) -> Self {
        self.push(
            timestamp,
            EventKind::ServiceCandidateEntry {
                candidate: candidate.to_string(),
            },
        )
    }

    pub fn exit(self, timestamp: Timestamp, candidate: &str) -> Self {
        self.push(
            timestamp,
            EventKind::ServiceCandidateExit {
                candidate: candidate.to_string(),
            },
        )
    }

    pub fn ret(self, timestamp: Timestamp, candidate: &str) -> Self {
        self.push(
            timestamp,
            EventKind::ServiceCandidateReturn {
                candidate: candidate.to_string(),
            },
        )
    }

    pub fn begin(self, timestamp: Timestamp, transaction_id: &str) -> Self {
        self.push(
            timestamp,
            EventKind::TransactionStart {
                transaction_id: transaction_id.to_string(),
                demarcation: Demarcation::Explicit,
            },
        )
    }

    pub fn commit(self, timestamp: Timestamp, transaction_id: &str) -> Self {
        self.push(
            timestamp,
            EventKind::TransactionCommit {
                transaction_id: transaction_id.to_string(),
                demarcation: Demarcation::Explicit,
            },
        )
    }

    pub fn abort(self, timestamp: Timestamp, transaction_id: &str, cause: &str) -> Self {
        self.push(
            timestamp,
            EventKind::TransactionAbort {
                transaction_id: transaction_id.to_string(),
                demarcation: Demarcation::Explicit,
                cause: cause.to_string(),
            },
        )
    }

    pub fn read(self, timestamp: Timestamp, entity: Entity) -> Self {
        self.push(timestamp, EventKind::EntityRead { entity })
    }

    pub fn write(self, timestamp: Timestamp, entity: Entity) -> Self {
        self.push(timestamp, EventKind::EntityWrite { entity })
    }

    pub fn build(self) -> Trace {
        Trace::new(self.trace_id, self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_stamps_trace_and_location() {
        let trace_id = Uuid::new_v4();
        let main = Location::thread("app-1", 10, 1);
        let remote = Location::observed("db-1", 20);

        let trace = TraceBuilder::new(trace_id, main.clone())
            .use_case_start(100, "checkout")
            .on(remote.clone())
            .write(150, Entity::new("Order", "1"))
            .build();

        assert_eq!(trace.len(), 2);
        assert!(trace.events.iter().all(|e| e.trace_id == trace_id));
        assert_eq!(trace.events[0].location, main);
        assert_eq!(trace.events[1].location, remote);
    }

    #[test]
    fn entities_compare_by_value() {
        let a = Entity::new("Order", "42");
        let b = Entity::new(String::from("Order"), String::from("42"));
        assert_eq!(a, b);
        assert_ne!(a, Entity::new("Order", "43"));
    }

    #[test]
    fn accessors_expose_candidate_and_entity() {
        let trace = TraceBuilder::new(Uuid::new_v4(), Location::observed("h", 1))
            .invocation(1, "sc1")
            .read(2, Entity::new("E", "1"))
            .build();

        assert_eq!(trace.events[0].candidate(), Some("sc1"));
        assert_eq!(trace.events[0].entity(), None);
        assert_eq!(trace.events[1].entity(), Some(&Entity::new("E", "1")));
        assert_eq!(trace.events[1].candidate(), None);
    }

    #[test]
    fn event_display_names_kind_time_and_location() {
        let event = MonitoringEvent::new(
            Uuid::nil(),
            500,
            Location::Synthetic { id: 3 },
            EventKind::EntityRead {
                entity: Entity::new("E", "1"),
            },
        );

        assert_eq!(event.to_string(), "EntityRead(E[1]) at t=500 on synthetic-3");
    }

    #[test]
    fn trace_serialization_roundtrip() {
        let trace = TraceBuilder::new(Uuid::new_v4(), Location::thread("h", 1, 7))
            .begin(1, "tx1")
            .abort(2, "tx1", "timeout")
            .build();

        let json = serde_json::to_string(&trace).unwrap();
        let decoded: Trace = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, trace);
    }
}
