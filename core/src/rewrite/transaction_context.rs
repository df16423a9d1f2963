use super::{
    expect_entry, expect_return, PlacementTracker, RewriteOutput, RewrittenTrace, TraceRewriter,
};
use crate::cursor::EventCursor;
use crate::error::Result;
use crate::event::{Demarcation, EventKind, Location, MonitoringEvent, Trace};
use crate::model::{DeploymentModel, TransactionBehavior, TransactionPropagation};
use std::collections::HashMap;

/// Moves callee events to the location they would run on in the target
/// deployment, so the transaction tree of the replay follows the new
/// component boundaries.
///
/// * A call that was local under the recorded model and becomes remote without
///   context propagation runs on a fresh synthetic location. If the caller had
///   a transaction open and the candidate requires one, the callee body is
///   wrapped in an implicit transaction of its own.
/// * A call that was remote and becomes local runs on the caller's location,
///   so transactions it starts nest under the caller's.
/// * Everything else keeps its recorded location (after remapping enclosing calls).
#[derive(Debug, Clone, Copy)]
pub struct TransactionContextRewriter<'m> {
    original: &'m DeploymentModel,
    target: &'m DeploymentModel,
}

#[derive(Debug)]
struct CallFrame {
    /// Recorded location of the callee
    origin: Location,
    /// Location the callee runs on after rewriting
    location: Location,
    /// Implicit transaction opened around the callee body
    wrapped: Option<String>,
}

fn remap(frames: &[CallFrame], location: &Location) -> Location {
    frames
        .iter()
        .rev()
        .find(|frame| &frame.origin == location)
        .map(|frame| frame.location.clone())
        .unwrap_or_else(|| location.clone())
}

fn implicit(template: &MonitoringEvent, location: &Location, kind: EventKind) -> MonitoringEvent {
    MonitoringEvent::new(template.trace_id, template.timestamp, location.clone(), kind)
}

impl<'m> TransactionContextRewriter<'m> {
    pub fn new(original: &'m DeploymentModel, target: &'m DeploymentModel) -> Self {
        Self { original, target }
    }
}

impl TraceRewriter for TransactionContextRewriter<'_> {
    fn rewrite(&self, trace: &Trace) -> Result<RewrittenTrace> {
        let mut recorded = PlacementTracker::new(self.original);
        let mut placements = PlacementTracker::new(self.target);
        let mut frames: Vec<CallFrame> = Vec::new();
        let mut open: HashMap<Location, usize> = HashMap::new();
        let mut next_synthetic = 0u64;
        let mut output = RewriteOutput::new(trace);
        let mut cursor = EventCursor::new(&trace.events);

        while let Some(event) = cursor.lookahead(0) {
            let index = cursor.position();
            match &event.kind {
                EventKind::UseCaseStart { use_case } => {
                    recorded.use_case_started(event, use_case)?;
                    placements.use_case_started(event, use_case)?;
                }
                EventKind::UseCaseEnd { .. } => {
                    recorded.use_case_ended();
                    placements.use_case_ended();
                }
                EventKind::ServiceCandidateInvocation { candidate } => {
                    let entry = expect_entry(&cursor, event, candidate)?;
                    let before = recorded.enter(event, entry, candidate)?;
                    let placement = placements.enter(event, entry, candidate)?;
                    let caller_location = remap(&frames, &event.location);

                    let was_remote = before.connection.map_or(false, |c| c.is_remote());
                    let (remote, propagates) = match placement.connection {
                        Some(connection) => (
                            connection.is_remote(),
                            connection.propagation == TransactionPropagation::Propagate,
                        ),
                        None => (false, true),
                    };

                    let (location, wrapped) = if !was_remote && remote && !propagates {
                        next_synthetic += 1;
                        let location = Location::Synthetic { id: next_synthetic };
                        let caller_in_transaction =
                            open.get(&event.location).copied().unwrap_or(0) > 0;
                        let wrapped = (caller_in_transaction
                            && placement.candidate.transaction_behavior
                                == TransactionBehavior::Required)
                            .then(|| format!("{}#{}", candidate, next_synthetic));
                        (location, wrapped)
                    } else if was_remote && !remote {
                        (caller_location.clone(), None)
                    } else {
                        (remap(&frames, &entry.location), None)
                    };

                    tracing::trace!(
                        "Call {} ({} -> {}) at t={} moved from {} to {}",
                        candidate,
                        placement.caller,
                        placement.callee,
                        event.timestamp,
                        entry.location,
                        location
                    );

                    output.emit(event.relocated(caller_location), index);
                    output.emit(entry.relocated(location.clone()), index + 1);
                    if let Some(transaction_id) = &wrapped {
                        output.insert(implicit(
                            entry,
                            &location,
                            EventKind::TransactionStart {
                                transaction_id: transaction_id.clone(),
                                demarcation: Demarcation::Implicit,
                            },
                        ));
                    }
                    frames.push(CallFrame {
                        origin: entry.location.clone(),
                        location,
                        wrapped,
                    });

                    cursor.consume();
                    cursor.consume();
                    continue;
                }
                EventKind::ServiceCandidateExit { candidate } => {
                    let ret = expect_return(&cursor, event, candidate)?;
                    recorded.leave(event, candidate)?;
                    placements.leave(event, candidate)?;

                    if let Some(frame) = frames.pop() {
                        if let Some(transaction_id) = frame.wrapped {
                            output.insert(implicit(
                                event,
                                &frame.location,
                                EventKind::TransactionCommit {
                                    transaction_id,
                                    demarcation: Demarcation::Implicit,
                                },
                            ));
                        }
                        output.emit(event.relocated(frame.location), index);
                    }
                    output.emit(ret.relocated(remap(&frames, &ret.location)), index + 1);

                    cursor.consume();
                    cursor.consume();
                    continue;
                }
                EventKind::TransactionStart { .. } => {
                    *open.entry(event.location.clone()).or_default() += 1;
                }
                EventKind::TransactionCommit { .. } | EventKind::TransactionAbort { .. } => {
                    if let Some(count) = open.get_mut(&event.location) {
                        *count = count.saturating_sub(1);
                    }
                }
                _ => {}
            }
            output.emit(event.relocated(remap(&frames, &event.location)), index);
            cursor.consume();
        }

        Ok(output.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ConsistencyIssuesAnalyzer;
    use crate::event::{Entity, TraceBuilder};
    use crate::issue::IssueKind;
    use crate::model::{ConflictPolicy, Connection, Modification, ServiceCandidate};
    use uuid::Uuid;

    fn caller() -> Location {
        Location::thread("app", 1, 1)
    }

    fn callee() -> Location {
        Location::thread("svc", 2, 1)
    }

    fn entity() -> Entity {
        Entity::new("E", "1")
    }

    /// `audit` runs inside component a
    fn colocated() -> DeploymentModel {
        DeploymentModel::builder()
            .component("a")
            .component("b")
            .use_case("uc", "a")
            .service_candidate(
                ServiceCandidate::new("audit", "a").with_behavior(TransactionBehavior::Required),
            )
            .data_store("db", ConflictPolicy::StaleRead)
            .entity_type("E", "db", None)
            .connection(Connection::remote("a", "b", 5))
            .build()
            .unwrap()
    }

    /// `audit` moved to component b behind a remote connection
    fn split() -> DeploymentModel {
        colocated()
            .apply_modifications(&[Modification::MoveServiceCandidate {
                candidate: "audit".to_string(),
                component: "b".to_string(),
            }])
            .unwrap()
    }

    fn local_call_trace() -> Trace {
        TraceBuilder::new(Uuid::new_v4(), caller())
            .use_case_start(1, "uc")
            .begin(2, "tx1")
            .invocation(3, "audit")
            .entry(3, "audit")
            .write(4, entity())
            .exit(5, "audit")
            .ret(5, "audit")
            .abort(6, "tx1", "rollback")
            .use_case_end(7, "uc")
            .build()
    }

    #[test]
    fn test_unchanged_deployment_is_identity() {
        let trace = local_call_trace();
        let model = colocated();
        let rewritten = TransactionContextRewriter::new(&model, &model)
            .rewrite(&trace)
            .unwrap();

        assert_eq!(rewritten, RewrittenTrace::identity(&trace));
    }

    #[test]
    fn split_call_runs_in_its_own_transaction() {
        let trace = local_call_trace();
        let (original, target) = (colocated(), split());
        let rewritten = TransactionContextRewriter::new(&original, &target)
            .rewrite(&trace)
            .unwrap();
        let events = &rewritten.trace.events;
        let synthetic = Location::Synthetic { id: 1 };

        assert_eq!(events.len(), trace.len() + 2);
        assert_eq!(events[3].location, synthetic);
        assert!(matches!(
            &events[4].kind,
            EventKind::TransactionStart { transaction_id, demarcation: Demarcation::Implicit }
                if transaction_id == "audit#1"
        ));
        assert_eq!(events[5].location, synthetic);
        assert!(matches!(&events[6].kind, EventKind::TransactionCommit { .. }));
        assert_eq!(events[7].location, synthetic);
        assert_eq!(events[8].location, caller());
        assert_eq!(rewritten.origins[4], None);
        assert_eq!(rewritten.origins[6], None);
        assert_eq!(rewritten.origins[5], Some(4));

        // the write no longer rolls back with tx1
        let before = ConsistencyIssuesAnalyzer::analyze(&original, &trace).unwrap();
        let after = ConsistencyIssuesAnalyzer::analyze(&target, &rewritten.trace).unwrap();
        assert_eq!(before.reverted_writes.len(), 1);
        assert!(before.committed_writes.is_empty());
        assert_eq!(after.committed_writes.len(), 1);
        assert!(after.reverted_writes.is_empty());
    }

    #[test]
    fn merged_call_nests_under_caller_transaction() {
        let trace = TraceBuilder::new(Uuid::new_v4(), caller())
            .use_case_start(1, "uc")
            .begin(2, "tx1")
            .write(3, entity())
            .invocation(4, "audit")
            .on(callee())
            .entry(5, "audit")
            .begin(6, "tx2")
            .read(7, entity())
            .commit(8, "tx2")
            .exit(9, "audit")
            .on(caller())
            .ret(10, "audit")
            .commit(11, "tx1")
            .use_case_end(12, "uc")
            .build();
        let (original, target) = (split(), colocated());

        let before = ConsistencyIssuesAnalyzer::analyze(&original, &trace).unwrap();
        assert!(before.issues.is_empty());

        let rewritten = TransactionContextRewriter::new(&original, &target)
            .rewrite(&trace)
            .unwrap();
        assert!(rewritten.trace.events.iter().all(|e| e.location == caller()));

        let after =
            ConsistencyIssuesAnalyzer::analyze_rewritten(&target, &rewritten, &trace).unwrap();
        let stale: Vec<_> = after.issues_of(IssueKind::StaleRead).collect();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].event(), &trace.events[6]);
        assert_eq!(rewritten.original_event(&trace, 6), Some(&trace.events[6]));
    }

    #[test]
    fn no_wrapping_without_caller_transaction() {
        let trace = TraceBuilder::new(Uuid::new_v4(), caller())
            .use_case_start(1, "uc")
            .invocation(3, "audit")
            .entry(3, "audit")
            .write(4, entity())
            .exit(5, "audit")
            .ret(5, "audit")
            .use_case_end(7, "uc")
            .build();
        let (original, target) = (colocated(), split());
        let rewritten = TransactionContextRewriter::new(&original, &target)
            .rewrite(&trace)
            .unwrap();

        assert_eq!(rewritten.trace.len(), trace.len());
        assert_eq!(rewritten.trace.events[3].location, Location::Synthetic { id: 1 });
    }

    #[test]
    fn propagating_connection_keeps_callee_in_place() {
        let trace = local_call_trace();
        let original = colocated();
        let target = split()
            .apply_modifications(&[Modification::SetConnection {
                connection: Connection::remote("a", "b", 5)
                    .with_propagation(TransactionPropagation::Propagate),
            }])
            .unwrap();
        let rewritten = TransactionContextRewriter::new(&original, &target)
            .rewrite(&trace)
            .unwrap();

        assert_eq!(rewritten.trace, trace);
    }
}
