mod latency;
mod overhead;
mod transaction_context;

pub use latency::LatencyRewriter;
pub use overhead::{OverheadProfile, OverheadRewriter};
pub use transaction_context::TransactionContextRewriter;

use crate::cursor::EventCursor;
use crate::error::{ProtocolViolation, Result, ViolationKind};
use crate::event::{EventKind, MonitoringEvent, Trace};
use crate::model::{Connection, DeploymentModel, ServiceCandidate};

/// A rewritten trace plus, per event, the index of the original event it
/// derives from. Inserted events have no origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenTrace {
    pub trace: Trace,
    pub origins: Vec<Option<usize>>,
}

impl RewrittenTrace {
    /// The unchanged trace, every event its own origin
    pub fn identity(trace: &Trace) -> Self {
        Self {
            trace: trace.clone(),
            origins: (0..trace.len()).map(Some).collect(),
        }
    }

    pub fn origin(&self, index: usize) -> Option<usize> {
        self.origins.get(index).copied().flatten()
    }

    /// Recorded event the rewritten event at `index` came from
    pub fn original_event<'a>(
        &self,
        original: &'a Trace,
        index: usize,
    ) -> Option<&'a MonitoringEvent> {
        original.events.get(self.origin(index)?)
    }

    /// Compose with a rewrite of this rewrite's output
    pub fn then(self, next: RewrittenTrace) -> RewrittenTrace {
        let origins = next
            .origins
            .iter()
            .map(|origin| origin.and_then(|i| self.origin(i)))
            .collect();
        RewrittenTrace {
            trace: next.trace,
            origins,
        }
    }
}

/// Produces the trace a target deployment would have recorded. The input
/// trace is never mutated.
pub trait TraceRewriter {
    fn rewrite(&self, trace: &Trace) -> Result<RewrittenTrace>;
}

/// Accumulates rewritten events with their origins
#[derive(Debug)]
pub(crate) struct RewriteOutput {
    trace_id: uuid::Uuid,
    events: Vec<MonitoringEvent>,
    origins: Vec<Option<usize>>,
}

impl RewriteOutput {
    pub(crate) fn new(trace: &Trace) -> Self {
        Self {
            trace_id: trace.id,
            events: Vec::with_capacity(trace.len()),
            origins: Vec::with_capacity(trace.len()),
        }
    }

    pub(crate) fn emit(&mut self, event: MonitoringEvent, origin: usize) {
        self.events.push(event);
        self.origins.push(Some(origin));
    }

    pub(crate) fn insert(&mut self, event: MonitoringEvent) {
        self.events.push(event);
        self.origins.push(None);
    }

    pub(crate) fn finish(self) -> RewrittenTrace {
        RewrittenTrace {
            trace: Trace::new(self.trace_id, self.events),
            origins: self.origins,
        }
    }
}

/// Where one call lands under a particular model
#[derive(Debug, Clone, Copy)]
pub(crate) struct Placement<'m> {
    pub candidate: &'m ServiceCandidate,
    pub caller: &'m str,
    pub callee: &'m str,
    /// Present only when caller and callee differ
    pub connection: Option<&'m Connection>,
}

/// Tracks the executing component through a trace under one model
#[derive(Debug)]
pub(crate) struct PlacementTracker<'m> {
    model: &'m DeploymentModel,
    use_cases: Vec<&'m str>,
    calls: Vec<Placement<'m>>,
}

impl<'m> PlacementTracker<'m> {
    pub(crate) fn new(model: &'m DeploymentModel) -> Self {
        Self {
            model,
            use_cases: Vec::new(),
            calls: Vec::new(),
        }
    }

    pub(crate) fn use_case_started(&mut self, event: &MonitoringEvent, use_case: &str) -> Result<()> {
        let component = self.model.use_case_component(use_case).ok_or_else(|| {
            ProtocolViolation::new(
                event,
                ViolationKind::UnallocatedUseCase {
                    use_case: use_case.to_string(),
                },
            )
        })?;
        self.use_cases.push(component);
        Ok(())
    }

    pub(crate) fn use_case_ended(&mut self) {
        self.use_cases.pop();
    }

    pub(crate) fn enter(
        &mut self,
        invocation: &MonitoringEvent,
        entry: &MonitoringEvent,
        name: &str,
    ) -> Result<Placement<'m>> {
        let caller = self
            .calls
            .last()
            .map(|call| call.callee)
            .or_else(|| self.use_cases.last().copied())
            .ok_or_else(|| ProtocolViolation::new(invocation, ViolationKind::NoActiveUseCase))?;
        let candidate = self.model.service_candidate(name).ok_or_else(|| {
            ProtocolViolation::new(
                entry,
                ViolationKind::UnallocatedServiceCandidate {
                    candidate: name.to_string(),
                },
            )
        })?;
        let callee = candidate.component.as_str();
        let connection = if caller == callee {
            None
        } else {
            let connection = self.model.connection(caller, callee).ok_or_else(|| {
                ProtocolViolation::new(
                    invocation,
                    ViolationKind::MissingConnection {
                        from: caller.to_string(),
                        to: callee.to_string(),
                    },
                )
            })?;
            Some(connection)
        };

        let placement = Placement {
            candidate,
            caller,
            callee,
            connection,
        };
        self.calls.push(placement);
        Ok(placement)
    }

    pub(crate) fn leave(&mut self, exit: &MonitoringEvent, name: &str) -> Result<Placement<'m>> {
        match self.calls.last() {
            Some(call) if call.candidate.name == name => {}
            other => {
                return Err(ProtocolViolation::new(
                    exit,
                    ViolationKind::UnbalancedExit {
                        candidate: name.to_string(),
                        active: other.map(|call| call.candidate.name.clone()),
                    },
                ))
            }
        }
        self.calls
            .pop()
            .ok_or_else(|| ProtocolViolation::new(exit, ViolationKind::NoActiveUseCase))
    }
}

/// The event after an invocation, which must be the matching entry
pub(crate) fn expect_entry<'a>(
    cursor: &EventCursor<'a>,
    invocation: &MonitoringEvent,
    candidate: &str,
) -> Result<&'a MonitoringEvent> {
    cursor
        .lookahead(1)
        .filter(|next| {
            matches!(&next.kind, EventKind::ServiceCandidateEntry { candidate: c } if c == candidate)
        })
        .ok_or_else(|| {
            ProtocolViolation::new(
                invocation,
                ViolationKind::MissingEntry {
                    candidate: candidate.to_string(),
                },
            )
        })
}

/// The event after an exit, which must be the matching return
pub(crate) fn expect_return<'a>(
    cursor: &EventCursor<'a>,
    exit: &MonitoringEvent,
    candidate: &str,
) -> Result<&'a MonitoringEvent> {
    cursor
        .lookahead(1)
        .filter(|next| {
            matches!(&next.kind, EventKind::ServiceCandidateReturn { candidate: c } if c == candidate)
        })
        .ok_or_else(|| {
            ProtocolViolation::new(
                exit,
                ViolationKind::MissingReturn {
                    candidate: candidate.to_string(),
                },
            )
        })
}

/// Extra time a call costs on its way in and on its way back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CrossingCost {
    pub call: u64,
    pub ret: u64,
}

/// Rewrites a trace by adjusting the invocation->entry and exit->return gaps
/// of every call whose crossing cost differs between the two models. The
/// difference cascades to every later event.
pub(crate) fn shift_gaps<F>(
    trace: &Trace,
    original: &DeploymentModel,
    target: &DeploymentModel,
    cost: F,
) -> Result<RewrittenTrace>
where
    F: Fn(&Placement<'_>) -> CrossingCost,
{
    let mut before = PlacementTracker::new(original);
    let mut after = PlacementTracker::new(target);
    let mut output = RewriteOutput::new(trace);
    let mut cursor = EventCursor::new(&trace.events);
    let mut offset: i64 = 0;

    while let Some(event) = cursor.lookahead(0) {
        let index = cursor.position();
        match &event.kind {
            EventKind::UseCaseStart { use_case } => {
                before.use_case_started(event, use_case)?;
                after.use_case_started(event, use_case)?;
            }
            EventKind::UseCaseEnd { .. } => {
                before.use_case_ended();
                after.use_case_ended();
            }
            EventKind::ServiceCandidateInvocation { candidate } => {
                let entry = expect_entry(&cursor, event, candidate)?;
                let old = cost(&before.enter(event, entry, candidate)?).call;
                let new = cost(&after.enter(event, entry, candidate)?).call;
                offset = emit_pair(&mut output, event, entry, index, offset, old, new);
                cursor.consume();
                cursor.consume();
                continue;
            }
            EventKind::ServiceCandidateExit { candidate } => {
                let ret = expect_return(&cursor, event, candidate)?;
                let old = cost(&before.leave(event, candidate)?).ret;
                let new = cost(&after.leave(event, candidate)?).ret;
                offset = emit_pair(&mut output, event, ret, index, offset, old, new);
                cursor.consume();
                cursor.consume();
                continue;
            }
            _ => {}
        }
        output.emit(event.at(shifted(event.timestamp, offset)), index);
        cursor.consume();
    }

    Ok(output.finish())
}

/// Emit a call or return pair, resizing its gap when the cost changed.
/// Returns the offset for everything that follows.
fn emit_pair(
    output: &mut RewriteOutput,
    first: &MonitoringEvent,
    second: &MonitoringEvent,
    index: usize,
    offset: i64,
    old: u64,
    new: u64,
) -> i64 {
    let start = shifted(first.timestamp, offset);
    let gap = second.timestamp.saturating_sub(first.timestamp);
    let resized = if old == new {
        gap
    } else {
        gap.saturating_sub(old) + new
    };
    output.emit(first.at(start), index);
    output.emit(second.at(start + resized), index + 1);
    offset + resized as i64 - gap as i64
}

fn shifted(timestamp: u64, offset: i64) -> u64 {
    (timestamp as i64 + offset).max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Location, TraceBuilder};
    use uuid::Uuid;

    fn trace() -> Trace {
        TraceBuilder::new(Uuid::new_v4(), Location::observed("h", 1))
            .use_case_start(1, "uc")
            .use_case_end(2, "uc")
            .build()
    }

    #[test]
    fn test_identity_maps_every_event_to_itself() {
        let trace = trace();
        let rewritten = RewrittenTrace::identity(&trace);

        assert_eq!(rewritten.trace, trace);
        assert_eq!(rewritten.origins, vec![Some(0), Some(1)]);
        assert_eq!(
            rewritten.original_event(&trace, 1),
            Some(&trace.events[1])
        );
    }

    #[test]
    fn composed_rewrites_follow_origins_through_both_steps() {
        let trace = trace();
        let first = RewrittenTrace {
            trace: trace.clone(),
            origins: vec![None, Some(1)],
        };
        let second = RewrittenTrace {
            trace: trace.clone(),
            origins: vec![Some(1), Some(0)],
        };

        let composed = first.then(second);
        assert_eq!(composed.origins, vec![Some(1), None]);
    }
}
