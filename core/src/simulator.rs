use crate::cursor::EventCursor;
use crate::error::{ProtocolViolation, Result, ViolationKind};
use crate::event::{Entity, EventKind, MonitoringEvent, Timestamp, Trace};
use crate::issue::ConsistencyIssue;
use crate::model::{ConflictPolicy, Connection, DeploymentModel, ServiceCandidate};
use crate::transaction::{PendingWrite, TransactionTree};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationMode {
    /// Call structure, transactions and component transitions only
    Basic,
    /// Additionally detect entity access conflicts
    #[default]
    WithEntityAccess,
}

/// A service candidate call, whether or not it leaves the caller's component
#[derive(Debug, Clone, Copy)]
pub struct ServiceCall<'a> {
    pub candidate: &'a ServiceCandidate,
    pub caller: &'a str,
    pub callee: &'a str,
    pub invocation: &'a MonitoringEvent,
    pub entry: &'a MonitoringEvent,
}

/// The return path of a [`ServiceCall`]
#[derive(Debug, Clone, Copy)]
pub struct ServiceReturn<'a> {
    pub call: ServiceCall<'a>,
    pub exit: &'a MonitoringEvent,
    pub ret: &'a MonitoringEvent,
}

/// A call crossing from the caller's component into another component
#[derive(Debug, Clone, Copy)]
pub struct ComponentTransition<'a> {
    pub candidate: &'a ServiceCandidate,
    pub caller: &'a str,
    pub callee: &'a str,
    pub connection: &'a Connection,
    pub invocation: &'a MonitoringEvent,
    pub entry: &'a MonitoringEvent,
}

/// The return path of a [`ComponentTransition`]
#[derive(Debug, Clone, Copy)]
pub struct ComponentReturn<'a> {
    pub call: ComponentTransition<'a>,
    pub exit: &'a MonitoringEvent,
    pub ret: &'a MonitoringEvent,
}

/// Final (or provisional) fate of one entity write
#[derive(Debug, Clone, Copy)]
pub struct WriteFate<'a> {
    pub entity: &'a Entity,
    pub write: &'a MonitoringEvent,
    pub write_index: usize,
    /// Event that decided the fate: a commit, an abort, or the write itself
    pub resolution: &'a MonitoringEvent,
    pub resolution_index: usize,
    pub transaction_id: Option<&'a str>,
}

/// Callbacks delivered by [`TraceSimulator`]. There are no default methods:
/// every listener states what it does with each callback.
///
/// Issue callbacks carry `at`, the position of the triggering event in the
/// replayed trace.
pub trait SimulationListener {
    fn use_case_started(&mut self, event: &MonitoringEvent);

    fn use_case_ended(&mut self, event: &MonitoringEvent);

    /// Every invocation, fired before any transition callback
    fn service_candidate_invoked(&mut self, call: &ServiceCall<'_>);

    /// Every return, fired after any return callback
    fn service_candidate_returned(&mut self, ret: &ServiceReturn<'_>);

    fn before_component_transition(&mut self, transition: &ComponentTransition<'_>);

    fn after_component_transition(&mut self, transition: &ComponentTransition<'_>);

    fn before_component_return(&mut self, ret: &ComponentReturn<'_>);

    fn after_component_return(&mut self, ret: &ComponentReturn<'_>);

    fn read_write_conflict(&mut self, issue: &ConsistencyIssue, at: usize);

    fn write_write_conflict(&mut self, issue: &ConsistencyIssue, at: usize);

    fn cross_component_access(&mut self, issue: &ConsistencyIssue, at: usize);

    fn interleaved_write(&mut self, issue: &ConsistencyIssue, at: usize);

    /// The write is final: its outermost transaction committed
    fn committed_write(&mut self, fate: &WriteFate<'_>);

    /// The write moved to the parent transaction on a nested commit
    fn propagated_write(&mut self, fate: &WriteFate<'_>);

    /// The write was rolled back, by an abort or by a write-write conflict
    fn reverted_write(&mut self, fate: &WriteFate<'_>);
}

#[derive(Debug, Clone, Copy)]
struct Frame<'m, 't> {
    candidate: &'m ServiceCandidate,
    caller: &'m str,
    callee: &'m str,
    connection: Option<&'m Connection>,
    invocation: &'t MonitoringEvent,
    entry: &'t MonitoringEvent,
    serial: u64,
}

impl<'m, 't> Frame<'m, 't> {
    fn call(&self) -> ServiceCall<'_> {
        ServiceCall {
            candidate: self.candidate,
            caller: self.caller,
            callee: self.callee,
            invocation: self.invocation,
            entry: self.entry,
        }
    }

    fn transition(&self) -> Option<ComponentTransition<'_>> {
        self.connection.map(|connection| ComponentTransition {
            candidate: self.candidate,
            caller: self.caller,
            callee: self.callee,
            connection,
            invocation: self.invocation,
            entry: self.entry,
        })
    }
}

#[derive(Default)]
struct ReplayState<'m, 't> {
    frames: Vec<Frame<'m, 't>>,
    use_cases: Vec<&'m str>,
    transactions: TransactionTree,
    last_timestamp: Option<Timestamp>,
    next_serial: u64,
}

impl<'m, 't> ReplayState<'m, 't> {
    fn current_component(&self) -> Option<&'m str> {
        self.frames
            .last()
            .map(|frame| frame.callee)
            .or_else(|| self.use_cases.last().copied())
    }

    fn current_branch(&self) -> u64 {
        self.frames.last().map(|frame| frame.serial).unwrap_or(0)
    }

    fn branch_active(&self, branch: u64) -> bool {
        branch == 0 || self.frames.iter().any(|frame| frame.serial == branch)
    }

    fn advance_clock(&mut self, event: &MonitoringEvent) -> Result<()> {
        if let Some(previous) = self.last_timestamp {
            if event.timestamp < previous {
                return Err(ProtocolViolation::new(
                    event,
                    ViolationKind::TimestampRegression { previous },
                ));
            }
        }
        self.last_timestamp = Some(event.timestamp);
        Ok(())
    }
}

type Listeners<'l> = [&'l mut dyn SimulationListener];

fn notify<F>(listeners: &mut Listeners<'_>, mut callback: F)
where
    F: FnMut(&mut dyn SimulationListener),
{
    for listener in listeners.iter_mut() {
        callback(&mut **listener);
    }
}

/// Deterministic interpreter of one trace under one model.
///
/// Keeps a call stack of active invocations to know which component is
/// executing, and a [`TransactionTree`] binding locations to transactions.
/// Everything it learns is delivered to listeners in trace order.
#[derive(Debug, Clone, Copy)]
pub struct TraceSimulator<'m> {
    model: &'m DeploymentModel,
    mode: SimulationMode,
}

impl<'m> TraceSimulator<'m> {
    pub fn new(model: &'m DeploymentModel, mode: SimulationMode) -> Self {
        Self { model, mode }
    }

    pub fn mode(&self) -> SimulationMode {
        self.mode
    }

    /// Replay the trace with a single listener
    pub fn simulate_with(&self, trace: &Trace, listener: &mut dyn SimulationListener) -> Result<()> {
        self.simulate(trace, &mut [listener])
    }

    /// Replay the trace, delivering callbacks to every listener in order.
    ///
    /// Stops at the first protocol violation; callbacks already delivered stay delivered.
    pub fn simulate(&self, trace: &Trace, listeners: &mut Listeners<'_>) -> Result<()> {
        let mut state = ReplayState::default();
        let mut cursor = EventCursor::new(&trace.events);

        while let Some(event) = cursor.lookahead(0) {
            let index = cursor.position();
            state.advance_clock(event)?;

            match &event.kind {
                EventKind::UseCaseStart { use_case } => {
                    let component = self.model.use_case_component(use_case).ok_or_else(|| {
                        ProtocolViolation::new(
                            event,
                            ViolationKind::UnallocatedUseCase {
                                use_case: use_case.clone(),
                            },
                        )
                    })?;
                    state.use_cases.push(component);
                    notify(listeners, |l| l.use_case_started(event));
                }
                EventKind::UseCaseEnd { .. } => {
                    state.use_cases.pop();
                    notify(listeners, |l| l.use_case_ended(event));
                }
                EventKind::ServiceCandidateInvocation { candidate } => {
                    let entry = cursor
                        .lookahead(1)
                        .filter(|next| {
                            matches!(&next.kind, EventKind::ServiceCandidateEntry { candidate: c } if c == candidate)
                        })
                        .ok_or_else(|| {
                            ProtocolViolation::new(
                                event,
                                ViolationKind::MissingEntry {
                                    candidate: candidate.clone(),
                                },
                            )
                        })?;
                    state.advance_clock(entry)?;
                    self.enter(&mut state, candidate, event, entry, listeners)?;
                    cursor.consume();
                }
                EventKind::ServiceCandidateExit { candidate } => {
                    let ret = cursor
                        .lookahead(1)
                        .filter(|next| {
                            matches!(&next.kind, EventKind::ServiceCandidateReturn { candidate: c } if c == candidate)
                        })
                        .ok_or_else(|| {
                            ProtocolViolation::new(
                                event,
                                ViolationKind::MissingReturn {
                                    candidate: candidate.clone(),
                                },
                            )
                        })?;
                    state.advance_clock(ret)?;
                    self.leave(&mut state, candidate, event, ret, listeners)?;
                    cursor.consume();
                }
                EventKind::ServiceCandidateEntry { candidate }
                | EventKind::ServiceCandidateReturn { candidate } => {
                    return Err(ProtocolViolation::new(
                        event,
                        ViolationKind::UnpairedEvent {
                            candidate: candidate.clone(),
                        },
                    ));
                }
                EventKind::TransactionStart { transaction_id, .. } => {
                    if state.transactions.is_bound(&event.location, transaction_id) {
                        return Err(ProtocolViolation::new(
                            event,
                            ViolationKind::DuplicateTransaction {
                                transaction_id: transaction_id.clone(),
                            },
                        ));
                    }
                    state.transactions.begin(transaction_id, &event.location);
                }
                EventKind::TransactionCommit { transaction_id, .. } => {
                    self.finish(&mut state, transaction_id, event, index, true, listeners)?;
                }
                EventKind::TransactionAbort { transaction_id, .. } => {
                    self.finish(&mut state, transaction_id, event, index, false, listeners)?;
                }
                EventKind::EntityRead { entity } => {
                    if self.mode == SimulationMode::WithEntityAccess {
                        self.read(&state, entity, event, index, listeners)?;
                    }
                }
                EventKind::EntityWrite { entity } => {
                    if self.mode == SimulationMode::WithEntityAccess {
                        self.write(&mut state, entity, event, index, listeners)?;
                    }
                }
            }

            cursor.consume();
        }

        if !state.frames.is_empty() {
            tracing::warn!(
                "Trace {} ended with {} open service candidate invocation(s)",
                trace.id,
                state.frames.len()
            );
        }
        for (location, transaction_id) in state.transactions.open_bindings() {
            tracing::warn!(
                "Trace {} ended with transaction {} still bound on {}",
                trace.id,
                transaction_id,
                location
            );
        }

        Ok(())
    }

    fn enter<'t>(
        &self,
        state: &mut ReplayState<'m, 't>,
        name: &str,
        invocation: &'t MonitoringEvent,
        entry: &'t MonitoringEvent,
        listeners: &mut Listeners<'_>,
    ) -> Result<()> {
        let caller = state
            .current_component()
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

        state.next_serial += 1;
        let mut frame = Frame {
            candidate,
            caller,
            callee,
            connection: None,
            invocation,
            entry,
            serial: state.next_serial,
        };

        if caller == callee {
            notify(listeners, |l| l.service_candidate_invoked(&frame.call()));
            state.frames.push(frame);
            return Ok(());
        }

        let connection = self.model.connection(caller, callee).ok_or_else(|| {
            ProtocolViolation::new(
                invocation,
                ViolationKind::MissingConnection {
                    from: caller.to_string(),
                    to: callee.to_string(),
                },
            )
        })?;
        frame.connection = Some(connection);

        tracing::debug!(
            "Component transition {} -> {} via {} at t={}",
            caller,
            callee,
            name,
            invocation.timestamp
        );

        notify(listeners, |l| l.service_candidate_invoked(&frame.call()));
        if let Some(transition) = frame.transition() {
            notify(listeners, |l| l.before_component_transition(&transition));
            state.frames.push(frame);
            notify(listeners, |l| l.after_component_transition(&transition));
        }
        Ok(())
    }

    fn leave<'t>(
        &self,
        state: &mut ReplayState<'m, 't>,
        name: &str,
        exit: &'t MonitoringEvent,
        ret: &'t MonitoringEvent,
        listeners: &mut Listeners<'_>,
    ) -> Result<()> {
        let frame = match state.frames.last() {
            Some(frame) if frame.candidate.name == name => *frame,
            other => {
                return Err(ProtocolViolation::new(
                    exit,
                    ViolationKind::UnbalancedExit {
                        candidate: name.to_string(),
                        active: other.map(|frame| frame.candidate.name.clone()),
                    },
                ))
            }
        };

        match frame.transition() {
            Some(call) => {
                let component_return = ComponentReturn { call, exit, ret };
                notify(listeners, |l| l.before_component_return(&component_return));
                state.frames.pop();
                notify(listeners, |l| l.after_component_return(&component_return));
            }
            None => {
                state.frames.pop();
            }
        }
        let service_return = ServiceReturn {
            call: frame.call(),
            exit,
            ret,
        };
        notify(listeners, |l| l.service_candidate_returned(&service_return));
        Ok(())
    }

    fn finish(
        &self,
        state: &mut ReplayState<'m, '_>,
        transaction_id: &str,
        event: &MonitoringEvent,
        index: usize,
        commit: bool,
        listeners: &mut Listeners<'_>,
    ) -> Result<()> {
        let bound = state
            .transactions
            .bound(&event.location)
            .ok_or_else(|| ProtocolViolation::new(event, ViolationKind::NoBoundTransaction))?;
        let bound_id = state.transactions.id(bound);
        if bound_id != transaction_id {
            return Err(ProtocolViolation::new(
                event,
                ViolationKind::TransactionMismatch {
                    bound: bound_id.to_string(),
                    found: transaction_id.to_string(),
                },
            ));
        }

        let completed = if commit {
            state.transactions.commit(&event.location)
        } else {
            state.transactions.abort(&event.location)
        };
        let Some(completed) = completed else {
            return Ok(());
        };
        if self.mode == SimulationMode::Basic {
            return Ok(());
        }

        for (entity, write) in &completed.writes {
            let fate = WriteFate {
                entity,
                write: &write.event,
                write_index: write.index,
                resolution: event,
                resolution_index: index,
                transaction_id: Some(completed.transaction_id.as_str()),
            };
            match (commit, &completed.merged_into) {
                (true, Some(_)) => notify(listeners, |l| l.propagated_write(&fate)),
                (true, None) => notify(listeners, |l| l.committed_write(&fate)),
                (false, _) => notify(listeners, |l| l.reverted_write(&fate)),
            }
        }
        Ok(())
    }

    fn read(
        &self,
        state: &ReplayState<'m, '_>,
        entity: &Entity,
        event: &MonitoringEvent,
        index: usize,
        listeners: &mut Listeners<'_>,
    ) -> Result<()> {
        self.check_ownership(state, entity, event, index, listeners)?;

        let Some(tx) = state.transactions.bound(&event.location) else {
            return Ok(());
        };
        if state.transactions.conflicting_ancestor(tx, entity).is_none() {
            return Ok(());
        }

        let issue = match self.model.conflict_policy(&entity.entity_type) {
            Some(ConflictPolicy::StaleRead) => ConsistencyIssue::StaleRead {
                entity: entity.clone(),
                event: event.clone(),
            },
            _ => ConsistencyIssue::PotentialDeadlock {
                entity: entity.clone(),
                event: event.clone(),
            },
        };
        tracing::debug!("Read-write conflict: {}", issue);
        notify(listeners, |l| l.read_write_conflict(&issue, index));
        Ok(())
    }

    fn write(
        &self,
        state: &mut ReplayState<'m, '_>,
        entity: &Entity,
        event: &MonitoringEvent,
        index: usize,
        listeners: &mut Listeners<'_>,
    ) -> Result<()> {
        self.check_ownership(state, entity, event, index, listeners)?;

        let Some(tx) = state.transactions.bound(&event.location) else {
            // Outside any transaction a write takes effect immediately
            let fate = WriteFate {
                entity,
                write: event,
                write_index: index,
                resolution: event,
                resolution_index: index,
                transaction_id: None,
            };
            notify(listeners, |l| l.committed_write(&fate));
            return Ok(());
        };

        if state.transactions.conflicting_ancestor(tx, entity).is_some() {
            let issue = ConsistencyIssue::WriteConflict {
                entity: entity.clone(),
                event: event.clone(),
            };
            tracing::debug!("Write-write conflict: {}", issue);
            notify(listeners, |l| l.write_write_conflict(&issue, index));

            let fate = WriteFate {
                entity,
                write: event,
                write_index: index,
                resolution: event,
                resolution_index: index,
                transaction_id: Some(state.transactions.id(tx)),
            };
            notify(listeners, |l| l.reverted_write(&fate));
            return Ok(());
        }

        let branch = state.current_branch();
        if let Some(previous) = state.transactions.pending_write(tx, entity) {
            if previous.branch != branch && !state.branch_active(previous.branch) {
                let issue = ConsistencyIssue::InterleavedWrite {
                    entity: entity.clone(),
                    event: event.clone(),
                };
                notify(listeners, |l| l.interleaved_write(&issue, index));
            }
        }

        state.transactions.register_write(
            tx,
            entity.clone(),
            PendingWrite {
                event: event.clone(),
                index,
                branch,
            },
        );
        Ok(())
    }

    fn check_ownership(
        &self,
        state: &ReplayState<'m, '_>,
        entity: &Entity,
        event: &MonitoringEvent,
        index: usize,
        listeners: &mut Listeners<'_>,
    ) -> Result<()> {
        let entity_type = self
            .model
            .entity_type(&entity.entity_type)
            .ok_or_else(|| {
                ProtocolViolation::new(
                    event,
                    ViolationKind::UnknownEntityType {
                        entity_type: entity.entity_type.clone(),
                    },
                )
            })?;

        if let (Some(owner), Some(current)) =
            (entity_type.component.as_deref(), state.current_component())
        {
            if owner != current {
                let issue = ConsistencyIssue::CrossComponentAccess {
                    entity: entity.clone(),
                    event: event.clone(),
                    accessing_component: current.to_string(),
                    owning_component: owner.to_string(),
                };
                notify(listeners, |l| l.cross_component_access(&issue, index));
            }
        }
        Ok(())
    }
}
