use crate::error::Result;
use crate::event::{Entity, MonitoringEvent, Trace};
use crate::issue::{ConsistencyIssue, IssueKind};
use crate::model::DeploymentModel;
use crate::rewrite::RewrittenTrace;
use crate::simulator::{
    ComponentReturn, ComponentTransition, ServiceCall, ServiceReturn, SimulationListener,
    SimulationMode, TraceSimulator, WriteFate,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A write together with the event that settled it
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WriteRecord {
    pub entity: Entity,
    pub write: MonitoringEvent,
    pub resolution: MonitoringEvent,
    pub transaction_id: Option<String>,
}


#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub issues: BTreeSet<ConsistencyIssue>,
    pub committed_writes: BTreeSet<WriteRecord>,
    pub reverted_writes: BTreeSet<WriteRecord>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = &ConsistencyIssue> {
        self.issues.iter().filter(move |issue| issue.kind() == kind)
    }
}

/// Events of a rewritten trace resolved to the recorded events they came from
#[derive(Debug, Clone, Copy)]
struct RecordedOrigins<'r> {
    rewritten: &'r RewrittenTrace,
    recorded: &'r Trace,
}

/// Collects every consistency issue and final write fate of one replay
#[derive(Debug, Default)]
pub struct ConsistencyIssuesAnalyzer<'r> {
    report: ConsistencyReport,
    origins: Option<RecordedOrigins<'r>>,
}

impl<'r> ConsistencyIssuesAnalyzer<'r> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyzer for a replay of `rewritten` that reports every finding
    /// against the event of `recorded` it derives from. Events inserted by
    /// the rewrite have no recorded counterpart and are reported as they are.
    pub fn recorded_as(rewritten: &'r RewrittenTrace, recorded: &'r Trace) -> Self {
        Self {
            report: ConsistencyReport::default(),
            origins: Some(RecordedOrigins {
                rewritten,
                recorded,
            }),
        }
    }

    pub fn report(&self) -> &ConsistencyReport {
        &self.report
    }

    pub fn into_report(self) -> ConsistencyReport {
        self.report
    }

    pub fn analyze(model: &DeploymentModel, trace: &Trace) -> Result<ConsistencyReport> {
        let mut analyzer = Self::new();
        TraceSimulator::new(model, SimulationMode::WithEntityAccess)
            .simulate_with(trace, &mut analyzer)?;
        Ok(analyzer.into_report())
    }

    /// Replay a rewritten trace and report against the recorded one
    pub fn analyze_rewritten(
        model: &DeploymentModel,
        rewritten: &RewrittenTrace,
        recorded: &Trace,
    ) -> Result<ConsistencyReport> {
        let mut analyzer = ConsistencyIssuesAnalyzer::recorded_as(rewritten, recorded);
        TraceSimulator::new(model, SimulationMode::WithEntityAccess)
            .simulate_with(&rewritten.trace, &mut analyzer)?;
        Ok(analyzer.into_report())
    }

    fn resolve(&self, event: &MonitoringEvent, at: usize) -> MonitoringEvent {
        self.origins
            .and_then(|o| o.rewritten.original_event(o.recorded, at))
            .unwrap_or(event)
            .clone()
    }

    fn record(&mut self, issue: &ConsistencyIssue, at: usize) {
        let issue = issue.with_event(self.resolve(issue.event(), at));
        self.report.issues.insert(issue);
    }

    fn write_record(&self, fate: &WriteFate<'_>) -> WriteRecord {
        WriteRecord {
            entity: fate.entity.clone(),
            write: self.resolve(fate.write, fate.write_index),
            resolution: self.resolve(fate.resolution, fate.resolution_index),
            transaction_id: fate.transaction_id.map(str::to_string),
        }
    }
}

impl SimulationListener for ConsistencyIssuesAnalyzer<'_> {
    fn use_case_started(&mut self, _event: &MonitoringEvent) {}

    fn use_case_ended(&mut self, _event: &MonitoringEvent) {}

    fn service_candidate_invoked(&mut self, _call: &ServiceCall<'_>) {}

    fn service_candidate_returned(&mut self, _ret: &ServiceReturn<'_>) {}

    fn before_component_transition(&mut self, _transition: &ComponentTransition<'_>) {}

    fn after_component_transition(&mut self, _transition: &ComponentTransition<'_>) {}

    fn before_component_return(&mut self, _ret: &ComponentReturn<'_>) {}

    fn after_component_return(&mut self, _ret: &ComponentReturn<'_>) {}

    fn read_write_conflict(&mut self, issue: &ConsistencyIssue, at: usize) {
        self.record(issue, at);
    }

    fn write_write_conflict(&mut self, issue: &ConsistencyIssue, at: usize) {
        self.record(issue, at);
    }

    fn cross_component_access(&mut self, issue: &ConsistencyIssue, at: usize) {
        self.record(issue, at);
    }

    fn interleaved_write(&mut self, issue: &ConsistencyIssue, at: usize) {
        self.record(issue, at);
    }

    fn committed_write(&mut self, fate: &WriteFate<'_>) {
        let record = self.write_record(fate);
        self.report.committed_writes.insert(record);
    }

    // Still pending in the parent; settled by the outermost commit or abort
    fn propagated_write(&mut self, _fate: &WriteFate<'_>) {}

    fn reverted_write(&mut self, fate: &WriteFate<'_>) {
        let record = self.write_record(fate);
        self.report.reverted_writes.insert(record);
    }
}
