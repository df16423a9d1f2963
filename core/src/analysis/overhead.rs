use crate::error::Result;
use crate::event::{MonitoringEvent, Timestamp, Trace};
use crate::issue::ConsistencyIssue;
use crate::model::DeploymentModel;
use crate::simulator::{
    ComponentReturn, ComponentTransition, ServiceCall, ServiceReturn, SimulationListener,
    SimulationMode, TraceSimulator, WriteFate,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverheadResult {
    /// Use-case time the caller actually waited, asynchronous spans excluded
    pub duration: u64,
    /// Measured invocation->entry and exit->return gaps of synchronous crossings
    pub overhead: u64,
    pub remote_calls: usize,
}

impl OverheadResult {
    pub fn overhead_fraction(&self) -> f64 {
        if self.duration == 0 {
            0.0
        } else {
            self.overhead as f64 / self.duration as f64
        }
    }
}

/// Measures call overhead from the trace's own timestamps.
///
/// Asynchronous invocations are tracked on a secondary stack keyed by their
/// invocation event. Everything between the outermost asynchronous invocation
/// and its return is removed from the duration and never counted as overhead.
#[derive(Debug, Default)]
pub struct OverheadAnalyzer {
    open_use_cases: Vec<Timestamp>,
    asynchronous: Vec<MonitoringEvent>,
    use_case_time: u64,
    excluded: u64,
    overhead: u64,
    remote_calls: usize,
}

impl OverheadAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn result(&self) -> OverheadResult {
        OverheadResult {
            duration: self.use_case_time.saturating_sub(self.excluded),
            overhead: self.overhead,
            remote_calls: self.remote_calls,
        }
    }

    pub fn analyze(model: &DeploymentModel, trace: &Trace) -> Result<OverheadResult> {
        let mut analyzer = Self::new();
        TraceSimulator::new(model, SimulationMode::Basic).simulate_with(trace, &mut analyzer)?;
        Ok(analyzer.result())
    }
}

impl SimulationListener for OverheadAnalyzer {
    fn use_case_started(&mut self, event: &MonitoringEvent) {
        self.open_use_cases.push(event.timestamp);
    }

    fn use_case_ended(&mut self, event: &MonitoringEvent) {
        if let Some(start) = self.open_use_cases.pop() {
            if self.open_use_cases.is_empty() {
                self.use_case_time += event.timestamp.saturating_sub(start);
            }
        }
    }

    fn service_candidate_invoked(&mut self, call: &ServiceCall<'_>) {
        if call.candidate.asynchronous {
            self.asynchronous.push(call.invocation.clone());
        }
    }

    fn service_candidate_returned(&mut self, ret: &ServiceReturn<'_>) {
        let invocation = ret.call.invocation;
        if ret.call.candidate.asynchronous && self.asynchronous.last() == Some(invocation) {
            self.asynchronous.pop();
            if self.asynchronous.is_empty() {
                self.excluded += ret.ret.timestamp.saturating_sub(invocation.timestamp);
            }
        }
    }

    fn before_component_transition(&mut self, transition: &ComponentTransition<'_>) {
        if transition.connection.is_remote() {
            self.remote_calls += 1;
        }
        if self.asynchronous.is_empty() {
            self.overhead += transition
                .entry
                .timestamp
                .saturating_sub(transition.invocation.timestamp);
        }
    }

    fn after_component_transition(&mut self, _transition: &ComponentTransition<'_>) {}

    fn before_component_return(&mut self, ret: &ComponentReturn<'_>) {
        if self.asynchronous.is_empty() {
            self.overhead += ret.ret.timestamp.saturating_sub(ret.exit.timestamp);
        }
    }

    fn after_component_return(&mut self, _ret: &ComponentReturn<'_>) {}

    fn read_write_conflict(&mut self, _issue: &ConsistencyIssue, _at: usize) {}

    fn write_write_conflict(&mut self, _issue: &ConsistencyIssue, _at: usize) {}

    fn cross_component_access(&mut self, _issue: &ConsistencyIssue, _at: usize) {}

    fn interleaved_write(&mut self, _issue: &ConsistencyIssue, _at: usize) {}

    fn committed_write(&mut self, _fate: &WriteFate<'_>) {}

    fn propagated_write(&mut self, _fate: &WriteFate<'_>) {}

    fn reverted_write(&mut self, _fate: &WriteFate<'_>) {}
}
