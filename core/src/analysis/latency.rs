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
pub struct LatencyResult {
    /// Sum of outermost use-case spans
    pub duration: u64,
    /// Configured connection latency summed over every call and return crossing
    pub latency: u64,
}

impl LatencyResult {
    pub fn latency_fraction(&self) -> f64 {
        if self.duration == 0 {
            0.0
        } else {
            self.latency as f64 / self.duration as f64
        }
    }
}

/// Attributes the model's connection latency to every component crossing.
#[derive(Debug, Default)]
pub struct LatencyAnalyzer {
    open_use_cases: Vec<Timestamp>,
    result: LatencyResult,
}

impl LatencyAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn result(&self) -> LatencyResult {
        self.result
    }

    pub fn analyze(model: &DeploymentModel, trace: &Trace) -> Result<LatencyResult> {
        let mut analyzer = Self::new();
        TraceSimulator::new(model, SimulationMode::Basic).simulate_with(trace, &mut analyzer)?;
        Ok(analyzer.result())
    }
}

impl SimulationListener for LatencyAnalyzer {
    fn use_case_started(&mut self, event: &MonitoringEvent) {
        self.open_use_cases.push(event.timestamp);
    }

    fn use_case_ended(&mut self, event: &MonitoringEvent) {
        if let Some(start) = self.open_use_cases.pop() {
            if self.open_use_cases.is_empty() {
                self.result.duration += event.timestamp.saturating_sub(start);
            }
        }
    }

    fn service_candidate_invoked(&mut self, _call: &ServiceCall<'_>) {}

    fn service_candidate_returned(&mut self, _ret: &ServiceReturn<'_>) {}

    fn before_component_transition(&mut self, transition: &ComponentTransition<'_>) {
        self.result.latency += transition.connection.latency;
    }

    fn after_component_transition(&mut self, _transition: &ComponentTransition<'_>) {}

    fn before_component_return(&mut self, ret: &ComponentReturn<'_>) {
        self.result.latency += ret.call.connection.latency;
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
