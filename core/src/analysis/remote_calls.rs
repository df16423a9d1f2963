use crate::error::Result;
use crate::event::{MonitoringEvent, Timestamp, Trace};
use crate::issue::ConsistencyIssue;
use crate::model::DeploymentModel;
use crate::simulator::{
    ComponentReturn, ComponentTransition, ServiceCall, ServiceReturn, SimulationListener,
    SimulationMode, TraceSimulator, WriteFate,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCall {
    pub candidate: String,
    pub caller: String,
    pub callee: String,
    pub invoked_at: Timestamp,
    pub latency: u64,
    pub asynchronous: bool,
}

/// Lists every call that crosses a remote connection, in trace order
#[derive(Debug, Default)]
pub struct RemoteCallsAnalyzer {
    calls: Vec<RemoteCall>,
}

impl RemoteCallsAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[RemoteCall] {
        &self.calls
    }

    pub fn into_calls(self) -> Vec<RemoteCall> {
        self.calls
    }

    pub fn analyze(model: &DeploymentModel, trace: &Trace) -> Result<Vec<RemoteCall>> {
        let mut analyzer = Self::new();
        TraceSimulator::new(model, SimulationMode::Basic).simulate_with(trace, &mut analyzer)?;
        Ok(analyzer.into_calls())
    }
}

impl SimulationListener for RemoteCallsAnalyzer {
    fn use_case_started(&mut self, _event: &MonitoringEvent) {}

    fn use_case_ended(&mut self, _event: &MonitoringEvent) {}

    fn service_candidate_invoked(&mut self, _call: &ServiceCall<'_>) {}

    fn service_candidate_returned(&mut self, _ret: &ServiceReturn<'_>) {}

    fn before_component_transition(&mut self, transition: &ComponentTransition<'_>) {
        if !transition.connection.is_remote() {
            return;
        }
        self.calls.push(RemoteCall {
            candidate: transition.candidate.name.clone(),
            caller: transition.caller.to_string(),
            callee: transition.callee.to_string(),
            invoked_at: transition.invocation.timestamp,
            latency: transition.connection.latency,
            asynchronous: transition.candidate.asynchronous,
        });
    }

    fn after_component_transition(&mut self, _transition: &ComponentTransition<'_>) {}

    fn before_component_return(&mut self, _ret: &ComponentReturn<'_>) {}

    fn after_component_return(&mut self, _ret: &ComponentReturn<'_>) {}

    fn read_write_conflict(&mut self, _issue: &ConsistencyIssue, _at: usize) {}

    fn write_write_conflict(&mut self, _issue: &ConsistencyIssue, _at: usize) {}

    fn cross_component_access(&mut self, _issue: &ConsistencyIssue, _at: usize) {}

    fn interleaved_write(&mut self, _issue: &ConsistencyIssue, _at: usize) {}

    fn committed_write(&mut self, _fate: &WriteFate<'_>) {}

    fn propagated_write(&mut self, _fate: &WriteFate<'_>) {}

    fn reverted_write(&mut self, _fate: &WriteFate<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Location, TraceBuilder};
    use crate::model::{Connection, ServiceCandidate};
    use uuid::Uuid;

    #[test]
    fn test_only_remote_crossings_are_listed() {
        let model = DeploymentModel::builder()
            .component("web")
            .component("billing")
            .component("audit")
            .use_case("checkout", "web")
            .service_candidate(ServiceCandidate::new("charge", "billing"))
            .service_candidate(ServiceCandidate::new("record", "audit").asynchronous())
            .connection(Connection::remote("web", "billing", 40))
            .connection(Connection::local("billing", "audit"))
            .build()
            .unwrap();
        let trace = TraceBuilder::new(Uuid::new_v4(), Location::observed("h", 1))
            .use_case_start(0, "checkout")
            .invocation(10, "charge")
            .entry(12, "charge")
            .invocation(20, "record")
            .entry(20, "record")
            .exit(21, "record")
            .ret(21, "record")
            .exit(30, "charge")
            .ret(31, "charge")
            .use_case_end(40, "checkout")
            .build();

        let calls = RemoteCallsAnalyzer::analyze(&model, &trace).unwrap();

        assert_eq!(
            calls,
            vec![RemoteCall {
                candidate: "charge".to_string(),
                caller: "web".to_string(),
                callee: "billing".to_string(),
                invoked_at: 10,
                latency: 40,
                asynchronous: false,
            }]
        );
    }
}
