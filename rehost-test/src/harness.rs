use anyhow::{Context, Result};
use rehost_core::analysis::{DurationSummary, LatencyResult, OverheadResult};
use rehost_core::{
    Config, ConsistencyChange, ConsistencyChangeAnalysis, ConsistencyIssuesAnalyzer,
    ConsistencyReport, DeploymentModel, DurationChange, DurationChangeAnalysis, FanOutOutcome,
    LatencyAnalyzer, OverheadAnalyzer, SimulationListener, Trace, TraceSimulator,
};
use std::sync::Arc;

/// Runs the what-if analyses of one original/target model pair
pub struct WhatIf {
    config: Config,
    original: Arc<DeploymentModel>,
    target: Arc<DeploymentModel>,
}

impl WhatIf {
    pub fn new(config: Config, original: DeploymentModel, target: DeploymentModel) -> Result<Self> {
        config.validate().context("invalid test configuration")?;
        config.logging.init()?;

        Ok(Self {
            config,
            original: Arc::new(original),
            target: Arc::new(target),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn duration_change(&self, traces: Vec<Trace>) -> Result<FanOutOutcome<DurationChange>> {
        let analysis = DurationChangeAnalysis::from_config(
            Arc::clone(&self.original),
            Arc::clone(&self.target),
            &self.config,
        );
        Ok(analysis.run(traces).await?)
    }

    pub async fn consistency_change(
        &self,
        traces: Vec<Trace>,
    ) -> Result<FanOutOutcome<ConsistencyChange>> {
        let analysis = ConsistencyChangeAnalysis::from_config(
            Arc::clone(&self.original),
            Arc::clone(&self.target),
            &self.config,
        );
        Ok(analysis.run(traces).await?)
    }

    /// Duration changes of every trace, failing on the first broken trace
    pub async fn summarize_durations(&self, traces: Vec<Trace>) -> Result<DurationSummary> {
        let changes = self.duration_change(traces).await?.into_result()?;
        Ok(DurationSummary::from_changes(&changes))
    }
}

/// Replay a trace under the configured simulation mode with every
/// single-trace analyzer attached.
pub fn replay(
    config: &Config,
    model: &DeploymentModel,
    trace: &Trace,
) -> Result<(LatencyResult, OverheadResult, ConsistencyReport)> {
    let mut latency = LatencyAnalyzer::new();
    let mut overhead = OverheadAnalyzer::new();
    let mut consistency = ConsistencyIssuesAnalyzer::new();
    {
        let mut listeners: [&mut dyn SimulationListener; 3] =
            [&mut latency, &mut overhead, &mut consistency];
        TraceSimulator::new(model, config.simulation.mode)
            .simulate(trace, &mut listeners)
            .with_context(|| format!("replay of trace {} failed", trace.id))?;
    }
    Ok((latency.result(), overhead.result(), consistency.into_report()))
}
