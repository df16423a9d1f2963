use super::{
    ConsistencyIssuesAnalyzer, ConsistencyReport, LatencyAnalyzer, LatencyResult,
    OverheadAnalyzer, OverheadResult, WriteRecord,
};
use crate::config::Config;
use crate::error::{AnalysisError, Result};
use crate::event::Trace;
use crate::fanout::{run_per_trace, FanOutOutcome};
use crate::issue::ConsistencyIssue;
use crate::model::DeploymentModel;
use crate::rewrite::{
    LatencyRewriter, OverheadProfile, OverheadRewriter, TraceRewriter, TransactionContextRewriter,
};
use crate::simulator::{SimulationListener, SimulationMode, TraceSimulator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// Timing of one trace before and after the deployment change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationChange {
    pub trace_id: Uuid,
    pub original: OverheadResult,
    pub rewritten: OverheadResult,
    pub original_latency: LatencyResult,
    pub rewritten_latency: LatencyResult,
}

impl DurationChange {
    pub fn duration_delta(&self) -> i64 {
        self.rewritten.duration as i64 - self.original.duration as i64
    }
}

/// Totals over every trace of a duration-change run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DurationSummary {
    pub traces: usize,
    pub original_duration: u64,
    pub rewritten_duration: u64,
    pub original_remote_calls: usize,
    pub rewritten_remote_calls: usize,
}

impl DurationSummary {
    pub fn from_changes<'a>(changes: impl IntoIterator<Item = &'a DurationChange>) -> Self {
        changes
            .into_iter()
            .fold(Self::default(), |mut summary, change| {
                summary.traces += 1;
                summary.original_duration += change.original.duration;
                summary.rewritten_duration += change.rewritten.duration;
                summary.original_remote_calls += change.original.remote_calls;
                summary.rewritten_remote_calls += change.rewritten.remote_calls;
                summary
            })
    }
}

/// Predicts how use-case durations change under the target deployment
#[derive(Debug, Clone)]
pub struct DurationChangeAnalysis {
    original: Arc<DeploymentModel>,
    target: Arc<DeploymentModel>,
    profile: OverheadProfile,
    max_parallel: usize,
}

impl DurationChangeAnalysis {
    pub fn new(
        original: Arc<DeploymentModel>,
        target: Arc<DeploymentModel>,
        profile: OverheadProfile,
        max_parallel: usize,
    ) -> Self {
        Self {
            original,
            target,
            profile,
            max_parallel,
        }
    }

    pub fn from_config(
        original: Arc<DeploymentModel>,
        target: Arc<DeploymentModel>,
        config: &Config,
    ) -> Self {
        Self::new(
            original,
            target,
            config.rewrite.overhead_profile(),
            config.analysis.max_parallel_traces,
        )
    }

    /// Rewrite and measure a single trace
    pub fn analyze_trace(
        original: &DeploymentModel,
        target: &DeploymentModel,
        profile: OverheadProfile,
        trace: &Trace,
    ) -> Result<DurationChange> {
        let latency = LatencyRewriter::new(original, target).rewrite(trace)?;
        let overhead = OverheadRewriter::new(original, target, profile).rewrite(&latency.trace)?;
        let rewritten = latency.then(overhead);

        let (original_latency, original_overhead) = measure(original, trace)?;
        let (rewritten_latency, rewritten_overhead) = measure(target, &rewritten.trace)?;

        Ok(DurationChange {
            trace_id: trace.id,
            original: original_overhead,
            rewritten: rewritten_overhead,
            original_latency,
            rewritten_latency,
        })
    }

    pub async fn run(
        &self,
        traces: Vec<Trace>,
    ) -> Result<FanOutOutcome<DurationChange>, AnalysisError> {
        let original = Arc::clone(&self.original);
        let target = Arc::clone(&self.target);
        let profile = self.profile;

        tracing::info!("Running duration change analysis over {} trace(s)", traces.len());
        run_per_trace(traces, self.max_parallel, move |trace| {
            Self::analyze_trace(&original, &target, profile, trace)
        })
        .await
    }
}

/// Latency and overhead of one trace in a single replay
fn measure(model: &DeploymentModel, trace: &Trace) -> Result<(LatencyResult, OverheadResult)> {
    let mut latency = LatencyAnalyzer::new();
    let mut overhead = OverheadAnalyzer::new();
    {
        let mut listeners: [&mut dyn SimulationListener; 2] = [&mut latency, &mut overhead];
        TraceSimulator::new(model, SimulationMode::Basic).simulate(trace, &mut listeners)?;
    }
    Ok((latency.result(), overhead.result()))
}

/// Consistency of one trace before and after the deployment change.
///
/// Issues and write records of the rewritten replay are reported against the
/// recorded events they derive from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyChange {
    pub trace_id: Uuid,
    pub original: ConsistencyReport,
    pub rewritten: ConsistencyReport,
}

impl ConsistencyChange {
    /// Issues only the target deployment has
    pub fn introduced(&self) -> BTreeSet<ConsistencyIssue> {
        self.rewritten
            .issues
            .difference(&self.original.issues)
            .cloned()
            .collect()
    }

    /// Issues the target deployment no longer has
    pub fn resolved(&self) -> BTreeSet<ConsistencyIssue> {
        self.original
            .issues
            .difference(&self.rewritten.issues)
            .cloned()
            .collect()
    }

    /// Writes that were rolled back before but now survive
    pub fn newly_committed(&self) -> BTreeSet<&WriteRecord> {
        let before: BTreeSet<_> = self.original.committed_writes.iter().map(|w| &w.write).collect();
        self.rewritten
            .committed_writes
            .iter()
            .filter(|w| !before.contains(&w.write))
            .collect()
    }

    /// Writes that survived before but are now rolled back
    pub fn newly_reverted(&self) -> BTreeSet<&WriteRecord> {
        let before: BTreeSet<_> = self.original.reverted_writes.iter().map(|w| &w.write).collect();
        self.rewritten
            .reverted_writes
            .iter()
            .filter(|w| !before.contains(&w.write))
            .collect()
    }

    pub fn is_unchanged(&self) -> bool {
        self.original == self.rewritten
    }
}

/// Predicts consistency issues introduced or resolved by the target deployment
#[derive(Debug, Clone)]
pub struct ConsistencyChangeAnalysis {
    original: Arc<DeploymentModel>,
    target: Arc<DeploymentModel>,
    max_parallel: usize,
}

impl ConsistencyChangeAnalysis {
    pub fn new(
        original: Arc<DeploymentModel>,
        target: Arc<DeploymentModel>,
        max_parallel: usize,
    ) -> Self {
        Self {
            original,
            target,
            max_parallel,
        }
    }

    pub fn from_config(
        original: Arc<DeploymentModel>,
        target: Arc<DeploymentModel>,
        config: &Config,
    ) -> Self {
        Self::new(original, target, config.analysis.max_parallel_traces)
    }

    pub fn analyze_trace(
        original: &DeploymentModel,
        target: &DeploymentModel,
        trace: &Trace,
    ) -> Result<ConsistencyChange> {
        let before = ConsistencyIssuesAnalyzer::analyze(original, trace)?;
        let rewritten = TransactionContextRewriter::new(original, target).rewrite(trace)?;
        let after = ConsistencyIssuesAnalyzer::analyze_rewritten(target, &rewritten, trace)?;

        Ok(ConsistencyChange {
            trace_id: trace.id,
            original: before,
            rewritten: after,
        })
    }

    pub async fn run(
        &self,
        traces: Vec<Trace>,
    ) -> Result<FanOutOutcome<ConsistencyChange>, AnalysisError> {
        let original = Arc::clone(&self.original);
        let target = Arc::clone(&self.target);

        tracing::info!("Running consistency change analysis over {} trace(s)", traces.len());
        run_per_trace(traces, self.max_parallel, move |trace| {
            Self::analyze_trace(&original, &target, trace)
        })
        .await
    }
}
