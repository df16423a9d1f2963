use super::{shift_gaps, CrossingCost, Placement, RewrittenTrace, TraceRewriter};
use crate::error::Result;
use crate::event::Trace;
use crate::model::DeploymentModel;

/// Replaces the configured latency of every crossing whose connection
/// latency differs between the recorded and the target deployment.
#[derive(Debug, Clone, Copy)]
pub struct LatencyRewriter<'m> {
    original: &'m DeploymentModel,
    target: &'m DeploymentModel,
}

impl<'m> LatencyRewriter<'m> {
    pub fn new(original: &'m DeploymentModel, target: &'m DeploymentModel) -> Self {
        Self { original, target }
    }
}

fn latency(placement: &Placement<'_>) -> CrossingCost {
    let latency = placement.connection.map(|c| c.latency).unwrap_or(0);
    CrossingCost {
        call: latency,
        ret: latency,
    }
}

impl TraceRewriter for LatencyRewriter<'_> {
    fn rewrite(&self, trace: &Trace) -> Result<RewrittenTrace> {
        shift_gaps(trace, self.original, self.target, latency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ViolationKind;
    use crate::event::{Location, TraceBuilder};
    use crate::model::{Connection, ServiceCandidate};
    use uuid::Uuid;

    fn model(latency: u64) -> DeploymentModel {
        DeploymentModel::builder()
            .component("a")
            .component("b")
            .use_case("uc", "a")
            .service_candidate(ServiceCandidate::new("sc", "b"))
            .connection(Connection::remote("a", "b", latency))
            .build()
            .unwrap()
    }

    fn trace() -> Trace {
        TraceBuilder::new(Uuid::new_v4(), Location::observed("h", 1))
            .use_case_start(0, "uc")
            .invocation(100, "sc")
            .entry(120, "sc")
            .exit(200, "sc")
            .ret(215, "sc")
            .use_case_end(300, "uc")
            .build()
    }

    fn timestamps(trace: &Trace) -> Vec<u64> {
        trace.events.iter().map(|e| e.timestamp).collect()
    }

    #[test]
    fn test_same_model_is_identity() {
        let trace = trace();
        let model = model(10);
        let rewritten = LatencyRewriter::new(&model, &model).rewrite(&trace).unwrap();

        assert_eq!(rewritten, RewrittenTrace::identity(&trace));
    }

    #[test]
    fn higher_latency_stretches_gaps_and_shifts_later_events() {
        let rewritten = LatencyRewriter::new(&model(10), &model(50))
            .rewrite(&trace())
            .unwrap();

        // call gap 20 -> 60, return gap 15 -> 55
        assert_eq!(
            timestamps(&rewritten.trace),
            vec![0, 100, 160, 240, 295, 380]
        );
        assert!(rewritten.origins.iter().all(Option::is_some));
    }

    #[test]
    fn lower_latency_never_produces_negative_gaps() {
        let rewritten = LatencyRewriter::new(&model(30), &model(0))
            .rewrite(&trace())
            .unwrap();

        // gaps 20 and 15 both shrink to zero
        assert_eq!(
            timestamps(&rewritten.trace),
            vec![0, 100, 100, 180, 180, 265]
        );
    }

    #[test]
    fn violations_match_the_simulator() {
        let broken = TraceBuilder::new(Uuid::new_v4(), Location::observed("h", 1))
            .use_case_start(0, "uc")
            .invocation(1, "sc")
            .build();
        let model = model(10);
        let err = LatencyRewriter::new(&model, &model)
            .rewrite(&broken)
            .unwrap_err();

        assert_eq!(
            err.kind,
            ViolationKind::MissingEntry {
                candidate: "sc".to_string()
            }
        );
    }
}
