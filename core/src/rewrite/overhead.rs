use super::{shift_gaps, CrossingCost, Placement, RewrittenTrace, TraceRewriter};
use crate::error::Result;
use crate::event::Trace;
use crate::model::DeploymentModel;
use serde::{Deserialize, Serialize};

/// Fixed per-call cost of a remote invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverheadProfile {
    pub remote_invocation: u64,
    /// Not charged for asynchronous candidates, whose caller does not wait
    pub remote_return: u64,
}

impl OverheadProfile {
    fn cost(&self, placement: &Placement<'_>) -> CrossingCost {
        match placement.connection {
            Some(connection) if connection.is_remote() => CrossingCost {
                call: self.remote_invocation,
                ret: if placement.candidate.asynchronous {
                    0
                } else {
                    self.remote_return
                },
            },
            _ => CrossingCost::default(),
        }
    }
}

/// Charges or refunds remote-call overhead when a connection's locality or a
/// candidate's asynchrony changes between deployments.
#[derive(Debug, Clone, Copy)]
pub struct OverheadRewriter<'m> {
    original: &'m DeploymentModel,
    target: &'m DeploymentModel,
    profile: OverheadProfile,
}

impl<'m> OverheadRewriter<'m> {
    pub fn new(
        original: &'m DeploymentModel,
        target: &'m DeploymentModel,
        profile: OverheadProfile,
    ) -> Self {
        Self {
            original,
            target,
            profile,
        }
    }
}

impl TraceRewriter for OverheadRewriter<'_> {
    fn rewrite(&self, trace: &Trace) -> Result<RewrittenTrace> {
        shift_gaps(trace, self.original, self.target, |placement| {
            self.profile.cost(placement)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Location, TraceBuilder};
    use crate::model::{Connection, Modification, ServiceCandidate};
    use uuid::Uuid;

    const PROFILE: OverheadProfile = OverheadProfile {
        remote_invocation: 30,
        remote_return: 20,
    };

    fn local_model() -> DeploymentModel {
        DeploymentModel::builder()
            .component("a")
            .component("b")
            .use_case("uc", "a")
            .service_candidate(ServiceCandidate::new("sc", "b"))
            .connection(Connection::local("a", "b"))
            .build()
            .unwrap()
    }

    fn remote_model() -> DeploymentModel {
        local_model()
            .apply_modifications(&[Modification::SetConnection {
                connection: Connection::remote("a", "b", 0),
            }])
            .unwrap()
    }

    fn trace() -> Trace {
        TraceBuilder::new(Uuid::new_v4(), Location::observed("h", 1))
            .use_case_start(0, "uc")
            .invocation(10, "sc")
            .entry(11, "sc")
            .exit(50, "sc")
            .ret(51, "sc")
            .use_case_end(60, "uc")
            .build()
    }

    fn timestamps(trace: &Trace) -> Vec<u64> {
        trace.events.iter().map(|e| e.timestamp).collect()
    }

    #[test]
    fn test_going_remote_adds_overhead() {
        let rewritten = OverheadRewriter::new(&local_model(), &remote_model(), PROFILE)
            .rewrite(&trace())
            .unwrap();

        assert_eq!(timestamps(&rewritten.trace), vec![0, 10, 41, 80, 101, 110]);
    }

    #[test]
    fn going_local_removes_overhead() {
        let recorded = TraceBuilder::new(Uuid::new_v4(), Location::observed("h", 1))
            .use_case_start(0, "uc")
            .invocation(10, "sc")
            .entry(45, "sc")
            .exit(80, "sc")
            .ret(105, "sc")
            .use_case_end(110, "uc")
            .build();
        let rewritten = OverheadRewriter::new(&remote_model(), &local_model(), PROFILE)
            .rewrite(&recorded)
            .unwrap();

        assert_eq!(timestamps(&rewritten.trace), vec![0, 10, 15, 50, 55, 60]);
    }

    #[test]
    fn asynchronous_candidates_pay_no_return_overhead() {
        let asynchronous = |model: DeploymentModel| {
            model
                .apply_modifications(&[Modification::SetAsynchronous {
                    candidate: "sc".to_string(),
                    asynchronous: true,
                }])
                .unwrap()
        };
        let rewritten = OverheadRewriter::new(
            &asynchronous(local_model()),
            &asynchronous(remote_model()),
            PROFILE,
        )
        .rewrite(&trace())
        .unwrap();

        assert_eq!(timestamps(&rewritten.trace), vec![0, 10, 41, 80, 81, 90]);
    }

    #[test]
    fn unchanged_deployment_is_identity() {
        let trace = trace();
        let model = remote_model();
        let rewritten = OverheadRewriter::new(&model, &model, PROFILE)
            .rewrite(&trace)
            .unwrap();

        assert_eq!(rewritten, RewrittenTrace::identity(&trace));
    }
}
