use anyhow::Result;
use rehost_core::analysis::{ConsistencyReport, LatencyResult, OverheadResult};
use rehost_core::rewrite::{LatencyRewriter, TransactionContextRewriter};
use rehost_core::{Config, IssueKind, RewrittenTrace, Trace, TraceRewriter};
use rehost_test::fixtures::{
    extracted_billing, inline_notify, notifying_checkout, remote_refund_checkout, shop_model,
    single_remote_call, worked_example,
};
use rehost_test::harness::replay;
use uuid::Uuid;

#[test]
fn empty_trace_yields_nothing() -> Result<()> {
    for model in [shop_model(), extracted_billing(), worked_example().model] {
        let (latency, overhead, consistency) =
            replay(&Config::default(), &model, &Trace::empty(Uuid::new_v4()))?;

        assert_eq!(latency, LatencyResult::default());
        assert_eq!(overhead, OverheadResult::default());
        assert_eq!(consistency, ConsistencyReport::default());
    }
    Ok(())
}

#[test]
fn rewriting_under_the_recording_model_is_identity() -> Result<()> {
    let model = shop_model();
    for trace in [remote_refund_checkout(), notifying_checkout(), single_remote_call()] {
        let latency = LatencyRewriter::new(&model, &model).rewrite(&trace)?;
        assert_eq!(latency.trace, trace);
        assert_eq!(latency, RewrittenTrace::identity(&trace));

        let context = TransactionContextRewriter::new(&model, &model).rewrite(&trace)?;
        assert_eq!(context.trace, trace);
    }
    Ok(())
}

#[test]
fn latency_is_configured_latency_per_crossing() -> Result<()> {
    let (latency, _, _) = replay(&Config::default(), &shop_model(), &single_remote_call())?;

    // one call and one return over the 20-unit web -> billing connection
    assert_eq!(latency.latency, 2 * 20);
    assert_eq!(latency.duration, 1_000);
    Ok(())
}

#[test]
fn asynchronous_callee_time_is_excluded() -> Result<()> {
    let (_, overhead, _) = replay(&Config::default(), &shop_model(), &notifying_checkout())?;

    assert_eq!(overhead.duration, 1_000 - 500);
    assert_eq!(overhead.overhead, 0);
    assert_eq!(overhead.remote_calls, 1);
    Ok(())
}

#[test]
fn asynchronous_callee_in_the_callers_component_is_excluded() -> Result<()> {
    let (latency, overhead, _) =
        replay(&Config::default(), &inline_notify(), &notifying_checkout())?;

    assert_eq!(overhead.duration, 1_000 - 500);
    assert_eq!(overhead.overhead, 0);
    assert_eq!(overhead.remote_calls, 0);
    assert_eq!(latency.latency, 0);
    assert_eq!(latency.duration, 1_000);
    Ok(())
}

#[test]
fn worked_example_reports_a_single_stale_read() -> Result<()> {
    let example = worked_example();
    let (_, _, report) = replay(&Config::default(), &example.model, &example.trace)?;

    assert_eq!(report.issues.len(), 1);
    let issue = report.issues.iter().next().expect("one issue");
    assert_eq!(issue.kind(), IssueKind::StaleRead);
    assert_eq!(issue.entity(), &example.entity);
    assert_eq!(issue.event(), &example.trace.events[example.stale_read]);

    assert_eq!(report.committed_writes.len(), 1);
    let committed = report.committed_writes.iter().next().expect("one write");
    assert_eq!(committed.entity, example.entity);
    assert_eq!(committed.resolution.timestamp, 900);
    assert!(report.reverted_writes.is_empty());
    Ok(())
}

#[test]
fn basic_mode_skips_entity_access() -> Result<()> {
    let example = worked_example();
    let config: Config = "[simulation]\nmode = \"basic\"".parse()?;
    let (_, _, report) = replay(&config, &example.model, &example.trace)?;

    assert!(report.is_clean());
    assert!(report.committed_writes.is_empty());
    Ok(())
}

#[test]
fn reports_serialize_to_json() -> Result<()> {
    let example = worked_example();
    let (latency, _, report) = replay(&Config::default(), &example.model, &example.trace)?;

    let json = serde_json::to_value(&report)?;
    assert_eq!(json["issues"].as_array().map(Vec::len), Some(1));
    assert_eq!(json["committed_writes"][0]["entity"]["entity_type"], "E");

    let decoded: ConsistencyReport = serde_json::from_value(json)?;
    assert_eq!(decoded, report);
    assert_eq!(serde_json::to_value(latency)?["duration"], 900);
    Ok(())
}
