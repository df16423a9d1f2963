use anyhow::Result;
use rehost_core::{Config, IssueKind};
use rehost_test::fixtures::{
    consolidated_refund, extracted_billing, inline_notify, notifying_checkout, order,
    remote_refund_checkout, rolled_back_checkout, shop_model, single_remote_call,
};
use rehost_test::harness::WhatIf;

fn config() -> Config {
    let mut config = Config::default();
    config.analysis.max_parallel_traces = 2;
    config.rewrite.remote_invocation_overhead = 5;
    config.rewrite.remote_return_overhead = 3;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn extracting_billing_slows_checkout_down() -> Result<()> {
    let what_if = WhatIf::new(config(), shop_model(), extracted_billing())?;
    let trace = rolled_back_checkout();

    let outcome = what_if.duration_change(vec![trace.clone()]).await?;
    let changes = outcome.into_result()?;
    assert_eq!(changes.len(), 1);

    let change = &changes[0];
    assert_eq!(change.trace_id, trace.id);
    assert_eq!(change.original.duration, 60);
    assert_eq!(change.original.remote_calls, 0);
    assert_eq!(change.rewritten.remote_calls, 1);
    assert_eq!(change.rewritten_latency.latency, 40);
    // 20 latency each way plus 5 + 3 overhead
    assert_eq!(change.duration_delta(), 48);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn extracted_charge_commits_on_its_own() -> Result<()> {
    let what_if = WhatIf::new(config(), shop_model(), extracted_billing())?;
    let trace = rolled_back_checkout();

    let changes = what_if.consistency_change(vec![trace.clone()]).await?.into_result()?;
    let change = &changes[0];

    assert!(change.introduced().is_empty());
    assert!(change.resolved().is_empty());

    let committed = change.newly_committed();
    assert_eq!(committed.len(), 1);
    let write = committed.iter().next().expect("one write");
    assert_eq!(write.entity, order("7"));
    // reported against the recorded write event
    assert_eq!(write.write, trace.events[4]);
    assert!(change.original.reverted_writes.iter().any(|w| w.write == trace.events[4]));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn consolidating_refund_introduces_a_stale_read() -> Result<()> {
    let what_if = WhatIf::new(config(), shop_model(), consolidated_refund())?;
    let trace = remote_refund_checkout();

    let changes = what_if.consistency_change(vec![trace.clone()]).await?.into_result()?;
    let change = &changes[0];

    assert!(change.original.is_clean());
    let introduced = change.introduced();
    assert_eq!(introduced.len(), 1);
    let issue = introduced.iter().next().expect("one issue");
    assert_eq!(issue.kind(), IssueKind::StaleRead);
    assert_eq!(issue.event(), &trace.events[6]);
    assert!(change.resolved().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn consolidating_refund_removes_its_remote_cost() -> Result<()> {
    let what_if = WhatIf::new(config(), shop_model(), consolidated_refund())?;
    let traces = vec![single_remote_call(), remote_refund_checkout()];

    let summary = what_if.summarize_durations(traces).await?;

    assert_eq!(summary.traces, 2);
    assert_eq!(summary.original_remote_calls, 2);
    assert_eq!(summary.rewritten_remote_calls, 0);
    assert!(summary.rewritten_duration < summary.original_duration);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn inlining_an_asynchronous_call_keeps_the_waited_time() -> Result<()> {
    let what_if = WhatIf::new(config(), shop_model(), inline_notify())?;

    let changes = what_if
        .duration_change(vec![notifying_checkout()])
        .await?
        .into_result()?;
    let change = &changes[0];

    assert_eq!(change.original.duration, 500);
    assert_eq!(change.rewritten.duration, 500);
    assert_eq!(change.original.remote_calls, 1);
    assert_eq!(change.rewritten.remote_calls, 0);
    assert_eq!(change.duration_delta(), 0);
    Ok(())
}
