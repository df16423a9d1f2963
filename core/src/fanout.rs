use crate::error::{AnalysisError, FanOutError, ProtocolViolation, TaskFailure};
use crate::event::Trace;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TaskOutcome<T> {
    pub trace_id: Uuid,
    pub result: Result<T, ProtocolViolation>,
}

/// Per-trace results in the order the traces were submitted
#[derive(Debug, Clone)]
pub struct FanOutOutcome<T> {
    outcomes: Vec<TaskOutcome<T>>,
}

impl<T> FanOutOutcome<T> {
    pub fn outcomes(&self) -> &[TaskOutcome<T>] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.result.is_ok())
    }

    pub fn get(&self, trace_id: Uuid) -> Option<&Result<T, ProtocolViolation>> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.trace_id == trace_id)
            .map(|outcome| &outcome.result)
    }

    pub fn successes(&self) -> impl Iterator<Item = (Uuid, &T)> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().ok().map(|v| (outcome.trace_id, v)))
    }

    pub fn failures(&self) -> impl Iterator<Item = TaskFailure> + '_ {
        self.outcomes.iter().filter_map(|outcome| {
            outcome.result.as_ref().err().map(|violation| TaskFailure {
                trace_id: outcome.trace_id,
                violation: violation.clone(),
            })
        })
    }

    /// The aggregated failure, if any task failed
    pub fn failure(&self) -> Option<FanOutError> {
        let mut failures = self.failures();
        let primary = failures.next()?;
        Some(FanOutError {
            primary,
            suppressed: failures.collect(),
        })
    }

    /// All results, or the aggregated failure
    pub fn into_result(self) -> Result<Vec<T>, FanOutError> {
        if let Some(failure) = self.failure() {
            return Err(failure);
        }
        Ok(self
            .outcomes
            .into_iter()
            .filter_map(|outcome| outcome.result.ok())
            .collect())
    }
}

/// Run `task` once per trace on the blocking pool with at most `max_parallel`
/// tasks in flight.
///
/// Every task runs to completion. Failures are reported together once all
/// tasks are joined, the first in trace order as primary. A task panicking, or
/// being cancelled, interrupts the whole run.
pub async fn run_per_trace<T, F>(
    traces: Vec<Trace>,
    max_parallel: usize,
    task: F,
) -> Result<FanOutOutcome<T>, AnalysisError>
where
    T: Send + 'static,
    F: Fn(&Trace) -> Result<T, ProtocolViolation> + Send + Sync + 'static,
{
    let task = Arc::new(task);
    let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));
    let total = traces.len();
    let mut tasks = JoinSet::new();

    tracing::debug!(
        "Fanning out {} trace task(s), at most {} at a time",
        total,
        max_parallel.max(1)
    );

    for (index, trace) in traces.into_iter().enumerate() {
        let permit = Arc::clone(&semaphore).acquire_owned().await?;
        let task = Arc::clone(&task);
        tasks.spawn_blocking(move || {
            let _permit = permit;
            let result = task(&trace);
            (index, trace.id, result)
        });
    }

    let mut slots: Vec<Option<TaskOutcome<T>>> = (0..total).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        let (index, trace_id, result) = joined?;
        if let Err(violation) = &result {
            tracing::warn!("Trace {} failed: {}", trace_id, violation);
        }
        slots[index] = Some(TaskOutcome { trace_id, result });
    }

    Ok(FanOutOutcome {
        outcomes: slots.into_iter().flatten().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ViolationKind;
    use crate::event::{Location, TraceBuilder};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn traces(n: usize) -> Vec<Trace> {
        (0..n)
            .map(|i| {
                TraceBuilder::new(Uuid::new_v4(), Location::observed("h", 1))
                    .use_case_start(i as u64, "uc")
                    .build()
            })
            .collect()
    }

    fn fail(trace: &Trace) -> ProtocolViolation {
        ProtocolViolation::new(&trace.events[0], ViolationKind::NoActiveUseCase)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_results_keep_trace_order() {
        let input = traces(16);
        let ids: Vec<_> = input.iter().map(|t| t.id).collect();

        let outcome = run_per_trace(input, 4, |trace| {
            // later traces finish first
            let delay = 16 - trace.events[0].timestamp;
            std::thread::sleep(Duration::from_millis(delay));
            Ok(trace.events[0].timestamp)
        })
        .await
        .unwrap();

        assert!(outcome.is_success());
        assert_eq!(
            outcome.outcomes().iter().map(|o| o.trace_id).collect::<Vec<_>>(),
            ids
        );
        assert_eq!(outcome.into_result().unwrap(), (0..16).collect::<Vec<u64>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failures_are_aggregated_after_all_tasks_ran() {
        let input = traces(10);
        let ids: Vec<_> = input.iter().map(|t| t.id).collect();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);

        let outcome = run_per_trace(input, 3, move |trace| {
            counter.fetch_add(1, Ordering::SeqCst);
            match trace.events[0].timestamp {
                2 | 5 | 7 => Err(fail(trace)),
                ts => Ok(ts),
            }
        })
        .await
        .unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 10);
        assert_eq!(outcome.successes().count(), 7);
        assert!(outcome.get(ids[3]).map(|r| r.is_ok()).unwrap_or(false));

        let failure = outcome.failure().unwrap();
        assert_eq!(failure.failure_count(), 3);
        assert_eq!(failure.primary.trace_id, ids[2]);
        assert_eq!(
            failure.suppressed.iter().map(|f| f.trace_id).collect::<Vec<_>>(),
            vec![ids[5], ids[7]]
        );
        assert!(failure.to_string().starts_with("3 trace task(s) failed"));
        assert!(outcome.into_result().is_err());
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));

        run_per_trace(traces(12), 2, move |_| {
            let now = a.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            a.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn no_traces_no_tasks() {
        let outcome = run_per_trace(Vec::new(), 4, |_| Ok(())).await.unwrap();
        assert!(outcome.is_empty());
        assert!(outcome.failure().is_none());
    }

    #[tokio::test]
    async fn panicking_task_interrupts_the_run() {
        let result = run_per_trace(traces(3), 2, |trace| {
            if trace.events[0].timestamp == 1 {
                panic!("task blew up");
            }
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(AnalysisError::Interrupted(_))));
    }
}
