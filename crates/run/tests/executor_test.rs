// Integration tests for the queued executor and worker pool
//
// These tests drive the executors with in-process runners so scheduling
// behavior can be observed without spawning compilers.
//
// Run with: cargo test -p kubecc-run --test executor_test

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use kubecc_core::{Component, Contexts, QueueStatus, ServerContext, Toolchain, UsageLimits};
use kubecc_run::toolchain::sleep::SleepRunner;
use kubecc_run::{Executor, QueuedExecutor, RunResult, Runner, Task, TaskOutput};
use parking_lot::Mutex;

/// Records when it starts and finishes
struct RecordingRunner {
    label: &'static str,
    duration: Duration,
    events: Arc<Mutex<Vec<(&'static str, &'static str, Instant)>>>,
}

#[async_trait]
impl Runner for RecordingRunner {
    async fn run(&self, _ctx: &Contexts, _tc: &Toolchain) -> RunResult<TaskOutput> {
        self.events.lock().push((self.label, "start", Instant::now()));
        tokio::time::sleep(self.duration).await;
        self.events.lock().push((self.label, "end", Instant::now()));
        Ok(TaskOutput::default())
    }
}

fn limits(n: i32) -> UsageLimits {
    UsageLimits::new(n)
        .with_queue_pressure_multiplier(1.0)
        .with_queue_reject_multiplier(2.0)
}

fn sleep_task(server: &ServerContext, ms: u64) -> Arc<Task> {
    Arc::new(Task::new(
        Contexts::for_request(server),
        Toolchain::default(),
        SleepRunner::new(Duration::from_millis(ms)),
    ))
}

#[test_log::test(tokio::test)]
async fn test_tasks_start_in_exec_order() {
    let server = ServerContext::new(Component::Test);
    let executor = QueuedExecutor::new(limits(64));
    executor.apply_usage_limits(limits(64)).await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let labels = [
        "t00", "t01", "t02", "t03", "t04", "t05", "t06", "t07", "t08", "t09", "t10", "t11",
        "t12", "t13", "t14", "t15",
    ];
    let tasks: Vec<Arc<Task>> = labels
        .iter()
        .map(|&label| {
            Arc::new(Task::new(
                Contexts::for_request(&server),
                Toolchain::default(),
                RecordingRunner {
                    label,
                    duration: Duration::from_millis(5),
                    events: events.clone(),
                },
            ))
        })
        .collect();

    // join_all polls in order, so exec is entered in order.
    let results = join_all(tasks.iter().map(|task| executor.exec(task.clone()))).await;
    assert!(results.iter().all(|r| r.is_ok()));

    let started: Vec<&str> = events
        .lock()
        .iter()
        .filter(|(_, kind, _)| *kind == "start")
        .map(|(label, _, _)| *label)
        .collect();
    assert_eq!(started, labels.to_vec());
}

#[tokio::test]
async fn test_single_slot_runs_tasks_back_to_back() {
    let server = ServerContext::new(Component::Test);
    let executor = QueuedExecutor::new(limits(1));
    executor.apply_usage_limits(limits(1)).await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let task = |label, ms| {
        Arc::new(Task::new(
            Contexts::for_request(&server),
            Toolchain::default(),
            RecordingRunner {
                label,
                duration: Duration::from_millis(ms),
                events: events.clone(),
            },
        ))
    };
    let a = task("a", 100);
    let b = task("b", 10);

    let begin = Instant::now();
    let (ra, rb) = tokio::join!(executor.exec(a), executor.exec(b));
    let elapsed = begin.elapsed();
    assert!(ra.is_ok() && rb.is_ok());

    let events = events.lock().clone();
    let order: Vec<(&str, &str)> = events.iter().map(|(l, k, _)| (*l, *k)).collect();
    assert_eq!(
        order,
        vec![("a", "start"), ("a", "end"), ("b", "start"), ("b", "end")]
    );
    assert!(elapsed >= Duration::from_millis(110), "took {elapsed:?}");
    assert!(elapsed < Duration::from_millis(300), "took {elapsed:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resize_during_exec_keeps_every_task() {
    let server = ServerContext::new(Component::Test);
    let executor = Arc::new(QueuedExecutor::new(limits(2)));

    let mut handles = Vec::new();
    for i in 0..60 {
        let executor = executor.clone();
        let task = sleep_task(&server, 2 + (i % 5));
        handles.push(tokio::spawn(async move { executor.exec(task).await }));
    }

    let resizer = {
        let executor = executor.clone();
        tokio::spawn(async move {
            for n in [5, 1, 8, 1, 3, 12, 2, 6] {
                executor.set_usage_limits(limits(n));
                tokio::time::sleep(Duration::from_millis(3)).await;
            }
        })
    };
    resizer.await.unwrap();
    // The last spawned resize asked for 6; settle explicitly on 4.
    executor.apply_usage_limits(limits(4)).await;

    let results = tokio::time::timeout(Duration::from_secs(10), join_all(handles))
        .await
        .expect("resizing must not deadlock in-flight execs");
    for result in results {
        assert!(result.unwrap().is_ok());
    }

    assert_eq!(executor.worker_count().await, 4);
    assert_eq!(executor.live_workers(), 4);
    assert_eq!(executor.num_running(), 0);
    assert_eq!(executor.num_queued(), 0);
}

#[tokio::test]
async fn test_status_reports_backlog() {
    let server = ServerContext::new(Component::Test);
    let executor = Arc::new(QueuedExecutor::new(limits(1)));
    executor.apply_usage_limits(limits(1)).await;
    assert_eq!(executor.status(), QueueStatus::Available);

    let mut handles = Vec::new();
    for _ in 0..3 {
        let executor = executor.clone();
        let task = sleep_task(&server, 200);
        handles.push(tokio::spawn(async move { executor.exec(task).await }));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    // One running, two queued: 2 >= 1 * 2.0
    assert_eq!(executor.num_running(), 1);
    assert_eq!(executor.num_queued(), 2);
    assert_eq!(executor.status(), QueueStatus::QueueFull);

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    assert_eq!(executor.status(), QueueStatus::Available);
}
