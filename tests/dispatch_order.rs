// tests/dispatch_order.rs

use std::error::Error;
use std::sync::Arc;

use tokio::sync::mpsc;

use taskmill::config::{ConfigLoader, Generation, OptionBag};
use taskmill::queue::{
    DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY, PendingJob, QueueManager, clamp_priority,
    priority_from_options,
};
use taskmill_test_utils::builders::{ConfigDocBuilder, TaskBuilder};
use taskmill_test_utils::fake_worker::HeldWorker;
use taskmill_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

/// Publish a generation from `sections` with its state root in `dir`.
fn generation_with(dir: &tempfile::TempDir, sections: &str) -> Arc<Generation> {
    let root = dir.path().join("state");
    let text = ConfigDocBuilder::new()
        .state_root(root.to_str().expect("utf-8 temp path"))
        .raw(sections)
        .build();
    let mut loader = ConfigLoader::new("in-memory.toml");
    let status = loader.load_str(&text);
    assert!(status.ok, "setup config rejected: {:?}", status.errors());
    loader.handle().current().expect("generation published")
}

#[test]
fn clamp_keeps_priorities_in_range() {
    assert_eq!(clamp_priority(0), MIN_PRIORITY);
    assert_eq!(clamp_priority(-7), MIN_PRIORITY);
    assert_eq!(clamp_priority(1), 1);
    assert_eq!(clamp_priority(5), 5);
    assert_eq!(clamp_priority(9), 9);
    assert_eq!(clamp_priority(10), MAX_PRIORITY);
    assert_eq!(clamp_priority(9999), MAX_PRIORITY);
}

#[test]
fn priority_reads_from_the_option_bundle() {
    let prio = |value: Option<toml::Value>| {
        let mut bag = OptionBag::new();
        if let Some(v) = value {
            bag.push("priority", v);
        }
        priority_from_options(&bag)
    };

    assert_eq!(prio(None), DEFAULT_PRIORITY);
    assert_eq!(prio(Some(toml::Value::Integer(7))), 7);
    assert_eq!(prio(Some(toml::Value::Integer(42))), MAX_PRIORITY);
    assert_eq!(prio(Some(toml::Value::String(" 2 ".to_string()))), 2);
    assert_eq!(
        prio(Some(toml::Value::String("high".to_string()))),
        DEFAULT_PRIORITY
    );
    assert_eq!(prio(Some(toml::Value::Boolean(true))), DEFAULT_PRIORITY);
}

#[test]
fn later_priority_declarations_win() {
    let mut bag = OptionBag::new();
    bag.push("priority", toml::Value::Integer(9));
    bag.push("priority", toml::Value::Integer(1));
    assert_eq!(priority_from_options(&bag), 1);
}

#[test]
fn pending_job_snapshots_priority_at_creation() {
    let task = TaskBuilder::cmd("snap", "solo", "run").build();
    let mut bag = OptionBag::new();
    bag.push("priority", toml::Value::Integer(12));

    let job = PendingJob::new(7, task, bag);
    assert_eq!(job.id, 7);
    assert_eq!(job.priority, MAX_PRIORITY);
}

/// Jobs enqueued 9,3,3,1 while the only slot is busy must dispatch
/// 1,3,3,9, with the two priority-3 jobs in arrival order.
#[tokio::test]
async fn lower_priority_value_dispatches_first_with_fifo_ties() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let generation = generation_with(&dir, "[queue.solo]\nconcurrency = 1\n");

    let worker = Arc::new(HeldWorker::new());
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let manager = QueueManager::new(worker.clone(), events_tx);
    manager.apply(&generation);

    let blocker = TaskBuilder::cmd("blocker", "solo", "hold").build();
    manager.enqueue_task(&blocker)?;
    worker.wait_for_start("blocker").await;

    let late = TaskBuilder::cmd("late", "solo", "run").priority(9).build();
    let mid_first = TaskBuilder::cmd("mid-first", "solo", "run")
        .priority(3)
        .build();
    let mid_second = TaskBuilder::cmd("mid-second", "solo", "run")
        .priority(3)
        .build();
    let urgent = TaskBuilder::cmd("urgent", "solo", "run").priority(1).build();
    for task in [&late, &mid_first, &mid_second, &urgent] {
        manager.enqueue_task(task)?;
    }

    // Free the slot and walk the queue down one release at a time.
    worker.release("blocker");
    for name in ["urgent", "mid-first", "mid-second", "late"] {
        worker.wait_for_start(name).await;
        worker.release(name);
    }

    assert_eq!(
        worker.started_tasks(),
        ["blocker", "urgent", "mid-first", "mid-second", "late"]
    );

    manager.shutdown().await;
    Ok(())
}

/// Without the priority option every job is a 5; dispatch is pure FIFO.
#[tokio::test]
async fn equal_priorities_dispatch_in_arrival_order() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let generation = generation_with(&dir, "[queue.solo]\nconcurrency = 1\n");

    let worker = Arc::new(HeldWorker::new());
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let manager = QueueManager::new(worker.clone(), events_tx);
    manager.apply(&generation);

    let blocker = TaskBuilder::cmd("blocker", "solo", "hold").build();
    manager.enqueue_task(&blocker)?;
    worker.wait_for_start("blocker").await;

    for name in ["first", "second", "third"] {
        let task = TaskBuilder::cmd(name, "solo", "run").build();
        manager.enqueue_task(&task)?;
    }

    worker.release("blocker");
    for name in ["first", "second", "third"] {
        worker.wait_for_start(name).await;
        worker.release(name);
    }

    assert_eq!(
        worker.started_tasks(),
        ["blocker", "first", "second", "third"]
    );

    manager.shutdown().await;
    Ok(())
}

/// Out-of-range declared priorities still land inside the clamp range
/// when they reach dispatch.
#[tokio::test]
async fn clamped_priorities_order_dispatch() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let generation = generation_with(&dir, "[queue.solo]\nconcurrency = 1\n");

    let worker = Arc::new(HeldWorker::new());
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let manager = QueueManager::new(worker.clone(), events_tx);
    manager.apply(&generation);

    let blocker = TaskBuilder::cmd("blocker", "solo", "hold").build();
    manager.enqueue_task(&blocker)?;
    worker.wait_for_start("blocker").await;

    // 99 clamps to 9, 0 clamps to 1.
    let overflowing = TaskBuilder::cmd("overflowing", "solo", "run")
        .priority(99)
        .build();
    let underflowing = TaskBuilder::cmd("underflowing", "solo", "run")
        .priority(0)
        .build();
    manager.enqueue_task(&overflowing)?;
    manager.enqueue_task(&underflowing)?;

    worker.release("blocker");
    for name in ["underflowing", "overflowing"] {
        worker.wait_for_start(name).await;
        worker.release(name);
    }

    assert_eq!(
        worker.started_tasks(),
        ["blocker", "underflowing", "overflowing"]
    );

    manager.shutdown().await;
    Ok(())
}
