// tests/reload_behaviour.rs

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;

use taskmill::config::{ConfigLoader, SourceMonitor};
use taskmill::queue::{DispatchEvent, QueueManager};
use taskmill_test_utils::builders::{ConfigDocBuilder, TaskBuilder};
use taskmill_test_utils::fake_worker::HeldWorker;
use taskmill_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

/// Write a config document into `dir`, state root included, and return
/// its path.
fn write_config(dir: &tempfile::TempDir, sections: &str) -> PathBuf {
    let root = dir.path().join("state");
    let text = ConfigDocBuilder::new()
        .state_root(root.to_str().expect("utf-8 temp path"))
        .raw(sections)
        .build();
    let path = dir.path().join("Taskmill.toml");
    fs::write(&path, text).expect("write config");
    path
}

#[test]
fn monitor_reports_edits_deletions_and_reappearance() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = write_config(&dir, "[queue.batch]\nconcurrency = 1\n");

    let mut monitor = SourceMonitor::attach(&path);
    assert!(!monitor.scan()?);

    write_config(&dir, "[queue.batch]\nconcurrency = 2\n");
    assert!(monitor.scan()?);
    assert!(!monitor.scan()?);

    // Rewriting identical content is not a change.
    write_config(&dir, "[queue.batch]\nconcurrency = 2\n");
    assert!(!monitor.scan()?);

    fs::remove_file(&path)?;
    assert!(monitor.scan()?);
    assert!(!monitor.scan()?);

    write_config(&dir, "[queue.batch]\nconcurrency = 2\n");
    assert!(monitor.scan()?);
    Ok(())
}

#[test]
fn poll_is_quiet_when_nothing_changed() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = write_config(
        &dir,
        "[queue.batch]\nconcurrency = 1\n\n[task.report]\nqueue = \"batch\"\ncmd = \"run\"\n",
    );

    let mut loader = ConfigLoader::new(&path);
    assert!(loader.load().ok);
    let mut monitor = SourceMonitor::attach(loader.path());

    let status = loader.poll(&mut monitor);
    assert!(status.ok);
    assert!(!status.updated);
    assert!(!status.parsed);
    assert!(!status.failed);

    let generation = loader.handle().current().expect("generation");
    assert_eq!(generation.seq, 1);
    Ok(())
}

#[test]
fn poll_reloads_after_an_edit() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = write_config(
        &dir,
        "[queue.batch]\nconcurrency = 1\n\n[task.report]\nqueue = \"batch\"\ncmd = \"run\"\n",
    );

    let mut loader = ConfigLoader::new(&path);
    assert!(loader.load().ok);
    let mut monitor = SourceMonitor::attach(loader.path());

    write_config(
        &dir,
        "[queue.batch]\nconcurrency = 1\n\n[task.digest]\nqueue = \"batch\"\ncmd = \"digest\"\n",
    );

    let status = loader.poll(&mut monitor);
    assert!(status.updated, "got: {:?}", status.errors());

    let generation = loader.handle().current().expect("generation");
    assert_eq!(generation.seq, 2);
    assert_eq!(generation.task_names(), ["digest"]);
    Ok(())
}

#[test]
fn poll_keeps_the_generation_after_a_bad_edit() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = write_config(
        &dir,
        "[queue.batch]\nconcurrency = 1\n\n[task.report]\nqueue = \"batch\"\ncmd = \"run\"\n",
    );

    let mut loader = ConfigLoader::new(&path);
    assert!(loader.load().ok);
    let mut monitor = SourceMonitor::attach(loader.path());

    fs::write(&path, "not = [valid")?;
    let status = loader.poll(&mut monitor);

    assert!(status.failed);
    assert!(!status.updated);
    // Still operable on the previous generation.
    assert!(status.ok);

    let generation = loader.handle().current().expect("generation");
    assert_eq!(generation.seq, 1);
    assert_eq!(generation.task_names(), ["report"]);
    Ok(())
}

/// Re-applying an unchanged generation leaves the running loops alone,
/// waiting lists included.
#[tokio::test]
async fn apply_keeps_unchanged_queues_alive() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = write_config(&dir, "[queue.batch]\nconcurrency = 1\n");

    let mut loader = ConfigLoader::new(&path);
    assert!(loader.load().ok);
    let generation = loader.handle().current().expect("generation");

    let worker = Arc::new(HeldWorker::new());
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let manager = QueueManager::new(worker.clone(), events_tx);
    manager.apply(&generation);

    let blocker = TaskBuilder::cmd("blocker", "batch", "hold").build();
    manager.enqueue_task(&blocker)?;
    worker.wait_for_start("blocker").await;

    let waiting = TaskBuilder::cmd("waiting", "batch", "run").build();
    manager.enqueue_task(&waiting)?;

    manager.apply(&generation);

    // The waiting job survived the re-apply and runs once freed.
    worker.release("blocker");
    worker.wait_for_start("waiting").await;
    worker.release("waiting");
    event_succeeded(&mut events_rx, "waiting").await;

    manager.shutdown().await;
    Ok(())
}

/// A changed definition re-creates the loop (dropping its waiting list);
/// a removed queue stops outright.
#[tokio::test]
async fn apply_recreates_changed_queues_and_stops_removed_ones() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = write_config(
        &dir,
        "[queue.batch]\nconcurrency = 1\n\n[queue.extra]\nconcurrency = 1\n",
    );

    let mut loader = ConfigLoader::new(&path);
    assert!(loader.load().ok);
    let first = loader.handle().current().expect("generation");

    let worker = Arc::new(HeldWorker::new());
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let manager = QueueManager::new(worker.clone(), events_tx);
    manager.apply(&first);
    assert!(manager.is_running("batch"));
    assert!(manager.is_running("extra"));

    let blocker = TaskBuilder::cmd("blocker", "batch", "hold").build();
    manager.enqueue_task(&blocker)?;
    worker.wait_for_start("blocker").await;
    let victim = TaskBuilder::cmd("victim", "batch", "run").build();
    manager.enqueue_task(&victim)?;

    // Widen batch, drop extra.
    write_config(&dir, "[queue.batch]\nconcurrency = 2\n");
    let status = loader.load();
    assert!(status.updated, "got: {:?}", status.errors());
    let second = loader.handle().current().expect("generation");
    manager.apply(&second);

    assert!(!manager.is_running("extra"));
    let stray = TaskBuilder::cmd("stray", "extra", "run").build();
    assert!(manager.enqueue_task(&stray).is_err());

    // The re-created batch runs two jobs at once.
    for name in ["parallel-one", "parallel-two"] {
        let task = TaskBuilder::cmd(name, "batch", "run").build();
        manager.enqueue_task(&task)?;
    }
    worker.wait_for_start("parallel-one").await;
    worker.wait_for_start("parallel-two").await;

    // The old loop's waiting list went with it.
    sleep(Duration::from_millis(50)).await;
    assert!(!worker.started_tasks().iter().any(|t| t == "victim"));

    worker.release("parallel-one");
    worker.release("parallel-two");
    // The held blocker belongs to the old loop; its completion goes
    // nowhere and is dropped quietly.
    worker.release("blocker");

    manager.shutdown().await;
    Ok(())
}

async fn event_succeeded(rx: &mut mpsc::UnboundedReceiver<DispatchEvent>, name: &str) {
    with_timeout(async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if matches!(&event, DispatchEvent::JobSucceeded { task, .. } if task == name) {
                return;
            }
        }
    })
    .await
}
