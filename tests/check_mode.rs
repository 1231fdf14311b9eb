// tests/check_mode.rs

//! The `--check` and `--dry-run` entry points: validate and report, never
//! start the daemon loop.

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use taskmill::cli::CliArgs;
use taskmill_test_utils::builders::ConfigDocBuilder;
use taskmill_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

/// Write `sections` as a config document inside `dir`, state root included.
fn write_config(dir: &tempfile::TempDir, sections: &str) -> PathBuf {
    let root = dir.path().join("state");
    let text = ConfigDocBuilder::new()
        .state_root(root.to_str().expect("utf-8 temp path"))
        .raw(sections)
        .build();
    let path = dir.path().join("Taskmill.toml");
    fs::write(&path, text).expect("config written");
    path
}

fn args_for(path: &PathBuf) -> CliArgs {
    CliArgs {
        config: path.display().to_string(),
        check: false,
        dry_run: false,
        poll_interval: 10,
        log_level: None,
    }
}

#[tokio::test]
async fn check_mode_accepts_a_valid_document() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = write_config(
        &dir,
        "[queue.batch]\nconcurrency = 1\n\n\
         [task.digest]\nqueue = \"batch\"\ncmd = \"run-digest\"\n",
    );

    let mut args = args_for(&path);
    args.check = true;
    taskmill::run(args).await?;
    Ok(())
}

#[tokio::test]
async fn check_mode_rejects_a_broken_document() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = write_config(&dir, "[task.orphan]\ncmd = \"run\"\n");

    let mut args = args_for(&path);
    args.check = true;
    let err = taskmill::run(args).await.expect_err("invalid config");
    let message = err.to_string();
    assert!(message.contains("configuration invalid"), "got: {message}");
    assert!(message.contains("orphan"), "got: {message}");
    Ok(())
}

#[tokio::test]
async fn check_mode_reports_an_unreadable_file() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("missing.toml");

    let mut args = args_for(&path);
    args.check = true;
    let err = taskmill::run(args).await.expect_err("missing config");
    assert!(err.to_string().contains("configuration invalid"));
    Ok(())
}

#[tokio::test]
async fn startup_refuses_a_broken_document() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = write_config(&dir, "[task.orphan]\ncmd = \"run\"\n");

    // Without --check a bad document still stops startup before any
    // queue is created.
    let args = args_for(&path);
    let err = taskmill::run(args).await.expect_err("invalid config");
    assert!(err.to_string().contains("configuration invalid"));
    Ok(())
}

#[tokio::test]
async fn dry_run_prints_the_catalog_and_exits() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = write_config(
        &dir,
        "[queue.batch]\nconcurrency = 2\nonerror = \"alert\"\n\n\
         [task.extract]\nqueue = \"batch\"\ncmd = \"extract-step\"\n\
         schedule = { cron = [\"0 2 * * *\"] }\nchain = [{ task = \"load\" }]\n\n\
         [task.load]\nqueue = \"batch\"\ncmd = \"load-step\"\n",
    );

    let mut args = args_for(&path);
    args.dry_run = true;
    taskmill::run(args).await?;
    Ok(())
}
