// src/lib.rs

pub mod chain;
pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod queue;
pub mod schedule;
pub mod ticker;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::ConfigLoader;
use crate::config::model::{Generation, LoadStatus, Task};
use crate::config::monitor::SourceMonitor;
use crate::exec::ProcessWorker;
use crate::queue::{DispatchEvent, QueueManager};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and the reload poll
/// - the queue manager with its per-queue dispatch loops
/// - the process worker
/// - the minute ticker
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let mut loader = ConfigLoader::new(&args.config);
    let status = loader.load();
    report_load(&status);

    if args.check {
        return match status.error_message() {
            Some(message) => bail!("configuration invalid: {message}"),
            None => {
                println!("configuration ok");
                Ok(())
            }
        };
    }

    if !status.ok {
        match status.error_message() {
            Some(message) => bail!("configuration invalid: {message}"),
            None => bail!("configuration did not load"),
        }
    }

    let handle = loader.handle();
    let Some(generation) = handle.current() else {
        bail!("no configuration generation is active");
    };

    if args.dry_run {
        print_dry_run(&generation);
        return Ok(());
    }

    // Queue manager + dispatch loops over the process worker.
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<DispatchEvent>();
    let manager = Arc::new(QueueManager::new(Arc::new(ProcessWorker::new()), events_tx));
    manager.apply(&generation);

    // Dispatch activity is surfaced as events; route the policy-bearing
    // ones to the log until real policy handlers are attached.
    let events_task = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            log_dispatch_event(&event);
        }
    });

    // Cron firing.
    let ticker = ticker::spawn_ticker(handle.clone(), Arc::clone(&manager));

    // Reload polling over the config source.
    let mut monitor = SourceMonitor::attach(loader.path());
    let mut poll = tokio::time::interval(Duration::from_secs(args.poll_interval.max(1)));

    info!(config = %loader.path().display(), "taskmill daemon started");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            _ = poll.tick() => {
                let status = loader.poll(&mut monitor);
                if status.updated {
                    report_load(&status);
                    if let Some(generation) = handle.current() {
                        manager.apply(&generation);
                    }
                } else if status.failed {
                    report_load(&status);
                }
            }
        }
    }

    ticker.abort();
    manager.shutdown().await;
    events_task.abort();

    info!("taskmill daemon stopped");
    Ok(())
}

fn report_load(status: &LoadStatus) {
    if status.failed {
        let message = status.error_message().unwrap_or_default();
        error!(
            ok = status.ok,
            parsed = status.parsed,
            %message,
            "configuration load failed"
        );
    } else if status.updated {
        info!(
            store_modified = status.store_modified,
            "configuration generation active"
        );
    }
}

fn log_dispatch_event(event: &DispatchEvent) {
    match event {
        DispatchEvent::JobFailed {
            queue,
            task,
            error,
            policy: Some(policy),
            ..
        } => {
            warn!(
                queue = %queue,
                task = %task,
                %policy,
                %error,
                "routing failure to error policy"
            );
        }
        DispatchEvent::QueueFatal {
            queue,
            consecutive_failures,
            policy,
        } => match policy {
            Some(policy) => error!(
                queue = %queue,
                consecutive_failures,
                %policy,
                "routing to fatal policy"
            ),
            None => error!(
                queue = %queue,
                consecutive_failures,
                "queue reached fatal failure threshold"
            ),
        },
        _ => {}
    }
}

/// Simple dry-run output: print queues, tasks, schedules and chains.
fn print_dry_run(generation: &Generation) {
    println!("taskmill dry-run (generation {})", generation.seq);
    println!("  state.root = {}", generation.state_root.display());
    println!();

    let queues: Vec<_> = generation.queues().collect();
    println!("queues ({}):", queues.len());
    for queue in queues {
        println!("  - {} (concurrency {})", queue.name, queue.concurrency);
        if let Some(ref policy) = queue.onerror {
            println!("      onerror: {policy}");
        }
        if let Some(ref policy) = queue.onfatal {
            println!("      onfatal: {policy}");
        }
    }
    println!();

    let tasks: Vec<_> = generation.tasks().collect();
    println!("tasks ({}):", tasks.len());
    for task in tasks {
        println!("  - {}", task.name);
        println!("      queue: {}", task.queue);
        println!("      target: {}", task.target);
        if !task.enabled {
            println!("      enabled: no");
        }
        if let Some(ref set) = task.schedule {
            println!("      cron: {:?}", set.exprs());
        }
        if !task.chain.is_empty() {
            println!("      chain: {:?}", chain_names(&task.chain));
        }
        if let Some(ref policy) = task.onerror {
            println!("      onerror: {policy}");
        }
    }
}

fn chain_names(chain: &[Arc<Task>]) -> Vec<String> {
    chain
        .iter()
        .map(|t| {
            if t.chain.is_empty() {
                t.name.clone()
            } else {
                format!("{} -> {:?}", t.name, chain_names(&t.chain))
            }
        })
        .collect()
}
