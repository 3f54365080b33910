use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{info, warn};

use feedloom_core::ipc::DaemonClient;
use feedloom_core::scheduler::SchedulerEvent;
use feedloom_core::{AppConfig, DaemonServer, Engine};

fn pid_file_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("feedloom")
        .join("daemon.pid")
}

/// PID of the running daemon, removing a stale PID file
fn running_pid() -> Option<u32> {
    let pid_path = pid_file_path();
    let contents = fs::read_to_string(&pid_path).ok()?;
    let pid: u32 = contents.trim().parse().ok()?;

    let alive = Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false);
    if alive {
        return Some(pid);
    }

    let _ = fs::remove_file(&pid_path);
    None
}

fn write_pid_file() -> Result<()> {
    let pid_path = pid_file_path();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&pid_path, format!("{}\n", std::process::id()))?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

pub async fn start(config: AppConfig) -> Result<()> {
    if let Some(pid) = running_pid() {
        println!("Daemon is already running (PID: {})", pid);
        return Ok(());
    }

    println!("Starting feedloom daemon...");

    let socket_path = config.socket_path();
    let engine = Engine::open(config).await?;
    write_pid_file()?;

    let shutdown = engine.shutdown_token().clone();
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            info!("Received shutdown signal");
            shutdown.cancel();
        }
    });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SchedulerEvent::FeedsRefreshed {
                    succeeded,
                    failed,
                    new_articles,
                } => info!(
                    "Scheduled refresh: {} ok, {} failed, {} new articles",
                    succeeded, failed, new_articles
                ),
                SchedulerEvent::ArticlesCleaned { deleted } => {
                    info!("Scheduled cleanup removed {} articles", deleted)
                }
                SchedulerEvent::Error { task, message } => warn!("{} failed: {}", task, message),
            }
        }
    });

    let scheduler = engine.start_scheduler(Some(event_tx));

    println!(
        "Daemon started (PID: {}). Press Ctrl+C or run 'feedloom daemon stop' to stop.",
        std::process::id()
    );
    println!(
        "  Refresh interval: {} seconds",
        engine.settings().refresh_interval().await?.as_secs()
    );
    println!("  Socket: {}", socket_path.display());

    // Serves until the shutdown token fires
    let server = DaemonServer::new(engine.clone(), socket_path).with_scheduler(true);
    let served = server.run(shutdown.clone()).await;
    if let Err(e) = &served {
        warn!("IPC server stopped: {}", e);
        shutdown.cancel();
    }

    scheduler.shutdown().await;
    engine.shutdown().await;
    remove_pid_file();
    println!("Daemon stopped.");

    served.map_err(Into::into)
}

pub async fn stop() -> Result<()> {
    let Some(pid) = running_pid() else {
        println!("Daemon is not running.");
        return Ok(());
    };

    println!("Stopping daemon (PID: {})...", pid);

    let output = Command::new("kill").arg("-TERM").arg(pid.to_string()).output()?;
    if !output.status.success() {
        println!("Failed to stop daemon. You may need to kill it manually: kill {}", pid);
        return Ok(());
    }

    // Give in-flight fetches a moment to wind down
    tokio::time::sleep(Duration::from_secs(2)).await;

    if running_pid().is_none() {
        println!("Daemon stopped successfully.");
    } else {
        let _ = Command::new("kill").arg("-9").arg(pid.to_string()).output();
        remove_pid_file();
        println!("Daemon forcefully terminated.");
    }

    Ok(())
}

pub async fn status(config: &AppConfig) -> Result<()> {
    let Some(pid) = running_pid() else {
        println!("Daemon is not running.");
        return Ok(());
    };

    println!("Daemon is running (PID: {})", pid);
    println!("PID file: {}", pid_file_path().display());

    match DaemonClient::new(config.socket_path()).status().await {
        Ok(status) => {
            println!("Uptime: {} seconds", status.uptime_secs);
            println!("Scheduler: {}", if status.scheduler_running { "running" } else { "stopped" });
            println!("Subscriptions: {}", status.feed_count);
        }
        Err(e) => println!("Socket not answering: {}", e),
    }

    Ok(())
}
