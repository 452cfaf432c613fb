// src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use shadowmount::daemon::{Daemon, DaemonLock, DecisionSender, LogNotifier, RepairDecision};
use shadowmount::install::{DryRunRegistry, InstallRegistry, MountInstaller, NullfsMounter};
use shadowmount::{DaemonConfig, StabilityStrategy};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StabilityArg {
    /// Modification-time heuristic (default)
    Fast,
    /// Recursive-size resampling
    Thorough,
}

impl From<StabilityArg> for StabilityStrategy {
    fn from(arg: StabilityArg) -> Self {
        match arg {
            StabilityArg::Fast => StabilityStrategy::Fast,
            StabilityArg::Thorough => StabilityStrategy::Thorough,
        }
    }
}

#[derive(Parser)]
#[command(name = "shadowmount")]
#[command(author, version, about = "Storage-scanning install daemon for unpacked app bundles", long_about = None)]
struct Cli {
    /// Working directory for state, logs, and sentinel files
    #[arg(long, default_value = "/data/shadowmount")]
    base_dir: PathBuf,

    /// Seconds between poll cycles
    #[arg(long, default_value_t = 3)]
    poll_interval: u64,

    /// Copy-stability detection strategy
    #[arg(long, value_enum, default_value_t = StabilityArg::Fast)]
    stability: StabilityArg,

    /// Automatic retries per title before escalating to repair
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Also raise a notification when an already-registered title is
    /// remounted
    #[arg(long)]
    notify_on_restore: bool,

    /// Additional scan roots on top of the built-in list (repeatable)
    #[arg(long = "root")]
    roots: Vec<PathBuf>,
}

/// Log writer mirroring every line to stdout and the append-only debug log
struct TeeWriter {
    file: Arc<File>,
}

impl io::Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = io::stdout().write_all(buf);
        (&*self.file).write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stdout().flush();
        (&*self.file).flush()
    }
}

fn init_tracing(config: &DaemonConfig) -> Result<()> {
    std::fs::create_dir_all(&config.base_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.debug_log_path())
        .context("opening debug log")?;
    let file = Arc::new(file);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_writer(move || TeeWriter { file: file.clone() })
        .init();
    Ok(())
}

extern "C" fn handle_termination(_: i32) {
    shadowmount::daemon::request_shutdown();
}

fn install_signal_handlers() {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let action = SigAction::new(
        SigHandler::Handler(handle_termination),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        let _ = sigaction(Signal::SIGINT, &action);
        let _ = sigaction(Signal::SIGTERM, &action);
    }
}

/// Feed repair decisions from stdin: `retry <TITLE_ID>` or `skip <TITLE_ID>`
fn spawn_repair_reader(decisions: DecisionSender) {
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let mut words = line.split_whitespace();
            let (Some(verdict), Some(title_id)) = (words.next(), words.next()) else {
                continue;
            };
            match RepairDecision::parse(verdict) {
                Some(decision) => {
                    if decisions.send((title_id.to_string(), decision)).is_err() {
                        break;
                    }
                }
                None => eprintln!("unknown repair verdict: {verdict} (use retry or skip)"),
            }
        }
    });
}

fn build_registry() -> Box<dyn InstallRegistry> {
    #[cfg(feature = "platform")]
    {
        Box::new(shadowmount::install::PlatformRegistry::new())
    }
    #[cfg(not(feature = "platform"))]
    {
        Box::new(DryRunRegistry)
    }
}

fn build_notifier() -> Box<dyn shadowmount::daemon::Notifier> {
    #[cfg(feature = "platform")]
    {
        Box::new(shadowmount::daemon::PlatformNotifier)
    }
    #[cfg(not(feature = "platform"))]
    {
        Box::new(LogNotifier)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::new(&cli.base_dir);
    config.poll_interval = Duration::from_secs(cli.poll_interval);
    config.max_retries = cli.max_retries;
    config.stability.strategy = cli.stability.into();
    config.notify_on_restore = cli.notify_on_restore;
    config.scan_roots.extend(cli.roots.iter().cloned());

    init_tracing(&config)?;

    // Exactly one instance: a peer holding the lock means we have nothing
    // to do, and failing to take it at all is the only unrecoverable start
    // error
    let Some(_lock) = DaemonLock::try_acquire(config.lock_path())
        .context("acquiring daemon lock")?
    else {
        info!("another instance is already running, exiting");
        return Ok(());
    };

    install_signal_handlers();

    let system_root = config
        .layout
        .system_app_dir
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"));
    let installer = MountInstaller::new(
        config.layout.clone(),
        Box::new(NullfsMounter::new(system_root)),
        build_registry(),
    );

    info!(
        base_dir = %config.base_dir.display(),
        poll_secs = cli.poll_interval,
        "shadowmount starting"
    );

    let (mut daemon, decisions) = Daemon::new(config, installer, build_notifier())?;
    spawn_repair_reader(decisions);
    daemon.run()?;

    info!("shadowmount stopped");
    Ok(())
}
