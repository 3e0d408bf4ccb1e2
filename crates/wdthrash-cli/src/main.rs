//! # wdthrash
//!
//! Races inotify watch registration against watch removal, file churn and
//! mount churn until interrupted, then prints an exit report.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use wdthrash_config::logging::{init_logging, LogLevel};
use wdthrash_config::{parse_count, Config, ConfigError, ConfigLayer};

#[cfg(target_os = "linux")]
mod signals;

/// inotify watch descriptor race harness
#[derive(Parser, Debug)]
#[command(name = "wdthrash")]
#[command(version, about, long_about = None)]
#[command(allow_negative_numbers = true)]
struct Cli {
    /// Online CPUs to size defaults for [default: detected]
    #[arg(short = 'c', long, value_parser = count_arg("cores"))]
    cores: Option<i64>,

    /// Backing files (and adder groups) per instance [default: 3]
    #[arg(short = 'a', long, value_parser = count_arg("adders"))]
    adders: Option<i64>,

    /// Range closers per instance [default: same as adders]
    #[arg(short = 'r', long, value_parser = count_arg("removers"))]
    removers: Option<i64>,

    /// Near-low closers per instance [default: 1]
    #[arg(short = 'l', long = "low", value_parser = count_arg("low_removers"))]
    low_removers: Option<i64>,

    /// Adders per backing file [default: 2]
    #[arg(short = 'm', long, value_parser = count_arg("multiplier"))]
    multiplier: Option<i64>,

    /// Event drainers per instance [default: 1]
    #[arg(short = 'd', long = "data", value_parser = count_arg("data_dumpers"))]
    data_dumpers: Option<i64>,

    /// File churners [default: cores / 2]
    #[arg(short = 'z', long, value_parser = count_arg("file_churners"))]
    file_churners: Option<i64>,

    /// inotify instances [default: cores / 2]
    #[arg(short = 'i', long, value_parser = count_arg("instances"))]
    instances: Option<i64>,

    /// Working directory [default: /tmp/inotify_syscall_thrash]
    #[arg(short = 't', long = "dir", value_name = "DIR")]
    working_dir: Option<PathBuf>,

    /// Mount source [default: the working directory]
    #[arg(short = 's', long = "source-mnt", value_name = "PATH")]
    source_mnt: Option<PathBuf>,

    /// Filesystem type to mount [default: tmpfs]
    #[arg(short = 'f', long)]
    fstype: Option<String>,

    /// Mount data string, e.g. "size=1m"
    #[arg(long, value_name = "OPTS")]
    mount_options: Option<String>,

    /// Do not churn a mount over the working directory
    #[arg(long)]
    no_mount: bool,

    /// Start all workers without waiting for each role to come up
    #[arg(long)]
    no_rendezvous: bool,

    /// Extra config file, applied after ~/.wdthrash/config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Stop after this many seconds instead of waiting for a signal
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,

    /// Print the exit report as JSON
    #[arg(long)]
    json: bool,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
}

fn count_arg(
    field: &'static str,
) -> impl Fn(&str) -> Result<i64, ConfigError> + Clone + Send + Sync + 'static {
    move |value| parse_count(field, value)
}

impl Cli {
    /// Flags as the topmost configuration layer.
    fn layer(&self) -> ConfigLayer {
        let mut layer = ConfigLayer::default();

        let t = &mut layer.threads;
        t.cores = self.cores;
        t.adders = self.adders;
        t.removers = self.removers;
        t.low_removers = self.low_removers;
        t.multiplier = self.multiplier;
        t.data_dumpers = self.data_dumpers;
        t.file_churners = self.file_churners;

        layer.run.instances = self.instances;
        layer.run.working_dir = self.working_dir.clone();
        if self.no_rendezvous {
            layer.run.rendezvous = Some(false);
        }

        layer.mount.source = self.source_mnt.clone();
        layer.mount.fstype = self.fstype.clone();
        layer.mount.options = self.mount_options.clone();
        if self.no_mount {
            layer.mount.enabled = Some(false);
        }
        layer
    }

    fn resolve_config(&self) -> Result<Config> {
        let mut layer = ConfigLayer::load(self.config.as_deref())
            .context("Failed to load configuration")?;
        layer.merge(self.layer());
        Ok(Config::resolve(&layer)?)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let cli = Cli::parse();
    init_logging(LogLevel::from_verbosity(cli.verbose));

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("wdthrash: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(target_os = "linux")]
async fn run(cli: Cli) -> Result<()> {
    use std::time::Duration;

    use wdthrash_config::{log_cli_debug, log_cli_info};
    use wdthrash_harness::Harness;

    use crate::signals::ShutdownSignals;

    let config = cli.resolve_config()?;
    log_cli_debug!("Resolved configuration", config = ?config);

    let mut signals = ShutdownSignals::install().context("Failed to install signal handlers")?;

    let harness = Harness::linux();
    let run = tokio::task::spawn_blocking(move || harness.start(config))
        .await
        .context("Startup task failed")??;

    let stop = run.stop_signal();
    let mut join = tokio::task::spawn_blocking(move || run.join());

    let duration = cli.duration.map(Duration::from_secs);
    tokio::select! {
        name = signals.recv() => {
            log_cli_info!("Signal received, stopping", signal = name);
        }
        _ = elapsed(duration) => {
            log_cli_info!("Run duration elapsed, stopping", secs = cli.duration.unwrap_or_default());
        }
    }
    stop.trigger();

    let report = loop {
        tokio::select! {
            joined = &mut join => break joined.context("Join task failed")?,
            name = signals.recv() => {
                log_cli_info!("Already stopping, signal ignored", signal = name);
            }
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
    }
    Ok(())
}

#[cfg(target_os = "linux")]
async fn elapsed(duration: Option<std::time::Duration>) {
    match duration {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

#[cfg(not(target_os = "linux"))]
async fn run(cli: Cli) -> Result<()> {
    // Still validate so config mistakes surface on any platform
    cli.resolve_config()?;
    anyhow::bail!("wdthrash drives Linux inotify and only runs on Linux")
}
