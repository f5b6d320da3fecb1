use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use pulse::core::{Error, EXIT_FAILURE, EXIT_NO_SLOTS};
use pulse::heartbeat::RunningFlag;
use pulse::session::{install_interrupt_handler, SessionBootstrap, SessionConfig};
use pulse::transport::ShmTransport;

#[derive(Parser, Debug)]
#[command(author, version, about = "Claim a consumer role and guess its speed", long_about = None)]
struct Args {
    /// JSON session config; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Coordination record location
    #[arg(long)]
    record_path: Option<PathBuf>,

    /// Fragments handled per poll
    #[arg(long)]
    fragment_limit: Option<usize>,

    /// CPU core to pin the process to
    #[arg(long)]
    core_id: Option<usize>,
}

impl Args {
    fn session_config(&self) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => SessionConfig::default(),
        };
        if let Some(path) = &self.record_path {
            config.record_path = path.clone();
        }
        if let Some(limit) = self.fragment_limit {
            config.fragment_limit = limit;
        }
        Ok(config)
    }
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        let code = err
            .downcast_ref::<Error>()
            .map_or(EXIT_FAILURE, Error::exit_code);
        if code == EXIT_NO_SLOTS {
            eprintln!("No more consumers!");
        } else {
            eprintln!("error: {err:#}");
        }
        std::process::exit(code);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    pin_to_core(args.core_id)?;
    let config = args.session_config()?;

    let running = RunningFlag::new();
    install_interrupt_handler(&running).context("installing interrupt handler")?;

    let transport = ShmTransport::new(config.shm_config());
    let mut bootstrap = SessionBootstrap::new(transport, config)?;
    let stdin = io::stdin();
    let stdout = io::stdout();
    let Some(summary) = bootstrap.run_consumer(&running, &mut stdin.lock(), &mut stdout.lock())?
    else {
        info!("interrupted before the producer attached");
        return Ok(());
    };

    let report = &summary.report;
    if report.latency.is_empty() {
        info!("{} observed no heartbeats", summary.session);
    } else {
        info!(
            "{}: {} heartbeats, latency p50={}ns p99={}ns max={}ns",
            summary.session,
            report.observed,
            report.latency.value_at_quantile(0.5),
            report.latency.value_at_quantile(0.99),
            report.latency.max()
        );
    }
    Ok(())
}

fn pin_to_core(core_id: Option<usize>) -> Result<()> {
    let Some(core_id) = core_id else {
        return Ok(());
    };
    let core_ids = core_affinity::get_core_ids().context("Failed to get core IDs")?;
    if core_id >= core_ids.len() {
        anyhow::bail!("Core ID {} out of range ({} cores available)", core_id, core_ids.len());
    }
    info!("Pinning process to core {}", core_id);
    core_affinity::set_for_current(core_ids[core_id]);
    Ok(())
}
