use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};

use pulse::coord::{format_roles, generate_roles};
use pulse::core::{Error, EXIT_FAILURE};
use pulse::heartbeat::RunningFlag;
use pulse::session::{install_interrupt_handler, parse_guess, SessionBootstrap, SessionConfig};
use pulse::transport::ShmTransport;

#[derive(Parser, Debug)]
#[command(author, version, about = "Publish heartbeats and hand out consumer roles", long_about = None)]
struct Args {
    /// JSON session config; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Coordination record location
    #[arg(long)]
    record_path: Option<PathBuf>,

    /// Channel directory
    #[arg(long)]
    address: Option<String>,

    #[arg(long)]
    stream_id: Option<i32>,

    /// Number of consumer roles to hand out
    #[arg(long)]
    consumers: Option<usize>,

    /// How many of the roles are SLOW
    #[arg(long)]
    slow: Option<usize>,

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
        if let Some(address) = &self.address {
            config.transport_address = address.clone();
        }
        if let Some(stream_id) = self.stream_id {
            config.stream_id = stream_id;
        }
        if let Some(consumers) = self.consumers {
            config.consumer_count = consumers;
        }
        if let Some(slow) = self.slow {
            config.slow_count = slow;
        }
        Ok(config)
    }
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        let code = err
            .downcast_ref::<Error>()
            .map_or(EXIT_FAILURE, Error::exit_code);
        std::process::exit(code);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    pin_to_core(args.core_id)?;
    let config = args.session_config()?;

    let running = RunningFlag::new();
    install_interrupt_handler(&running).context("installing interrupt handler")?;
    spawn_exit_prompt(running.clone())?;

    let roles = generate_roles(config.consumer_count, config.slow_count, &mut rand::rng())?;
    debug!("consumer roles {}", format_roles(&roles));

    let transport = ShmTransport::new(config.shm_config());
    let mut bootstrap = SessionBootstrap::new(transport, config)?;
    let summary = bootstrap
        .run_producer(roles, &running)
        .context("running producer")?;

    info!(
        "session on {} ended ({:?}): {} heartbeats sent, {} congested",
        summary.record.transport_address,
        summary.report.exit,
        summary.report.stats.sent,
        summary.report.stats.congested
    );
    if !summary.connected {
        info!("no consumer ever attached");
    }
    Ok(())
}

/// Asks on stdin whether to stop. Closed stdin leaves the producer running
/// until interrupted.
fn spawn_exit_prompt(running: RunningFlag) -> Result<()> {
    thread::Builder::new()
        .name("exit-prompt".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            let mut line = String::new();
            while running.is_running() {
                print!("exit? (y/n) ");
                let _ = io::stdout().flush();
                line.clear();
                match stdin.lock().read_line(&mut line) {
                    Ok(0) | Err(_) => return,
                    Ok(_) if parse_guess(&line) => {
                        running.stop();
                        return;
                    }
                    Ok(_) => {}
                }
            }
        })
        .context("spawning exit prompt")?;
    Ok(())
}

// Threads spawned after this inherit the mask, including the heartbeat loop.
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
