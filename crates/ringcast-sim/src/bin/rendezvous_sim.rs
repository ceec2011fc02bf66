use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ringcast_core::{AckMode, MepType};
use ringcast_node::{MessageProperty, NodeConfig, PublishOutcome};
use ringcast_sim::{SimError, Simulation};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Publishes a stream of messages through a simulated ring and reports
/// what each receiver got.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Node configuration file (TOML); defaults apply otherwise
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Number of nodes on the ring
    #[arg(long, default_value_t = 8, env = "RINGCAST_SIM_NODES")]
    nodes: usize,
    /// Subject every participant meets on
    #[arg(long, default_value = "weather")]
    subject: String,
    /// Number of receiving nodes, taken after the publisher
    #[arg(long, default_value_t = 2)]
    receivers: usize,
    /// Messages published by node 0
    #[arg(long, default_value_t = 20)]
    messages: usize,
    /// Simulated milliseconds between two publishes
    #[arg(long, default_value_t = 250)]
    interval_ms: u64,
    /// Capacity advertised in every token
    #[arg(long, default_value_t = 64)]
    max_threshold: u16,
    /// Ask receivers to acknowledge each message
    #[arg(long)]
    ack: bool,
}

fn load_config(path: Option<&PathBuf>) -> Result<NodeConfig, String> {
    let Some(path) = path else {
        return Ok(NodeConfig::default());
    };
    let raw = fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    NodeConfig::from_toml_str(&raw).map_err(|e| format!("{}: {e}", path.display()))
}

fn run(cli: &Cli, config: NodeConfig) -> Result<(), SimError> {
    let mut sim = Simulation::new(config, cli.nodes)?;
    let property = MessageProperty {
        mep_type: MepType::GROUP_TO_GROUP,
        ack_mode: if cli.ack {
            AckMode::Destination
        } else {
            AckMode::None
        },
        max_threshold: cli.max_threshold,
        ..MessageProperty::default()
    };
    info!(
        subject = %cli.subject,
        rendezvous = ?sim.rendezvous_index(&cli.subject),
        "simulation starting"
    );

    sim.announce(0, &cli.subject, property.clone())?;
    let mut inboxes = Vec::new();
    for index in 1..=cli.receivers.min(cli.nodes.saturating_sub(1)) {
        inboxes.push((index, sim.subscribe(index, &cli.subject, property.clone())?));
    }

    let (mut delivered, mut buffered, mut rejected) = (0, 0, 0);
    for seq in 0..cli.messages {
        let payload = format!("{}#{seq}", cli.subject);
        match sim.publish(0, &cli.subject, payload.as_bytes())? {
            PublishOutcome::Delivered { .. } => delivered += 1,
            PublishOutcome::Buffered => buffered += 1,
            PublishOutcome::Rejected => rejected += 1,
        }
        sim.advance(cli.interval_ms)?;
    }
    // let pending acks settle or expire
    let settle = sim.node(0)?.config().ack_timeout_ms;
    sim.advance(settle * 2)?;

    println!("publish outcomes: delivered={delivered} buffered={buffered} rejected={rejected}");
    for (index, inbox) in &inboxes {
        let node = sim.node(*index)?;
        println!(
            "receiver {index} ({}): {} messages",
            &node.id()[..12],
            inbox.lock().len()
        );
    }
    let publisher = sim.node(0)?;
    println!("publisher stats: {:?}", publisher.stats());
    for (index, _) in &inboxes {
        let receiver = sim.node(*index)?;
        if let Some(link) = publisher.links().get(receiver.id())? {
            println!(
                "link 0 -> {index}: success_avg={:.2} latency_ms={}",
                link.success_avg, link.latency_ms
            );
        }
    }
    println!("frames rejected: {}", sim.frames_rejected());
    Ok(())
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(err) => {
            error!("config load failed: {err}");
            return ExitCode::FAILURE;
        }
    };
    match run(&cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("simulation failed: {err}");
            ExitCode::FAILURE
        }
    }
}
