//! Wireless ad-hoc echo sweep.
//!
//! Runs one simulation per node count (2 to 30 by default), prints the
//! per-flow table and summary of each, and writes all reports to a JSON file.
//!
//! ```bash
//! wifi-adhoc-sim --packet-size 512 --max-packets 10 --interval 1
//! wifi-adhoc-sim --min-nodes 5 --max-nodes 5 --pcap --verbose
//! ```

use clap::Parser;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wifi_adhoc_sim::sweep::run_sweep_with;
use wifi_adhoc_sim::{write_json, JsonLinesTraceSink, SimulationConfig, TraceSink};

#[derive(Parser, Debug)]
#[command(name = "wifi-adhoc-sim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Size of packets to send
    #[arg(long, default_value = "512")]
    packet_size: u32,

    /// Max packets to send per client
    #[arg(long, default_value = "10")]
    max_packets: u32,

    /// Interval between packets (seconds)
    #[arg(long, default_value = "1.0")]
    interval: f64,

    /// Index of the echo server node
    #[arg(long, default_value = "0")]
    server_node: usize,

    /// Simulated stop time (seconds)
    #[arg(long, default_value = "15.0")]
    stop_time: f64,

    /// Smallest node count of the sweep
    #[arg(long, default_value = "2")]
    min_nodes: usize,

    /// Largest node count of the sweep
    #[arg(long, default_value = "30")]
    max_nodes: usize,

    /// Backoff RNG seed
    #[arg(long, default_value = "12345")]
    seed: u64,

    /// Offset between consecutive client start times (seconds)
    #[arg(long, default_value = "0.0")]
    stagger: f64,

    /// Enable logging
    #[arg(long)]
    verbose: bool,

    /// Write a frame trace per node count (wifi-adhoc-<n>.jsonl)
    #[arg(long)]
    pcap: bool,

    /// Report output file
    #[arg(long, default_value = "DataCollection.json")]
    output: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "warn,wifi_adhoc_sim=debug"
    } else {
        "warn,wifi_adhoc_sim=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Sweep failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> wifi_adhoc_sim::Result<()> {
    let base = SimulationConfig::new(args.min_nodes)
        .with_packet_size(args.packet_size)
        .with_max_packets(args.max_packets)
        .with_interval(args.interval)
        .with_server_node(args.server_node)
        .with_stop_time(args.stop_time)
        .with_seed(args.seed)
        .with_client_stagger(args.stagger)
        .with_verbose_logging(args.verbose)
        .with_capture_trace(args.pcap);

    info!(
        min_nodes = args.min_nodes,
        max_nodes = args.max_nodes,
        seed = args.seed,
        "Starting sweep"
    );

    let points = run_sweep_with(&base, args.min_nodes..=args.max_nodes, |node_count| {
        if !args.pcap {
            return Ok(None);
        }
        let file = File::create(format!("wifi-adhoc-{node_count}.jsonl"))?;
        Ok(Some(
            Box::new(JsonLinesTraceSink::new(BufWriter::new(file))) as Box<dyn TraceSink>
        ))
    })?;

    for point in &points {
        println!("Running simulation with {} nodes...", point.node_count);
        print!("{}", point.report);
        println!(
            "  Saturation reference: collision probability {:.4}, tau {:.4}",
            point.saturation.collision_probability, point.saturation.tau
        );
        println!();
    }

    write_json(&args.output, &points)?;
    info!(path = %args.output.display(), points = points.len(), "Reports written");
    Ok(())
}
