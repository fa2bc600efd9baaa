//! 4Corners CLI entry point

use anyhow::{Context, Result};
use clap::Parser;
use fourcorners::config::size::format_size;
use fourcorners::config::BenchmarkConfig;
use fourcorners::coordinator::{Benchmark, BenchmarkPlan, BenchmarkResults, TestKind};
use fourcorners::engine::EngineKind;
use fourcorners::error::BenchError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 4Corners - raw storage benchmark: sequential throughput and random IOPS
#[derive(Parser, Debug)]
#[command(name = "fourcorners")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Block devices or files to test; write tests destroy their contents
    #[arg(value_name = "DEVICE")]
    devices: Vec<PathBuf>,

    /// TOML configuration file (command-line options take precedence)
    #[arg(short, long, env = "FOURCORNERS_CONFIG")]
    config: Option<PathBuf>,

    /// Tests to run: all, or a comma separated list of read-tp, write-tp, read-iops, write-iops
    #[arg(short, long)]
    tests: Option<String>,

    /// Duration of each test in seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// IO engine: auto, sync or io_uring
    #[arg(short, long)]
    engine: Option<String>,

    /// Use the page cache instead of O_DIRECT
    #[arg(long)]
    buffered: bool,

    /// Fixed RNG seed for offsets and write data
    #[arg(long)]
    seed: Option<u64>,

    // === Per-test overrides ===
    /// Read throughput threads
    #[arg(long)]
    read_tp_threads: Option<usize>,
    /// Write throughput threads
    #[arg(long)]
    write_tp_threads: Option<usize>,
    /// Read IOPS threads
    #[arg(long)]
    read_iops_threads: Option<usize>,
    /// Write IOPS threads
    #[arg(long)]
    write_iops_threads: Option<usize>,

    /// Read throughput block size (e.g., 128k)
    #[arg(long)]
    read_tp_bs: Option<String>,
    /// Write throughput block size (e.g., 64k)
    #[arg(long)]
    write_tp_bs: Option<String>,
    /// Read IOPS block size (e.g., 4k)
    #[arg(long)]
    read_iops_bs: Option<String>,
    /// Write IOPS block size (e.g., 4k)
    #[arg(long)]
    write_iops_bs: Option<String>,

    /// Queue depth per thread for every test
    #[arg(short, long)]
    queue_depth: Option<usize>,

    // === Output ===
    /// Print results as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Validate configuration, print the plan and exit
    #[arg(long)]
    dry_run: bool,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<BenchError>() {
            Some(BenchError::UserCancelled) => {
                eprintln!("Benchmark cancelled.");
                ExitCode::from(130)
            }
            Some(bench @ BenchError::AccessDenied { .. }) => {
                error!("{}", bench);
                eprintln!("Error: {}", bench);
                eprintln!("Hint: re-run with sudo, or grant your user read/write access to the device.");
                ExitCode::FAILURE
            }
            _ => {
                error!("{:#}", e);
                eprintln!("Error: {:#}", e);
                ExitCode::FAILURE
            }
        },
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config = build_config(cli)?;
    let plan = config.plan()?;

    if !cli.json {
        println!("4Corners v{}", env!("CARGO_PKG_VERSION"));
        println!();
        print_plan(&plan);
        println!();
    }

    if cli.dry_run {
        println!("Dry run mode - configuration validated successfully");
        return Ok(());
    }

    if plan.tests.iter().any(|(kind, _)| kind.direction() == fourcorners::engine::OperationType::Write) {
        eprintln!("WARNING: write tests will DESTROY all data on the target device(s)");
    }

    let benchmark = Benchmark::new();
    install_interrupt_handler(&benchmark)?;

    let quiet = cli.json;
    let progress = move |line: &str| {
        if !quiet {
            println!("{}", line);
        }
    };

    let results = benchmark.run(&plan, &progress)?;

    if cli.json {
        let json = serde_json::to_string_pretty(&results).context("Failed to serialize results")?;
        println!("{}", json);
    } else {
        print_summary(&results);
    }

    Ok(())
}

/// Defaults, then the config file, then command-line overrides
fn build_config(cli: &Cli) -> Result<BenchmarkConfig> {
    let mut config = match &cli.config {
        Some(path) => BenchmarkConfig::load_file(path)?,
        None => BenchmarkConfig::default(),
    };

    if !cli.devices.is_empty() {
        config.devices = cli.devices.clone();
    }
    if let Some(tests) = &cli.tests {
        config.tests = Some(TestKind::parse_list(tests)?);
    }
    if let Some(secs) = cli.duration {
        config.set_duration(secs);
    }
    if let Some(engine) = &cli.engine {
        config.engine.kind = engine
            .parse::<EngineKind>()
            .map_err(|e| BenchError::InvalidConfig(e.to_string()))?;
    }
    if cli.buffered {
        config.engine.direct_io = false;
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }

    let overrides = [
        (TestKind::ReadThroughput, cli.read_tp_threads, &cli.read_tp_bs),
        (TestKind::WriteThroughput, cli.write_tp_threads, &cli.write_tp_bs),
        (TestKind::ReadIops, cli.read_iops_threads, &cli.read_iops_bs),
        (TestKind::WriteIops, cli.write_iops_threads, &cli.write_iops_bs),
    ];
    for (kind, threads, block_size) in overrides {
        let test = config.test_config_mut(kind);
        if let Some(threads) = threads {
            test.threads = threads;
        }
        if let Some(block_size) = block_size {
            test.block_size = block_size.clone();
        }
        if cli.queue_depth.is_some() {
            test.queue_depth = cli.queue_depth;
        }
    }

    debug!(?config, "configuration resolved");
    Ok(config)
}

/// First Ctrl-C stops the benchmark gracefully, the second aborts
fn install_interrupt_handler(benchmark: &Benchmark) -> Result<()> {
    let cancel = benchmark.cancel_token();
    ctrlc::set_handler(move || {
        if cancel.is_signalled() {
            eprintln!("Received second interrupt, aborting");
            std::process::abort();
        }
        eprintln!("Stopping benchmark...");
        cancel.signal();
    })
    .context("Failed to install Ctrl-C handler")
}

fn print_plan(plan: &BenchmarkPlan) {
    println!("Configuration:");
    println!("  Devices:");
    for device in &plan.devices {
        println!("    {}", device.display());
    }
    println!("  Engine: {:?}", plan.options.engine);
    println!("  Direct I/O: {}", if plan.options.direct_io { "yes" } else { "no" });
    println!("  Tests:");
    for (kind, spec) in &plan.tests {
        println!(
            "    {:<17} bs={:<5} threads={:<4} qd={:<3} duration={}s",
            kind.name(),
            format_size(spec.block_size),
            spec.threads,
            spec.queue_depth,
            spec.duration.as_secs()
        );
    }
}

fn print_summary(results: &BenchmarkResults) {
    println!();
    println!("Results ({})", results.started_at.format("%Y-%m-%d %H:%M:%S"));
    println!("{}", "=".repeat(78));
    println!(
        "{:<17} {:>12} {:>12} {:>10} {:>10} {:>10}",
        "Test", "MB/s", "IOPS", "avg ms", "p50 ms", "p99 ms"
    );
    for r in &results.results {
        println!(
            "{:<17} {:>12.2} {:>12.0} {:>10.3} {:>10.3} {:>10.3}",
            r.kind.name(),
            r.throughput_mbps,
            r.iops,
            r.latency_avg_ms,
            r.latency_p50_ms,
            r.latency_p99_ms
        );
        if r.devices.len() > 1 {
            for device in &r.devices {
                println!(
                    "  {:<15} {:>12.2} {:>12.0} {:>10.3} {:>10.3} {:>10.3}",
                    device.path.display(),
                    device.result.throughput_mbps,
                    device.result.iops,
                    device.result.latency_avg_ms,
                    device.result.latency_p50_ms,
                    device.result.latency_p99_ms
                );
            }
        }
        if r.errors > 0 {
            println!("  {} operations failed", r.errors);
        }
    }
}
