//! observatory binary entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use observatory_rs::config::ConfigLoader;
use observatory_rs::logging::{init_logging, LogConfig};
use observatory_rs::monitoring::metrics::MetricKind;
use observatory_rs::monitoring::tracing_optimizer::Span;
use observatory_rs::ObservabilityRegistry;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "observatory")]
#[command(about = "Hybrid anomaly detection, SLA compliance and trace sampling", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to observatory.toml or config/observatory.toml)
    #[arg(short, long, global = true, env = "OBSERVATORY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic workload through the pipeline and print reports
    Simulate {
        /// Number of samples per metric
        #[arg(short, long, default_value_t = 500)]
        samples: usize,

        /// Inject a spike every K samples (0 disables)
        #[arg(short, long, default_value_t = 100)]
        anomaly_every: usize,

        /// RNG seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        /// Print reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load_from_file(cli.config.as_ref())
        .load_from_env()
        .build()
        .context("failed to load configuration")?;

    match cli.command {
        Commands::ShowConfig => {
            let rendered =
                toml::to_string_pretty(&config).context("failed to render configuration")?;
            println!("{}", rendered);
            Ok(())
        }
        Commands::Simulate {
            samples,
            anomaly_every,
            seed,
            json,
        } => {
            let _guard = init_logging(&LogConfig::from_section(&config.logging))?;
            let registry = ObservabilityRegistry::from_config(config)?;
            simulate(&registry, samples, anomaly_every, seed)?;
            report(&registry, json)
        }
    }
}

fn simulate(
    registry: &ObservabilityRegistry,
    samples: usize,
    anomaly_every: usize,
    seed: Option<u64>,
) -> Result<()> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let sla = registry.sla();
    sla.register_metric("response_time_ms", MetricKind::Histogram, "ms");
    sla.register_metric("error_rate", MetricKind::Gauge, "%");
    sla.define_sla("latency", "response_time_ms", 250.0, "<=")?;
    sla.define_sla("errors", "error_rate", 1.0, "<=")?;

    let start = chrono::Utc::now();
    let mut detections = 0usize;

    for i in 0..samples {
        let timestamp = start + chrono::Duration::seconds(i as i64);
        let spike = anomaly_every > 0 && i > 0 && i % anomaly_every == 0;

        let latency = if spike {
            rng.gen_range(800.0..1200.0)
        } else {
            rng.gen_range(80.0..140.0)
        };
        let error_rate = if spike {
            rng.gen_range(5.0..10.0)
        } else {
            rng.gen_range(0.0..0.8)
        };

        for (metric, value) in [("response_time_ms", latency), ("error_rate", error_rate)] {
            if let Some(result) = registry.ingest_metric_at("api", metric, value, timestamp)? {
                detections += 1;
                warn!(
                    metric,
                    value,
                    severity = result.severity.as_str(),
                    method = %result.detection_method,
                    "Anomaly detected"
                );
            }
            registry.record_sla_metric("api", metric, value)?;
        }

        let trace_id = format!("trace-{}", i);
        let root = Span::new(trace_id.as_str(), "root", "GET /checkout", "api", timestamp)
            .finished_at(timestamp + chrono::Duration::microseconds((latency * 1000.0) as i64));
        let db_ms = latency * 0.6;
        let mut db = Span::new(trace_id.as_str(), "db", "SELECT orders", "postgres", timestamp)
            .with_parent("root")
            .finished_at(timestamp + chrono::Duration::microseconds((db_ms * 1000.0) as i64));
        if spike {
            db = db.failed("statement timeout");
        }
        registry.ingest_span(root)?;
        registry.ingest_span(db)?;
    }

    info!(samples, detections, "Simulation finished");
    Ok(())
}

fn report(registry: &ObservabilityRegistry, json: bool) -> Result<()> {
    let snapshot = registry.snapshot();

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let health = &snapshot.system_health;
    println!("Detection mode:    {}", health.mode);
    println!("Detections:        {}", health.detections_made);
    match health.agreement_ratio {
        Some(ratio) => println!("Path agreement:    {:.1}%", ratio * 100.0),
        None => println!("Path agreement:    n/a"),
    }
    println!(
        "Production events: {} ({} in the last hour)",
        health.production.total_anomalies, health.production.recent_60min
    );

    let overall = &snapshot.compliance.overall;
    println!(
        "SLA compliance:    {:.2}% ({})",
        overall.overall_compliance_percentage,
        overall.status.as_str()
    );
    for (name, sla) in &snapshot.compliance.slas {
        println!(
            "  {:<10} {} {} {:>8.2}%  violations {}/{}",
            name,
            sla.operator,
            sla.threshold,
            sla.compliance_percentage,
            sla.violations,
            sla.total_checks
        );
    }

    let perf = &snapshot.performance;
    println!(
        "Traces:            {} seen, {} sampled ({})",
        perf.total_traces, perf.sampled_traces, perf.sampling_strategy
    );
    for (operation, stats) in &perf.operations {
        println!(
            "  {:<16} p50 {:>7.1}ms  p95 {:>7.1}ms  p99 {:>7.1}ms  errors {}",
            operation, stats.p50_ms, stats.p95_ms, stats.p99_ms, stats.error_count
        );
    }

    Ok(())
}
