use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use ghostscan::config::EngineConfig;
use ghostscan::geo::{resolve_target, GeoLocator};
use ghostscan::identity::IdentityChecker;
use ghostscan::intel::IntelResolver;
use ghostscan::logging::{init_logging, LogFormat};
use ghostscan::pipeline::Pipeline;
use ghostscan::ports::{format_ports, load_ports_from_path, parse_ports_str};
use ghostscan::proxy::ProxyConfig;
use ghostscan::recon::ReconLoop;
use ghostscan::scanner::ScanCoordinator;
use ghostscan::server::{spawn_server, AppState};
use ghostscan::store::MemoryStore;
use ghostscan::targets::parse_targets;
use ghostscan::types::{EngineEvent, IntelRecord, ScanFindings};

/// ghostscan: concurrent TCP connect scanner with SOCKS5 routing, host intel and a recon loop.
#[derive(Debug, Parser)]
#[command(name = "ghostscan", version, about, long_about = None)]
struct Cli {
    /// TOML config file. Defaults to ./ghostscan.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset.
    #[arg(long = "log-level", global = true)]
    log_level: Option<String>,

    /// pretty, compact or json.
    #[arg(long = "log-format", global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// One-shot scan of a target list.
    Scan {
        /// IPs, host names or CIDRs, separated by commas or spaces.
        targets: String,

        /// Port list such as "22,80,8000-8010".
        #[arg(long, conflicts_with = "ports_file")]
        ports: Option<String>,

        /// File with one port or range per line.
        #[arg(long = "ports-file")]
        ports_file: Option<PathBuf>,

        /// Route probes through this SOCKS5 proxy.
        #[arg(long)]
        proxy: Option<String>,

        /// Max concurrent connect attempts.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Connect timeout in milliseconds.
        #[arg(long = "timeout-ms")]
        timeout_ms: Option<u64>,

        /// Fetch intelligence for every host with an open port.
        #[arg(long, default_value_t = false)]
        enrich: bool,

        /// Write results as pretty JSON to this path.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run the autonomous recon loop until Ctrl-C.
    Recon {
        /// Stop after this many waves.
        #[arg(long)]
        waves: Option<u64>,

        #[arg(long = "interval-secs")]
        interval_secs: Option<u64>,
    },
    /// Host intelligence for one address.
    Intel { address: String },
    /// DNS resolution plus geolocation.
    Resolve { host: String },
    /// Public IP as seen by remote hosts.
    Identity {
        #[arg(long)]
        proxy: Option<String>,
    },
    /// Run the HTTP API.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(level) = cli.log_level.clone() {
        config.logging.level = level;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    init_logging(&config.logging);

    match cli.command {
        Command::Scan {
            targets,
            ports,
            ports_file,
            proxy,
            concurrency,
            timeout_ms,
            enrich,
            output,
        } => {
            if let Some(p) = proxy {
                config.proxy.endpoint = Some(p);
            }
            if let Some(c) = concurrency {
                config.scan.concurrency = c;
            }
            if let Some(t) = timeout_ms {
                config.scan.timeout_ms = t;
                config.scan.proxied_timeout_ms = t;
            }
            config.validate()?;
            run_scan(&config, &targets, ports.as_deref(), ports_file.as_deref(), enrich, output.as_deref()).await
        }
        Command::Recon { waves, interval_secs } => {
            if let Some(s) = interval_secs {
                config.recon.interval_secs = s;
            }
            config.validate()?;
            run_recon(&config, waves).await
        }
        Command::Intel { address } => {
            config.validate()?;
            let resolver = IntelResolver::new(&config.intel_settings()?)?;
            let record = resolver.resolve(&address).await;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Command::Resolve { host } => {
            config.validate()?;
            let locator = GeoLocator::new(&config.intel.geo_base_url, config.proxy()?.as_ref(), config.intel_timeout())?;
            let report = resolve_target(&locator, &host)
                .await
                .with_context(|| format!("resolving {host}"))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Identity { proxy } => {
            let proxy = match proxy.as_deref() {
                Some(p) => ProxyConfig::parse_optional(Some(p))?,
                None => config.proxy()?,
            };
            let checker = IdentityChecker::new(&config.intel.identity_url, proxy.as_ref(), config.intel_timeout())?;
            let ip = checker.current_ip().await.context("identity check failed")?;
            match proxy {
                Some(p) => println!("{ip} (via {p})"),
                None => println!("{ip} (direct)"),
            }
            Ok(())
        }
        Command::Serve { bind } => {
            config.validate()?;
            let state = AppState::new(config, Arc::new(MemoryStore::new()))?;
            spawn_server(&bind, state).await
        }
    }
}

#[derive(Serialize)]
struct ScanOutput<'a> {
    findings: &'a ScanFindings,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    intel: Vec<IntelRecord>,
}

async fn run_scan(
    config: &EngineConfig,
    targets: &str,
    ports: Option<&str>,
    ports_file: Option<&Path>,
    enrich: bool,
    output: Option<&Path>,
) -> Result<()> {
    let targets = parse_targets(targets)?;
    if targets.is_empty() {
        bail!("no targets given");
    }
    let ports = match (ports, ports_file) {
        (Some(list), _) => parse_ports_str(list)?,
        (None, Some(path)) => load_ports_from_path(path)?,
        (None, None) => config.scan_ports()?,
    };
    if ports.is_empty() {
        bail!("port list is empty");
    }

    let proxy = config.proxy()?;
    let options = config.scan_options(proxy);
    info!(
        targets = targets.len(),
        ports = %format_ports(&ports),
        concurrency = options.concurrency,
        timeout_ms = options.timeout.as_millis() as u64,
        proxy = options.proxy.as_ref().map(|p| p.to_string()).unwrap_or_else(|| "direct".into()),
        "starting scan"
    );
    let coordinator = ScanCoordinator::new(&options)?;
    let findings = coordinator
        .scan(&targets, &ports, |address, port| println!("[+] {address}:{port} open"))
        .await;

    print_findings_table(&findings);

    let intel = if enrich {
        let resolver = IntelResolver::new(&config.intel_settings()?)?;
        let pipeline = Pipeline::new(Arc::new(MemoryStore::new()), Arc::new(resolver));
        let records = pipeline.ingest(&findings, "scanner").await;
        for r in &records {
            println!(
                "{:<15}  {:<4}  {}  [{}]",
                r.address,
                r.provenance.as_str(),
                r.location,
                r.services.join(", ")
            );
        }
        records
    } else {
        Vec::new()
    };

    if let Some(path) = output {
        write_results_json(path, &ScanOutput { findings: &findings, intel })
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Wrote JSON results to {}", path.display());
    }
    Ok(())
}

async fn run_recon(config: &EngineConfig, waves: Option<u64>) -> Result<()> {
    let mut settings = config.recon_settings()?;
    settings.max_waves = waves;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let recon = ReconLoop::new(settings, Arc::new(config.harvest_source()), tx)?;

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop requested, finishing the current wave");
            on_signal.cancel();
        }
    });

    let report = recon.run(cancel).await;
    printer.await.context("event printer task failed")?;
    println!(
        "\nRecon halted after {} wave(s) ({} failed), {} open port(s) found",
        report.waves, report.failed_waves, report.open_ports
    );
    Ok(())
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::Discovery { address, port } => println!("[+] {address}:{port} open"),
        EngineEvent::WaveStarted { wave, topic } => println!("\n== wave {wave}: {topic}"),
        EngineEvent::TargetsAcquired { count, .. } => println!("   {count} target(s) acquired"),
        EngineEvent::WaveFinished { hosts, open_ports, .. } => {
            println!("   done: {hosts} host(s), {open_ports} open port(s)")
        }
        EngineEvent::WaveFailed { reason, .. } => println!("   wave failed: {reason}"),
        EngineEvent::ReconHalted { .. } => {}
    }
}

fn print_findings_table(findings: &ScanFindings) {
    let mut addr_w = "address".len();
    for h in findings.iter() {
        addr_w = addr_w.max(h.address.len());
    }

    println!(
        "\nOpen ports: {} (hosts scanned: {}, live: {})",
        findings.open_count(),
        findings.len(),
        findings.live_hosts().count()
    );
    println!("{:<addr_w$}  open_ports", "address");
    println!("{:-<addr_w$}  {:-<10}", "", "");
    for h in findings.live_hosts() {
        let mut ports = h.open_ports.clone();
        ports.sort_unstable();
        println!("{:<addr_w$}  {}", h.address, format_ports(&ports));
    }
}

fn write_results_json<T: Serialize>(path: &Path, results: &T) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, results)?;
    Ok(())
}
