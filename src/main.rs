use anyhow::{bail, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use proxy_sieve::{
    config::{self, ScanConfig, DEFAULT_ALIVE_FILE, DEFAULT_INPUT_FILE, DEFAULT_PRIORITY_FILE},
    proxy::{
        CandidateParser, PriorityOrder, ProgressReporter, ProxyCandidate, ProxyChecker,
        ReferenceResolver, ReportBuilder, ScanScheduler, ScanStats, TunnelProber,
        VerificationRegistry,
    },
    tui::ScanMonitorApp,
    ConfigError,
};
use std::fs::OpenOptions;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "proxy_sieve=info";

/// Validates relay candidates through a chain of verification services
#[derive(Parser)]
#[command(name = "proxy-sieve")]
#[command(about = "Validates relay candidates through a chain of verification services")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Dotenv file consulted for WORKER_URLS
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate every candidate and write the reports (default)
    Scan(ScanArgs),
    /// Parse a candidate list and report what was accepted
    Parse {
        /// Candidate list (ip,port,country,org per line)
        input: PathBuf,
        /// Write the accepted candidates here in normalized form
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run the validation chain for a single ip:port
    Probe {
        /// Candidate address, e.g. 1.2.3.4:443 or [2001:db8::1]:443
        target: SocketAddr,
        /// Country hint used when a verifier omits it
        #[arg(long, default_value = "")]
        country: String,
        /// Organization hint used when a verifier omits it
        #[arg(long, default_value = "")]
        org: String,
        /// This host's public address; discovered when omitted
        #[arg(long)]
        reference_ip: Option<IpAddr>,
        #[command(flatten)]
        endpoints: EndpointArgs,
    },
}

/// Verification endpoints and probe budget
#[derive(Args)]
struct EndpointArgs {
    /// Worker verification URL (repeatable, or comma-separated)
    #[arg(short = 'w', long = "worker-url", env = config::WORKER_URLS_VAR, value_delimiter = ',')]
    worker_urls: Vec<String>,
    /// Trace endpoint (key=value body)
    #[arg(long, default_value = proxy_sieve::proxy::registry::DEFAULT_TRACE_URL)]
    trace_url: String,
    /// IP echo endpoint (bare address body)
    #[arg(long, default_value = proxy_sieve::proxy::registry::DEFAULT_ECHO_URL)]
    echo_url: String,
    /// Timeout in seconds for connect and for each TLS exchange
    #[arg(long, default_value = "5")]
    timeout: u64,
}

impl EndpointArgs {
    /// Flags and the process environment win; the dotenv file fills the gap
    fn resolved_worker_urls(&self, env_file: &Path) -> Vec<String> {
        let urls: Vec<String> = self
            .worker_urls
            .iter()
            .flat_map(|raw| config::split_urls(raw))
            .collect();
        if urls.is_empty() {
            config::dotenv_worker_urls(env_file)
        } else {
            urls
        }
    }
}

#[derive(Parser)]
struct ScanArgs {
    #[command(flatten)]
    endpoints: EndpointArgs,
    /// Candidate list (ip,port,country,org per line)
    #[arg(short, long, default_value = DEFAULT_INPUT_FILE)]
    input: PathBuf,
    /// Alphabetical report
    #[arg(long, default_value = DEFAULT_ALIVE_FILE)]
    alive_output: PathBuf,
    /// Priority-ordered report
    #[arg(long, default_value = DEFAULT_PRIORITY_FILE)]
    priority_output: PathBuf,
    /// Number of candidates validated at once
    #[arg(short = 'n', long, default_value = "200")]
    concurrency: usize,
    /// Seconds between progress lines
    #[arg(long, default_value = "60")]
    progress_interval: u64,
    /// Countries listed first in the priority report, in rank order
    #[arg(long, value_delimiter = ',', default_value = "ID,MY,SG,HK")]
    priority: Vec<String>,
    /// This host's public address; discovered when omitted
    #[arg(long)]
    reference_ip: Option<IpAddr>,
    /// Show the interactive dashboard while scanning
    #[arg(long)]
    tui: bool,
}

impl ScanArgs {
    fn into_config(self, env_file: &Path) -> ScanConfig {
        ScanConfig::new()
            .with_worker_urls(self.endpoints.resolved_worker_urls(env_file))
            .with_trace_url(self.endpoints.trace_url)
            .with_echo_url(self.endpoints.echo_url)
            .with_concurrency(self.concurrency)
            .with_timeout(Duration::from_secs(self.endpoints.timeout))
            .with_progress_interval(Duration::from_secs(self.progress_interval))
            .with_priority_countries(self.priority)
            .with_input(self.input)
            .with_outputs(self.alive_output, self.priority_output)
            .with_reference_ip(self.reference_ip)
    }
}

fn init_logging(log_file: Option<&Path>, quiet: bool) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_ansi(false).with_writer(Arc::new(file)).init();
        }
        // Anything written to the terminal would tear the dashboard
        None if quiet => builder.with_writer(std::io::sink).init(),
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Commands::Scan(ScanArgs::parse_from(["scan"])));

    let quiet = matches!(&command, Commands::Scan(args) if args.tui);
    init_logging(cli.log_file.as_deref(), quiet)?;

    match command {
        Commands::Scan(args) => {
            let tui = args.tui;
            let config = args.into_config(&cli.env_file);
            config.validate()?;
            run_scan(config, tui).await?;
        }
        Commands::Parse { input, output } => {
            let candidates = CandidateParser::parse_file(&input)?;
            println!("Parsed {} candidates from {:?}", candidates.len(), input);

            if let Some(output_path) = output {
                CandidateParser::save_candidates(&candidates, &output_path)?;
                println!("Saved normalized candidates to {:?}", output_path);
            } else {
                for candidate in &candidates {
                    println!("{}", candidate.to_line());
                }
            }
        }
        Commands::Probe {
            target,
            country,
            org,
            reference_ip,
            endpoints,
        } => {
            let timeout = Duration::from_secs(endpoints.timeout);
            if timeout.is_zero() {
                return Err(ConfigError::InvalidTimeout.into());
            }
            let registry = Arc::new(VerificationRegistry::from_urls(
                &endpoints.resolved_worker_urls(&cli.env_file),
                &endpoints.trace_url,
                &endpoints.echo_url,
            )?);
            let reference_ip = resolve_reference(reference_ip, &registry, timeout).await?;

            let prober = Arc::new(TunnelProber::new(timeout)?);
            let checker = ProxyChecker::new(Arc::clone(&registry), prober);
            let candidate = ProxyCandidate::new(target.ip(), target.port().to_string(), country, org);

            let outcome = checker.validate(&candidate, reference_ip).await;
            match outcome.proxy {
                Some(proxy) => println!("LIVE: {}", proxy),
                None => println!("DEAD: {}", candidate),
            }
        }
    }

    Ok(())
}

/// Use the configured reference IP, or ask the verifiers directly.
/// A failed lookup leaves it unknown.
async fn resolve_reference(
    configured: Option<IpAddr>,
    registry: &VerificationRegistry,
    timeout: Duration,
) -> Result<Option<IpAddr>> {
    if configured.is_some() {
        return Ok(configured);
    }

    let resolver = ReferenceResolver::new(timeout)?;
    match resolver.discover(registry).await {
        Ok(ip) => Ok(Some(ip)),
        Err(e) => {
            warn!("Could not determine reference IP, continuing without it: {:#}", e);
            Ok(None)
        }
    }
}

async fn run_scan(config: ScanConfig, tui: bool) -> Result<()> {
    let started = Local::now();

    let registry = Arc::new(VerificationRegistry::from_urls(
        &config.worker_urls,
        &config.trace_url,
        &config.echo_url,
    )?);
    if registry.workers().is_empty() {
        return Err(ConfigError::NoWorkerEndpoints.into());
    }
    info!("Loaded {} worker endpoints", registry.workers().len());

    let candidates = CandidateParser::parse_file(&config.input)?;
    info!("Loaded {} candidates from {:?}", candidates.len(), config.input);

    let reference_ip = resolve_reference(config.reference_ip, &registry, config.timeout).await?;

    let stats = Arc::new(ScanStats::new(candidates.len()));
    let prober = Arc::new(TunnelProber::new(config.timeout)?);
    let checker = Arc::new(ProxyChecker::new(Arc::clone(&registry), prober));
    let scheduler = ScanScheduler::new(checker, config.concurrency, Arc::clone(&stats));

    info!(
        "Scanning with concurrency {}, timeout {}s",
        config.concurrency,
        config.timeout.as_secs()
    );

    let outcomes = if tui {
        let (live_tx, live_rx) = mpsc::unbounded_channel();
        let scheduler = scheduler.with_live_feed(live_tx);
        // The scheduler (and its live sender) drops when the scan ends
        let scan = tokio::spawn(async move { scheduler.run(candidates, reference_ip).await });

        ScanMonitorApp::new(Arc::clone(&stats), live_rx).run().await?;
        if !scan.is_finished() {
            println!("Dashboard closed; waiting for the scan to finish...");
        }
        scan.await??
    } else {
        let (done, reporter) =
            ProgressReporter::new(Arc::clone(&stats), config.progress_interval).spawn();
        let outcomes = scheduler.run(candidates, reference_ip).await;
        let _ = done.send(());
        reporter.await?;
        outcomes?
    };

    let builder = ReportBuilder::new(PriorityOrder::new(&config.priority_countries));
    let report = builder.build(&outcomes);
    if report.duplicates > 0 {
        info!("Dropped {} duplicate ip:port entries", report.duplicates);
    }

    let mut failed = Vec::new();
    for (label, proxies, path) in [
        ("alphabetical", &report.alphabetical, &config.alive_output),
        ("priority", &report.priority, &config.priority_output),
    ] {
        match CandidateParser::save_to_file(proxies, path) {
            Ok(()) => info!("Saved {} proxies to {:?} ({})", proxies.len(), path, label),
            Err(e) => {
                error!("Failed to save {} report: {:#}", label, e);
                failed.push(label);
            }
        }
    }

    let finished = Local::now();
    let snapshot = stats.snapshot();
    println!();
    println!("Started : {}", started.format("%Y-%m-%d %H:%M:%S"));
    println!("Finished: {}", finished.format("%Y-%m-%d %H:%M:%S"));
    println!("Elapsed : {}s", (finished - started).num_seconds());
    println!(
        "Checked {} of {} candidates, {} live ({} unique)",
        snapshot.checked,
        snapshot.total,
        snapshot.live,
        report.len()
    );
    println!("\nCountry distribution:");
    for (country, count) in builder.country_summary(&report.alphabetical) {
        println!("  {:<4} {}", if country.is_empty() { "??" } else { country.as_str() }, count);
    }

    if !failed.is_empty() {
        bail!("failed to write {} report(s)", failed.join(" and "));
    }
    Ok(())
}
