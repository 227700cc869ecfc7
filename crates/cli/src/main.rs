// Multirun CLI
//
// Design Decision: Use clap derive for argument parsing, every flag also bindable from env.
// Design Decision: Flags override the JSON options record, not the other way around.
// Design Decision: First Ctrl-C stops (drains in-flight checks), second Ctrl-C aborts.

mod console;
mod http_bot;
mod output;
mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use multirun_engine::data::DataPoolSpec;
use multirun_engine::hits::HitOutputSpec;
use multirun_engine::job::JobProxyMode;
use multirun_engine::proxy::{parse_proxy_lines, ProxySourceSpec, ProxyType};
use multirun_engine::{JobStatus, MultiRunJob, MultiRunJobOptions};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::console::ConsoleCommand;
use crate::http_bot::{CustomRule, HttpProbeBot};
use crate::output::OutputFormat;
use crate::telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "multirun")]
#[command(about = "Multirun - Run a bot against every line of a data pool")]
#[command(version)]
pub struct Cli {
    /// Output format for stats and reports
    #[arg(long, short, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a multi-run job until its data pool is exhausted
    Run(RunArgs),

    /// Validate a proxy list file
    ParseProxies {
        /// Proxy list file
        file: PathBuf,

        /// Protocol for lines that name none
        #[arg(long, value_enum, default_value_t = ProxyTypeArg::Http)]
        proxy_type: ProxyTypeArg,

        /// Fail when any line is malformed
        #[arg(long)]
        strict: bool,
    },
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// Data file, one line per check
    #[arg(long, env = "MULTIRUN_DATA", conflicts_with = "range")]
    pub data: Option<PathBuf>,

    /// Numeric range as start:amount[:step]
    #[arg(long, env = "MULTIRUN_RANGE")]
    pub range: Option<String>,

    /// Proxy list file
    #[arg(long, env = "MULTIRUN_PROXIES")]
    pub proxies: Option<PathBuf>,

    /// Protocol for proxy lines that name none
    #[arg(long, value_enum, default_value_t = ProxyTypeArg::Http)]
    pub proxy_type: ProxyTypeArg,

    /// Job options as inline JSON or a path to a JSON file
    #[arg(long, env = "MULTIRUN_OPTIONS")]
    pub options: Option<String>,

    /// Number of concurrent bots
    #[arg(long, env = "MULTIRUN_BOTS")]
    pub bots: Option<usize>,

    /// Lines to skip at the start of the data pool
    #[arg(long, env = "MULTIRUN_SKIP")]
    pub skip: Option<u64>,

    #[arg(long, value_enum, env = "MULTIRUN_PROXY_MODE")]
    pub proxy_mode: Option<ProxyModeArg>,

    /// Request URL; <input> is replaced by the URL-encoded line
    #[arg(long, env = "MULTIRUN_URL")]
    pub url: String,

    /// Body substring that marks a hit (repeatable)
    #[arg(long)]
    pub success: Vec<String>,

    /// Custom outcome as NAME=substring (repeatable)
    #[arg(long)]
    pub custom: Vec<CustomRule>,

    /// Status codes that mean the proxy is banned
    #[arg(long, value_delimiter = ',', default_value = "403,429")]
    pub ban_status: Vec<u16>,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "10")]
    pub timeout: u64,

    /// Directory for hit files, one file per hit kind
    #[arg(long, env = "MULTIRUN_HITS_DIR")]
    pub hits_dir: Option<PathBuf>,

    /// Seconds between stats lines, 0 to disable
    #[arg(long, default_value = "5")]
    pub stats_interval: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProxyTypeArg {
    Http,
    Socks4,
    Socks4a,
    Socks5,
}

impl From<ProxyTypeArg> for ProxyType {
    fn from(value: ProxyTypeArg) -> Self {
        match value {
            ProxyTypeArg::Http => ProxyType::Http,
            ProxyTypeArg::Socks4 => ProxyType::Socks4,
            ProxyTypeArg::Socks4a => ProxyType::Socks4a,
            ProxyTypeArg::Socks5 => ProxyType::Socks5,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProxyModeArg {
    Default,
    On,
    Off,
}

impl From<ProxyModeArg> for JobProxyMode {
    fn from(value: ProxyModeArg) -> Self {
        match value {
            ProxyModeArg::Default => JobProxyMode::Default,
            ProxyModeArg::On => JobProxyMode::On,
            ProxyModeArg::Off => JobProxyMode::Off,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_telemetry(TelemetryConfig::from_env());

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args, cli.output).await,
        Commands::ParseProxies {
            file,
            proxy_type,
            strict,
        } => parse_proxies(&file, proxy_type.into(), strict, cli.output).await,
    }
}

/// Parse `start:amount[:step]`
fn parse_range(value: &str) -> anyhow::Result<DataPoolSpec> {
    let parts: Vec<&str> = value.split(':').map(str::trim).collect();
    let (start, amount, step) = match parts.as_slice() {
        [start, amount] => (*start, *amount, "1"),
        [start, amount, step] => (*start, *amount, *step),
        _ => bail!("range must be start:amount[:step], got '{value}'"),
    };

    Ok(DataPoolSpec::Range {
        start: start.parse().with_context(|| format!("invalid range start '{start}'"))?,
        amount: amount.parse().with_context(|| format!("invalid range amount '{amount}'"))?,
        step: step.parse().with_context(|| format!("invalid range step '{step}'"))?,
        pad: false,
    })
}

/// Inline JSON when it looks like an object, otherwise a file path
fn load_options(value: &str) -> anyhow::Result<MultiRunJobOptions> {
    let json = if value.trim_start().starts_with('{') {
        value.to_string()
    } else {
        std::fs::read_to_string(value).with_context(|| format!("failed to read options file {value}"))?
    };
    serde_json::from_str(&json).context("invalid job options")
}

fn build_options(args: &RunArgs) -> anyhow::Result<MultiRunJobOptions> {
    let mut options = match &args.options {
        Some(value) => load_options(value)?,
        None => MultiRunJobOptions::new(),
    };

    if let Some(path) = &args.data {
        options.data_pool = DataPoolSpec::File { path: path.clone() };
    } else if let Some(range) = &args.range {
        options.data_pool = parse_range(range)?;
    } else if options.data_pool == DataPoolSpec::default() {
        bail!("no data: pass --data, --range or a data_pool in --options");
    }

    if let Some(path) = &args.proxies {
        options = options.with_proxy_source(ProxySourceSpec::File {
            path: path.clone(),
            default_type: args.proxy_type.into(),
        });
    }
    if let Some(mode) = args.proxy_mode {
        options.proxy_mode = mode.into();
    }
    if let Some(bots) = args.bots {
        options.bots = bots;
    }
    if let Some(skip) = args.skip {
        options = options.with_skip(skip);
    }
    if let Some(dir) = &args.hits_dir {
        options = options.with_hit_output(HitOutputSpec::File { dir: dir.clone() });
    }
    if options.hit_outputs.is_empty() {
        options = options.with_hit_output(HitOutputSpec::Log);
    }

    Ok(options)
}

async fn run(args: RunArgs, format: OutputFormat) -> anyhow::Result<()> {
    let options = build_options(&args)?;
    let bot = HttpProbeBot::new(&args.url, Duration::from_secs(args.timeout))?
        .with_success(args.success.clone())
        .with_custom(args.custom.clone())
        .with_ban_statuses(args.ban_status.clone());

    let job = MultiRunJob::new(options, Arc::new(bot))?;
    info!(job_id = %job.id(), bots = job.options().bots, "Starting job");
    job.start().await?;

    if format.is_text() {
        println!("{}", console::HELP);
    }

    let mut status = job.subscribe_status();
    let idle = status.wait_for(|s| *s == JobStatus::Idle);
    tokio::pin!(idle);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let stats_every = Duration::from_secs(args.stats_interval.max(1));
    let mut stats = tokio::time::interval_at(tokio::time::Instant::now() + stats_every, stats_every);
    let mut interrupts = 0u32;

    loop {
        tokio::select! {
            result = &mut idle => {
                result.context("job status channel closed")?;
                break;
            }
            _ = stats.tick(), if args.stats_interval > 0 => {
                format.print_stats(&job.snapshot())?;
            }
            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => handle_command(&job, &line).await,
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        stdin_open = false;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                interrupts += 1;
                let result = if interrupts == 1 {
                    info!("Stopping, press Ctrl-C again to abort");
                    job.stop().await
                } else {
                    info!("Aborting");
                    job.abort().await
                };
                if let Err(e) = result {
                    warn!(error = %e, "Interrupt ignored");
                }
            }
        }
    }

    output::print_report(format, &job.snapshot())
}

async fn handle_command(job: &MultiRunJob, line: &str) {
    let command: ConsoleCommand = match line.parse() {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}");
            return;
        }
    };

    match console::apply(job, command).await {
        Ok(message) => println!("{message}"),
        Err(e) => eprintln!("{e}"),
    }
}

async fn parse_proxies(
    file: &Path,
    default_type: ProxyType,
    strict: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let (proxies, errors) = parse_proxy_lines(&text, default_type);

    if format.is_text() {
        for proxy in &proxies {
            println!("{proxy}");
        }
        for error in &errors {
            eprintln!("{error}");
        }
        output::print_field("Valid", &proxies.len().to_string());
        output::print_field("Invalid", &errors.len().to_string());
    } else {
        format.print_value(&serde_json::json!({
            "proxies": proxies,
            "errors": errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
        }))?;
    }

    if strict && !errors.is_empty() {
        bail!("{} malformed proxy lines", errors.len());
    }
    Ok(())
}
