//! Xcat CLI - pay-per-use crawl tasks over MCP
//!
//! Usage:
//!   xcat tools                  List the Xcatcher tools the server exposes
//!   xcat balance                Show the account view (points balance)
//!   xcat run                    Create a task, paying if asked, and download the result
//!   xcat status <task_id>       Check a task once
//!   xcat download <task_id>     Download the result of an existing task
//!   xcat cancel <task_id>       Cancel a task

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use xcat_agent::{normalize_output, ClientInfo, McpClient, RestClient, ToolCatalog, Toolset};
use xcat_core::config::parse_users;
use xcat_core::fail_open::fail_open;
use xcat_core::{tool_names, IdempotencyKey, Network, TaskId, XcatConfig, XcatError};
use xcat_orchestrator::{
    EvidencePrompt, Handshake, HandshakeObserver, PaymentChallenge, MIN_TOPUP_USDC,
};

#[derive(Parser)]
#[command(name = "xcat")]
#[command(author, version, about = "Xcatcher crawl tasks with x402 top-up")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

/// Flags applied on top of the config file and environment
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Config file (defaults to .xcat/config.toml when present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Service base URL
    #[arg(long, global = true)]
    base: Option<String>,

    /// Crawl mode
    #[arg(long, global = true)]
    mode: Option<String>,

    /// Comma separated account handles
    #[arg(long, global = true)]
    users: Option<String>,

    /// Idempotency key for task creation
    #[arg(long, global = true)]
    idempotency_key: Option<String>,

    /// Settlement network (base or solana)
    #[arg(long, global = true)]
    network: Option<String>,

    /// Base transaction hash proving the top-up payment
    #[arg(long, global = true)]
    tx_hash: Option<String>,

    /// Solana signature proving the top-up payment
    #[arg(long, global = true)]
    signature: Option<String>,

    /// Directory for downloaded results
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Milliseconds between status polls
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,

    /// Milliseconds to wait for a result before giving up
    #[arg(long, global = true)]
    poll_timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the Xcatcher tools the server exposes
    Tools,

    /// Show the account view (points balance)
    Balance,

    /// Create a crawl task, top up if payment is required, wait and download
    Run,

    /// Check a task once
    Status {
        /// Task ID
        task_id: TaskId,
    },

    /// Download the result of an existing task
    Download {
        /// Task ID
        task_id: TaskId,
    },

    /// Cancel a task
    Cancel {
        /// Task ID
        task_id: TaskId,
    },
}

/// Exit code for command line usage errors (EX_USAGE)
const USAGE_EXIT_CODE: i32 = 64;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            std::process::exit(usage_exit_code(&err));
        }
    };

    if let Err(err) = run(cli).await {
        eprintln!("ERROR: {:#}", err);
        let code = err
            .downcast_ref::<XcatError>()
            .map(XcatError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

/// Help and version requests are not failures
fn usage_exit_code(err: &clap::Error) -> i32 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => USAGE_EXIT_CODE,
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Setup logging; stdout is reserved for JSON output
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.overrides)?;

    match cli.command {
        Commands::Tools => cmd_tools(&config).await,
        Commands::Balance => cmd_balance(&config).await,
        Commands::Run => cmd_run(config).await,
        Commands::Status { task_id } => {
            cmd_call_once(&config, tool_names::GET_TASK_STATUS, task_id).await
        }
        Commands::Download { task_id } => cmd_download(config, task_id).await,
        Commands::Cancel { task_id } => {
            cmd_call_once(&config, tool_names::CANCEL_TASK, task_id).await
        }
    }
}

fn load_config(overrides: Overrides) -> Result<XcatConfig> {
    let mut config = XcatConfig::load(overrides.config.as_deref())?;

    if let Some(base) = overrides.base {
        config.base_url = base.trim_end_matches('/').to_string();
    }
    if let Some(mode) = overrides.mode {
        config.mode = mode.to_lowercase();
    }
    if let Some(users) = overrides.users {
        let users = parse_users(&users);
        if !users.is_empty() {
            config.users = users;
        }
    }
    if let Some(key) = overrides.idempotency_key {
        config.idempotency_key = Some(IdempotencyKey::new(key));
    }
    if let Some(network) = overrides.network {
        config.network = network.to_lowercase();
    }
    if let Some(tx_hash) = overrides.tx_hash {
        config.tx_hash = Some(tx_hash);
    }
    if let Some(signature) = overrides.signature {
        config.signature = Some(signature);
    }
    if let Some(output_dir) = overrides.output_dir {
        config.output_dir = output_dir;
    }
    if let Some(interval_ms) = overrides.poll_interval_ms {
        config.polling.interval_ms = interval_ms;
    }
    if let Some(timeout_ms) = overrides.poll_timeout_ms {
        config.polling.timeout_ms = timeout_ms;
    }

    config.validate()?;
    Ok(config)
}

async fn connect(config: &XcatConfig) -> Result<McpClient> {
    let client = McpClient::connect_with(&config.mcp_url(), &config.api_key, client_info())
        .await
        .with_context(|| format!("Failed to open MCP session at {}", config.mcp_url()))?;
    info!(
        "Connected to {} {}",
        client.server_info().name,
        client.server_info().version
    );
    Ok(client)
}

/// Identity announced in `initialize`
fn client_info() -> ClientInfo {
    ClientInfo {
        name: "xcat".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

fn print_json(label: &str, value: &impl serde::Serialize) -> Result<()> {
    println!("{}:", label);
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_tools(config: &XcatConfig) -> Result<()> {
    let client = connect(config).await?;
    let listed = client.list_tools().await;
    fail_open("toolset.close", || client.close()).await;

    let catalog = ToolCatalog::from_tools(&listed?);
    if catalog.is_empty() {
        return Err(XcatError::NoTools.into());
    }
    for name in catalog.names() {
        println!("{}", name);
    }
    Ok(())
}

async fn cmd_balance(config: &XcatConfig) -> Result<()> {
    let rest = RestClient::new(&config.api_key)?;
    let me = rest.me(&config.me_url()).await?;
    print_json("BALANCE", &me)
}

async fn cmd_run(config: XcatConfig) -> Result<()> {
    println!("NOTES:");
    println!("  - minimum top-up is {} USDC", MIN_TOPUP_USDC);
    println!("  - payTo is quote-specific; always pay the address in the current quote");
    println!("  - mode={} users={}", config.mode, config.users.join(","));

    let rest = RestClient::new(&config.api_key)?;
    let me_url = config.me_url();
    if let Some(me) = fail_open("balance", || rest.me(&me_url)).await {
        print_json("BALANCE", &me)?;
    }

    let client = connect(&config).await?;
    let report = Handshake::new(
        config,
        Arc::new(client),
        Arc::new(rest),
        Arc::new(StdinPrompt),
    )
    .with_observer(Arc::new(PrintObserver))
    .run()
    .await?;

    print_json("DONE", &report)
}

async fn cmd_call_once(config: &XcatConfig, tool: &str, task_id: TaskId) -> Result<()> {
    let client = connect(config).await?;
    let response = client
        .call_tool(tool, json!({ "task_id": task_id }))
        .await;
    fail_open("toolset.close", || client.close()).await;

    print_json(tool, &normalize_output(&response?))
}

async fn cmd_download(config: XcatConfig, task_id: TaskId) -> Result<()> {
    let rest = RestClient::new(&config.api_key)?;
    let client = connect(&config).await?;
    let report = Handshake::new(
        config,
        Arc::new(client),
        Arc::new(rest),
        Arc::new(StdinPrompt),
    )
    .with_observer(Arc::new(PrintObserver))
    .resume_download(task_id)
    .await?;

    print_json("DONE", &report)
}

/// Reads payment evidence from stdin
struct StdinPrompt;

#[async_trait]
impl EvidencePrompt for StdinPrompt {
    async fn evidence(
        &self,
        network: Network,
        _challenge: &PaymentChallenge,
    ) -> xcat_core::Result<String> {
        let prompt = network.evidence_prompt();
        tokio::task::spawn_blocking(move || {
            print!("{}", prompt);
            std::io::stdout().flush()?;

            let mut line = String::new();
            let read = std::io::stdin().lock().read_line(&mut line)?;
            if read == 0 {
                return Err(XcatError::Other("stdin closed".to_string()));
            }
            Ok(line.trim().to_string())
        })
        .await
        .map_err(|e| XcatError::Other(format!("prompt task failed: {}", e)))?
    }
}

/// Prints each handshake step to stdout
struct PrintObserver;

impl PrintObserver {
    fn print(label: &str, value: &Value) {
        let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        println!("{}:\n{}", label, text);
    }
}

impl HandshakeObserver for PrintObserver {
    fn on_tools(&self, names: &[String]) {
        println!("TOOLS: {}", names.join(", "));
    }

    fn on_idempotency_key(&self, key: &IdempotencyKey) {
        println!("IDEMPOTENCY_KEY: {}", key);
    }

    fn on_response(&self, tool: &str, response: &Value) {
        Self::print(&tool.to_uppercase(), response);
    }

    fn on_challenge(&self, challenge: &PaymentChallenge) {
        Self::print("PAYMENT_REQUIRED", &challenge.summary());
    }

    fn on_saved(&self, task_id: TaskId, bytes: u64) {
        println!("SAVED: task {} ({} bytes)", task_id, bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "xcat",
            "status",
            "42",
            "--network",
            "solana",
            "--poll-interval-ms",
            "100",
            "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        assert_eq!(cli.overrides.network.as_deref(), Some("solana"));
        assert_eq!(cli.overrides.poll_interval_ms, Some(100));
        assert!(matches!(cli.command, Commands::Status { task_id } if task_id == TaskId(42)));
    }

    #[test]
    fn test_cli_rejects_bad_task_id() {
        assert!(Cli::try_parse_from(["xcat", "download", "abc"]).is_err());
        assert!(Cli::try_parse_from(["xcat", "cancel", "0"]).is_err());
    }

    #[test]
    fn test_cli_run_without_flags() {
        let cli = Cli::try_parse_from(["xcat", "run"]).unwrap();
        assert!(!cli.verbose);
        assert!(cli.overrides.config.is_none());
        assert!(matches!(cli.command, Commands::Run));
    }

    #[test]
    fn test_missing_api_key_exit_code() {
        let err: anyhow::Error = XcatError::MissingApiKey.into();
        let code = err
            .downcast_ref::<XcatError>()
            .map(XcatError::exit_code)
            .unwrap_or(1);
        assert_eq!(code, 2);
    }

    #[test]
    fn test_usage_errors_have_their_own_exit_code() {
        let unknown = Cli::try_parse_from(["xcat", "bogus"]).err().unwrap();
        assert_eq!(usage_exit_code(&unknown), 64);
        assert_ne!(usage_exit_code(&unknown), XcatError::MissingApiKey.exit_code());

        let bad_id = Cli::try_parse_from(["xcat", "status", "abc"]).err().unwrap();
        assert_eq!(usage_exit_code(&bad_id), 64);
    }

    #[test]
    fn test_help_and_version_exit_zero() {
        for args in [["xcat", "--help"], ["xcat", "--version"], ["xcat", "help"]] {
            let err = Cli::try_parse_from(args).err().unwrap();
            assert_eq!(usage_exit_code(&err), 0, "{:?}", args);
        }
    }

    #[test]
    fn test_client_info_names_the_cli() {
        let info = client_info();
        assert_eq!(info.name, "xcat");
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
    }
}
