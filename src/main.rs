use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use courier_broker::api::ApiServer;
use courier_broker::{Broker, Config};

/// Courier - command-and-result broker for remote devices
#[derive(Parser)]
#[command(name = "courier", version, about)]
struct Cli {
    /// Path to the config file (defaults to the XDG config dir)
    #[arg(short, long, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,

    /// Host to listen on
    #[arg(long, env = "COURIER_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "COURIER_PORT")]
    port: Option<u16>,

    /// Shared auth token (overrides config)
    #[arg(long, env = "COURIER_TOKEN")]
    token: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show devices, queue depths, and stored results of a running broker
    Status {
        /// Broker base URL
        #[arg(long, env = "COURIER_URL", default_value = "http://127.0.0.1:8955")]
        url: String,
        /// Token for the broker, if it is gated
        #[arg(long, env = "COURIER_TOKEN")]
        token: Option<String>,
    },
    /// Enqueue an action on a running broker
    Queue {
        /// Broker base URL
        #[arg(long, env = "COURIER_URL", default_value = "http://127.0.0.1:8955")]
        url: String,
        /// Token for the broker, if it is gated
        #[arg(long, env = "COURIER_TOKEN")]
        token: Option<String>,
        /// Device selector ("last" for the most recent device)
        #[arg(short, long, default_value = "last")]
        selector: String,
        /// Action name, e.g. "toast"
        action: String,
        /// JSON payload for the action
        #[arg(default_value = "{}")]
        payload: String,
        /// Time-to-live in seconds
        #[arg(long)]
        ttl: Option<u64>,
        /// Wait this many milliseconds for the result
        #[arg(short, long)]
        wait: Option<u64>,
    },
    /// Tail the diagnostic log of a device
    Logs {
        /// Broker base URL
        #[arg(long, env = "COURIER_URL", default_value = "http://127.0.0.1:8955")]
        url: String,
        /// Token for the broker, if it is gated
        #[arg(long, env = "COURIER_TOKEN")]
        token: Option<String>,
        /// Device id
        device_id: String,
        /// Number of lines to show
        #[arg(short, long, default_value = "50")]
        lines: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,courier_broker=info",
        1 => "info,courier_broker=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Status { url, token } => cmd_status(&url, token.as_deref()).await,
            Command::Queue {
                url,
                token,
                selector,
                action,
                payload,
                ttl,
                wait,
            } => cmd_queue(&url, token.as_deref(), &selector, &action, &payload, ttl, wait).await,
            Command::Logs {
                url,
                token,
                device_id,
                lines,
            } => cmd_logs(&url, token.as_deref(), &device_id, lines).await,
        };
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(host) = cli.host {
        config.listen_host = host;
    }
    if let Some(port) = cli.port {
        config.listen_port = port;
    }
    if let Some(token) = cli.token {
        config.auth_token = token;
    }
    tracing::debug!(
        host = %config.listen_host,
        port = config.listen_port,
        gated = config.token().is_some(),
        "loaded configuration"
    );

    let broker = Arc::new(Broker::new(config)?);
    let sweeper = broker.spawn_sweeper();

    let host = broker.config().listen_host.clone();
    let port = broker.config().listen_port;
    let result = ApiServer::new(Arc::clone(&broker), host, port).run().await;

    sweeper.abort();
    result?;
    Ok(())
}

fn client(token: Option<&str>) -> reqwest::Client {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Some(token) = token
        && let Ok(value) = format!("Bearer {token}").parse()
    {
        headers.insert(reqwest::header::AUTHORIZATION, value);
    }
    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .unwrap_or_default()
}

async fn cmd_status(url: &str, token: Option<&str>) -> anyhow::Result<()> {
    let response = client(token)
        .get(format!("{url}/status"))
        .send()
        .await?
        .error_for_status()?;
    let status: serde_json::Value = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn cmd_queue(
    url: &str,
    token: Option<&str>,
    selector: &str,
    action: &str,
    payload: &str,
    ttl: Option<u64>,
    wait: Option<u64>,
) -> anyhow::Result<()> {
    let payload: serde_json::Value = serde_json::from_str(payload)?;
    let http = client(token);
    let response = http
        .post(format!("{url}/queue"))
        .json(&serde_json::json!({
            "selector": selector,
            "action": action,
            "payload": payload,
            "ttl": ttl,
        }))
        .send()
        .await?
        .error_for_status()?;
    let queued: serde_json::Value = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&queued)?);

    if let Some(wait_ms) = wait {
        let Some(action_id) = queued["action_id"].as_str() else {
            anyhow::bail!("broker response missing action_id");
        };
        let result = http
            .get(format!("{url}/result"))
            .query(&[
                ("action_id", action_id),
                ("wait_ms", &wait_ms.to_string()),
            ])
            .send()
            .await?;
        if result.status() == reqwest::StatusCode::REQUEST_TIMEOUT {
            println!("no result within {wait_ms}ms");
        } else {
            let body: serde_json::Value = result.error_for_status()?.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }
    Ok(())
}

async fn cmd_logs(
    url: &str,
    token: Option<&str>,
    device_id: &str,
    lines: usize,
) -> anyhow::Result<()> {
    let response = client(token)
        .get(format!("{url}/logs"))
        .query(&[("device_id", device_id), ("limit", &lines.to_string())])
        .send()
        .await?
        .error_for_status()?;
    let body: serde_json::Value = response.json().await?;
    if let Some(logs) = body["logs"].as_array() {
        for line in logs {
            println!(
                "{} [{}] {}",
                line["ts"].as_str().unwrap_or(""),
                line["level"].as_str().unwrap_or("info"),
                line["text"].as_str().unwrap_or("")
            );
        }
    }
    Ok(())
}
