//! # orchflow
//!
//! Command-line front end for the protocol engine: issue calls, run
//! actions, and watch pushed events.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use orchflow_client::config::{is_ws_url, load_config, load_config_from_path};
use orchflow_client::logging::init_subscriber;
use orchflow_client::{Action, ClientConfig, Event, HandlerError, ListenerExit, OrchflowClient};
use serde_json::Value;
use tracing::{debug, info};

/// Talk to an Orchflow orchestrator over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "orchflow", about = "Orchflow orchestrator client")]
struct Cli {
    /// Orchestrator endpoint (overrides config).
    #[arg(long, global = true)]
    url: Option<String>,

    /// Config file (default `~/.orchflow/client.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `orchflow_client=trace` (overrides config).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Per-call deadline in milliseconds (overrides config).
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Call a method and print its result.
    Call {
        /// Remote method name.
        method: String,
        /// Parameters as a JSON object.
        #[arg(default_value = "{}")]
        params: String,
    },
    /// Run an action, e.g. `{"type":"run_command","pane_id":"p1","command":"ls"}`.
    Execute {
        /// Action as JSON.
        action: String,
    },
    /// Subscribe to event types and print each event as one JSON line.
    Watch {
        /// Event types, e.g. `pane_output command_completed`.
        #[arg(required = true)]
        events: Vec<String>,
    },
}

impl Cli {
    fn resolve_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => load_config_from_path(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => load_config().context("Failed to load config")?,
        };
        if let Some(url) = &self.url {
            if !is_ws_url(url) {
                bail!("--url must start with ws:// or wss://, got {url}");
            }
            config.url.clone_from(url);
        }
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
        if let Some(ms) = self.timeout_ms {
            config.call_timeout_ms = (ms > 0).then_some(ms);
        }
        Ok(config)
    }
}

fn parse_params(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("params must be valid JSON")?;
    if !value.is_object() {
        bail!("params must be a JSON object");
    }
    Ok(value)
}

fn parse_action(raw: &str) -> Result<Action> {
    serde_json::from_str(raw).context("action must be a JSON object with a known `type`")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;
    init_subscriber(&config.log_level);
    debug!(?config, "resolved config");

    let url = config.url.clone();
    let client = OrchflowClient::connect_with(config)
        .await
        .with_context(|| format!("Failed to connect to {url}"))?;

    let outcome = run(&client, cli.command).await;
    client.close().await;
    outcome
}

async fn run(client: &OrchflowClient, command: Command) -> Result<()> {
    match command {
        Command::Call { method, params } => {
            let result = client.call(&method, parse_params(&params)?).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Execute { action } => {
            let result = client.execute(&parse_action(&action)?).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Watch { events } => watch(client, &events).await?,
    }
    Ok(())
}

async fn watch(client: &OrchflowClient, events: &[String]) -> Result<()> {
    for event_type in events {
        let _ = client.on_event(event_type, |ev: Event| {
            println!("{}", ev.payload);
            async { Ok::<(), HandlerError>(()) }
        });
    }
    client.subscribe(events).await?;
    info!(?events, "watching");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("interrupted");
            Ok(())
        }
        exit = client.closed() => match exit {
            Some(ListenerExit::Cancelled { by_client: true }) | None => Ok(()),
            Some(exit) => bail!("{exit}"),
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
