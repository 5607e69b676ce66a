//! # interconnect
//!
//! Command-line front end: run the demo interconnect and batch servers, or
//! make one-off session requests and batched calls against them.

#![deny(unsafe_code)]

mod client;
mod serve;

use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use interconnect_core::logging::{init_json_subscriber, init_subscriber};
use serde_json::Value;

/// Interconnect sessions and batched RPC.
#[derive(Parser, Debug)]
#[command(name = "interconnect", about = "Interconnect sessions and batched RPC", version)]
struct Cli {
    /// Log filter (overrides settings; `RUST_LOG` overrides both).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the WebSocket interconnect server and the HTTP batch server until Ctrl-C.
    Serve {
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,

        /// WebSocket port (overrides settings; 0 for auto-assign).
        #[arg(long)]
        ws_port: Option<u16>,

        /// HTTP batch port (overrides settings; 0 for auto-assign).
        #[arg(long)]
        http_port: Option<u16>,
    },

    /// Send one request over a WebSocket session and print the result.
    Call {
        /// Server URL, e.g. `ws://127.0.0.1:8788`.
        #[arg(long)]
        url: String,

        /// Method to call.
        #[arg(long)]
        method: String,

        /// JSON params.
        #[arg(long, default_value = "null", value_parser = parse_json)]
        params: Value,

        /// Reply deadline in milliseconds (defaults to settings).
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Issue calls concurrently through the batching client and print each outcome.
    Batch {
        /// Batch endpoint URL, e.g. `http://127.0.0.1:8787/rpc`.
        #[arg(long)]
        endpoint: String,

        /// A call as `name=<json payload>`; repeatable.
        #[arg(long = "call", value_parser = parse_call, required = true)]
        calls: Vec<(String, Value)>,

        /// A request header as `name=value`; repeatable.
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },
}

fn parse_json(raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))
}

/// `name=<json>`; a bare `name` calls with `null`.
fn parse_call(raw: &str) -> Result<(String, Value), String> {
    let (name, payload) = match raw.split_once('=') {
        Some((name, payload)) => (name, parse_json(payload)?),
        None => (raw, Value::Null),
    };
    if name.is_empty() {
        return Err("call name is empty".into());
    }
    Ok((name.to_string(), payload))
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_ascii_lowercase(), value.trim().to_string()))
        }
        _ => Err(format!("expected name=value, got {raw:?}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = interconnect_settings::get_settings();

    let level = cli.log_level.as_deref().unwrap_or(&settings.logging.level);
    if cli.json_logs || settings.logging.json {
        init_json_subscriber(level);
    } else {
        init_subscriber(level);
    }

    match cli.command {
        Command::Serve {
            host,
            ws_port,
            http_port,
        } => {
            let mut server = settings.server.clone();
            if let Some(host) = host {
                server.host = host;
            }
            if let Some(port) = ws_port {
                server.ws_port = port;
            }
            if let Some(port) = http_port {
                server.http_port = port;
            }
            serve::run(&server, &settings.session).await
        }
        Command::Call {
            url,
            method,
            params,
            timeout_ms,
        } => {
            let timeout = timeout_ms.map(Duration::from_millis);
            let result = client::call(&url, &method, params, timeout, &settings.session).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Command::Batch {
            endpoint,
            calls,
            headers,
        } => {
            let total = calls.len();
            let outcomes = client::batch(&endpoint, calls, &headers, &settings.batch).await?;
            let mut failed = 0;
            for (name, outcome) in outcomes {
                match outcome {
                    Ok(response) => println!("{name}: {}", response.data),
                    Err(e) => {
                        failed += 1;
                        println!("{name}: error {e}");
                    }
                }
            }
            if failed > 0 {
                bail!("{failed} of {total} calls failed");
            }
            Ok(())
        }
    }
}
