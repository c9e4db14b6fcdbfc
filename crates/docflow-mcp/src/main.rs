mod tools;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use docflow_core::config::{ApiConfig, RedisConfig, StorageConfig};
use docflow_engines::{default_registry, EngineBinaries};
use docflow_normalizer::DisabledUploader;
use docflow_service::AppState;
use docflow_store::{build_queue, TaskStore};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// The docflow MCP front end: the same store/queue/engine stack as the HTTP
/// API and the worker fleet, exposed as four tools over a newline-delimited
/// JSON-RPC stdio transport instead of HTTP.
#[derive(Debug, Parser)]
#[command(name = "docflow-mcp", version)]
struct Cli {
    #[command(flatten)]
    storage: StorageConfig,

    #[command(flatten)]
    redis: RedisConfig,

    #[command(flatten)]
    api: ApiConfig,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let store = Arc::new(TaskStore::connect(&cli.storage.database_path).await?);
    let queue = build_queue(store.clone(), "docflow-mcp".to_string(), Duration::from_secs(2), &cli.redis).await;
    let registry = Arc::new(default_registry(&EngineBinaries::default()));
    let uploader = Arc::new(DisabledUploader);
    let service = AppState::new(store, queue, registry, uploader);

    let http_client = reqwest::Client::builder().timeout(cli.api.download_timeout).build()?;

    let ctx = tools::McpContext {
        service,
        storage: cli.storage,
        http_client,
    };

    tracing::info!("docflow-mcp listening on stdio");
    run_stdio_loop(ctx).await
}

/// Every line on stdin is one JSON-RPC request; every response is one line
/// on stdout. stdout carries nothing else — all logging goes to stderr —
/// so a client reading line-by-line never has to disambiguate protocol
/// traffic from diagnostics.
async fn run_stdio_loop(ctx: tools::McpContext) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(&ctx, &line).await;
        let mut payload = serde_json::to_vec(&response)?;
        payload.push(b'\n');
        stdout.write_all(&payload).await?;
        stdout.flush().await?;
    }
    Ok(())
}

async fn handle_line(ctx: &tools::McpContext, line: &str) -> Value {
    let request: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(err) => {
            return json!({
                "jsonrpc": "2.0",
                "id": Value::Null,
                "error": { "code": -32700, "message": format!("parse error: {err}") }
            })
        }
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");

    match method {
        "initialize" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": "2024-11-05",
                "serverInfo": { "name": "docflow-mcp", "version": env!("CARGO_PKG_VERSION") },
                "capabilities": { "tools": {} }
            }
        }),
        "tools/list" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": { "tools": tools::tool_definitions() }
        }),
        "tools/call" => {
            let name = request.pointer("/params/name").and_then(|v| v.as_str()).unwrap_or("");
            let arguments = request
                .pointer("/params/arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));
            let outcome = tools::call_tool(ctx, name, arguments).await;
            json!({ "jsonrpc": "2.0", "id": id, "result": outcome.into_result() })
        }
        other => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": format!("unknown method: {other}") }
        }),
    }
}
