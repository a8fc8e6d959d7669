//! Command-line interface: starts the gateway and manages registered OAuth
//! clients directly against the TokenStore.
//!
//! The command set is fixed rather than metadata-driven, so this is a plain
//! `clap` derive CLI. Dependency wiring itself lives in
//! [`crate::utils::build_gateway`]; this module only parses arguments and
//! drives the serve/client dispatch.

use crate::admin::{self, AdminState};
use crate::config::Config;
use crate::error::Result;
use crate::mcp::McpServer;
use crate::model::RegisteredClient;
use crate::storage::create_token_store;
use crate::{http, signals, utils};
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "mxcp-gateway",
    version,
    about = "MCP-facing OAuth issuer, policy engine, and SQL execution gateway"
)]
struct Cli {
    /// Path to the gateway config file (JSON or YAML); defaults to
    /// `mxcp.config.json` in the working directory.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start serving tools, resources, and prompts.
    Serve {
        #[arg(long, value_enum, default_value = "http")]
        transport: ServeTransport,
    },
    /// Trigger a reload on a running gateway via its admin socket, without
    /// restarting the process.
    Reload,
    /// Load and validate the config and endpoint tree without serving
    /// (catches YAML/schema errors before an operator restarts the process).
    Validate,
    /// Manage registered OAuth clients directly against the TokenStore,
    /// bypassing the `/register` endpoint.
    Client {
        #[command(subcommand)]
        action: ClientCommand,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ServeTransport {
    Stdio,
    Http,
    /// Both the HTTP streamable transport and stdio, concurrently.
    Both,
}

#[derive(Subcommand)]
enum ClientCommand {
    /// Register a new client.
    Register {
        #[arg(long)]
        name: String,
        /// May be repeated or comma-separated.
        #[arg(long, value_delimiter = ',', required = true)]
        redirect_uri: Vec<String>,
        /// Public client (no client_secret issued; PKCE-only).
        #[arg(long)]
        public: bool,
    },
    /// Print a registered client's metadata.
    Show { client_id: String },
    /// Delete a registered client.
    Revoke { client_id: String },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Serve { transport } => run_serve(config, transport).await,
        Commands::Reload => run_reload(config).await,
        Commands::Validate => run_validate(config).await,
        Commands::Client { action } => run_client_command(config, action).await,
    }
}

/// Loads (and re-validates) the config, then loads the endpoint tree under
/// `config.endpoints_dir` the same way a reload would: any parse error or
/// duplicate endpoint name fails the whole load rather than serving a
/// partial tree. Never touches a running process.
async fn run_validate(config: Config) -> Result<()> {
    let endpoint_count = crate::registry::EndpointRegistry::load_from_dir(&config.endpoints_dir)?.len();
    println!("config ok; {endpoint_count} endpoint(s) loaded from {}", config.endpoints_dir);
    Ok(())
}

/// Sends `POST /reload` to the admin Unix socket of an already-running
/// gateway. A minimal hand-rolled HTTP/1.1 request over the raw socket is
/// enough here: the admin surface is loopback-only and the request/response
/// shape is one fixed call, not worth a client crate that understands
/// Unix-socket transports.
async fn run_reload(config: Config) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let path = &config.reload.admin_socket_path;
    let mut stream = tokio::net::UnixStream::connect(path)
        .await
        .map_err(|e| crate::error::GatewayError::config(format!("connecting to admin socket {path}: {e}")))?;

    stream
        .write_all(b"POST /reload HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
        .await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;

    let status_line = response.lines().next().unwrap_or("");
    println!("{status_line}");
    if let Some(body) = response.split("\r\n\r\n").nth(1) {
        println!("{body}");
    }
    if !status_line.contains("200") {
        return Err(crate::error::GatewayError::internal(format!("reload failed: {status_line}")));
    }
    Ok(())
}

async fn run_serve(config: Config, transport: ServeTransport) -> Result<()> {
    crate::telemetry::init(config.tracing.as_ref())?;

    let gateway = utils::build_gateway(config).await?;
    let reload = gateway.reload.clone();

    spawn_expiry_sweep(gateway.store.clone());

    let admin_state = Arc::new(AdminState::new(reload.clone(), gateway.store.clone()));
    let admin_socket_path = gateway.config.reload.admin_socket_path.clone();
    let admin_task = tokio::spawn(async move {
        if let Err(e) = admin::serve(admin_socket_path, admin_state).await {
            tracing::error!(error = %e, "admin interface exited");
        }
    });

    // stdio has no per-call Authorization header; an operator embedding the
    // gateway as a local Claude Desktop server can still scope it to one
    // identity via this environment variable. Admission still runs, just
    // against a fixed bearer instead of a per-request header.
    let stdio_bearer = std::env::var("MXCP_STDIO_BEARER").ok();
    let mcp = McpServer::new(gateway.engine.clone(), reload.clone(), stdio_bearer);

    let result = match transport {
        ServeTransport::Stdio => mcp.serve_stdio().await,
        ServeTransport::Http | ServeTransport::Both => {
            let auth_router = gateway.config.oauth.issuer_enabled.then(|| gateway.auth.clone());
            let router = http::build_router(mcp.clone(), auth_router, &gateway.config.http);
            let http_config = gateway.config.http.clone();
            let http_task = tokio::spawn(async move { http::serve(router, &http_config).await });

            let stdio_task = matches!(transport, ServeTransport::Both).then(|| {
                let mcp = mcp.clone();
                tokio::spawn(async move { mcp.serve_stdio().await })
            });

            signals::wait_for_shutdown(reload.clone()).await;
            signals::shutdown_grace_period(Duration::from_secs(gateway.config.reload.shutdown_grace_secs)).await;

            http_task.abort();
            if let Some(task) = stdio_task {
                task.abort();
            }
            Ok(())
        }
    };

    admin_task.abort();
    result
}

/// Periodically sweeps expired state records, authorization codes, and
/// sessions so the token store doesn't accumulate stale rows indefinitely.
fn spawn_expiry_sweep(store: Arc<dyn crate::storage::TokenStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match store.delete_expired().await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "swept expired oauth records"),
                Err(e) => tracing::error!(error = %e, "failed to sweep expired oauth records"),
            }
        }
    });
}

async fn run_client_command(config: Config, action: ClientCommand) -> Result<()> {
    let store = create_token_store(&config.storage).await?;

    match action {
        ClientCommand::Register { name, redirect_uri, public } => {
            let client_id = crate::model::new_uuid_v4().to_string();
            let client_secret = (!public).then(generate_client_secret);
            let client = RegisteredClient {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
                client_name: name,
                redirect_uris: redirect_uri,
                grant_types: vec!["authorization_code".to_string(), "refresh_token".to_string()],
                scope: String::new(),
                created_at: chrono::Utc::now(),
            };
            store.save_client(&client).await?;

            println!("client_id: {client_id}");
            if let Some(secret) = client_secret {
                println!("client_secret: {secret}");
            }
        }
        ClientCommand::Show { client_id } => match store.get_client(&client_id).await? {
            Some(client) => println!("{}", serde_json::to_string_pretty(&client)?),
            None => println!("no client registered with id {client_id}"),
        },
        ClientCommand::Revoke { client_id } => {
            store.delete_client(&client_id).await?;
            println!("revoked client {client_id}");
        }
    }
    Ok(())
}

fn generate_client_secret() -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
