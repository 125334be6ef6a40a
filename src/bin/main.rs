use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mcp_gateway::{Gateway, GatewayConfig, OAuthConfig, serve_stdio};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mcp-gateway")]
#[command(about = "Gateway aggregating tools from remote MCP endpoints")]
struct Cli {
    /// Path to gateway.json (defaults to MCP_GATEWAY_CONFIG, then the XDG config dir, then ./gateway.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Accept invalid TLS certificates from endpoints and the token endpoint
    #[arg(long, global = true, default_value_t = false)]
    tls_skip_verify: bool,

    /// OAuth token endpoint for the client-credentials grant
    #[arg(long, global = true, env = "MCP_GATEWAY_OAUTH_TOKEN_URL")]
    oauth_token_url: Option<String>,

    #[arg(long, global = true, env = "MCP_GATEWAY_OAUTH_CLIENT_ID")]
    oauth_client_id: Option<String>,

    #[arg(long, global = true, env = "MCP_GATEWAY_OAUTH_CLIENT_SECRET", hide_env_values = true)]
    oauth_client_secret: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as an MCP stdio server (for use in mcp.json)
    Serve,
    /// List the allowed operations of every reachable endpoint
    ListTools,
    /// Invoke one operation by its qualified name
    Call {
        /// Qualified name, e.g. mcp_observer_get_traces
        name: String,
        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the MCP stdio protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("mcp_gateway=info".parse()?)
                .add_directive("rmcp=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    info!("Loaded {} MCP endpoint(s)", config.endpoints.len());

    let gateway = Gateway::from_config(config)?;
    let summary = gateway.initialize().await;
    for (name, reason) in &summary.failed {
        warn!("MCP endpoint `{}` unavailable at startup: {}", name, reason);
    }

    let outcome = run(&cli.command, &gateway).await;
    gateway.shutdown().await;
    outcome
}

async fn run(command: &Commands, gateway: &Gateway) -> Result<()> {
    match command {
        Commands::Serve => {
            serve_stdio(gateway.clone()).await?;
            info!("MCP stdio server session ended");
        }
        Commands::ListTools => {
            let operations = gateway.list_operations().await;
            if operations.is_empty() {
                println!("No operations available.");
                return Ok(());
            }

            for op in operations {
                println!("{}", op.qualified_name);
                if !op.description.is_empty() {
                    println!("    {}", op.description);
                }
                if !op.required.is_empty() {
                    println!("    Required: {}", op.required.join(", "));
                }
            }
        }
        Commands::Call { name, args } => {
            let output = gateway.invoke(name, args).await;
            if output.is_error {
                anyhow::bail!("{} failed: {}", name, output.text);
            }
            println!("{}", output.text);
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<GatewayConfig> {
    let mut config = match &cli.config {
        Some(path) => GatewayConfig::load_from(path)?,
        None => GatewayConfig::load()?,
    };

    if cli.tls_skip_verify {
        warn!("TLS certificate verification disabled");
        config.set_tls_skip_verify(true);
    }

    if let Some(token_url) = &cli.oauth_token_url {
        let existing = config.oauth.take();
        let client_id = cli
            .oauth_client_id
            .clone()
            .or_else(|| existing.as_ref().map(|o| o.client_id.clone()));
        let client_secret = cli
            .oauth_client_secret
            .clone()
            .or_else(|| existing.as_ref().map(|o| o.client_secret.clone()));

        let (Some(client_id), Some(client_secret)) = (client_id, client_secret) else {
            anyhow::bail!("--oauth-token-url requires a client id and client secret");
        };
        config.oauth = Some(OAuthConfig {
            token_url: token_url.clone(),
            client_id,
            client_secret,
        });
    }

    Ok(config)
}
