//! ldapgate - LDAP-backed HTTP Basic authentication gateway

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use clap::{Parser, Subcommand};
use ldapgate_core::{GatewayConfig, LoggingConfig};
use ldapgate_server::{EngineRoutes, GatewayServer};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ldapgate")]
#[command(author = "ldapgate Team")]
#[command(version = ldapgate_core::VERSION)]
#[command(about = "LDAP-backed HTTP Basic authentication gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, global = true, env = "LDAPGATE_CONFIG")]
    config: Option<String>,

    /// Bind address
    #[arg(long, env = "LDAPGATE_BIND_ADDRESS")]
    bind: Option<String>,

    /// Port number
    #[arg(short, long, env = "LDAPGATE_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LDAPGATE_LOG_LEVEL")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Server,

    /// Check one set of credentials against the directory
    Check {
        /// Username to check
        #[arg(short, long, requires = "password", conflicts_with = "header")]
        user: Option<String>,

        /// Password to check
        #[arg(long, env = "LDAPGATE_CHECK_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Raw Authorization header value
        #[arg(long)]
        header: Option<String>,

        /// Request path used to pick the route
        #[arg(long, default_value = "/")]
        path: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if matches!(cli.command, Some(Commands::Version)) {
        println!("ldapgate {}", ldapgate_core::VERSION);
        return Ok(());
    }

    // Load config, then let the environment and flags override it
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = GatewayConfig::from_file(path)?;
            config.apply_env();
            config
        }
        None => GatewayConfig::from_env(),
    };

    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_logging(&config.logging);

    match cli.command {
        Some(Commands::Check {
            user,
            password,
            header,
            path,
        }) => run_check(&config, user, password, header, &path).await,
        _ => run_server(config).await,
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn run_server(config: GatewayConfig) -> anyhow::Result<()> {
    info!("Starting ldapgate {}...", ldapgate_core::VERSION);
    info!("Directory: {}:{}", config.ldap.host, config.ldap.port);

    let server = GatewayServer::new(config);
    if let Err(e) = server.run().await {
        error!(code = e.code(), "ldapgate stopped with an error: {}", e);
        return Err(e.into());
    }

    Ok(())
}

async fn run_check(
    config: &GatewayConfig,
    user: Option<String>,
    password: Option<String>,
    header: Option<String>,
    path: &str,
) -> anyhow::Result<()> {
    let header = match (user, password) {
        (Some(user), Some(password)) => {
            Some(format!("Basic {}", BASE64.encode(format!("{}:{}", user, password))))
        }
        _ => header,
    };

    let routes = EngineRoutes::from_config(config).context("Invalid directory configuration")?;
    let engine = routes.select(path);

    let verdict = engine.authenticate(header.as_deref()).await;
    match verdict {
        ldapgate_auth::Verdict::Allow => {
            println!("allowed");
            Ok(())
        }
        ldapgate_auth::Verdict::Deny(reason) => anyhow::bail!("denied: {}", reason),
    }
}
