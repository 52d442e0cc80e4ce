use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};

use schemaforge::document::{load_document, validate, SchemaDocument};
use schemaforge::server::SchemaServer;
use schemaforge::sync::{HttpTransport, StoreTransport};

#[derive(Parser)]
#[command(
    name = "schemaforge",
    about = "Build and edit pipeline parameter schemas",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve a schema file for editing (local target) or send it to a
    /// running editor (remote target)
    Send {
        /// Path to the schema file (JSON/YAML)
        #[arg(default_value = "pipeline_schema.json")]
        schema_file: PathBuf,

        /// Address to serve the editing session on
        #[arg(long, short = 'u', default_value = "localhost:5173")]
        url: String,

        /// Enable debug logging
        #[arg(long, short = 'd')]
        debug: bool,
    },
    /// Validate a schema file and report the first violation
    Validate {
        /// Path to the schema file (JSON/YAML)
        schema_file: PathBuf,

        /// Enable debug logging
        #[arg(long, short = 'd')]
        debug: bool,
    },
}

fn init_logging(debug: bool) {
    let filter = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();
}

fn parse_listen_addr(url: &str) -> anyhow::Result<SocketAddr> {
    let trimmed = url
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/');
    let (host, port) = trimmed
        .split_once(':')
        .with_context(|| format!("expected host:port, got `{url}`"))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port in `{url}`"))?;
    let ip: IpAddr = if host == "localhost" {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        host.parse()
            .with_context(|| format!("invalid host in `{url}`"))?
    };
    Ok(SocketAddr::new(ip, port))
}

fn is_local_target(url: &str) -> bool {
    let trimmed = url
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    let host = trimmed
        .split(|c| c == ':' || c == '/')
        .next()
        .unwrap_or(trimmed);
    host == "localhost" || host == "127.0.0.1"
}

fn check_schema_file(schema_file: &Path) -> anyhow::Result<SchemaDocument> {
    let doc = load_document(schema_file)
        .with_context(|| format!("failed to load {}", schema_file.display()))?;
    validate(&doc).context("schema failed validation")?;
    Ok(doc)
}

/// Local targets get their own backing store; remote targets receive
/// the document over the save endpoint of an already-running one.
async fn run_send(schema_file: PathBuf, url: String) -> anyhow::Result<()> {
    if !schema_file.exists() {
        bail!("schema file not found: {}", schema_file.display());
    }
    let doc = check_schema_file(&schema_file)?;
    log::info!("✅ {} is valid", schema_file.display());

    if !is_local_target(&url) {
        let transport = HttpTransport::new(url.clone(), Duration::from_secs(30));
        transport
            .save_schema(&doc)
            .await
            .map_err(|e| anyhow!("failed to send schema to {url}: {e}"))?;
        log::info!("✅ Schema sent successfully to {url}");
        return Ok(());
    }

    let addr = parse_listen_addr(&url)?;
    let server = SchemaServer::new(schema_file);
    let (bound, serving) = server
        .bind(addr)
        .with_context(|| format!("failed to start the backing store on {addr}"))?;

    log::info!("Open http://{bound} in your browser to edit the schema");
    log::info!("Waiting for you to finish editing. Click 'Finish' when done...");

    tokio::select! {
        _ = serving => {
            log::info!("✅ Schema editing finished");
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupted, shutting down");
        }
    }
    Ok(())
}

fn run_validate(schema_file: PathBuf) -> anyhow::Result<()> {
    check_schema_file(&schema_file)?;
    log::info!("✅ All parameters are valid!");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Command::Send {
        schema_file: PathBuf::from("pipeline_schema.json"),
        url: "localhost:5173".to_string(),
        debug: false,
    });

    match command {
        Command::Send {
            schema_file,
            url,
            debug,
        } => {
            init_logging(debug);
            run_send(schema_file, url).await
        }
        Command::Validate { schema_file, debug } => {
            init_logging(debug);
            run_validate(schema_file)
        }
    }
}
