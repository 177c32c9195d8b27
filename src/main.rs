//! dumdum - CLI entry point

use anyhow::{Context, Result};
use clap::Parser;
use dumdum::{MockServer, ServerConfig, StanzaSource};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "dumdum",
    about = "Throwaway HTTP mock server - canned responses described in a small stanza grammar",
    version
)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = dumdum::config::DEFAULT_PORT)]
    port: u16,

    /// Address to bind
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// File containing stanzas (standard input when omitted)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Log every request at info level
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error); overrides --verbose
    #[arg(short = 'L', long)]
    log_level: Option<Level>,

    /// Parse the stanzas and exit
    #[arg(long)]
    validate: bool,

    /// Print the parsed stanza table as YAML and exit
    #[arg(long)]
    print_table: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = args
        .log_level
        .unwrap_or(if args.verbose { Level::INFO } else { Level::WARN });
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ServerConfig {
        addr: SocketAddr::new(args.bind, args.port),
        source: args.file.map_or(StanzaSource::Stdin, StanzaSource::File),
    };

    // A bad stanza file stops startup here
    let table = config.load_table()?;

    if args.validate {
        println!(
            "Stanzas are valid ({} routes, {} rules)",
            table.route_count(),
            table.rule_count()
        );
        return Ok(());
    }

    if args.print_table {
        print!("{}", serde_yaml::to_string(&table)?);
        return Ok(());
    }

    let listener = TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.addr))?;
    let server = Arc::new(MockServer::new(table));

    tokio::select! {
        result = Arc::clone(&server).serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!(requests = server.total_requests(), "Shutting down");
            eprintln!("\nBye.");
        }
    }

    Ok(())
}
