//! Listener configuration.
//!
//! Where the server listens and where its stanza text comes from.

use crate::parser::parse;
use crate::stanza::StanzaTable;
use anyhow::Context;
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing::info;

/// Port used when none is given.
pub const DEFAULT_PORT: u16 = 8001;

/// Where stanza text is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StanzaSource {
    /// A stanza file
    File(PathBuf),
    /// Everything on standard input
    Stdin,
}

impl StanzaSource {
    /// Read the whole stanza text.
    pub fn read(&self) -> anyhow::Result<String> {
        match self {
            StanzaSource::File(path) => read_file(path),
            StanzaSource::Stdin => {
                let mut text = String::new();
                std::io::stdin()
                    .read_to_string(&mut text)
                    .context("Failed to read stanzas from standard input")?;
                Ok(text)
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            StanzaSource::File(path) => path.display().to_string(),
            StanzaSource::Stdin => "<stdin>".to_string(),
        }
    }
}

fn read_file(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read stanza file {}", path.display()))
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to listen on
    pub addr: SocketAddr,

    /// Stanza text source
    pub source: StanzaSource,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            source: StanzaSource::Stdin,
        }
    }
}

impl ServerConfig {
    /// Read and parse the stanza text. Any error aborts startup.
    pub fn load_table(&self) -> anyhow::Result<StanzaTable> {
        let source = self.source.describe();
        info!(source = %source, "Loading stanzas");

        let text = self.source.read()?;
        let table = parse(&text).with_context(|| format!("Invalid stanzas in {source}"))?;

        info!(
            routes = table.route_count(),
            rules = table.rule_count(),
            "Stanzas loaded"
        );
        Ok(table)
    }
}
