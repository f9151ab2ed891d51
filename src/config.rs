//! Settings shared by the `spotswap` and `spotswap-server` executables.
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::{Result, SwapError};

/// where the server listens, and the client connects, unless told otherwise
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:4000";
/// default log level of both executables
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// the name of the marker file recording which engine owns a data directory
pub const ENGINE_FILE: &str = "engine";

/// The values every executable needs: a server address and a log level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// the server's `IP:PORT`
    pub addr: SocketAddr,
    /// the most verbose level that gets logged
    pub log_level: Level,
}

impl Settings {
    /// Parses and validates raw option values.
    ///
    /// # Errors
    /// `SwapError::Parsing` if either value is malformed
    pub fn build(addr: &str, log_level: &str) -> Result<Settings> {
        let addr = addr.parse().map_err(|_| {
            SwapError::Parsing(format!(
                "could not parse {} into an IP address and port",
                addr
            ))
        })?;
        let log_level = Level::from_str(log_level).map_err(|_| {
            SwapError::Parsing(format!(
                "unknown log level {}, expected one of trace, debug, info, warn, error",
                log_level
            ))
        })?;
        Ok(Settings { addr, log_level })
    }

    /// Installs a tracing subscriber that logs to STDERR at the configured level.
    pub fn init_logging(&self) {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(self.log_level)
            .with_writer(std::io::stderr)
            .finish();
        if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("could not install the log subscriber: {}", e);
        }
    }
}

/// The storage engines a server can run on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// the log-structured [`LogStore`](crate::LogStore)
    Kvs,
    /// the [`SledStore`](crate::SledStore)
    Sled,
    /// the volatile [`MemoryStore`](crate::MemoryStore)
    Memory,
}

impl EngineKind {
    /// every accepted engine name
    pub const NAMES: [&'static str; 3] = ["kvs", "sled", "memory"];

    /// the name used on the command line and in the marker file
    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Kvs => "kvs",
            EngineKind::Sled => "sled",
            EngineKind::Memory => "memory",
        }
    }

    /// whether the engine keeps data in a directory
    pub fn is_persistent(self) -> bool {
        self != EngineKind::Memory
    }

    /// Picks the engine for `data_dir`.
    ///
    /// A directory remembers the engine that first wrote to it. The requested engine, if
    /// any, must agree with it; with no request the remembered one (or `kvs`) is used.
    ///
    /// # Errors
    /// `SwapError::Parsing` when the request contradicts the marker file
    pub fn resolve(data_dir: &Path, requested: Option<EngineKind>) -> Result<EngineKind> {
        if requested == Some(EngineKind::Memory) {
            return Ok(EngineKind::Memory);
        }
        match (Self::recorded(data_dir)?, requested) {
            (None, requested) => Ok(requested.unwrap_or(EngineKind::Kvs)),
            (Some(current), None) => Ok(current),
            (Some(current), Some(requested)) if current == requested => Ok(current),
            (Some(current), Some(requested)) => Err(SwapError::Parsing(format!(
                "the requested engine: {} does not match the engine currently in use: {}",
                requested, current
            ))),
        }
    }

    /// The engine named by the marker file in `data_dir`, if there is a valid one.
    pub fn recorded(data_dir: &Path) -> Result<Option<EngineKind>> {
        let marker = data_dir.join(ENGINE_FILE);
        if !marker.exists() {
            return Ok(None);
        }
        match fs::read_to_string(marker)?.parse() {
            Ok(engine) => Ok(Some(engine)),
            Err(e) => {
                warn!("The content of the engine file is invalid: {}", e);
                Ok(None)
            }
        }
    }

    /// writes the marker file for persistent engines
    pub fn record(self, data_dir: &Path) -> Result<()> {
        if self.is_persistent() {
            fs::write(data_dir.join(ENGINE_FILE), self.as_str())?;
        }
        Ok(())
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "kvs" => Ok(EngineKind::Kvs),
            "sled" => Ok(EngineKind::Sled),
            "memory" => Ok(EngineKind::Memory),
            other => Err(SwapError::Parsing(format!(
                "unknown engine {}, expected one of: {}",
                other,
                EngineKind::NAMES.join(", ")
            ))),
        }
    }
}

/// The thread pools a server can serve its connections on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// [`NaiveThreadPool`](crate::NaiveThreadPool), a new thread per connection
    Naive,
    /// [`SharedQueueThreadPool`](crate::SharedQueueThreadPool)
    SharedQueue,
    /// [`RayonThreadPool`](crate::RayonThreadPool)
    Rayon,
}

impl PoolKind {
    /// every accepted pool name
    pub const NAMES: [&'static str; 3] = ["naive", "shared-queue", "rayon"];

    /// the name used on the command line
    pub fn as_str(self) -> &'static str {
        match self {
            PoolKind::Naive => "naive",
            PoolKind::SharedQueue => "shared-queue",
            PoolKind::Rayon => "rayon",
        }
    }
}

impl Default for PoolKind {
    fn default() -> Self {
        PoolKind::SharedQueue
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolKind {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self> {
        PoolKind::NAMES
            .iter()
            .zip([PoolKind::Naive, PoolKind::SharedQueue, PoolKind::Rayon])
            .find(|(name, _)| **name == s.trim())
            .map(|(_, kind)| kind)
            .ok_or_else(|| {
                SwapError::Parsing(format!(
                    "unknown thread pool {}, expected one of: {}",
                    s,
                    PoolKind::NAMES.join(", ")
                ))
            })
    }
}
