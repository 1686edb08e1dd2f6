use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::RelayError;

// =============================================================================
// File config (figment-deserialized from defaults / geo-relay.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   geo-relay.toml:  [broadcast]
//                    tick_interval_ms = 500
//
//   env var:         GEO_RELAY_BROADCAST__TICK_INTERVAL_MS=500
//                    (double underscore = nesting)
//
//   CLI flag:        geo-relay serve --tick-ms 500

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "geo-relay.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "GEO_RELAY_";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub ingest: IngestFileConfig,
    #[serde(default)]
    pub broadcast: BroadcastFileConfig,
}

/// Producer-facing HTTP listener (lives under `[ingest]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_ingest_port")]
    pub port: u16,
}

impl Default for IngestFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_ingest_port(),
        }
    }
}

/// Consumer-facing WebSocket listener (lives under `[broadcast]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcastFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_broadcast_port")]
    pub port: u16,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_send_channel_capacity")]
    pub send_channel_capacity: usize,
}

impl Default for BroadcastFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_broadcast_port(),
            tick_interval_ms: default_tick_interval_ms(),
            send_channel_capacity: default_send_channel_capacity(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_ingest_port() -> u16 {
    8081
}
fn default_broadcast_port() -> u16 {
    8082
}
fn default_tick_interval_ms() -> u64 {
    1000
}
fn default_send_channel_capacity() -> usize {
    16
}

/// Build a figment that layers: defaults → TOML file → GEO_RELAY_* env vars.
///
/// An explicit `config_path` is used as given; otherwise `geo-relay.toml` in
/// the working directory is read if present. Missing files are skipped.
///
/// Env vars use double-underscore for nesting into sections:
///   `GEO_RELAY_INGEST__PORT=9000`  →  `ingest.port = 9000`
pub fn load_config(config_path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Values given on the command line; these win over every other layer.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub ingest_port: Option<u16>,
    pub broadcast_port: Option<u16>,
    pub tick_interval_ms: Option<u64>,
}

impl FileConfig {
    pub fn apply_overrides(&mut self, overrides: &CliOverrides) {
        if let Some(host) = &overrides.host {
            self.ingest.host = host.clone();
            self.broadcast.host = host.clone();
        }
        if let Some(port) = overrides.ingest_port {
            self.ingest.port = port;
        }
        if let Some(port) = overrides.broadcast_port {
            self.broadcast.port = port;
        }
        if let Some(ms) = overrides.tick_interval_ms {
            self.broadcast.tick_interval_ms = ms;
        }
    }
}

// =============================================================================
// Runtime config (derived from FileConfig, used throughout the relay)
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    pub ingest_addr: SocketAddr,
    pub broadcast_addr: SocketAddr,
    pub websocket: WebSocketConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// Period of each consumer's broadcast timer
    pub tick_interval: Duration,
    /// Outbound messages buffered per consumer before ticks are dropped
    pub send_channel_capacity: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(default_tick_interval_ms()),
            send_channel_capacity: default_send_channel_capacity(),
        }
    }
}

impl RelayConfig {
    pub fn from_file(fc: &FileConfig) -> Result<Self, RelayError> {
        if fc.broadcast.tick_interval_ms == 0 {
            return Err(RelayError::Config(
                "broadcast.tick_interval_ms must be greater than zero".into(),
            ));
        }
        if fc.broadcast.send_channel_capacity == 0 {
            return Err(RelayError::Config(
                "broadcast.send_channel_capacity must be greater than zero".into(),
            ));
        }
        Ok(Self {
            ingest_addr: socket_addr("ingest.host", &fc.ingest.host, fc.ingest.port)?,
            broadcast_addr: socket_addr("broadcast.host", &fc.broadcast.host, fc.broadcast.port)?,
            websocket: WebSocketConfig {
                tick_interval: Duration::from_millis(fc.broadcast.tick_interval_ms),
                send_channel_capacity: fc.broadcast.send_channel_capacity,
            },
        })
    }

    /// Both listeners on 127.0.0.1 with OS-assigned ports.
    pub fn loopback(tick_interval: Duration) -> Self {
        Self {
            ingest_addr: ([127, 0, 0, 1], 0).into(),
            broadcast_addr: ([127, 0, 0, 1], 0).into(),
            websocket: WebSocketConfig {
                tick_interval,
                ..Default::default()
            },
        }
    }
}

fn socket_addr(key: &str, host: &str, port: u16) -> Result<SocketAddr, RelayError> {
    let ip: IpAddr = host
        .parse()
        .map_err(|_| RelayError::Config(format!("{key} {host:?} is not an IP address")))?;
    Ok(SocketAddr::new(ip, port))
}
