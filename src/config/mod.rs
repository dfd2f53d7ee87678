//! Device and transport configuration, plus the single persisted key/value
//! pair (speaker volume) named in the external interface contract.

pub mod paths;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use paths::get_data_dir;

/// How the capture gate decides when a session is "awake".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkMode {
    ManualSingleTalk,
    VadFreeTalk,
    AsrWakeupSingleTalk,
    AsrWakeupFreeTalk,
}

impl Default for WorkMode {
    fn default() -> Self {
        WorkMode::VadFreeTalk
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DeviceConfig {
    #[serde(default)]
    pub work_mode: WorkMode,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_bits_per_sample")]
    pub bits_per_sample: u16,
    /// 0-100, persisted under the `spk_volume` key.
    #[serde(default = "default_volume")]
    pub spk_volume: u8,
}

fn default_sample_rate() -> u32 {
    16_000
}
fn default_channels() -> u16 {
    1
}
fn default_bits_per_sample() -> u16 {
    16
}
fn default_volume() -> u8 {
    80
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            work_mode: WorkMode::default(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            bits_per_sample: default_bits_per_sample(),
            spk_volume: default_volume(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    pub uri: String,
    #[serde(default = "default_handshake_conn_timeout_ms")]
    pub handshake_conn_timeout_ms: u64,
    #[serde(default = "default_handshake_recv_timeout_ms")]
    pub handshake_recv_timeout_ms: u64,
    #[serde(default = "default_reconnect_wait_ms")]
    pub reconnect_wait_time_ms: u64,
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_time_ms: u64,
}

fn default_handshake_conn_timeout_ms() -> u64 {
    20_000
}
fn default_handshake_recv_timeout_ms() -> u64 {
    2_000
}
fn default_reconnect_wait_ms() -> u64 {
    5_000
}
fn default_keep_alive_ms() -> u64 {
    20_000
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            handshake_conn_timeout_ms: default_handshake_conn_timeout_ms(),
            handshake_recv_timeout_ms: default_handshake_recv_timeout_ms(),
            reconnect_wait_time_ms: default_reconnect_wait_ms(),
            keep_alive_time_ms: default_keep_alive_ms(),
        }
    }
}

/// Read `device_config.json` from the data directory.
pub fn read_device_config() -> DeviceConfig {
    read_json_file(&config_path()).unwrap_or_default()
}

pub fn config_path() -> PathBuf {
    get_data_dir().join("device_config.json")
}

/// Persist only `spk_volume` into `device_config.json`, preserving the rest
/// of the file's contents.
pub fn persist_spk_volume(volume: u8) -> anyhow::Result<()> {
    let mut cfg = read_device_config();
    cfg.spk_volume = volume;
    let dir = get_data_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(&cfg)?;
    std::fs::write(config_path(), json)?;
    Ok(())
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}
