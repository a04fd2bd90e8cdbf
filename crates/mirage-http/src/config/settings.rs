//! Engine-wide settings threaded through construction.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Where the request pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingMode {
    /// Everything runs on the task that accepted the request
    #[default]
    Sync,
    /// Script evaluation runs on the bounded script pool
    Offload,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenSettings {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

impl ListenSettings {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for ListenSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Script pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScriptPoolSettings {
    /// Number of worker threads (0 = auto-detect: num_cpus/2, min 2, max 16)
    #[serde(default = "default_script_pool_workers")]
    pub workers: usize,
    /// Maximum queue size for pending jobs
    #[serde(default = "default_script_pool_queue_size")]
    pub queue_size: usize,
    /// Timeout in milliseconds for a single job
    #[serde(default = "default_script_pool_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_script_pool_workers() -> usize {
    0
} // 0 = auto-detect

fn default_script_pool_queue_size() -> usize {
    1000
}

fn default_script_pool_timeout_ms() -> u64 {
    5000
}

impl Default for ScriptPoolSettings {
    fn default() -> Self {
        Self {
            workers: default_script_pool_workers(),
            queue_size: default_script_pool_queue_size(),
            timeout_ms: default_script_pool_timeout_ms(),
        }
    }
}

/// Settings that would otherwise be process-wide globals.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub listen: ListenSettings,
    #[serde(default)]
    pub mode: SchedulingMode,
    #[serde(default)]
    pub script_pool: ScriptPoolSettings,
    /// Environment snapshot exposed to scripts as `env`
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

impl EngineSettings {
    /// Capture the current process environment for scripts.
    pub fn with_process_environment(mut self) -> Self {
        self.environment = std::env::vars().collect();
        self
    }
}
