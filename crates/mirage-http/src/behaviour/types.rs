//! Per-request response behaviour.

use crate::config::DelayConfig;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// How the behaviour was finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BehaviourKind {
    /// Nothing decided yet
    #[default]
    Unset,
    /// Configured defaults fill in whatever was left blank
    Default,
    /// Values are used exactly as set; no defaults applied
    ShortCircuit,
}

impl fmt::Display for BehaviourKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BehaviourKind::Unset => f.write_str("unset"),
            BehaviourKind::Default => f.write_str("default"),
            BehaviourKind::ShortCircuit => f.write_str("short-circuit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BehaviourError {
    #[error("Response behaviour already configured as {0}")]
    AlreadyConfigured(BehaviourKind),
}

/// Artificial latency applied before the response is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceSimulation {
    Exact { delay_ms: u64 },
    Range { min_ms: u64, max_ms: u64 },
}

impl PerformanceSimulation {
    /// The delay to apply for one request.
    pub fn delay(&self) -> Duration {
        let ms = match *self {
            PerformanceSimulation::Exact { delay_ms } => delay_ms,
            PerformanceSimulation::Range { min_ms, max_ms } if min_ms < max_ms => {
                rand::thread_rng().gen_range(min_ms..=max_ms)
            }
            PerformanceSimulation::Range { min_ms, .. } => min_ms,
        };
        Duration::from_millis(ms)
    }
}

impl From<&DelayConfig> for PerformanceSimulation {
    fn from(config: &DelayConfig) -> Self {
        match config.exact {
            Some(delay_ms) => PerformanceSimulation::Exact { delay_ms },
            None => {
                let min_ms = config.min.unwrap_or(0);
                let max_ms = config.max.unwrap_or(min_ms);
                PerformanceSimulation::Range { min_ms, max_ms }
            }
        }
    }
}

/// What to send back for one request.
///
/// Built once per request. The kind may be finalized exactly once, through
/// [`using_default_behaviour`](Self::using_default_behaviour) or
/// [`skip_default_behaviour`](Self::skip_default_behaviour).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseBehaviour {
    kind: BehaviourKind,
    status_code: u16,
    response_file: Option<String>,
    response_data: Option<String>,
    response_headers: HashMap<String, String>,
    example_name: Option<String>,
    performance_simulation: Option<PerformanceSimulation>,
}

impl ResponseBehaviour {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(&self) -> BehaviourKind {
        self.kind
    }

    pub fn is_configured(&self) -> bool {
        self.kind != BehaviourKind::Unset
    }

    /// Zero means "not set".
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn response_file(&self) -> Option<&str> {
        self.response_file.as_deref()
    }

    pub fn response_data(&self) -> Option<&str> {
        self.response_data.as_deref()
    }

    pub fn response_headers(&self) -> &HashMap<String, String> {
        &self.response_headers
    }

    pub fn example_name(&self) -> Option<&str> {
        self.example_name.as_deref()
    }

    pub fn performance_simulation(&self) -> Option<PerformanceSimulation> {
        self.performance_simulation
    }

    pub fn with_status_code(&mut self, status_code: u16) -> &mut Self {
        self.status_code = status_code;
        self
    }

    pub fn with_file(&mut self, file: impl Into<String>) -> &mut Self {
        self.response_file = Some(file.into());
        self
    }

    pub fn with_data(&mut self, data: impl Into<String>) -> &mut Self {
        self.response_data = Some(data.into());
        self
    }

    /// Drop any file or inline body. Under default behaviour the configured
    /// ones still apply.
    pub fn with_empty(&mut self) -> &mut Self {
        self.response_file = None;
        self.response_data = None;
        self
    }

    pub fn with_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.response_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_example_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.example_name = Some(name.into());
        self
    }

    pub fn with_performance(&mut self, simulation: PerformanceSimulation) -> &mut Self {
        self.performance_simulation = Some(simulation);
        self
    }

    pub fn with_delay(&mut self, delay_ms: u64) -> &mut Self {
        self.with_performance(PerformanceSimulation::Exact { delay_ms })
    }

    pub fn with_delay_range(&mut self, min_ms: u64, max_ms: u64) -> &mut Self {
        self.with_performance(PerformanceSimulation::Range { min_ms, max_ms })
    }

    /// Let configured defaults fill any blank fields.
    pub fn using_default_behaviour(&mut self) -> Result<&mut Self, BehaviourError> {
        self.finalize(BehaviourKind::Default)
    }

    /// Use the values exactly as set.
    pub fn skip_default_behaviour(&mut self) -> Result<&mut Self, BehaviourError> {
        self.finalize(BehaviourKind::ShortCircuit)
    }

    fn finalize(&mut self, kind: BehaviourKind) -> Result<&mut Self, BehaviourError> {
        if self.is_configured() {
            return Err(BehaviourError::AlreadyConfigured(self.kind));
        }
        self.kind = kind;
        Ok(self)
    }

    /// A behaviour nobody finalized is treated as default.
    pub(crate) fn default_if_unset(&mut self) {
        if self.kind == BehaviourKind::Unset {
            self.kind = BehaviourKind::Default;
        }
    }

    pub(crate) fn fill_status_code(&mut self, status_code: u16) {
        if self.status_code == 0 {
            self.status_code = status_code;
        }
    }

    pub(crate) fn fill_file(&mut self, file: Option<&str>) {
        if is_blank(self.response_file.as_deref()) {
            if let Some(file) = file {
                self.response_file = Some(file.to_string());
            }
        }
    }

    pub(crate) fn fill_data(&mut self, data: Option<&str>) {
        if is_blank(self.response_data.as_deref()) {
            if let Some(data) = data {
                self.response_data = Some(data.to_string());
            }
        }
    }

    pub(crate) fn fill_headers(&mut self, headers: &HashMap<String, String>) {
        for (name, value) in headers {
            let present = self
                .response_headers
                .keys()
                .any(|existing| existing.eq_ignore_ascii_case(name));
            if !present {
                self.response_headers.insert(name.clone(), value.clone());
            }
        }
    }

    pub(crate) fn fill_example_name(&mut self, name: Option<&str>) {
        if is_blank(self.example_name.as_deref()) {
            if let Some(name) = name {
                self.example_name = Some(name.to_string());
            }
        }
    }

    pub(crate) fn fill_performance(&mut self, simulation: Option<PerformanceSimulation>) {
        if self.performance_simulation.is_none() {
            self.performance_simulation = simulation;
        }
    }
}

pub(crate) fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}
