//! Link states and per-variable runtime state owned by the coordinator.

use std::collections::HashMap;
use std::fmt;

use crate::energy::EnergyAccumulator;

/// Connection state of a link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime record of one variable.
#[derive(Debug, Clone, Default)]
pub struct VariableState {
    /// When the last read request was sent, in ms since the epoch.
    pub last_request_ms: Option<i64>,
    /// Energy integration, used only for energy-tracked variables.
    pub energy: EnergyAccumulator,
}

/// Per-variable state, created lazily on first use and never removed.
#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    variables: HashMap<String, VariableState>,
}

impl RuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&VariableState> {
        self.variables.get(name)
    }

    /// The record of `name`, created on first access.
    pub fn entry(&mut self, name: &str) -> &mut VariableState {
        self.variables.entry(name.to_string()).or_default()
    }

    pub fn last_request_ms(&self, name: &str) -> Option<i64> {
        self.variables.get(name).and_then(|v| v.last_request_ms)
    }

    /// Forget every request timestamp so all variables are due again.
    ///
    /// Energy accumulators are left untouched.
    pub fn clear_request_times(&mut self) {
        for state in self.variables.values_mut() {
            state.last_request_ms = None;
        }
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}
