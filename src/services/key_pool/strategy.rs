//! Key selection strategies

use serde::{Deserialize, Serialize};

/// Strategy for picking the next key among the eligible set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Cursor-based rotation over the pool order
    RoundRobin,
    /// Uniform random pick among eligible keys; avoids the herd effect
    /// of strict rotation after a mass cooldown expires (default)
    #[default]
    Random,
}

impl SelectionStrategy {
    /// Parse from string (case-insensitive), falling back to the default
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "round_robin" | "roundrobin" => Self::RoundRobin,
            "random" => Self::Random,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoundRobin => write!(f, "round_robin"),
            Self::Random => write!(f, "random"),
        }
    }
}
