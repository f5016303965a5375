//! Live progress of the executing item. Never persisted.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Preparing,
    Syncing,
    EnsuringTargets,
    VerifyingSources,
    Linking,
    RemovingStale,
    Committing,
    RollingBack,
}

impl ProgressPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::Syncing => "syncing",
            Self::EnsuringTargets => "ensuring targets",
            Self::VerifyingSources => "verifying sources",
            Self::Linking => "linking",
            Self::RemovingStale => "removing stale labels",
            Self::Committing => "committing",
            Self::RollingBack => "rolling back",
        }
    }
}

impl fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    pub phase: ProgressPhase,
    pub current_target: Option<String>,
}

impl Progress {
    pub fn new(current: usize, total: usize, phase: ProgressPhase) -> Self {
        Self {
            current,
            total,
            phase,
            current_target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.current_target = Some(target.into());
        self
    }
}
