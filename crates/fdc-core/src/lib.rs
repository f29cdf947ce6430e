use std::fmt;

use serde::{Deserialize, Serialize};

pub mod wire;

/// Lifecycle status of a tracked entity as reported by the debug channel.
///
/// The set is closed on purpose: the view keys icons and tones off it with a
/// plain `match`, and a payload carrying anything else fails decoding and is
/// dropped at the framing layer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    #[default]
    Loading,
    Running,
    Stopped,
    Error,
}

impl EntityStatus {
    pub fn label(self) -> &'static str {
        match self {
            EntityStatus::Loading => "loading",
            EntityStatus::Running => "running",
            EntityStatus::Stopped => "stopped",
            EntityStatus::Error => "error",
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
