//! Recovery policy applied by the cleanup thread when an actor fails.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What the actor system does with a failed actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryPolicy {
    /// Respawn into the same slot under the same name with a new generation
    #[default]
    Restart,
    /// Unregister the actor permanently
    Stop,
    /// Unregister and spawn a fresh instance into any free slot
    Replace,
    /// Leave the failed instance registered; sends to it are rejected
    Ignore,
}

impl RecoveryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryPolicy::Restart => "restart",
            RecoveryPolicy::Stop => "stop",
            RecoveryPolicy::Replace => "replace",
            RecoveryPolicy::Ignore => "ignore",
        }
    }
}

impl fmt::Display for RecoveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
