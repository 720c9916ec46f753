use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version tag of one pipeline run's data.
///
/// Ordering is lexicographic: gameweek first, then the stamp. Field order matters for the
/// derived `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GenerationId {
    pub gameweek: i32,
    pub stamped_at: DateTime<Utc>,
}

impl GenerationId {
    /// Stamps are truncated to whole seconds so they survive a round trip through the store.
    pub fn new(gameweek: i32, stamped_at: DateTime<Utc>) -> Self {
        Self {
            gameweek,
            stamped_at: stamped_at.trunc_subsecs(0),
        }
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GW{}@{}",
            self.gameweek,
            self.stamped_at.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}
