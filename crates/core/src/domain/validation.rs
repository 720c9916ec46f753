use crate::domain::GenerationId;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    Empty,
    GenerationMismatch {
        artifact: GenerationId,
        snapshot: GenerationId,
    },
    NotNewerThanPublished {
        candidate: GenerationId,
        published: GenerationId,
    },
    UnknownPlayer {
        rank: i32,
        player_id: i32,
    },
    DuplicatePlayer {
        player_id: i32,
        ranks: Vec<i32>,
    },
    RankGap {
        position: usize,
        expected: i32,
        found: i32,
    },
    OutOfOrder {
        rank: i32,
    },
    NonFiniteScore {
        rank: i32,
    },
    /// A concurrent publisher promoted an equal or newer generation first.
    Superseded {
        candidate: GenerationId,
        current: GenerationId,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "artifact has no picks"),
            Self::GenerationMismatch { artifact, snapshot } => write!(
                f,
                "artifact generation {artifact} does not match snapshot {snapshot}"
            ),
            Self::NotNewerThanPublished {
                candidate,
                published,
            } => write!(
                f,
                "generation {candidate} is not newer than published {published}"
            ),
            Self::UnknownPlayer { rank, player_id } => write!(
                f,
                "rank {rank}: player {player_id} is not in the snapshot"
            ),
            Self::DuplicatePlayer { player_id, ranks } => {
                write!(f, "player {player_id} appears more than once (ranks {ranks:?})")
            }
            Self::RankGap {
                position,
                expected,
                found,
            } => write!(
                f,
                "entry {position}: expected rank {expected}, found {found}"
            ),
            Self::OutOfOrder { rank } => {
                write!(f, "rank {rank} is not strictly ordered after rank {}", rank - 1)
            }
            Self::NonFiniteScore { rank } => write!(f, "rank {rank}: score is not finite"),
            Self::Superseded { candidate, current } => write!(
                f,
                "generation {candidate} lost promotion to {current}"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub generation: GenerationId,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}
