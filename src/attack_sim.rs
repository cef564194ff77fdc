/// Forged DENM injection
///
/// Builds hazard messages that contradict what a receiving unit observes and
/// transmits them as a timed burst:
/// - Semantic inconsistency (sub-cause code 1)
/// - Non-semantic (sub-cause code 3)
/// - Random crash: sub-cause code 3 at a position projected ahead of the last
///   observed vehicle

pub mod forge;
pub mod orchestrator;

use crate::error::TransportError;
use crate::types::V2xFrame;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Attack selected by a `/start_attack` request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttackVariant {
    NoAttack,
    SemanticInconsistency,
    NonSemantic,
    /// Position spoof derived from the last awareness message
    RandomCrash,
}

impl AttackVariant {
    /// Map the request `attack_id`; anything unknown is a no-op
    pub fn from_id(attack_id: i64) -> Self {
        match attack_id {
            0 => AttackVariant::SemanticInconsistency,
            1 => AttackVariant::NonSemantic,
            2 => AttackVariant::RandomCrash,
            _ => AttackVariant::NoAttack,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            AttackVariant::NoAttack => -1,
            AttackVariant::SemanticInconsistency => 0,
            AttackVariant::NonSemantic => 1,
            AttackVariant::RandomCrash => 2,
        }
    }

    /// Sub-cause code carried by the forged DENM, `None` for no attack
    pub fn sub_cause_code(&self) -> Option<u8> {
        match self {
            AttackVariant::NoAttack => None,
            AttackVariant::SemanticInconsistency => Some(forge::SEMANTIC_SUB_CAUSE),
            AttackVariant::NonSemantic | AttackVariant::RandomCrash => {
                Some(forge::NON_SEMANTIC_SUB_CAUSE)
            }
        }
    }

    pub fn needs_position(&self) -> bool {
        matches!(self, AttackVariant::RandomCrash)
    }
}

impl fmt::Display for AttackVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttackVariant::NoAttack => write!(f, "No Attack"),
            AttackVariant::SemanticInconsistency => write!(f, "Semantic Inconsistency"),
            AttackVariant::NonSemantic => write!(f, "Non-semantic DENM"),
            AttackVariant::RandomCrash => write!(f, "Random Crash (position spoof)"),
        }
    }
}

/// Network-transport boundary used for injection
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, frame: &V2xFrame) -> Result<(), TransportError>;
}

/// Outcome of one burst
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstReport {
    pub variant: AttackVariant,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Send attempts, successful or not
    pub attempts: u32,
    pub send_failures: u32,
    /// Position stamped on the forged DENM (1e-7 degrees)
    pub latitude: i32,
    pub longitude: i32,
}

impl BurstReport {
    pub fn frames_sent(&self) -> u32 {
        self.attempts - self.send_failures
    }

    pub fn duration_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_mapping() {
        assert_eq!(AttackVariant::from_id(0), AttackVariant::SemanticInconsistency);
        assert_eq!(AttackVariant::from_id(1), AttackVariant::NonSemantic);
        assert_eq!(AttackVariant::from_id(2), AttackVariant::RandomCrash);
        assert_eq!(AttackVariant::from_id(3), AttackVariant::NoAttack);
        assert_eq!(AttackVariant::from_id(-1), AttackVariant::NoAttack);

        for id in -1..=2 {
            assert_eq!(AttackVariant::from_id(id).id(), id);
        }
    }

    #[test]
    fn test_sub_cause_codes() {
        assert_eq!(AttackVariant::SemanticInconsistency.sub_cause_code(), Some(1));
        assert_eq!(AttackVariant::NonSemantic.sub_cause_code(), Some(3));
        assert_eq!(AttackVariant::RandomCrash.sub_cause_code(), Some(3));
        assert_eq!(AttackVariant::NoAttack.sub_cause_code(), None);
        assert!(AttackVariant::RandomCrash.needs_position());
        assert!(!AttackVariant::NonSemantic.needs_position());
    }

    #[test]
    fn test_variant_display() {
        assert_eq!(
            format!("{}", AttackVariant::RandomCrash),
            "Random Crash (position spoof)"
        );
    }
}
