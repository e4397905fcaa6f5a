//! Selection policy
//!
//! Two tiers in priority order: the durable indexed engine (preferred) and
//! the key-value engine (legacy). Migration is only offered when the
//! preferred tier is usable and demonstrably empty while legacy holds data,
//! so existing preferred data is never overwritten.

use serde::{Deserialize, Serialize};

use codebox_storage::StorageBackend;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierState {
    pub loaded: bool,
    pub has_workspaces: bool,
}

impl TierState {
    pub fn of(backend: &dyn StorageBackend) -> Self {
        if !backend.loaded() {
            return Self::default();
        }
        Self {
            loaded: true,
            has_workspaces: backend.has_workspaces(),
        }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self {
            loaded: true,
            has_workspaces: false,
        }
    }

    pub fn populated() -> Self {
        Self {
            loaded: true,
            has_workspaces: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyInput {
    pub preferred: TierState,
    pub legacy: TierState,
    /// The preferred tier already holds a record of migrating from legacy
    pub migration_recorded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    UsePreferred,
    UseLegacy,
    /// Preferred is empty, legacy has data: the caller decides about backup
    /// and migration before the final selection.
    OfferMigration,
    Unsupported,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::UsePreferred => "use_preferred",
            Decision::UseLegacy => "use_legacy",
            Decision::OfferMigration => "offer_migration",
            Decision::Unsupported => "unsupported",
        }
    }
}

pub struct SelectionPolicy;

impl SelectionPolicy {
    pub fn decide(input: PolicyInput) -> Decision {
        let PolicyInput {
            preferred,
            legacy,
            migration_recorded,
        } = input;

        if preferred.loaded {
            if preferred.has_workspaces || !legacy.has_workspaces || migration_recorded {
                return Decision::UsePreferred;
            }
            return Decision::OfferMigration;
        }

        if legacy.loaded {
            return Decision::UseLegacy;
        }

        Decision::Unsupported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decide(preferred: TierState, legacy: TierState) -> Decision {
        SelectionPolicy::decide(PolicyInput {
            preferred,
            legacy,
            migration_recorded: false,
        })
    }

    #[test]
    fn test_both_usable() {
        assert_eq!(
            decide(TierState::populated(), TierState::populated()),
            Decision::UsePreferred
        );
        assert_eq!(
            decide(TierState::populated(), TierState::empty()),
            Decision::UsePreferred
        );
        assert_eq!(
            decide(TierState::empty(), TierState::empty()),
            Decision::UsePreferred
        );
        assert_eq!(
            decide(TierState::empty(), TierState::populated()),
            Decision::OfferMigration
        );
    }

    #[test]
    fn test_only_preferred_usable() {
        assert_eq!(
            decide(TierState::empty(), TierState::unavailable()),
            Decision::UsePreferred
        );
        assert_eq!(
            decide(TierState::populated(), TierState::unavailable()),
            Decision::UsePreferred
        );
    }

    #[test]
    fn test_only_legacy_usable() {
        assert_eq!(
            decide(TierState::unavailable(), TierState::populated()),
            Decision::UseLegacy
        );
        assert_eq!(
            decide(TierState::unavailable(), TierState::empty()),
            Decision::UseLegacy
        );
    }

    #[test]
    fn test_none_usable() {
        assert_eq!(
            decide(TierState::unavailable(), TierState::unavailable()),
            Decision::Unsupported
        );
    }

    #[test]
    fn test_recorded_migration_is_not_offered_again() {
        let decision = SelectionPolicy::decide(PolicyInput {
            preferred: TierState::empty(),
            legacy: TierState::populated(),
            migration_recorded: true,
        });
        assert_eq!(decision, Decision::UsePreferred);
    }

    #[test]
    fn test_has_workspaces_ignored_when_not_loaded() {
        let stale = TierState {
            loaded: false,
            has_workspaces: true,
        };
        assert_eq!(decide(stale, TierState::empty()), Decision::UseLegacy);
    }
}
