// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Lifecycle state of a partition
///
/// Only `Stable` answers queries with full guarantees. `Receiving` and the
/// two transition states guard append paths; readers opening a partition in
/// one of those states get [`crate::Error::NotQueryable`] from the query
/// entry points.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum PartitionState {
    /// State could not be determined
    #[default]
    Unknown,

    /// Consistent on disk, queryable
    Stable,

    /// Rows are being appended
    Receiving,

    /// Append finished, header not yet rewritten
    PreTransition,

    /// Header rewritten, backup not yet synchronized
    PostTransition,
}

impl PartitionState {
    /// Parses a header state value, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_uppercase().as_str() {
            "UNKNOWN" => Self::Unknown,
            "STABLE" => Self::Stable,
            "RECEIVING" => Self::Receiving,
            "PRETRANSITION" => Self::PreTransition,
            "POSTTRANSITION" => Self::PostTransition,
            _ => return None,
        })
    }

    /// Returns the canonical header name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Stable => "STABLE",
            Self::Receiving => "RECEIVING",
            Self::PreTransition => "PRETRANSITION",
            Self::PostTransition => "POSTTRANSITION",
        }
    }

    /// Returns `true` if the query interface answers with full guarantees.
    #[must_use]
    pub fn is_queryable(self) -> bool {
        matches!(self, Self::Stable)
    }

    /// Returns `true` if `next` is a legal transition from `self`.
    ///
    /// The machine is `Unknown → Stable ↔ Receiving → PreTransition →
    /// PostTransition → Stable`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unknown, Self::Stable)
                | (Self::Stable, Self::Receiving)
                | (Self::Receiving, Self::Stable | Self::PreTransition)
                | (Self::PreTransition, Self::PostTransition)
                | (Self::PostTransition, Self::Stable)
        )
    }
}

impl std::fmt::Display for PartitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn state_machine_edges() {
        use PartitionState::{PostTransition, PreTransition, Receiving, Stable, Unknown};

        assert!(Unknown.can_transition_to(Stable));
        assert!(Stable.can_transition_to(Receiving));
        assert!(Receiving.can_transition_to(Stable));
        assert!(Receiving.can_transition_to(PreTransition));
        assert!(PreTransition.can_transition_to(PostTransition));
        assert!(PostTransition.can_transition_to(Stable));

        assert!(!Stable.can_transition_to(PostTransition));
        assert!(!Unknown.can_transition_to(Receiving));
        assert!(!PreTransition.can_transition_to(Stable));
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(
            Some(PartitionState::Stable),
            PartitionState::parse("stable")
        );
        assert_eq!(
            Some(PartitionState::PreTransition),
            PartitionState::parse("PreTransition")
        );
        assert_eq!(None, PartitionState::parse("bogus"));
    }
}
