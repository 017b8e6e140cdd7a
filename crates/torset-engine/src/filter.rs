//! Eligibility predicate for reconciliation candidates.
//!
//! Rules are evaluated in a fixed order and the first applicable one decides.
//! The predicate is pure: the same snapshot and policy always produce the
//! same decision.

use serde::{Deserialize, Serialize};
use torset_config::Policy;
use torset_core::TorrentSnapshot;

/// Why a candidate was accepted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    /// Payload is not complete.
    NotCompleted,
    /// Carries a label from the exclusion list.
    ExcludedLabel,
    /// Carries the marker left by an earlier verified transfer.
    AlreadyTransferred,
    /// Saved under an excluded path prefix.
    ExcludedPath,
    /// Carries no labels and empty-label transfer is disabled.
    EmptyLabel,
    /// Carries none of the required labels.
    NotIncludedLabel,
    /// Category differs from the required one (or is absent).
    CategoryMismatch,
    /// Passed every rule.
    Matched,
}

impl FilterReason {
    /// Render the reason as its canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotCompleted => "not_completed",
            Self::ExcludedLabel => "excluded_label",
            Self::AlreadyTransferred => "already_transferred",
            Self::ExcludedPath => "excluded_path",
            Self::EmptyLabel => "empty_label",
            Self::NotIncludedLabel => "not_included_label",
            Self::CategoryMismatch => "category_mismatch",
            Self::Matched => "matched",
        }
    }
}

/// Result of evaluating one snapshot against the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDecision {
    /// Whether the candidate should be acted on.
    pub eligible: bool,
    /// The rule that decided.
    pub reason: FilterReason,
}

impl FilterDecision {
    const fn reject(reason: FilterReason) -> Self {
        Self {
            eligible: false,
            reason,
        }
    }

    const fn accept() -> Self {
        Self {
            eligible: true,
            reason: FilterReason::Matched,
        }
    }
}

/// Decide whether `snapshot` is a reconciliation candidate under `policy`.
///
/// An unlabelled torrent admitted through `allow_empty_label_transfer` is not
/// subject to the include-label rule, but the category rule still applies.
#[must_use]
pub fn matches(snapshot: &TorrentSnapshot, policy: &Policy) -> FilterDecision {
    if !snapshot.is_completed() {
        return FilterDecision::reject(FilterReason::NotCompleted);
    }
    if snapshot.labels.intersects(&policy.exclude_labels) {
        return FilterDecision::reject(FilterReason::ExcludedLabel);
    }
    if let Some(marker) = policy.transferred_label.as_deref()
        && snapshot.labels.contains(marker)
    {
        return FilterDecision::reject(FilterReason::AlreadyTransferred);
    }
    if policy
        .exclude_paths
        .iter()
        .any(|prefix| snapshot.save_path.starts_with(prefix.as_str()))
    {
        return FilterDecision::reject(FilterReason::ExcludedPath);
    }
    if snapshot.labels.is_empty() {
        if !policy.allow_empty_label_transfer {
            return FilterDecision::reject(FilterReason::EmptyLabel);
        }
    } else if !policy.include_labels.is_empty()
        && !snapshot.labels.intersects(&policy.include_labels)
    {
        return FilterDecision::reject(FilterReason::NotIncludedLabel);
    }
    if let Some(required) = policy.include_category.as_deref()
        && snapshot.category.as_deref() != Some(required)
    {
        return FilterDecision::reject(FilterReason::CategoryMismatch);
    }
    FilterDecision::accept()
}
