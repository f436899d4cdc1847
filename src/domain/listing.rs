//! MLS listing metadata observed for a property.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Active,
    Pending,
    Sold,
    Withdrawn,
    Expired,
    Unknown,
}

impl Default for ListingStatus {
    fn default() -> Self {
        ListingStatus::Unknown
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListingInfo {
    pub mls_id: Option<String>,
    pub listing_date: Option<DateTime<Utc>>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub status: ListingStatus,
    pub agent: Option<String>,
    pub brokerage: Option<String>,
    pub urls: Vec<String>,
    pub description: Option<String>,
    pub photos: Vec<String>,
}

/// Listing status transitions are observed, never mutated in place (§4.12):
/// `active -> pending -> {sold, withdrawn, expired}`; any state reverts to
/// `unknown` if a later observation drops the field. This validates a
/// proposed transition is one the source is allowed to report, used by
/// collectors that want to log an anomalous jump rather than silently
/// trust it.
pub fn is_plausible_transition(from: ListingStatus, to: ListingStatus) -> bool {
    use ListingStatus::*;
    if to == Unknown || from == to {
        return true;
    }
    matches!(
        (from, to),
        (Active, Pending)
            | (Active, Sold)
            | (Active, Withdrawn)
            | (Active, Expired)
            | (Pending, Sold)
            | (Pending, Withdrawn)
            | (Pending, Expired)
            | (Unknown, _)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_to_pending_is_plausible() {
        assert!(is_plausible_transition(
            ListingStatus::Active,
            ListingStatus::Pending
        ));
    }

    #[test]
    fn sold_back_to_active_is_not_plausible() {
        assert!(!is_plausible_transition(
            ListingStatus::Sold,
            ListingStatus::Active
        ));
    }

    #[test]
    fn anything_can_drop_to_unknown() {
        assert!(is_plausible_transition(
            ListingStatus::Pending,
            ListingStatus::Unknown
        ));
    }
}
