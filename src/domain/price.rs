//! Price observations and the append-only history they form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::raw_record::Source;

pub const MAX_PRICE_HARD_CAP: f64 = 50_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceType {
    Listing,
    Sale,
    Estimate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceObservation {
    pub amount: f64,
    pub date: DateTime<Utc>,
    pub price_type: PriceType,
    pub source: Source,
    pub confidence: f32,
}

impl PriceObservation {
    pub fn is_plausible(&self) -> bool {
        self.amount >= 0.0 && self.amount <= MAX_PRICE_HARD_CAP
    }
}

/// The most recent observation by date, ties broken by later position in
/// the append-only list (i.e. later `collected_at` - §3 invariant).
pub fn latest(history: &[PriceObservation]) -> Option<&PriceObservation> {
    history
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.date.cmp(&b.date).then(ia.cmp(ib)))
        .map(|(_, obs)| obs)
}

/// `price_history` is sorted by date on read (§5 ordering guarantee); the
/// append-only storage order is left untouched.
pub fn sorted_by_date(history: &[PriceObservation]) -> Vec<PriceObservation> {
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|o| o.date);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn obs(amount: f64, date: DateTime<Utc>) -> PriceObservation {
        PriceObservation {
            amount,
            date,
            price_type: PriceType::Listing,
            source: Source::MlsScrape,
            confidence: 0.9,
        }
    }

    #[test]
    fn latest_picks_max_date() {
        let older = obs(300_000.0, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let newer = obs(310_000.0, Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
        let history = vec![older, newer.clone()];
        assert_eq!(latest(&history).unwrap().amount, newer.amount);
    }

    #[test]
    fn latest_breaks_ties_by_append_order() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let first = obs(300_000.0, t);
        let second = obs(305_000.0, t);
        let history = vec![first, second.clone()];
        assert_eq!(latest(&history).unwrap().amount, second.amount);
    }

    #[test]
    fn hard_cap_rejects_absurd_amounts() {
        let absurd = obs(60_000_000.0, Utc::now());
        assert!(!absurd.is_plausible());
    }
}
