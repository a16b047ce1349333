//! Component E -- Price-Window Optimizer (§4.1).
//!
//! A single online pass over the hourly price curve that locates the
//! earliest future moment at which grid charging should cease because the
//! following window is sharply more expensive than the one preceding it.

use chrono::{DateTime, FixedOffset};

use crate::domain::PriceSample;

/// Returns the earliest future timestamp at which charging should stop, or
/// `None` if the curve never sharply rises. Requires at least six samples;
/// evaluates indices `[3, len-2)` so each candidate has two neighbors on
/// both sides.
pub fn find_optimal_charge_end(
    prices: &[PriceSample],
    now: DateTime<FixedOffset>,
    threshold_1h: f64,
    threshold_3h: f64,
) -> Option<DateTime<FixedOffset>> {
    if prices.len() < 6 {
        return None;
    }

    for i in 3..prices.len().saturating_sub(2) {
        let sample = &prices[i];
        if sample.starts_at <= now {
            continue;
        }

        let p0 = prices[i].total;
        let p_m1 = prices[i - 1].total;
        let p_m2 = prices[i - 2].total;
        let p_p1 = prices[i + 1].total;
        let p_p2 = prices[i + 2].total;

        let sharp_rise = p0 > p_m1 * (1.0 + threshold_1h);
        let upcoming_window_pricier =
            (p_m2 + p_m1 + p0) < (p0 + p_p1 + p_p2) * (1.0 + threshold_3h);

        if sharp_rise && upcoming_window_pricier {
            return Some(sample.starts_at);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PriceLevel;
    use chrono::TimeZone;

    fn samples(prices: &[f64], start: DateTime<FixedOffset>) -> Vec<PriceSample> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &total)| PriceSample {
                starts_at: start + chrono::Duration::hours(i as i64),
                total,
                level: PriceLevel::Normal,
            })
            .collect()
    }

    fn base_time() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .unwrap()
    }

    #[test]
    fn monotone_constant_curve_never_fires() {
        let start = base_time();
        let prices = samples(&[1.0; 10], start);
        let result = find_optimal_charge_end(&prices, start - chrono::Duration::hours(1), 0.0, 0.0);
        assert!(result.is_none());
    }

    #[test]
    fn fewer_than_six_samples_returns_none() {
        let start = base_time();
        let prices = samples(&[1.0; 5], start);
        let result = find_optimal_charge_end(&prices, start - chrono::Duration::hours(1), 0.0, 0.0);
        assert!(result.is_none());
    }

    #[test]
    fn picks_earliest_sharp_rise() {
        let start = base_time();
        let prices = samples(&[1.0, 1.0, 1.0, 1.0, 10.0, 10.0, 10.0], start);
        let now = start - chrono::Duration::hours(1);
        let result = find_optimal_charge_end(&prices, now, 0.0, 0.0);
        assert_eq!(result, Some(prices[4].starts_at));
    }

    #[test]
    fn scenario_4_concrete_price_curve() {
        let start = base_time();
        let prices = samples(
            &[0.10, 0.10, 0.10, 0.11, 0.20, 0.22, 0.25],
            start,
        );
        let now = start - chrono::Duration::hours(1);
        let result = find_optimal_charge_end(&prices, now, 0.08, 0.08);
        assert_eq!(result, Some(prices[4].starts_at));
    }

    #[test]
    fn past_samples_are_never_candidates() {
        let start = base_time();
        let prices = samples(&[1.0, 1.0, 1.0, 1.0, 10.0, 10.0, 10.0], start);
        // now is already past the sharp rise at index 4
        let now = prices[4].starts_at + chrono::Duration::minutes(1);
        let result = find_optimal_charge_end(&prices, now, 0.0, 0.0);
        assert!(result.is_none());
    }
}
