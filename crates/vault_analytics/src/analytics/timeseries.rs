//! Zero-filled event time series.

use crate::config::protocol::SECONDS_PER_DAY;
use crate::events::amount::decimal;
use crate::events::{EventKind, IndexedEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use time::macros::format_description;
use time::{Date, Month, OffsetDateTime};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    Hour,
    #[default]
    Day,
    Week,
    /// Calendar month, UTC.
    Month,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Hour => "hour",
            Interval::Day => "day",
            Interval::Week => "week",
            Interval::Month => "month",
        }
    }

    /// Start of the bucket containing `ts`.
    pub fn bucket_start(&self, ts: u64) -> u64 {
        match self.fixed_seconds() {
            Some(width) => ts - ts % width,
            None => month_start(ts),
        }
    }

    /// Start of the bucket after the one starting at `start`.
    pub fn next(&self, start: u64) -> u64 {
        match self.fixed_seconds() {
            Some(width) => start.saturating_add(width),
            None => next_month(start),
        }
    }

    fn fixed_seconds(&self) -> Option<u64> {
        match self {
            Interval::Hour => Some(3_600),
            Interval::Day => Some(SECONDS_PER_DAY),
            Interval::Week => Some(7 * SECONDS_PER_DAY),
            Interval::Month => None,
        }
    }

    /// Display label of a bucket.
    pub fn label(&self, start: u64) -> String {
        let dt = datetime(start);
        let formatted = match self {
            Interval::Hour => dt.format(format_description!("[year]-[month]-[day]T[hour]:00")),
            Interval::Day | Interval::Week => dt.format(format_description!("[year]-[month]-[day]")),
            Interval::Month => dt.format(format_description!("[year]-[month]")),
        };
        formatted.unwrap_or_else(|_| start.to_string())
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" => Ok(Interval::Hour),
            "day" => Ok(Interval::Day),
            "week" => Ok(Interval::Week),
            "month" => Ok(Interval::Month),
            other => Err(format!("unknown interval: {other}")),
        }
    }
}

pub(crate) fn datetime(ts: u64) -> OffsetDateTime {
    let secs = i64::try_from(ts).unwrap_or(i64::MAX);
    OffsetDateTime::from_unix_timestamp(secs).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

fn unix(date: Date) -> u64 {
    u64::try_from(date.midnight().assume_utc().unix_timestamp()).unwrap_or(0)
}

/// Midnight UTC on the first day of `year`/`month`.
pub(crate) fn month_start_of(year: i32, month: Month) -> u64 {
    Date::from_calendar_date(year, month, 1).map_or(u64::MAX, unix)
}

pub(crate) fn month_start(ts: u64) -> u64 {
    let date = datetime(ts).date();
    month_start_of(date.year(), date.month())
}

pub(crate) fn next_month(start: u64) -> u64 {
    let date = datetime(start).date();
    match date.month() {
        Month::December => month_start_of(date.year() + 1, Month::January),
        m => month_start_of(date.year(), m.next()),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    /// Mints plus match claims.
    Growth,
    /// Direct and delegated withdrawals.
    Withdrawal,
    /// Early redemptions, returned plus forfeited.
    Redemption,
}

impl SeriesKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesKind::Growth => "growth",
            SeriesKind::Withdrawal => "withdrawal",
            SeriesKind::Redemption => "redemption",
        }
    }

    /// Contribution of one event: `(amount, forfeited)`.
    fn contribution(&self, kind: &EventKind) -> Option<(u128, u128)> {
        match (self, kind) {
            (SeriesKind::Growth, EventKind::VaultMinted { collateral, .. }) => Some((*collateral, 0)),
            (SeriesKind::Growth, EventKind::MatchClaimed { amount, .. }) => Some((*amount, 0)),
            (SeriesKind::Withdrawal, EventKind::Withdrawn { amount, .. })
            | (SeriesKind::Withdrawal, EventKind::DelegatedWithdrawal { amount, .. }) => Some((*amount, 0)),
            (SeriesKind::Redemption, EventKind::EarlyRedemption { returned, forfeited, .. }) => {
                Some((returned.saturating_add(*forfeited), *forfeited))
            }
            _ => None,
        }
    }
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeriesKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "growth" => Ok(SeriesKind::Growth),
            "withdrawal" | "withdrawals" => Ok(SeriesKind::Withdrawal),
            "redemption" | "redemptions" => Ok(SeriesKind::Redemption),
            other => Err(format!("unknown series: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub bucket_start: u64,
    pub label: String,
    pub count: u64,
    #[serde(with = "decimal")]
    pub amount: u128,
    pub cumulative_count: u64,
    #[serde(with = "decimal")]
    pub cumulative_amount: u128,
    /// Percent change of the cumulative amount over the previous bucket.
    pub growth_rate: f64,
    /// Trailing mean of `amount`; `None` until the window is full.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moving_average: Option<f64>,
    /// Redemption series only.
    #[serde(
        with = "decimal::option",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub forfeited: Option<u128>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeries {
    pub kind: SeriesKind,
    pub interval: Interval,
    pub points: Vec<SeriesPoint>,
}

impl TimeSeries {
    pub fn amounts(&self) -> Vec<u128> {
        self.points.iter().map(|p| p.amount).collect()
    }

    /// Fill `moving_average` on every point.
    pub fn with_moving_average(mut self, window: usize) -> Self {
        let averages = moving_average(&self.amounts(), window);
        for (p, avg) in self.points.iter_mut().zip(averages) {
            p.moving_average = avg;
        }
        self
    }
}

#[derive(Default, Clone, Copy)]
struct Bucket {
    count: u64,
    amount: u128,
    forfeited: u128,
}

/// Bucket the events of `kind` by block timestamp. Buckets from the first to
/// the last contributing event are all present, empty ones as zero.
pub fn build_time_series(events: &[IndexedEvent], kind: SeriesKind, interval: Interval) -> TimeSeries {
    let mut buckets: BTreeMap<u64, Bucket> = BTreeMap::new();
    for ev in events {
        if let Some((amount, forfeited)) = kind.contribution(&ev.kind) {
            let b = buckets
                .entry(interval.bucket_start(ev.meta.block_timestamp))
                .or_default();
            b.count += 1;
            b.amount = b.amount.saturating_add(amount);
            b.forfeited = b.forfeited.saturating_add(forfeited);
        }
    }

    let mut points = Vec::new();
    if let (Some((&first, _)), Some((&last, _))) = (buckets.first_key_value(), buckets.last_key_value()) {
        let mut start = first;
        let (mut cum_count, mut cum_amount) = (0u64, 0u128);
        loop {
            let b = buckets.get(&start).copied().unwrap_or_default();
            let previous = cum_amount;
            cum_count += b.count;
            cum_amount = cum_amount.saturating_add(b.amount);
            points.push(SeriesPoint {
                bucket_start: start,
                label: interval.label(start),
                count: b.count,
                amount: b.amount,
                cumulative_count: cum_count,
                cumulative_amount: cum_amount,
                growth_rate: growth_rate(previous, cum_amount),
                moving_average: None,
                forfeited: (kind == SeriesKind::Redemption).then_some(b.forfeited),
            });
            let next = interval.next(start);
            if start >= last || next <= start {
                break;
            }
            start = next;
        }
    }
    TimeSeries {
        kind,
        interval,
        points,
    }
}

pub fn growth_series(events: &[IndexedEvent], interval: Interval) -> TimeSeries {
    build_time_series(events, SeriesKind::Growth, interval)
}

pub fn withdrawal_series(events: &[IndexedEvent], interval: Interval) -> TimeSeries {
    build_time_series(events, SeriesKind::Withdrawal, interval)
}

pub fn redemption_series(events: &[IndexedEvent], interval: Interval) -> TimeSeries {
    build_time_series(events, SeriesKind::Redemption, interval)
}

/// `(current - previous) / previous * 100`, 0 when `previous` is 0.
pub fn growth_rate(previous: u128, current: u128) -> f64 {
    if previous == 0 {
        return 0.0;
    }
    (current as f64 - previous as f64) / previous as f64 * 100.0
}

/// Rate of each value over its predecessor; the first is 0.
pub fn growth_rates(values: &[u128]) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    if let Some(first) = values.first() {
        out.push(growth_rate(0, *first));
    }
    out.extend(values.windows(2).map(|w| growth_rate(w[0], w[1])));
    out
}

/// Trailing mean over `window` values. Positions before the window fills
/// are `None`, so the output is as long as the input.
pub fn moving_average(values: &[u128], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }
    let mut out = vec![None; values.len().min(window - 1)];
    out.extend(values.windows(window).map(|w| {
        let total: f64 = w.iter().map(|&v| v as f64).sum();
        Some(total / window as f64)
    }));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventMeta;

    const DAY: u64 = SECONDS_PER_DAY;
    // 2025-03-10T00:00:00Z
    const T0: u64 = 1_741_564_800;
    const WHO: &str = "0x00000000000000000000000000000000000000a1";

    fn at(ts: u64, kind: EventKind) -> IndexedEvent {
        IndexedEvent {
            meta: EventMeta {
                block_number: ts / 12,
                block_timestamp: ts,
                transaction_hash: format!("0x{ts:064x}"),
                log_index: 0,
            },
            kind,
        }
    }

    fn mint(ts: u64, collateral: u128) -> IndexedEvent {
        at(
            ts,
            EventKind::VaultMinted {
                token_id: u128::from(ts),
                owner: WHO.into(),
                treasure_contract: WHO.into(),
                treasure_token_id: 1,
                collateral,
                collateral_token: None,
            },
        )
    }

    #[test]
    fn empty_buckets_are_zero_filled() {
        let events = vec![mint(T0 + 5, 100), mint(T0 + 3 * DAY, 50)];
        let s = growth_series(&events, Interval::Day);
        assert_eq!(s.points.len(), 4);
        let counts: Vec<u64> = s.points.iter().map(|p| p.count).collect();
        assert_eq!(counts, vec![1, 0, 0, 1]);
        assert_eq!(s.points[1].cumulative_amount, 100);
        assert_eq!(s.points[3].cumulative_amount, 150);
        assert_eq!(s.points[0].label, "2025-03-10");
        assert!((s.points[3].growth_rate - 50.0).abs() < 1e-9);
        assert_eq!(s.points[1].growth_rate, 0.0);
    }

    #[test]
    fn growth_includes_match_claims_and_ignores_other_kinds() {
        let events = vec![
            mint(T0, 100),
            at(T0 + 10, EventKind::MatchClaimed { token_id: 1, amount: 7 }),
            at(T0 + 20, EventKind::Withdrawn { token_id: 1, to: WHO.into(), amount: 3 }),
        ];
        let s = growth_series(&events, Interval::Hour);
        assert_eq!(s.points.len(), 1);
        assert_eq!(s.points[0].amount, 107);
        assert_eq!(withdrawal_series(&events, Interval::Hour).points[0].amount, 3);
    }

    #[test]
    fn redemption_amount_counts_forfeit() {
        let events = vec![at(
            T0,
            EventKind::EarlyRedemption {
                token_id: 1,
                owner: WHO.into(),
                returned: 60,
                forfeited: 40,
            },
        )];
        let s = redemption_series(&events, Interval::Week);
        assert_eq!(s.points[0].amount, 100);
        assert_eq!(s.points[0].forfeited, Some(40));
    }

    #[test]
    fn months_are_calendar_months() {
        // 2025-01-31 and 2025-03-01
        let events = vec![mint(1_738_281_600, 1), mint(1_740_787_200, 1)];
        let s = growth_series(&events, Interval::Month);
        let labels: Vec<&str> = s.points.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["2025-01", "2025-02", "2025-03"]);
        assert_eq!(s.points[1].bucket_start, 1_738_368_000);
    }

    #[test]
    fn december_rolls_into_next_year() {
        // 2024-12-15
        let start = Interval::Month.bucket_start(1_734_220_800);
        assert_eq!(Interval::Month.label(start), "2024-12");
        assert_eq!(Interval::Month.label(Interval::Month.next(start)), "2025-01");
    }

    #[test]
    fn growth_rates_treat_zero_prior_as_zero() {
        assert_eq!(growth_rates(&[]), Vec::<f64>::new());
        let rates = growth_rates(&[0, 10, 15, 0]);
        assert_eq!(rates[0], 0.0);
        assert_eq!(rates[1], 0.0);
        assert!((rates[2] - 50.0).abs() < 1e-9);
        assert!((rates[3] + 100.0).abs() < 1e-9);
    }

    #[test]
    fn moving_average_pads_with_none() {
        let avg = moving_average(&[2, 4, 6, 8], 3);
        assert_eq!(avg.len(), 4);
        assert_eq!(avg[0], None);
        assert_eq!(avg[1], None);
        assert_eq!(avg[2], Some(4.0));
        assert_eq!(avg[3], Some(6.0));
        assert_eq!(moving_average(&[1, 2], 5), vec![None, None]);
        assert_eq!(moving_average(&[1], 0), vec![None]);
    }

    #[test]
    fn interval_parses_case_insensitively() {
        assert_eq!("Week".parse::<Interval>().unwrap(), Interval::Week);
        assert!("fortnight".parse::<Interval>().is_err());
    }
}
