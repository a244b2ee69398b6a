//! Mint-month cohorts and their retention.

use super::status::dormancy_state;
use super::timeseries::{datetime, month_start_of, next_month};
use crate::config::protocol::{SECONDS_PER_DAY, ZERO_ADDRESS};
use crate::events::amount::decimal;
use crate::events::{ClosureKind, DormancyState, EventKind, IndexedEvent, VaultLedger};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use time::Month;

/// Cohorts smaller than this are not eligible for best/worst.
pub const MIN_COHORT_SIZE: usize = 5;

/// Calendar month a vault was minted in. Written `YYYYMM`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CohortId {
    pub year: i32,
    /// 1 to 12.
    pub month: u8,
}

impl CohortId {
    pub fn from_timestamp(ts: u64) -> Self {
        let date = datetime(ts).date();
        Self {
            year: date.year(),
            month: u8::from(date.month()),
        }
    }

    /// First second of the cohort month, UTC.
    pub fn start(&self) -> u64 {
        Month::try_from(self.month).map_or(u64::MAX, |m| month_start_of(self.year, m))
    }

    /// e.g. `March 2025`.
    pub fn label(&self) -> String {
        match Month::try_from(self.month) {
            Ok(m) => format!("{m} {}", self.year),
            Err(_) => self.to_string(),
        }
    }
}

impl fmt::Display for CohortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

impl FromStr for CohortId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("cohort id must be YYYYMM: {s}"));
        }
        let year: i32 = s[..4].parse().map_err(|e| format!("cohort year: {e}"))?;
        let month: u8 = s[4..].parse().map_err(|e| format!("cohort month: {e}"))?;
        if !(1..=12).contains(&month) {
            return Err(format!("cohort month out of range: {s}"));
        }
        Ok(Self { year, month })
    }
}

impl Serialize for CohortId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CohortId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cohort {
    pub cohort: CohortId,
    pub label: String,
    pub mint_count: usize,
    /// Minted and not closed.
    pub active_count: usize,
    pub redeemed_count: usize,
    /// Closed by a dormancy claim.
    pub claimed_count: usize,
    /// `active / minted`, percent.
    pub retention_rate: f64,
    #[serde(with = "decimal")]
    pub total_collateral: u128,
    /// Minted collateral of the vaults still open.
    #[serde(with = "decimal")]
    pub active_collateral: u128,
    /// Over redeemed vaults only.
    pub avg_days_to_redemption: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortAnalysis {
    pub cohorts: Vec<Cohort>,
    pub overall_retention_rate: f64,
    pub best_cohort: Option<CohortId>,
    pub worst_cohort: Option<CohortId>,
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Mints of the log grouped by cohort: `(token_id, mint_timestamp, collateral)`.
fn cohort_members(events: &[IndexedEvent]) -> BTreeMap<CohortId, Vec<(u128, u64, u128)>> {
    let mut cohorts: BTreeMap<CohortId, Vec<(u128, u64, u128)>> = BTreeMap::new();
    for ev in events {
        if let EventKind::VaultMinted {
            token_id,
            collateral,
            ..
        } = &ev.kind
        {
            let ts = ev.meta.block_timestamp;
            cohorts
                .entry(CohortId::from_timestamp(ts))
                .or_default()
                .push((*token_id, ts, *collateral));
        }
    }
    cohorts
}

pub fn build_cohort_analysis(events: &[IndexedEvent]) -> CohortAnalysis {
    let ledger = VaultLedger::replay(events, ZERO_ADDRESS);
    let mut analysis = CohortAnalysis::default();
    let (mut minted, mut active) = (0usize, 0usize);

    for (id, members) in cohort_members(events) {
        let mut c = Cohort {
            cohort: id,
            label: id.label(),
            mint_count: members.len(),
            active_count: 0,
            redeemed_count: 0,
            claimed_count: 0,
            retention_rate: 0.0,
            total_collateral: 0,
            active_collateral: 0,
            avg_days_to_redemption: 0.0,
        };
        let mut redemption_seconds: u128 = 0;
        for (token_id, minted_at, collateral) in members {
            c.total_collateral = c.total_collateral.saturating_add(collateral);
            match ledger.closure(token_id) {
                Some(closure) if closure.kind == ClosureKind::EarlyRedemption => {
                    c.redeemed_count += 1;
                    redemption_seconds += u128::from(closure.at.saturating_sub(minted_at));
                }
                Some(_) => c.claimed_count += 1,
                None => {
                    c.active_count += 1;
                    c.active_collateral = c.active_collateral.saturating_add(collateral);
                }
            }
        }
        c.retention_rate = percent(c.active_count, c.mint_count);
        if c.redeemed_count > 0 {
            c.avg_days_to_redemption =
                redemption_seconds as f64 / SECONDS_PER_DAY as f64 / c.redeemed_count as f64;
        }
        minted += c.mint_count;
        active += c.active_count;
        analysis.cohorts.push(c);
    }

    let eligible: Vec<&Cohort> = analysis
        .cohorts
        .iter()
        .filter(|c| c.mint_count >= MIN_COHORT_SIZE)
        .collect();
    let best = eligible.iter().copied().fold(None::<&Cohort>, |best, c| match best {
        Some(b) if b.retention_rate >= c.retention_rate => Some(b),
        _ => Some(c),
    });
    let worst = eligible.iter().copied().fold(None::<&Cohort>, |worst, c| match worst {
        Some(w) if w.retention_rate <= c.retention_rate => Some(w),
        _ => Some(c),
    });
    let (best, worst) = (best.map(|c| c.cohort), worst.map(|c| c.cohort));
    analysis.best_cohort = best;
    analysis.worst_cohort = worst;
    analysis.overall_retention_rate = percent(active, minted);
    analysis
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionRow {
    pub cohort: CohortId,
    pub label: String,
    pub size: usize,
    /// Percent of the cohort retained at each month offset.
    pub retention: Vec<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionMatrix {
    pub now: u64,
    pub rows: Vec<RetentionRow>,
}

/// Retention per cohort at `t_k = cohort start + k months` for every
/// `t_k <= now`.
///
/// The denominator is the whole cohort. A vault not yet minted at `t_k` is
/// retained, a vault closed at or before `t_k` is not, and an open vault is
/// retained unless its dormancy state at `t_k` is claimable. State comes from
/// replaying the events with timestamp `<= t_k`, so offset 0 is always 100.
pub fn retention_matrix(events: &[IndexedEvent], now: u64) -> RetentionMatrix {
    let cohorts = cohort_members(events);
    let mut rows: Vec<RetentionRow> = cohorts
        .iter()
        .map(|(id, members)| RetentionRow {
            cohort: *id,
            label: id.label(),
            size: members.len(),
            retention: Vec::new(),
        })
        .collect();
    let Some(first) = cohorts.keys().next() else {
        return RetentionMatrix { now, rows };
    };

    let mut ledger = VaultLedger::new(ZERO_ADDRESS);
    let mut applied = 0usize;
    let mut reference = first.start();
    while reference <= now {
        while let Some(ev) = events.get(applied) {
            if ev.meta.block_timestamp > reference {
                break;
            }
            ledger.apply(ev);
            applied += 1;
        }
        for (row, members) in rows.iter_mut().zip(cohorts.values()) {
            if row.cohort.start() > reference {
                continue;
            }
            let retained = members
                .iter()
                .filter(|&&(token_id, _, _)| match ledger.get(token_id) {
                    Some(v) => dormancy_state(v, reference) != DormancyState::Claimable,
                    None => ledger.closure(token_id).is_none(),
                })
                .count();
            row.retention.push(percent(retained, members.len()));
        }
        let next = next_month(reference);
        if next <= reference {
            break;
        }
        reference = next;
    }
    RetentionMatrix { now, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::protocol::{DORMANCY_THRESHOLD, GRACE_PERIOD};
    use crate::events::EventMeta;

    const WHO: &str = "0x00000000000000000000000000000000000000a1";
    // 2025-03-01T00:00:00Z
    const MARCH: u64 = 1_740_787_200;
    // 2025-04-01T00:00:00Z
    const APRIL: u64 = 1_743_465_600;
    // 2025-05-01T00:00:00Z
    const MAY: u64 = 1_746_057_600;

    fn at(ts: u64, kind: EventKind) -> IndexedEvent {
        IndexedEvent {
            meta: EventMeta {
                block_number: ts,
                block_timestamp: ts,
                transaction_hash: format!("0x{ts:064x}"),
                log_index: 0,
            },
            kind,
        }
    }

    fn mint(ts: u64, token_id: u128) -> IndexedEvent {
        at(
            ts,
            EventKind::VaultMinted {
                token_id,
                owner: WHO.into(),
                treasure_contract: WHO.into(),
                treasure_token_id: token_id,
                collateral: 100,
                collateral_token: None,
            },
        )
    }

    fn redeem(ts: u64, token_id: u128) -> IndexedEvent {
        at(
            ts,
            EventKind::EarlyRedemption {
                token_id,
                owner: WHO.into(),
                returned: 90,
                forfeited: 10,
            },
        )
    }

    #[test]
    fn cohort_id_round_trips() {
        let id: CohortId = "202503".parse().unwrap();
        assert_eq!(id.year, 2025);
        assert_eq!(id.month, 3);
        assert_eq!(id.to_string(), "202503");
        assert_eq!(id.label(), "March 2025");
        assert_eq!(id.start(), MARCH);
        assert_eq!(CohortId::from_timestamp(MARCH + 86_400 * 10), id);
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"202503\"");
    }

    #[test]
    fn bad_cohort_ids_are_rejected() {
        assert!("2025-3".parse::<CohortId>().is_err());
        assert!("202513".parse::<CohortId>().is_err());
        assert!("202500".parse::<CohortId>().is_err());
    }

    #[test]
    fn analysis_counts_redemptions_per_cohort() {
        let mut events: Vec<IndexedEvent> = (1..=5).map(|i| mint(MARCH + i as u64, i)).collect();
        events.push(mint(APRIL + 1, 6));
        events.push(redeem(MARCH + 10 * SECONDS_PER_DAY + 1, 1));
        events.sort_by_key(|e| e.meta.block_timestamp);

        let a = build_cohort_analysis(&events);
        assert_eq!(a.cohorts.len(), 2);
        let march = &a.cohorts[0];
        assert_eq!(march.mint_count, 5);
        assert_eq!(march.redeemed_count, 1);
        assert_eq!(march.active_count, 4);
        assert_eq!(march.active_collateral, 400);
        assert!((march.retention_rate - 80.0).abs() < 1e-9);
        assert!((march.avg_days_to_redemption - 10.0).abs() < 1e-9);
        assert_eq!(a.best_cohort, a.worst_cohort);
        assert_eq!(a.best_cohort.map(|c| c.to_string()), Some("202503".to_string()));
        assert!((a.overall_retention_rate - 500.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn retention_matrix_is_triangular() {
        let events = vec![
            mint(MARCH, 1),
            mint(MARCH + 5, 2),
            mint(APRIL + 5, 3),
            redeem(APRIL - 1, 2),
        ];
        let mut events = events;
        events.sort_by_key(|e| e.meta.block_timestamp);
        let m = retention_matrix(&events, MAY);
        assert_eq!(m.rows.len(), 2);
        // March: offsets at Mar 1, Apr 1, May 1
        assert_eq!(m.rows[0].retention, vec![100.0, 50.0, 50.0]);
        // April: token 3 is minted after Apr 1 and still counts as retained
        assert_eq!(m.rows[1].retention, vec![100.0, 100.0]);
    }

    #[test]
    fn first_offset_is_full_before_any_mint() {
        // 2025-03-02 mint, read on 2025-04-10
        let events = vec![mint(MARCH + SECONDS_PER_DAY, 1)];
        let m = retention_matrix(&events, APRIL + 9 * SECONDS_PER_DAY);
        assert_eq!(m.rows[0].retention, vec![100.0, 100.0]);
    }

    #[test]
    fn claimable_at_reference_is_not_retained() {
        let minted = MARCH - DORMANCY_THRESHOLD;
        let poke = MARCH - GRACE_PERIOD;
        let events = vec![
            mint(minted, 1),
            at(
                poke,
                EventKind::DormantPoked {
                    token_id: 1,
                    owner: WHO.into(),
                    poker: WHO.into(),
                    grace_deadline: poke + GRACE_PERIOD,
                },
            ),
        ];
        let m = retention_matrix(&events, minted);
        assert_eq!(m.rows[0].retention.len(), 1);

        let id = CohortId::from_timestamp(minted);
        let mut offsets = 0u64;
        let mut t = id.start();
        while t <= MARCH {
            offsets += 1;
            t = next_month(t);
        }
        let m = retention_matrix(&events, MARCH);
        let row = &m.rows[0].retention;
        assert_eq!(row.len() as u64, offsets);
        // Grace elapses exactly at MARCH, which is the last reference time.
        assert_eq!(row.last().copied(), Some(0.0));
        assert_eq!(row[row.len() - 2], 100.0);
    }
}
