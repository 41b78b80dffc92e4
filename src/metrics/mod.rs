//! Heat-score calculator: raw page rows + prior-period ranks → sales records.
//!
//! Pure; no I/O. Every statistic is relative to the batch it is computed over.

use crate::models::{Period, RawRow, SalesRecord, Segment};
use chrono::NaiveDateTime;
use std::collections::HashMap;
use tracing::warn;

/// Growth-rate ceiling for models with no previous-period sales.
pub const NEW_ENTRY_PCT_CAP: f64 = 5.0;

pub const WEIGHT_MOM_ABS: f64 = 0.55;
pub const WEIGHT_MOM_PCT: f64 = 0.35;
pub const WEIGHT_RANK_DELTA: f64 = 0.10;

/// Identity of the batch being computed.
#[derive(Debug, Clone, Copy)]
pub struct Batch {
    pub period: Period,
    pub segment: Segment,
    pub scraped_at: NaiveDateTime,
}

/// Population z-scores. A zero standard deviation is floored to 1, so uniform
/// or single-element series come out all zero.
pub fn z_scores(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return vec![];
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let std_dev = match variance.sqrt() {
        s if s == 0.0 || s.is_nan() => 1.0,
        s => s,
    };
    values.iter().map(|x| (x - mean) / std_dev).collect()
}

/// `mom_absolute / max(previous, 1)`, capped for brand-new entries.
pub fn mom_percent(mom_absolute: i64, previous: i64) -> f64 {
    let pct = mom_absolute as f64 / previous.max(1) as f64;
    if previous == 0 { pct.min(NEW_ENTRY_PCT_CAP) } else { pct }
}

pub fn compute(raw: &[RawRow], prior: &[SalesRecord], batch: Batch) -> Vec<SalesRecord> {
    let prior_ranks: HashMap<&str, u32> = prior
        .iter()
        .map(|r| (r.model_name.as_str(), r.rank))
        .collect();

    let mut records: Vec<SalesRecord> = raw
        .iter()
        .map(|row| {
            let previous = row.sales_volume - row.mom_absolute;
            if previous < 0 {
                warn!(
                    "{} {} '{}': delta {} exceeds sales {}, previous sales negative",
                    batch.period, batch.segment, row.model_name, row.mom_absolute, row.sales_volume
                );
            }

            let rank_delta = prior_ranks
                .get(row.model_name.as_str())
                .map(|&prev_rank| i64::from(prev_rank) - i64::from(row.rank))
                .unwrap_or(0);

            SalesRecord {
                period: batch.period,
                segment: batch.segment,
                model_name: row.model_name.clone(),
                sales_volume: row.sales_volume,
                previous_sales_volume: previous,
                rank: row.rank,
                rank_delta,
                mom_absolute: row.mom_absolute,
                mom_percent: mom_percent(row.mom_absolute, previous),
                score: 0.0,
                detail_url: row.detail_url.clone(),
                image_url: row.image_url.clone(),
                scraped_at: batch.scraped_at,
            }
        })
        .collect();

    let z_abs = z_scores(&records.iter().map(|r| r.mom_absolute as f64).collect::<Vec<_>>());
    let z_pct = z_scores(&records.iter().map(|r| r.mom_percent).collect::<Vec<_>>());
    let z_rank = z_scores(&records.iter().map(|r| r.rank_delta as f64).collect::<Vec<_>>());

    for (i, r) in records.iter_mut().enumerate() {
        r.score = WEIGHT_MOM_ABS * z_abs[i] + WEIGHT_MOM_PCT * z_pct[i] + WEIGHT_RANK_DELTA * z_rank[i];
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const EPS: f64 = 1e-9;

    fn batch() -> Batch {
        Batch {
            period: "2024-03".parse().unwrap(),
            segment: Segment::Domestic,
            scraped_at: NaiveDate::from_ymd_opt(2024, 4, 2).unwrap().and_hms_opt(9, 0, 0).unwrap(),
        }
    }

    fn raw(rank: u32, name: &str, sales: i64, delta: i64) -> RawRow {
        RawRow {
            rank,
            model_name: name.to_string(),
            sales_volume: sales,
            mom_absolute: delta,
            ..Default::default()
        }
    }

    fn prior(rank: u32, name: &str) -> SalesRecord {
        let mut b = batch();
        b.period = b.period.previous();
        compute(&[raw(rank, name, 10, 0)], &[], b).remove(0)
    }

    #[test]
    fn test_two_row_scenario() {
        let rows = [raw(1, "A", 1000, 100), raw(2, "B", 500, -50)];
        let out = compute(&rows, &[], batch());

        assert_eq!(out[0].previous_sales_volume, 900);
        assert_eq!(out[1].previous_sales_volume, 550);
        assert!((out[0].mom_percent - 100.0 / 900.0).abs() < EPS);
        assert!((out[1].mom_percent - (-50.0 / 550.0)).abs() < EPS);
        assert_eq!(out[0].rank_delta, 0);
        assert_eq!(out[1].rank_delta, 0);

        // Two-point series z-score to ±1; rank deltas are uniform → 0.
        assert!((out[0].score - 0.9).abs() < EPS);
        assert!((out[1].score + 0.9).abs() < EPS);
    }

    #[test]
    fn test_single_row_scores_zero() {
        let out = compute(&[raw(1, "Solo", 12_000, 9_000)], &[], batch());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].score, 0.0);
    }

    #[test]
    fn test_empty_batch() {
        assert!(compute(&[], &[prior(1, "A")], batch()).is_empty());
        assert!(z_scores(&[]).is_empty());
    }

    #[test]
    fn test_rank_delta_against_prior() {
        let prior_rows = [prior(5, "Climber"), prior(1, "Faller")];
        let rows = [raw(1, "Newcomer", 300, 300), raw(2, "Climber", 200, 20), raw(3, "Faller", 100, -80)];
        let out = compute(&rows, &prior_rows, batch());

        assert_eq!(out[0].rank_delta, 0);
        assert_eq!(out[1].rank_delta, 3);
        assert_eq!(out[2].rank_delta, -2);
    }

    #[test]
    fn test_new_entry_pct_is_capped() {
        let out = compute(&[raw(1, "New", 800, 800), raw(2, "Old", 100, 10)], &[], batch());
        assert_eq!(out[0].previous_sales_volume, 0);
        assert_eq!(out[0].mom_percent, NEW_ENTRY_PCT_CAP);
        assert!(out[0].is_new_entry());
        assert!((out[1].mom_percent - 10.0 / 90.0).abs() < EPS);
    }

    #[test]
    fn test_mom_percent_rules() {
        assert_eq!(mom_percent(3, 0), 3.0);
        assert_eq!(mom_percent(10, 0), 5.0);
        assert_eq!(mom_percent(50, 100), 0.5);
        // Contradictory source row: previous is negative, divisor floors to 1, no cap.
        assert_eq!(mom_percent(120, -20), 120.0);
    }

    #[test]
    fn test_negative_previous_passes_through() {
        let out = compute(&[raw(1, "Odd", 100, 120)], &[], batch());
        assert_eq!(out[0].previous_sales_volume, -20);
    }

    #[test]
    fn test_batch_properties() {
        let rows: Vec<RawRow> = (1..=9)
            .map(|i| raw(i, &format!("M{i}"), 1000 - i as i64 * 37, (i as i64 * 53) % 170 - 60))
            .collect();
        let prior_rows: Vec<SalesRecord> = (1..=9).map(|i| prior(10 - i, &format!("M{i}"))).collect();
        let out = compute(&rows, &prior_rows, batch());

        for r in &out {
            assert_eq!(r.previous_sales_volume, r.sales_volume - r.mom_absolute);
            if r.previous_sales_volume == 0 {
                assert!(r.mom_percent <= NEW_ENTRY_PCT_CAP);
            }
        }

        let series = [
            out.iter().map(|r| r.mom_absolute as f64).collect::<Vec<_>>(),
            out.iter().map(|r| r.mom_percent).collect::<Vec<_>>(),
            out.iter().map(|r| r.rank_delta as f64).collect::<Vec<_>>(),
        ];
        for s in &series {
            let z = z_scores(s);
            let n = z.len() as f64;
            let mean = z.iter().sum::<f64>() / n;
            let sd = (z.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();
            assert!(mean.abs() < 1e-9);
            assert!((sd - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_uniform_series_is_zero() {
        assert_eq!(z_scores(&[4.0, 4.0, 4.0]), vec![0.0, 0.0, 0.0]);
    }
}
