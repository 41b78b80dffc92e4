use crate::error::StoreError;
use crate::models::{Period, SalesQuery, SalesRecord, ScrapeRun, Segment, SortKey};
use chrono::Utc;
use duckdb::types::Value;
use duckdb::{params, params_from_iter, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS sales_records (
    period                  VARCHAR   NOT NULL,   -- YYYY-MM
    segment                 VARCHAR   NOT NULL,   -- domestic | export
    model_name              VARCHAR   NOT NULL,
    sales_volume            BIGINT    NOT NULL,
    previous_sales_volume   BIGINT    NOT NULL DEFAULT 0,
    sales_rank              BIGINT    NOT NULL,
    rank_delta              BIGINT    NOT NULL DEFAULT 0,
    mom_absolute            BIGINT    NOT NULL DEFAULT 0,
    mom_percent             DOUBLE    NOT NULL DEFAULT 0,
    -- Batch-relative; only comparable within one (period, segment)
    score                   DOUBLE    NOT NULL DEFAULT 0,
    detail_url              VARCHAR,
    image_url               VARCHAR,
    scraped_at              TIMESTAMP NOT NULL
);

CREATE SEQUENCE IF NOT EXISTS scrape_run_ids START 1;

CREATE TABLE IF NOT EXISTS scrape_runs (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('scrape_run_ids'),
    period              VARCHAR NOT NULL,
    segment             VARCHAR NOT NULL,
    started_at          TIMESTAMP NOT NULL,
    finished_at         TIMESTAMP NOT NULL,
    status              VARCHAR NOT NULL,
    records_written     BIGINT DEFAULT 0,
    error_msg           VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_sales_partition ON sales_records (period, segment);
"#;

const RECORD_COLUMNS: &str = "period, segment, model_name, sales_volume, previous_sales_volume, \
     sales_rank, rank_delta, mom_absolute, mom_percent, score, detail_url, image_url, scraped_at";

// ── Store contract ────────────────────────────────────────────────────────────

/// What the pipeline needs from persistence.
pub trait SalesStore: Send + Sync {
    /// All records of one partition. Empty when nothing was ever scraped for it.
    fn read_partition(&self, period: Period, segment: Segment) -> Result<Vec<SalesRecord>, StoreError>;

    /// Atomically swap the partition shared by `records` for `records`.
    /// An empty batch is a no-op.
    fn replace_period(&self, records: &[SalesRecord]) -> Result<usize, StoreError>;

    /// Audit trail of pipeline runs. Stores without one ignore it.
    fn record_run(&self, _run: &ScrapeRun) -> Result<(), StoreError> {
        Ok(())
    }

    /// Records of the month before `period`, same segment.
    fn read_prior_period(&self, period: Period, segment: Segment) -> Result<Vec<SalesRecord>, StoreError> {
        self.read_partition(period.previous(), segment)
    }
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Mutex<Connection>,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self { conn: Mutex::new(Connection::open_in_memory()?) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves DuckDB itself consistent; keep serving.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Running migrations…");
        let conn = self.conn();
        conn.execute_batch(DDL)?;
        conn.execute_batch(INDEXES)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Sales records ─────────────────────────────────────────────────────────

    /// Distinct periods on record, newest first.
    pub fn list_periods(&self) -> Result<Vec<Period>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT DISTINCT period FROM sales_records ORDER BY period DESC")?;
        let periods: Vec<Period> = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|s| s.parse().ok())
            .collect();
        Ok(periods)
    }

    /// Filtered, sorted read for the dashboard.
    pub fn query(&self, q: &SalesQuery) -> Result<Vec<SalesRecord>, StoreError> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<Value> = Vec::new();

        if let Some(period) = q.period {
            clauses.push("period = ?");
            args.push(Value::Text(period.to_string()));
        }
        if let Some(segment) = q.segment {
            clauses.push("segment = ?");
            args.push(Value::Text(segment.to_string()));
        }
        if let Some(min) = q.min_sales.filter(|m| *m > 0) {
            clauses.push("sales_volume >= ?");
            args.push(Value::BigInt(min));
        }
        if q.exclude_new {
            clauses.push("previous_sales_volume > 0");
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let order_sql = match q.sort_by {
            SortKey::Score => "score DESC, sales_rank ASC",
            SortKey::Sales => "sales_volume DESC, sales_rank ASC",
            SortKey::Rank => "sales_rank ASC, period DESC, segment ASC",
        };
        let sql = format!("SELECT {RECORD_COLUMNS} FROM sales_records {where_sql} ORDER BY {order_sql}");
        debug!("{}", sql);

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), row_to_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn record_count(&self) -> Result<i64, StoreError> {
        let conn = self.conn();
        let mut s = conn.prepare("SELECT COUNT(*) FROM sales_records")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn period_range(&self) -> Result<(Option<Period>, Option<Period>), StoreError> {
        let conn = self.conn();
        let mut s = conn.prepare("SELECT MIN(period), MAX(period) FROM sales_records")?;
        let (min, max): (Option<String>, Option<String>) = s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?;
        Ok((min.and_then(|p| p.parse().ok()), max.and_then(|p| p.parse().ok())))
    }

    pub fn run_count(&self) -> Result<i64, StoreError> {
        let conn = self.conn();
        let mut s = conn.prepare("SELECT COUNT(*) FROM scrape_runs")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }
}

fn row_to_record(r: &Row<'_>) -> duckdb::Result<SalesRecord> {
    let period: String = r.get(0)?;
    let segment: String = r.get(1)?;
    let conv = |i: usize, e: String| {
        duckdb::Error::FromSqlConversionFailure(i, duckdb::types::Type::Text, e.into())
    };
    Ok(SalesRecord {
        period: period.parse::<Period>().map_err(|e| conv(0, e.to_string()))?,
        segment: segment.parse::<Segment>().map_err(|e| conv(1, e.to_string()))?,
        model_name: r.get(2)?,
        sales_volume: r.get(3)?,
        previous_sales_volume: r.get(4)?,
        rank: u32::try_from(r.get::<_, i64>(5)?).map_err(|e| conv(5, e.to_string()))?,
        rank_delta: r.get(6)?,
        mom_absolute: r.get(7)?,
        mom_percent: r.get(8)?,
        score: r.get(9)?,
        detail_url: r.get(10)?,
        image_url: r.get(11)?,
        scraped_at: r.get(12)?,
    })
}

impl SalesStore for Repository {
    fn read_partition(&self, period: Period, segment: Segment) -> Result<Vec<SalesRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM sales_records WHERE period = ? AND segment = ? ORDER BY sales_rank"
        ))?;
        let rows = stmt.query_map(params![period.to_string(), segment.to_string()], row_to_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn replace_period(&self, records: &[SalesRecord]) -> Result<usize, StoreError> {
        let Some(first) = records.first() else { return Ok(0) };
        let (period, segment) = (first.period, first.segment);
        if records.iter().any(|r| r.period != period || r.segment != segment) {
            return Err(StoreError::MixedPartition);
        }

        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        let removed = tx.execute(
            "DELETE FROM sales_records WHERE period = ? AND segment = ?",
            params![period.to_string(), segment.to_string()],
        )?;

        let sql = format!(
            "INSERT INTO sales_records ({RECORD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        {
            let mut stmt = tx.prepare(&sql)?;
            for rec in records {
                stmt.execute(params![
                    rec.period.to_string(),
                    rec.segment.to_string(),
                    rec.model_name,
                    rec.sales_volume,
                    rec.previous_sales_volume,
                    i64::from(rec.rank),
                    rec.rank_delta,
                    rec.mom_absolute,
                    rec.mom_percent,
                    rec.score,
                    rec.detail_url,
                    rec.image_url,
                    rec.scraped_at,
                ])?;
            }
        }

        tx.commit()?;
        info!("{} {}: replaced {} rows with {}", period, segment, removed, records.len());
        Ok(records.len())
    }

    fn record_run(&self, run: &ScrapeRun) -> Result<(), StoreError> {
        self.conn().execute(
            r#"INSERT INTO scrape_runs
               (period, segment, started_at, finished_at, status, records_written, error_msg)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            params![
                run.period.to_string(),
                run.segment.to_string(),
                run.started_at,
                run.finished_at,
                if run.error.is_none() { "success" } else { "error" },
                run.records_written as i64,
                run.error,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    fn rec(period: &str, segment: Segment, rank: u32, name: &str, sales: i64, prev: i64, score: f64) -> SalesRecord {
        SalesRecord {
            period: period.parse().unwrap(),
            segment,
            model_name: name.to_string(),
            sales_volume: sales,
            previous_sales_volume: prev,
            rank,
            rank_delta: 0,
            mom_absolute: sales - prev,
            mom_percent: 0.0,
            score,
            detail_url: Some(format!("https://auto.danawa.com/m/{rank}")),
            image_url: None,
            scraped_at: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        }
    }

    fn march_domestic() -> Vec<SalesRecord> {
        vec![
            rec("2024-03", Segment::Domestic, 1, "Sorento", 10_000, 9_000, 0.4),
            rec("2024-03", Segment::Domestic, 2, "Grandeur", 8_000, 0, 1.2),
            rec("2024-03", Segment::Domestic, 3, "Casper", 3_000, 3_500, -1.6),
        ]
    }

    #[test]
    fn test_replace_round_trips_partition() {
        let repo = repo();
        let batch = march_domestic();
        assert_eq!(repo.replace_period(&batch).unwrap(), 3);

        let back = repo.read_partition("2024-03".parse().unwrap(), Segment::Domestic).unwrap();
        assert_eq!(back, batch);
    }

    #[test]
    fn test_replace_is_idempotent() {
        let repo = repo();
        let batch = march_domestic();
        repo.replace_period(&batch).unwrap();
        repo.replace_period(&batch).unwrap();
        assert_eq!(repo.record_count().unwrap(), 3);
        assert_eq!(
            repo.read_partition("2024-03".parse().unwrap(), Segment::Domestic).unwrap(),
            batch
        );
    }

    #[test]
    fn test_replace_only_touches_its_partition() {
        let repo = repo();
        repo.replace_period(&march_domestic()).unwrap();
        repo.replace_period(&[rec("2024-03", Segment::Export, 1, "Tucson", 20_000, 18_000, 0.0)]).unwrap();
        repo.replace_period(&[rec("2024-03", Segment::Domestic, 1, "Avante", 500, 400, 0.0)]).unwrap();

        let dom = repo.read_partition("2024-03".parse().unwrap(), Segment::Domestic).unwrap();
        assert_eq!(dom.len(), 1);
        assert_eq!(dom[0].model_name, "Avante");
        let exp = repo.read_partition("2024-03".parse().unwrap(), Segment::Export).unwrap();
        assert_eq!(exp.len(), 1);
    }

    #[test]
    fn test_replace_empty_and_mixed_batches() {
        let repo = repo();
        repo.replace_period(&march_domestic()).unwrap();
        assert_eq!(repo.replace_period(&[]).unwrap(), 0);
        assert_eq!(repo.record_count().unwrap(), 3);

        let mixed = vec![
            rec("2024-04", Segment::Domestic, 1, "A", 1, 0, 0.0),
            rec("2024-04", Segment::Export, 1, "B", 1, 0, 0.0),
        ];
        assert!(matches!(repo.replace_period(&mixed), Err(StoreError::MixedPartition)));
        assert_eq!(repo.record_count().unwrap(), 3);
    }

    #[test]
    fn test_read_prior_period() {
        let repo = repo();
        repo.replace_period(&march_domestic()).unwrap();
        let april: Period = "2024-04".parse().unwrap();
        assert_eq!(repo.read_prior_period(april, Segment::Domestic).unwrap().len(), 3);
        assert!(repo.read_prior_period(april, Segment::Export).unwrap().is_empty());
        assert!(repo.read_prior_period("2024-03".parse().unwrap(), Segment::Domestic).unwrap().is_empty());
    }

    #[test]
    fn test_list_periods_descending() {
        let repo = repo();
        assert!(repo.list_periods().unwrap().is_empty());
        repo.replace_period(&march_domestic()).unwrap();
        repo.replace_period(&[rec("2023-12", Segment::Export, 1, "X", 1, 0, 0.0)]).unwrap();
        repo.replace_period(&[rec("2024-01", Segment::Domestic, 1, "Y", 1, 0, 0.0)]).unwrap();

        let periods: Vec<String> = repo.list_periods().unwrap().iter().map(|p| p.to_string()).collect();
        assert_eq!(periods, vec!["2024-03", "2024-01", "2023-12"]);

        let (min, max) = repo.period_range().unwrap();
        assert_eq!(min.map(|p| p.to_string()).as_deref(), Some("2023-12"));
        assert_eq!(max.map(|p| p.to_string()).as_deref(), Some("2024-03"));
    }

    #[test]
    fn test_query_filters_and_sorting() {
        let repo = repo();
        repo.replace_period(&march_domestic()).unwrap();
        repo.replace_period(&[rec("2024-03", Segment::Export, 1, "Tucson", 20_000, 18_000, 5.0)]).unwrap();

        let base = SalesQuery {
            period: Some("2024-03".parse().unwrap()),
            segment: Some(Segment::Domestic),
            ..Default::default()
        };

        let by_score: Vec<String> = repo.query(&base).unwrap().into_iter().map(|r| r.model_name).collect();
        assert_eq!(by_score, vec!["Grandeur", "Sorento", "Casper"]);

        let by_rank = repo.query(&SalesQuery { sort_by: SortKey::Rank, ..base.clone() }).unwrap();
        assert_eq!(by_rank.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3]);

        let by_sales = repo.query(&SalesQuery { sort_by: SortKey::Sales, ..base.clone() }).unwrap();
        assert_eq!(by_sales[0].model_name, "Sorento");

        let no_new = repo.query(&SalesQuery { exclude_new: true, ..base.clone() }).unwrap();
        assert!(no_new.iter().all(|r| r.previous_sales_volume > 0));
        assert_eq!(no_new.len(), 2);

        let big = repo.query(&SalesQuery { min_sales: Some(5_000), ..base.clone() }).unwrap();
        assert_eq!(big.len(), 2);

        let everything = repo.query(&SalesQuery::default()).unwrap();
        assert_eq!(everything.len(), 4);
        assert_eq!(everything[0].model_name, "Tucson");
    }

    #[test]
    fn test_record_run() {
        let repo = repo();
        let t = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        repo.record_run(&ScrapeRun {
            period: "2024-03".parse().unwrap(),
            segment: Segment::Export,
            started_at: t,
            finished_at: t,
            records_written: 0,
            error: Some("HTTP 503".into()),
        })
        .unwrap();
        assert_eq!(repo.run_count().unwrap(), 1);
    }
}
