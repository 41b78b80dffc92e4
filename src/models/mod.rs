use chrono::{Datelike, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ── Period ────────────────────────────────────────────────────────────────────

/// A reporting month, `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year: i32,
    month: u32,
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid period {0:?}, expected YYYY-MM")]
pub struct PeriodParseError(pub String);

impl Period {
    /// The local calendar month.
    pub fn current() -> Self {
        let today = Local::now().date_naive();
        Self { year: today.year(), month: today.month() }
    }

    /// Exactly one calendar month earlier.
    pub fn previous(self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }

    /// Day-suffixed token the ranking site expects: "2024-03" → "2024-03-00".
    pub fn source_token(self) -> String {
        format!("{}-00", self)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = PeriodParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // Strict shape check first; chrono alone accepts "2024-3".
        let shape_ok = s.len() == 7
            && s.as_bytes()[4] == b'-'
            && s.chars().enumerate().all(|(i, c)| i == 4 || c.is_ascii_digit());
        if !shape_ok {
            return Err(PeriodParseError(s.to_string()));
        }
        NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d")
            .map(|d| Self { year: d.year(), month: d.month() })
            .map_err(|_| PeriodParseError(s.to_string()))
    }
}

impl TryFrom<String> for Period {
    type Error = PeriodParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Period> for String {
    fn from(p: Period) -> Self {
        p.to_string()
    }
}

// ── Segment ───────────────────────────────────────────────────────────────────

/// Market partition of the ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    Domestic,
    Export,
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid segment {0:?}, expected domestic or export")]
pub struct SegmentParseError(pub String);

impl Segment {
    pub const ALL: [Segment; 2] = [Segment::Domestic, Segment::Export];

    pub fn as_str(self) -> &'static str {
        match self {
            Segment::Domestic => "domestic",
            Segment::Export => "export",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Segment {
    type Err = SegmentParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "domestic" => Ok(Segment::Domestic),
            "export" => Ok(Segment::Export),
            other => Err(SegmentParseError(other.to_string())),
        }
    }
}

// ── Raw extracted row ─────────────────────────────────────────────────────────

/// One ranking-table row as read off the page, before any derivation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    pub rank: u32,
    pub model_name: String,
    pub detail_url: Option<String>,
    pub image_url: Option<String>,
    pub sales_volume: i64,
    pub mom_absolute: i64,
}

// ── Sales record ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SalesRecord {
    pub period: Period,
    pub segment: Segment,
    pub model_name: String,
    pub sales_volume: i64,
    /// `sales_volume - mom_absolute`; may be negative on contradictory source rows.
    pub previous_sales_volume: i64,
    pub rank: u32,
    /// Positive when the model climbed (moved to a lower rank number).
    pub rank_delta: i64,
    pub mom_absolute: i64,
    pub mom_percent: f64,
    /// Batch-relative heat score; meaningless outside its scrape batch.
    pub score: f64,
    pub detail_url: Option<String>,
    pub image_url: Option<String>,
    pub scraped_at: NaiveDateTime,
}

impl SalesRecord {
    pub fn is_new_entry(&self) -> bool {
        self.previous_sales_volume == 0
    }
}

// ── Queries ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Score,
    Sales,
    Rank,
}

/// Read-side filter over stored records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SalesQuery {
    pub period: Option<Period>,
    pub segment: Option<Segment>,
    pub min_sales: Option<i64>,
    /// Drop rows whose previous-period sales are 0.
    pub exclude_new: bool,
    pub sort_by: SortKey,
}

// ── Scrape run audit ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeRun {
    pub period: Period,
    pub segment: Segment,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub records_written: usize,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_parse_and_display() {
        let p: Period = "2024-03".parse().unwrap();
        assert_eq!(p.to_string(), "2024-03");
        assert_eq!(p.source_token(), "2024-03-00");
        assert!("2024-3".parse::<Period>().is_err());
        assert!("2024-13".parse::<Period>().is_err());
        assert!("202403".parse::<Period>().is_err());
        assert!("abcd-ef".parse::<Period>().is_err());
    }

    #[test]
    fn test_period_previous_wraps_year() {
        let jan: Period = "2024-01".parse().unwrap();
        assert_eq!(jan.previous().to_string(), "2023-12");
        let jul: Period = "2024-07".parse().unwrap();
        assert_eq!(jul.previous().to_string(), "2024-06");
    }

    #[test]
    fn test_period_serde_as_string() {
        let p: Period = "2025-11".parse().unwrap();
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"2025-11\"");
        let back: Period = serde_json::from_str("\"2025-11\"").unwrap();
        assert_eq!(back, p);
        assert!(serde_json::from_str::<Period>("\"2025-1\"").is_err());
    }

    #[test]
    fn test_segment_parse() {
        assert_eq!("Domestic".parse::<Segment>(), Ok(Segment::Domestic));
        assert_eq!("export".parse::<Segment>(), Ok(Segment::Export));
        assert!("import".parse::<Segment>().is_err());
        assert_eq!(serde_json::to_string(&Segment::Export).unwrap(), "\"export\"");
    }
}
