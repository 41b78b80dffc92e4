//! CSV export of stored sales records.

use crate::models::SalesRecord;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Write records as CSV with a header row to any writer.
pub fn write_csv<W: Write>(records: &[SalesRecord], out: W) -> Result<usize> {
    let mut writer = csv::WriterBuilder::new().has_headers(true).from_writer(out);
    for rec in records {
        writer
            .serialize(rec)
            .with_context(|| format!("serialize {} {} '{}'", rec.period, rec.segment, rec.model_name))?;
    }
    writer.flush()?;
    Ok(records.len())
}

pub fn export_csv(records: &[SalesRecord], path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Could not create {:?}", path))?;
    let n = write_csv(records, file)?;
    info!("{} records exported to {:?}", n, path);
    Ok(n)
}
