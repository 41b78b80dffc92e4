//! Ranking-table extraction. Lenient: malformed rows are skipped, never fatal.

use crate::models::RawRow;
use crate::scraper::cleaner::{normalise_model_name, parse_count, parse_rank, parse_signed_delta, resolve_link};
use ::scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

/// Tables tried in order; the first one yielding data rows wins.
const TABLE_CANDIDATES: &[&str] = &["table.recordTable", "table.rankTable", "table"];

struct RowSelectors {
    tr: Selector,
    rank: Selector,
    td: Selector,
    title_link: Selector,
    any_link: Selector,
    sales: Selector,
    delta: Selector,
    image: Selector,
    trim_marker: Selector,
}

impl RowSelectors {
    fn build() -> Option<Self> {
        let p = |s: &str| Selector::parse(s).ok();
        Some(Self {
            tr: p("tbody tr")?,
            rank: p("td.rank")?,
            td: p("td")?,
            title_link: p("td.title a")?,
            any_link: p("a[href]")?,
            sales: p("td.record")?,
            delta: p("td.updown")?,
            image: p("img")?,
            trim_marker: p(".trim, [data-type=\"trim\"]")?,
        })
    }
}

fn cell_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Parse ranking markup into raw rows, in page order.
pub fn extract_rows(html: &str, base: &Url) -> Vec<RawRow> {
    let doc = Html::parse_document(html);
    let Some(sels) = RowSelectors::build() else {
        warn!("Row selectors failed to compile");
        return vec![];
    };

    for table_sel in TABLE_CANDIDATES {
        let Ok(sel) = Selector::parse(table_sel) else { continue };

        for table in doc.select(&sel) {
            let rows: Vec<RawRow> = table
                .select(&sels.tr)
                .filter(|tr| is_data_row(*tr, &sels))
                .filter_map(|tr| read_row(tr, &sels, base))
                .collect();

            if !rows.is_empty() {
                debug!("{} rows from {}", rows.len(), table_sel);
                return rows;
            }
        }
    }

    debug!("No ranking table found");
    vec![]
}

/// Row classifier: trim sub-rows and rows without a rank are not data.
fn is_data_row(tr: ElementRef<'_>, sels: &RowSelectors) -> bool {
    let marked_trim = tr
        .value()
        .classes()
        .any(|c| c.to_ascii_lowercase().contains("trim"))
        || tr.value().attr("data-type") == Some("trim")
        || tr.select(&sels.trim_marker).next().is_some();
    if marked_trim {
        return false;
    }
    rank_cell(tr, sels).and_then(|td| parse_rank(&cell_text(td))).is_some()
}

fn rank_cell<'a>(tr: ElementRef<'a>, sels: &RowSelectors) -> Option<ElementRef<'a>> {
    tr.select(&sels.rank).next().or_else(|| tr.select(&sels.td).next())
}

fn read_row(tr: ElementRef<'_>, sels: &RowSelectors, base: &Url) -> Option<RawRow> {
    let rank = rank_cell(tr, sels).and_then(|td| parse_rank(&cell_text(td)))?;

    let link = tr
        .select(&sels.title_link)
        .next()
        .or_else(|| tr.select(&sels.any_link).next())?;
    let model_name = normalise_model_name(&link.text().collect::<String>());
    if model_name.is_empty() {
        debug!("Rank {} has no model name, skipping", rank);
        return None;
    }

    let detail_url = link.value().attr("href").and_then(|h| resolve_link(base, h));
    let image_url = tr
        .select(&sels.image)
        .next()
        .and_then(|img| img.value().attr("src").or_else(|| img.value().attr("data-src")))
        .and_then(|src| resolve_link(base, src));

    let sales_volume = tr
        .select(&sels.sales)
        .next()
        .map(|td| parse_count(&cell_text(td)))
        .unwrap_or(0);
    let mom_absolute = tr
        .select(&sels.delta)
        .next()
        .map(|td| parse_signed_delta(&cell_text(td)))
        .unwrap_or(0);

    Some(RawRow {
        rank,
        model_name,
        detail_url,
        image_url,
        sales_volume,
        mom_absolute,
    })
}
