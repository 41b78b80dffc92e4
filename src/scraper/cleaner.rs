use url::Url;

// ── Parsers ───────────────────────────────────────────────────────────────────

const DOWN_MARKERS: &[char] = &['▼', '▽', '↓', '-', '−'];

/// Rank cell → positive integer. Header and sub-rows yield `None`.
/// "1" → 1 | " 12 " → 12 | "" → None | "0" → None
pub fn parse_rank(s: &str) -> Option<u32> {
    let s = s.trim();
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    match digits.parse::<u32>() {
        Ok(n) if n > 0 => Some(n),
        _ => None,
    }
}

/// Sales count: thousands separators stripped, anything non-numeric → 0.
/// "12,345" → 12345 | "1,234대" → 1234 | "-" → 0
pub fn parse_count(s: &str) -> i64 {
    let cleaned: String = s
        .trim()
        .chars()
        .filter(|c| *c != ',')
        .take_while(|c| c.is_ascii_digit())
        .collect();
    cleaned.parse().unwrap_or(0)
}

/// Signed month-over-month delta. Direction comes from glyphs or sign
/// characters (anything not marked down counts as up), magnitude from the
/// digits alone.
/// "▲ 1,204" → 1204 | "▼50" → -50 | "- 50" → -50 | "+ 100" → 100 | "" → 0
pub fn parse_signed_delta(s: &str) -> i64 {
    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    let magnitude: i64 = match digits.parse() {
        Ok(n) => n,
        Err(_) => return 0,
    };
    if s.contains(DOWN_MARKERS) {
        -magnitude
    } else {
        magnitude
    }
}

/// Resolve a possibly relative link against the source origin.
/// Empty or unparseable hrefs give `None`.
pub fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("javascript:") || href == "#" {
        return None;
    }
    base.join(href).ok().map(|u| u.to_string())
}

pub fn normalise_model_name(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
