use chrono::Month;
use std::cmp::Ordering;

/// Program category of a class. Governs how fee period labels are parsed:
/// integrated classes bill per school term, tahfidh and ta'lim bill monthly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Tahfidh,
    Integrated,
    Talim,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Tahfidh => "tahfidh",
            Category::Integrated => "integrated",
            Category::Talim => "talim",
        }
    }

    pub fn parse(raw: &str) -> Option<Category> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tahfidh" => Some(Category::Tahfidh),
            "integrated" => Some(Category::Integrated),
            "talim" => Some(Category::Talim),
            _ => None,
        }
    }
}

/// Chronological key for a period label: (year, sequence within year).
/// Integrated labels look like "Term 2/2025"; monthly labels look like
/// "January 2025".
pub fn period_key(category: Category, label: &str) -> Option<(i32, u32)> {
    match category {
        Category::Integrated => parse_term_label(label),
        Category::Tahfidh | Category::Talim => parse_month_label(label),
    }
}

/// Total, stable ordering of period labels for one category. Labels that do
/// not parse sort before every parseable label; the raw label breaks ties so
/// two distinct labels never compare equal.
pub fn compare_periods(category: Category, a: &str, b: &str) -> Ordering {
    let ka = period_key(category, a).unwrap_or((i32::MIN, 0));
    let kb = period_key(category, b).unwrap_or((i32::MIN, 0));
    ka.cmp(&kb).then_with(|| a.cmp(b))
}

fn parse_term_label(label: &str) -> Option<(i32, u32)> {
    let (left, year_raw) = label.trim().split_once('/')?;
    let year: i32 = year_raw.trim().parse().ok()?;
    let left = left.trim();
    if !left.to_ascii_lowercase().starts_with("term") {
        return None;
    }
    let n: u32 = left.split_whitespace().last()?.parse().ok()?;
    Some((year, n))
}

fn parse_month_label(label: &str) -> Option<(i32, u32)> {
    let mut parts = label.trim().split_whitespace();
    let month_raw = parts.next()?;
    let year_raw = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let month: Month = month_raw.parse().ok()?;
    let year: i32 = year_raw.trim().parse().ok()?;
    Some((year, month.number_from_month()))
}
