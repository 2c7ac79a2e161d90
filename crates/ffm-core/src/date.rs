//! Date normalization at the input boundary.
//!
//! Dates arrive from people and from table recognition in several shapes
//! (`2025/1/2`, `2025.1.2`, `2025-01-02`). The store only ever sees the
//! zero-padded ISO form. Unparseable input yields `None`; nothing here
//! guesses.

use chrono::NaiveDate;

/// Format of every date stored in the database.
pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a loosely formatted `year-month-day` string.
///
/// `/` and `.` are accepted as separators. The result must be a real
/// calendar date with a four-digit (or shorter, positive) year.
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let unified: String = input
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '.' { '-' } else { c })
        .collect();

    let mut parts = unified.split('-');
    let (y, m, d) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let year: i32 = parse_component(y)?;
    let month: u32 = parse_component(m)?;
    let day: u32 = parse_component(d)?;
    if !(1..=9999).contains(&year) {
        return None;
    }

    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_component<T: std::str::FromStr>(part: &str) -> Option<T> {
    let part = part.trim();
    if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

/// Canonical `YYYY-MM-DD` text for a date.
pub fn format_date(date: NaiveDate) -> String {
    date.format(ISO_DATE_FORMAT).to_string()
}

/// Normalize free-form input to `YYYY-MM-DD`, or `None` when it is not a date.
pub fn normalize_date(input: &str) -> Option<String> {
    parse_date(input).map(format_date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separators_normalize() {
        assert_eq!(normalize_date("2025/1/2").as_deref(), Some("2025-01-02"));
        assert_eq!(normalize_date("2025.1.2").as_deref(), Some("2025-01-02"));
        assert_eq!(normalize_date("2025-01-02").as_deref(), Some("2025-01-02"));
        assert_eq!(normalize_date("  2025/12/31 ").as_deref(), Some("2025-12-31"));
    }

    #[test]
    fn test_invalid_is_none() {
        assert_eq!(normalize_date("not-a-date"), None);
        assert_eq!(normalize_date(""), None);
        assert_eq!(normalize_date("2025/1"), None);
        assert_eq!(normalize_date("2025/1/2/3"), None);
        assert_eq!(normalize_date("2025/+1/2"), None);
        assert_eq!(normalize_date("-2025-1-2"), None);
    }

    #[test]
    fn test_calendar_checked() {
        assert_eq!(normalize_date("2025/2/30"), None);
        assert_eq!(normalize_date("2024/2/29").as_deref(), Some("2024-02-29"));
        assert_eq!(normalize_date("2025/13/1"), None);
    }

    #[test]
    fn test_format_is_zero_padded() {
        let d = NaiveDate::from_ymd_opt(987, 3, 4).unwrap();
        assert_eq!(format_date(d), "0987-03-04");
    }
}
