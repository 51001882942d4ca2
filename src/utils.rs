//! Shared utility functions for the climate tracker

/// Canonicalize a location label into a comparable key
///
/// This is the active matching policy: periods, apostrophes (straight and curly) and all
/// whitespace are removed and the remainder is lowercased. Both the target location set
/// and inventory station names go through this function before comparison.
///
/// # Examples
///
/// ```
/// use climate_tracker::utils::normalize_location_name;
///
/// assert_eq!(normalize_location_name("St. John's"), "stjohns");
/// assert_eq!(normalize_location_name("st johns"), "stjohns");
/// assert_eq!(normalize_location_name(""), "");
/// ```
pub fn normalize_location_name(name: &str) -> String {
    name.chars()
        .filter(|c| !is_stripped_label_char(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

fn is_stripped_label_char(c: char) -> bool {
    matches!(c, '.' | '\'' | '\u{2019}') || c.is_whitespace()
}

/// Title-case a label for display
///
/// Capitalizes the first letter of each whitespace-delimited run and the letter immediately
/// following an apostrophe; every other character is left as-is. This produces a different
/// key space from [`normalize_location_name`] and is never used for matching.
pub fn smart_title_case(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut capitalize_next = true;

    for c in text.chars() {
        if capitalize_next && c.is_alphabetic() {
            result.extend(c.to_uppercase());
        } else {
            result.push(c);
        }
        capitalize_next = c.is_whitespace() || c == '\'';
    }

    result
}

/// File stem for a location's dataset: spaces, periods and apostrophes removed, case kept
///
/// "St. John's" becomes "StJohns".
pub fn location_file_stem(name: &str) -> String {
    name.trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '.' | '\'' | '\u{2019}'))
        .collect()
}

/// Strip a trailing ".0" left behind when a numeric station id was written as a float
pub fn clean_station_id(value: &str) -> String {
    let trimmed = value.trim();
    trimmed.strip_suffix(".0").unwrap_or(trimmed).to_string()
}

/// Parse the date part of a "Date/Time" cell
///
/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD` and either of those followed by a time component.
/// Returns `None` for anything else.
pub fn parse_date(value: &str) -> Option<chrono::NaiveDate> {
    let trimmed = value.trim();
    let date_part = trimmed.split([' ', 'T']).next().unwrap_or(trimmed);

    ["%Y-%m-%d", "%Y/%m/%d"]
        .iter()
        .find_map(|format| chrono::NaiveDate::parse_from_str(date_part, format).ok())
}
