use std::sync::LazyLock;

use regex::{Captures, Regex};

/// A 4-digit year optionally followed by a range end of 2 or 4 digits (`2014-18`, `2014 – 2018`).
static YEAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"((?:19|20)\d{2})(?:\s*[-–]\s*(\d{4}|\d{2}))?").expect("year pattern compiles")
});

fn digit_before(text: &str, index: usize) -> bool {
    text[..index]
        .chars()
        .next_back()
        .is_some_and(|c| c.is_ascii_digit())
}

fn digit_at(text: &str, index: usize) -> bool {
    text[index..]
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit())
}

/// Latest year named by one match, or `None` when the match sits inside a longer number.
fn latest_in_match(text: &str, caps: &Captures<'_>) -> Option<u16> {
    let start_match = caps.get(1)?;
    if digit_before(text, start_match.start()) {
        return None;
    }
    let start: u16 = start_match.as_str().parse().ok()?;

    let end = caps
        .get(2)
        .filter(|end| !digit_at(text, end.end()))
        .and_then(|end| {
            let value: u16 = end.as_str().parse().ok()?;
            if end.as_str().len() == 2 {
                // Same century as the start year; roll over when the short end is smaller.
                let mut full = start / 100 * 100 + value;
                if full < start {
                    full += 100;
                }
                Some(full)
            } else {
                Some(value)
            }
        });

    match end {
        Some(end) => Some(start.max(end)),
        None if caps.get(2).is_none() && digit_at(text, start_match.end()) => None,
        None => Some(start),
    }
}

/// Latest year found anywhere in `text`, normalizing short range ends.
///
/// `"GTA 2014-18 Tile A"` yields 2018, `"Muskoka 2021 A"` yields 2021.
pub fn extract_latest_year(text: &str) -> Option<u16> {
    YEAR_PATTERN
        .captures_iter(text)
        .filter_map(|caps| latest_in_match(text, &caps))
        .max()
}

/// First year or year-range token in `text` with inner spaces removed, e.g. `"2016-18"`.
pub fn extract_year_range(text: &str) -> Option<String> {
    YEAR_PATTERN
        .captures_iter(text)
        .find(|caps| latest_in_match(text, caps).is_some())
        .and_then(|caps| caps.get(0))
        .map(|m| m.as_str().replace(' ', ""))
}

/// Replaces every year and year-range fragment with a space.
///
/// Digits that are part of a longer number stay, so `"Block 12015"` is left intact.
pub fn strip_year_fragments(text: &str) -> String {
    YEAR_PATTERN
        .replace_all(text, |caps: &Captures<'_>| match latest_in_match(text, caps) {
            Some(_) => " ".to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}
