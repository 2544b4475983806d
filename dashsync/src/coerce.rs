//! Tolerant conversion of raw cell values.

/// A cell value as it arrives from a parser or from an earlier coercion.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RawValue<'a> {
    Missing,
    Text(&'a str),
    Number(f64),
}

impl<'a> From<&'a str> for RawValue<'a> {
    fn from(value: &'a str) -> Self {
        RawValue::Text(value)
    }
}

impl<'a> From<&'a String> for RawValue<'a> {
    fn from(value: &'a String) -> Self {
        RawValue::Text(value.as_str())
    }
}

impl<'a> From<Option<&'a str>> for RawValue<'a> {
    fn from(value: Option<&'a str>) -> Self {
        value.map_or(RawValue::Missing, RawValue::Text)
    }
}

impl From<f64> for RawValue<'_> {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<Option<f64>> for RawValue<'_> {
    fn from(value: Option<f64>) -> Self {
        value.map_or(RawValue::Missing, RawValue::Number)
    }
}

/// Convert a raw value to a finite number.
///
/// Empty or whitespace-only text, text that does not parse after removing
/// `,` thousands separators, and non-finite numbers all map to `None`.
pub fn coerce_number<'a>(raw: impl Into<RawValue<'a>>) -> Option<f64> {
    match raw.into() {
        RawValue::Missing => None,
        RawValue::Number(value) => value.is_finite().then_some(value),
        RawValue::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return None;
            }
            let digits: String = trimmed.chars().filter(|c| *c != ',').collect();
            digits
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
        }
    }
}

/// Trimmed, non-empty text or `None`.
pub fn coerce_text(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
