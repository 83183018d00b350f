use std::fmt;

use anyhow::{Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime};

/// One cell as it comes out of the loader, before any coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum RawCell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl RawCell {
    pub fn is_empty(&self) -> bool {
        match self {
            RawCell::Empty => true,
            RawCell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            RawCell::Empty => String::new(),
            RawCell::Text(s) => s.clone(),
            RawCell::Number(f) => format_number(*f),
            RawCell::Bool(b) => b.to_string(),
            RawCell::DateTime(dt) => format_datetime(dt),
        }
    }

    /// Numeric coercion. NaN and non-numeric text become `None`.
    pub fn to_number(&self) -> Option<f64> {
        let value = match self {
            RawCell::Empty | RawCell::DateTime(_) => return None,
            RawCell::Number(f) => *f,
            RawCell::Bool(b) => f64::from(u8::from(*b)),
            RawCell::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        (!value.is_nan()).then_some(value)
    }

    pub fn to_date(&self) -> Option<NaiveDate> {
        match self {
            RawCell::DateTime(dt) => Some(dt.date()),
            RawCell::Text(s) => {
                let trimmed = s.trim();
                parse_naive_date(trimmed)
                    .or_else(|_| parse_naive_datetime(trimmed).map(|dt| dt.date()))
                    .ok()
            }
            _ => None,
        }
    }

    pub fn to_text(&self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(self.as_display().trim().to_string())
        }
    }

    /// Join key form of a code cell. Numeric cells lose a zero fraction so
    /// `1234.0` from a spreadsheet matches `"1234"` from a CSV; text keeps its
    /// digits, leading zeros included, and only drops a trailing `.0`.
    pub fn to_code(&self) -> Option<String> {
        match self {
            RawCell::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                Some(strip_zero_fraction(trimmed).to_string())
            }
            RawCell::Empty => None,
            other => Some(other.as_display()),
        }
    }
}

fn strip_zero_fraction(code: &str) -> &str {
    match code.split_once('.') {
        Some((whole, fraction))
            if !whole.is_empty()
                && !fraction.is_empty()
                && whole.bytes().all(|b| b.is_ascii_digit())
                && fraction.bytes().all(|b| b == b'0') =>
        {
            whole
        }
        _ => code,
    }
}

impl fmt::Display for RawCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%Y/%m/%d",
        "%Y年%m月%d日",
        "%d/%m/%Y",
        "%m/%d/%Y",
        "%d-%m-%Y",
    ];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y/%m/%d %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.0}")
    } else if value.is_finite() {
        let text = format!("{value:.4}");
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        value.to_string()
    }
}

pub fn format_percent(value: f64) -> String {
    format!("{value:.2}")
}

fn format_datetime(dt: &NaiveDateTime) -> String {
    if dt.time() == chrono::NaiveTime::MIN {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
