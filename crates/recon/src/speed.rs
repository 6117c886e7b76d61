//! Circuit speed labels.
//!
//! Ordering-system speeds (`"300M x 30M"`, `"1G x 1G"`, `"Cell"`) and speeds
//! parsed from device notes share one model so they compare after unit
//! normalization. Bandwidth is always held in megabits.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedLabel {
    Bandwidth { up_mbps: f64, down_mbps: f64 },
    Cell,
    Satellite,
    Unspecified,
    Other(String),
}

fn bandwidth_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*([MG])(?:B(?:PS)?)?\s*x\s*(\d+(?:\.\d+)?)\s*([MG])(?:B(?:PS)?)?")
            .expect("bandwidth pattern is valid")
    })
}

fn to_mbps(value: &str, unit: &str) -> Option<f64> {
    let n: f64 = value.parse().ok()?;
    if unit.eq_ignore_ascii_case("g") {
        Some(n * 1000.0)
    } else {
        Some(n)
    }
}

impl SpeedLabel {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Unspecified;
        }
        if trimmed.eq_ignore_ascii_case("cell") {
            return Self::Cell;
        }
        if trimmed.eq_ignore_ascii_case("satellite") {
            return Self::Satellite;
        }
        match Self::find_bandwidth(trimmed) {
            Some((label, _)) => label,
            None => Self::Other(trimmed.to_string()),
        }
    }

    /// Find the first `<up> x <down>` token in free text, returning the label
    /// and the byte range it occupied.
    pub fn find_bandwidth(text: &str) -> Option<(Self, Range<usize>)> {
        let caps = bandwidth_pattern().captures(text)?;
        let whole = caps.get(0)?;
        let up = to_mbps(caps.get(1)?.as_str(), caps.get(2)?.as_str())?;
        let down = to_mbps(caps.get(3)?.as_str(), caps.get(4)?.as_str())?;
        Some((Self::Bandwidth { up_mbps: up, down_mbps: down }, whole.range()))
    }

    pub fn is_wireless(&self) -> bool {
        matches!(self, Self::Cell | Self::Satellite)
    }

    pub fn is_specified(&self) -> bool {
        !matches!(self, Self::Unspecified)
    }

    pub fn render(&self) -> String {
        match self {
            Self::Bandwidth { up_mbps, down_mbps } => format!("{up_mbps:.1}M x {down_mbps:.1}M"),
            Self::Cell => "Cell".to_string(),
            Self::Satellite => "Satellite".to_string(),
            Self::Unspecified => String::new(),
            Self::Other(s) => s.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_megabit_pair() {
        assert_eq!(
            SpeedLabel::parse("300M x 30M"),
            SpeedLabel::Bandwidth { up_mbps: 300.0, down_mbps: 30.0 }
        );
    }

    #[test]
    fn gigabit_normalized_to_megabits() {
        assert_eq!(
            SpeedLabel::parse("1G x 500MB"),
            SpeedLabel::Bandwidth { up_mbps: 1000.0, down_mbps: 500.0 }
        );
        assert_eq!(SpeedLabel::parse("1.5g x 1.5g").render(), "1500.0M x 1500.0M");
    }

    #[test]
    fn sentinels_are_case_insensitive() {
        assert_eq!(SpeedLabel::parse("CELL"), SpeedLabel::Cell);
        assert_eq!(SpeedLabel::parse(" satellite "), SpeedLabel::Satellite);
        assert!(SpeedLabel::parse("Cell").is_wireless());
    }

    #[test]
    fn empty_and_unknown() {
        assert_eq!(SpeedLabel::parse("  "), SpeedLabel::Unspecified);
        assert_eq!(SpeedLabel::parse("fast"), SpeedLabel::Other("fast".into()));
        assert_eq!(SpeedLabel::parse("").render(), "");
    }

    #[test]
    fn find_reports_range() {
        let text = "Comcast 300M x 30M";
        let (_, range) = SpeedLabel::find_bandwidth(text).unwrap();
        assert_eq!(&text[range], "300M x 30M");
    }
}
