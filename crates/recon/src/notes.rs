//! Device-notes parser.
//!
//! Technicians type a two-section label into the device notes field:
//!
//! ```text
//! WAN 1
//! Comcast Workplace 300M x 30M
//! WAN 2
//! VZW Cell
//! ```
//!
//! Each section yields a carrier label and a speed. Sections may be missing,
//! headers may lack the space or carry a colon, and free text without any
//! header is treated as the WAN1 section.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::model::InterfaceId;
use crate::speed::SpeedLabel;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotesLabel {
    pub carrier: String,
    pub speed: SpeedLabel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceNotes {
    pub wan1: Option<NotesLabel>,
    pub wan2: Option<NotesLabel>,
}

impl DeviceNotes {
    pub fn for_interface(&self, interface: InterfaceId) -> Option<&NotesLabel> {
        match interface {
            InterfaceId::Wan1 => self.wan1.as_ref(),
            InterfaceId::Wan2 => self.wan2.as_ref(),
        }
    }
}

fn header(n: u8) -> &'static Regex {
    static WAN1: OnceLock<Regex> = OnceLock::new();
    static WAN2: OnceLock<Regex> = OnceLock::new();
    let cell = if n == 1 { &WAN1 } else { &WAN2 };
    cell.get_or_init(|| {
        Regex::new(&format!(r"(?i)WAN\s*{n}\s*:?\s*")).expect("header pattern is valid")
    })
}

fn whitespace() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"))
}

pub fn parse_device_notes(raw: &str) -> DeviceNotes {
    let text = whitespace().replace_all(raw.trim(), " ").into_owned();
    if text.is_empty() {
        return DeviceNotes::default();
    }

    let (wan1_text, wan2_text) = if let Some(m1) = header(1).find(&text) {
        let after = &text[m1.end()..];
        match header(2).find(after) {
            Some(m2) => (&after[..m2.start()], &after[m2.end()..]),
            None => (after, ""),
        }
    } else if let Some(m2) = header(2).find(&text) {
        ("", &text[m2.end()..])
    } else {
        (text.as_str(), "")
    };

    DeviceNotes {
        wan1: extract_label(wan1_text),
        wan2: extract_label(wan2_text),
    }
}

/// Strip punctuation other than `. & | - _` and collapse whitespace.
fn clean_carrier(s: &str) -> String {
    let replaced: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || matches!(c, '.' | '&' | '|' | '-' | '_') {
                c
            } else {
                ' '
            }
        })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn label(carrier: &str, speed: SpeedLabel) -> Option<NotesLabel> {
    Some(NotesLabel { carrier: carrier.to_string(), speed })
}

fn extract_label(segment: &str) -> Option<NotesLabel> {
    let segment = segment.trim();
    if segment.is_empty() {
        return None;
    }

    if let Some((speed, range)) = SpeedLabel::find_bandwidth(segment) {
        let carrier = clean_carrier(&segment[..range.start]);
        return Some(NotesLabel { carrier, speed });
    }

    let lower = segment.to_lowercase();
    if lower == "cell cell" {
        return label("VZW Cell", SpeedLabel::Cell);
    }
    if lower.ends_with(" cell") {
        let carrier = clean_carrier(&segment[..segment.len() - " cell".len()]);
        return Some(NotesLabel { carrier, speed: SpeedLabel::Cell });
    }
    if lower.contains("starlink") && lower.contains("satellite") {
        return label("Starlink", SpeedLabel::Satellite);
    }
    if lower.contains("verizon business") && segment.len() < 20 {
        return label("Verizon Business", SpeedLabel::Cell);
    }
    if lower.contains("vz gateway") || lower.contains("vzg") {
        return label("VZW Cell", SpeedLabel::Cell);
    }
    if lower == "dig" || lower == "digi" {
        return label("Digi", SpeedLabel::Cell);
    }
    if lower.contains("accelerated") {
        return label("Accelerated", SpeedLabel::Cell);
    }
    if lower == "unknown" {
        return None;
    }

    let carrier = clean_carrier(segment);
    if carrier.is_empty() {
        None
    } else {
        label(&carrier, SpeedLabel::Unspecified)
    }
}
