//! Document information dictionary (ISO 32000-1:2008, Section 14.3.3).

use super::store::ObjectStore;
use crate::error::Result;
use crate::object::{Dict, Object};
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Values of the `/Info` dictionary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdfMetadata {
    /// `/Title`
    pub title: Option<String>,
    /// `/Author`
    pub author: Option<String>,
    /// `/Subject`
    pub subject: Option<String>,
    /// `/Keywords`
    pub keywords: Option<String>,
    /// `/Creator`
    pub creator: Option<String>,
    /// `/Producer`
    pub producer: Option<String>,
    /// `/CreationDate`
    pub creation_date: Option<DateTime<Utc>>,
    /// `/ModDate`
    pub modification_date: Option<DateTime<Utc>>,
    /// Every other text-valued key, in dictionary order
    pub custom_properties: IndexMap<String, String>,
}

const STANDARD_TEXT_KEYS: [&str; 6] = ["Title", "Author", "Subject", "Keywords", "Creator", "Producer"];

impl PdfMetadata {
    /// Read an `/Info` dictionary. Values that are not text are skipped.
    pub fn from_info_dict(info: &Dict, store: &ObjectStore) -> Result<Self> {
        let mut meta = PdfMetadata::default();

        let mut keys: Vec<&String> = info.keys().collect();
        keys.sort();

        for key in keys {
            let value = match store.get_resolved(info, key) {
                Ok(Some(Object::String(bytes))) => decode_text_string(&bytes),
                Ok(Some(Object::Name(name))) => name,
                Ok(_) => continue,
                Err(e) => {
                    log::warn!("Skipping unreadable /Info entry /{}: {}", key, e);
                    continue;
                },
            };
            match key.as_str() {
                "Title" => meta.title = Some(value),
                "Author" => meta.author = Some(value),
                "Subject" => meta.subject = Some(value),
                "Keywords" => meta.keywords = Some(value),
                "Creator" => meta.creator = Some(value),
                "Producer" => meta.producer = Some(value),
                "CreationDate" => meta.creation_date = parse_pdf_date(&value),
                "ModDate" => meta.modification_date = parse_pdf_date(&value),
                _ => {
                    meta.custom_properties.insert(key.clone(), value);
                },
            }
        }
        Ok(meta)
    }

    /// Render as an `/Info` dictionary.
    pub fn to_info_dict(&self) -> Dict {
        let mut dict = Dict::new();
        let standard = [
            &self.title,
            &self.author,
            &self.subject,
            &self.keywords,
            &self.creator,
            &self.producer,
        ];
        for (key, value) in STANDARD_TEXT_KEYS.iter().zip(standard) {
            if let Some(v) = value {
                dict.insert(key.to_string(), Object::String(encode_text_string(v)));
            }
        }
        if let Some(date) = self.creation_date {
            dict.insert("CreationDate".to_string(), Object::String(format_pdf_date(&date).into_bytes()));
        }
        if let Some(date) = self.modification_date {
            dict.insert("ModDate".to_string(), Object::String(format_pdf_date(&date).into_bytes()));
        }
        for (key, value) in &self.custom_properties {
            dict.insert(key.clone(), Object::String(encode_text_string(value)));
        }
        dict
    }
}

/// PDFDocEncoding code to character (ISO 32000-1:2008, Annex D.2).
fn pdfdoc_char(code: u8) -> Option<char> {
    let c = match code {
        0x80 => '\u{2022}',
        0x81 => '\u{2020}',
        0x82 => '\u{2021}',
        0x83 => '\u{2026}',
        0x84 => '\u{2014}',
        0x85 => '\u{2013}',
        0x86 => '\u{0192}',
        0x87 => '\u{2044}',
        0x88 => '\u{2039}',
        0x89 => '\u{203A}',
        0x8A => '\u{2212}',
        0x8B => '\u{2030}',
        0x8C => '\u{201E}',
        0x8D => '\u{201C}',
        0x8E => '\u{201D}',
        0x8F => '\u{2018}',
        0x90 => '\u{2019}',
        0x91 => '\u{201A}',
        0x92 => '\u{2122}',
        0x93 => '\u{FB01}',
        0x94 => '\u{FB02}',
        0x95 => '\u{0141}',
        0x96 => '\u{0152}',
        0x97 => '\u{0160}',
        0x98 => '\u{0178}',
        0x99 => '\u{017D}',
        0x9A => '\u{0131}',
        0x9B => '\u{0142}',
        0x9C => '\u{0153}',
        0x9D => '\u{0161}',
        0x9E => '\u{017E}',
        0xA0 => '\u{20AC}',
        0x9F | 0xAD => return None,
        _ => code as char,
    };
    Some(c)
}

/// Decode a text string: UTF-16BE when it starts with a BOM, PDFDocEncoding otherwise.
pub fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(utf8) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        // PDF 2.0 UTF-8 text strings
        return String::from_utf8_lossy(utf8).into_owned();
    }
    bytes.iter().filter_map(|&b| pdfdoc_char(b)).collect()
}

/// Encode text as PDFDocEncoding when every character is representable,
/// otherwise as UTF-16BE with a byte order mark.
pub fn encode_text_string(text: &str) -> Vec<u8> {
    let pdfdoc: Option<Vec<u8>> = text
        .chars()
        .map(|c| (0u8..=0xFF).find(|&code| pdfdoc_char(code) == Some(c)))
        .collect();
    match pdfdoc {
        Some(bytes) => bytes,
        None => {
            let mut out = vec![0xFE, 0xFF];
            for unit in text.encode_utf16() {
                out.extend_from_slice(&unit.to_be_bytes());
            }
            out
        },
    }
}

/// Parse a date string of the form `D:YYYYMMDDHHmmSSOHH'mm'`.
///
/// Every component after the year is optional. Returns `None` when the
/// string is not a date.
pub fn parse_pdf_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    let s = s.strip_prefix("D:").unwrap_or(s);
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return None;
    }

    let field = |start: usize, len: usize, default: u32| -> Option<u32> {
        match digits.get(start..start + len) {
            Some(part) => part.parse().ok(),
            None => Some(default),
        }
    };
    let year: i32 = digits.get(0..4)?.parse().ok()?;
    let month = field(4, 2, 1)?;
    let day = field(6, 2, 1)?;
    let hour = field(8, 2, 0)?;
    let minute = field(10, 2, 0)?;
    let second = field(12, 2, 0)?;

    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;

    let rest = &s[digits.len()..];
    let offset_secs = match rest.chars().next() {
        Some(sign @ ('+' | '-')) => {
            let tz: String = rest[1..].chars().filter(|c| c.is_ascii_digit()).collect();
            let hours: i32 = tz.get(0..2).and_then(|h| h.parse().ok()).unwrap_or(0);
            let minutes: i32 = tz.get(2..4).and_then(|m| m.parse().ok()).unwrap_or(0);
            let secs = hours * 3600 + minutes * 60;
            if sign == '-' {
                -secs
            } else {
                secs
            }
        },
        _ => 0,
    };

    let offset = FixedOffset::east_opt(offset_secs)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Format a timestamp as a PDF date string in UTC.
pub fn format_pdf_date(date: &DateTime<Utc>) -> String {
    date.format("D:%Y%m%d%H%M%S+00'00'").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_full_date() {
        let d = parse_pdf_date("D:20240102030405Z").unwrap();
        assert_eq!((d.year(), d.month(), d.day()), (2024, 1, 2));
        assert_eq!((d.hour(), d.minute(), d.second()), (3, 4, 5));
    }

    #[test]
    fn test_parse_date_with_offset() {
        let d = parse_pdf_date("D:20240102120000+02'00'").unwrap();
        assert_eq!(d.hour(), 10);
        let d = parse_pdf_date("D:20240102120000-05'30'").unwrap();
        assert_eq!((d.hour(), d.minute()), (17, 30));
    }

    #[test]
    fn test_parse_partial_date() {
        let d = parse_pdf_date("D:2023").unwrap();
        assert_eq!((d.year(), d.month(), d.day()), (2023, 1, 1));
        assert!(parse_pdf_date("yesterday").is_none());
        assert!(parse_pdf_date("D:20231399").is_none());
    }

    #[test]
    fn test_format_round_trips_through_parse() {
        let now = Utc.with_ymd_and_hms(2025, 6, 30, 23, 59, 1).unwrap();
        let s = format_pdf_date(&now);
        assert_eq!(s, "D:20250630235901+00'00'");
        assert_eq!(parse_pdf_date(&s), Some(now));
    }

    #[test]
    fn test_decode_pdfdoc_and_utf16() {
        assert_eq!(decode_text_string(b"Plain"), "Plain");
        assert_eq!(decode_text_string(&[0x80, b'x']), "\u{2022}x");
        assert_eq!(decode_text_string(&[0xE9]), "\u{e9}");
        assert_eq!(decode_text_string(&[0xFE, 0xFF, 0x04, 0x1F]), "\u{41f}");
    }

    #[test]
    fn test_encode_prefers_pdfdoc() {
        assert_eq!(encode_text_string("Report"), b"Report".to_vec());
        assert_eq!(encode_text_string("caf\u{e9}"), vec![b'c', b'a', b'f', 0xE9]);
        assert_eq!(encode_text_string("\u{20AC}"), vec![0xA0]);
        let utf16 = encode_text_string("\u{041f}");
        assert_eq!(utf16, vec![0xFE, 0xFF, 0x04, 0x1F]);
        assert_eq!(decode_text_string(&utf16), "\u{041f}");
    }

    #[test]
    fn test_info_dict_round_trip() {
        let meta = PdfMetadata {
            title: Some("Contract".into()),
            author: Some("Ana".into()),
            creation_date: parse_pdf_date("D:20240102030405Z"),
            custom_properties: [("Department".to_string(), "Legal".to_string())]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let dict = meta.to_info_dict();
        assert_eq!(dict.get("Title"), Some(&Object::String(b"Contract".to_vec())));
        assert!(dict.contains_key("CreationDate"));
        assert!(dict.contains_key("Department"));
        assert!(!dict.contains_key("Subject"));
    }
}
