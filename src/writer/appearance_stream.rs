//! Appearance streams for signature widgets.
//!
//! PDF Spec: ISO 32000-1:2008, Section 12.5.5 (Appearance Streams) and
//! Section 12.7.4.5 (Signature Fields).
//!
//! A visible signature is drawn as a Form XObject sized to the widget
//! rectangle: an optional background fill, an optional border, and text
//! set in Helvetica. Text is wrapped to the rectangle and, unless a font
//! size is given, shrunk until it fits.
//!
//! # Example
//!
//! ```ignore
//! use pdf_seal::writer::AppearanceStreamBuilder;
//!
//! let ap = AppearanceStreamBuilder::for_signature(&bounds, &appearance, &details);
//! let form_xobject = ap.build();
//! ```

use super::object_serializer::format_number;
use crate::document::Rectangle;
use crate::object::{Dict, Object};
use crate::signatures::{SignatureAppearance, SignatureDetails};

/// Resource name of the appearance font.
const FONT_RESOURCE: &str = "Helv";
/// Baseline-to-baseline distance as a multiple of the font size.
const LEADING: f64 = 1.2;
/// Largest automatically chosen font size.
const MAX_AUTO_FONT_SIZE: f64 = 12.0;
/// Smallest automatically chosen font size.
const MIN_AUTO_FONT_SIZE: f64 = 4.0;
/// Inner margin added to the border width.
const PADDING: f64 = 2.0;

/// Helvetica advance widths for ASCII 32..=126, in 1/1000 em (Adobe AFM).
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0..9
    278, 278, 584, 584, 584, 556, 1015, // :..@
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // A..M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N..Z
    278, 278, 278, 469, 556, 333, // [..`
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // a..m
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // n..z
    334, 260, 334, 584, // {..~
];

/// Width used for characters outside the table.
const DEFAULT_WIDTH: u16 = 556;

/// Width of `text` in points at `font_size`.
pub fn text_width(text: &str, font_size: f64) -> f64 {
    let units: u32 = text
        .chars()
        .map(|c| match c as u32 {
            code @ 32..=126 => HELVETICA_WIDTHS[(code - 32) as usize] as u32,
            _ => DEFAULT_WIDTH as u32,
        })
        .sum();
    units as f64 * font_size / 1000.0
}

/// Greedy word wrap; words longer than a line are broken by character.
fn wrap_line(text: &str, font_size: f64, max_width: f64) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current, word)
        };
        if text_width(&candidate, font_size) <= max_width {
            current = candidate;
            continue;
        }
        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if text_width(word, font_size) <= max_width {
            current = word.to_string();
        } else {
            for c in word.chars() {
                let mut next = current.clone();
                next.push(c);
                if text_width(&next, font_size) > max_width && !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                    current.push(c);
                } else {
                    current = next;
                }
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn wrap_text(paragraphs: &[String], font_size: f64, max_width: f64) -> Vec<String> {
    paragraphs
        .iter()
        .flat_map(|p| wrap_line(p, font_size, max_width))
        .collect()
}

/// Text lines shown in a signature appearance.
pub fn signature_lines(appearance: &SignatureAppearance, details: &SignatureDetails) -> Vec<String> {
    if let Some(text) = &appearance.text {
        return text.lines().map(str::to_string).collect();
    }
    let mut lines = Vec::new();
    if appearance.show_name {
        lines.push(format!("Digitally signed by {}", details.signer_name));
    }
    if appearance.show_date {
        lines.push(format!("Date: {}", details.signing_time.format("%Y.%m.%d %H:%M:%S UTC")));
    }
    if appearance.show_reason {
        if let Some(reason) = &details.reason {
            lines.push(format!("Reason: {}", reason));
        }
    }
    if appearance.show_location {
        if let Some(location) = &details.location {
            lines.push(format!("Location: {}", location));
        }
    }
    lines
}

/// Literal string in WinAnsi; unmapped characters become `?`.
fn pdf_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('(');
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            },
            ' '..='~' => out.push(c),
            '\u{A0}'..='\u{FF}' => out.push_str(&format!("\\{:03o}", c as u32)),
            _ => out.push('?'),
        }
    }
    out.push(')');
    out
}

/// Builder for signature widget appearance streams.
#[derive(Debug, Clone)]
pub struct AppearanceStreamBuilder {
    width: f64,
    height: f64,
    content: Vec<u8>,
    resources: Dict,
    font_size: Option<f64>,
}

impl AppearanceStreamBuilder {
    /// Empty appearance of the given size.
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width: width.max(0.0),
            height: height.max(0.0),
            content: Vec::new(),
            resources: Dict::new(),
            font_size: None,
        }
    }

    /// Appearance for a signature widget at `bounds`.
    ///
    /// Invisible appearances and empty rectangles produce an empty stream.
    pub fn for_signature(
        bounds: &Rectangle,
        appearance: &SignatureAppearance,
        details: &SignatureDetails,
    ) -> Self {
        if !appearance.visible || bounds.is_empty() {
            return Self::new(0.0, 0.0);
        }
        let mut builder = Self::new(bounds.width, bounds.height);
        let (w, h) = (builder.width, builder.height);
        let mut content = String::from("q\n");

        if let Some(bg) = appearance.background_color {
            content.push_str(&format!("{} rg\n0 0 {} {} re f\n", bg.to_operands(), format_number(w), format_number(h)));
        }

        let border = appearance.border_width.max(0.0) as f64;
        if let Some(color) = appearance.border_color.filter(|_| border > 0.0) {
            content.push_str(&format!(
                "{} RG\n{} w\n{} {} {} {} re S\n",
                color.to_operands(),
                format_number(border),
                format_number(border / 2.0),
                format_number(border / 2.0),
                format_number((w - border).max(0.0)),
                format_number((h - border).max(0.0))
            ));
        }

        let inset = border + PADDING;
        let (avail_w, avail_h) = (w - 2.0 * inset, h - 2.0 * inset);
        let paragraphs = signature_lines(appearance, details);

        if !paragraphs.is_empty() && avail_w > 0.0 && avail_h > 0.0 {
            let (size, lines) = match appearance.font_size {
                Some(size) => {
                    let size = size.max(1.0) as f64;
                    (size, wrap_text(&paragraphs, size, avail_w))
                },
                None => fit_text(&paragraphs, avail_w, avail_h),
            };
            builder.font_size = Some(size);
            builder.add_helvetica();

            content.push_str(&format!(
                "BT\n/{} {} Tf\n{} rg\n{} {} Td\n",
                FONT_RESOURCE,
                format_number(size),
                appearance.text_color.to_operands(),
                format_number(inset),
                format_number(h - inset - size)
            ));
            for (i, line) in lines.iter().enumerate() {
                if i > 0 {
                    content.push_str(&format!("0 {} Td\n", format_number(-size * LEADING)));
                }
                content.push_str(&pdf_literal(line));
                content.push_str(" Tj\n");
            }
            content.push_str("ET\n");
        }

        content.push_str("Q\n");
        builder.content = content.into_bytes();
        builder
    }

    fn add_helvetica(&mut self) {
        let mut font = Dict::new();
        font.insert("Type".to_string(), Object::name("Font"));
        font.insert("Subtype".to_string(), Object::name("Type1"));
        font.insert("BaseFont".to_string(), Object::name("Helvetica"));
        font.insert("Encoding".to_string(), Object::name("WinAnsiEncoding"));

        let mut fonts = Dict::new();
        fonts.insert(FONT_RESOURCE.to_string(), Object::Dictionary(font));
        self.resources.insert("Font".to_string(), Object::Dictionary(fonts));
    }

    /// The Form XObject stream.
    pub fn build(&self) -> Object {
        let mut dict = Dict::new();
        dict.insert("Type".to_string(), Object::name("XObject"));
        dict.insert("Subtype".to_string(), Object::name("Form"));
        dict.insert("FormType".to_string(), Object::Integer(1));
        dict.insert(
            "BBox".to_string(),
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(self.width),
                Object::Real(self.height),
            ]),
        );
        if !self.resources.is_empty() {
            dict.insert("Resources".to_string(), Object::Dictionary(self.resources.clone()));
        }
        dict.insert("Length".to_string(), Object::Integer(self.content.len() as i64));

        Object::Stream {
            dict,
            data: bytes::Bytes::from(self.content.clone()),
        }
    }

    /// Chosen font size, if any text is drawn.
    pub fn font_size(&self) -> Option<f64> {
        self.font_size
    }

    /// Content stream bytes.
    pub fn content(&self) -> &[u8] {
        &self.content
    }
}

/// Largest size in half-point steps whose wrapped lines fit the box.
fn fit_text(paragraphs: &[String], max_width: f64, max_height: f64) -> (f64, Vec<String>) {
    let mut size = MAX_AUTO_FONT_SIZE;
    loop {
        let lines = wrap_text(paragraphs, size, max_width);
        let height = size + (lines.len().saturating_sub(1)) as f64 * size * LEADING;
        if height <= max_height || size <= MIN_AUTO_FONT_SIZE {
            return (size, lines);
        }
        size -= 0.5;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::Color;
    use chrono::{TimeZone, Utc};

    fn details() -> SignatureDetails {
        SignatureDetails {
            signer_name: "Ana Lima".to_string(),
            signing_time: Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap(),
            reason: Some("Approved".to_string()),
            location: None,
            contact_info: None,
        }
    }

    fn content_of(ap: &AppearanceStreamBuilder) -> String {
        String::from_utf8_lossy(ap.content()).into_owned()
    }

    #[test]
    fn test_text_width() {
        assert_eq!(text_width("", 12.0), 0.0);
        assert!((text_width("A", 10.0) - 6.67).abs() < 1e-9);
        assert!((text_width("il", 1000.0) - 444.0).abs() < 1e-9);
    }

    #[test]
    fn test_signature_lines() {
        let lines = signature_lines(&SignatureAppearance::default(), &details());
        assert_eq!(
            lines,
            [
                "Digitally signed by Ana Lima",
                "Date: 2024.05.06 07:08:09 UTC",
                "Reason: Approved"
            ]
        );
        let custom = SignatureAppearance::default().with_text("Line one\nLine two");
        assert_eq!(signature_lines(&custom, &details()), ["Line one", "Line two"]);
    }

    #[test]
    fn test_wrap_breaks_long_words() {
        let lines = wrap_line("Supercalifragilistic", 10.0, 30.0);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| text_width(l, 10.0) <= 30.0));
        assert_eq!(lines.concat(), "Supercalifragilistic");
    }

    #[test]
    fn test_auto_size_fits_rectangle() {
        let bounds = Rectangle::new(0.0, 0.0, 120.0, 40.0);
        let ap = AppearanceStreamBuilder::for_signature(&bounds, &SignatureAppearance::default(), &details());
        let size = ap.font_size().unwrap();
        assert!(size < MAX_AUTO_FONT_SIZE);
        assert!(size >= MIN_AUTO_FONT_SIZE);
    }

    #[test]
    fn test_fixed_font_size_is_used() {
        let bounds = Rectangle::new(0.0, 0.0, 200.0, 50.0);
        let appearance = SignatureAppearance::default().with_font_size(9.0);
        let ap = AppearanceStreamBuilder::for_signature(&bounds, &appearance, &details());
        assert_eq!(ap.font_size(), Some(9.0));
        assert!(content_of(&ap).contains("/Helv 9 Tf"));
    }

    #[test]
    fn test_background_and_border() {
        let bounds = Rectangle::new(10.0, 10.0, 200.0, 50.0);
        let appearance = SignatureAppearance::default().with_background(Color::rgb(1.0, 1.0, 0.5));
        let ap = AppearanceStreamBuilder::for_signature(&bounds, &appearance, &details());
        let content = content_of(&ap);
        assert!(content.contains("1 1 0.5 rg\n0 0 200 50 re f"));
        assert!(content.contains("0 0 0 RG\n1 w\n0.5 0.5 199 49 re S"));
        assert!(content.contains("(Digitally signed by Ana Lima) Tj"));
    }

    #[test]
    fn test_invisible_is_empty() {
        let bounds = Rectangle::new(0.0, 0.0, 200.0, 50.0);
        let ap = AppearanceStreamBuilder::for_signature(&bounds, &SignatureAppearance::invisible(), &details());
        assert!(ap.content().is_empty());
        assert!(ap.font_size().is_none());
    }

    #[test]
    fn test_build_form_xobject() {
        let bounds = Rectangle::new(0.0, 0.0, 150.0, 40.0);
        let ap = AppearanceStreamBuilder::for_signature(&bounds, &SignatureAppearance::default(), &details());
        let Object::Stream { dict, data } = ap.build() else {
            panic!("expected a stream");
        };
        assert_eq!(dict.get("Subtype"), Some(&Object::name("Form")));
        assert!(dict.contains_key("Resources"));
        assert_eq!(dict.get("Length"), Some(&Object::Integer(data.len() as i64)));
    }

    #[test]
    fn test_literal_escaping() {
        assert_eq!(pdf_literal("a(b)\\"), "(a\\(b\\)\\\\)");
        assert_eq!(pdf_literal("caf\u{e9}"), "(caf\\351)");
        assert_eq!(pdf_literal("\u{41f}"), "(?)");
    }
}
