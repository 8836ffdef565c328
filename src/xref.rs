//! Cross-reference table parser.
//!
//! The xref table maps object numbers to byte offsets (or object-stream slots).
//! Both classic tables and PDF 1.5 cross-reference streams are read, and the
//! `/Prev` chain of incremental updates is followed so the newest entry for
//! each object wins.

use crate::error::{Error, Result};
use crate::object::{Dict, Object};
use crate::parser::parse_indirect_object_at;
use std::collections::{HashMap, HashSet};

/// Upper bound on /Prev chain length.
const MAX_PREV_CHAIN: usize = 100;

/// How far back from EOF to look for `startxref`.
const STARTXREF_WINDOW: usize = 2048;

/// Cross-reference table entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntryType {
    /// Entry for a free object
    Free,
    /// Entry for an uncompressed object
    Uncompressed,
    /// Entry for an object in an object stream (PDF 1.5+)
    Compressed,
}

/// Cross-reference table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XRefEntry {
    /// Type of entry
    pub entry_type: XRefEntryType,
    /// Byte offset (uncompressed) or containing object stream number (compressed)
    pub offset: u64,
    /// Generation number (uncompressed) or index within the object stream (compressed)
    pub generation: u16,
}

impl XRefEntry {
    /// Uncompressed object at a byte offset.
    pub fn uncompressed(offset: u64, generation: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Uncompressed,
            offset,
            generation,
        }
    }

    /// Object stored inside an object stream.
    pub fn compressed(stream_obj_num: u64, index_in_stream: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Compressed,
            offset: stream_obj_num,
            generation: index_in_stream,
        }
    }

    /// Free entry.
    pub fn free(next_free: u64, generation: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Free,
            offset: next_free,
            generation,
        }
    }

    /// Whether the entry points at a live object.
    pub fn in_use(&self) -> bool {
        self.entry_type != XRefEntryType::Free
    }
}

/// Which syntax the newest cross-reference section used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefKind {
    /// `xref` keyword table followed by `trailer`
    Table,
    /// `/Type /XRef` stream
    Stream,
    /// Rebuilt by scanning object headers
    Reconstructed,
}

/// Cross-reference table that maps object numbers to their locations.
#[derive(Debug, Clone)]
pub struct CrossRefTable {
    entries: HashMap<u32, XRefEntry>,
    trailer: Option<Dict>,
    kind: XRefKind,
}

impl CrossRefTable {
    /// Create a new empty cross-reference table.
    pub fn new(kind: XRefKind) -> Self {
        Self {
            entries: HashMap::new(),
            trailer: None,
            kind,
        }
    }

    /// Set the trailer dictionary.
    pub fn set_trailer(&mut self, trailer: Dict) {
        self.trailer = Some(trailer);
    }

    /// Trailer dictionary of the newest section.
    pub fn trailer(&self) -> Option<&Dict> {
        self.trailer.as_ref()
    }

    /// Syntax of the newest section.
    pub fn kind(&self) -> XRefKind {
        self.kind
    }

    /// Add an entry to the cross-reference table.
    pub fn add_entry(&mut self, object_number: u32, entry: XRefEntry) {
        self.entries.insert(object_number, entry);
    }

    /// Get an entry by object number.
    pub fn get(&self, object_number: u32) -> Option<&XRefEntry> {
        self.entries.get(&object_number)
    }

    /// Object numbers with live entries, ascending.
    pub fn live_object_numbers(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, e)| e.in_use())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Highest object number with any entry.
    pub fn max_object_number(&self) -> u32 {
        self.entries.keys().copied().max().unwrap_or(0)
    }

    /// Merge an older section. Entries already present (newer) win.
    pub fn merge_from(&mut self, older: CrossRefTable) {
        for (obj_num, entry) in older.entries {
            self.entries.entry(obj_num).or_insert(entry);
        }
        if self.trailer.is_none() {
            self.trailer = older.trailer;
        }
    }

    /// Get the number of entries in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Find the offset recorded after the last `startxref` keyword.
pub fn find_xref_offset(data: &[u8]) -> Result<u64> {
    let window_start = data.len().saturating_sub(STARTXREF_WINDOW);
    let tail = &data[window_start..];
    let keyword = b"startxref";

    let pos = tail
        .windows(keyword.len())
        .rposition(|w| w == keyword)
        .ok_or_else(|| Error::MalformedDocument("startxref not found".to_string()))?;

    let digits: String = tail[pos + keyword.len()..]
        .iter()
        .skip_while(|c| c.is_ascii_whitespace())
        .take_while(|c| c.is_ascii_digit())
        .map(|&c| c as char)
        .collect();

    digits
        .parse::<u64>()
        .map_err(|_| Error::MalformedDocument("startxref offset is not a number".to_string()))
}

/// Parse the cross-reference chain starting at `offset`.
pub fn parse_xref(data: &[u8], offset: u64) -> Result<CrossRefTable> {
    let mut visited = HashSet::new();
    parse_xref_recursive(data, offset, &mut visited)
}

fn parse_xref_recursive(
    data: &[u8],
    offset: u64,
    visited: &mut HashSet<u64>,
) -> Result<CrossRefTable> {
    if visited.len() > MAX_PREV_CHAIN {
        return Err(Error::MalformedDocument(format!(
            "xref /Prev chain longer than {}",
            MAX_PREV_CHAIN
        )));
    }
    if !visited.insert(offset) {
        return Err(Error::MalformedDocument(format!(
            "xref /Prev chain loops back to offset {}",
            offset
        )));
    }

    let start = usize::try_from(offset)
        .ok()
        .filter(|&o| o < data.len())
        .ok_or_else(|| {
            Error::MalformedDocument(format!("xref offset {} beyond end of file", offset))
        })?;

    let section = &data[start..];
    let leading_ws = section.iter().take_while(|c| c.is_ascii_whitespace()).count();

    let mut xref = if section[leading_ws..].starts_with(b"xref") {
        log::debug!("Classic xref table at offset {}", offset);
        let mut table = parse_traditional_xref(data, start + leading_ws)?;

        // Hybrid files point at a supplementary stream from the classic trailer
        let xref_stm = table
            .trailer()
            .and_then(|t| t.get("XRefStm"))
            .and_then(|o| o.as_integer());
        if let Some(stm_offset) = xref_stm {
            log::debug!("Hybrid file: merging /XRefStm at {}", stm_offset);
            match parse_xref_stream(data, stm_offset.max(0) as usize) {
                Ok(stream_table) => {
                    for (id, entry) in stream_table.entries {
                        table.entries.entry(id).or_insert(entry);
                    }
                },
                Err(e) => log::warn!("Ignoring unreadable /XRefStm: {}", e),
            }
        }
        table
    } else {
        log::debug!("Cross-reference stream at offset {}", offset);
        parse_xref_stream(data, start + leading_ws)?
    };

    let prev = xref
        .trailer()
        .and_then(|t| t.get("Prev"))
        .and_then(|o| o.as_integer());
    if let Some(prev_offset) = prev {
        log::debug!("Following /Prev {} from xref at {}", prev_offset, offset);
        let older = parse_xref_recursive(data, prev_offset.max(0) as u64, visited)?;
        xref.merge_from(older);
    }

    Ok(xref)
}

/// Parse a classic table starting at the `xref` keyword.
///
/// ```text
/// xref
/// 0 6
/// 0000000000 65535 f
/// 0000000018 00000 n
/// trailer
/// << /Size 6 /Root 1 0 R >>
/// ```
fn parse_traditional_xref(data: &[u8], start: usize) -> Result<CrossRefTable> {
    let mut xref = CrossRefTable::new(XRefKind::Table);
    let body = &data[start + b"xref".len()..];

    let trailer_pos = body
        .windows(b"trailer".len())
        .position(|w| w == b"trailer")
        .ok_or_else(|| Error::MalformedDocument("xref table has no trailer".to_string()))?;

    let lines = split_lines(&body[..trailer_pos]);
    let mut idx = 0;

    while idx < lines.len() {
        let parts: Vec<&str> = lines[idx].split_whitespace().collect();
        idx += 1;
        if parts.len() != 2 {
            continue;
        }

        let (start_obj, count) = match (parts[0].parse::<u32>(), parts[1].parse::<u32>()) {
            (Ok(s), Ok(c)) => (s, c),
            _ => continue,
        };
        if count > 10_000_000 {
            return Err(Error::MalformedDocument("xref subsection count exceeds limit".to_string()));
        }

        let mut i = 0;
        while i < count && idx < lines.len() {
            let fields: Vec<&str> = lines[idx].split_whitespace().collect();
            idx += 1;
            if fields.is_empty() {
                continue;
            }

            let entry = match (fields.first(), fields.get(1), fields.get(2)) {
                (Some(off), Some(gen), Some(flag)) => {
                    match (off.parse::<u64>(), gen.parse::<u16>()) {
                        (Ok(off), Ok(gen)) if flag.starts_with('n') => XRefEntry::uncompressed(off, gen),
                        (Ok(off), Ok(gen)) => XRefEntry::free(off, gen),
                        _ => {
                            log::warn!("Malformed xref entry for object {}", start_obj + i);
                            XRefEntry::free(0, 65535)
                        },
                    }
                },
                _ => {
                    log::warn!("Short xref entry for object {}", start_obj + i);
                    XRefEntry::free(0, 65535)
                },
            };
            xref.add_entry(start_obj + i, entry);
            i += 1;
        }
    }

    let trailer_start = start + b"xref".len() + trailer_pos + b"trailer".len();
    let (_, trailer_obj) = crate::parser::parse_object(&data[trailer_start..]).map_err(|e| {
        Error::ParseError {
            offset: trailer_start,
            reason: format!("unreadable trailer dictionary: {:?}", e.map(|err| err.code)),
        }
    })?;

    match trailer_obj {
        Object::Dictionary(dict) => xref.set_trailer(dict),
        other => {
            return Err(Error::InvalidObjectType {
                expected: "Dictionary".to_string(),
                found: other.type_name().to_string(),
            })
        },
    }

    Ok(xref)
}

/// Parse a cross-reference stream object at `start`.
///
/// Each row has three big-endian fields whose widths come from `/W`:
/// type (0 free, 1 offset, 2 compressed), then two type-specific values.
fn parse_xref_stream(data: &[u8], start: usize) -> Result<CrossRefTable> {
    let (_, obj) = parse_indirect_object_at(data, start)?;

    let dict = match &obj {
        Object::Stream { dict, .. } => dict.clone(),
        other => {
            return Err(Error::MalformedDocument(format!(
                "expected xref stream at {}, found {}",
                start,
                other.type_name()
            )))
        },
    };

    if let Some(type_name) = dict.get("Type").and_then(|o| o.as_name()) {
        if type_name != "XRef" {
            return Err(Error::MalformedDocument(format!(
                "expected /Type /XRef, got /Type /{}",
                type_name
            )));
        }
    }

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(|o| o.as_array())
        .map(|arr| arr.iter().filter_map(|o| o.as_integer()).map(|w| w.max(0) as usize).collect())
        .unwrap_or_default();
    if widths.len() != 3 || widths.iter().any(|&w| w > 8) {
        return Err(Error::MalformedDocument("invalid /W array in xref stream".to_string()));
    }
    let (w1, w2, w3) = (widths[0], widths[1], widths[2]);
    let row_len = w1 + w2 + w3;
    if row_len == 0 {
        return Err(Error::MalformedDocument("zero-width xref stream rows".to_string()));
    }

    let size = dict
        .get("Size")
        .and_then(|o| o.as_integer())
        .ok_or_else(|| Error::MalformedDocument("missing /Size in xref stream".to_string()))?
        .max(0) as u32;

    let ranges: Vec<(u32, u32)> = match dict.get("Index").and_then(|o| o.as_array()) {
        Some(index) => index
            .chunks(2)
            .filter_map(|pair| match pair {
                [s, c] => Some((s.as_integer()?.max(0) as u32, c.as_integer()?.max(0) as u32)),
                _ => None,
            })
            .collect(),
        None => vec![(0, size)],
    };

    let rows = obj.decode_stream_data()?;
    let mut xref = CrossRefTable::new(XRefKind::Stream);
    let mut pos = 0;

    for (first, count) in ranges {
        for i in 0..count {
            let row = rows.get(pos..pos + row_len).ok_or_else(|| {
                Error::MalformedDocument("truncated xref stream data".to_string())
            })?;
            pos += row_len;

            // A zero-width type field means type 1
            let entry_type = if w1 == 0 { 1 } else { read_int(&row[..w1]) };
            let field2 = read_int(&row[w1..w1 + w2]);
            let field3 = read_int(&row[w1 + w2..]);

            let entry = match entry_type {
                0 => XRefEntry::free(field2, field3 as u16),
                1 => XRefEntry::uncompressed(field2, field3 as u16),
                2 => XRefEntry::compressed(field2, field3 as u16),
                // Unknown types are treated as null references (Section 7.5.8.3)
                _ => XRefEntry::free(0, 0),
            };
            xref.add_entry(first + i, entry);
        }
    }

    xref.set_trailer(dict);
    Ok(xref)
}

/// Read a big-endian integer of arbitrary width.
fn read_int(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Split bytes into lines on LF, CRLF or bare CR.
fn split_lines(bytes: &[u8]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\r' => {
                lines.push(String::from_utf8_lossy(&current).into_owned());
                current.clear();
                if bytes.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'\n' => {
                lines.push(String::from_utf8_lossy(&current).into_owned());
                current.clear();
            },
            c => current.push(c),
        }
        i += 1;
    }
    if !current.is_empty() {
        lines.push(String::from_utf8_lossy(&current).into_owned());
    }
    lines
}
