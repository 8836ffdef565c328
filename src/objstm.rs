//! Object stream parsing (PDF 1.5+).
//!
//! ```text
//! 5 0 obj
//! << /Type /ObjStm /N 3 /First 14 /Filter /FlateDecode >>
//! stream
//! 2 0 3 45 4 98          % (object number, offset from /First) pairs
//! << ... >> << ... >> ...
//! endstream
//! ```
//!
//! Only the object at a given index is materialised; signature workflows touch
//! a handful of objects per stream.

use crate::error::{Error, Result};
use crate::object::Object;
use crate::parser::parse_object;

/// Decoded object stream with its offset table.
#[derive(Debug, Clone)]
pub struct ObjectStream {
    data: Vec<u8>,
    first: usize,
    /// `(object number, offset relative to /First)` in stream order
    offsets: Vec<(u32, usize)>,
}

impl ObjectStream {
    /// Decode an `/ObjStm` stream object and read its header.
    pub fn parse(stream_obj: &Object) -> Result<Self> {
        let dict = match stream_obj {
            Object::Stream { dict, .. } => dict,
            other => {
                return Err(Error::InvalidObjectType {
                    expected: "Stream".to_string(),
                    found: other.type_name().to_string(),
                })
            },
        };

        if let Some(type_name) = dict.get("Type").and_then(|o| o.as_name()) {
            if type_name != "ObjStm" {
                return Err(Error::MalformedDocument(format!(
                    "expected /Type /ObjStm, got /Type /{}",
                    type_name
                )));
            }
        }

        let n = dict
            .get("N")
            .and_then(|o| o.as_integer())
            .filter(|n| (0..=1_000_000).contains(n))
            .ok_or_else(|| Error::MalformedDocument("object stream has no valid /N".to_string()))?
            as usize;
        let first = dict
            .get("First")
            .and_then(|o| o.as_integer())
            .filter(|f| *f >= 0)
            .ok_or_else(|| Error::MalformedDocument("object stream has no valid /First".to_string()))?
            as usize;

        let data = stream_obj.decode_stream_data()?;
        if data.len() < first {
            return Err(Error::MalformedDocument(format!(
                "object stream data too short: {} bytes, /First is {}",
                data.len(),
                first
            )));
        }

        let header = String::from_utf8_lossy(&data[..first]);
        let numbers: Vec<u64> = header
            .split_ascii_whitespace()
            .filter_map(|t| t.parse().ok())
            .collect();
        if numbers.len() < n * 2 {
            return Err(Error::MalformedDocument(format!(
                "object stream header has {} numbers, expected {}",
                numbers.len(),
                n * 2
            )));
        }

        let offsets = numbers
            .chunks(2)
            .take(n)
            .map(|pair| (pair[0] as u32, pair[1] as usize))
            .collect();

        Ok(Self {
            data,
            first,
            offsets,
        })
    }

    /// Number of objects in the stream.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether the stream holds no objects.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Parse the object stored at `index`, checking it is object `expected_id`.
    pub fn object_at(&self, index: usize, expected_id: u32) -> Result<Object> {
        let (id, rel) = *self.offsets.get(index).ok_or_else(|| {
            Error::MalformedDocument(format!(
                "object stream index {} out of range ({} objects)",
                index,
                self.offsets.len()
            ))
        })?;
        if id != expected_id {
            // Writers occasionally disagree with their own xref; trust the header
            log::warn!(
                "object stream slot {} holds object {}, xref expected {}",
                index,
                id,
                expected_id
            );
            return self.object_by_id(expected_id);
        }
        self.parse_slot(rel)
    }

    /// Parse the object with number `id` wherever it sits in the stream.
    pub fn object_by_id(&self, id: u32) -> Result<Object> {
        let rel = self
            .offsets
            .iter()
            .find(|(candidate, _)| *candidate == id)
            .map(|(_, rel)| *rel)
            .ok_or(Error::ObjectNotFound(id, 0))?;
        self.parse_slot(rel)
    }

    fn parse_slot(&self, rel: usize) -> Result<Object> {
        let start = self.first + rel;
        let input = self.data.get(start..).ok_or_else(|| Error::ParseError {
            offset: start,
            reason: "object stream offset beyond decoded data".to_string(),
        })?;
        parse_object(input).map(|(_, obj)| obj).map_err(|e| Error::ParseError {
            offset: start,
            reason: format!("invalid object in object stream: {:?}", e.map(|err| err.code)),
        })
    }
}
