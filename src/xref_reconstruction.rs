//! Cross-reference reconstruction for damaged files.
//!
//! When `startxref` is missing or points at garbage, the table is rebuilt by
//! scanning for `N G obj` headers. Later headers for the same object number
//! win, matching incremental-update semantics. Documents rebuilt this way are
//! readable but are not accepted as a base for new incremental updates.

use crate::error::{Error, Result};
use crate::object::{Dict, Object, ObjectRef};
use crate::parser::{parse_indirect_object_at, parse_object};
use crate::xref::{CrossRefTable, XRefEntry, XRefKind};
use lazy_static::lazy_static;
use regex::bytes::Regex;

lazy_static! {
    /// "N G obj" at a line start or after whitespace
    static ref RE_OBJ_HEADER: Regex = Regex::new(r"(?m)(?:^|\s)(\d{1,10})\s+(\d{1,5})\s+obj(?-u:\b)").unwrap();

    static ref RE_TRAILER: Regex = Regex::new(r"trailer\s*<<").unwrap();
}

/// Rebuild the cross-reference table by scanning the whole buffer.
pub fn reconstruct_xref(data: &[u8]) -> Result<CrossRefTable> {
    log::warn!("Reconstructing xref table by scanning {} bytes", data.len());

    let mut xref = CrossRefTable::new(XRefKind::Reconstructed);
    let mut found = 0usize;

    for caps in RE_OBJ_HEADER.captures_iter(data) {
        let (Some(num), Some(gen)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let parsed = std::str::from_utf8(num.as_bytes())
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .zip(std::str::from_utf8(gen.as_bytes()).ok().and_then(|s| s.parse::<u16>().ok()));
        let Some((obj_num, gen_num)) = parsed else {
            continue;
        };

        // Headers inside strings or streams do not parse as objects
        let offset = num.start();
        if parse_indirect_object_at(data, offset).is_err() {
            log::debug!("Skipping false object header at offset {}", offset);
            continue;
        }

        xref.add_entry(obj_num, XRefEntry::uncompressed(offset as u64, gen_num));
        found += 1;
    }

    if found == 0 {
        return Err(Error::MalformedDocument(
            "no objects found while reconstructing xref".to_string(),
        ));
    }

    let trailer = find_last_trailer(data).map_or_else(|| synthesize_trailer(data, &xref), Ok)?;
    xref.set_trailer(trailer);

    log::info!("Reconstructed xref with {} objects", found);
    Ok(xref)
}

/// The last parseable `trailer << ... >>` in the file.
fn find_last_trailer(data: &[u8]) -> Option<Dict> {
    RE_TRAILER
        .find_iter(data)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .find_map(|m| {
            let start = m.start() + b"trailer".len();
            match parse_object(&data[start..]) {
                Ok((_, Object::Dictionary(dict))) if dict.contains_key("Root") => Some(dict),
                _ => None,
            }
        })
}

/// Minimal trailer pointing at the first object typed `/Catalog`.
fn synthesize_trailer(data: &[u8], xref: &CrossRefTable) -> Result<Dict> {
    for id in xref.live_object_numbers() {
        let Some(entry) = xref.get(id) else { continue };
        let Ok((obj_ref, obj)) = parse_indirect_object_at(data, entry.offset as usize) else {
            continue;
        };
        let is_catalog = obj
            .as_dict()
            .and_then(|d| d.get("Type"))
            .and_then(|t| t.as_name())
            == Some("Catalog");
        if is_catalog {
            log::info!("Using object {} as catalog for synthesized trailer", obj_ref);
            let mut trailer = Dict::new();
            trailer.insert("Root".to_string(), Object::Reference(ObjectRef::new(id, obj_ref.gen)));
            trailer.insert("Size".to_string(), Object::Integer(xref.max_object_number() as i64 + 1));
            return Ok(trailer);
        }
    }

    Err(Error::MalformedDocument(
        "no catalog found while reconstructing xref".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconstruct_without_xref() {
        let data = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n%%EOF\n";
        let xref = reconstruct_xref(data).unwrap();

        assert_eq!(xref.kind(), XRefKind::Reconstructed);
        assert_eq!(xref.live_object_numbers(), vec![1, 2]);
        let root = xref.trailer().unwrap().get("Root").unwrap().as_reference().unwrap();
        assert_eq!(root, ObjectRef::new(1, 0));
    }

    #[test]
    fn test_reconstruct_prefers_last_definition() {
        let data = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n1 0 obj\n<< /Type /Catalog /Version /1.7 >>\nendobj\ntrailer\n<< /Root 1 0 R /Size 2 >>\n";
        let xref = reconstruct_xref(data).unwrap();
        let offset = xref.get(1).unwrap().offset as usize;
        let (_, obj) = parse_indirect_object_at(data, offset).unwrap();
        assert!(obj.as_dict().unwrap().contains_key("Version"));
        assert_eq!(xref.trailer().unwrap().get("Size").unwrap().as_integer(), Some(2));
    }

    #[test]
    fn test_reconstruct_empty_fails() {
        assert!(reconstruct_xref(b"%PDF-1.4\nnothing to see\n").is_err());
    }
}
