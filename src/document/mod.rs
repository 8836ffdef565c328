//! Parsed view of a PDF byte buffer.
//!
//! [`PdfDocument::parse`] reads the header, the cross-reference chain and the
//! catalog, then collects pages, `/Info` metadata, signature fields and the
//! signatures already embedded. The original bytes are retained unchanged so
//! incremental updates can be appended to them.
//!
//! ```ignore
//! use pdf_seal::document::PdfDocument;
//!
//! let doc = PdfDocument::parse(&bytes)?;
//! for field in doc.signature_fields() {
//!     println!("{} on page {} (signed: {})", field.name, field.page, field.is_signed);
//! }
//! ```

pub mod fields;
pub mod metadata;
mod store;

pub use fields::{extract_signature_fields, Rectangle, SignatureField, SignatureFieldDefinition};
pub use metadata::PdfMetadata;
pub use store::ObjectStore;

use crate::error::{Error, Result};
use crate::object::{Dict, Object, ObjectRef};
use crate::signatures::pkcs7;
use crate::signatures::{ByteRange, CertificateInfo, DigitalSignature};
use crate::xref::{find_xref_offset, parse_xref, XRefKind};
use crate::xref_reconstruction::reconstruct_xref;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use fields::{locate_signature_fields, FieldLocation};
use metadata::{decode_text_string, parse_pdf_date};
use std::collections::{HashMap, HashSet};

/// Shortest buffer that can hold `%PDF-x.y`.
pub const MIN_HEADER_LEN: usize = 8;

/// Header versions accepted by the parser.
pub const SUPPORTED_VERSIONS: [&str; 9] = ["1.0", "1.1", "1.2", "1.3", "1.4", "1.5", "1.6", "1.7", "2.0"];

/// Maximum page tree depth.
const MAX_PAGE_TREE_DEPTH: usize = 64;

/// Object graph positions needed to write an incremental update.
#[derive(Debug, Clone)]
pub(crate) struct DocumentStructure {
    pub root: ObjectRef,
    pub info: Option<ObjectRef>,
    pub pages: Vec<ObjectRef>,
    /// Offset of the newest cross-reference section
    pub startxref: u64,
    /// Next free object number
    pub size: u32,
    pub id: Option<Object>,
    pub xref_kind: XRefKind,
    pub field_locations: HashMap<String, FieldLocation>,
}

/// A parsed PDF document.
///
/// Immutable once parsed; incremental updates produce new bytes that are
/// parsed into a new document.
#[derive(Debug, Clone)]
pub struct PdfDocument {
    version: String,
    page_count: usize,
    metadata: PdfMetadata,
    signature_fields: Vec<SignatureField>,
    existing_signatures: Vec<DigitalSignature>,
    data: Bytes,
    store: ObjectStore,
    structure: DocumentStructure,
}

impl PdfDocument {
    /// Parse a document from a byte slice (the bytes are copied).
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::from_bytes(Bytes::copy_from_slice(data))
    }

    /// Parse a document, taking ownership of the buffer.
    pub fn from_bytes(data: Bytes) -> Result<Self> {
        let version = parse_header(&data)?;

        let (xref, startxref) = match find_xref_offset(&data).and_then(|off| parse_xref(&data, off).map(|xref| (xref, off))) {
            Ok(found) => found,
            Err(e) => {
                log::warn!("Cross-reference chain unusable ({}), reconstructing", e);
                let rebuilt = reconstruct_xref(&data)
                    .map_err(|e| Error::MalformedDocument(format!("no usable cross-reference data: {}", e)))?;
                (rebuilt, 0)
            },
        };
        log::debug!("Cross-reference kind {:?}, {} entries", xref.kind(), xref.len());

        let trailer = xref
            .trailer()
            .cloned()
            .ok_or_else(|| Error::MalformedDocument("trailer dictionary not found".to_string()))?;
        if trailer.contains_key("Encrypt") {
            return Err(Error::Unsupported("encrypted documents cannot be signed or validated".to_string()));
        }
        let root = trailer
            .get("Root")
            .and_then(|r| r.as_reference())
            .ok_or_else(|| Error::MalformedDocument("trailer has no /Root reference".to_string()))?;
        let info = trailer.get("Info").and_then(|r| r.as_reference());
        let declared_size = trailer
            .get("Size")
            .and_then(|s| s.as_integer())
            .and_then(|s| u32::try_from(s).ok())
            .unwrap_or(0);
        let size = declared_size.max(xref.max_object_number() + 1);
        let id = trailer.get("ID").cloned();
        let xref_kind = xref.kind();

        let store = ObjectStore::new(data.clone(), xref);
        let catalog = store
            .load_dict(root)
            .map_err(|e| Error::MalformedDocument(format!("catalog {} unreadable: {}", root, e)))?;

        let version = match catalog.get("Version").and_then(|v| v.as_name()) {
            Some(v) if SUPPORTED_VERSIONS.contains(&v) && v > version.as_str() => v.to_string(),
            _ => version,
        };

        let pages = collect_pages(&store, &catalog);
        let page_count = if pages.is_empty() {
            declared_page_count(&store, &catalog)
        } else {
            pages.len()
        };

        let metadata = match info {
            Some(info_ref) => match store.load_dict(info_ref) {
                Ok(dict) => PdfMetadata::from_info_dict(&dict, &store)?,
                Err(e) => {
                    log::warn!("Ignoring unreadable /Info {}: {}", info_ref, e);
                    PdfMetadata::default()
                },
            },
            None => PdfMetadata::default(),
        };

        let located = locate_signature_fields(&store, &catalog, &pages)?;
        let mut signature_fields = Vec::with_capacity(located.len());
        let mut field_locations = HashMap::new();
        let mut existing_signatures = Vec::new();
        let mut seen_names = HashSet::new();

        for (field, location) in located {
            if !seen_names.insert(field.name.clone()) {
                log::warn!("Duplicate signature field name {:?}, keeping the first", field.name);
                continue;
            }
            if field.is_signed {
                if let Some(sig) = read_signature(&store, &data, &field.name, &location) {
                    existing_signatures.push(sig);
                }
            }
            field_locations.insert(field.name.clone(), location);
            signature_fields.push(field);
        }
        // Each revision places its signature after every earlier one
        existing_signatures.sort_by_key(|s| s.byte_range.0[1]);

        log::debug!(
            "Parsed PDF {}: {} pages, {} signature fields, {} signatures",
            version,
            page_count,
            signature_fields.len(),
            existing_signatures.len()
        );

        Ok(Self {
            version,
            page_count,
            metadata,
            signature_fields,
            existing_signatures,
            data,
            store,
            structure: DocumentStructure {
                root,
                info,
                pages,
                startxref,
                size,
                id,
                xref_kind,
                field_locations,
            },
        })
    }

    /// Header version, raised by the catalog's `/Version` when newer.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Number of pages.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// `/Info` values.
    pub fn metadata(&self) -> &PdfMetadata {
        &self.metadata
    }

    /// Signature fields in form traversal order.
    pub fn signature_fields(&self) -> &[SignatureField] {
        &self.signature_fields
    }

    /// Look up a field by fully-qualified name.
    pub fn signature_field(&self, name: &str) -> Option<&SignatureField> {
        self.signature_fields.iter().find(|f| f.name == name)
    }

    /// Embedded signatures in signing order.
    pub fn existing_signatures(&self) -> &[DigitalSignature] {
        &self.existing_signatures
    }

    /// The original bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The original bytes as a shared buffer.
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    /// Length of the original bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is empty (never true for a parsed document).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The object loader.
    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    /// How the cross-reference data was obtained.
    pub fn xref_kind(&self) -> XRefKind {
        self.structure.xref_kind
    }

    pub(crate) fn structure(&self) -> &DocumentStructure {
        &self.structure
    }
}

/// Read `%PDF-M.m` and return `M.m`.
fn parse_header(data: &[u8]) -> Result<String> {
    if data.len() < MIN_HEADER_LEN {
        return Err(Error::MalformedDocument(format!(
            "{} bytes is too short for a PDF header",
            data.len()
        )));
    }
    if !data.starts_with(b"%PDF-") {
        return Err(Error::MalformedDocument(format!(
            "expected '%PDF-', found {:?}",
            String::from_utf8_lossy(&data[..5])
        )));
    }
    let version = String::from_utf8_lossy(&data[5..8]).into_owned();
    if !SUPPORTED_VERSIONS.contains(&version.as_str()) {
        return Err(Error::MalformedDocument(format!("unsupported PDF version {:?}", version)));
    }
    Ok(version)
}

/// Leaf pages of the page tree in document order.
fn collect_pages(store: &ObjectStore, catalog: &Dict) -> Vec<ObjectRef> {
    let mut pages = Vec::new();
    let Some(root) = catalog.get("Pages").and_then(|p| p.as_reference()) else {
        log::warn!("Catalog has no /Pages reference");
        return pages;
    };
    let mut visited = HashSet::new();
    walk_page_tree(store, root, 0, &mut visited, &mut pages);
    pages
}

fn walk_page_tree(
    store: &ObjectStore,
    node_ref: ObjectRef,
    depth: usize,
    visited: &mut HashSet<ObjectRef>,
    out: &mut Vec<ObjectRef>,
) {
    if depth > MAX_PAGE_TREE_DEPTH || !visited.insert(node_ref) {
        log::warn!("Page tree loop or excessive depth at {}", node_ref);
        return;
    }
    let node = match store.load_dict(node_ref) {
        Ok(d) => d,
        Err(e) => {
            log::warn!("Skipping unreadable page tree node {}: {}", node_ref, e);
            return;
        },
    };
    let is_leaf = match node.get("Type").and_then(|t| t.as_name()) {
        Some("Page") => true,
        Some("Pages") => false,
        _ => !node.contains_key("Kids"),
    };
    if is_leaf {
        out.push(node_ref);
        return;
    }
    if let Ok(Some(Object::Array(kids))) = store.get_resolved(&node, "Kids") {
        for kid in kids.iter().filter_map(|k| k.as_reference()) {
            walk_page_tree(store, kid, depth + 1, visited, out);
        }
    }
}

/// `/Count` of the page tree root, for trees that could not be walked.
fn declared_page_count(store: &ObjectStore, catalog: &Dict) -> usize {
    catalog
        .get("Pages")
        .and_then(|p| store.resolve_dict(p).ok())
        .and_then(|pages| pages.get("Count").and_then(|c| c.as_integer()))
        .map(|c| c.max(0) as usize)
        .unwrap_or(0)
}

/// Read the signature dictionary referenced by a signed field.
///
/// Returns `None` (with a warning) for dictionaries that cannot describe a
/// signature, such as a missing or inconsistent `/ByteRange`.
fn read_signature(
    store: &ObjectStore,
    data: &[u8],
    field_name: &str,
    location: &FieldLocation,
) -> Option<DigitalSignature> {
    let field = store.load_dict(location.field).ok()?;
    let sig = match field.get("V").map(|v| store.resolve_dict(v)) {
        Some(Ok(sig)) => sig,
        Some(Err(e)) => {
            log::warn!("Field {:?} has an unreadable /V: {}", field_name, e);
            return None;
        },
        None => return None,
    };

    let text = |key: &str| match store.get_resolved(&sig, key) {
        Ok(Some(Object::String(bytes))) => Some(decode_text_string(&bytes)),
        _ => None,
    };

    let signature_data = match store.get_resolved(&sig, "Contents") {
        Ok(Some(Object::String(bytes))) => bytes,
        _ => {
            log::warn!("Signature of {:?} has no /Contents", field_name);
            return None;
        },
    };
    let integers: Vec<i64> = match store.get_resolved(&sig, "ByteRange") {
        Ok(Some(Object::Array(values))) => values.iter().filter_map(|v| v.as_integer()).collect(),
        _ => Vec::new(),
    };
    let byte_range = match ByteRange::from_pdf_integers(&integers).and_then(|br| {
        br.validate(data.len())?;
        Ok(br)
    }) {
        Ok(br) => br,
        Err(e) => {
            log::warn!("Signature of {:?} has an unusable /ByteRange: {}", field_name, e);
            return None;
        },
    };

    let container = pkcs7::parse_container(pkcs7::trim_der_padding(&signature_data)).ok();
    let signer_cert = container.as_ref().and_then(|c| c.signer_certificate.as_ref());

    let signing_time = text("M")
        .and_then(|m| parse_pdf_date(&m))
        .or_else(|| container.as_ref().and_then(|c| c.signing_time))
        .unwrap_or_else(DateTime::<Utc>::default);
    let signer_name = text("Name")
        .or_else(|| signer_cert.and_then(|c| c.common_name()))
        .unwrap_or_else(|| "Unknown".to_string());
    let sub_filter = match store.get_resolved(&sig, "SubFilter") {
        Ok(Some(Object::Name(n))) => Some(n),
        _ => None,
    };

    Some(DigitalSignature {
        field_name: field_name.to_string(),
        signature_data,
        signing_time,
        signer_name,
        reason: text("Reason"),
        location: text("Location"),
        contact_info: text("ContactInfo"),
        certificate_info: signer_cert.map(CertificateInfo::from),
        byte_range,
        sub_filter,
    })
}
