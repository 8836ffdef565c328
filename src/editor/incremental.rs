//! Append-only incremental updates (ISO 32000-1:2008, Section 7.5.6).
//!
//! The original bytes are copied unchanged and followed by the new and
//! rewritten objects, a classic cross-reference section covering only those
//! objects, and a trailer whose `/Prev` points at the previous section.
//! Rewritten objects are always written uncompressed, even when the previous
//! revision stored them in an object stream.

use crate::crypto::HashAlgorithm;
use crate::document::metadata::{encode_text_string, format_pdf_date};
use crate::document::{PdfDocument, PdfMetadata, Rectangle, SignatureFieldDefinition};
use crate::error::{Error, Result};
use crate::object::{Dict, Object, ObjectRef};
use crate::signatures::{
    ByteRange, ByteRangeCalculator, SignatureAppearance, SignatureDetails, SignatureSubFilter,
};
use crate::writer::{AppearanceStreamBuilder, ObjectSerializer};
use crate::xref::XRefKind;
use bitflags::bitflags;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};

bitflags! {
    /// Annotation flags (ISO 32000-1:2008, Table 165).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct AnnotationFlags: u32 {
        const PRINT = 1 << 2;
        const LOCKED = 1 << 7;
    }

    /// Signature flags of the interactive form (ISO 32000-1:2008, Table 219).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct SigFlags: u32 {
        const SIGNATURES_EXIST = 1;
        const APPEND_ONLY = 1 << 1;
    }
}

/// Length of a file identifier.
const ID_LEN: usize = 16;

/// One change carried by an incremental update.
#[derive(Debug, Clone, PartialEq)]
pub enum PdfModification {
    /// Create a new, unsigned signature field with its widget.
    AddSignatureField(SignatureFieldDefinition),
    /// Attach a signature dictionary to an unsigned field.
    ///
    /// An empty `signature_data` leaves a zero-filled `/Contents`
    /// placeholder to be filled after hashing.
    EmbedSignature {
        /// Fully-qualified name of the target field
        field_name: String,
        /// DER container written into `/Contents`
        signature_data: Vec<u8>,
        /// Visible appearance drawn on the widget
        appearance: Option<SignatureAppearance>,
        /// Values written into the signature dictionary
        details: SignatureDetails,
    },
    /// Write a new `/Info` dictionary with a fresh `/ModDate`.
    UpdateMetadata(PdfMetadata),
}

/// Location of a signature dictionary's placeholders in an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePlaceholder {
    /// Field the signature belongs to
    pub field_name: String,
    /// Offset of the `<` opening the `/Contents` token
    pub contents_offset: usize,
    /// Offset of the `[` opening the `/ByteRange` array
    pub byte_range_offset: usize,
    /// The range already patched into the output
    pub byte_range: ByteRange,
}

/// An update whose `/ByteRange` values are final but whose `/Contents`
/// tokens may still be zero-filled.
#[derive(Debug, Clone)]
pub struct PreparedUpdate {
    /// Original bytes followed by the update
    pub data: Vec<u8>,
    /// One entry per embedded signature
    pub placeholders: Vec<SignaturePlaceholder>,
}

impl PreparedUpdate {
    /// Placeholder of the signature embedded into `field_name`.
    pub fn placeholder(&self, field_name: &str) -> Option<&SignaturePlaceholder> {
        self.placeholders.iter().find(|p| p.field_name == field_name)
    }
}

/// Produces incremental updates for a parsed document.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncrementalUpdateGenerator {
    calculator: ByteRangeCalculator,
}

impl IncrementalUpdateGenerator {
    /// Generator reserving the default `/Contents` space.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generator using `calculator` for signature placeholders.
    pub fn with_calculator(calculator: ByteRangeCalculator) -> Self {
        Self { calculator }
    }

    /// The placeholder calculator.
    pub fn calculator(&self) -> &ByteRangeCalculator {
        &self.calculator
    }

    /// Append `changes` to the document and return the new bytes.
    ///
    /// The first `document.len()` bytes of the result equal the input. An
    /// empty change list returns the input unchanged.
    pub fn create_incremental_update(
        &self,
        document: &PdfDocument,
        changes: &[PdfModification],
    ) -> Result<Vec<u8>> {
        let prepared = self.prepare_update(document, changes)?;
        let mut data = prepared.data;
        for placeholder in &prepared.placeholders {
            let signature = changes.iter().find_map(|change| match change {
                PdfModification::EmbedSignature {
                    field_name,
                    signature_data,
                    ..
                } if *field_name == placeholder.field_name => Some(signature_data),
                _ => None,
            });
            if let Some(signature) = signature.filter(|s| !s.is_empty()) {
                self.calculator
                    .insert_signature(&mut data, placeholder.contents_offset, signature)?;
            }
        }
        Ok(data)
    }

    /// Append `changes` leaving every `/Contents` zero-filled.
    ///
    /// `/ByteRange` is already final, so the caller can hash the covered
    /// bytes and fill `/Contents` in place without moving anything.
    pub fn prepare_update(
        &self,
        document: &PdfDocument,
        changes: &[PdfModification],
    ) -> Result<PreparedUpdate> {
        if changes.is_empty() {
            return Ok(PreparedUpdate {
                data: document.data().to_vec(),
                placeholders: Vec::new(),
            });
        }
        if document.xref_kind() == XRefKind::Reconstructed {
            return Err(Error::DocumentModification(
                "cannot append to a document whose cross-reference data had to be reconstructed"
                    .to_string(),
            ));
        }
        let embeds = changes
            .iter()
            .filter(|c| matches!(c, PdfModification::EmbedSignature { .. }))
            .count();
        if embeds > 1 {
            return Err(Error::InvalidInput(format!(
                "an incremental update embeds at most one signature, got {}",
                embeds
            )));
        }

        let mut update = UpdateBuilder::new(document, self.calculator);
        for change in changes {
            match change {
                PdfModification::AddSignatureField(definition) => update.add_field(definition)?,
                PdfModification::EmbedSignature {
                    field_name,
                    appearance,
                    details,
                    ..
                } => update.embed_signature(field_name, appearance.as_ref(), details)?,
                PdfModification::UpdateMetadata(metadata) => update.update_metadata(metadata),
            }
        }
        update.finish()
    }
}

enum Body {
    Object(Object),
    Signature(SignatureBody),
}

/// Hand-written signature dictionary with placeholder positions relative
/// to the start of `text`.
struct SignatureBody {
    field_name: String,
    text: Vec<u8>,
    byte_range_at: usize,
    contents_at: usize,
}

struct NewField {
    field: ObjectRef,
    bounds: Rectangle,
    appearance: Option<SignatureAppearance>,
}

/// Objects of one update, keyed by reference so output order is stable.
struct UpdateBuilder<'a> {
    document: &'a PdfDocument,
    calculator: ByteRangeCalculator,
    objects: BTreeMap<ObjectRef, Body>,
    next_id: u32,
    names: HashSet<String>,
    new_fields: HashMap<String, NewField>,
    acroform: Option<ObjectRef>,
    info: Option<ObjectRef>,
}

impl<'a> UpdateBuilder<'a> {
    fn new(document: &'a PdfDocument, calculator: ByteRangeCalculator) -> Self {
        Self {
            document,
            calculator,
            objects: BTreeMap::new(),
            next_id: document.structure().size,
            names: document.signature_fields().iter().map(|f| f.name.clone()).collect(),
            new_fields: HashMap::new(),
            acroform: None,
            info: None,
        }
    }

    fn allocate(&mut self) -> ObjectRef {
        let obj_ref = ObjectRef::new(self.next_id, 0);
        self.next_id += 1;
        obj_ref
    }

    /// An existing object, loaded on first edit.
    fn object_mut(&mut self, obj_ref: ObjectRef) -> Result<&mut Object> {
        if !self.objects.contains_key(&obj_ref) {
            let loaded = self.document.store().load(obj_ref)?;
            self.objects.insert(obj_ref, Body::Object(loaded));
        }
        match self.objects.get_mut(&obj_ref) {
            Some(Body::Object(obj)) => Ok(obj),
            _ => Err(Error::DocumentModification(format!("object {} cannot be edited", obj_ref))),
        }
    }

    fn dict_mut(&mut self, obj_ref: ObjectRef) -> Result<&mut Dict> {
        match self.object_mut(obj_ref)? {
            Object::Dictionary(dict) => Ok(dict),
            other => Err(Error::InvalidObjectType {
                expected: "Dictionary".to_string(),
                found: other.type_name().to_string(),
            }),
        }
    }

    /// Append `item` to the array at `owner[key]`, following one indirection.
    fn push_to_array(&mut self, owner: ObjectRef, key: &str, item: Object) -> Result<()> {
        let current = self.dict_mut(owner)?.get(key).cloned();
        match current {
            Some(Object::Reference(array_ref)) => match self.object_mut(array_ref)? {
                Object::Array(items) => {
                    items.push(item);
                    Ok(())
                },
                other => Err(Error::DocumentModification(format!(
                    "/{} of {} points at a {}",
                    key,
                    owner,
                    other.type_name()
                ))),
            },
            Some(Object::Array(mut items)) => {
                items.push(item);
                self.dict_mut(owner)?.insert(key.to_string(), Object::Array(items));
                Ok(())
            },
            None | Some(Object::Null) => {
                self.dict_mut(owner)?.insert(key.to_string(), Object::Array(vec![item]));
                Ok(())
            },
            Some(other) => Err(Error::DocumentModification(format!(
                "/{} of {} is a {}",
                key,
                owner,
                other.type_name()
            ))),
        }
    }

    /// The `/AcroForm` object, creating it (or lifting an inline one) on first use.
    fn acroform(&mut self) -> Result<ObjectRef> {
        if let Some(form) = self.acroform {
            return Ok(form);
        }
        let root = self.document.structure().root;
        let current = self.dict_mut(root)?.get("AcroForm").cloned();
        let form = match current {
            Some(Object::Reference(form)) => form,
            existing => {
                let dict = match existing {
                    Some(Object::Dictionary(dict)) => dict,
                    _ => {
                        let mut dict = Dict::new();
                        dict.insert("Fields".to_string(), Object::Array(Vec::new()));
                        dict
                    },
                };
                let form = self.allocate();
                self.objects.insert(form, Body::Object(Object::Dictionary(dict)));
                self.dict_mut(root)?
                    .insert("AcroForm".to_string(), Object::Reference(form));
                log::debug!("Writing /AcroForm as new object {}", form);
                form
            },
        };
        self.acroform = Some(form);
        Ok(form)
    }

    fn add_field(&mut self, definition: &SignatureFieldDefinition) -> Result<()> {
        validate_field_name(&definition.name)?;
        validate_bounds(&definition.bounds)?;
        let page = self
            .document
            .structure()
            .pages
            .get(definition.page)
            .copied()
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "page {} out of range, document has {} pages",
                    definition.page,
                    self.document.page_count()
                ))
            })?;
        if !self.names.insert(definition.name.clone()) {
            return Err(Error::DuplicateFieldName(definition.name.clone()));
        }

        let field = self.allocate();
        let mut dict = Dict::new();
        dict.insert("FT".to_string(), Object::name("Sig"));
        dict.insert("T".to_string(), Object::String(encode_text_string(&definition.name)));
        dict.insert("Type".to_string(), Object::name("Annot"));
        dict.insert("Subtype".to_string(), Object::name("Widget"));
        dict.insert("Rect".to_string(), definition.bounds.to_pdf_array());
        let flags = AnnotationFlags::PRINT | AnnotationFlags::LOCKED;
        dict.insert("F".to_string(), Object::Integer(i64::from(flags.bits())));
        dict.insert("P".to_string(), Object::Reference(page));
        self.objects.insert(field, Body::Object(Object::Dictionary(dict)));

        self.push_to_array(page, "Annots", Object::Reference(field))?;
        let form = self.acroform()?;
        self.push_to_array(form, "Fields", Object::Reference(field))?;

        log::debug!(
            "Adding signature field {:?} as {} on page {}",
            definition.name,
            field,
            definition.page
        );
        self.new_fields.insert(
            definition.name.clone(),
            NewField {
                field,
                bounds: definition.bounds,
                appearance: definition.appearance.clone(),
            },
        );
        Ok(())
    }

    fn embed_signature(
        &mut self,
        field_name: &str,
        appearance: Option<&SignatureAppearance>,
        details: &SignatureDetails,
    ) -> Result<()> {
        let document = self.document;
        let (field, widget, bounds, field_appearance) = match self.new_fields.get(field_name) {
            Some(new) => (new.field, new.field, new.bounds, new.appearance.clone()),
            None => {
                let existing = document
                    .signature_field(field_name)
                    .ok_or_else(|| Error::FieldNotFound(field_name.to_string()))?;
                if existing.is_signed {
                    return Err(Error::FieldAlreadySigned(field_name.to_string()));
                }
                let location = document
                    .structure()
                    .field_locations
                    .get(field_name)
                    .ok_or_else(|| Error::FieldNotFound(field_name.to_string()))?;
                (location.field, location.widget, existing.bounds, existing.appearance.clone())
            },
        };

        let signature = self.allocate();
        let body = self.signature_dictionary(field_name, details);
        self.objects.insert(signature, Body::Signature(body));
        self.dict_mut(field)?
            .insert("V".to_string(), Object::Reference(signature));

        let appearance = appearance.cloned().or(field_appearance);
        if let Some(appearance) = appearance.filter(|a| a.visible && !bounds.is_empty()) {
            let stream = AppearanceStreamBuilder::for_signature(&bounds, &appearance, details).build();
            let stream_ref = self.allocate();
            self.objects.insert(stream_ref, Body::Object(stream));
            let mut ap = Dict::new();
            ap.insert("N".to_string(), Object::Reference(stream_ref));
            self.dict_mut(widget)?
                .insert("AP".to_string(), Object::Dictionary(ap));
        }

        let form = self.acroform()?;
        self.dict_mut(form)?
            .insert("SigFlags".to_string(), Object::Integer(i64::from(SigFlags::all().bits())));
        log::debug!("Embedding signature {} into field {:?}", signature, field_name);
        Ok(())
    }

    fn signature_dictionary(&self, field_name: &str, details: &SignatureDetails) -> SignatureBody {
        let mut text = Vec::with_capacity(self.calculator.placeholder_size() + 512);
        text.extend_from_slice(b"<<\n/Type /Sig\n/Filter /Adobe.PPKLite\n");
        text.extend_from_slice(
            format!("/SubFilter /{}\n", SignatureSubFilter::Pkcs7Detached.as_pdf_name()).as_bytes(),
        );
        text.extend_from_slice(b"/ByteRange ");
        let byte_range_at = text.len();
        text.extend_from_slice(ByteRangeCalculator::byte_range_placeholder().as_bytes());
        text.extend_from_slice(b"\n/Contents ");
        let contents_at = text.len();
        text.extend_from_slice(self.calculator.contents_placeholder().as_bytes());
        text.extend_from_slice(format!("\n/M ({})\n", format_pdf_date(&details.signing_time)).as_bytes());

        push_text_entry(&mut text, "Name", &details.signer_name);
        let optional = [
            ("Reason", &details.reason),
            ("Location", &details.location),
            ("ContactInfo", &details.contact_info),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                push_text_entry(&mut text, key, value);
            }
        }
        text.extend_from_slice(b">>");

        SignatureBody {
            field_name: field_name.to_string(),
            text,
            byte_range_at,
            contents_at,
        }
    }

    fn update_metadata(&mut self, metadata: &PdfMetadata) {
        let mut metadata = metadata.clone();
        metadata.modification_date = Some(Utc::now());
        let info = match self.info {
            Some(info) => info,
            None => self.allocate(),
        };
        self.objects
            .insert(info, Body::Object(Object::Dictionary(metadata.to_info_dict())));
        self.info = Some(info);
    }

    fn finish(self) -> Result<PreparedUpdate> {
        let document = self.document;
        let structure = document.structure();
        let serializer = ObjectSerializer::compact();

        let mut out = Vec::with_capacity(document.len() + self.calculator.placeholder_size() + 4096);
        out.extend_from_slice(document.data());
        if !matches!(out.last(), Some(b'\n') | Some(b'\r')) {
            out.push(b'\n');
        }

        let mut offsets = Vec::with_capacity(self.objects.len());
        let mut pending = Vec::new();
        for (obj_ref, body) in &self.objects {
            offsets.push((*obj_ref, out.len()));
            match body {
                Body::Object(obj) => out.extend_from_slice(&serializer.serialize_indirect(*obj_ref, obj)),
                Body::Signature(sig) => {
                    out.extend_from_slice(format!("{} {} obj\n", obj_ref.id, obj_ref.gen).as_bytes());
                    let base = out.len();
                    out.extend_from_slice(&sig.text);
                    out.extend_from_slice(b"\nendobj\n");
                    pending.push((sig.field_name.clone(), base + sig.contents_at, base + sig.byte_range_at));
                },
            }
        }

        let xref_offset = out.len();
        write_xref_section(&mut out, &offsets);

        let mut trailer = Dict::new();
        trailer.insert(
            "Size".to_string(),
            Object::Integer(i64::from(self.next_id.max(structure.size))),
        );
        trailer.insert("Root".to_string(), Object::Reference(structure.root));
        if let Some(info) = self.info.or(structure.info) {
            trailer.insert("Info".to_string(), Object::Reference(info));
        }
        trailer.insert("Prev".to_string(), Object::Integer(structure.startxref as i64));

        let fresh_id = HashAlgorithm::Sha256.digest(&out)[..ID_LEN].to_vec();
        let original_id = match &structure.id {
            Some(Object::Array(ids)) => ids.first().filter(|id| matches!(id, Object::String(_))).cloned(),
            _ => None,
        };
        trailer.insert(
            "ID".to_string(),
            Object::Array(vec![
                original_id.unwrap_or_else(|| Object::String(fresh_id.clone())),
                Object::String(fresh_id),
            ]),
        );

        out.extend_from_slice(b"trailer\n");
        out.extend_from_slice(&ObjectSerializer::new().serialize(&Object::Dictionary(trailer)));
        out.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());

        let mut placeholders = Vec::with_capacity(pending.len());
        for (field_name, contents_offset, byte_range_offset) in pending {
            let byte_range = self.calculator.calculate_byte_range(out.len(), contents_offset);
            ByteRangeCalculator::patch_byte_range(&mut out, byte_range_offset, &byte_range)?;
            placeholders.push(SignaturePlaceholder {
                field_name,
                contents_offset,
                byte_range_offset,
                byte_range,
            });
        }

        log::info!(
            "Appended incremental update: {} objects, {} bytes, xref at {}",
            offsets.len(),
            out.len() - document.len(),
            xref_offset
        );
        Ok(PreparedUpdate { data: out, placeholders })
    }
}

fn push_text_entry(out: &mut Vec<u8>, key: &str, value: &str) {
    out.extend_from_slice(format!("/{} ", key).as_bytes());
    out.extend_from_slice(&ObjectSerializer::compact().serialize(&Object::String(encode_text_string(value))));
    out.push(b'\n');
}

/// Classic xref section with one subsection per run of consecutive numbers.
fn write_xref_section(out: &mut Vec<u8>, offsets: &[(ObjectRef, usize)]) {
    out.extend_from_slice(b"xref\n");
    let mut start = 0;
    while start < offsets.len() {
        let mut end = start + 1;
        while end < offsets.len() && offsets[end].0.id == offsets[end - 1].0.id + 1 {
            end += 1;
        }
        out.extend_from_slice(format!("{} {}\n", offsets[start].0.id, end - start).as_bytes());
        for (obj_ref, offset) in &offsets[start..end] {
            out.extend_from_slice(format!("{:010} {:05} n \n", offset, obj_ref.gen).as_bytes());
        }
        start = end;
    }
}

fn validate_field_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput("signature field name is empty".to_string()));
    }
    if name.contains('.') {
        return Err(Error::InvalidInput(format!(
            "signature field name {:?} must not contain '.'",
            name
        )));
    }
    Ok(())
}

fn validate_bounds(bounds: &Rectangle) -> Result<()> {
    let values = [bounds.x, bounds.y, bounds.width, bounds.height];
    if values.iter().any(|v| !v.is_finite()) || bounds.width < 0.0 || bounds.height < 0.0 {
        return Err(Error::InvalidInput(format!("invalid field rectangle {:?}", bounds)));
    }
    Ok(())
}
