//! Signature field discovery in the interactive form (ISO 32000-1:2008, Section 12.7).
//!
//! Fields are visited depth-first in `/Fields` and `/Kids` array order, so the
//! result is fully determined by the bytes. Kids carrying `/T` are child fields;
//! kids without `/T` are the field's widget annotations. `/FT` is inheritable.

use super::metadata::decode_text_string;
use super::store::ObjectStore;
use crate::error::Result;
use crate::object::{Dict, Object, ObjectRef};
use crate::signatures::SignatureAppearance;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Maximum field tree depth.
const MAX_FIELD_DEPTH: usize = 32;

/// Placement used for fields without a usable `/Rect`.
const SYNTHETIC_WIDTH: f64 = 200.0;
const SYNTHETIC_HEIGHT: f64 = 50.0;
const SYNTHETIC_MARGIN: f64 = 50.0;
const SYNTHETIC_STEP: f64 = 60.0;

/// Axis-aligned rectangle in default user space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rectangle {
    /// Lower-left x
    pub x: f64,
    /// Lower-left y
    pub y: f64,
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

impl Rectangle {
    /// Rectangle from origin and size.
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// The empty rectangle used by invisible signatures.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Read a `[llx lly urx ury]` array; corners may come in any order.
    pub fn from_pdf_array(values: &[Object]) -> Option<Self> {
        if values.len() != 4 {
            return None;
        }
        let nums: Vec<f64> = values.iter().filter_map(|v| v.as_number()).collect();
        if nums.len() != 4 || nums.iter().any(|n| !n.is_finite()) {
            return None;
        }
        let (x0, x1) = (nums[0].min(nums[2]), nums[0].max(nums[2]));
        let (y0, y1) = (nums[1].min(nums[3]), nums[1].max(nums[3]));
        Some(Self::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// As a `[llx lly urx ury]` array.
    pub fn to_pdf_array(&self) -> Object {
        Object::Array(vec![
            Object::Real(self.x),
            Object::Real(self.y),
            Object::Real(self.x + self.width),
            Object::Real(self.y + self.height),
        ])
    }

    /// Zero area.
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Whether the interiors overlap.
    pub fn intersects(&self, other: &Rectangle) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }
}

/// A signature form field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureField {
    /// Fully-qualified name, unique within the document
    pub name: String,
    /// Zero-based page index
    pub page: usize,
    /// Widget rectangle
    pub bounds: Rectangle,
    /// Appearance requested when the field was added through this crate
    pub appearance: Option<SignatureAppearance>,
    /// `/V` holds a signature dictionary
    pub is_signed: bool,
}

/// Request to add a new signature field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureFieldDefinition {
    /// Field name; must not contain `.`
    pub name: String,
    /// Zero-based page index
    pub page: usize,
    /// Widget rectangle
    pub bounds: Rectangle,
    /// Visible appearance drawn when the field is signed
    pub appearance: Option<SignatureAppearance>,
}

impl SignatureFieldDefinition {
    /// Field definition without appearance.
    pub fn new(name: impl Into<String>, page: usize, bounds: Rectangle) -> Self {
        Self {
            name: name.into(),
            page,
            bounds,
            appearance: None,
        }
    }

    /// Attach an appearance.
    pub fn with_appearance(mut self, appearance: SignatureAppearance) -> Self {
        self.appearance = Some(appearance);
        self
    }
}

/// Where a field lives in the object graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FieldLocation {
    /// Field dictionary
    pub field: ObjectRef,
    /// Widget annotation (the field itself when merged)
    pub widget: ObjectRef,
    /// Page holding the widget
    pub page: Option<ObjectRef>,
    /// Signature dictionary referenced by `/V`
    pub value: Option<ObjectRef>,
}

/// Signature fields reachable from `/AcroForm /Fields`, in traversal order.
pub fn extract_signature_fields(
    store: &ObjectStore,
    catalog: &Dict,
    pages: &[ObjectRef],
) -> Result<Vec<SignatureField>> {
    Ok(locate_signature_fields(store, catalog, pages)?
        .into_iter()
        .map(|(field, _)| field)
        .collect())
}

pub(crate) fn locate_signature_fields(
    store: &ObjectStore,
    catalog: &Dict,
    pages: &[ObjectRef],
) -> Result<Vec<(SignatureField, FieldLocation)>> {
    let Some(acroform) = store.get_resolved(catalog, "AcroForm")? else {
        return Ok(Vec::new());
    };
    let Some(acroform) = acroform.as_dict() else {
        log::warn!("/AcroForm is a {}, ignoring", acroform.type_name());
        return Ok(Vec::new());
    };
    let roots = match store.get_resolved(acroform, "Fields")? {
        Some(Object::Array(items)) => items,
        _ => return Ok(Vec::new()),
    };

    let mut walker = FieldWalker {
        store,
        pages,
        visited: HashSet::new(),
        found: Vec::new(),
        missing_rect: Vec::new(),
    };
    for root in &roots {
        walker.walk(root, "", None, 0);
    }

    let FieldWalker {
        mut found,
        missing_rect,
        ..
    } = walker;
    place_missing(&mut found, &missing_rect);

    log::debug!("Found {} signature fields", found.len());
    Ok(found)
}

struct FieldWalker<'a> {
    store: &'a ObjectStore,
    pages: &'a [ObjectRef],
    visited: HashSet<ObjectRef>,
    found: Vec<(SignatureField, FieldLocation)>,
    /// Indices into `found` whose rectangle must be synthesized
    missing_rect: Vec<usize>,
}

impl FieldWalker<'_> {
    fn walk(&mut self, node: &Object, parent_name: &str, inherited_ft: Option<&str>, depth: usize) {
        if depth > MAX_FIELD_DEPTH {
            log::warn!("Field tree deeper than {}, stopping", MAX_FIELD_DEPTH);
            return;
        }
        let Some(node_ref) = node.as_reference() else {
            log::warn!("Skipping direct field dictionary under {:?}", parent_name);
            return;
        };
        if !self.visited.insert(node_ref) {
            log::warn!("Field {} visited twice, skipping", node_ref);
            return;
        }
        let dict = match self.store.load_dict(node_ref) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("Skipping unreadable field {}: {}", node_ref, e);
                return;
            },
        };

        let partial = self.text(&dict, "T");
        let full_name = match (parent_name.is_empty(), partial.as_deref()) {
            (_, None) => parent_name.to_string(),
            (true, Some(p)) => p.to_string(),
            (false, Some(p)) => format!("{}.{}", parent_name, p),
        };
        let own_ft = self.name(&dict, "FT");
        let field_type = own_ft.as_deref().or(inherited_ft).map(str::to_string);

        let kids = match self.store.get_resolved(&dict, "Kids") {
            Ok(Some(Object::Array(kids))) => kids,
            _ => Vec::new(),
        };
        let mut child_fields = Vec::new();
        let mut widgets = Vec::new();
        for kid in &kids {
            let Some(kid_ref) = kid.as_reference() else { continue };
            match self.store.load_dict(kid_ref) {
                Ok(kid_dict) if kid_dict.contains_key("T") => child_fields.push(kid.clone()),
                Ok(_) => widgets.push(kid_ref),
                Err(e) => log::warn!("Skipping unreadable kid {}: {}", kid_ref, e),
            }
        }

        if !child_fields.is_empty() {
            for child in &child_fields {
                self.walk(child, &full_name, field_type.as_deref(), depth + 1);
            }
            return;
        }

        if field_type.as_deref() != Some("Sig") || full_name.is_empty() {
            return;
        }

        let widget_ref = widgets.first().copied().unwrap_or(node_ref);
        let widget = if widget_ref == node_ref {
            dict.clone()
        } else {
            self.store.load_dict(widget_ref).unwrap_or_default()
        };

        let bounds = match self.store.get_resolved(&widget, "Rect") {
            Ok(Some(Object::Array(values))) => Rectangle::from_pdf_array(&values),
            _ => None,
        };
        let page_ref = self.page_of(&widget, widget_ref);
        let page = page_ref
            .and_then(|p| self.pages.iter().position(|candidate| *candidate == p))
            .unwrap_or(0);

        let value = dict.get("V").filter(|v| !v.is_null());
        let is_signed = value.is_some();

        if bounds.is_none() {
            self.missing_rect.push(self.found.len());
        }
        self.found.push((
            SignatureField {
                name: full_name,
                page,
                bounds: bounds.unwrap_or_default(),
                appearance: None,
                is_signed,
            },
            FieldLocation {
                field: node_ref,
                widget: widget_ref,
                page: page_ref,
                value: value.and_then(|v| v.as_reference()),
            },
        ));
    }

    /// `/P` when present, otherwise the page whose `/Annots` lists the widget.
    fn page_of(&self, widget: &Dict, widget_ref: ObjectRef) -> Option<ObjectRef> {
        if let Some(p) = widget.get("P").and_then(|p| p.as_reference()) {
            if self.pages.contains(&p) {
                return Some(p);
            }
        }
        self.pages.iter().copied().find(|page_ref| {
            let Ok(page) = self.store.load_dict(*page_ref) else {
                return false;
            };
            match self.store.get_resolved(&page, "Annots") {
                Ok(Some(Object::Array(annots))) => annots
                    .iter()
                    .any(|a| a.as_reference() == Some(widget_ref)),
                _ => false,
            }
        })
    }

    fn text(&self, dict: &Dict, key: &str) -> Option<String> {
        match self.store.get_resolved(dict, key) {
            Ok(Some(Object::String(bytes))) => Some(decode_text_string(&bytes)),
            _ => None,
        }
    }

    fn name(&self, dict: &Dict, key: &str) -> Option<String> {
        match self.store.get_resolved(dict, key) {
            Ok(Some(Object::Name(n))) => Some(n),
            _ => None,
        }
    }
}

/// Give rect-less fields a slot on their page that overlaps no other field.
fn place_missing(found: &mut [(SignatureField, FieldLocation)], missing: &[usize]) {
    for &index in missing {
        let page = found[index].0.page;
        let mut candidate = Rectangle::new(
            SYNTHETIC_MARGIN,
            SYNTHETIC_MARGIN,
            SYNTHETIC_WIDTH,
            SYNTHETIC_HEIGHT,
        );
        while found
            .iter()
            .enumerate()
            .any(|(i, (f, _))| i != index && f.page == page && f.bounds.intersects(&candidate))
        {
            candidate.y += SYNTHETIC_STEP;
        }
        log::debug!(
            "Field {:?} has no /Rect, placing at ({}, {})",
            found[index].0.name,
            candidate.x,
            candidate.y
        );
        found[index].0.bounds = candidate;
    }
}
