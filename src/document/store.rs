//! Lazy object resolution over the retained byte buffer.

use crate::error::{Error, Result};
use crate::object::{Dict, Object, ObjectRef};
use crate::objstm::ObjectStream;
use crate::parser::parse_indirect_object_at;
use crate::xref::{CrossRefTable, XRefEntryType};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Maximum length of a reference chain (`1 0 R` pointing at `2 0 R` ...).
const MAX_REFERENCE_CHAIN: usize = 32;

/// Object loader for one revision chain of a document.
///
/// Objects are parsed on demand. Decoded object streams are cached because
/// every compressed lookup would otherwise inflate the whole stream.
pub struct ObjectStore {
    data: Bytes,
    xref: CrossRefTable,
    object_streams: Mutex<HashMap<u32, Arc<ObjectStream>>>,
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("len", &self.data.len())
            .field("xref_kind", &self.xref.kind())
            .field("objects", &self.xref.len())
            .finish()
    }
}

impl Clone for ObjectStore {
    fn clone(&self) -> Self {
        Self::new(self.data.clone(), self.xref.clone())
    }
}

impl ObjectStore {
    /// Store over `data` indexed by `xref`.
    pub fn new(data: Bytes, xref: CrossRefTable) -> Self {
        Self {
            data,
            xref,
            object_streams: Mutex::new(HashMap::new()),
        }
    }

    /// The cross-reference table.
    pub fn xref(&self) -> &CrossRefTable {
        &self.xref
    }

    /// Load one indirect object without following references inside it.
    pub fn load(&self, obj_ref: ObjectRef) -> Result<Object> {
        let entry = self
            .xref
            .get(obj_ref.id)
            .ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen))?;

        match entry.entry_type {
            XRefEntryType::Uncompressed => {
                let offset = usize::try_from(entry.offset).map_err(|_| Error::ParseError {
                    offset: 0,
                    reason: format!("offset {} of {} does not fit in memory", entry.offset, obj_ref),
                })?;
                let (found, object) = parse_indirect_object_at(&self.data, offset)?;
                if found.id != obj_ref.id {
                    log::warn!("xref points {} at offset {} which holds {}", obj_ref, offset, found);
                    return Err(Error::ObjectNotFound(obj_ref.id, obj_ref.gen));
                }
                Ok(object)
            },
            XRefEntryType::Compressed => {
                let stream_id = entry.offset as u32;
                let stream = self.object_stream(stream_id)?;
                stream.object_at(entry.generation as usize, obj_ref.id)
            },
            XRefEntryType::Free => Err(Error::ObjectNotFound(obj_ref.id, obj_ref.gen)),
        }
    }

    fn object_stream(&self, stream_id: u32) -> Result<Arc<ObjectStream>> {
        {
            let cache = self
                .object_streams
                .lock()
                .map_err(|_| Error::Concurrency("object stream cache lock poisoned".to_string()))?;
            if let Some(stream) = cache.get(&stream_id) {
                return Ok(Arc::clone(stream));
            }
        }

        log::debug!("Decoding object stream {}", stream_id);
        let stream_obj = self.load(ObjectRef::new(stream_id, 0))?;
        let stream = Arc::new(ObjectStream::parse(&stream_obj)?);

        let mut cache = self
            .object_streams
            .lock()
            .map_err(|_| Error::Concurrency("object stream cache lock poisoned".to_string()))?;
        Ok(Arc::clone(cache.entry(stream_id).or_insert(stream)))
    }

    /// Follow `obj` through any chain of references to a direct object.
    pub fn resolve(&self, obj: &Object) -> Result<Object> {
        let mut current = obj.clone();
        let mut seen = HashSet::new();
        while let Object::Reference(r) = current {
            if !seen.insert(r) || seen.len() > MAX_REFERENCE_CHAIN {
                return Err(Error::CircularReference(r));
            }
            current = self.load(r)?;
        }
        Ok(current)
    }

    /// Resolve `obj` and require a dictionary (a stream yields its dictionary).
    pub fn resolve_dict(&self, obj: &Object) -> Result<Dict> {
        match self.resolve(obj)? {
            Object::Dictionary(d) => Ok(d),
            Object::Stream { dict, .. } => Ok(dict),
            other => Err(Error::InvalidObjectType {
                expected: "Dictionary".to_string(),
                found: other.type_name().to_string(),
            }),
        }
    }

    /// Load `obj_ref` and require a dictionary.
    pub fn load_dict(&self, obj_ref: ObjectRef) -> Result<Dict> {
        self.resolve_dict(&Object::Reference(obj_ref))
    }

    /// Look up `key` in `dict` and resolve it; absent and null both give `None`.
    pub fn get_resolved(&self, dict: &Dict, key: &str) -> Result<Option<Object>> {
        match dict.get(key) {
            None => Ok(None),
            Some(value) => match self.resolve(value)? {
                Object::Null => Ok(None),
                resolved => Ok(Some(resolved)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xref::{find_xref_offset, parse_xref};

    fn store(data: &'static [u8]) -> ObjectStore {
        let offset = find_xref_offset(data).unwrap();
        let xref = parse_xref(data, offset).unwrap();
        ObjectStore::new(Bytes::from_static(data), xref)
    }

    #[test]
    fn test_load_uncompressed() {
        let s = store(include_bytes!("../../tests/fixtures/minimal.pdf"));
        let catalog = s.load_dict(ObjectRef::new(1, 0)).unwrap();
        assert_eq!(catalog.get("Type").and_then(|o| o.as_name()), Some("Catalog"));
        assert!(matches!(s.load(ObjectRef::new(4, 0)).unwrap(), Object::Stream { .. }));
    }

    #[test]
    fn test_load_compressed() {
        let s = store(include_bytes!("../../tests/fixtures/xref_stream.pdf"));
        let field = s.load_dict(ObjectRef::new(4, 0)).unwrap();
        assert_eq!(field.get("FT").and_then(|o| o.as_name()), Some("Sig"));
        // Second lookup hits the cached stream
        let pages = s.load_dict(ObjectRef::new(2, 0)).unwrap();
        assert_eq!(pages.get("Count").and_then(|o| o.as_integer()), Some(1));
    }

    #[test]
    fn test_missing_and_free_objects() {
        let s = store(include_bytes!("../../tests/fixtures/two_signature_fields.pdf"));
        assert!(matches!(s.load(ObjectRef::new(4, 0)), Err(Error::ObjectNotFound(4, 0))));
        assert!(matches!(s.load(ObjectRef::new(99, 0)), Err(Error::ObjectNotFound(99, 0))));
    }

    #[test]
    fn test_resolve_direct_object_is_identity() {
        let s = store(include_bytes!("../../tests/fixtures/minimal.pdf"));
        assert_eq!(s.resolve(&Object::Integer(7)).unwrap(), Object::Integer(7));
    }

    #[test]
    fn test_get_resolved_treats_null_as_absent() {
        let s = store(include_bytes!("../../tests/fixtures/minimal.pdf"));
        let mut dict = Dict::new();
        dict.insert("V".to_string(), Object::Null);
        dict.insert("P".to_string(), Object::Reference(ObjectRef::new(3, 0)));
        assert!(s.get_resolved(&dict, "V").unwrap().is_none());
        assert!(s.get_resolved(&dict, "Missing").unwrap().is_none());
        assert!(s.get_resolved(&dict, "P").unwrap().unwrap().as_dict().is_some());
    }
}
