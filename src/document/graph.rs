//! Lazily materialized object graph over one document buffer

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use log::{trace, warn};

use crate::crypto::{CryptInfo, DocumentCrypt};
use crate::error::{CosError, CosResult};
use crate::parser::{get_data_parser, DataParser, ParserStrategy};
use crate::pdf::{
    AnnotationDict, ChangeObserver, CrossRefTable, Dictionary, ParserInfo, PdfObject, Reference, Value,
    XrefLocation,
};

/// Handle of an object in the engine's graph
///
/// Objects added at runtime have no id until they are saved, so they are
/// addressed by the slot they were added under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKey {
    Id(u32),
    Added(usize),
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKey::Id(id) => write!(f, "{}", id),
            ObjectKey::Added(slot) => write!(f, "new#{}", slot),
        }
    }
}

/// A runtime object waiting for an id, with the page it belongs on
#[derive(Debug, Clone)]
pub(crate) struct AddedObject {
    pub object: PdfObject,
    pub page: Option<u32>,
}

pub(crate) struct ObjectGraph {
    parser: Arc<dyn DataParser>,
    xref: CrossRefTable,
    crypt: Option<Arc<DocumentCrypt>>,
    encrypt_ref: Option<Reference>,
    objects: HashMap<u32, PdfObject>,
    undecodable: HashSet<u32>,
    loading: HashSet<u32>,
    added: BTreeMap<usize, AddedObject>,
    next_slot: usize,
    changed: Arc<Mutex<BTreeSet<ObjectKey>>>,
}

impl ObjectGraph {
    pub fn open(data: Arc<[u8]>, strategy: ParserStrategy) -> CosResult<Self> {
        let parser = get_data_parser(data, strategy);
        let xref = CrossRefTable::build(&parser)?;
        let encrypt_ref = xref.trailer().get_reference("Encrypt");
        Ok(Self {
            parser,
            xref,
            crypt: None,
            encrypt_ref,
            objects: HashMap::new(),
            undecodable: HashSet::new(),
            loading: HashSet::new(),
            added: BTreeMap::new(),
            next_slot: 0,
            changed: Arc::new(Mutex::new(BTreeSet::new())),
        })
    }

    pub fn buffer(&self) -> &Arc<[u8]> {
        self.parser.buffer()
    }

    pub fn strategy(&self) -> ParserStrategy {
        self.parser.strategy()
    }

    pub fn xref(&self) -> &CrossRefTable {
        &self.xref
    }

    pub fn trailer(&self) -> &Dictionary {
        self.xref.trailer()
    }

    pub fn encrypt_ref(&self) -> Option<Reference> {
        self.encrypt_ref
    }

    pub fn crypt(&self) -> Option<&Arc<DocumentCrypt>> {
        self.crypt.as_ref()
    }

    /// Install the document key; cached objects are re-read with it
    pub fn set_crypt(&mut self, crypt: Option<Arc<DocumentCrypt>>) {
        self.crypt = crypt;
        self.objects.clear();
        self.undecodable.clear();
    }

    /// Crypt context of a top-level object; the `/Encrypt` dictionary is never encrypted
    pub fn crypt_for(&self, reference: Reference) -> Option<CryptInfo> {
        let crypt = self.crypt.as_ref()?;
        if Some(reference) == self.encrypt_ref {
            return None;
        }
        Some(CryptInfo::new(reference, Arc::clone(crypt)))
    }

    /// First string of the trailer `/ID`
    pub fn file_id(&self) -> Vec<u8> {
        self.trailer()
            .get_array("ID")
            .and_then(|ids| ids.first())
            .and_then(Value::as_bytes)
            .map(<[u8]>::to_vec)
            .unwrap_or_default()
    }

    pub fn encrypt_dictionary(&mut self) -> CosResult<Option<Dictionary>> {
        match self.trailer().get("Encrypt").cloned() {
            Some(Value::Dictionary(dict)) => Ok(Some(dict)),
            Some(Value::Reference(reference)) => self
                .dict(reference.id)?
                .map(Some)
                .ok_or(CosError::ObjectNotFound(reference)),
            _ => Ok(None),
        }
    }

    fn observer_for(&self, key: ObjectKey) -> ChangeObserver {
        let changed = Arc::clone(&self.changed);
        Arc::new(move || {
            if let Ok(mut changed) = changed.lock() {
                changed.insert(key);
            }
        })
    }

    /// Keys whose fields changed since the last call
    pub fn take_changed(&self) -> Vec<ObjectKey> {
        match self.changed.lock() {
            Ok(mut changed) => std::mem::take(&mut *changed).into_iter().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn parser_info(&mut self, id: u32) -> CosResult<Option<ParserInfo>> {
        match self.xref.resolve(id) {
            None => Ok(None),
            Some(XrefLocation::Offset { offset, generation }) => {
                let (reference, info) =
                    ParserInfo::from_indirect(Arc::clone(&self.parser), offset, |r| self.crypt_for(r))?;
                if reference.id != id || reference.generation != generation {
                    warn!("Xref entry {} {} points at object {}", id, generation, reference);
                }
                Ok(Some(info))
            }
            Some(XrefLocation::InStream { stream_id, index }) => {
                trace!("Object {} is packed at index {} of {}", id, index, stream_id);
                if !self.load(stream_id)? {
                    return Ok(None);
                }
                match self.objects.get(&stream_id) {
                    Some(PdfObject::ObjectStream(container)) => container.get_sub_object(id),
                    _ => {
                        warn!("Object {} is not an object stream", stream_id);
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Materialize `id` into the cache; false when absent or undecodable
    pub fn load(&mut self, id: u32) -> CosResult<bool> {
        if self.objects.contains_key(&id) {
            return Ok(true);
        }
        if self.undecodable.contains(&id) || !self.loading.insert(id) {
            return Ok(false);
        }
        let parsed = self
            .parser_info(id)
            .and_then(|info| info.map(|info| PdfObject::parse(&info)).transpose());
        self.loading.remove(&id);

        match parsed {
            Ok(Some(mut object)) => {
                object.set_observer(Some(self.observer_for(ObjectKey::Id(id))));
                self.objects.insert(id, object);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(CosError::ParserDisconnected) => Err(CosError::ParserDisconnected),
            Err(e) => {
                warn!("Skipping undecodable object {}: {}", id, e);
                self.undecodable.insert(id);
                Ok(false)
            }
        }
    }

    /// Load `id` as an annotation, re-reading dictionaries that omit `/Type /Annot`
    pub fn load_annotation(&mut self, id: u32) -> CosResult<bool> {
        if !self.load(id)? {
            return Ok(false);
        }
        let plain_dict = match self.objects.get(&id) {
            Some(object) => {
                !object.is_edited()
                    && matches!(object, PdfObject::Dictionary(dict) if dict.dict().get_name("Subtype").is_some())
            }
            None => false,
        };
        if plain_dict {
            if let Some(info) = self.parser_info(id)? {
                match AnnotationDict::parse(&info) {
                    Ok(annotation) => {
                        let mut object = PdfObject::Annotation(annotation);
                        object.set_observer(Some(self.observer_for(ObjectKey::Id(id))));
                        self.objects.insert(id, object);
                    }
                    Err(e) => warn!("Object {} is not a readable annotation: {}", id, e),
                }
            }
        }
        Ok(matches!(self.objects.get(&id), Some(PdfObject::Annotation(_))))
    }

    pub fn get(&mut self, id: u32) -> CosResult<Option<&PdfObject>> {
        if self.load(id)? {
            Ok(self.objects.get(&id))
        } else {
            Ok(None)
        }
    }

    /// Cached object without loading
    pub fn peek(&self, id: u32) -> Option<&PdfObject> {
        self.objects.get(&id)
    }

    pub fn object(&mut self, key: ObjectKey) -> CosResult<Option<&PdfObject>> {
        match key {
            ObjectKey::Id(id) => self.get(id),
            ObjectKey::Added(slot) => Ok(self.added.get(&slot).map(|a| &a.object)),
        }
    }

    pub fn object_mut(&mut self, key: ObjectKey) -> CosResult<Option<&mut PdfObject>> {
        match key {
            ObjectKey::Id(id) => {
                if self.load(id)? {
                    Ok(self.objects.get_mut(&id))
                } else {
                    Ok(None)
                }
            }
            ObjectKey::Added(slot) => Ok(self.added.get_mut(&slot).map(|a| &mut a.object)),
        }
    }

    /// Put back a previous version of `key`
    pub fn restore(&mut self, key: ObjectKey, object: PdfObject) {
        match key {
            ObjectKey::Id(id) => {
                self.objects.insert(id, object);
            }
            ObjectKey::Added(slot) => {
                if let Some(added) = self.added.get_mut(&slot) {
                    added.object = object;
                }
            }
        }
    }

    pub fn add(&mut self, mut object: PdfObject, page: Option<u32>) -> ObjectKey {
        let key = ObjectKey::Added(self.next_slot);
        self.next_slot += 1;
        object.set_observer(Some(self.observer_for(key)));
        self.added.insert(self.next_slot - 1, AddedObject { object, page });
        key
    }

    pub fn remove_added(&mut self, slot: usize) -> Option<AddedObject> {
        self.added.remove(&slot)
    }

    pub fn added(&self) -> impl Iterator<Item = (usize, &AddedObject)> {
        self.added.iter().map(|(slot, added)| (*slot, added))
    }

    /// Cached objects in id order
    pub fn cached(&self) -> Vec<(u32, &PdfObject)> {
        let mut cached: Vec<_> = self.objects.iter().map(|(id, o)| (*id, o)).collect();
        cached.sort_by_key(|(id, _)| *id);
        cached
    }

    /// Copy of the dictionary of `id`, for dictionary-like objects
    pub fn dict(&mut self, id: u32) -> CosResult<Option<Dictionary>> {
        Ok(match self.get(id)? {
            Some(PdfObject::Dictionary(object)) => Some(object.dict().clone()),
            _ => None,
        })
    }

    /// Array behind a direct or indirect value
    pub fn resolve_array(&mut self, value: &Value) -> CosResult<Option<Vec<Value>>> {
        match value {
            Value::Array(items) => Ok(Some(items.clone())),
            Value::Reference(reference) => Ok(match self.get(reference.id)? {
                Some(PdfObject::Value(raw)) => raw.value().as_array().map(<[Value]>::to_vec),
                _ => None,
            }),
            _ => Ok(None),
        }
    }

    /// Verbatim `obj ... endobj` bytes of a top-level object
    pub fn raw_object(&self, id: u32) -> CosResult<Option<Vec<u8>>> {
        let Some(XrefLocation::Offset { offset, .. }) = self.xref.resolve(id) else {
            return Ok(None);
        };
        let Some(end) = self.parser.find_bytes_at(b"endobj", offset).wait()? else {
            return Ok(None);
        };
        let mut bytes = self.parser.slice_char_codes_at(offset, end + b"endobj".len() - 1).wait()?;
        bytes.push(b'\n');
        Ok(Some(bytes))
    }

    /// Take over the state of a saved document, keeping the objects in `keep`
    pub fn adopt(&mut self, saved: ObjectGraph, keep: HashMap<u32, PdfObject>, keep_added: BTreeMap<usize, AddedObject>) {
        self.parser = saved.parser;
        self.xref = saved.xref;
        self.encrypt_ref = saved.encrypt_ref;
        self.objects = keep;
        self.undecodable.clear();
        self.added = keep_added;
        if let Ok(mut changed) = self.changed.lock() {
            changed.clear();
        }
    }
}

impl fmt::Debug for ObjectGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectGraph")
            .field("len", &self.parser.len())
            .field("strategy", &self.parser.strategy())
            .field("cached", &self.objects.len())
            .field("added", &self.added.len())
            .field("encrypted", &self.crypt.is_some())
            .finish()
    }
}
