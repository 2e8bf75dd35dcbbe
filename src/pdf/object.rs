//! Object variants, mutation tracking and the serialization contract

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use log::trace;

use crate::crypto::CryptInfo;
use crate::error::{CosError, CosResult};
use crate::parser::{DataParser, ParserBounds, ValueType};
use crate::pdf::annotation::AnnotationDict;
use crate::pdf::dict::{Dictionary, Value};
use crate::pdf::object_stream::ObjectStream;
use crate::pdf::props::walk_dict;
use crate::pdf::stream::PdfStream;
use crate::pdf::Reference;

/// Callback run before a tracked field changes
pub type ChangeObserver = Arc<dyn Fn() + Send + Sync>;

/// Everything needed to materialize one object
#[derive(Clone, Debug)]
pub struct ParserInfo {
    pub parser: Arc<dyn DataParser>,
    pub bounds: ParserBounds,
    pub value_type: ValueType,
    /// Identity of the object, from its header or its object-stream slot
    pub reference: Option<Reference>,
    pub crypt: Option<CryptInfo>,
    /// Id of the object stream this object was unpacked from
    pub stream_id: Option<u32>,
}

impl ParserInfo {
    /// Locate the value of the indirect object whose header starts at `offset`
    pub fn from_indirect(
        parser: Arc<dyn DataParser>,
        offset: usize,
        crypt: impl FnOnce(Reference) -> Option<CryptInfo>,
    ) -> CosResult<(Reference, ParserInfo)> {
        let header = parser
            .parse_indirect_header_at(offset)
            .wait()?
            .ok_or_else(|| CosError::malformed(offset, "expected indirect object header"))?;
        let value_at = header.next();
        let value_type = parser
            .get_value_type_at(value_at)
            .wait()?
            .ok_or_else(|| CosError::malformed(value_at, "unrecognised object value"))?;
        let bounds = parser
            .get_value_bounds_at(value_at)
            .wait()?
            .ok_or_else(|| CosError::malformed(value_at, "unterminated object value"))?;

        let info = ParserInfo {
            parser,
            bounds,
            value_type,
            reference: Some(header.value),
            crypt: crypt(header.value),
            stream_id: None,
        };
        Ok((header.value, info))
    }

    pub fn reference(&self) -> Option<Reference> {
        self.reference
    }
}

/// Shared state of every object variant
#[derive(Clone, Default)]
pub struct ObjectCore {
    reference: Option<Reference>,
    source: Option<(Arc<[u8]>, Range<usize>)>,
    added: bool,
    edited: bool,
    deleted: bool,
    stream_id: Option<u32>,
    observer: Option<ChangeObserver>,
}

impl ObjectCore {
    /// Core of an object read from `info`; flags start cleared
    pub fn parsed(info: &ParserInfo) -> Self {
        Self {
            reference: info.reference(),
            source: Some((Arc::clone(info.parser.buffer()), info.bounds.range())),
            stream_id: info.stream_id,
            ..Self::default()
        }
    }

    /// Core of an object created at runtime
    pub fn added() -> Self {
        Self {
            added: true,
            ..Self::default()
        }
    }

    pub fn reference(&self) -> Option<Reference> {
        self.reference
    }

    /// Exact bytes the object was parsed from
    pub fn source_bytes(&self) -> Option<&[u8]> {
        self.source.as_ref().and_then(|(buffer, range)| buffer.get(range.clone()))
    }

    pub fn is_added(&self) -> bool {
        self.added
    }

    pub fn is_edited(&self) -> bool {
        self.edited
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn stream_id(&self) -> Option<u32> {
        self.stream_id
    }

    pub fn set_observer(&mut self, observer: Option<ChangeObserver>) {
        self.observer = observer;
    }

    /// Flag an edit and notify the observer; call before assigning
    pub fn touch(&mut self) {
        self.edited = true;
        if let Some(observer) = &self.observer {
            observer();
        }
    }

    pub fn mark_deleted(&mut self) {
        if let Some(observer) = &self.observer {
            observer();
        }
        self.deleted = true;
    }

    pub(crate) fn restore(&mut self) {
        self.deleted = false;
    }

    /// Adopt the identity assigned by a save
    pub(crate) fn settle(&mut self, reference: Reference) {
        self.reference = Some(reference);
        self.added = false;
        self.edited = false;
        self.stream_id = None;
    }
}

impl PartialEq for ObjectCore {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference
    }
}

impl fmt::Debug for ObjectCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectCore")
            .field("reference", &self.reference)
            .field("source_len", &self.source.as_ref().map(|(_, r)| r.len()))
            .field("added", &self.added)
            .field("edited", &self.edited)
            .field("deleted", &self.deleted)
            .field("stream_id", &self.stream_id)
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

/// Single serialization entry point of every variant
pub trait Serializable {
    /// Object body without the `obj`/`endobj` wrapper; strings and stream
    /// payloads are encrypted with `crypt`
    fn to_bytes(&self, crypt: Option<&CryptInfo>) -> CosResult<Vec<u8>>;
}

/// `id gen obj` body `endobj`
pub fn write_indirect(reference: Reference, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 32);
    out.extend_from_slice(format!("{} {} obj\n", reference.id, reference.generation).as_bytes());
    out.extend_from_slice(body);
    out.extend_from_slice(b"\nendobj\n");
    out
}

/// Dictionary object without a dedicated variant
#[derive(Debug, Clone, PartialEq)]
pub struct DictObject {
    core: ObjectCore,
    dict: Dictionary,
}

impl DictObject {
    pub fn new(dict: Dictionary) -> Self {
        Self {
            core: ObjectCore::added(),
            dict,
        }
    }

    pub fn parse(info: &ParserInfo) -> CosResult<Self> {
        let bounds = dict_bounds(info)?;
        let dict = Dictionary::parse_bounds(info.parser.as_ref(), &bounds, info.crypt.as_ref())?;
        Ok(Self {
            core: ObjectCore::parsed(info),
            dict,
        })
    }

    pub fn dict(&self) -> &Dictionary {
        &self.dict
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.core.touch();
        self.dict.set(key, value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.core.touch();
        self.dict.remove(key)
    }
}

impl Serializable for DictObject {
    fn to_bytes(&self, crypt: Option<&CryptInfo>) -> CosResult<Vec<u8>> {
        self.dict.to_bytes(crypt)
    }
}

/// Non-dictionary indirect value (number, array, string, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct RawObject {
    core: ObjectCore,
    value: Value,
}

impl RawObject {
    pub fn new(value: Value) -> Self {
        Self {
            core: ObjectCore::added(),
            value,
        }
    }

    pub fn parse(info: &ParserInfo) -> CosResult<Self> {
        let parsed = Value::parse_at(info.parser.as_ref(), info.bounds.start, info.crypt.as_ref())?
            .ok_or_else(|| CosError::malformed(info.bounds.start, "unparseable value"))?;
        Ok(Self {
            core: ObjectCore::parsed(info),
            value: parsed.value,
        })
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn set_value(&mut self, value: Value) {
        self.core.touch();
        self.value = value;
    }
}

impl Serializable for RawObject {
    fn to_bytes(&self, crypt: Option<&CryptInfo>) -> CosResult<Vec<u8>> {
        self.value.to_bytes(crypt)
    }
}

/// Closed set of object variants
#[derive(Debug, Clone, PartialEq)]
pub enum PdfObject {
    Dictionary(DictObject),
    Stream(PdfStream),
    ObjectStream(ObjectStream),
    Annotation(AnnotationDict),
    Value(RawObject),
}

impl PdfObject {
    /// Build the variant matching the value at `info`
    pub fn parse(info: &ParserInfo) -> CosResult<Self> {
        trace!("Parsing {:?} at {}", info.value_type, info.bounds.start);
        match info.value_type {
            ValueType::Stream => match sniff_type(info)?.as_deref() {
                Some("ObjStm") => ObjectStream::parse(info).map(PdfObject::ObjectStream),
                _ => PdfStream::parse(info).map(PdfObject::Stream),
            },
            ValueType::Dictionary => match sniff_type(info)?.as_deref() {
                Some("Annot") => AnnotationDict::parse(info).map(PdfObject::Annotation),
                _ => DictObject::parse(info).map(PdfObject::Dictionary),
            },
            _ => RawObject::parse(info).map(PdfObject::Value),
        }
    }

    pub fn core(&self) -> &ObjectCore {
        match self {
            PdfObject::Dictionary(o) => &o.core,
            PdfObject::Stream(o) => o.core(),
            PdfObject::ObjectStream(o) => o.core(),
            PdfObject::Annotation(o) => o.core(),
            PdfObject::Value(o) => &o.core,
        }
    }

    pub fn core_mut(&mut self) -> &mut ObjectCore {
        match self {
            PdfObject::Dictionary(o) => &mut o.core,
            PdfObject::Stream(o) => o.core_mut(),
            PdfObject::ObjectStream(o) => o.core_mut(),
            PdfObject::Annotation(o) => o.core_mut(),
            PdfObject::Value(o) => &mut o.core,
        }
    }

    pub fn reference(&self) -> Option<Reference> {
        self.core().reference()
    }

    pub fn is_added(&self) -> bool {
        self.core().is_added()
    }

    pub fn is_edited(&self) -> bool {
        self.core().is_edited()
    }

    pub fn is_deleted(&self) -> bool {
        self.core().is_deleted()
    }

    pub fn mark_deleted(&mut self) {
        self.core_mut().mark_deleted();
    }

    pub fn set_observer(&mut self, observer: Option<ChangeObserver>) {
        self.core_mut().set_observer(observer);
    }

    /// `/Type` of dictionary-like variants
    pub fn type_name(&self) -> Option<&str> {
        match self {
            PdfObject::Dictionary(o) => o.dict.get_name("Type"),
            PdfObject::Stream(o) => o.stream_type(),
            PdfObject::ObjectStream(_) => Some("ObjStm"),
            PdfObject::Annotation(_) => Some("Annot"),
            PdfObject::Value(_) => None,
        }
    }

    pub fn as_dict_object(&self) -> Option<&DictObject> {
        match self {
            PdfObject::Dictionary(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_dict_object_mut(&mut self) -> Option<&mut DictObject> {
        match self {
            PdfObject::Dictionary(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_annotation(&self) -> Option<&AnnotationDict> {
        match self {
            PdfObject::Annotation(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_annotation_mut(&mut self) -> Option<&mut AnnotationDict> {
        match self {
            PdfObject::Annotation(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&PdfStream> {
        match self {
            PdfObject::Stream(o) => Some(o),
            PdfObject::ObjectStream(o) => Some(o.stream()),
            _ => None,
        }
    }

    pub fn as_object_stream(&self) -> Option<&ObjectStream> {
        match self {
            PdfObject::ObjectStream(o) => Some(o),
            _ => None,
        }
    }

    /// Complete `id gen obj ... endobj` bytes
    pub fn to_indirect_bytes(&self, reference: Reference, crypt: Option<&CryptInfo>) -> CosResult<Vec<u8>> {
        Ok(write_indirect(reference, &self.to_bytes(crypt)?))
    }
}

impl Serializable for PdfObject {
    fn to_bytes(&self, crypt: Option<&CryptInfo>) -> CosResult<Vec<u8>> {
        match self {
            PdfObject::Dictionary(o) => o.to_bytes(crypt),
            PdfObject::Stream(o) => o.to_bytes(crypt),
            PdfObject::ObjectStream(o) => o.to_bytes(crypt),
            PdfObject::Annotation(o) => o.to_bytes(crypt),
            PdfObject::Value(o) => o.to_bytes(crypt),
        }
    }
}

/// Bounds of the dictionary part of a dictionary or stream value
pub(crate) fn dict_bounds(info: &ParserInfo) -> CosResult<ParserBounds> {
    match info.value_type {
        ValueType::Dictionary => Ok(info.bounds),
        _ => info
            .parser
            .get_dict_bounds_at(info.bounds.start)
            .wait()?
            .ok_or_else(|| CosError::malformed(info.bounds.start, "expected dictionary")),
    }
}

/// `/Type` name of the dictionary at `info`, without parsing other entries
fn sniff_type(info: &ParserInfo) -> CosResult<Option<String>> {
    let parser = info.parser.as_ref();
    let bounds = dict_bounds(info)?;
    let mut found = None;
    walk_dict(parser, &bounds, |name, i| {
        if name == "Type" && found.is_none() {
            if let Some(value) = parser.parse_name_at(i, false).wait()? {
                let next = value.next();
                found = Some(value.value);
                return Ok(next);
            }
        }
        parser
            .skip_value_at(i)
            .wait()?
            .map(|end| end + 1)
            .ok_or_else(|| CosError::malformed(i, format!("missing value for /{}", name)))
    })?;
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CryptMethod, DocumentCrypt};
    use crate::parser::{get_data_parser, ParserStrategy};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use test_log::test;

    fn info_for(data: &[u8], reference: Reference) -> ParserInfo {
        let parser = get_data_parser(data.to_vec(), ParserStrategy::Sync);
        let (_, info) = ParserInfo::from_indirect(parser, 0, |r| {
            assert_eq!(r, reference);
            Some(CryptInfo::plain(r))
        })
        .unwrap();
        info
    }

    #[test]
    fn test_from_indirect_locates_value() {
        let info = info_for(b"12 0 obj\n<< /Type /Page >>\nendobj", Reference::new(12, 0));
        assert_eq!(info.value_type, ValueType::Dictionary);
        assert_eq!(info.bounds.start, 9);
        assert_eq!(info.reference(), Some(Reference::new(12, 0)));
    }

    #[test]
    fn test_unencrypted_object_keeps_its_reference() {
        let parser = get_data_parser(b"7 2 obj\n<< /Type /Annot /Subtype /Text >>\nendobj".to_vec(), ParserStrategy::Sync);
        let (header, info) = ParserInfo::from_indirect(parser, 0, |_| None).unwrap();
        assert_eq!(header, Reference::new(7, 2));
        assert!(info.crypt.is_none());
        assert_eq!(info.reference(), Some(Reference::new(7, 2)));

        let object = PdfObject::parse(&info).unwrap();
        assert!(matches!(object, PdfObject::Annotation(_)));
        assert_eq!(object.reference(), Some(Reference::new(7, 2)));
    }

    #[test]
    fn test_variant_dispatch() {
        let object = PdfObject::parse(&info_for(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj", Reference::new(1, 0))).unwrap();
        assert!(matches!(object, PdfObject::Dictionary(_)));
        assert_eq!(object.type_name(), Some("Catalog"));

        let object = PdfObject::parse(&info_for(b"2 0 obj [1 2 3] endobj", Reference::new(2, 0))).unwrap();
        assert!(matches!(object, PdfObject::Value(_)));

        let object = PdfObject::parse(&info_for(
            b"3 0 obj << /Type /Annot /Subtype /Text /Rect [0 0 1 1] >> endobj",
            Reference::new(3, 0),
        ))
        .unwrap();
        assert!(matches!(object, PdfObject::Annotation(_)));

        let object = PdfObject::parse(&info_for(b"4 0 obj << /Length 2 >> stream\nab\nendstream endobj", Reference::new(4, 0))).unwrap();
        assert!(matches!(object, PdfObject::Stream(_)));
    }

    #[test]
    fn test_edited_flag_is_sticky_and_observer_runs_first() {
        let mut object = PdfObject::parse(&info_for(b"5 0 obj << /A 1 /B 2 >> endobj", Reference::new(5, 0))).unwrap();
        assert!(!object.is_edited());

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        object.set_observer(Some(Arc::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        })));

        let dict = object.as_dict_object_mut().unwrap();
        dict.set("A", Value::Number(3.0));
        assert!(dict.core.is_edited());
        dict.set("B", Value::Number(4.0));
        assert!(object.is_edited());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        object.mark_deleted();
        assert!(object.is_deleted());
        assert!(object.is_edited());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_round_trip_equality() {
        let info = info_for(b"6 0 obj << /Type /Font /Widths [1 2.5 3] /Name (F\\(1\\)) >> endobj", Reference::new(6, 0));
        let object = PdfObject::parse(&info).unwrap();
        let bytes = object.to_indirect_bytes(Reference::new(6, 0), None).unwrap();
        let reparsed = PdfObject::parse(&info_for(&bytes, Reference::new(6, 0))).unwrap();
        assert_eq!(reparsed, object);
        assert_eq!(object.core().source_bytes().map(|b| b.len()), Some(info.bounds.range().len()));
    }

    #[test]
    fn test_encrypted_serialization_differs() {
        let reference = Reference::new(5, 0);
        let crypt = Arc::new(DocumentCrypt::new(vec![7u8; 16], CryptMethod::Rc4, CryptMethod::Rc4));
        let object = PdfObject::Value(RawObject::new(Value::String(b"secret text".to_vec())));

        let plain = object.to_bytes(None).unwrap();
        let encrypted = object.to_bytes(Some(&CryptInfo::new(reference, crypt))).unwrap();
        assert_eq!(plain, b"(secret text)".to_vec());
        assert_ne!(plain, encrypted);
        assert!(encrypted.len() >= plain.len());
    }
}
