//! Object stream containers and sub-object extraction

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use log::{debug, trace, warn};

use crate::crypto::CryptInfo;
use crate::error::{CosError, CosResult};
use crate::parser::{DataParser, SyncDataParser, ValueType};
use crate::pdf::dict::{DictWriter, Dictionary, Value};
use crate::pdf::filter::Filter;
use crate::pdf::object::{ObjectCore, ParserInfo, Serializable};
use crate::pdf::props::{field_keys, FieldKey, PropReader};
use crate::pdf::stream::PdfStream;
use crate::pdf::Reference;

field_keys! {
    enum ObjStmKey {
        N => "N",
        First => "First",
        Extends => "Extends",
    }
}

/// Offset table and parser over the decoded container payload
#[derive(Debug)]
struct PackedIndex {
    parser: Arc<SyncDataParser>,
    order: Vec<u32>,
    offsets: HashMap<u32, usize>,
}

/// A stream packing `N` objects after an `id offset` table
#[derive(Debug, Clone)]
pub struct ObjectStream {
    stream: PdfStream,
    n: Option<usize>,
    first: Option<usize>,
    extends: Option<Reference>,
    index: OnceLock<Arc<PackedIndex>>,
}

impl ObjectStream {
    pub fn parse(info: &ParserInfo) -> CosResult<Self> {
        let mut n = None;
        let mut first = None;
        let mut extends = None;
        let stream = PdfStream::parse_with(info, &mut |name: &str, i: usize, reader: &PropReader<'_>| match ObjStmKey::from_name(name) {
            Some(key @ ObjStmKey::N) => reader.number(key, i, &mut n).map(Some),
            Some(key @ ObjStmKey::First) => reader.number(key, i, &mut first).map(Some),
            Some(key @ ObjStmKey::Extends) => reader.reference(key, i, &mut extends).map(Some),
            None => Ok(None),
        })?;

        Ok(Self {
            stream,
            n: n.and_then(whole_number),
            first: first.and_then(whole_number),
            extends,
            index: OnceLock::new(),
        })
    }

    /// Pack `(id, body)` pairs into a new Flate-compressed container
    pub fn from_objects(objects: &[(u32, Vec<u8>)]) -> CosResult<Self> {
        let mut table = Vec::new();
        let mut bodies = Vec::new();
        for (id, body) in objects {
            table.extend_from_slice(format!("{} {} ", id, bodies.len()).as_bytes());
            bodies.extend_from_slice(body);
            bodies.push(b'\n');
        }
        let first = table.len();
        table.extend_from_slice(&bodies);

        let filter = Filter::FlateDecode;
        let encoded = filter.encode(&table)?;
        let mut dict = Dictionary::new();
        dict.set("Type", Value::Name("ObjStm".into()));
        Ok(Self {
            stream: PdfStream::new(dict, vec![filter.name().to_string()], encoded),
            n: Some(objects.len()),
            first: Some(first),
            extends: None,
            index: OnceLock::new(),
        })
    }

    pub fn stream(&self) -> &PdfStream {
        &self.stream
    }

    pub fn core(&self) -> &ObjectCore {
        self.stream.core()
    }

    pub fn core_mut(&mut self) -> &mut ObjectCore {
        self.stream.core_mut()
    }

    pub fn n(&self) -> Option<usize> {
        self.n
    }

    pub fn first(&self) -> Option<usize> {
        self.first
    }

    pub fn extends(&self) -> Option<Reference> {
        self.extends
    }

    pub fn set_extends(&mut self, extends: Option<Reference>) {
        self.stream.core_mut().touch();
        self.extends = extends;
    }

    fn packed_index(&self, n: usize) -> CosResult<Arc<PackedIndex>> {
        if let Some(index) = self.index.get() {
            return Ok(Arc::clone(index));
        }

        let data = self.stream.decoded_data()?.to_vec();
        let parser = Arc::new(SyncDataParser::new(data));
        let mut order = Vec::with_capacity(n.min(1024));
        let mut offsets = HashMap::with_capacity(n.min(1024));
        let mut i = 0;
        for _ in 0..n {
            let id = parser
                .parse_number_at(i, false, false)
                .wait()?
                .ok_or_else(|| CosError::malformed(i, "expected object number in object stream"))?;
            let offset = parser
                .parse_number_at(id.next(), false, false)
                .wait()?
                .ok_or_else(|| CosError::malformed(id.next(), "expected offset in object stream"))?;
            i = offset.next();
            let (Some(id), Some(offset)) = (whole_number::<u32>(id.value), whole_number::<usize>(offset.value)) else {
                warn!("Skipping out-of-range entry {} {} in object stream", id.value, offset.value);
                continue;
            };
            order.push(id);
            offsets.entry(id).or_insert(offset);
        }
        trace!("Object stream {:?} holds {:?}", self.core().reference(), order);

        let index = Arc::new(PackedIndex { parser, order, offsets });
        Ok(Arc::clone(self.index.get_or_init(|| index)))
    }

    /// Ids packed in this container, in table order
    pub fn object_ids(&self) -> CosResult<Vec<u32>> {
        match self.n {
            Some(n) => Ok(self.packed_index(n)?.order.clone()),
            None => Ok(Vec::new()),
        }
    }

    /// Locate the packed object `id`; `None` when it is absent or of a kind
    /// object streams cannot hold
    pub fn get_sub_object(&self, id: u32) -> CosResult<Option<ParserInfo>> {
        let (Some(n), Some(first)) = (self.n, self.first) else {
            return Ok(None);
        };
        let index = self.packed_index(n)?;
        let Some(&offset) = index.offsets.get(&id) else {
            return Ok(None);
        };

        let Some(start) = first.checked_add(offset) else {
            return Ok(None);
        };
        let parser = &index.parser;
        let value_type = match parser.get_value_type_at(start).wait()? {
            Some(
                kind @ (ValueType::Dictionary
                | ValueType::Array
                | ValueType::StringLiteral
                | ValueType::StringHex
                | ValueType::Number),
            ) => kind,
            other => {
                debug!("Packed object {} has unsupported kind {:?}", id, other);
                return Ok(None);
            }
        };
        let Some(bounds) = parser.get_value_bounds_at(start).wait()? else {
            return Ok(None);
        };

        let bytes = parser.slice_char_codes_at(bounds.start, bounds.end).wait()?;
        Ok(Some(ParserInfo {
            parser: Arc::new(SyncDataParser::new(bytes)),
            bounds: bounds.rebased(),
            value_type,
            reference: Some(Reference::new(id, 0)),
            crypt: None,
            stream_id: self.core().reference().map(|r| r.id),
        }))
    }
}

/// Non-negative integral `value` that fits `T`
fn whole_number<T: TryFrom<u64>>(value: f64) -> Option<T> {
    if value.fract() != 0.0 || !(0.0..u64::MAX as f64).contains(&value) {
        return None;
    }
    T::try_from(value as u64).ok()
}

impl Serializable for ObjectStream {
    fn to_bytes(&self, crypt: Option<&CryptInfo>) -> CosResult<Vec<u8>> {
        let mut bytes = self.stream.to_bytes(crypt)?;

        let mut writer = DictWriter::new(crypt);
        writer
            .opt_number("N", self.n.map(|v| v as f64))
            .opt_number("First", self.first.map(|v| v as f64))
            .opt_reference("Extends", self.extends);
        let framed = writer.finish();
        let entries = &framed[2..framed.len() - 2];
        if !entries.is_empty() {
            let mut splice = entries.to_vec();
            splice.push(b' ');
            bytes.splice(2..2, splice);
        }
        Ok(bytes)
    }
}

impl PartialEq for ObjectStream {
    fn eq(&self, other: &Self) -> bool {
        self.stream == other.stream && self.n == other.n && self.first == other.first && self.extends == other.extends
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{get_data_parser, ParserStrategy};
    use crate::pdf::object::{write_indirect, PdfObject};
    use pretty_assertions::assert_eq;
    use test_log::test;

    fn container(dict_entries: &str, payload: &[u8]) -> ObjectStream {
        let mut data = format!("7 0 obj << /Type /ObjStm {} /Length {} >> stream\n", dict_entries, payload.len()).into_bytes();
        data.extend_from_slice(payload);
        data.extend_from_slice(b"\nendstream endobj");
        let parser = get_data_parser(data, ParserStrategy::Sync);
        let (_, info) = ParserInfo::from_indirect(parser, 0, |r| Some(CryptInfo::plain(r))).unwrap();
        match PdfObject::parse(&info).unwrap() {
            PdfObject::ObjectStream(stream) => stream,
            other => panic!("expected object stream, got {:?}", other),
        }
    }

    fn sub_object_bytes(info: &ParserInfo) -> Vec<u8> {
        info.parser
            .slice_char_codes_at(info.bounds.start, info.bounds.end)
            .wait()
            .unwrap()
    }

    #[test]
    fn test_sub_objects_are_sliced_into_fresh_buffers() {
        let stream = container("/N 2 /First 8", b"3 0 9 9\n<</A 1>> <</B 2>>");

        let three = stream.get_sub_object(3).unwrap().unwrap();
        assert_eq!(sub_object_bytes(&three), b"<</A 1>>".to_vec());
        assert_eq!(three.bounds.start, 0);
        assert_eq!(three.bounds.end, 7);
        assert_eq!(three.value_type, ValueType::Dictionary);
        assert_eq!(three.stream_id, Some(7));
        assert_eq!(three.reference(), Some(Reference::new(3, 0)));

        let nine = stream.get_sub_object(9).unwrap().unwrap();
        assert_eq!(sub_object_bytes(&nine), b"<</B 2>>".to_vec());

        assert!(stream.get_sub_object(99).unwrap().is_none());
        assert_eq!(stream.object_ids().unwrap(), vec![3, 9]);
    }

    #[test]
    fn test_missing_header_entries() {
        let stream = container("/N 2", b"3 0 9 9\n<</A 1>> <</B 2>>");
        assert!(stream.get_sub_object(3).unwrap().is_none());
        let stream = container("/First 8", b"3 0 9 9\n<</A 1>> <</B 2>>");
        assert!(stream.get_sub_object(3).unwrap().is_none());
    }

    #[test]
    fn test_unsupported_kinds_are_not_found() {
        // a name and a reference are not among the packable kinds
        let stream = container("/N 3 /First 13", b"1 0 2 6 3 12 /Name 4 0 R 42");
        assert!(stream.get_sub_object(1).unwrap().is_none());
        assert!(stream.get_sub_object(2).unwrap().is_none());
        let number = stream.get_sub_object(3).unwrap().unwrap();
        assert_eq!(number.value_type, ValueType::Number);
        assert_eq!(sub_object_bytes(&number), b"42".to_vec());
    }

    #[test]
    fn test_unparseable_bodies_are_not_found() {
        let stream = container("/N 2 /First 10", b"3 0 4 7   </A 1> <41>");
        assert!(stream.get_sub_object(3).unwrap().is_none());
        let four = stream.get_sub_object(4).unwrap().unwrap();
        assert_eq!(four.value_type, ValueType::StringHex);
        assert_eq!(sub_object_bytes(&four), b"<41>".to_vec());
    }

    #[test]
    fn test_out_of_range_offsets_are_not_found() {
        let stream = container("/N 2 /First 27", b"3 99999999999999999999 5 0\n<</A 1>>");
        assert!(stream.get_sub_object(3).unwrap().is_none());
        assert_eq!(stream.object_ids().unwrap(), vec![5]);
        let five = stream.get_sub_object(5).unwrap().unwrap();
        assert_eq!(sub_object_bytes(&five), b"<</A 1>>".to_vec());

        let stream = container("/N 1 /First 99999999999999999999", b"3 0 <</A 1>>");
        assert!(stream.get_sub_object(3).unwrap().is_none());
        let stream = container("/N 1 /First -4", b"3 0 <</A 1>>");
        assert!(stream.get_sub_object(3).unwrap().is_none());
    }

    #[test]
    fn test_sub_object_parses_as_object() {
        let stream = container("/N 1 /First 4", b"5 0 [1 2 (x)]");
        let info = stream.get_sub_object(5).unwrap().unwrap();
        let object = PdfObject::parse(&info).unwrap();
        assert_eq!(object.reference(), Some(Reference::new(5, 0)));
        assert_eq!(object.core().stream_id(), Some(7));
        assert_eq!(object.to_bytes(None).unwrap(), b"[1 2 (x)]".to_vec());
    }

    #[test]
    fn test_serialization_splices_header_entries() {
        let stream = container("/N 1 /First 4 /Extends 2 0 R", b"5 0 <</K true>>");
        let body = stream.to_bytes(None).unwrap();
        assert!(body.starts_with(b"<</N 1 /First 4 /Extends 2 0 R /Type /ObjStm /Length "));

        let reparsed = {
            let bytes = write_indirect(Reference::new(7, 0), &body);
            let parser = get_data_parser(bytes, ParserStrategy::Sync);
            let (_, info) = ParserInfo::from_indirect(parser, 0, |r| Some(CryptInfo::plain(r))).unwrap();
            ObjectStream::parse(&info).unwrap()
        };
        assert_eq!(reparsed, stream);
        assert_eq!(reparsed.extends(), Some(Reference::new(2, 0)));
    }

    #[test]
    fn test_from_objects_round_trip() {
        let stream = ObjectStream::from_objects(&[(10, b"<</X 1>>".to_vec()), (11, b"(str)".to_vec())]).unwrap();
        let info = stream.get_sub_object(11).unwrap().unwrap();
        assert_eq!(sub_object_bytes(&info), b"(str)".to_vec());
        assert_eq!(info.stream_id, None);
    }
}
