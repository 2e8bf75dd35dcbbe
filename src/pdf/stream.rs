//! Stream objects with lazily decrypted and decoded payloads

use std::fmt;
use std::ops::Range;
use std::sync::{Arc, OnceLock};

use log::trace;

use crate::crypto::CryptInfo;
use crate::error::{CosError, CosResult};
use crate::pdf::dict::{frame_stream, DictWriter, Dictionary, Value};
use crate::pdf::filter::{decode_chain, Filter};
use crate::pdf::object::{dict_bounds, ObjectCore, ParserInfo, Serializable};
use crate::pdf::props::{field_keys, walk_dict, FieldKey, PropReader};

field_keys! {
    enum StreamKey {
        Type => "Type",
        Length => "Length",
        Filter => "Filter",
        DecodeParms => "DecodeParms",
    }
}

/// Handler for dictionary keys a stream variant stores itself; returns
/// `Some(next)` when it consumed the value
pub(crate) type ExtraKeyHandler<'h> = dyn FnMut(&str, usize, &PropReader<'_>) -> CosResult<Option<usize>> + 'h;

/// A stream object
#[derive(Clone)]
pub struct PdfStream {
    core: ObjectCore,
    stream_type: Option<String>,
    filters: Vec<String>,
    decode_parms: Vec<Option<Dictionary>>,
    extra: Dictionary,
    /// Encrypted payload in the source buffer, decrypted on first access
    source: Option<(Arc<[u8]>, Range<usize>, Option<CryptInfo>)>,
    /// Decrypted payload, still filter-encoded
    encoded: OnceLock<Vec<u8>>,
    decoded: OnceLock<Vec<u8>>,
}

impl PdfStream {
    /// Runtime stream over already encoded `data`
    pub fn new(dict: Dictionary, filters: Vec<String>, data: Vec<u8>) -> Self {
        let stream_type = dict.get_name("Type").map(str::to_string);
        let mut extra = dict;
        extra.remove("Type");
        Self {
            core: ObjectCore::added(),
            stream_type,
            filters,
            decode_parms: Vec::new(),
            extra,
            source: None,
            encoded: OnceLock::from(data),
            decoded: OnceLock::new(),
        }
    }

    pub fn parse(info: &ParserInfo) -> CosResult<Self> {
        Self::parse_with(info, &mut no_extra_keys)
    }

    pub(crate) fn parse_with(info: &ParserInfo, handler: &mut ExtraKeyHandler<'_>) -> CosResult<Self> {
        let parser = info.parser.as_ref();
        let reader = PropReader::new(parser, info.crypt.as_ref());
        let dict_bounds = dict_bounds(info)?;

        let mut stream_type = None;
        let mut length = None;
        let mut filters = Vec::new();
        let mut parms = None;
        let mut extra = Dictionary::new();

        walk_dict(parser, &dict_bounds, |name, i| match StreamKey::from_name(name) {
            Some(StreamKey::Type) => reader.name(StreamKey::Type, i, &mut stream_type),
            Some(StreamKey::Filter) => reader.name_array(StreamKey::Filter, i, &mut filters),
            Some(key @ (StreamKey::Length | StreamKey::DecodeParms)) => {
                let value = reader.value(key.name(), i)?;
                let next = value.next();
                if key == StreamKey::Length {
                    length = Some(value.value);
                } else {
                    parms = Some(value.value);
                }
                Ok(next)
            }
            None => {
                if let Some(next) = handler(name, i, &reader)? {
                    return Ok(next);
                }
                let value = reader.value(name, i)?;
                let next = value.next();
                extra.set(name, value.value);
                Ok(next)
            }
        })?;

        let payload = match info.value_type {
            crate::parser::ValueType::Stream => info
                .bounds
                .content_range()
                .ok_or_else(|| CosError::malformed(info.bounds.start, "stream without payload bounds"))?,
            _ => return Err(CosError::malformed(info.bounds.start, "expected stream")),
        };
        trace!(
            "Stream {:?}: {} payload bytes, declared length {:?}",
            info.reference(),
            payload.len(),
            length.as_ref().and_then(Value::as_i64)
        );

        Ok(Self {
            core: ObjectCore::parsed(info),
            stream_type,
            decode_parms: normalize_parms(parms, filters.len()),
            filters,
            extra,
            source: Some((Arc::clone(parser.buffer()), payload, info.crypt.clone())),
            encoded: OnceLock::new(),
            decoded: OnceLock::new(),
        })
    }

    pub fn core(&self) -> &ObjectCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut ObjectCore {
        &mut self.core
    }

    pub fn stream_type(&self) -> Option<&str> {
        self.stream_type.as_deref()
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    pub fn decode_parms(&self) -> &[Option<Dictionary>] {
        &self.decode_parms
    }

    /// Dictionary entries without a typed field
    pub fn extra(&self) -> &Dictionary {
        &self.extra
    }

    fn is_metadata(&self) -> bool {
        self.stream_type.as_deref() == Some("Metadata")
    }

    /// Decrypted payload, still filter-encoded
    pub fn stream_data(&self) -> CosResult<&[u8]> {
        if let Some(data) = self.encoded.get() {
            return Ok(data);
        }
        let data = match &self.source {
            Some((buffer, range, crypt)) => {
                let raw = buffer
                    .get(range.clone())
                    .ok_or_else(|| CosError::malformed(range.start, "stream payload out of bounds"))?;
                match crypt {
                    Some(crypt) => crypt.decrypt_stream(raw, self.is_metadata())?,
                    None => raw.to_vec(),
                }
            }
            None => Vec::new(),
        };
        Ok(self.encoded.get_or_init(|| data))
    }

    /// Payload with the filter chain undone
    pub fn decoded_data(&self) -> CosResult<&[u8]> {
        if let Some(data) = self.decoded.get() {
            return Ok(data);
        }
        let data = decode_chain(self.stream_data()?, &self.filters, &self.decode_parms)?;
        Ok(self.decoded.get_or_init(|| data))
    }

    pub fn set_stream_type(&mut self, stream_type: Option<String>) {
        self.core.touch();
        self.stream_type = stream_type;
    }

    pub fn set_entry(&mut self, key: impl Into<String>, value: Value) {
        self.core.touch();
        self.extra.set(key, value);
    }

    /// Replace the payload with `data`, Flate-compressed when `compress` is set
    pub fn set_decoded_data(&mut self, data: Vec<u8>, compress: bool) -> CosResult<()> {
        let (filters, encoded) = if compress {
            let filter = Filter::FlateDecode;
            (vec![filter.name().to_string()], filter.encode(&data)?)
        } else {
            (Vec::new(), data.clone())
        };
        self.core.touch();
        self.filters = filters;
        self.decode_parms = Vec::new();
        self.source = None;
        self.encoded = OnceLock::from(encoded);
        self.decoded = OnceLock::from(data);
        Ok(())
    }

    /// Dictionary bytes for a payload of `length` encrypted bytes
    pub(crate) fn dict_bytes(&self, crypt: Option<&CryptInfo>, length: usize) -> CosResult<Vec<u8>> {
        let mut writer = DictWriter::new(crypt);
        writer.opt_name("Type", self.stream_type.as_deref());
        writer.entries(&self.extra)?;
        match self.filters.as_slice() {
            [] => {}
            [single] => {
                writer.name("Filter", single);
            }
            many => {
                writer.name_array("Filter", many);
            }
        }
        if self.decode_parms.iter().any(Option::is_some) {
            let parms: Vec<Value> = self
                .decode_parms
                .iter()
                .map(|p| p.clone().map_or(Value::Null, Value::Dictionary))
                .collect();
            match parms.as_slice() {
                [single] => writer.value("DecodeParms", single)?,
                _ => writer.value("DecodeParms", &Value::Array(parms.clone()))?,
            };
        }
        writer.number("Length", length as f64);
        Ok(writer.finish())
    }

    fn encrypted_payload(&self, crypt: Option<&CryptInfo>) -> CosResult<Vec<u8>> {
        let data = self.stream_data()?;
        match crypt {
            Some(crypt) => crypt.encrypt_stream(data, self.is_metadata()),
            None => Ok(data.to_vec()),
        }
    }
}

fn no_extra_keys(_: &str, _: usize, _: &PropReader<'_>) -> CosResult<Option<usize>> {
    Ok(None)
}

fn normalize_parms(parms: Option<Value>, filters: usize) -> Vec<Option<Dictionary>> {
    match parms {
        Some(Value::Dictionary(dict)) => vec![Some(dict)],
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::Dictionary(dict) => Some(dict),
                _ => None,
            })
            .collect(),
        _ => vec![None; filters.min(1)],
    }
}

impl Serializable for PdfStream {
    fn to_bytes(&self, crypt: Option<&CryptInfo>) -> CosResult<Vec<u8>> {
        let payload = self.encrypted_payload(crypt)?;
        Ok(frame_stream(self.dict_bytes(crypt, payload.len())?, &payload))
    }
}

impl PartialEq for PdfStream {
    fn eq(&self, other: &Self) -> bool {
        self.core == other.core
            && self.stream_type == other.stream_type
            && self.filters == other.filters
            && self.decode_parms.iter().flatten().eq(other.decode_parms.iter().flatten())
            && self.extra == other.extra
            && match (self.stream_data(), other.stream_data()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            }
    }
}

impl fmt::Debug for PdfStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdfStream")
            .field("core", &self.core)
            .field("stream_type", &self.stream_type)
            .field("filters", &self.filters)
            .field("extra", &self.extra)
            .field("loaded", &self.encoded.get().map(Vec::len))
            .finish()
    }
}
