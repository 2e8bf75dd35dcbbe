//! Generic COS values and dictionaries
//!
//! Variants with typed fields keep unrecognised entries as [`Value`]s so
//! that re-serialization preserves them. [`DictWriter`] is the framing
//! helper every variant serializes through.

use indexmap::IndexMap;

use crate::crypto::CryptInfo;
use crate::error::{CosError, CosResult};
use crate::parser::{DataParser, ParserBounds, ParserResult, ValueType};
use crate::pdf::props::walk_dict;
use crate::pdf::string::{encode_hex, encode_text, escape_literal, PdfDate};
use crate::pdf::Reference;

/// Any COS value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Number(f64),
    Name(String),
    String(Vec<u8>),
    HexString(Vec<u8>),
    Array(Vec<Value>),
    Dictionary(Dictionary),
    Reference(Reference),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64().map(|n| n as i64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Value::Name(name) => Some(name),
            _ => None,
        }
    }

    /// Bytes of a literal or hex string
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(bytes) | Value::HexString(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            Value::Dictionary(dict) => Some(dict),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<Reference> {
        match self {
            Value::Reference(r) => Some(*r),
            _ => None,
        }
    }

    /// Parse whatever value starts at `offset`; strings are decrypted with `crypt`
    pub fn parse_at(
        parser: &dyn DataParser,
        offset: usize,
        crypt: Option<&CryptInfo>,
    ) -> CosResult<Option<ParserResult<Value>>> {
        let Some(kind) = parser.get_value_type_at(offset).wait()? else {
            return Ok(None);
        };

        let parsed = match kind {
            ValueType::Dictionary | ValueType::Stream => {
                let Some(bounds) = parser.get_dict_bounds_at(offset).wait()? else {
                    return Ok(None);
                };
                let dict = Dictionary::parse_bounds(parser, &bounds, crypt)?;
                ParserResult::new(Value::Dictionary(dict), bounds.start, bounds.end)
            }
            ValueType::Array => {
                let Some(bounds) = parser.get_array_bounds_at(offset).wait()? else {
                    return Ok(None);
                };
                let mut items = Vec::new();
                if let Some(content) = bounds.content_range() {
                    let mut i = content.start;
                    while i < content.end {
                        let Some(item) = Value::parse_at(parser, i, crypt)? else {
                            break;
                        };
                        if item.end >= bounds.end {
                            break;
                        }
                        i = item.next();
                        items.push(item.value);
                    }
                }
                ParserResult::new(Value::Array(items), bounds.start, bounds.end)
            }
            ValueType::StringLiteral => match parser.parse_literal_at(offset).wait()? {
                Some(r) => ParserResult::new(Value::String(decrypt(crypt, r.value)?), r.start, r.end),
                None => return Ok(None),
            },
            ValueType::StringHex => match parser.parse_hex_at(offset).wait()? {
                Some(r) => ParserResult::new(Value::HexString(decrypt(crypt, r.value)?), r.start, r.end),
                None => return Ok(None),
            },
            ValueType::Reference => match parser.parse_ref_at(offset).wait()? {
                Some(r) => ParserResult::new(Value::Reference(r.value), r.start, r.end),
                None => return Ok(None),
            },
            ValueType::Number => match parser.parse_number_at(offset, true, true).wait()? {
                Some(r) => ParserResult::new(Value::Number(r.value), r.start, r.end),
                None => return Ok(None),
            },
            ValueType::Name => match parser.parse_name_at(offset, false).wait()? {
                Some(r) => ParserResult::new(Value::Name(r.value), r.start, r.end),
                None => return Ok(None),
            },
            ValueType::Boolean => match parser.parse_bool_at(offset).wait()? {
                Some(r) => ParserResult::new(Value::Boolean(r.value), r.start, r.end),
                None => return Ok(None),
            },
            ValueType::Null => match parser.get_value_bounds_at(offset).wait()? {
                Some(b) => ParserResult::new(Value::Null, b.start, b.end),
                None => return Ok(None),
            },
        };
        Ok(Some(parsed))
    }

    /// Append the serialized value; strings are encrypted with `crypt`
    pub fn write_to(&self, out: &mut Vec<u8>, crypt: Option<&CryptInfo>) -> CosResult<()> {
        match self {
            Value::Null => out.extend_from_slice(b"null"),
            Value::Boolean(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
            Value::Number(n) => out.extend_from_slice(format_number(*n).as_bytes()),
            Value::Name(name) => write_name(out, name),
            Value::String(bytes) => out.extend_from_slice(&escape_literal(&encrypt(crypt, bytes)?)),
            Value::HexString(bytes) => out.extend_from_slice(&encode_hex(&encrypt(crypt, bytes)?)),
            Value::Array(items) => {
                out.push(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(b' ');
                    }
                    item.write_to(out, crypt)?;
                }
                out.push(b']');
            }
            Value::Dictionary(dict) => dict.write_to(out, crypt)?,
            Value::Reference(r) => out.extend_from_slice(&r.to_bytes()),
        }
        Ok(())
    }

    pub fn to_bytes(&self, crypt: Option<&CryptInfo>) -> CosResult<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out, crypt)?;
        Ok(out)
    }
}

fn decrypt(crypt: Option<&CryptInfo>, bytes: Vec<u8>) -> CosResult<Vec<u8>> {
    match crypt {
        Some(crypt) => crypt.decrypt_string(&bytes),
        None => Ok(bytes),
    }
}

fn encrypt(crypt: Option<&CryptInfo>, bytes: &[u8]) -> CosResult<Vec<u8>> {
    match crypt {
        Some(crypt) => crypt.encrypt_string(bytes),
        None => Ok(bytes.to_vec()),
    }
}

/// Integers print without a fraction; reals keep at most six decimals
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        return format!("{}", n as i64);
    }
    let text = format!("{:.6}", n);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

/// Write `/name`, escaping bytes that cannot appear bare as `#xx`
pub fn write_name(out: &mut Vec<u8>, name: &str) {
    out.push(b'/');
    for &b in name.as_bytes() {
        let bare = (0x21..=0x7e).contains(&b)
            && !matches!(b, b'#' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%');
        if bare {
            out.push(b);
        } else {
            out.extend_from_slice(format!("#{:02X}", b).as_bytes());
        }
    }
}

/// Insertion-ordered COS dictionary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    entries: IndexMap<String, Value>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the dictionary at `offset`
    pub fn parse_at(
        parser: &dyn DataParser,
        offset: usize,
        crypt: Option<&CryptInfo>,
    ) -> CosResult<Option<ParserResult<Dictionary>>> {
        let Some(bounds) = parser.get_dict_bounds_at(offset).wait()? else {
            return Ok(None);
        };
        let dict = Self::parse_bounds(parser, &bounds, crypt)?;
        Ok(Some(ParserResult::new(dict, bounds.start, bounds.end)))
    }

    /// Parse the entries of an already bounded dictionary
    pub fn parse_bounds(parser: &dyn DataParser, bounds: &ParserBounds, crypt: Option<&CryptInfo>) -> CosResult<Self> {
        let mut dict = Self::new();
        walk_dict(parser, bounds, |name, i| {
            let value = Value::parse_at(parser, i, crypt)?
                .ok_or_else(|| CosError::malformed(i, format!("missing value for /{}", name)))?;
            dict.set(name, value.value);
            Ok(value.end + 1)
        })?;
        Ok(dict)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.get_mut(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn get_integer(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_name(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_name)
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        self.get(key).and_then(Value::as_bytes)
    }

    pub fn get_reference(&self, key: &str) -> Option<Reference> {
        self.get(key).and_then(Value::as_reference)
    }

    pub fn get_dict(&self, key: &str) -> Option<&Dictionary> {
        self.get(key).and_then(Value::as_dict)
    }

    pub fn get_array(&self, key: &str) -> Option<&[Value]> {
        self.get(key).and_then(Value::as_array)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write_to(&self, out: &mut Vec<u8>, crypt: Option<&CryptInfo>) -> CosResult<()> {
        let mut writer = DictWriter::new(crypt);
        writer.entries(self)?;
        out.extend_from_slice(&writer.finish());
        Ok(())
    }

    pub fn to_bytes(&self, crypt: Option<&CryptInfo>) -> CosResult<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out, crypt)?;
        Ok(out)
    }
}

impl FromIterator<(String, Value)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Builds `<< /Key value ... >>` with strings encrypted for the target object
#[derive(Debug)]
pub struct DictWriter<'a> {
    buf: Vec<u8>,
    crypt: Option<&'a CryptInfo>,
}

impl<'a> DictWriter<'a> {
    pub fn new(crypt: Option<&'a CryptInfo>) -> Self {
        Self { buf: Vec::new(), crypt }
    }

    fn key(&mut self, key: &str) {
        if !self.buf.is_empty() {
            self.buf.push(b' ');
        }
        write_name(&mut self.buf, key);
        self.buf.push(b' ');
    }

    pub fn name(&mut self, key: &str, value: &str) -> &mut Self {
        self.key(key);
        write_name(&mut self.buf, value);
        self
    }

    pub fn opt_name(&mut self, key: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value {
            self.name(key, value);
        }
        self
    }

    pub fn number(&mut self, key: &str, value: f64) -> &mut Self {
        self.key(key);
        self.buf.extend_from_slice(format_number(value).as_bytes());
        self
    }

    pub fn opt_number(&mut self, key: &str, value: Option<f64>) -> &mut Self {
        if let Some(value) = value {
            self.number(key, value);
        }
        self
    }

    pub fn boolean(&mut self, key: &str, value: bool) -> &mut Self {
        self.key(key);
        self.buf.extend_from_slice(if value { b"true" } else { b"false" });
        self
    }

    pub fn reference(&mut self, key: &str, value: Reference) -> &mut Self {
        self.key(key);
        self.buf.extend_from_slice(&value.to_bytes());
        self
    }

    pub fn opt_reference(&mut self, key: &str, value: Option<Reference>) -> &mut Self {
        if let Some(value) = value {
            self.reference(key, value);
        }
        self
    }

    pub fn reference_array(&mut self, key: &str, values: &[Reference]) -> &mut Self {
        self.key(key);
        self.buf.push(b'[');
        for (i, r) in values.iter().enumerate() {
            if i > 0 {
                self.buf.push(b' ');
            }
            self.buf.extend_from_slice(&r.to_bytes());
        }
        self.buf.push(b']');
        self
    }

    pub fn name_array(&mut self, key: &str, values: &[String]) -> &mut Self {
        self.key(key);
        self.buf.push(b'[');
        for (i, name) in values.iter().enumerate() {
            if i > 0 {
                self.buf.push(b' ');
            }
            write_name(&mut self.buf, name);
        }
        self.buf.push(b']');
        self
    }

    pub fn number_array(&mut self, key: &str, values: &[f64]) -> &mut Self {
        self.key(key);
        self.buf.push(b'[');
        let joined = values.iter().map(|n| format_number(*n)).collect::<Vec<_>>().join(" ");
        self.buf.extend_from_slice(joined.as_bytes());
        self.buf.push(b']');
        self
    }

    /// Literal string, encrypted when the target object is
    pub fn literal(&mut self, key: &str, value: &[u8]) -> CosResult<&mut Self> {
        let bytes = encrypt(self.crypt, value)?;
        self.key(key);
        self.buf.extend_from_slice(&escape_literal(&bytes));
        Ok(self)
    }

    pub fn hex(&mut self, key: &str, value: &[u8]) -> CosResult<&mut Self> {
        let bytes = encrypt(self.crypt, value)?;
        self.key(key);
        self.buf.extend_from_slice(&encode_hex(&bytes));
        Ok(self)
    }

    /// Text string: PDFDocEncoding-compatible ASCII or UTF-16BE
    pub fn text(&mut self, key: &str, value: &str) -> CosResult<&mut Self> {
        self.literal(key, &encode_text(value))
    }

    pub fn date(&mut self, key: &str, value: &PdfDate) -> CosResult<&mut Self> {
        self.literal(key, &value.to_pdf_bytes())
    }

    pub fn value(&mut self, key: &str, value: &Value) -> CosResult<&mut Self> {
        self.key(key);
        value.write_to(&mut self.buf, self.crypt)?;
        Ok(self)
    }

    pub fn entries(&mut self, dict: &Dictionary) -> CosResult<&mut Self> {
        for (key, value) in dict.iter() {
            self.value(key, value)?;
        }
        Ok(self)
    }

    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.buf.len() + 4);
        out.extend_from_slice(b"<<");
        out.extend_from_slice(&self.buf);
        out.extend_from_slice(b">>");
        out
    }
}

/// `dict stream payload endstream`
pub fn frame_stream(dict: Vec<u8>, payload: &[u8]) -> Vec<u8> {
    let mut out = dict;
    out.reserve(payload.len() + 20);
    out.extend_from_slice(b"\nstream\n");
    out.extend_from_slice(payload);
    out.extend_from_slice(b"\nendstream");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SyncDataParser;
    use pretty_assertions::assert_eq;
    use test_log::test;

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-12.0), "-12");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(1.0 / 3.0), "0.333333");
        assert_eq!(format_number(-0.0000001), "0");
    }

    #[test]
    fn test_name_escaping() {
        let mut out = Vec::new();
        write_name(&mut out, "A B#(x)");
        assert_eq!(out, b"/A#20B#23#28x#29".to_vec());
    }

    #[test]
    fn test_parse_nested_dictionary() {
        let data = b"<< /Type /Annot /Rect [0 0.5 10 -2] /P 4 0 R /Nested << /Flag true /Nil null >> /T (a\\)b) /H <4869> >>";
        let parser = SyncDataParser::new(data.to_vec());
        let parsed = Dictionary::parse_at(&parser, 0, None).unwrap().unwrap();
        assert_eq!(parsed.end, data.len() - 1);

        let dict = parsed.value;
        assert_eq!(dict.get_name("Type"), Some("Annot"));
        assert_eq!(dict.get_reference("P"), Some(Reference::new(4, 0)));
        let rect: Vec<f64> = dict.get_array("Rect").unwrap().iter().filter_map(Value::as_f64).collect();
        assert_eq!(rect, vec![0.0, 0.5, 10.0, -2.0]);
        let nested = dict.get_dict("Nested").unwrap();
        assert_eq!(nested.get_bool("Flag"), Some(true));
        assert_eq!(nested.get("Nil"), Some(&Value::Null));
        assert_eq!(dict.get_bytes("T"), Some(&b"a)b"[..]));
        assert_eq!(dict.get("H"), Some(&Value::HexString(b"Hi".to_vec())));
        assert_eq!(dict.keys().next().map(String::as_str), Some("Type"));
    }

    #[test]
    fn test_serialize_then_parse_preserves_entries() {
        let mut dict = Dictionary::new();
        dict.set("Type", Value::Name("Page".into()));
        dict.set("Kids", Value::Array(vec![Value::Reference(Reference::new(3, 0)), Value::Null]));
        dict.set("Title", Value::String(b"(x)".to_vec()));
        let bytes = dict.to_bytes(None).unwrap();
        assert_eq!(bytes, b"<</Type /Page /Kids [3 0 R null] /Title (\\(x\\))>>".to_vec());

        let parser = SyncDataParser::new(bytes);
        let parsed = Dictionary::parse_at(&parser, 0, None).unwrap().unwrap().value;
        assert_eq!(parsed, dict);
    }

    #[test]
    fn test_writer_and_stream_framing() {
        let mut writer = DictWriter::new(None);
        writer.name("Type", "XObject").number("Length", 3.0).reference_array("Kids", &[Reference::new(1, 0)]);
        writer.text("T", "Ok").unwrap();
        let framed = frame_stream(writer.finish(), b"abc");
        assert_eq!(
            framed,
            b"<</Type /XObject /Length 3 /Kids [1 0 R] /T (Ok)>>\nstream\nabc\nendstream".to_vec()
        );
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut dict: Dictionary = vec![
            ("A".to_string(), Value::Number(1.0)),
            ("B".to_string(), Value::Number(2.0)),
            ("C".to_string(), Value::Number(3.0)),
        ]
        .into_iter()
        .collect();
        dict.remove("B");
        assert_eq!(dict.keys().cloned().collect::<Vec<_>>(), vec!["A", "C"]);
    }
}
