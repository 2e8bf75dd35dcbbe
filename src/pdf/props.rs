//! Typed property readers shared by every object variant
//!
//! A variant declares its known dictionary keys with [`field_keys!`], walks
//! its dictionary with [`walk_dict`], and for each key hands the value
//! offset to the matching [`PropReader`] method. Each method reads one value
//! of the expected kind, stores it in the given slot and returns the offset
//! just past the value. A grammar mismatch is an error, which aborts
//! construction of the enclosing object.

use crate::crypto::CryptInfo;
use crate::error::{CosError, CosResult};
use crate::parser::{DataParser, ParserBounds, ParserResult, ValueType};
use crate::pdf::dict::Value;
use crate::pdf::string::PdfDate;
use crate::pdf::Reference;

/// Enum of the dictionary keys a variant stores in typed fields
pub trait FieldKey: Copy + Sized + 'static {
    fn from_name(name: &str) -> Option<Self>;
    fn name(self) -> &'static str;
}

/// Declare a [`FieldKey`] enum mapping variants to dictionary key names
macro_rules! field_keys {
    ($(#[$meta:meta])* $vis:vis enum $enum:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $vis enum $enum {
            $($variant),+
        }

        impl $crate::pdf::props::FieldKey for $enum {
            fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Self::$variant),)+
                    _ => None,
                }
            }

            fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name),+
                }
            }
        }
    };
}
pub(crate) use field_keys;

/// Walk the `/Key value` pairs of the dictionary at `bounds`
///
/// `visit` receives the key without its slash and the offset just after the
/// key, and returns the offset just after the value it consumed.
pub(crate) fn walk_dict<F>(parser: &dyn DataParser, bounds: &ParserBounds, mut visit: F) -> CosResult<()>
where
    F: FnMut(&str, usize) -> CosResult<usize>,
{
    let content = bounds
        .content_range()
        .ok_or_else(|| CosError::malformed(bounds.start, "dictionary without content bounds"))?;
    if content.is_empty() {
        return Ok(());
    }

    let limit = content.end - 1;
    let mut i = content.start;
    while let Some(name_at) = parser.skip_to_next_name_at(i, limit).wait()? {
        let name = parser
            .parse_name_at(name_at, false)
            .wait()?
            .ok_or_else(|| CosError::malformed(name_at, "expected dictionary key"))?;
        let next = visit(&name.value, name.next())?;
        if next <= name_at {
            return Err(CosError::malformed(name_at, "dictionary walk did not advance"));
        }
        i = next;
    }
    Ok(())
}

/// Reads typed values out of one parser, decrypting strings with `crypt`
#[derive(Clone, Copy)]
pub struct PropReader<'a> {
    parser: &'a dyn DataParser,
    crypt: Option<&'a CryptInfo>,
}

impl<'a> PropReader<'a> {
    pub fn new(parser: &'a dyn DataParser, crypt: Option<&'a CryptInfo>) -> Self {
        Self { parser, crypt }
    }

    pub fn parser(&self) -> &'a dyn DataParser {
        self.parser
    }

    pub fn crypt(&self) -> Option<&'a CryptInfo> {
        self.crypt
    }

    fn require<K: FieldKey, T>(key: K, index: usize, parsed: Option<ParserResult<T>>) -> CosResult<ParserResult<T>> {
        parsed.ok_or_else(|| CosError::invalid_property(key.name(), index))
    }

    fn decrypt(&self, bytes: Vec<u8>) -> CosResult<Vec<u8>> {
        match self.crypt {
            Some(crypt) => crypt.decrypt_string(&bytes),
            None => Ok(bytes),
        }
    }

    pub fn reference<K: FieldKey>(&self, key: K, index: usize, slot: &mut Option<Reference>) -> CosResult<usize> {
        let parsed = Self::require(key, index, self.parser.parse_ref_at(index).wait()?)?;
        let next = parsed.next();
        *slot = Some(parsed.value);
        Ok(next)
    }

    pub fn reference_array<K: FieldKey>(&self, key: K, index: usize, slot: &mut Vec<Reference>) -> CosResult<usize> {
        let parsed = Self::require(key, index, self.parser.parse_ref_array_at(index).wait()?)?;
        let next = parsed.next();
        *slot = parsed.value;
        Ok(next)
    }

    pub fn boolean<K: FieldKey>(&self, key: K, index: usize, slot: &mut Option<bool>) -> CosResult<usize> {
        let parsed = Self::require(key, index, self.parser.parse_bool_at(index).wait()?)?;
        let next = parsed.next();
        *slot = Some(parsed.value);
        Ok(next)
    }

    pub fn name<K: FieldKey>(&self, key: K, index: usize, slot: &mut Option<String>) -> CosResult<usize> {
        let parsed = Self::require(key, index, self.parser.parse_name_at(index, false).wait()?)?;
        let next = parsed.next();
        *slot = Some(parsed.value);
        Ok(next)
    }

    /// Array of names; a single bare name is accepted as a one-element array
    pub fn name_array<K: FieldKey>(&self, key: K, index: usize, slot: &mut Vec<String>) -> CosResult<usize> {
        if let Some(single) = self.parser.parse_name_at(index, false).wait()? {
            let next = single.next();
            *slot = vec![single.value];
            return Ok(next);
        }
        let parsed = Self::require(key, index, self.parser.parse_name_array_at(index, false).wait()?)?;
        let next = parsed.next();
        *slot = parsed.value;
        Ok(next)
    }

    pub fn number<K: FieldKey>(&self, key: K, index: usize, slot: &mut Option<f64>) -> CosResult<usize> {
        let parsed = Self::require(key, index, self.parser.parse_number_at(index, true, true).wait()?)?;
        let next = parsed.next();
        *slot = Some(parsed.value);
        Ok(next)
    }

    pub fn number_array<K: FieldKey>(&self, key: K, index: usize, slot: &mut Vec<f64>) -> CosResult<usize> {
        let parsed = Self::require(key, index, self.parser.parse_number_array_at(index, true, true).wait()?)?;
        let next = parsed.next();
        *slot = parsed.value;
        Ok(next)
    }

    pub fn literal<K: FieldKey>(&self, key: K, index: usize, slot: &mut Option<Vec<u8>>) -> CosResult<usize> {
        let parsed = Self::require(key, index, self.parser.parse_literal_at(index).wait()?)?;
        *slot = Some(self.decrypt(parsed.value)?);
        Ok(parsed.end + 1)
    }

    pub fn hex<K: FieldKey>(&self, key: K, index: usize, slot: &mut Option<Vec<u8>>) -> CosResult<usize> {
        let parsed = Self::require(key, index, self.parser.parse_hex_at(index).wait()?)?;
        *slot = Some(self.decrypt(parsed.value)?);
        Ok(parsed.end + 1)
    }

    /// Literal or hex string, whichever is present
    pub fn string<K: FieldKey>(&self, key: K, index: usize, slot: &mut Option<Vec<u8>>) -> CosResult<usize> {
        match self.parser.get_value_type_at(index).wait()? {
            Some(ValueType::StringHex) => self.hex(key, index, slot),
            _ => self.literal(key, index, slot),
        }
    }

    /// Date string; content that is not a valid date leaves the slot empty
    pub fn date<K: FieldKey>(&self, key: K, index: usize, slot: &mut Option<PdfDate>) -> CosResult<usize> {
        let mut raw = None;
        let next = self.string(key, index, &mut raw)?;
        *slot = raw.as_deref().and_then(PdfDate::parse);
        Ok(next)
    }

    /// Any value, for keys without a typed field
    pub fn value(&self, name: &str, index: usize) -> CosResult<ParserResult<Value>> {
        Value::parse_at(self.parser, index, self.crypt)?
            .ok_or_else(|| CosError::malformed(index, format!("missing value for /{}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SyncDataParser;
    use test_log::test;

    field_keys! {
        enum TestKey {
            Count => "Count",
            Kids => "Kids",
            Title => "Title",
            Flag => "Flag",
        }
    }

    #[test]
    fn test_field_key_registry() {
        assert_eq!(TestKey::from_name("Kids"), Some(TestKey::Kids));
        assert_eq!(TestKey::from_name("Parent"), None);
        assert_eq!(TestKey::Title.name(), "Title");
    }

    #[test]
    fn test_walk_and_read_typed_values() {
        let parser = SyncDataParser::new(b"<< /Count 3 /Kids [1 0 R 2 0 R] /Other (x) /Title <414243> /Flag true >>".to_vec());
        let bounds = parser.get_dict_bounds_at(0).wait().unwrap().unwrap();
        let reader = PropReader::new(&parser, None);

        let mut count = None;
        let mut kids = Vec::new();
        let mut title = None;
        let mut flag = None;
        let mut other = Vec::new();
        walk_dict(&parser, &bounds, |name, i| match TestKey::from_name(name) {
            Some(TestKey::Count) => reader.number(TestKey::Count, i, &mut count),
            Some(TestKey::Kids) => reader.reference_array(TestKey::Kids, i, &mut kids),
            Some(TestKey::Title) => reader.string(TestKey::Title, i, &mut title),
            Some(TestKey::Flag) => reader.boolean(TestKey::Flag, i, &mut flag),
            None => {
                let value = reader.value(name, i)?;
                other.push(name.to_string());
                Ok(value.next())
            }
        })
        .unwrap();

        assert_eq!(count, Some(3.0));
        assert_eq!(kids, vec![Reference::new(1, 0), Reference::new(2, 0)]);
        assert_eq!(title, Some(b"ABC".to_vec()));
        assert_eq!(flag, Some(true));
        assert_eq!(other, vec!["Other".to_string()]);
    }

    #[test]
    fn test_grammar_mismatch_names_the_field() {
        let parser = SyncDataParser::new(b"<< /Count /Nope >>".to_vec());
        let bounds = parser.get_dict_bounds_at(0).wait().unwrap().unwrap();
        let reader = PropReader::new(&parser, None);
        let mut count = None;
        let err = walk_dict(&parser, &bounds, |_, i| reader.number(TestKey::Count, i, &mut count)).unwrap_err();
        assert!(matches!(err, CosError::InvalidProperty { property: "Count", .. }));
        assert_eq!(count, None);
    }

    #[test]
    fn test_date_and_single_name_array() {
        let parser = SyncDataParser::new(b"(D:20240102030405Z) /FlateDecode".to_vec());
        let reader = PropReader::new(&parser, None);
        let mut date = None;
        let next = reader.date(TestKey::Title, 0, &mut date).unwrap();
        assert_eq!(next, 19);
        assert_eq!(date.map(|d| d.year), Some(2024));

        let mut names = Vec::new();
        reader.name_array(TestKey::Kids, next, &mut names).unwrap();
        assert_eq!(names, vec!["FlateDecode".to_string()]);
    }
}
