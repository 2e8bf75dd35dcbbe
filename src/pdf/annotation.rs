//! Annotation dictionaries

use crate::crypto::CryptInfo;
use crate::error::CosResult;
use crate::pdf::dict::{DictWriter, Dictionary, Value};
use crate::pdf::object::{dict_bounds, ObjectCore, ParserInfo, Serializable};
use crate::pdf::props::{field_keys, walk_dict, FieldKey, PropReader};
use crate::pdf::string::{decode_text, encode_text, PdfDate};
use crate::pdf::Reference;

field_keys! {
    enum AnnotKey {
        Type => "Type",
        Subtype => "Subtype",
        Rect => "Rect",
        Contents => "Contents",
        Author => "T",
        Modified => "M",
        Created => "CreationDate",
        Name => "NM",
        Page => "P",
        Color => "C",
        Flags => "F",
        InkList => "InkList",
    }
}

/// An `/Type /Annot` dictionary with typed common entries
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationDict {
    core: ObjectCore,
    subtype: Option<String>,
    rect: Vec<f64>,
    contents: Option<Vec<u8>>,
    author: Option<Vec<u8>>,
    modified: Option<PdfDate>,
    created: Option<PdfDate>,
    name: Option<Vec<u8>>,
    page: Option<Reference>,
    color: Vec<f64>,
    flags: Option<f64>,
    ink_list: Vec<Vec<f64>>,
    extra: Dictionary,
}

impl AnnotationDict {
    /// New runtime annotation of `subtype` covering `rect`
    pub fn new(subtype: &str, rect: [f64; 4]) -> Self {
        Self {
            core: ObjectCore::added(),
            subtype: Some(subtype.to_string()),
            rect: rect.to_vec(),
            contents: None,
            author: None,
            modified: None,
            created: None,
            name: None,
            page: None,
            color: Vec::new(),
            flags: None,
            ink_list: Vec::new(),
            extra: Dictionary::new(),
        }
    }

    pub fn parse(info: &ParserInfo) -> CosResult<Self> {
        let parser = info.parser.as_ref();
        let reader = PropReader::new(parser, info.crypt.as_ref());
        let bounds = dict_bounds(info)?;

        let mut annot = Self::new("", [0.0; 4]);
        annot.core = ObjectCore::parsed(info);
        annot.subtype = None;
        annot.rect.clear();

        let mut ignored_type = None;
        let mut flags = None;
        walk_dict(parser, &bounds, |key, i| match AnnotKey::from_name(key) {
            Some(k @ AnnotKey::Type) => reader.name(k, i, &mut ignored_type),
            Some(k @ AnnotKey::Subtype) => reader.name(k, i, &mut annot.subtype),
            Some(k @ AnnotKey::Rect) => reader.number_array(k, i, &mut annot.rect),
            Some(k @ AnnotKey::Contents) => reader.string(k, i, &mut annot.contents),
            Some(k @ AnnotKey::Author) => reader.string(k, i, &mut annot.author),
            Some(k @ AnnotKey::Modified) => reader.date(k, i, &mut annot.modified),
            Some(k @ AnnotKey::Created) => reader.date(k, i, &mut annot.created),
            Some(k @ AnnotKey::Name) => reader.string(k, i, &mut annot.name),
            Some(k @ AnnotKey::Page) => reader.reference(k, i, &mut annot.page),
            Some(k @ AnnotKey::Color) => reader.number_array(k, i, &mut annot.color),
            Some(k @ AnnotKey::Flags) => reader.number(k, i, &mut flags),
            Some(AnnotKey::InkList) => {
                let value = reader.value(key, i)?;
                annot.ink_list = value
                    .value
                    .as_array()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(Value::as_array)
                    .map(|path| path.iter().filter_map(Value::as_f64).collect())
                    .collect();
                Ok(value.next())
            }
            None => {
                let value = reader.value(key, i)?;
                let next = value.next();
                annot.extra.set(key, value.value);
                Ok(next)
            }
        })?;
        annot.flags = flags;
        Ok(annot)
    }

    pub fn core(&self) -> &ObjectCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut ObjectCore {
        &mut self.core
    }

    pub fn subtype(&self) -> Option<&str> {
        self.subtype.as_deref()
    }

    pub fn rect(&self) -> &[f64] {
        &self.rect
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.as_deref().map(decode_text)
    }

    pub fn author(&self) -> Option<String> {
        self.author.as_deref().map(decode_text)
    }

    pub fn modified(&self) -> Option<&PdfDate> {
        self.modified.as_ref()
    }

    pub fn created(&self) -> Option<&PdfDate> {
        self.created.as_ref()
    }

    /// `/NM` unique name
    pub fn name(&self) -> Option<String> {
        self.name.as_deref().map(decode_text)
    }

    pub fn page(&self) -> Option<Reference> {
        self.page
    }

    pub fn color(&self) -> &[f64] {
        &self.color
    }

    pub fn flags(&self) -> Option<u32> {
        self.flags.map(|f| f as u32)
    }

    pub fn ink_list(&self) -> &[Vec<f64>] {
        &self.ink_list
    }

    pub fn extra(&self) -> &Dictionary {
        &self.extra
    }

    pub fn set_subtype(&mut self, subtype: &str) {
        self.core.touch();
        self.subtype = Some(subtype.to_string());
    }

    pub fn set_rect(&mut self, rect: [f64; 4]) {
        self.core.touch();
        self.rect = rect.to_vec();
    }

    pub fn set_contents(&mut self, contents: Option<&str>) {
        self.core.touch();
        self.contents = contents.map(encode_text);
    }

    pub fn set_author(&mut self, author: Option<&str>) {
        self.core.touch();
        self.author = author.map(encode_text);
    }

    pub fn set_modified(&mut self, date: Option<PdfDate>) {
        self.core.touch();
        self.modified = date;
    }

    pub fn set_created(&mut self, date: Option<PdfDate>) {
        self.core.touch();
        self.created = date;
    }

    pub fn set_name(&mut self, name: Option<&str>) {
        self.core.touch();
        self.name = name.map(encode_text);
    }

    pub fn set_page(&mut self, page: Option<Reference>) {
        self.core.touch();
        self.page = page;
    }

    pub fn set_color(&mut self, color: Vec<f64>) {
        self.core.touch();
        self.color = color;
    }

    pub fn set_flags(&mut self, flags: Option<u32>) {
        self.core.touch();
        self.flags = flags.map(f64::from);
    }

    pub fn set_ink_list(&mut self, ink_list: Vec<Vec<f64>>) {
        self.core.touch();
        self.ink_list = ink_list;
    }

    pub fn set_entry(&mut self, key: impl Into<String>, value: Value) {
        self.core.touch();
        self.extra.set(key, value);
    }
}

impl Serializable for AnnotationDict {
    fn to_bytes(&self, crypt: Option<&CryptInfo>) -> CosResult<Vec<u8>> {
        let mut writer = DictWriter::new(crypt);
        writer.name("Type", "Annot").opt_name("Subtype", self.subtype.as_deref());
        if !self.rect.is_empty() {
            writer.number_array("Rect", &self.rect);
        }
        if let Some(contents) = &self.contents {
            writer.literal("Contents", contents)?;
        }
        if let Some(author) = &self.author {
            writer.literal("T", author)?;
        }
        if let Some(date) = &self.modified {
            writer.date("M", date)?;
        }
        if let Some(date) = &self.created {
            writer.date("CreationDate", date)?;
        }
        if let Some(name) = &self.name {
            writer.literal("NM", name)?;
        }
        writer.opt_reference("P", self.page);
        if !self.color.is_empty() {
            writer.number_array("C", &self.color);
        }
        writer.opt_number("F", self.flags);
        if !self.ink_list.is_empty() {
            let paths = self
                .ink_list
                .iter()
                .map(|path| Value::Array(path.iter().copied().map(Value::Number).collect()))
                .collect();
            writer.value("InkList", &Value::Array(paths))?;
        }
        writer.entries(&self.extra)?;
        Ok(writer.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CryptMethod, DocumentCrypt};
    use crate::parser::{get_data_parser, ParserStrategy};
    use crate::pdf::object::write_indirect;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use test_log::test;

    fn parse_annot(data: &[u8], crypt: Option<CryptInfo>) -> AnnotationDict {
        let parser = get_data_parser(data.to_vec(), ParserStrategy::Sync);
        let (_, info) = ParserInfo::from_indirect(parser, 0, |_| crypt).unwrap();
        AnnotationDict::parse(&info).unwrap()
    }

    #[test]
    fn test_parse_typed_fields() {
        let annot = parse_annot(
            b"12 0 obj << /Type /Annot /Subtype /Ink /Rect [10 20 110 70] /T (alice) \
              /Contents <FEFF00480069> /M (D:20240301120000Z) /P 4 0 R /F 4 \
              /InkList [[1 2 3 4] [5 6]] /Border [0 0 1] >> endobj",
            None,
        );
        assert_eq!(annot.subtype(), Some("Ink"));
        assert_eq!(annot.rect(), &[10.0, 20.0, 110.0, 70.0]);
        assert_eq!(annot.author().as_deref(), Some("alice"));
        assert_eq!(annot.contents().as_deref(), Some("Hi"));
        assert_eq!(annot.modified().map(|d| d.month), Some(3));
        assert_eq!(annot.page(), Some(Reference::new(4, 0)));
        assert_eq!(annot.flags(), Some(4));
        assert_eq!(annot.ink_list(), &[vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0]]);
        assert!(annot.extra().contains_key("Border"));
        assert!(!annot.core().is_edited());
    }

    #[test]
    fn test_setters_mark_edited() {
        let mut annot = parse_annot(b"1 0 obj << /Type /Annot /Subtype /Text /Rect [0 0 1 1] >> endobj", None);
        annot.set_contents(Some("note"));
        assert!(annot.core().is_edited());
        annot.set_color(vec![1.0, 0.0, 0.0]);
        assert!(annot.core().is_edited());
    }

    #[test]
    fn test_encrypted_round_trip() {
        let reference = Reference::new(12, 0);
        let crypt = CryptInfo::new(
            reference,
            Arc::new(DocumentCrypt::new(vec![1u8; 5], CryptMethod::Rc4, CryptMethod::Rc4)),
        );
        let mut annot = AnnotationDict::new("Square", [1.0, 2.0, 3.0, 4.0]);
        annot.set_author(Some("Zoë"));
        annot.set_contents(Some("boxed"));
        annot.set_created(PdfDate::parse(b"D:20240102030405+01'00'"));

        let body = annot.to_bytes(Some(&crypt)).unwrap();
        assert!(!body.windows(5).any(|w| w == b"boxed"));

        let reparsed = parse_annot(&write_indirect(reference, &body), Some(crypt));
        assert_eq!(reparsed.author().as_deref(), Some("Zoë"));
        assert_eq!(reparsed.contents().as_deref(), Some("boxed"));
        assert_eq!(reparsed.created(), annot.created());
        assert_eq!(reparsed.rect(), annot.rect());
    }
}
