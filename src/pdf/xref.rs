//! Cross-reference resolution
//!
//! Sections are collected by following `startxref` and the `/Prev` chain,
//! then applied oldest first so that later updates win. A classic section's
//! `/XRefStm` is applied after its `/Prev` chain and before its own rows.
//! If the chain is missing or damaged, the whole buffer is scanned for
//! object headers instead.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace, warn};

use crate::error::{CosError, CosResult};
use crate::parser::{DataParser, Tokenizer};
use crate::pdf::dict::{Dictionary, Value};
use crate::pdf::object::{ParserInfo, PdfObject};
use crate::pdf::stream::PdfStream;
use crate::pdf::Reference;

/// One row of a cross-reference section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    Free { next: u32, generation: u16 },
    Normal { offset: usize, generation: u16 },
    Compressed { stream_id: u32, index: u32 },
}

/// Where the bytes of an in-use object live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefLocation {
    Offset { offset: usize, generation: u16 },
    InStream { stream_id: u32, index: u32 },
}

/// Merged id to location map of a document
#[derive(Debug, Clone, Default)]
pub struct CrossRefTable {
    entries: BTreeMap<u32, XrefEntry>,
    trailer: Dictionary,
    startxref: Option<usize>,
    recovered: bool,
}

struct Section {
    entries: Vec<(u32, XrefEntry)>,
    trailer: Dictionary,
    is_stream: bool,
}

impl CrossRefTable {
    /// Build the table, falling back to a full scan when the chain is unusable
    pub fn build(parser: &Arc<dyn DataParser>) -> CosResult<Self> {
        match Self::from_chain(parser) {
            Ok(table) => {
                debug!(
                    "Cross-reference chain resolved {} entries from startxref {:?}",
                    table.entries.len(),
                    table.startxref
                );
                Ok(table)
            }
            Err(e) => {
                warn!("Cross-reference chain unusable ({}), rebuilding by scanning", e);
                Self::recover(parser)
            }
        }
    }

    fn from_chain(parser: &Arc<dyn DataParser>) -> CosResult<Self> {
        let startxref = find_startxref(parser.as_ref())?;
        let mut visited = HashSet::new();
        let mut layers = Vec::new();
        let mut trailers = Vec::new();
        Self::walk(parser, startxref, &mut visited, &mut layers, &mut trailers)?;

        let mut entries = BTreeMap::new();
        for layer in layers {
            entries.extend(layer);
        }

        // newest trailer wins; older ones only fill gaps
        let mut trailer = Dictionary::new();
        for older in &trailers {
            for (key, value) in older.iter() {
                if !trailer.contains_key(key) {
                    trailer.set(key.clone(), value.clone());
                }
            }
        }
        for key in ["Prev", "XRefStm", "W", "Index", "Type", "Length", "Filter", "DecodeParms"] {
            trailer.remove(key);
        }
        if trailer.get_reference("Root").is_none() {
            return Err(CosError::MissingDictionaryEntry("Root".to_string()));
        }

        Ok(Self {
            entries,
            trailer,
            startxref: Some(startxref),
            recovered: false,
        })
    }

    fn walk(
        parser: &Arc<dyn DataParser>,
        offset: usize,
        visited: &mut HashSet<usize>,
        layers: &mut Vec<Vec<(u32, XrefEntry)>>,
        trailers: &mut Vec<Dictionary>,
    ) -> CosResult<()> {
        if !visited.insert(offset) {
            warn!("Cross-reference chain loops back to offset {}", offset);
            return Ok(());
        }
        let section = read_section(parser, offset)?;
        trace!("Section at {}: {} rows", offset, section.entries.len());
        trailers.push(section.trailer.clone());

        if let Some(prev) = section.trailer.get_integer("Prev") {
            Self::walk(parser, usize::try_from(prev).map_err(|_| CosError::xref("negative /Prev"))?, visited, layers, trailers)?;
        }
        if !section.is_stream {
            if let Some(stm) = section.trailer.get_integer("XRefStm") {
                let stm = usize::try_from(stm).map_err(|_| CosError::xref("negative /XRefStm"))?;
                if visited.insert(stm) {
                    layers.push(read_section(parser, stm)?.entries);
                }
            }
        }
        layers.push(section.entries);
        Ok(())
    }

    /// Rebuild from `obj` headers found anywhere in the buffer
    pub fn recover(parser: &Arc<dyn DataParser>) -> CosResult<Self> {
        let data = Arc::clone(parser.buffer());
        let tokenizer = Tokenizer::new(&data);
        let mut entries = BTreeMap::new();
        let mut objects = Vec::new();

        let mut from = 0;
        while let Some(keyword) = tokenizer.find_bytes_at(b"obj", from) {
            from = keyword + 3;
            let Some(start) = header_start(&data, keyword) else {
                continue;
            };
            match tokenizer.parse_indirect_header_at(start) {
                Some(header) if header.end == keyword + 2 => {
                    entries.insert(
                        header.value.id,
                        XrefEntry::Normal {
                            offset: header.start,
                            generation: header.value.generation,
                        },
                    );
                    objects.push((header.value, header.start));
                }
                _ => {}
            }
        }
        if entries.is_empty() {
            return Err(CosError::xref("no objects found while scanning"));
        }

        let mut xref_stream_trailer = None;
        let mut catalog = None;
        for &(reference, offset) in &objects {
            if entries.get(&reference.id) != Some(&XrefEntry::Normal { offset, generation: reference.generation }) {
                continue;
            }
            let object = match ParserInfo::from_indirect(Arc::clone(parser), offset, |_| None)
                .and_then(|(_, info)| PdfObject::parse(&info))
            {
                Ok(object) => object,
                Err(e) => {
                    warn!("Skipping undecodable object {} during scan: {}", reference, e);
                    continue;
                }
            };
            match &object {
                PdfObject::ObjectStream(container) => {
                    for (index, id) in container.object_ids().unwrap_or_default().into_iter().enumerate() {
                        entries.entry(id).or_insert(XrefEntry::Compressed {
                            stream_id: reference.id,
                            index: index as u32,
                        });
                    }
                }
                PdfObject::Stream(stream) if stream.stream_type() == Some("XRef") => {
                    xref_stream_trailer = Some(stream.extra().clone());
                }
                PdfObject::Dictionary(dict) if dict.dict().get_name("Type") == Some("Catalog") => {
                    catalog = Some(reference);
                }
                _ => {}
            }
        }

        let mut trailer = match last_classic_trailer(parser.as_ref())? {
            Some(trailer) => trailer,
            None => xref_stream_trailer.unwrap_or_default(),
        };
        for key in ["Prev", "XRefStm", "W", "Index", "Type", "Length", "Filter", "DecodeParms"] {
            trailer.remove(key);
        }
        if trailer.get_reference("Root").is_none() {
            let root = catalog.ok_or_else(|| CosError::MissingDictionaryEntry("Root".to_string()))?;
            warn!("No trailer found, using catalog {} as /Root", root);
            trailer.set("Root", Value::Reference(root));
        }

        let mut table = Self {
            entries,
            trailer,
            startxref: None,
            recovered: true,
        };
        let size = table.size();
        table.trailer.set("Size", Value::Number(f64::from(size)));
        warn!("Recovered {} objects by scanning", table.entries.len());
        Ok(table)
    }

    pub fn resolve(&self, id: u32) -> Option<XrefLocation> {
        match self.entries.get(&id)? {
            XrefEntry::Free { .. } => None,
            XrefEntry::Normal { offset, generation } => Some(XrefLocation::Offset {
                offset: *offset,
                generation: *generation,
            }),
            XrefEntry::Compressed { stream_id, index } => Some(XrefLocation::InStream {
                stream_id: *stream_id,
                index: *index,
            }),
        }
    }

    pub fn entry(&self, id: u32) -> Option<&XrefEntry> {
        self.entries.get(&id)
    }

    /// Ids of in-use objects in ascending order
    pub fn live_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries
            .iter()
            .filter(|(_, e)| !matches!(e, XrefEntry::Free { .. }))
            .map(|(id, _)| *id)
    }

    /// Reference of an in-use id, with generation 0 for packed objects
    pub fn reference_of(&self, id: u32) -> Option<Reference> {
        match self.resolve(id)? {
            XrefLocation::Offset { generation, .. } => Some(Reference::new(id, generation)),
            XrefLocation::InStream { .. } => Some(Reference::new(id, 0)),
        }
    }

    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// One past the highest id known from the trailer or the entries
    pub fn size(&self) -> u32 {
        let from_entries = self.entries.keys().next_back().map_or(0, |id| id + 1);
        let from_trailer = self
            .trailer
            .get_integer("Size")
            .and_then(|s| u32::try_from(s).ok())
            .unwrap_or(0);
        from_entries.max(from_trailer)
    }

    /// Offset of the newest section, used as `/Prev` by incremental updates
    pub fn startxref(&self) -> Option<usize> {
        self.startxref
    }

    pub fn is_recovered(&self) -> bool {
        self.recovered
    }
}

fn find_startxref(parser: &dyn DataParser) -> CosResult<usize> {
    if parser.is_empty() {
        return Err(CosError::xref("empty buffer"));
    }
    let keyword = parser
        .find_bytes_backward_at(b"startxref", parser.len() - 1)
        .wait()?
        .ok_or_else(|| CosError::xref("startxref not found"))?;
    let offset = parser
        .parse_number_at(keyword + b"startxref".len(), false, false)
        .wait()?
        .ok_or_else(|| CosError::xref("startxref without offset"))?;
    let offset = offset.value as usize;
    if offset >= parser.len() {
        return Err(CosError::xref(format!("startxref {} beyond end of file", offset)));
    }
    Ok(offset)
}

fn read_section(parser: &Arc<dyn DataParser>, offset: usize) -> CosResult<Section> {
    let data = Arc::clone(parser.buffer());
    let tokenizer = Tokenizer::new(&data);
    let at = tokenizer.skip_whitespace(offset);
    if tokenizer.keyword_at(at, b"xref") {
        read_classic_section(parser.as_ref(), &tokenizer, at + 4)
    } else {
        read_stream_section(parser, offset)
    }
}

fn read_classic_section(parser: &dyn DataParser, t: &Tokenizer<'_>, mut i: usize) -> CosResult<Section> {
    let mut entries = Vec::new();
    loop {
        i = t.skip_whitespace(i);
        if t.keyword_at(i, b"trailer") {
            let trailer = Dictionary::parse_at(parser, i + 7, None)?
                .ok_or_else(|| CosError::xref(format!("unreadable trailer at {}", i)))?;
            return Ok(Section {
                entries,
                trailer: trailer.value,
                is_stream: false,
            });
        }

        let first = t
            .parse_number_at(i, false, false)
            .ok_or_else(|| CosError::xref(format!("bad subsection header at {}", i)))?;
        let first_id = object_number(first.value)
            .ok_or_else(|| CosError::xref(format!("subsection start {} out of range", first.value)))?;
        let count = t
            .parse_number_at(first.next(), false, false)
            .ok_or_else(|| CosError::xref(format!("bad subsection count at {}", first.next())))?;
        i = count.next();

        for n in 0..count.value as u32 {
            let offset = t
                .parse_number_at(i, false, false)
                .ok_or_else(|| CosError::xref(format!("bad xref row at {}", i)))?;
            let generation = t
                .parse_number_at(offset.next(), false, false)
                .ok_or_else(|| CosError::xref(format!("bad xref generation at {}", offset.next())))?;
            let kind = t.skip_whitespace(generation.next());
            let id = subsection_id(first_id, n)?;
            let entry = match t.slice_char_codes_at(kind, kind).first() {
                Some(b'n') => XrefEntry::Normal {
                    offset: offset.value as usize,
                    generation: generation.value as u16,
                },
                Some(b'f') => XrefEntry::Free {
                    next: offset.value as u32,
                    generation: generation.value as u16,
                },
                _ => return Err(CosError::xref(format!("bad xref row type at {}", kind))),
            };
            entries.push((id, entry));
            i = kind + 1;
        }
    }
}

fn read_stream_section(parser: &Arc<dyn DataParser>, offset: usize) -> CosResult<Section> {
    let (_, info) = ParserInfo::from_indirect(Arc::clone(parser), offset, |_| None)?;
    let stream = PdfStream::parse(&info)?;
    if stream.stream_type() != Some("XRef") {
        return Err(CosError::xref(format!("object at {} is not a cross-reference stream", offset)));
    }
    let trailer = stream.extra().clone();

    let widths: Vec<usize> = trailer
        .get_array("W")
        .ok_or_else(|| CosError::MissingDictionaryEntry("W".to_string()))?
        .iter()
        .map(|w| w.as_i64().unwrap_or(0).max(0) as usize)
        .collect();
    if widths.len() < 3 || widths.iter().any(|&w| w > 8) {
        return Err(CosError::xref(format!("unsupported /W {:?}", widths)));
    }
    let size = trailer.get_integer("Size").unwrap_or(0).max(0);
    let index: Vec<i64> = match trailer.get_array("Index") {
        Some(items) => items.iter().filter_map(Value::as_i64).collect(),
        None => vec![0, size],
    };

    let data = stream.decoded_data()?;
    let row_len: usize = widths.iter().sum();
    if row_len == 0 {
        return Err(CosError::xref("zero-width cross-reference rows"));
    }
    let mut rows = data.chunks_exact(row_len);
    let mut entries = Vec::new();
    for pair in index.chunks_exact(2) {
        let start = u32::try_from(pair[0])
            .map_err(|_| CosError::xref(format!("/Index start {} out of range", pair[0])))?;
        let count = u32::try_from(pair[1].max(0)).unwrap_or(u32::MAX);
        for n in 0..count {
            let Some(row) = rows.next() else {
                warn!("Cross-reference stream at {} ends early", offset);
                break;
            };
            let (f1, rest) = row.split_at(widths[0]);
            let (f2, f3) = rest.split_at(widths[1]);
            let kind = if f1.is_empty() { 1 } else { read_field(f1) };
            let (f2, f3) = (read_field(f2), read_field(&f3[..widths[2]]));
            let entry = match kind {
                0 => XrefEntry::Free {
                    next: f2 as u32,
                    generation: f3 as u16,
                },
                1 => XrefEntry::Normal {
                    offset: f2 as usize,
                    generation: f3 as u16,
                },
                2 => XrefEntry::Compressed {
                    stream_id: f2 as u32,
                    index: f3 as u32,
                },
                other => {
                    trace!("Ignoring xref stream row of type {}", other);
                    continue;
                }
            };
            entries.push((subsection_id(start, n)?, entry));
        }
    }

    Ok(Section {
        entries,
        trailer,
        is_stream: true,
    })
}

fn object_number(value: f64) -> Option<u32> {
    if value.fract() != 0.0 || !(0.0..=u32::MAX as f64).contains(&value) {
        return None;
    }
    Some(value as u32)
}

/// Id of row `n` in a subsection starting at `start`
fn subsection_id(start: u32, n: u32) -> CosResult<u32> {
    start
        .checked_add(n)
        .ok_or_else(|| CosError::xref(format!("subsection {} overflows at row {}", start, n)))
}

fn read_field(bytes: &[u8]) -> u64 {
    if bytes.is_empty() {
        0
    } else {
        BigEndian::read_uint(bytes, bytes.len())
    }
}

/// Start of `<id> <gen>` preceding the `obj` keyword at `keyword`
fn header_start(data: &[u8], keyword: usize) -> Option<usize> {
    let is_ws = |b: u8| matches!(b, 0 | 9 | 10 | 12 | 13 | 32);
    let mut i = keyword;
    let skip = |i: &mut usize, digits: bool| -> bool {
        let begin = *i;
        while *i > 0 && (if digits { data[*i - 1].is_ascii_digit() } else { is_ws(data[*i - 1]) }) {
            *i -= 1;
        }
        *i < begin
    };
    if !skip(&mut i, false) || !skip(&mut i, true) || !skip(&mut i, false) || !skip(&mut i, true) {
        return None;
    }
    if i > 0 && !is_ws(data[i - 1]) && !matches!(data[i - 1], b'>' | b')' | b']') {
        return None;
    }
    Some(i)
}

fn last_classic_trailer(parser: &dyn DataParser) -> CosResult<Option<Dictionary>> {
    let mut from = parser.len();
    while from > 0 {
        let Some(keyword) = parser.find_bytes_backward_at(b"trailer", from - 1).wait()? else {
            return Ok(None);
        };
        if let Some(trailer) = Dictionary::parse_at(parser, keyword + 7, None).ok().flatten() {
            return Ok(Some(trailer.value));
        }
        from = keyword;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{get_data_parser, ParserStrategy};
    use crate::pdf::filter::Filter;
    use pretty_assertions::assert_eq;
    use test_log::test;

    /// Append objects and a classic xref section, returning the section offset
    fn classic(out: &mut Vec<u8>, objects: &[(u32, &str)], trailer: &str) -> usize {
        let mut rows = Vec::new();
        for (id, body) in objects {
            rows.push((*id, out.len()));
            out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", id, body).as_bytes());
        }
        let xref = out.len();
        out.extend_from_slice(b"xref\n");
        for (id, offset) in rows {
            out.extend_from_slice(format!("{} 1\n{:010} 00000 n \n", id, offset).as_bytes());
        }
        out.extend_from_slice(format!("trailer\n{}\nstartxref\n{}\n%%EOF\n", trailer, xref).as_bytes());
        xref
    }

    fn table(data: Vec<u8>) -> CrossRefTable {
        CrossRefTable::build(&get_data_parser(data, ParserStrategy::Sync)).unwrap()
    }

    #[test]
    fn test_classic_table() {
        let mut data = b"%PDF-1.7\n".to_vec();
        let xref = classic(
            &mut data,
            &[(1, "<< /Type /Catalog /Pages 2 0 R >>"), (2, "<< /Type /Pages /Kids [] /Count 0 >>")],
            "<< /Size 3 /Root 1 0 R >>",
        );
        let table = table(data);
        assert_eq!(table.startxref(), Some(xref));
        assert_eq!(table.resolve(1), Some(XrefLocation::Offset { offset: 9, generation: 0 }));
        assert!(matches!(table.resolve(2), Some(XrefLocation::Offset { .. })));
        assert_eq!(table.resolve(3), None);
        assert_eq!(table.trailer().get_reference("Root"), Some(Reference::new(1, 0)));
        assert_eq!(table.size(), 3);
        assert!(!table.is_recovered());
    }

    #[test]
    fn test_later_section_wins() {
        let mut data = b"%PDF-1.7\n".to_vec();
        let first = classic(&mut data, &[(1, "<< /Type /Catalog /V 1 >>")], "<< /Size 2 /Root 1 0 R /Info 9 0 R >>");
        let new_offset = data.len();
        classic(&mut data, &[(1, "<< /Type /Catalog /V 2 >>")], &format!("<< /Size 2 /Root 1 0 R /Prev {} >>", first));

        let table = table(data);
        assert_eq!(table.resolve(1), Some(XrefLocation::Offset { offset: new_offset, generation: 0 }));
        assert_eq!(table.trailer().get_reference("Info"), Some(Reference::new(9, 0)));
        assert!(!table.trailer().contains_key("Prev"));
    }

    #[test]
    fn test_prev_cycle_terminates() {
        let mut data = b"%PDF-1.7\n".to_vec();
        let xref = data.len() + "1 0 obj\n<< /Type /Catalog >>\nendobj\n".len();
        classic(&mut data, &[(1, "<< /Type /Catalog >>")], &format!("<< /Size 2 /Root 1 0 R /Prev {} >>", xref));
        let table = table(data);
        assert!(!table.is_recovered());
        assert!(table.resolve(1).is_some());
    }

    #[test]
    fn test_cross_reference_stream() {
        let mut data = b"%PDF-1.7\n".to_vec();
        let catalog = data.len();
        data.extend_from_slice(b"1 0 obj\n<< /Type /Catalog >>\nendobj\n");
        let xref = data.len();

        // type 1 for obj 1, type 2 for obj 5 packed in 4 at index 3, type 0 for obj 6
        let mut rows = Vec::new();
        rows.extend_from_slice(&[1, 0, catalog as u8, 0]);
        rows.extend_from_slice(&[2, 0, 4, 3]);
        rows.extend_from_slice(&[0, 0, 0, 1]);
        let encoded = Filter::FlateDecode.encode(&rows).unwrap();
        data.extend_from_slice(
            format!(
                "3 0 obj\n<< /Type /XRef /Size 7 /W [1 2 1] /Index [1 1 5 2] /Root 1 0 R /Filter /FlateDecode /Length {} >>\nstream\n",
                encoded.len()
            )
            .as_bytes(),
        );
        data.extend_from_slice(&encoded);
        data.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF\n", xref).as_bytes());

        let table = table(data);
        assert_eq!(table.resolve(1), Some(XrefLocation::Offset { offset: catalog, generation: 0 }));
        assert_eq!(table.resolve(5), Some(XrefLocation::InStream { stream_id: 4, index: 3 }));
        assert_eq!(table.resolve(6), None);
        assert_eq!(table.entry(6), Some(&XrefEntry::Free { next: 0, generation: 1 }));
        assert!(!table.trailer().contains_key("W"));
        assert_eq!(table.size(), 7);
    }

    #[test]
    fn test_overflowing_subsection_falls_back_to_scan() {
        let mut data = b"%PDF-1.7\n".to_vec();
        let catalog = data.len();
        data.extend_from_slice(b"1 0 obj\n<< /Type /Catalog >>\nendobj\n");
        let xref = data.len();
        data.extend_from_slice(
            format!(
                "xref\n4294967295 2\n{:010} 00000 n \n{:010} 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                catalog, catalog, xref
            )
            .as_bytes(),
        );

        let table = table(data);
        assert!(table.is_recovered());
        assert_eq!(table.resolve(1), Some(XrefLocation::Offset { offset: catalog, generation: 0 }));
        assert_eq!(table.trailer().get_reference("Root"), Some(Reference::new(1, 0)));
    }

    #[test]
    fn test_overflowing_stream_index_falls_back_to_scan() {
        let mut data = b"%PDF-1.7\n".to_vec();
        let catalog = data.len();
        data.extend_from_slice(b"1 0 obj\n<< /Type /Catalog >>\nendobj\n");
        let xref = data.len();
        let rows = [1, 0, catalog as u8, 0, 1, 0, catalog as u8, 0];
        data.extend_from_slice(
            format!(
                "3 0 obj\n<< /Type /XRef /Size 4 /W [1 2 1] /Index [4294967295 2] /Root 1 0 R /Length {} >>\nstream\n",
                rows.len()
            )
            .as_bytes(),
        );
        data.extend_from_slice(&rows);
        data.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF\n", xref).as_bytes());

        let table = table(data);
        assert!(table.is_recovered());
        assert_eq!(table.resolve(1), Some(XrefLocation::Offset { offset: catalog, generation: 0 }));
        assert_eq!(table.size(), 4);
    }

    #[test]
    fn test_subsection_ids_are_checked() {
        assert_eq!(subsection_id(7, 3).unwrap(), 10);
        assert!(subsection_id(u32::MAX, 1).is_err());
        assert_eq!(object_number(4294967295.0), Some(u32::MAX));
        assert_eq!(object_number(4294967296.0), None);
        assert_eq!(object_number(-1.0), None);
    }

    #[test]
    fn test_recovery_scan_without_startxref() {
        let data = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n2 0 obj\n<< /Type /Pages >>\nendobj\n2 0 obj\n<< /Type /Pages /Count 0 >>\nendobj\n".to_vec();
        let second_two = data.windows(7).rposition(|w| w == b"2 0 obj").unwrap();
        let table = table(data);
        assert!(table.is_recovered());
        assert_eq!(table.resolve(2), Some(XrefLocation::Offset { offset: second_two, generation: 0 }));
        assert_eq!(table.trailer().get_reference("Root"), Some(Reference::new(1, 0)));
        assert_eq!(table.trailer().get_integer("Size"), Some(3));
    }

    #[test]
    fn test_recovery_uses_last_trailer_on_broken_offset() {
        let mut data = b"%PDF-1.4\n".to_vec();
        classic(&mut data, &[(1, "<< /Type /Catalog >>")], "<< /Size 2 /Root 1 0 R /ID [<AA> <BB>] >>");
        let tail = data.len() - b"%%EOF\n".len();
        let text = String::from_utf8_lossy(&data[..tail]).to_string();
        let broken = text.replace("startxref\n", "startxref\n9").into_bytes();

        let table = table(broken);
        assert!(table.is_recovered());
        assert!(table.trailer().get_array("ID").is_some());
        assert!(table.resolve(1).is_some());
    }
}
