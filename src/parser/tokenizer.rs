//! Byte-level COS grammar scanner

use log::trace;

use super::{ParserBounds, ParserResult, ValueType};
use crate::pdf::string::unescape_literal;
use crate::pdf::Reference;

/// PDF whitespace characters
pub(crate) fn is_whitespace(b: u8) -> bool {
    matches!(b, 0 | 9 | 10 | 12 | 13 | 32)
}

/// PDF delimiter characters
pub(crate) fn is_delimiter(b: u8) -> bool {
    matches!(b, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn is_regular(b: u8) -> bool {
    !is_whitespace(b) && !is_delimiter(b)
}

/// Stateless scanner over a borrowed buffer
#[derive(Debug, Clone, Copy)]
pub struct Tokenizer<'a> {
    data: &'a [u8],
}

impl<'a> Tokenizer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn byte(&self, i: usize) -> Option<u8> {
        self.data.get(i).copied()
    }

    /// Advance past whitespace and `%` comments
    pub fn skip_whitespace(&self, mut i: usize) -> usize {
        while let Some(b) = self.byte(i) {
            if is_whitespace(b) {
                i += 1;
            } else if b == b'%' {
                while let Some(c) = self.byte(i) {
                    if c == b'\n' || c == b'\r' {
                        break;
                    }
                    i += 1;
                }
            } else {
                break;
            }
        }
        i
    }

    fn is_boundary(&self, i: usize) -> bool {
        self.byte(i).map_or(true, |b| !is_regular(b))
    }

    /// Whether `keyword` starts at `i` and ends on a token boundary
    pub fn keyword_at(&self, i: usize, keyword: &[u8]) -> bool {
        self.data.get(i..).map_or(false, |rest| rest.starts_with(keyword))
            && self.is_boundary(i + keyword.len())
    }

    pub fn get_value_type_at(&self, offset: usize) -> Option<ValueType> {
        let i = self.skip_whitespace(offset);
        match self.byte(i)? {
            b'<' if self.byte(i + 1) == Some(b'<') => {
                if self.stream_keyword_after_dict(i).is_some() {
                    Some(ValueType::Stream)
                } else {
                    Some(ValueType::Dictionary)
                }
            }
            b'<' => self.hex_end(i).map(|_| ValueType::StringHex),
            b'(' => Some(ValueType::StringLiteral),
            b'[' => Some(ValueType::Array),
            b'/' => Some(ValueType::Name),
            b't' | b'f' => self.parse_bool_at(i).map(|_| ValueType::Boolean),
            b'n' if self.keyword_at(i, b"null") => Some(ValueType::Null),
            b'0'..=b'9' | b'+' | b'-' | b'.' => {
                if self.parse_ref_at(i).is_some() {
                    Some(ValueType::Reference)
                } else {
                    self.parse_number_at(i, true, true).map(|_| ValueType::Number)
                }
            }
            _ => None,
        }
    }

    pub fn parse_number_at(
        &self,
        offset: usize,
        allow_float: bool,
        allow_negative: bool,
    ) -> Option<ParserResult<f64>> {
        let start = self.skip_whitespace(offset);
        let mut i = start;
        match self.byte(i) {
            Some(b'+') => i += 1,
            Some(b'-') if allow_negative => i += 1,
            _ => {}
        }

        let mut digits = 0;
        while self.byte(i).map_or(false, |b| b.is_ascii_digit()) {
            i += 1;
            digits += 1;
        }
        if allow_float && self.byte(i) == Some(b'.') {
            i += 1;
            while self.byte(i).map_or(false, |b| b.is_ascii_digit()) {
                i += 1;
                digits += 1;
            }
        }
        if digits == 0 || !self.is_boundary(i) || self.byte(i) == Some(b'.') {
            return None;
        }

        let text = std::str::from_utf8(&self.data[start..i]).ok()?;
        let value = text.parse::<f64>().ok()?;
        Some(ParserResult::new(value, start, i - 1))
    }

    fn parse_uint_at(&self, offset: usize) -> Option<ParserResult<u64>> {
        let number = self.parse_number_at(offset, false, false)?;
        if self.data[number.start] == b'+' {
            return None;
        }
        Some(ParserResult::new(number.value as u64, number.start, number.end))
    }

    pub fn parse_bool_at(&self, offset: usize) -> Option<ParserResult<bool>> {
        let start = self.skip_whitespace(offset);
        if self.keyword_at(start, b"true") {
            Some(ParserResult::new(true, start, start + 3))
        } else if self.keyword_at(start, b"false") {
            Some(ParserResult::new(false, start, start + 4))
        } else {
            None
        }
    }

    pub fn parse_name_at(&self, offset: usize, include_slash: bool) -> Option<ParserResult<String>> {
        let start = self.skip_whitespace(offset);
        if self.byte(start)? != b'/' {
            return None;
        }
        let mut i = start + 1;
        while self.byte(i).map_or(false, is_regular) {
            i += 1;
        }

        let raw = &self.data[start + 1..i];
        let mut decoded = Vec::with_capacity(raw.len() + 1);
        if include_slash {
            decoded.push(b'/');
        }
        let mut j = 0;
        while j < raw.len() {
            if raw[j] == b'#' {
                if let Some(byte) = raw.get(j + 1..j + 3).and_then(|h| hex::decode(h).ok()) {
                    decoded.push(byte[0]);
                    j += 3;
                    continue;
                }
            }
            decoded.push(raw[j]);
            j += 1;
        }

        let value = String::from_utf8_lossy(&decoded).into_owned();
        Some(ParserResult::new(value, start, i - 1))
    }

    /// Walk the elements of an array, failing if any element is rejected
    fn parse_array_with<T>(
        &self,
        offset: usize,
        mut element: impl FnMut(usize) -> Option<ParserResult<T>>,
    ) -> Option<ParserResult<Vec<T>>> {
        let bounds = self.get_array_bounds_at(offset)?;
        let content = bounds.content_range()?;
        let mut values = Vec::new();
        let mut i = content.start;
        loop {
            i = self.skip_whitespace(i);
            if i >= content.end {
                break;
            }
            let parsed = element(i)?;
            if parsed.end >= content.end {
                return None;
            }
            values.push(parsed.value);
            i = parsed.end + 1;
        }
        Some(ParserResult::new(values, bounds.start, bounds.end))
    }

    pub fn parse_name_array_at(
        &self,
        offset: usize,
        include_slash: bool,
    ) -> Option<ParserResult<Vec<String>>> {
        self.parse_array_with(offset, |i| self.parse_name_at(i, include_slash))
    }

    pub fn parse_number_array_at(
        &self,
        offset: usize,
        allow_float: bool,
        allow_negative: bool,
    ) -> Option<ParserResult<Vec<f64>>> {
        self.parse_array_with(offset, |i| self.parse_number_at(i, allow_float, allow_negative))
    }

    pub fn parse_ref_at(&self, offset: usize) -> Option<ParserResult<Reference>> {
        let id = self.parse_uint_at(offset)?;
        let generation = self.parse_uint_at(id.end + 1)?;
        if generation.start == id.end + 1 {
            return None;
        }
        let r = self.skip_whitespace(generation.end + 1);
        if self.byte(r)? != b'R' || !self.is_boundary(r + 1) {
            return None;
        }
        let reference = Reference::new(u32::try_from(id.value).ok()?, u16::try_from(generation.value).ok()?);
        Some(ParserResult::new(reference, id.start, r))
    }

    pub fn parse_ref_array_at(&self, offset: usize) -> Option<ParserResult<Vec<Reference>>> {
        self.parse_array_with(offset, |i| self.parse_ref_at(i))
    }

    /// Parse `<id> <gen> obj`; `end` is the last byte of the keyword
    pub fn parse_indirect_header_at(&self, offset: usize) -> Option<ParserResult<Reference>> {
        let id = self.parse_uint_at(offset)?;
        let generation = self.parse_uint_at(id.end + 1)?;
        if generation.start == id.end + 1 {
            return None;
        }
        let keyword = self.skip_whitespace(generation.end + 1);
        if !self.keyword_at(keyword, b"obj") {
            return None;
        }
        let reference = Reference::new(u32::try_from(id.value).ok()?, u16::try_from(generation.value).ok()?);
        Some(ParserResult::new(reference, id.start, keyword + 2))
    }

    /// Index of the `)` closing the literal string opened at `open`
    fn literal_end(&self, open: usize) -> Option<usize> {
        let mut depth = 0usize;
        let mut i = open;
        while let Some(b) = self.byte(i) {
            match b {
                b'\\' => {
                    i += 2;
                    continue;
                }
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
            i += 1;
        }
        None
    }

    /// Index of the `>` closing the hex string opened at `open`
    /// Closing `>` of the hex string opened at `open`; only hex digits and
    /// whitespace may come between
    fn hex_end(&self, open: usize) -> Option<usize> {
        let rest = self.data.get(open + 1..)?;
        for (p, &b) in rest.iter().enumerate() {
            match b {
                b'>' => return Some(open + 1 + p),
                b if b.is_ascii_hexdigit() || is_whitespace(b) => {}
                _ => return None,
            }
        }
        None
    }

    fn skip_comment(&self, mut i: usize) -> usize {
        while let Some(b) = self.byte(i) {
            if b == b'\n' || b == b'\r' {
                break;
            }
            i += 1;
        }
        i
    }

    pub fn get_dict_bounds_at(&self, offset: usize) -> Option<ParserBounds> {
        let start = self.skip_whitespace(offset);
        if self.data.get(start..start + 2)? != b"<<" {
            return None;
        }

        let mut depth = 0usize;
        let mut i = start;
        while let Some(b) = self.byte(i) {
            match b {
                b'<' if self.byte(i + 1) == Some(b'<') => {
                    depth += 1;
                    i += 2;
                }
                b'<' => i = self.hex_end(i)? + 1,
                b'>' if self.byte(i + 1) == Some(b'>') => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(ParserBounds::with_content(start, i + 1, start + 2, i - 1));
                    }
                    i += 2;
                }
                b'(' => i = self.literal_end(i)? + 1,
                b'%' => i = self.skip_comment(i),
                _ => i += 1,
            }
        }
        trace!("Unterminated dictionary at offset {}", start);
        None
    }

    pub fn get_array_bounds_at(&self, offset: usize) -> Option<ParserBounds> {
        let start = self.skip_whitespace(offset);
        if self.byte(start)? != b'[' {
            return None;
        }

        let mut depth = 0usize;
        let mut i = start;
        while let Some(b) = self.byte(i) {
            match b {
                b'[' => {
                    depth += 1;
                    i += 1;
                }
                b']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(ParserBounds::with_content(start, i, start + 1, i - 1));
                    }
                    i += 1;
                }
                b'<' if self.byte(i + 1) == Some(b'<') => i += 2,
                b'<' => i = self.hex_end(i)? + 1,
                b'(' => i = self.literal_end(i)? + 1,
                b'%' => i = self.skip_comment(i),
                _ => i += 1,
            }
        }
        trace!("Unterminated array at offset {}", start);
        None
    }

    pub fn get_literal_bounds_at(&self, offset: usize) -> Option<ParserBounds> {
        let start = self.skip_whitespace(offset);
        if self.byte(start)? != b'(' {
            return None;
        }
        let end = self.literal_end(start)?;
        Some(ParserBounds::with_content(start, end, start + 1, end - 1))
    }

    pub fn get_hex_bounds_at(&self, offset: usize) -> Option<ParserBounds> {
        let start = self.skip_whitespace(offset);
        if self.byte(start)? != b'<' || self.byte(start + 1) == Some(b'<') {
            return None;
        }
        let end = self.hex_end(start)?;
        Some(ParserBounds::with_content(start, end, start + 1, end - 1))
    }

    pub fn parse_literal_at(&self, offset: usize) -> Option<ParserResult<Vec<u8>>> {
        let bounds = self.get_literal_bounds_at(offset)?;
        let raw = &self.data[bounds.content_range()?];
        Some(ParserResult::new(unescape_literal(raw), bounds.start, bounds.end))
    }

    pub fn parse_hex_at(&self, offset: usize) -> Option<ParserResult<Vec<u8>>> {
        let bounds = self.get_hex_bounds_at(offset)?;
        let mut digits = Vec::new();
        for &b in &self.data[bounds.content_range()?] {
            if b.is_ascii_hexdigit() {
                digits.push(b);
            } else if !is_whitespace(b) {
                return None;
            }
        }
        if digits.len() % 2 == 1 {
            digits.push(b'0');
        }
        let value = hex::decode(&digits).ok()?;
        Some(ParserResult::new(value, bounds.start, bounds.end))
    }

    /// Offset of the `stream` keyword following the dictionary at `offset`
    fn stream_keyword_after_dict(&self, offset: usize) -> Option<(ParserBounds, usize)> {
        let dict = self.get_dict_bounds_at(offset)?;
        let keyword = self.skip_whitespace(dict.end + 1);
        if self.keyword_at(keyword, b"stream") {
            Some((dict, keyword))
        } else {
            None
        }
    }

    /// Direct integer `/Length` of a stream dictionary, if present
    fn direct_length(&self, dict: &ParserBounds) -> Option<usize> {
        let content = dict.content_range()?;
        let limit = content.end.checked_sub(1)?;
        let mut i = content.start;
        while let Some(name_at) = self.skip_to_next_name_at(i, limit) {
            let name = self.parse_name_at(name_at, false)?;
            if name.value == "Length" {
                if self.parse_ref_at(name.end + 1).is_some() {
                    return None;
                }
                return self
                    .parse_number_at(name.end + 1, false, false)
                    .map(|n| n.value as usize);
            }
            i = self.skip_value_at(name.end + 1)? + 1;
        }
        None
    }

    fn endstream_at_or_after(&self, i: usize) -> Option<usize> {
        let keyword = self.skip_whitespace(i);
        if self.keyword_at(keyword, b"endstream") {
            Some(keyword)
        } else {
            None
        }
    }

    /// Bounds of a stream value: whole span through `endstream`, content is the payload
    pub fn get_stream_bounds_at(&self, offset: usize) -> Option<ParserBounds> {
        let (dict, keyword) = self.stream_keyword_after_dict(offset)?;
        let mut payload = keyword + b"stream".len();
        if self.byte(payload) == Some(b'\r') {
            payload += 1;
        }
        if self.byte(payload) == Some(b'\n') {
            payload += 1;
        }

        let declared = self
            .direct_length(&dict)
            .filter(|len| payload + len <= self.len())
            .and_then(|len| self.endstream_at_or_after(payload + len).map(|e| (payload + len, e)));

        let (payload_end, endstream) = match declared {
            Some(found) => found,
            None => {
                let endstream = self.find_bytes_at(b"endstream", payload)?;
                let mut end = endstream;
                if end > payload && self.data[end - 1] == b'\n' {
                    end -= 1;
                }
                if end > payload && self.data[end - 1] == b'\r' {
                    end -= 1;
                }
                (end, endstream)
            }
        };

        // payload_end is exclusive; an empty payload yields content_end == payload - 1
        Some(ParserBounds::with_content(
            dict.start,
            endstream + b"endstream".len() - 1,
            payload,
            payload_end - 1,
        ))
    }

    pub fn get_value_bounds_at(&self, offset: usize) -> Option<ParserBounds> {
        let start = self.skip_whitespace(offset);
        match self.get_value_type_at(start)? {
            ValueType::Dictionary => self.get_dict_bounds_at(start),
            ValueType::Stream => self.get_stream_bounds_at(start),
            ValueType::Array => self.get_array_bounds_at(start),
            ValueType::StringLiteral => self.get_literal_bounds_at(start),
            ValueType::StringHex => self.get_hex_bounds_at(start),
            ValueType::Name => self.parse_name_at(start, true).map(|r| ParserBounds::new(r.start, r.end)),
            ValueType::Boolean => self.parse_bool_at(start).map(|r| ParserBounds::new(r.start, r.end)),
            ValueType::Null => Some(ParserBounds::new(start, start + 3)),
            ValueType::Reference => self.parse_ref_at(start).map(|r| ParserBounds::new(r.start, r.end)),
            ValueType::Number => self
                .parse_number_at(start, true, true)
                .map(|r| ParserBounds::new(r.start, r.end)),
        }
    }

    /// Inclusive end offset of the value starting at `offset`
    pub fn skip_value_at(&self, offset: usize) -> Option<usize> {
        self.get_value_bounds_at(offset).map(|b| b.end)
    }

    /// Offset of the next `/Name` token at or after `from`, not past `limit`
    pub fn skip_to_next_name_at(&self, from: usize, limit: usize) -> Option<usize> {
        let mut i = from;
        loop {
            i = self.skip_whitespace(i);
            if i > limit || i >= self.len() {
                return None;
            }
            if self.data[i] == b'/' {
                return Some(i);
            }
            i = match self.skip_value_at(i) {
                Some(end) => end + 1,
                None => i + 1,
            };
        }
    }

    pub fn find_bytes_at(&self, needle: &[u8], from: usize) -> Option<usize> {
        if needle.is_empty() || from >= self.len() {
            return None;
        }
        self.data[from..]
            .windows(needle.len())
            .position(|w| w == needle)
            .map(|p| p + from)
    }

    /// Last occurrence of `needle` starting at or before `from`
    pub fn find_bytes_backward_at(&self, needle: &[u8], from: usize) -> Option<usize> {
        if needle.is_empty() {
            return None;
        }
        let end = from.saturating_add(needle.len()).min(self.len());
        self.data[..end].windows(needle.len()).rposition(|w| w == needle)
    }

    pub fn slice_char_codes_at(&self, start: usize, end: usize) -> Vec<u8> {
        if start > end || start >= self.len() {
            return Vec::new();
        }
        self.data[start..=end.min(self.len() - 1)].to_vec()
    }
}
