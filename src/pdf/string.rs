//! String encodings: literal escapes, hex, text strings and dates

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Decode the interior of a literal string (without the outer parentheses)
pub fn unescape_literal(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        match b {
            b'\\' => {
                i += 1;
                let Some(&next) = raw.get(i) else { break };
                match next {
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'b' => out.push(0x08),
                    b'f' => out.push(0x0C),
                    b'0'..=b'7' => {
                        let mut value: u16 = 0;
                        let mut digits = 0;
                        while digits < 3 {
                            match raw.get(i) {
                                Some(&d @ b'0'..=b'7') => {
                                    value = value * 8 + u16::from(d - b'0');
                                    i += 1;
                                    digits += 1;
                                }
                                _ => break,
                            }
                        }
                        out.push((value & 0xFF) as u8);
                        continue;
                    }
                    b'\r' => {
                        // line continuation
                        if raw.get(i + 1) == Some(&b'\n') {
                            i += 1;
                        }
                    }
                    b'\n' => {}
                    other => out.push(other),
                }
                i += 1;
            }
            b'\r' => {
                out.push(b'\n');
                i += 1;
                if raw.get(i) == Some(&b'\n') {
                    i += 1;
                }
            }
            _ => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

/// Encode bytes as a literal string, parentheses included
pub fn escape_literal(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 2);
    out.push(b'(');
    for &b in bytes {
        match b {
            b'(' | b')' | b'\\' => {
                out.push(b'\\');
                out.push(b);
            }
            b'\r' => out.extend_from_slice(b"\\r"),
            _ => out.push(b),
        }
    }
    out.push(b')');
    out
}

/// Encode bytes as a hex string, angle brackets included
pub fn encode_hex(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() * 2 + 2);
    out.push(b'<');
    out.extend_from_slice(hex::encode_upper(bytes).as_bytes());
    out.push(b'>');
    out
}

/// Decode a text string: UTF-16BE or UTF-8 with BOM, otherwise single-byte
pub fn decode_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Encode a text string; non-ASCII text is written as UTF-16BE with BOM
pub fn encode_text(text: &str) -> Vec<u8> {
    if text.is_ascii() {
        return text.as_bytes().to_vec();
    }
    let mut out = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_be_bytes());
    }
    out
}

/// Date in `D:YYYYMMDDHHmmSSOHH'mm'` form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdfDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Offset from UTC in minutes; `None` when unspecified
    pub utc_offset: Option<i16>,
}

fn digits(text: &[u8], at: usize, len: usize) -> Option<u32> {
    let slice = text.get(at..at + len)?;
    if !slice.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(slice).ok()?.parse().ok()
}

// days since 1970-01-01 to civil date (Howard Hinnant's algorithm)
fn civil_from_days(days: i64) -> (i64, u8, u8) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u8;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

impl PdfDate {
    /// Current UTC time
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let (year, month, day) = civil_from_days(secs.div_euclid(86_400));
        let rem = secs.rem_euclid(86_400);
        Self {
            year: year as u16,
            month,
            day,
            hour: (rem / 3600) as u8,
            minute: (rem % 3600 / 60) as u8,
            second: (rem % 60) as u8,
            utc_offset: Some(0),
        }
    }

    /// Parse a date string; only the year is mandatory
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let text = bytes.strip_prefix(b"D:").unwrap_or(bytes);
        let year = digits(text, 0, 4)? as u16;
        let field = |at: usize, default: u32| digits(text, at, 2).unwrap_or(default) as u8;
        let mut date = Self {
            year,
            month: field(4, 1),
            day: field(6, 1),
            hour: field(8, 0),
            minute: field(10, 0),
            second: field(12, 0),
            utc_offset: None,
        };
        if !(1..=12).contains(&date.month) || !(1..=31).contains(&date.day) {
            return None;
        }

        let mut i = 4;
        while text.get(i).map_or(false, u8::is_ascii_digit) && i < 14 {
            i += 1;
        }
        date.utc_offset = match text.get(i) {
            Some(b'Z') => Some(0),
            Some(&sign @ (b'+' | b'-')) => {
                let hours = digits(text, i + 1, 2).unwrap_or(0) as i16;
                let minutes = digits(text, i + 4, 2)
                    .or_else(|| digits(text, i + 3, 2))
                    .unwrap_or(0) as i16;
                let total = hours * 60 + minutes;
                Some(if sign == b'-' { -total } else { total })
            }
            _ => None,
        };
        Some(date)
    }

    pub fn to_pdf_bytes(&self) -> Vec<u8> {
        let mut out = format!(
            "D:{:04}{:02}{:02}{:02}{:02}{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        );
        match self.utc_offset {
            Some(0) => out.push('Z'),
            Some(offset) => {
                let sign = if offset < 0 { '-' } else { '+' };
                let abs = offset.unsigned_abs();
                out.push_str(&format!("{}{:02}'{:02}'", sign, abs / 60, abs % 60));
            }
            None => {}
        }
        out.into_bytes()
    }

    /// Parse `YYYY-MM-DDTHH:MM:SS` with optional `Z` or `±HH:MM`
    pub fn from_rfc3339(text: &str) -> Option<Self> {
        let b = text.as_bytes();
        if b.len() < 19 || b[4] != b'-' || b[7] != b'-' || !matches!(b[10], b'T' | b't' | b' ') {
            return None;
        }
        let mut i = 19;
        if b.get(i) == Some(&b'.') {
            i += 1;
            while b.get(i).map_or(false, u8::is_ascii_digit) {
                i += 1;
            }
        }
        let utc_offset = match b.get(i) {
            Some(b'Z' | b'z') => Some(0),
            Some(&sign @ (b'+' | b'-')) => {
                let total = digits(b, i + 1, 2)? as i16 * 60 + digits(b, i + 4, 2)? as i16;
                Some(if sign == b'-' { -total } else { total })
            }
            _ => None,
        };
        Some(Self {
            year: digits(b, 0, 4)? as u16,
            month: digits(b, 5, 2)? as u8,
            day: digits(b, 8, 2)? as u8,
            hour: digits(b, 11, 2)? as u8,
            minute: digits(b, 14, 2)? as u8,
            second: digits(b, 17, 2)? as u8,
            utc_offset,
        })
    }

    pub fn to_rfc3339(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PdfDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )?;
        match self.utc_offset {
            Some(0) => write!(f, "Z"),
            Some(offset) => {
                let sign = if offset < 0 { '-' } else { '+' };
                let abs = offset.unsigned_abs();
                write!(f, "{}{:02}:{:02}", sign, abs / 60, abs % 60)
            }
            None => Ok(()),
        }
    }
}
