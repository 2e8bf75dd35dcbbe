//! Stream filters
//!
//! Only the general-purpose filters are decoded here. Image codecs are
//! carried through untouched by the stream model, which keeps such payloads
//! in their encoded form.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::{trace, warn};

use crate::error::{CosError, CosResult};
use crate::pdf::dict::Dictionary;

/// PDF stream filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    ASCII85Decode,
    ASCIIHexDecode,
    FlateDecode,
    RunLengthDecode,
}

/// Predictor parameters from `/DecodeParms`
#[derive(Debug, Clone, PartialEq)]
pub struct PredictorParams {
    pub predictor: u8,
    pub columns: usize,
    pub colors: usize,
    pub bits_per_component: usize,
}

impl PredictorParams {
    fn from_dict(params: &Dictionary) -> Option<Self> {
        let predictor = params.get_integer("Predictor")?;
        if predictor <= 1 {
            return None;
        }
        Some(Self {
            predictor: predictor.clamp(0, 255) as u8,
            columns: params.get_integer("Columns").unwrap_or(1).max(1) as usize,
            colors: params.get_integer("Colors").unwrap_or(1).max(1) as usize,
            bits_per_component: params.get_integer("BitsPerComponent").unwrap_or(8).max(1) as usize,
        })
    }

    fn bytes_per_pixel(&self) -> usize {
        ((self.colors * self.bits_per_component + 7) / 8).max(1)
    }

    fn bytes_per_row(&self) -> usize {
        (self.columns * self.colors * self.bits_per_component + 7) / 8
    }
}

impl Filter {
    /// Create filter from its name or inline abbreviation
    pub fn from_name(name: &str) -> CosResult<Self> {
        match name {
            "ASCII85Decode" | "A85" => Ok(Filter::ASCII85Decode),
            "ASCIIHexDecode" | "AHx" => Ok(Filter::ASCIIHexDecode),
            "FlateDecode" | "Fl" => Ok(Filter::FlateDecode),
            "RunLengthDecode" | "RL" => Ok(Filter::RunLengthDecode),
            _ => Err(CosError::UnsupportedStreamFilter(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Filter::ASCII85Decode => "ASCII85Decode",
            Filter::ASCIIHexDecode => "ASCIIHexDecode",
            Filter::FlateDecode => "FlateDecode",
            Filter::RunLengthDecode => "RunLengthDecode",
        }
    }

    /// Decode data using this filter
    pub fn decode(&self, data: &[u8], params: Option<&Dictionary>) -> CosResult<Vec<u8>> {
        let result = match self {
            Filter::ASCII85Decode => decode_ascii85(data)?,
            Filter::ASCIIHexDecode => decode_ascii_hex(data)?,
            Filter::FlateDecode => decode_flate(data)?,
            Filter::RunLengthDecode => decode_run_length(data)?,
        };

        match params.and_then(PredictorParams::from_dict) {
            Some(predictor) if *self == Filter::FlateDecode => apply_predictor(&result, &predictor),
            _ => Ok(result),
        }
    }

    /// Encode data using this filter; predictors are never applied on encode
    pub fn encode(&self, data: &[u8]) -> CosResult<Vec<u8>> {
        match self {
            Filter::ASCII85Decode => Ok(encode_ascii85(data)),
            Filter::ASCIIHexDecode => Ok(encode_ascii_hex(data)),
            Filter::FlateDecode => encode_flate(data),
            Filter::RunLengthDecode => Ok(encode_run_length(data)),
        }
    }
}

/// Run a filter chain in declaration order
pub fn decode_chain(data: &[u8], filters: &[String], params: &[Option<Dictionary>]) -> CosResult<Vec<u8>> {
    let mut current = data.to_vec();
    for (i, name) in filters.iter().enumerate() {
        let filter = Filter::from_name(name)?;
        let parms = params.get(i).and_then(Option::as_ref);
        trace!("Decoding {} bytes with {}", current.len(), filter.name());
        current = filter.decode(&current, parms)?;
    }
    Ok(current)
}

/// Encode through a chain, applying filters in reverse order
pub fn encode_chain(data: &[u8], filters: &[String]) -> CosResult<Vec<u8>> {
    let mut current = data.to_vec();
    for name in filters.iter().rev() {
        current = Filter::from_name(name)?.encode(&current)?;
    }
    Ok(current)
}

fn decode_ascii85(data: &[u8]) -> CosResult<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() * 4 / 5);
    let mut value: u64 = 0;
    let mut count = 0usize;

    let body = data.strip_prefix(b"<~").unwrap_or(data);
    for &byte in body {
        match byte {
            b'z' if count == 0 => output.extend_from_slice(&[0, 0, 0, 0]),
            b'~' => break,
            b'\n' | b'\r' | b'\t' | b' ' | b'\x0c' | 0 => continue,
            b'!'..=b'u' => {
                value = value * 85 + u64::from(byte - b'!');
                count += 1;
                if count == 5 {
                    let word = u32::try_from(value)
                        .map_err(|_| CosError::CompressionError("ASCII85 group overflow".to_string()))?;
                    output.extend_from_slice(&word.to_be_bytes());
                    value = 0;
                    count = 0;
                }
            }
            _ => {
                return Err(CosError::CompressionError(format!(
                    "Invalid ASCII85 character: 0x{:02x}",
                    byte
                )))
            }
        }
    }

    if count == 1 {
        return Err(CosError::CompressionError("Truncated ASCII85 group".to_string()));
    }
    if count > 1 {
        for _ in count..5 {
            value = value * 85 + 84;
        }
        let word = u32::try_from(value)
            .map_err(|_| CosError::CompressionError("ASCII85 group overflow".to_string()))?;
        output.extend_from_slice(&word.to_be_bytes()[..count - 1]);
    }

    Ok(output)
}

fn encode_ascii85(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() * 5 / 4 + 2);
    for chunk in data.chunks(4) {
        let mut buffer = [0u8; 4];
        buffer[..chunk.len()].copy_from_slice(chunk);
        let value = u32::from_be_bytes(buffer);

        if value == 0 && chunk.len() == 4 {
            output.push(b'z');
            continue;
        }

        let mut digits = [0u8; 5];
        let mut temp = value;
        for digit in digits.iter_mut().rev() {
            *digit = (temp % 85) as u8 + b'!';
            temp /= 85;
        }
        output.extend_from_slice(&digits[..chunk.len() + 1]);
    }
    output.extend_from_slice(b"~>");
    output
}

fn decode_ascii_hex(data: &[u8]) -> CosResult<Vec<u8>> {
    let mut digits = Vec::with_capacity(data.len());
    for &byte in data {
        match byte {
            b'0'..=b'9' | b'A'..=b'F' | b'a'..=b'f' => digits.push(byte),
            b'>' => break,
            b'\n' | b'\r' | b'\t' | b' ' | b'\x0c' | 0 => continue,
            _ => {
                return Err(CosError::CompressionError(format!(
                    "Invalid hex character: 0x{:02x}",
                    byte
                )))
            }
        }
    }
    if digits.len() % 2 == 1 {
        digits.push(b'0');
    }
    hex::decode(&digits).map_err(|e| CosError::CompressionError(e.to_string()))
}

fn encode_ascii_hex(data: &[u8]) -> Vec<u8> {
    let mut output = hex::encode_upper(data).into_bytes();
    output.push(b'>');
    output
}

fn decode_run_length(data: &[u8]) -> CosResult<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() * 2);
    let mut i = 0;

    while i < data.len() {
        let length = data[i];
        i += 1;
        match length {
            128 => break,
            0..=127 => {
                let count = length as usize + 1;
                let run = data
                    .get(i..i + count)
                    .ok_or_else(|| CosError::CompressionError("Invalid run length data".to_string()))?;
                output.extend_from_slice(run);
                i += count;
            }
            _ => {
                let byte = *data
                    .get(i)
                    .ok_or_else(|| CosError::CompressionError("Invalid run length data".to_string()))?;
                output.extend(std::iter::repeat(byte).take(257 - length as usize));
                i += 1;
            }
        }
    }

    Ok(output)
}

fn encode_run_length(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() + data.len() / 128 + 1);
    let mut i = 0;

    while i < data.len() {
        let mut run = 1;
        while i + run < data.len() && data[i] == data[i + run] && run < 128 {
            run += 1;
        }

        if run >= 2 {
            output.push((257 - run) as u8);
            output.push(data[i]);
            i += run;
            continue;
        }

        let start = i;
        while i < data.len() && i - start < 128 {
            if i + 1 < data.len() && data[i] == data[i + 1] {
                break;
            }
            i += 1;
        }
        output.push((i - start - 1) as u8);
        output.extend_from_slice(&data[start..i]);
    }

    output.push(128);
    output
}

fn decode_flate(data: &[u8]) -> CosResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut output = Vec::with_capacity(data.len() * 2);
    match decoder.read_to_end(&mut output) {
        Ok(_) => Ok(output),
        Err(e) if !output.is_empty() => {
            warn!("Flate stream truncated after {} bytes: {}", output.len(), e);
            Ok(output)
        }
        Err(e) => Err(CosError::CompressionError(e.to_string())),
    }
}

fn encode_flate(data: &[u8]) -> CosResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| CosError::CompressionError(e.to_string()))?;
    encoder.finish().map_err(|e| CosError::CompressionError(e.to_string()))
}

fn paeth(left: u8, up: u8, up_left: u8) -> u8 {
    let p = i16::from(left) + i16::from(up) - i16::from(up_left);
    let pa = (p - i16::from(left)).abs();
    let pb = (p - i16::from(up)).abs();
    let pc = (p - i16::from(up_left)).abs();
    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        up
    } else {
        up_left
    }
}

/// Undo TIFF (2) or PNG (10..=15) prediction
fn apply_predictor(data: &[u8], params: &PredictorParams) -> CosResult<Vec<u8>> {
    let bpp = params.bytes_per_pixel();
    let row_len = params.bytes_per_row();
    if row_len == 0 {
        return Ok(data.to_vec());
    }
    let mut output = Vec::with_capacity(data.len());

    match params.predictor {
        2 => {
            if params.bits_per_component != 8 {
                warn!("TIFF predictor with {} bits per component left as is", params.bits_per_component);
                return Ok(data.to_vec());
            }
            for row in data.chunks(row_len) {
                let base = output.len();
                for (i, &byte) in row.iter().enumerate() {
                    let left = if i >= bpp { output[base + i - bpp] } else { 0 };
                    output.push(byte.wrapping_add(left));
                }
            }
            Ok(output)
        }
        10..=15 => {
            let mut prev_row = vec![0u8; row_len];
            for row in data.chunks(row_len + 1) {
                let Some((&filter_type, row_data)) = row.split_first() else {
                    continue;
                };
                let mut result = vec![0u8; row_len];
                for i in 0..row_data.len().min(row_len) {
                    let left = if i >= bpp { result[i - bpp] } else { 0 };
                    let up = prev_row[i];
                    let up_left = if i >= bpp { prev_row[i - bpp] } else { 0 };
                    let predicted = match filter_type {
                        0 => 0,
                        1 => left,
                        2 => up,
                        3 => ((u16::from(left) + u16::from(up)) / 2) as u8,
                        4 => paeth(left, up, up_left),
                        other => {
                            return Err(CosError::CompressionError(format!("Invalid PNG filter type {}", other)))
                        }
                    };
                    result[i] = row_data[i].wrapping_add(predicted);
                }
                let produced = row_data.len().min(row_len);
                output.extend_from_slice(&result[..produced]);
                prev_row = result;
            }
            Ok(output)
        }
        other => Err(CosError::UnsupportedStreamFilter(format!("Predictor {}", other))),
    }
}
