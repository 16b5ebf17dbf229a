//! Program images
//!
//! A compiled program as loaded into the emulator's flash. Images come from
//! Intel HEX files (the usual toolchain output) or raw binaries.

use std::path::Path;

use crate::error::ImageError;

/// Largest image accepted from a file (ATmega328P flash)
pub const MAX_IMAGE_SIZE: usize = 32 * 1024;

/// Machine code, starting at flash address 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    bytes: Vec<u8>,
}

impl Image {
    /// Wrap raw machine code
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }
        if bytes.len() > MAX_IMAGE_SIZE {
            return Err(ImageError::TooLarge {
                size: bytes.len(),
                limit: MAX_IMAGE_SIZE,
            });
        }
        Ok(Self { bytes })
    }

    /// Decode Intel HEX text
    ///
    /// Gaps between records are filled with `0xFF` (erased flash).
    pub fn from_hex(text: &str) -> Result<Self, ImageError> {
        let mut bytes: Vec<u8> = Vec::new();
        let mut base: usize = 0;

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record = decode_record(line, line_no)?;

            match record.record_type {
                0x00 => {
                    let start = base + usize::from(record.address);
                    let end = start + record.data.len();
                    if end > MAX_IMAGE_SIZE {
                        return Err(ImageError::TooLarge {
                            size: end,
                            limit: MAX_IMAGE_SIZE,
                        });
                    }
                    if bytes.len() < end {
                        bytes.resize(end, 0xFF);
                    }
                    bytes[start..end].copy_from_slice(&record.data);
                }
                0x01 => break,
                // Extended segment address
                0x02 => base = usize::from(record.word(line_no)?) << 4,
                // Extended linear address
                0x04 => base = usize::from(record.word(line_no)?) << 16,
                // Start addresses carry no flash contents
                0x03 | 0x05 => {}
                other => {
                    return Err(ImageError::UnsupportedRecord {
                        line: line_no,
                        record_type: other,
                    })
                }
            }
        }

        Self::from_bytes(bytes)
    }

    /// Read an image file; `.hex` is decoded, anything else is raw binary
    pub async fn from_file(path: &Path) -> Result<Self, ImageError> {
        let unreadable = |e: std::io::Error| ImageError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let is_hex = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("hex"));
        if is_hex {
            let text = tokio::fs::read_to_string(path).await.map_err(unreadable)?;
            Self::from_hex(&text)
        } else {
            let bytes = tokio::fs::read(path).await.map_err(unreadable)?;
            Self::from_bytes(bytes)
        }
    }

    /// Image contents
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Image size in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; empty images are rejected
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

struct Record {
    address: u16,
    record_type: u8,
    data: Vec<u8>,
}

impl Record {
    fn word(&self, line: usize) -> Result<u16, ImageError> {
        match self.data.as_slice() {
            [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
            _ => Err(ImageError::MalformedRecord { line }),
        }
    }
}

fn decode_record(line: &str, line_no: usize) -> Result<Record, ImageError> {
    let malformed = || ImageError::MalformedRecord { line: line_no };

    let hex = line.strip_prefix(':').ok_or_else(malformed)?;
    if hex.len() < 10 || hex.len() % 2 != 0 {
        return Err(malformed());
    }
    let raw = (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(malformed)
        })
        .collect::<Result<Vec<u8>, _>>()?;

    let count = usize::from(raw[0]);
    if raw.len() != count + 5 {
        return Err(malformed());
    }

    let (body, checksum) = raw.split_at(raw.len() - 1);
    let expected = body
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
        .wrapping_neg();
    if expected != checksum[0] {
        return Err(ImageError::ChecksumMismatch {
            line: line_no,
            expected,
            actual: checksum[0],
        });
    }

    Ok(Record {
        address: u16::from_be_bytes([raw[1], raw[2]]),
        record_type: raw[3],
        data: raw[4..4 + count].to_vec(),
    })
}
