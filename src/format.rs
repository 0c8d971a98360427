//! Model Format Detection
//!
//! Sessions accept ONNX model descriptors. The format is decided by the
//! leading protobuf tag alone; the extension only sharpens the error message
//! for a `.onnx` file whose content does not parse.
//!
//! | Format | Leading bytes | Extension |
//! |--------|---------------|-----------|
//! | ONNX   | `0x08` (field 1 `ir_version`, varint) | `.onnx` |

use std::path::Path;

pub mod onnx;

/// Detected model format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    /// ONNX protobuf (`ModelProto`)
    Onnx,
}

impl std::fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "ONNX"),
        }
    }
}

/// Errors during format detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Data too short for format detection
    TooShort {
        /// Actual length
        len: usize,
    },
    /// Unknown format (no leading tag matched)
    UnknownFormat,
}

impl std::fmt::Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort { len } => write!(
                f,
                "Data too short for format detection: {len} bytes (need {MIN_DETECT_LEN})"
            ),
            Self::UnknownFormat => write!(f, "Unknown model format (no leading tag matched)"),
        }
    }
}

impl std::error::Error for FormatError {}

/// ONNX files open with the tag for field 1 (`ir_version`), wire type 0
pub const ONNX_LEADING_TAG: u8 = 0x08;

/// Minimum bytes needed to detect a format
pub const MIN_DETECT_LEN: usize = 2;

/// Detect model format from the first bytes of a file
///
/// # Errors
///
/// Returns `TooShort` or `UnknownFormat`.
pub fn detect_format(data: &[u8]) -> Result<ModelFormat, FormatError> {
    if data.len() < MIN_DETECT_LEN {
        return Err(FormatError::TooShort { len: data.len() });
    }
    // ir_version is a small positive varint (3..=10 in practice)
    if data[0] == ONNX_LEADING_TAG && data[1] > 0 && data[1] < 0x80 {
        return Ok(ModelFormat::Onnx);
    }
    Err(FormatError::UnknownFormat)
}

/// Detect format from a path's extension
#[must_use]
pub fn format_from_extension(path: &Path) -> Option<ModelFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("onnx") => Some(ModelFormat::Onnx),
        _ => None,
    }
}
