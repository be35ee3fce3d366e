// Text encoding conversions for tag values

use encoding_rs::{UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};

use crate::error::{Result, TagError};

/// Text encodings a tag field can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagTextEncoding {
    /// No encoding declared; treated as UTF-8 on access.
    #[default]
    Unspecified,
    Latin1,
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl TagTextEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            TagTextEncoding::Unspecified => "unspecified",
            TagTextEncoding::Latin1 => "ISO-8859-1",
            TagTextEncoding::Utf8 => "UTF-8",
            TagTextEncoding::Utf16Le => "UTF-16LE",
            TagTextEncoding::Utf16Be => "UTF-16BE",
        }
    }
}

/// Decode raw bytes with the declared encoding.
///
/// UTF-16 input honours a leading BOM over the declared byte order.
pub fn decode_text(data: &[u8], encoding: TagTextEncoding) -> Result<String> {
    let text = match encoding {
        TagTextEncoding::Latin1 => WINDOWS_1252.decode(data).0.into_owned(),
        TagTextEncoding::Utf16Le => {
            if data.len() >= 2 && data[0..2] == [0xFE, 0xFF] {
                UTF_16BE.decode(&data[2..]).0.into_owned()
            } else if data.len() >= 2 && data[0..2] == [0xFF, 0xFE] {
                UTF_16LE.decode(&data[2..]).0.into_owned()
            } else {
                UTF_16LE.decode(data).0.into_owned()
            }
        }
        TagTextEncoding::Utf16Be => {
            if data.len() >= 2 && data[0..2] == [0xFF, 0xFE] {
                UTF_16LE.decode(&data[2..]).0.into_owned()
            } else if data.len() >= 2 && data[0..2] == [0xFE, 0xFF] {
                UTF_16BE.decode(&data[2..]).0.into_owned()
            } else {
                UTF_16BE.decode(data).0.into_owned()
            }
        }
        TagTextEncoding::Utf8 | TagTextEncoding::Unspecified => {
            let (text, _, had_errors) = UTF_8.decode(data);
            if had_errors {
                return Err(TagError::BadUtf8 {
                    context: "text field",
                });
            }
            text.into_owned()
        }
    };
    Ok(text)
}

/// Encode a string with the requested encoding.
///
/// Latin-1 output fails with [`TagError::ConversionError`] when the text
/// contains characters outside the Latin-1 subset, so the conversion stays
/// lossless.
pub fn encode_text(text: &str, encoding: TagTextEncoding) -> Result<Vec<u8>> {
    match encoding {
        TagTextEncoding::Latin1 => {
            let (bytes, _, unmappable) = WINDOWS_1252.encode(text);
            if unmappable {
                return Err(TagError::ConversionError {
                    from: "UTF-8",
                    to: "ISO-8859-1",
                });
            }
            Ok(bytes.into_owned())
        }
        TagTextEncoding::Utf16Le => {
            let mut out = Vec::with_capacity(text.len() * 2);
            for unit in text.encode_utf16() {
                out.extend_from_slice(&unit.to_le_bytes());
            }
            Ok(out)
        }
        TagTextEncoding::Utf16Be => {
            let mut out = Vec::with_capacity(text.len() * 2);
            for unit in text.encode_utf16() {
                out.extend_from_slice(&unit.to_be_bytes());
            }
            Ok(out)
        }
        TagTextEncoding::Utf8 | TagTextEncoding::Unspecified => Ok(text.as_bytes().to_vec()),
    }
}
