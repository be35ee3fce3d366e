//! The typed holder for a single tag field value.
//!
//! Every backend decodes its on-disk representation into a [`TagValue`] and
//! encodes one back on write. Accessors convert losslessly or fail with
//! [`TagError::ConversionError`]; they never guess.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TagError};
use crate::utils::encoding::{decode_text, encode_text, TagTextEncoding};

/// Position within a set, e.g. track 3 of 12. Either part may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PositionInSet {
    pub position: Option<u32>,
    pub total: Option<u32>,
}

impl PositionInSet {
    pub fn new(position: Option<u32>, total: Option<u32>) -> Self {
        Self { position, total }
    }

    pub fn is_null(&self) -> bool {
        self.position.is_none() && self.total.is_none()
    }

    /// Parse "3", "3/12" or "3 of 12" style strings.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let (pos, total) = match text.split_once('/') {
            Some((p, t)) => (p.trim(), Some(t.trim())),
            None => (text, None),
        };
        let position = pos.parse::<u32>().ok()?;
        let total = match total {
            Some(t) if !t.is_empty() => Some(t.parse::<u32>().ok()?),
            _ => None,
        };
        Some(Self {
            position: Some(position),
            total,
        })
    }
}

impl std::fmt::Display for PositionInSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.position, self.total) {
            (Some(p), Some(t)) => write!(f, "{p}/{t}"),
            (Some(p), None) => write!(f, "{p}"),
            (None, Some(t)) => write!(f, "?/{t}"),
            (None, None) => Ok(()),
        }
    }
}

/// What role an attached picture plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum PictureRole {
    Other = 0,
    FileIcon = 1,
    OtherFileIcon = 2,
    CoverFront = 3,
    CoverBack = 4,
    LeafletPage = 5,
    Media = 6,
    LeadArtist = 7,
    Artist = 8,
    Conductor = 9,
    Band = 10,
    Composer = 11,
    Lyricist = 12,
    RecordingLocation = 13,
    DuringRecording = 14,
    DuringPerformance = 15,
    VideoScreenCapture = 16,
    BrightColouredFish = 17,
    Illustration = 18,
    BandLogo = 19,
    PublisherLogo = 20,
}

impl PictureRole {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => PictureRole::FileIcon,
            2 => PictureRole::OtherFileIcon,
            3 => PictureRole::CoverFront,
            4 => PictureRole::CoverBack,
            5 => PictureRole::LeafletPage,
            6 => PictureRole::Media,
            7 => PictureRole::LeadArtist,
            8 => PictureRole::Artist,
            9 => PictureRole::Conductor,
            10 => PictureRole::Band,
            11 => PictureRole::Composer,
            12 => PictureRole::Lyricist,
            13 => PictureRole::RecordingLocation,
            14 => PictureRole::DuringRecording,
            15 => PictureRole::DuringPerformance,
            16 => PictureRole::VideoScreenCapture,
            17 => PictureRole::BrightColouredFish,
            18 => PictureRole::Illustration,
            19 => PictureRole::BandLogo,
            20 => PictureRole::PublisherLogo,
            _ => PictureRole::Other,
        }
    }
}

/// An attached picture: opaque image bytes plus the outer structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Picture {
    pub mime_type: String,
    pub description: String,
    pub role: PictureRole,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub colors: u32,
    #[serde(
        serialize_with = "crate::serialize_as_base64",
        deserialize_with = "crate::deserialize_base64_to_vec"
    )]
    pub data: Vec<u8>,
}

impl Picture {
    pub fn new(data: Vec<u8>, mime_type: String, description: String) -> Self {
        Picture {
            mime_type,
            description,
            role: PictureRole::CoverFront,
            width: 0,
            height: 0,
            depth: 0,
            colors: 0,
            data,
        }
    }

    /// File extension matching the MIME type, for exported cover files.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/png" => "png",
            "image/gif" => "gif",
            "image/webp" => "webp",
            "image/bmp" => "bmp",
            "image/tiff" => "tiff",
            _ => "jpg",
        }
    }
}

/// A single field value with its declared kind.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TagValue {
    #[default]
    Empty,
    Text {
        data: Vec<u8>,
        encoding: TagTextEncoding,
    },
    Integer(i64),
    PositionInSet(PositionInSet),
    StandardGenreIndex(u16),
    /// A length in time, microsecond resolution.
    TimeSpan(std::time::Duration),
    /// A timestamp kept as its textual form; tag formats store these as text.
    DateTime(String),
    Picture(Box<Picture>),
    Binary(Vec<u8>),
    /// Data of a kind the backend did not recognise; preserved verbatim.
    Undefined(Vec<u8>),
}

impl TagValue {
    /// Build a text value, storing it in the given encoding.
    pub fn text(text: &str, encoding: TagTextEncoding) -> Result<Self> {
        Ok(TagValue::Text {
            data: encode_text(text, encoding)?,
            encoding,
        })
    }

    /// Build a UTF-8 text value. Infallible since UTF-8 covers all strings.
    pub fn utf8(text: impl Into<String>) -> Self {
        TagValue::Text {
            data: text.into().into_bytes(),
            encoding: TagTextEncoding::Utf8,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TagValue::Empty => "empty",
            TagValue::Text { .. } => "text",
            TagValue::Integer(_) => "integer",
            TagValue::PositionInSet(_) => "position in set",
            TagValue::StandardGenreIndex(_) => "standard genre index",
            TagValue::TimeSpan(_) => "time span",
            TagValue::DateTime(_) => "date/time",
            TagValue::Picture(_) => "picture",
            TagValue::Binary(_) => "binary",
            TagValue::Undefined(_) => "undefined",
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            TagValue::Empty => true,
            TagValue::Text { data, .. } => data.is_empty(),
            TagValue::Binary(data) | TagValue::Undefined(data) => data.is_empty(),
            TagValue::PositionInSet(pos) => pos.is_null(),
            TagValue::Picture(picture) => picture.data.is_empty(),
            TagValue::DateTime(text) => text.is_empty(),
            _ => false,
        }
    }

    pub fn declared_encoding(&self) -> TagTextEncoding {
        match self {
            TagValue::Text { encoding, .. } => *encoding,
            _ => TagTextEncoding::Unspecified,
        }
    }

    /// The value as a string, transcoding from the declared encoding.
    pub fn as_text(&self) -> Result<String> {
        match self {
            TagValue::Text { data, encoding } => decode_text(data, *encoding),
            TagValue::Integer(value) => Ok(value.to_string()),
            TagValue::StandardGenreIndex(index) => standard_genre_name(*index)
                .map(str::to_owned)
                .ok_or(TagError::ConversionError {
                    from: "standard genre index",
                    to: "text",
                }),
            TagValue::PositionInSet(pos) => Ok(pos.to_string()),
            TagValue::DateTime(text) => Ok(text.clone()),
            TagValue::Empty => Ok(String::new()),
            other => Err(TagError::ConversionError {
                from: other.kind(),
                to: "text",
            }),
        }
    }

    /// The value as an integer; text converts when it parses losslessly.
    pub fn as_integer(&self) -> Result<i64> {
        match self {
            TagValue::Integer(value) => Ok(*value),
            TagValue::StandardGenreIndex(index) => Ok(*index as i64),
            TagValue::Text { .. } => {
                let text = self.as_text()?;
                text.trim()
                    .parse::<i64>()
                    .map_err(|_| TagError::ConversionError {
                        from: "text",
                        to: "integer",
                    })
            }
            TagValue::PositionInSet(pos) => {
                pos.position
                    .map(|p| p as i64)
                    .ok_or(TagError::ConversionError {
                        from: "position in set",
                        to: "integer",
                    })
            }
            other => Err(TagError::ConversionError {
                from: other.kind(),
                to: "integer",
            }),
        }
    }

    pub fn as_position_in_set(&self) -> Result<PositionInSet> {
        match self {
            TagValue::PositionInSet(pos) => Ok(*pos),
            TagValue::Integer(value) if *value >= 0 => Ok(PositionInSet {
                position: Some(*value as u32),
                total: None,
            }),
            TagValue::Text { .. } => {
                let text = self.as_text()?;
                PositionInSet::parse(&text).ok_or(TagError::ConversionError {
                    from: "text",
                    to: "position in set",
                })
            }
            other => Err(TagError::ConversionError {
                from: other.kind(),
                to: "position in set",
            }),
        }
    }

    pub fn as_standard_genre_index(&self) -> Result<u16> {
        match self {
            TagValue::StandardGenreIndex(index) => Ok(*index),
            TagValue::Integer(value) if (0..=191).contains(value) => Ok(*value as u16),
            TagValue::Text { .. } => {
                let text = self.as_text()?;
                standard_genre_index(&text).ok_or(TagError::ConversionError {
                    from: "text",
                    to: "standard genre index",
                })
            }
            other => Err(TagError::ConversionError {
                from: other.kind(),
                to: "standard genre index",
            }),
        }
    }

    pub fn as_picture(&self) -> Result<&Picture> {
        match self {
            TagValue::Picture(picture) => Ok(picture),
            other => Err(TagError::ConversionError {
                from: other.kind(),
                to: "picture",
            }),
        }
    }

    /// The raw bytes for binary-ish kinds.
    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            TagValue::Binary(data) | TagValue::Undefined(data) => Ok(data),
            TagValue::Text { data, .. } => Ok(data),
            TagValue::Picture(picture) => Ok(&picture.data),
            other => Err(TagError::ConversionError {
                from: other.kind(),
                to: "bytes",
            }),
        }
    }
}

/// ID3v1 standard genre list (indices 0–79 as defined by ID3v1, plus the
/// common Winamp extensions up to 125). Out-of-range indices have no name.
pub const STANDARD_GENRES: [&str; 126] = [
    "Blues", "Classic Rock", "Country", "Dance", "Disco", "Funk", "Grunge", "Hip-Hop", "Jazz",
    "Metal", "New Age", "Oldies", "Other", "Pop", "R&B", "Rap", "Reggae", "Rock", "Techno",
    "Industrial", "Alternative", "Ska", "Death Metal", "Pranks", "Soundtrack", "Euro-Techno",
    "Ambient", "Trip-Hop", "Vocal", "Jazz+Funk", "Fusion", "Trance", "Classical", "Instrumental",
    "Acid", "House", "Game", "Sound Clip", "Gospel", "Noise", "Alternative Rock", "Bass", "Soul",
    "Punk", "Space", "Meditative", "Instrumental Pop", "Instrumental Rock", "Ethnic", "Gothic",
    "Darkwave", "Techno-Industrial", "Electronic", "Pop-Folk", "Eurodance", "Dream",
    "Southern Rock", "Comedy", "Cult", "Gangsta", "Top 40", "Christian Rap", "Pop/Funk", "Jungle",
    "Native American", "Cabaret", "New Wave", "Psychedelic", "Rave", "Showtunes", "Trailer",
    "Lo-Fi", "Tribal", "Acid Punk", "Acid Jazz", "Polka", "Retro", "Musical", "Rock & Roll",
    "Hard Rock", "Folk", "Folk-Rock", "National Folk", "Swing", "Fast Fusion", "Bebob", "Latin",
    "Revival", "Celtic", "Bluegrass", "Avantgarde", "Gothic Rock", "Progressive Rock",
    "Psychedelic Rock", "Symphonic Rock", "Slow Rock", "Big Band", "Chorus", "Easy Listening",
    "Acoustic", "Humour", "Speech", "Chanson", "Opera", "Chamber Music", "Sonata", "Symphony",
    "Booty Bass", "Primus", "Porn Groove", "Satire", "Slow Jam", "Club", "Tango", "Samba",
    "Folklore", "Ballad", "Power Ballad", "Rhythmic Soul", "Freestyle", "Duet", "Punk Rock",
    "Drum Solo", "A Cappella", "Euro-House", "Dance Hall",
];

/// Name for a standard genre index, when defined.
pub fn standard_genre_name(index: u16) -> Option<&'static str> {
    STANDARD_GENRES.get(index as usize).copied()
}

/// Index for a standard genre name, matched case-insensitively.
pub fn standard_genre_index(name: &str) -> Option<u16> {
    STANDARD_GENRES
        .iter()
        .position(|g| g.eq_ignore_ascii_case(name.trim()))
        .map(|i| i as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_value_reports_empty() {
        assert!(TagValue::Empty.is_empty());
        assert!(TagValue::utf8("").is_empty());
        assert!(!TagValue::utf8("x").is_empty());
    }

    #[test]
    fn text_integer_conversion_is_lossless_or_fails() {
        assert_eq!(TagValue::utf8("42").as_integer().unwrap(), 42);
        assert!(TagValue::utf8("forty-two").as_integer().is_err());
        assert!(TagValue::Binary(vec![1, 2]).as_integer().is_err());
    }

    #[test]
    fn latin1_text_reads_back_as_utf8() {
        let value = TagValue::text("Caf\u{e9}", TagTextEncoding::Latin1).unwrap();
        assert_eq!(value.as_text().unwrap(), "Caf\u{e9}");
    }

    #[test]
    fn position_in_set_parses_both_forms() {
        assert_eq!(
            TagValue::utf8("3/12").as_position_in_set().unwrap(),
            PositionInSet::new(Some(3), Some(12))
        );
        assert_eq!(
            TagValue::utf8("7").as_position_in_set().unwrap(),
            PositionInSet::new(Some(7), None)
        );
    }

    #[test]
    fn standard_genre_maps_both_ways() {
        assert_eq!(standard_genre_name(17), Some("Rock"));
        assert_eq!(standard_genre_index("rock"), Some(17));
        assert_eq!(
            TagValue::StandardGenreIndex(8).as_text().unwrap(),
            "Jazz"
        );
        assert_eq!(TagValue::utf8("Jazz").as_standard_genre_index().unwrap(), 8);
    }

    #[test]
    fn picture_accessor_rejects_other_kinds() {
        assert!(TagValue::utf8("x").as_picture().is_err());
        let picture = Picture::new(vec![1], "image/png".into(), String::new());
        assert_eq!(
            TagValue::Picture(Box::new(picture)).as_picture().unwrap().mime_type,
            "image/png"
        );
    }
}
