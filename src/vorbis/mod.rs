// Vorbis comment codec, shared by FLAC and the Ogg family
//
// Layout: vendor length (u32 LE) + vendor UTF-8 + field count (u32 LE) +
// count x (length u32 LE + "KEY=VALUE" UTF-8). The leading "\x03vorbis"
// signature and the trailing framing byte only exist inside Ogg packets,
// so both are controlled by flags.

use std::io::Read;

use base64::prelude::*;
use byteorder::{LittleEndian, ReadBytesExt};

use crate::diag::Diagnostics;
use crate::error::{Result, TagError};
use crate::fields::{Field, FieldMap, KnownField};
use crate::flac::picture::{make_picture, parse_picture};
use crate::value::TagValue;

/// Vendor string written into comments this library creates.
pub const DEFAULT_VENDOR: &str = concat!("ferrotag v", env!("CARGO_PKG_VERSION"));

/// Layout options for parsing and making a comment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VorbisCommentFlags {
    /// No "\x03vorbis" signature precedes the comment (FLAC).
    pub no_signature: bool,
    /// No framing byte follows the comment (FLAC).
    pub no_framing_byte: bool,
    /// Cover fields are not serialized inline; FLAC moves them into
    /// separate PICTURE blocks.
    pub no_covers: bool,
}

impl VorbisCommentFlags {
    /// The flag set used for comments embedded in FLAC metadata blocks.
    pub fn flac() -> Self {
        VorbisCommentFlags {
            no_signature: true,
            no_framing_byte: true,
            no_covers: true,
        }
    }

    /// The flag set used for comment packets inside Ogg Vorbis streams.
    pub fn ogg() -> Self {
        VorbisCommentFlags::default()
    }
}

/// Well-known Vorbis field names.
pub struct VorbisKeys;
impl VorbisKeys {
    pub const TITLE: &'static str = "TITLE";
    pub const ARTIST: &'static str = "ARTIST";
    pub const ALBUM: &'static str = "ALBUM";
    pub const ALBUM_ARTIST: &'static str = "ALBUMARTIST";
    pub const DATE: &'static str = "DATE";
    pub const TRACK_NUMBER: &'static str = "TRACKNUMBER";
    pub const TRACK_TOTAL: &'static str = "TRACKTOTAL";
    pub const DISC_NUMBER: &'static str = "DISCNUMBER";
    pub const GENRE: &'static str = "GENRE";
    pub const COMMENT: &'static str = "COMMENT";
    pub const COMPOSER: &'static str = "COMPOSER";
    pub const ENCODER: &'static str = "ENCODER";
    pub const ENCODER_SETTINGS: &'static str = "ENCODING";
    pub const LYRICS: &'static str = "LYRICS";
    pub const LYRICIST: &'static str = "LYRICIST";
    pub const BPM: &'static str = "BPM";
    pub const RATING: &'static str = "RATING";
    pub const GROUPING: &'static str = "GROUPING";
    pub const DESCRIPTION: &'static str = "DESCRIPTION";
    pub const LABEL: &'static str = "LABEL";
    pub const PERFORMER: &'static str = "PERFORMER";
    pub const COVER: &'static str = "METADATA_BLOCK_PICTURE";
}

/// A parsed Vorbis comment: vendor string plus the ordered field multimap.
#[derive(Debug, Clone, Default)]
pub struct VorbisComment {
    pub vendor: TagValue,
    pub fields: FieldMap<String>,
}

impl VorbisComment {
    pub fn new() -> Self {
        VorbisComment {
            vendor: TagValue::utf8(DEFAULT_VENDOR),
            fields: FieldMap::new(),
        }
    }

    /// The Vorbis key for a known field.
    pub fn field_id(field: KnownField) -> &'static str {
        match field {
            KnownField::Album => VorbisKeys::ALBUM,
            KnownField::AlbumArtist => VorbisKeys::ALBUM_ARTIST,
            KnownField::Artist => VorbisKeys::ARTIST,
            KnownField::Bpm => VorbisKeys::BPM,
            KnownField::Comment => VorbisKeys::COMMENT,
            KnownField::Composer => VorbisKeys::COMPOSER,
            KnownField::Cover => VorbisKeys::COVER,
            KnownField::Description => VorbisKeys::DESCRIPTION,
            KnownField::DiskPosition => VorbisKeys::DISC_NUMBER,
            KnownField::Encoder => VorbisKeys::ENCODER,
            KnownField::EncoderSettings => VorbisKeys::ENCODER_SETTINGS,
            KnownField::Genre => VorbisKeys::GENRE,
            KnownField::Grouping => VorbisKeys::GROUPING,
            KnownField::Lyricist => VorbisKeys::LYRICIST,
            KnownField::Lyrics => VorbisKeys::LYRICS,
            KnownField::Performers => VorbisKeys::PERFORMER,
            KnownField::Rating => VorbisKeys::RATING,
            KnownField::RecordLabel => VorbisKeys::LABEL,
            KnownField::Title => VorbisKeys::TITLE,
            KnownField::TrackPosition => VorbisKeys::TRACK_NUMBER,
            KnownField::Year => VorbisKeys::DATE,
        }
    }

    /// The known field for a Vorbis key, when one maps.
    pub fn known_field(id: &str) -> Option<KnownField> {
        let id = id.to_ascii_uppercase();
        Some(match id.as_str() {
            VorbisKeys::ALBUM => KnownField::Album,
            VorbisKeys::ALBUM_ARTIST => KnownField::AlbumArtist,
            VorbisKeys::ARTIST => KnownField::Artist,
            VorbisKeys::BPM => KnownField::Bpm,
            VorbisKeys::COMMENT => KnownField::Comment,
            VorbisKeys::COMPOSER => KnownField::Composer,
            VorbisKeys::COVER => KnownField::Cover,
            VorbisKeys::DESCRIPTION => KnownField::Description,
            VorbisKeys::DISC_NUMBER => KnownField::DiskPosition,
            VorbisKeys::ENCODER => KnownField::Encoder,
            VorbisKeys::ENCODER_SETTINGS => KnownField::EncoderSettings,
            VorbisKeys::GENRE => KnownField::Genre,
            VorbisKeys::GROUPING => KnownField::Grouping,
            VorbisKeys::LYRICIST => KnownField::Lyricist,
            VorbisKeys::LYRICS => KnownField::Lyrics,
            VorbisKeys::PERFORMER => KnownField::Performers,
            VorbisKeys::RATING => KnownField::Rating,
            VorbisKeys::LABEL => KnownField::RecordLabel,
            VorbisKeys::TITLE => KnownField::Title,
            VorbisKeys::TRACK_NUMBER => KnownField::TrackPosition,
            VorbisKeys::DATE => KnownField::Year,
            _ => return None,
        })
    }

    pub fn value(&self, field: KnownField) -> Option<&TagValue> {
        self.fields
            .first(&Self::field_id(field).to_string())
            .map(|f| &f.value)
    }

    pub fn set_value(&mut self, field: KnownField, value: TagValue) {
        let id = Self::field_id(field).to_string();
        if value.is_empty() {
            self.fields.erase_all(&id);
        } else {
            self.fields.set(id, value);
        }
    }

    pub fn has_field(&self, field: KnownField) -> bool {
        self.fields.has(&Self::field_id(field).to_string())
    }

    /// Parse a comment from `data`, merging fields into this instance.
    ///
    /// Structural problems confined to a single field are diagnosed and
    /// skipped; truncation of the outer structure is returned as an error.
    pub fn parse(
        &mut self,
        data: &[u8],
        flags: VorbisCommentFlags,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        const CONTEXT: &str = "parsing Vorbis comment";
        let mut cursor = data;

        if !flags.no_signature {
            let mut signature = [0u8; 7];
            cursor.read_exact(&mut signature).map_err(|_| truncated())?;
            if &signature != b"\x03vorbis" {
                return Err(TagError::InvalidData(
                    "Vorbis comment signature not found".into(),
                ));
            }
        }

        let vendor_len = cursor.read_u32::<LittleEndian>().map_err(|_| truncated())? as usize;
        let vendor = take(&mut cursor, vendor_len)?;
        self.vendor = TagValue::utf8(String::from_utf8_lossy(vendor).into_owned());

        let count = cursor.read_u32::<LittleEndian>().map_err(|_| truncated())?;
        for _ in 0..count {
            let len = cursor.read_u32::<LittleEndian>().map_err(|_| truncated())? as usize;
            let raw = take(&mut cursor, len)?;

            let text = match std::str::from_utf8(raw) {
                Ok(text) => text,
                Err(_) => {
                    diag.critical(CONTEXT, "Field is not valid UTF-8 and will be ignored.");
                    continue;
                }
            };
            let Some((key, value)) = text.split_once('=') else {
                diag.critical(
                    CONTEXT,
                    format!("Field \"{text}\" has no '=' and will be ignored."),
                );
                continue;
            };

            if key.eq_ignore_ascii_case(VorbisKeys::COVER) {
                self.insert_encoded_cover(value, diag);
            } else {
                self.fields
                    .insert(Field::new(key.to_string(), TagValue::utf8(value)));
            }
        }

        if !flags.no_framing_byte {
            let mut framing = [0u8; 1];
            cursor.read_exact(&mut framing).map_err(|_| truncated())?;
            if framing[0] & 0x01 == 0 {
                diag.warning(CONTEXT, "Framing bit is not set.");
            }
        }
        Ok(())
    }

    fn insert_encoded_cover(&mut self, value: &str, diag: &mut Diagnostics) {
        const CONTEXT: &str = "parsing Vorbis comment";
        let decoded = match BASE64_STANDARD.decode(value.trim()) {
            Ok(decoded) => decoded,
            Err(_) => {
                diag.critical(CONTEXT, "Cover field is not valid base64 and will be ignored.");
                return;
            }
        };
        match parse_picture(&decoded) {
            Ok(picture) => {
                let role = picture.role as u32;
                self.fields.insert(Field::with_type_info(
                    VorbisKeys::COVER.to_string(),
                    TagValue::Picture(Box::new(picture)),
                    role,
                ));
            }
            Err(_) => {
                diag.critical(CONTEXT, "Cover field holds no valid picture structure.");
            }
        }
    }

    /// Serialize the comment. Cover fields are skipped under `no_covers`
    /// and base64-encoded otherwise.
    pub fn make(&self, flags: VorbisCommentFlags, diag: &mut Diagnostics) -> Result<Vec<u8>> {
        const CONTEXT: &str = "making Vorbis comment";
        let mut out = Vec::with_capacity(64 + self.fields.len() * 32);

        if !flags.no_signature {
            out.extend_from_slice(b"\x03vorbis");
        }

        let vendor = self.vendor.as_text().unwrap_or_default();
        out.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
        out.extend_from_slice(vendor.as_bytes());

        let mut entries: Vec<Vec<u8>> = Vec::with_capacity(self.fields.len());
        let push_entry = |key: &str, value: &str, entries: &mut Vec<Vec<u8>>| {
            let mut entry = Vec::with_capacity(key.len() + 1 + value.len());
            entry.extend_from_slice(key.as_bytes());
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            entries.push(entry);
        };
        for field in self.fields.iter() {
            if field.value.is_empty() {
                continue;
            }
            let is_cover = field.id.eq_ignore_ascii_case(VorbisKeys::COVER);
            if is_cover && flags.no_covers {
                continue;
            }
            if is_cover {
                match field.value.as_picture() {
                    Ok(picture) => push_entry(
                        &field.id,
                        &BASE64_STANDARD.encode(make_picture(picture)),
                        &mut entries,
                    ),
                    Err(_) => {
                        diag.warning(CONTEXT, "Cover field holds no picture; skipped.");
                    }
                }
                continue;
            }
            // a position splits into NUMBER and the conventional TOTAL key
            if let (TagValue::PositionInSet(pos), Some(total_key)) =
                (&field.value, total_key_for(&field.id))
            {
                if let Some(position) = pos.position {
                    push_entry(&field.id, &position.to_string(), &mut entries);
                }
                if let Some(total) = pos.total {
                    if !self.fields.has(&total_key.to_string()) {
                        push_entry(total_key, &total.to_string(), &mut entries);
                    }
                }
                continue;
            }
            match field.value.as_text() {
                Ok(text) => push_entry(&field.id, &text, &mut entries),
                Err(_) => {
                    diag.warning(
                        CONTEXT,
                        format!("Field \"{}\" is not representable as text; skipped.", field.id),
                    );
                }
            }
        }

        out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        for entry in entries {
            out.extend_from_slice(&(entry.len() as u32).to_le_bytes());
            out.extend_from_slice(&entry);
        }

        if !flags.no_framing_byte {
            out.push(1);
        }
        Ok(out)
    }

    /// Exact size [`VorbisComment::make`] will produce with the same flags.
    ///
    /// The preflight serializes into memory; the comment is small compared
    /// to the surrounding file, so exactness beats arithmetic kept in sync
    /// by hand.
    pub fn required_size(&self, flags: VorbisCommentFlags) -> u64 {
        let mut scratch = Diagnostics::new();
        self.make(flags, &mut scratch)
            .map(|bytes| bytes.len() as u64)
            .unwrap_or(0)
    }

    /// The cover fields in insertion order.
    pub fn covers(&self) -> impl Iterator<Item = &Field<String>> {
        self.fields
            .iter()
            .filter(|f| f.id.eq_ignore_ascii_case(VorbisKeys::COVER))
    }

    pub fn has_covers(&self) -> bool {
        self.covers().next().is_some()
    }
}

/// The conventional TOTAL companion of a position-carrying key.
fn total_key_for(key: &str) -> Option<&'static str> {
    if key.eq_ignore_ascii_case(VorbisKeys::TRACK_NUMBER) {
        Some(VorbisKeys::TRACK_TOTAL)
    } else if key.eq_ignore_ascii_case(VorbisKeys::DISC_NUMBER) {
        Some("DISCTOTAL")
    } else {
        None
    }
}

fn take<'a>(cursor: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if cursor.len() < len {
        return Err(truncated());
    }
    let (head, tail) = cursor.split_at(len);
    *cursor = tail;
    Ok(head)
}

fn truncated() -> TagError {
    TagError::Truncated {
        context: "Vorbis comment",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Picture, PictureRole};

    fn build_raw_comment(vendor: &str, fields: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
        out.extend_from_slice(vendor.as_bytes());
        out.extend_from_slice(&(fields.len() as u32).to_le_bytes());
        for field in fields {
            out.extend_from_slice(&(field.len() as u32).to_le_bytes());
            out.extend_from_slice(field.as_bytes());
        }
        out
    }

    #[test]
    fn parses_vendor_and_fields() {
        let data = build_raw_comment("test vendor", &["ARTIST=X", "TITLE=Y"]);
        let mut comment = VorbisComment::default();
        let mut diag = Diagnostics::new();
        comment
            .parse(&data, VorbisCommentFlags::flac(), &mut diag)
            .unwrap();
        assert_eq!(comment.vendor.as_text().unwrap(), "test vendor");
        assert_eq!(
            comment.value(KnownField::Artist).unwrap().as_text().unwrap(),
            "X"
        );
        assert!(diag.is_empty());
    }

    #[test]
    fn field_without_equals_is_diagnosed_not_fatal() {
        let data = build_raw_comment("v", &["NOEQUALS", "ARTIST=X"]);
        let mut comment = VorbisComment::default();
        let mut diag = Diagnostics::new();
        comment
            .parse(&data, VorbisCommentFlags::flac(), &mut diag)
            .unwrap();
        assert!(diag.has_critical());
        assert!(comment.has_field(KnownField::Artist));
    }

    #[test]
    fn truncated_outer_structure_errors() {
        let mut data = build_raw_comment("v", &["ARTIST=X"]);
        data.truncate(data.len() - 3);
        let mut comment = VorbisComment::default();
        let mut diag = Diagnostics::new();
        let err = comment
            .parse(&data, VorbisCommentFlags::flac(), &mut diag)
            .unwrap_err();
        assert!(matches!(err, TagError::Truncated { .. }));
    }

    #[test]
    fn make_round_trips_and_matches_required_size() {
        let mut comment = VorbisComment::new();
        comment.set_value(KnownField::Artist, TagValue::utf8("Someone"));
        comment.set_value(KnownField::Title, TagValue::utf8("Something"));

        let flags = VorbisCommentFlags::flac();
        let mut diag = Diagnostics::new();
        let bytes = comment.make(flags, &mut diag).unwrap();
        assert_eq!(bytes.len() as u64, comment.required_size(flags));

        let mut parsed = VorbisComment::default();
        parsed.parse(&bytes, flags, &mut diag).unwrap();
        assert_eq!(
            parsed.value(KnownField::Artist).unwrap().as_text().unwrap(),
            "Someone"
        );
        assert_eq!(parsed.fields.len(), comment.fields.len());
    }

    #[test]
    fn ogg_flags_round_trip_signature_and_framing() {
        let mut comment = VorbisComment::new();
        comment.set_value(KnownField::Genre, TagValue::utf8("Jazz"));

        let flags = VorbisCommentFlags::ogg();
        let mut diag = Diagnostics::new();
        let bytes = comment.make(flags, &mut diag).unwrap();
        assert_eq!(&bytes[..7], b"\x03vorbis");
        assert_eq!(*bytes.last().unwrap(), 1);
        assert_eq!(bytes.len() as u64, comment.required_size(flags));

        let mut parsed = VorbisComment::default();
        parsed.parse(&bytes, flags, &mut diag).unwrap();
        assert_eq!(
            parsed.value(KnownField::Genre).unwrap().as_text().unwrap(),
            "Jazz"
        );
    }

    #[test]
    fn covers_base64_round_trip_in_ogg_layout() {
        let picture = Picture {
            mime_type: "image/jpeg".into(),
            description: String::new(),
            role: PictureRole::CoverFront,
            width: 0,
            height: 0,
            depth: 0,
            colors: 0,
            data: vec![1, 2, 3, 4, 5],
        };
        let mut comment = VorbisComment::new();
        comment.fields.insert(Field::with_type_info(
            VorbisKeys::COVER.to_string(),
            TagValue::Picture(Box::new(picture.clone())),
            PictureRole::CoverFront as u32,
        ));

        let flags = VorbisCommentFlags::ogg();
        let mut diag = Diagnostics::new();
        let bytes = comment.make(flags, &mut diag).unwrap();
        assert_eq!(bytes.len() as u64, comment.required_size(flags));

        let mut parsed = VorbisComment::default();
        parsed.parse(&bytes, flags, &mut diag).unwrap();
        let cover = parsed.covers().next().expect("cover present");
        assert_eq!(*cover.value.as_picture().unwrap(), picture);
    }

    #[test]
    fn position_in_set_splits_into_number_and_total() {
        use crate::value::PositionInSet;

        let mut comment = VorbisComment::new();
        comment.set_value(
            KnownField::TrackPosition,
            TagValue::PositionInSet(PositionInSet::new(Some(3), Some(12))),
        );

        let flags = VorbisCommentFlags::flac();
        let mut diag = Diagnostics::new();
        let bytes = comment.make(flags, &mut diag).unwrap();
        assert_eq!(bytes.len() as u64, comment.required_size(flags));

        let mut parsed = VorbisComment::default();
        parsed.parse(&bytes, flags, &mut diag).unwrap();
        assert_eq!(
            parsed
                .value(KnownField::TrackPosition)
                .unwrap()
                .as_text()
                .unwrap(),
            "3"
        );
        assert_eq!(
            parsed
                .fields
                .first(&VorbisKeys::TRACK_TOTAL.to_string())
                .unwrap()
                .value
                .as_text()
                .unwrap(),
            "12"
        );
    }

    #[test]
    fn covers_are_omitted_under_flac_flags() {
        let mut comment = VorbisComment::new();
        comment.fields.insert(Field::new(
            VorbisKeys::COVER.to_string(),
            TagValue::Picture(Box::new(Picture::new(
                vec![1],
                "image/png".into(),
                String::new(),
            ))),
        ));
        let mut diag = Diagnostics::new();
        let bytes = comment.make(VorbisCommentFlags::flac(), &mut diag).unwrap();

        let mut parsed = VorbisComment::default();
        parsed
            .parse(&bytes, VorbisCommentFlags::flac(), &mut diag)
            .unwrap();
        assert!(!parsed.has_covers());
    }
}
