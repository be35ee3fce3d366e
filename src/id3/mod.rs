// ID3v2 tag codec (v2.3 and v2.4)
//
// MPEG files carry their metadata in a leading ID3v2 region. Frames decode
// into the uniform field model; unrecognized frames are preserved verbatim
// so a rewrite never drops data it did not understand.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::diag::Diagnostics;
use crate::error::{Result, TagError};
use crate::fields::{Field, FieldMap, KnownField};
use crate::utils::encoding::TagTextEncoding;
use crate::utils::io::{read_synchsafe_u32, synchsafe_bytes};
use crate::value::{Picture, PictureRole, TagValue};

/// Frame ids of the known fields.
pub struct Id3FrameIds;
impl Id3FrameIds {
    pub const ALBUM: &'static str = "TALB";
    pub const ALBUM_ARTIST: &'static str = "TPE2";
    pub const ARTIST: &'static str = "TPE1";
    pub const BPM: &'static str = "TBPM";
    pub const COMMENT: &'static str = "COMM";
    pub const COMPOSER: &'static str = "TCOM";
    pub const COVER: &'static str = "APIC";
    pub const DISK_POSITION: &'static str = "TPOS";
    pub const ENCODER: &'static str = "TENC";
    pub const ENCODER_SETTINGS: &'static str = "TSSE";
    pub const GENRE: &'static str = "TCON";
    pub const GROUPING: &'static str = "TIT1";
    pub const LYRICIST: &'static str = "TEXT";
    pub const LYRICS: &'static str = "USLT";
    pub const RECORD_LABEL: &'static str = "TPUB";
    pub const TITLE: &'static str = "TIT2";
    pub const TRACK_POSITION: &'static str = "TRCK";
    pub const YEAR: &'static str = "TDRC";
    /// Pre-2.4 year frame, accepted on read.
    pub const YEAR_LEGACY: &'static str = "TYER";
}

fn encoding_from_byte(byte: u8) -> TagTextEncoding {
    match byte {
        1 => TagTextEncoding::Utf16Le,
        2 => TagTextEncoding::Utf16Be,
        3 => TagTextEncoding::Utf8,
        _ => TagTextEncoding::Latin1,
    }
}

/// The 10-byte tag header.
#[derive(Debug, Clone, Copy)]
pub struct Id3v2Header {
    pub version: (u8, u8),
    pub flags: u8,
    /// Size of the tag body (frames plus padding), header excluded.
    pub size: u32,
}

impl Id3v2Header {
    pub const SIZE: u64 = 10;

    /// Read the header; `None` when no "ID3" marker is present.
    pub fn read<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let mut marker = [0u8; 3];
        reader.read_exact(&mut marker)?;
        if &marker != b"ID3" {
            return Ok(None);
        }
        let version = (reader.read_u8()?, reader.read_u8()?);
        let flags = reader.read_u8()?;
        let size = read_synchsafe_u32(reader)?;
        Ok(Some(Id3v2Header {
            version,
            flags,
            size,
        }))
    }

    pub fn make<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(b"ID3")?;
        out.write_u8(self.version.0)?;
        out.write_u8(self.version.1)?;
        out.write_u8(self.flags)?;
        out.write_all(&synchsafe_bytes(self.size))?;
        Ok(())
    }
}

/// An ID3v2 tag over the ordered field multimap, keyed by frame id.
#[derive(Debug, Clone)]
pub struct Id3v2Tag {
    pub version: (u8, u8),
    pub fields: FieldMap<String>,
}

impl Default for Id3v2Tag {
    fn default() -> Self {
        Id3v2Tag {
            version: (4, 0),
            fields: FieldMap::new(),
        }
    }
}

impl Id3v2Tag {
    pub fn field_id(&self, field: KnownField) -> Option<&'static str> {
        Some(match field {
            KnownField::Album => Id3FrameIds::ALBUM,
            KnownField::AlbumArtist => Id3FrameIds::ALBUM_ARTIST,
            KnownField::Artist => Id3FrameIds::ARTIST,
            KnownField::Bpm => Id3FrameIds::BPM,
            KnownField::Comment => Id3FrameIds::COMMENT,
            KnownField::Composer => Id3FrameIds::COMPOSER,
            KnownField::Cover => Id3FrameIds::COVER,
            KnownField::DiskPosition => Id3FrameIds::DISK_POSITION,
            KnownField::Encoder => Id3FrameIds::ENCODER,
            KnownField::EncoderSettings => Id3FrameIds::ENCODER_SETTINGS,
            KnownField::Genre => Id3FrameIds::GENRE,
            KnownField::Grouping => Id3FrameIds::GROUPING,
            KnownField::Lyricist => Id3FrameIds::LYRICIST,
            KnownField::Lyrics => Id3FrameIds::LYRICS,
            KnownField::RecordLabel => Id3FrameIds::RECORD_LABEL,
            KnownField::Title => Id3FrameIds::TITLE,
            KnownField::TrackPosition => Id3FrameIds::TRACK_POSITION,
            KnownField::Year => {
                if self.version.0 >= 4 {
                    Id3FrameIds::YEAR
                } else {
                    Id3FrameIds::YEAR_LEGACY
                }
            }
            KnownField::Description | KnownField::Performers | KnownField::Rating => return None,
        })
    }

    pub fn known_field(id: &str) -> Option<KnownField> {
        Some(match id {
            Id3FrameIds::ALBUM => KnownField::Album,
            Id3FrameIds::ALBUM_ARTIST => KnownField::AlbumArtist,
            Id3FrameIds::ARTIST => KnownField::Artist,
            Id3FrameIds::BPM => KnownField::Bpm,
            Id3FrameIds::COMMENT => KnownField::Comment,
            Id3FrameIds::COMPOSER => KnownField::Composer,
            Id3FrameIds::COVER => KnownField::Cover,
            Id3FrameIds::DISK_POSITION => KnownField::DiskPosition,
            Id3FrameIds::ENCODER => KnownField::Encoder,
            Id3FrameIds::ENCODER_SETTINGS => KnownField::EncoderSettings,
            Id3FrameIds::GENRE => KnownField::Genre,
            Id3FrameIds::GROUPING => KnownField::Grouping,
            Id3FrameIds::LYRICIST => KnownField::Lyricist,
            Id3FrameIds::LYRICS => KnownField::Lyrics,
            Id3FrameIds::RECORD_LABEL => KnownField::RecordLabel,
            Id3FrameIds::TITLE => KnownField::Title,
            Id3FrameIds::TRACK_POSITION => KnownField::TrackPosition,
            Id3FrameIds::YEAR | Id3FrameIds::YEAR_LEGACY => KnownField::Year,
            _ => return None,
        })
    }

    pub fn value(&self, field: KnownField) -> Option<&TagValue> {
        let id = self.field_id(field)?.to_string();
        self.fields
            .first(&id)
            .or_else(|| {
                // accept the other year frame on read
                if field == KnownField::Year {
                    let alt = if id == Id3FrameIds::YEAR {
                        Id3FrameIds::YEAR_LEGACY
                    } else {
                        Id3FrameIds::YEAR
                    };
                    self.fields.first(&alt.to_string())
                } else {
                    None
                }
            })
            .map(|f| &f.value)
    }

    pub fn set_value(&mut self, field: KnownField, value: TagValue) -> bool {
        let Some(id) = self.field_id(field) else {
            return false;
        };
        if value.is_empty() {
            self.fields.erase_all(&id.to_string());
        } else {
            self.fields.set(id.to_string(), value);
        }
        true
    }

    pub fn has_field(&self, field: KnownField) -> bool {
        self.field_id(field)
            .map(|id| self.fields.has(&id.to_string()))
            .unwrap_or(false)
    }

    /// Parse the tag whose header was already read.
    pub fn parse<R: Read>(
        reader: &mut R,
        header: Id3v2Header,
        diag: &mut Diagnostics,
    ) -> Result<Self> {
        const CONTEXT: &str = "parsing ID3v2 tag";
        if header.version.0 < 3 || header.version.0 > 4 {
            diag.warning(
                CONTEXT,
                format!("ID3v2.{} is not supported; frames are skipped.", header.version.0),
            );
            let mut remaining = vec![0u8; header.size as usize];
            reader.read_exact(&mut remaining)?;
            return Ok(Id3v2Tag {
                version: header.version,
                fields: FieldMap::new(),
            });
        }

        let mut body = vec![0u8; header.size as usize];
        reader.read_exact(&mut body)?;

        let mut tag = Id3v2Tag {
            version: header.version,
            fields: FieldMap::new(),
        };
        let mut pos = 0usize;
        while pos + 10 <= body.len() {
            let id_bytes = &body[pos..pos + 4];
            if id_bytes[0] == 0 {
                break; // padding
            }
            let Ok(frame_id) = std::str::from_utf8(id_bytes) else {
                diag.critical(CONTEXT, "Frame id is not ASCII; rest of tag skipped.");
                break;
            };
            let size = if header.version.0 >= 4 {
                read_synchsafe_u32(&mut &body[pos + 4..pos + 8])?
            } else {
                u32::from_be_bytes(body[pos + 4..pos + 8].try_into().unwrap())
            } as usize;
            let end = pos + 10 + size;
            if end > body.len() {
                diag.critical(
                    CONTEXT,
                    format!("Frame \"{frame_id}\" exceeds the tag and is ignored."),
                );
                break;
            }
            let data = &body[pos + 10..end];
            match decode_frame(frame_id, data) {
                Ok(value) => tag.fields.insert(Field::new(frame_id.to_string(), value)),
                Err(e) if !e.is_fatal() => {
                    diag.critical(CONTEXT, format!("Frame \"{frame_id}\" is invalid ({e})."));
                }
                Err(e) => return Err(e),
            }
            pos = end;
        }
        Ok(tag)
    }

    /// Serialize every frame; the surrounding header and padding belong to
    /// the caller, which knows the region size it is filling.
    pub fn make_frames(&self, diag: &mut Diagnostics) -> Result<Vec<u8>> {
        const CONTEXT: &str = "making ID3v2 tag";
        let mut out = Vec::new();
        for field in self.fields.iter() {
            if field.value.is_empty() {
                continue;
            }
            match encode_frame(&field.id, &field.value, self.version.0) {
                Ok(body) => {
                    out.extend_from_slice(field.id.as_bytes());
                    if self.version.0 >= 4 {
                        out.extend_from_slice(&synchsafe_bytes(body.len() as u32));
                    } else {
                        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
                    }
                    out.extend_from_slice(&[0, 0]); // frame flags
                    out.extend_from_slice(&body);
                }
                Err(e) if !e.is_fatal() => {
                    diag.warning(
                        CONTEXT,
                        format!("Frame \"{}\" cannot be made ({e}); skipped.", field.id),
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Write the complete tag region: header, frames, `padding` zero bytes.
    pub fn make<W: Write>(&self, out: &mut W, padding: u32, diag: &mut Diagnostics) -> Result<u32> {
        let frames = self.make_frames(diag)?;
        let size = frames.len() as u32 + padding;
        Id3v2Header {
            version: self.version,
            flags: 0,
            size,
        }
        .make(out)?;
        out.write_all(&frames)?;
        out.write_all(&vec![0u8; padding as usize])?;
        Ok(size + Id3v2Header::SIZE as u32)
    }
}

/// The preferred text encoding byte for the tag version.
fn preferred_encoding(version_major: u8) -> (u8, TagTextEncoding) {
    if version_major >= 4 {
        (3, TagTextEncoding::Utf8)
    } else {
        // v2.3 knows only Latin-1 and UTF-16; UTF-16 keeps everything
        (1, TagTextEncoding::Utf16Le)
    }
}

fn decode_frame(frame_id: &str, data: &[u8]) -> Result<TagValue> {
    match frame_id {
        id if id.starts_with('T') && id != "TXXX" => {
            if data.is_empty() {
                return Ok(TagValue::Empty);
            }
            let encoding = encoding_from_byte(data[0]);
            let mut text = &data[1..];
            // strip the optional terminator; UTF-16 terminates in pairs
            match encoding {
                TagTextEncoding::Utf16Le | TagTextEncoding::Utf16Be => {
                    while text.len() >= 2 && text[text.len() - 2..] == [0, 0] {
                        text = &text[..text.len() - 2];
                    }
                }
                _ => {
                    while let Some((&0, rest)) = text.split_last() {
                        text = rest;
                    }
                }
            }
            Ok(TagValue::Text {
                data: text.to_vec(),
                encoding,
            })
        }
        "COMM" | "USLT" => {
            if data.len() < 4 {
                return Err(TagError::Truncated {
                    context: "COMM/USLT frame",
                });
            }
            let encoding = encoding_from_byte(data[0]);
            // language (3 bytes), then descriptor terminated per encoding
            let body = &data[4..];
            let text = skip_terminated(body, encoding).ok_or(TagError::Truncated {
                context: "COMM/USLT frame",
            })?;
            Ok(TagValue::Text {
                data: text.to_vec(),
                encoding,
            })
        }
        "APIC" => {
            if data.len() < 2 {
                return Err(TagError::Truncated {
                    context: "APIC frame",
                });
            }
            let encoding = encoding_from_byte(data[0]);
            let rest = &data[1..];
            let mime_end = rest.iter().position(|&b| b == 0).ok_or(TagError::Truncated {
                context: "APIC frame",
            })?;
            let mime_type = String::from_utf8_lossy(&rest[..mime_end]).into_owned();
            let rest = &rest[mime_end + 1..];
            if rest.is_empty() {
                return Err(TagError::Truncated {
                    context: "APIC frame",
                });
            }
            let role = PictureRole::from_u32(rest[0] as u32);
            let payload = skip_terminated(&rest[1..], encoding).ok_or(TagError::Truncated {
                context: "APIC frame",
            })?;
            Ok(TagValue::Picture(Box::new(Picture {
                mime_type,
                description: String::new(),
                role,
                width: 0,
                height: 0,
                depth: 0,
                colors: 0,
                data: payload.to_vec(),
            })))
        }
        _ => Ok(TagValue::Undefined(data.to_vec())),
    }
}

/// Skip one string terminated per the encoding, returning what follows.
fn skip_terminated(data: &[u8], encoding: TagTextEncoding) -> Option<&[u8]> {
    match encoding {
        TagTextEncoding::Utf16Le | TagTextEncoding::Utf16Be => {
            let mut i = 0;
            while i + 2 <= data.len() {
                if data[i] == 0 && data[i + 1] == 0 {
                    return Some(&data[i + 2..]);
                }
                i += 2;
            }
            None
        }
        _ => data
            .iter()
            .position(|&b| b == 0)
            .map(|i| &data[i + 1..]),
    }
}

/// Encode frame text, with the BOM that encoding byte 1 requires.
fn frame_text_bytes(text: &str, encoding: TagTextEncoding) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    if encoding == TagTextEncoding::Utf16Le {
        out.extend_from_slice(&[0xFF, 0xFE]);
    }
    out.extend_from_slice(&crate::utils::encoding::encode_text(text, encoding)?);
    Ok(out)
}

fn encode_frame(frame_id: &str, value: &TagValue, version_major: u8) -> Result<Vec<u8>> {
    let (encoding_byte, encoding) = preferred_encoding(version_major);
    match frame_id {
        id if id.starts_with('T') && id != "TXXX" => {
            let text = value.as_text()?;
            let mut out = vec![encoding_byte];
            out.extend_from_slice(&frame_text_bytes(&text, encoding)?);
            Ok(out)
        }
        "COMM" | "USLT" => {
            let text = value.as_text()?;
            let mut out = vec![encoding_byte];
            out.extend_from_slice(b"eng");
            // empty descriptor
            match encoding {
                TagTextEncoding::Utf16Le | TagTextEncoding::Utf16Be => {
                    out.extend_from_slice(&[0, 0])
                }
                _ => out.push(0),
            }
            out.extend_from_slice(&frame_text_bytes(&text, encoding)?);
            Ok(out)
        }
        "APIC" => {
            let picture = value.as_picture()?;
            let mut out = vec![0u8]; // Latin-1 descriptor, always representable here
            out.extend_from_slice(picture.mime_type.as_bytes());
            out.push(0);
            out.push(picture.role as u8);
            out.push(0); // empty description
            out.extend_from_slice(&picture.data);
            Ok(out)
        }
        _ => match value {
            TagValue::Undefined(data) | TagValue::Binary(data) => Ok(data.clone()),
            _ => {
                let text = value.as_text()?;
                let mut out = vec![encoding_byte];
                out.extend_from_slice(&frame_text_bytes(&text, encoding)?);
                Ok(out)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(tag: &Id3v2Tag, padding: u32) -> (Id3v2Tag, Diagnostics) {
        let mut diag = Diagnostics::new();
        let mut out = Vec::new();
        tag.make(&mut out, padding, &mut diag).unwrap();

        let mut cursor = Cursor::new(out);
        let header = Id3v2Header::read(&mut cursor).unwrap().expect("ID3 marker");
        let parsed = Id3v2Tag::parse(&mut cursor, header, &mut diag).unwrap();
        (parsed, diag)
    }

    #[test]
    fn header_size_is_synchsafe() {
        let mut out = Vec::new();
        Id3v2Header {
            version: (4, 0),
            flags: 0,
            size: 0x0FFF_FFFF,
        }
        .make(&mut out)
        .unwrap();
        assert!(out[6..10].iter().all(|b| b & 0x80 == 0));

        let parsed = Id3v2Header::read(&mut Cursor::new(out)).unwrap().unwrap();
        assert_eq!(parsed.size, 0x0FFF_FFFF);
    }

    #[test]
    fn non_id3_stream_reads_as_none() {
        let mut cursor = Cursor::new(b"fLaC......".to_vec());
        assert!(Id3v2Header::read(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn text_frames_round_trip_v4() {
        let mut tag = Id3v2Tag::default();
        tag.set_value(KnownField::Title, TagValue::utf8("Title"));
        tag.set_value(KnownField::Artist, TagValue::utf8("Artist \u{e9}"));
        tag.set_value(KnownField::Year, TagValue::utf8("2003"));

        let (parsed, diag) = round_trip(&tag, 64);
        assert!(diag.is_empty());
        assert_eq!(
            parsed.value(KnownField::Artist).unwrap().as_text().unwrap(),
            "Artist \u{e9}"
        );
        assert_eq!(
            parsed.value(KnownField::Year).unwrap().as_text().unwrap(),
            "2003"
        );
    }

    #[test]
    fn v3_uses_utf16_and_plain_frame_sizes() {
        let mut tag = Id3v2Tag {
            version: (3, 0),
            fields: FieldMap::new(),
        };
        tag.set_value(KnownField::Title, TagValue::utf8("T\u{6f22}"));

        let (parsed, diag) = round_trip(&tag, 0);
        assert!(diag.is_empty());
        assert_eq!(
            parsed.value(KnownField::Title).unwrap().as_text().unwrap(),
            "T\u{6f22}"
        );
        // legacy year id is selected for writing
        assert_eq!(tag.field_id(KnownField::Year), Some("TYER"));
    }

    #[test]
    fn legacy_year_frame_is_readable_as_year() {
        let mut tag = Id3v2Tag::default();
        tag.fields.insert(Field::new(
            Id3FrameIds::YEAR_LEGACY.to_string(),
            TagValue::utf8("1999"),
        ));
        assert_eq!(
            tag.value(KnownField::Year).unwrap().as_text().unwrap(),
            "1999"
        );
    }

    #[test]
    fn cover_and_lyrics_round_trip() {
        let mut tag = Id3v2Tag::default();
        tag.set_value(KnownField::Lyrics, TagValue::utf8("la la"));
        tag.set_value(
            KnownField::Cover,
            TagValue::Picture(Box::new(Picture::new(
                vec![1, 2, 3],
                "image/png".into(),
                String::new(),
            ))),
        );

        let (parsed, diag) = round_trip(&tag, 16);
        assert!(diag.is_empty());
        assert_eq!(
            parsed.value(KnownField::Lyrics).unwrap().as_text().unwrap(),
            "la la"
        );
        let cover = parsed.value(KnownField::Cover).unwrap().as_picture().unwrap();
        assert_eq!(cover.mime_type, "image/png");
        assert_eq!(cover.data, vec![1, 2, 3]);
    }

    #[test]
    fn unknown_frames_survive_verbatim() {
        let mut tag = Id3v2Tag::default();
        tag.fields.insert(Field::new(
            "PRIV".to_string(),
            TagValue::Undefined(vec![9, 8, 7]),
        ));
        let (parsed, _) = round_trip(&tag, 0);
        let field = parsed.fields.first(&"PRIV".to_string()).unwrap();
        assert_eq!(field.value, TagValue::Undefined(vec![9, 8, 7]));
    }
}
