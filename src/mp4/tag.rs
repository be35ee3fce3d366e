// iTunes-style tag stored in the ilst atom under moov/udta/meta

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::diag::Diagnostics;
use crate::error::{Result, TagError};
use crate::fields::{Field, FieldId, FieldMap, KnownField};
use crate::mp4::atom::AtomArena;
use crate::mp4::ids::{atom_ids, data_types, extended_ids, fourcc_string, tag_ids, HANDLER_TYPE_MDIR_APPL};
use crate::utils::encoding::TagTextEncoding;
use crate::value::{Picture, PictureRole, PositionInSet, TagValue};

/// Identifier of one ilst entry: a plain atom id, or the mean/name pair of
/// an extended ("----") atom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mp4FieldId {
    Atom(u32),
    Extended { mean: String, name: String },
}

impl Mp4FieldId {
    pub fn extended(mean: &str, name: &str) -> Self {
        Mp4FieldId::Extended {
            mean: mean.to_string(),
            name: name.to_string(),
        }
    }

    /// The atom id this identifier serializes under.
    pub fn atom_id(&self) -> u32 {
        match self {
            Mp4FieldId::Atom(id) => *id,
            Mp4FieldId::Extended { .. } => tag_ids::EXTENDED,
        }
    }
}

impl FieldId for Mp4FieldId {
    fn matches(&self, other: &Self) -> bool {
        self == other
    }
}

/// The fixed meta payload prefix: 4 bytes of meta version/flags followed by
/// the 33-byte hdlr atom declaring the "mdirappl" handler.
const HDLR_LITERAL: [u8; 37] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x21, 0x68, 0x64, 0x6C, 0x72, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x6D, 0x64, 0x69, 0x72, 0x61, 0x70, 0x70, 0x6C, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// An iTunes metadata list.
#[derive(Debug, Clone, Default)]
pub struct Mp4Tag {
    pub fields: FieldMap<Mp4FieldId>,
    /// Version byte of the hdlr atom, when one was parsed.
    pub version: Option<u8>,
}

impl Mp4Tag {
    /// The field identifier a known field serializes under.
    pub fn field_id(field: KnownField) -> Mp4FieldId {
        match field {
            KnownField::Album => Mp4FieldId::Atom(tag_ids::ALBUM),
            KnownField::AlbumArtist => Mp4FieldId::Atom(tag_ids::ALBUM_ARTIST),
            KnownField::Artist => Mp4FieldId::Atom(tag_ids::ARTIST),
            KnownField::Bpm => Mp4FieldId::Atom(tag_ids::BPM),
            KnownField::Comment => Mp4FieldId::Atom(tag_ids::COMMENT),
            KnownField::Composer => Mp4FieldId::Atom(tag_ids::COMPOSER),
            KnownField::Cover => Mp4FieldId::Atom(tag_ids::COVER),
            KnownField::Description => Mp4FieldId::Atom(tag_ids::DESCRIPTION),
            KnownField::DiskPosition => Mp4FieldId::Atom(tag_ids::DISK_POSITION),
            KnownField::Encoder => Mp4FieldId::Atom(tag_ids::ENCODER),
            KnownField::EncoderSettings => {
                Mp4FieldId::extended(extended_ids::ITUNES_MEAN, extended_ids::CDEC)
            }
            KnownField::Genre => Mp4FieldId::Atom(tag_ids::GENRE),
            KnownField::Grouping => Mp4FieldId::Atom(tag_ids::GROUPING),
            KnownField::Lyricist => Mp4FieldId::Atom(tag_ids::LYRICIST),
            KnownField::Lyrics => Mp4FieldId::Atom(tag_ids::LYRICS),
            KnownField::Performers => Mp4FieldId::Atom(tag_ids::PERFORMERS),
            KnownField::Rating => Mp4FieldId::Atom(tag_ids::RATING),
            KnownField::RecordLabel => Mp4FieldId::Atom(tag_ids::RECORD_LABEL),
            KnownField::Title => Mp4FieldId::Atom(tag_ids::TITLE),
            KnownField::TrackPosition => Mp4FieldId::Atom(tag_ids::TRACK_POSITION),
            KnownField::Year => Mp4FieldId::Atom(tag_ids::YEAR),
        }
    }

    /// The known field an atom id maps to, when one does.
    pub fn known_field(id: &Mp4FieldId) -> Option<KnownField> {
        let atom = match id {
            Mp4FieldId::Atom(atom) => *atom,
            Mp4FieldId::Extended { mean, name } => {
                return (mean == extended_ids::ITUNES_MEAN && name == extended_ids::CDEC)
                    .then_some(KnownField::EncoderSettings)
            }
        };
        Some(match atom {
            tag_ids::ALBUM => KnownField::Album,
            tag_ids::ALBUM_ARTIST => KnownField::AlbumArtist,
            tag_ids::ARTIST => KnownField::Artist,
            tag_ids::BPM => KnownField::Bpm,
            tag_ids::COMMENT => KnownField::Comment,
            tag_ids::COMPOSER => KnownField::Composer,
            tag_ids::COVER => KnownField::Cover,
            tag_ids::DESCRIPTION => KnownField::Description,
            tag_ids::DISK_POSITION => KnownField::DiskPosition,
            tag_ids::ENCODER => KnownField::Encoder,
            tag_ids::GENRE | tag_ids::PRE_DEFINED_GENRE => KnownField::Genre,
            tag_ids::GROUPING => KnownField::Grouping,
            tag_ids::LYRICIST => KnownField::Lyricist,
            tag_ids::LYRICS => KnownField::Lyrics,
            tag_ids::PERFORMERS => KnownField::Performers,
            tag_ids::RATING => KnownField::Rating,
            tag_ids::RECORD_LABEL => KnownField::RecordLabel,
            tag_ids::TITLE => KnownField::Title,
            tag_ids::TRACK_POSITION => KnownField::TrackPosition,
            tag_ids::YEAR => KnownField::Year,
            _ => return None,
        })
    }

    /// Whether text in this encoding can be written without transcoding.
    pub fn can_encoding_be_used(encoding: TagTextEncoding) -> bool {
        matches!(encoding, TagTextEncoding::Utf8 | TagTextEncoding::Utf16Be)
    }

    pub fn value(&self, field: KnownField) -> Option<&TagValue> {
        match field {
            // the text form is preferred over the pre-defined index
            KnownField::Genre => self
                .fields
                .first(&Mp4FieldId::Atom(tag_ids::GENRE))
                .or_else(|| self.fields.first(&Mp4FieldId::Atom(tag_ids::PRE_DEFINED_GENRE)))
                .map(|f| &f.value),
            _ => self
                .fields
                .first(&Self::field_id(field))
                .map(|f| &f.value),
        }
    }

    /// Assign a known field. Genre keeps the numeric and the text atom
    /// mutually exclusive: whichever kind is assigned erases the other.
    pub fn set_value(&mut self, field: KnownField, value: TagValue) {
        match field {
            KnownField::Genre => match value {
                TagValue::StandardGenreIndex(_) => {
                    self.fields.erase_all(&Mp4FieldId::Atom(tag_ids::GENRE));
                    self.set_or_erase(Mp4FieldId::Atom(tag_ids::PRE_DEFINED_GENRE), value);
                }
                _ => {
                    self.fields
                        .erase_all(&Mp4FieldId::Atom(tag_ids::PRE_DEFINED_GENRE));
                    self.set_or_erase(Mp4FieldId::Atom(tag_ids::GENRE), value);
                }
            },
            _ => self.set_or_erase(Self::field_id(field), value),
        }
    }

    fn set_or_erase(&mut self, id: Mp4FieldId, value: TagValue) {
        if value.is_empty() {
            self.fields.erase_all(&id);
        } else {
            self.fields.set(id, value);
        }
    }

    pub fn has_field(&self, field: KnownField) -> bool {
        match field {
            KnownField::Genre => {
                self.fields.has(&Mp4FieldId::Atom(tag_ids::GENRE))
                    || self.fields.has(&Mp4FieldId::Atom(tag_ids::PRE_DEFINED_GENRE))
            }
            _ => self.fields.has(&Self::field_id(field)),
        }
    }

    /// Parse tag information from the `meta` atom at `meta_index`.
    pub fn parse<R: Read + Seek>(
        arena: &AtomArena,
        meta_index: usize,
        reader: &mut R,
        diag: &mut Diagnostics,
    ) -> Result<Self> {
        const CONTEXT: &str = "parsing MP4 tag";
        let mut tag = Mp4Tag::default();

        // hdlr is informational; its absence must not stop ilst parsing
        match arena.child_by_id(meta_index, atom_ids::HDLR) {
            Some(hdlr_index) => {
                let hdlr = arena.get(hdlr_index);
                reader.seek(SeekFrom::Start(hdlr.data_offset()))?;
                let version = reader.read_u8()?;
                if version != 0 {
                    diag.warning(CONTEXT, "Version is unknown.");
                }
                if reader.read_u24::<BigEndian>()? != 0 {
                    diag.warning(CONTEXT, "Flags (hdlr atom) aren't set to 0.");
                }
                if reader.read_u32::<BigEndian>()? != 0 {
                    diag.warning(CONTEXT, "Predefined 32-bit integer (hdlr atom) isn't set to 0.");
                }
                let handler_type = reader.read_u64::<BigEndian>()?;
                if handler_type != HANDLER_TYPE_MDIR_APPL {
                    diag.warning(
                        CONTEXT,
                        "Handler type (value in hdlr atom) is unknown. Trying to parse meta information anyhow.",
                    );
                }
                tag.version = Some(version);
            }
            None => {
                diag.warning(
                    CONTEXT,
                    "No hdlr atom found (handler of meta information). Trying to parse meta information anyhow.",
                );
            }
        }

        let Some(ilst_index) = arena.child_by_id(meta_index, atom_ids::ILST) else {
            diag.warning(CONTEXT, "No ilst atom found (stores attached meta information).");
            return Err(TagError::NoTag);
        };

        for &child_index in arena.children(ilst_index) {
            let child = arena.get(child_index);
            reader.seek(SeekFrom::Start(child.data_offset()))?;
            let mut payload = vec![0u8; child.data_size() as usize];
            reader.read_exact(&mut payload)?;

            match parse_field(child.id, &payload) {
                Ok(fields) => {
                    for field in fields {
                        tag.fields.insert(field);
                    }
                }
                Err(e) if !e.is_fatal() => {
                    diag.critical(
                        CONTEXT,
                        format!(
                            "Unable to parse tag field \"{}\" ({e}).",
                            fourcc_string(child.id)
                        ),
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(tag)
    }

    /// Prepare making: compute the exact serialized form of every field.
    ///
    /// The tag must not be mutated between this call and
    /// [`Mp4TagMaker::make`].
    pub fn prepare_making(&self, diag: &mut Diagnostics) -> Result<Mp4TagMaker> {
        Mp4TagMaker::new(self, diag)
    }

    /// Convenience: prepare and immediately write.
    pub fn make<W: Write>(&self, out: &mut W, diag: &mut Diagnostics) -> Result<()> {
        self.prepare_making(diag)?.make(out, diag)
    }
}

/// Parse one ilst child atom into fields; a field atom holding several
/// data atoms (multiple covers) produces one field each.
fn parse_field(id: u32, payload: &[u8]) -> Result<Vec<Field<Mp4FieldId>>> {
    let mut fields = Vec::new();
    let mut mean: Option<String> = None;
    let mut name: Option<String> = None;

    let mut cursor = payload;
    while cursor.len() >= 8 {
        let size = u32::from_be_bytes([cursor[0], cursor[1], cursor[2], cursor[3]]) as usize;
        let sub_id = u32::from_be_bytes([cursor[4], cursor[5], cursor[6], cursor[7]]);
        if size < 8 || size > cursor.len() {
            return Err(TagError::Truncated {
                context: "ilst entry",
            });
        }
        let body = &cursor[8..size];
        match sub_id {
            atom_ids::MEAN => {
                mean = Some(full_atom_string(body)?);
            }
            atom_ids::NAME => {
                name = Some(full_atom_string(body)?);
            }
            atom_ids::DATA => {
                if body.len() < 8 {
                    return Err(TagError::Truncated {
                        context: "data atom",
                    });
                }
                let type_code = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) & 0x00FF_FFFF;
                // 4 bytes locale, then the raw value
                let raw = &body[8..];
                let value = decode_data(id, type_code, raw)?;
                let field_id = match (&mean, &name) {
                    (Some(mean), Some(name)) if id == tag_ids::EXTENDED => {
                        Mp4FieldId::extended(mean, name)
                    }
                    _ => Mp4FieldId::Atom(id),
                };
                fields.push(Field::with_type_info(field_id, value, type_code));
            }
            _ => {}
        }
        cursor = &cursor[size..];
    }

    if fields.is_empty() {
        return Err(TagError::InvalidData("tag field has no data atom".into()));
    }
    Ok(fields)
}

/// Strip the version/flags word of a mean/name full atom and decode UTF-8.
fn full_atom_string(body: &[u8]) -> Result<String> {
    if body.len() < 4 {
        return Err(TagError::Truncated {
            context: "mean/name atom",
        });
    }
    String::from_utf8(body[4..].to_vec()).map_err(|_| TagError::BadUtf8 {
        context: "mean/name atom",
    })
}

/// Decode a data atom's raw value according to its type code and owner.
fn decode_data(id: u32, type_code: u32, raw: &[u8]) -> Result<TagValue> {
    match type_code {
        data_types::UTF8 => Ok(TagValue::Text {
            data: raw.to_vec(),
            encoding: TagTextEncoding::Utf8,
        }),
        data_types::UTF16_BE => Ok(TagValue::Text {
            data: raw.to_vec(),
            encoding: TagTextEncoding::Utf16Be,
        }),
        data_types::JPEG => Ok(picture_value(raw, "image/jpeg")),
        data_types::PNG => Ok(picture_value(raw, "image/png")),
        data_types::BE_SIGNED_INT => {
            let value = match raw.len() {
                1 => raw[0] as i8 as i64,
                2 => i16::from_be_bytes([raw[0], raw[1]]) as i64,
                4 => i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64,
                8 => i64::from_be_bytes(raw.try_into().unwrap()),
                _ => {
                    return Err(TagError::InvalidData(format!(
                        "integer data of {} bytes",
                        raw.len()
                    )))
                }
            };
            Ok(TagValue::Integer(value))
        }
        data_types::IMPLICIT => match id {
            tag_ids::TRACK_POSITION | tag_ids::DISK_POSITION => {
                if raw.len() < 6 {
                    return Err(TagError::Truncated {
                        context: "position data",
                    });
                }
                let position = u16::from_be_bytes([raw[2], raw[3]]) as u32;
                let total = u16::from_be_bytes([raw[4], raw[5]]) as u32;
                Ok(TagValue::PositionInSet(PositionInSet::new(
                    (position != 0).then_some(position),
                    (total != 0).then_some(total),
                )))
            }
            tag_ids::PRE_DEFINED_GENRE => {
                if raw.len() < 2 {
                    return Err(TagError::Truncated {
                        context: "genre data",
                    });
                }
                let index = u16::from_be_bytes([raw[0], raw[1]]);
                if index == 0 {
                    return Err(TagError::InvalidData("genre index 0".into()));
                }
                // gnre stores the ID3 genre index plus one
                Ok(TagValue::StandardGenreIndex(index - 1))
            }
            tag_ids::COVER => Ok(picture_value(raw, "image/jpeg")),
            _ => Ok(TagValue::Undefined(raw.to_vec())),
        },
        _ => Ok(TagValue::Undefined(raw.to_vec())),
    }
}

fn picture_value(raw: &[u8], mime: &str) -> TagValue {
    TagValue::Picture(Box::new(Picture {
        mime_type: mime.to_string(),
        description: String::new(),
        role: PictureRole::CoverFront,
        width: 0,
        height: 0,
        depth: 0,
        colors: 0,
        data: raw.to_vec(),
    }))
}

/// Serialized form of one field, ready to write.
struct FieldBody {
    atom_id: u32,
    /// mean/name prefix atoms for extended fields, already framed.
    prefix: Vec<u8>,
    type_code: u32,
    value: Vec<u8>,
}

impl FieldBody {
    fn required_size(&self) -> u64 {
        // field header + prefix + data header + type/locale + value
        8 + self.prefix.len() as u64 + 8 + 8 + self.value.len() as u64
    }
}

/// Two-phase maker for [`Mp4Tag`]: sizes are fixed at construction, the
/// emit pass writes exactly those bytes.
pub struct Mp4TagMaker {
    bodies: Vec<FieldBody>,
    ilst_size: u64,
    meta_size: u64,
}

impl Mp4TagMaker {
    fn new(tag: &Mp4Tag, diag: &mut Diagnostics) -> Result<Self> {
        const CONTEXT: &str = "making MP4 tag";
        // never write both genre forms; the text atom wins
        let omit_pre_defined_genre = tag.fields.has(&Mp4FieldId::Atom(tag_ids::PRE_DEFINED_GENRE))
            && tag.fields.has(&Mp4FieldId::Atom(tag_ids::GENRE));

        let mut bodies = Vec::with_capacity(tag.fields.len());
        let mut ilst_size = 8u64;
        for field in tag.fields.iter() {
            if field.value.is_empty() {
                continue;
            }
            if omit_pre_defined_genre
                && field.id.matches(&Mp4FieldId::Atom(tag_ids::PRE_DEFINED_GENRE))
            {
                continue;
            }
            match make_field_body(field) {
                Ok(body) => {
                    ilst_size += body.required_size();
                    bodies.push(body);
                }
                Err(e) if !e.is_fatal() => {
                    diag.critical(
                        CONTEXT,
                        format!(
                            "Unable to make tag field \"{}\" ({e}).",
                            fourcc_string(field.id.atom_id())
                        ),
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let mut meta_size = 8 + HDLR_LITERAL.len() as u64;
        if ilst_size != 8 {
            meta_size += ilst_size;
        }
        Ok(Mp4TagMaker {
            bodies,
            ilst_size,
            meta_size,
        })
    }

    /// Total size of the meta atom [`Mp4TagMaker::make`] will write.
    pub fn required_size(&self) -> u64 {
        self.meta_size
    }

    /// Write the meta atom. Assumes the input was validated in
    /// [`Mp4Tag::prepare_making`]; only stream failures can occur here.
    pub fn make<W: Write>(&self, out: &mut W, diag: &mut Diagnostics) -> Result<()> {
        out.write_u32::<BigEndian>(self.meta_size as u32)?;
        out.write_u32::<BigEndian>(atom_ids::META)?;
        out.write_all(&HDLR_LITERAL)?;
        if self.ilst_size != 8 {
            out.write_u32::<BigEndian>(self.ilst_size as u32)?;
            out.write_u32::<BigEndian>(atom_ids::ILST)?;
            for body in &self.bodies {
                out.write_u32::<BigEndian>(body.required_size() as u32)?;
                out.write_u32::<BigEndian>(body.atom_id)?;
                out.write_all(&body.prefix)?;
                out.write_u32::<BigEndian>((8 + 8 + body.value.len()) as u32)?;
                out.write_u32::<BigEndian>(atom_ids::DATA)?;
                out.write_u32::<BigEndian>(body.type_code)?;
                out.write_u32::<BigEndian>(0)?; // locale
                out.write_all(&body.value)?;
            }
        } else {
            diag.warning("making MP4 tag", "Tag is empty.");
        }
        Ok(())
    }
}

fn make_field_body(field: &Field<Mp4FieldId>) -> Result<FieldBody> {
    let atom_id = field.id.atom_id();
    let mut prefix = Vec::new();
    if let Mp4FieldId::Extended { mean, name } = &field.id {
        for (sub_id, text) in [(atom_ids::MEAN, mean), (atom_ids::NAME, name)] {
            prefix.extend_from_slice(&((12 + text.len()) as u32).to_be_bytes());
            prefix.extend_from_slice(&sub_id.to_be_bytes());
            prefix.extend_from_slice(&[0u8; 4]);
            prefix.extend_from_slice(text.as_bytes());
        }
    }

    let (type_code, value) = match &field.value {
        TagValue::Text { data, encoding } => match encoding {
            TagTextEncoding::Utf16Be => (data_types::UTF16_BE, data.clone()),
            TagTextEncoding::Utf8 => (data_types::UTF8, data.clone()),
            // MP4 only takes UTF-8 or UTF-16BE; everything else transcodes
            _ => (
                data_types::UTF8,
                field.value.as_text()?.into_bytes(),
            ),
        },
        TagValue::DateTime(text) => (data_types::UTF8, text.clone().into_bytes()),
        TagValue::Integer(value) => {
            let bytes = if i16::try_from(*value).is_ok() {
                (*value as i16).to_be_bytes().to_vec()
            } else if i32::try_from(*value).is_ok() {
                (*value as i32).to_be_bytes().to_vec()
            } else {
                value.to_be_bytes().to_vec()
            };
            (data_types::BE_SIGNED_INT, bytes)
        }
        TagValue::StandardGenreIndex(index) => {
            (data_types::IMPLICIT, (index + 1).to_be_bytes().to_vec())
        }
        TagValue::PositionInSet(pos) => {
            let mut bytes = vec![0u8; if atom_id == tag_ids::DISK_POSITION { 6 } else { 8 }];
            bytes[2..4].copy_from_slice(&(pos.position.unwrap_or(0) as u16).to_be_bytes());
            bytes[4..6].copy_from_slice(&(pos.total.unwrap_or(0) as u16).to_be_bytes());
            (data_types::IMPLICIT, bytes)
        }
        TagValue::Picture(picture) => {
            let type_code = match picture.mime_type.as_str() {
                "image/png" => data_types::PNG,
                "image/jpeg" | "image/jpg" => data_types::JPEG,
                _ => data_types::IMPLICIT,
            };
            (type_code, picture.data.clone())
        }
        TagValue::Binary(data) | TagValue::Undefined(data) => {
            (field.type_info.unwrap_or(data_types::IMPLICIT), data.clone())
        }
        TagValue::TimeSpan(_) | TagValue::Empty => {
            return Err(TagError::ConversionError {
                from: field.value.kind(),
                to: "MP4 data atom",
            })
        }
    };

    Ok(FieldBody {
        atom_id,
        prefix,
        type_code,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::atom::test_support::{atom, meta_atom};
    use std::io::Cursor;

    fn data_atom(type_code: u32, raw: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&type_code.to_be_bytes());
        body.extend_from_slice(&[0u8; 4]);
        body.extend_from_slice(raw);
        atom(b"data", &body)
    }

    fn hdlr_atom() -> Vec<u8> {
        // version/flags + predefined + "mdirappl" + reserved
        let mut body = vec![0u8; 8];
        body.extend_from_slice(b"mdirappl");
        body.extend_from_slice(&[0u8; 9]);
        atom(b"hdlr", &body)
    }

    fn tag_from(meta_bytes: Vec<u8>) -> (Mp4Tag, Diagnostics) {
        let mut diag = Diagnostics::new();
        let len = meta_bytes.len() as u64;
        let mut cursor = Cursor::new(meta_bytes);
        let arena = AtomArena::parse(&mut cursor, len, &mut diag).unwrap();
        let meta_index = arena.root_by_id(atom_ids::META).unwrap();
        let tag = Mp4Tag::parse(&arena, meta_index, &mut cursor, &mut diag).unwrap();
        (tag, diag)
    }

    #[test]
    fn parses_text_position_and_genre_fields() {
        let mut ilst = Vec::new();
        ilst.extend_from_slice(&atom(b"\xA9nam", &data_atom(data_types::UTF8, b"Song")));
        ilst.extend_from_slice(&atom(
            b"trkn",
            &data_atom(data_types::IMPLICIT, &[0, 0, 0, 3, 0, 12, 0, 0]),
        ));
        ilst.extend_from_slice(&atom(
            b"gnre",
            &data_atom(data_types::IMPLICIT, &15u16.to_be_bytes()),
        ));
        let mut children = hdlr_atom();
        children.extend_from_slice(&atom(b"ilst", &ilst));
        let (tag, diag) = tag_from(meta_atom(&children));

        assert!(diag.is_empty());
        assert_eq!(tag.version, Some(0));
        assert_eq!(
            tag.value(KnownField::Title).unwrap().as_text().unwrap(),
            "Song"
        );
        assert_eq!(
            tag.value(KnownField::TrackPosition)
                .unwrap()
                .as_position_in_set()
                .unwrap(),
            PositionInSet::new(Some(3), Some(12))
        );
        // gnre stores index + 1
        assert_eq!(
            tag.value(KnownField::Genre)
                .unwrap()
                .as_standard_genre_index()
                .unwrap(),
            14
        );
    }

    #[test]
    fn missing_hdlr_is_warning_and_ilst_still_parses() {
        let children = atom(b"ilst", &atom(b"\xA9ART", &data_atom(data_types::UTF8, b"A")));
        let (tag, diag) = tag_from(meta_atom(&children));
        assert!(!diag.is_empty());
        assert!(!diag.has_critical());
        assert_eq!(
            tag.value(KnownField::Artist).unwrap().as_text().unwrap(),
            "A"
        );
    }

    #[test]
    fn missing_ilst_reports_no_tag() {
        let mut diag = Diagnostics::new();
        let bytes = meta_atom(&hdlr_atom());
        let len = bytes.len() as u64;
        let mut cursor = Cursor::new(bytes);
        let arena = AtomArena::parse(&mut cursor, len, &mut diag).unwrap();
        let meta_index = arena.root_by_id(atom_ids::META).unwrap();
        let err = Mp4Tag::parse(&arena, meta_index, &mut cursor, &mut diag).unwrap_err();
        assert!(matches!(err, TagError::NoTag));
    }

    #[test]
    fn extended_field_round_trips_mean_and_name() {
        let mut extended = Vec::new();
        let mut mean_body = vec![0u8; 4];
        mean_body.extend_from_slice(extended_ids::ITUNES_MEAN.as_bytes());
        extended.extend_from_slice(&atom(b"mean", &mean_body));
        let mut name_body = vec![0u8; 4];
        name_body.extend_from_slice(extended_ids::CDEC.as_bytes());
        extended.extend_from_slice(&atom(b"name", &name_body));
        extended.extend_from_slice(&data_atom(data_types::UTF8, b"aac 256kbps"));

        let children = atom(b"ilst", &atom(b"----", &extended));
        let (tag, _) = tag_from(meta_atom(&children));
        assert_eq!(
            tag.value(KnownField::EncoderSettings)
                .unwrap()
                .as_text()
                .unwrap(),
            "aac 256kbps"
        );
    }

    #[test]
    fn genre_text_form_wins_over_numeric() {
        let mut tag = Mp4Tag::default();
        tag.fields.insert(Field::new(
            Mp4FieldId::Atom(tag_ids::PRE_DEFINED_GENRE),
            TagValue::StandardGenreIndex(14),
        ));
        tag.fields.insert(Field::new(
            Mp4FieldId::Atom(tag_ids::GENRE),
            TagValue::utf8("Rock"),
        ));

        // setting text erases the numeric atom
        tag.set_value(KnownField::Genre, TagValue::utf8("Jazz"));
        assert!(!tag.fields.has(&Mp4FieldId::Atom(tag_ids::PRE_DEFINED_GENRE)));
        assert_eq!(tag.value(KnownField::Genre).unwrap().as_text().unwrap(), "Jazz");

        // setting a standard index erases the text atom
        tag.set_value(KnownField::Genre, TagValue::StandardGenreIndex(17));
        assert!(!tag.fields.has(&Mp4FieldId::Atom(tag_ids::GENRE)));
        assert_eq!(
            tag.value(KnownField::Genre)
                .unwrap()
                .as_standard_genre_index()
                .unwrap(),
            17
        );
    }

    #[test]
    fn maker_omits_numeric_genre_when_both_present() {
        let mut tag = Mp4Tag::default();
        tag.fields.insert(Field::new(
            Mp4FieldId::Atom(tag_ids::PRE_DEFINED_GENRE),
            TagValue::StandardGenreIndex(14),
        ));
        tag.fields.insert(Field::new(
            Mp4FieldId::Atom(tag_ids::GENRE),
            TagValue::utf8("Rock"),
        ));

        let mut diag = Diagnostics::new();
        let maker = tag.prepare_making(&mut diag).unwrap();
        let mut out = Vec::new();
        maker.make(&mut out, &mut diag).unwrap();

        let (reparsed, _) = tag_from(out);
        assert_eq!(reparsed.fields.len(), 1);
        assert_eq!(
            reparsed.value(KnownField::Genre).unwrap().as_text().unwrap(),
            "Rock"
        );
    }

    #[test]
    fn preflight_size_matches_emitted_size() {
        let mut tag = Mp4Tag::default();
        tag.set_value(KnownField::Title, TagValue::utf8("Song"));
        tag.set_value(KnownField::Artist, TagValue::utf8("Artist"));
        tag.set_value(
            KnownField::TrackPosition,
            TagValue::PositionInSet(PositionInSet::new(Some(2), Some(9))),
        );
        tag.set_value(KnownField::Bpm, TagValue::Integer(128));
        tag.set_value(
            KnownField::EncoderSettings,
            TagValue::utf8("aac 256kbps"),
        );

        let mut diag = Diagnostics::new();
        let maker = tag.prepare_making(&mut diag).unwrap();
        let mut out = Vec::new();
        maker.make(&mut out, &mut diag).unwrap();
        assert_eq!(out.len() as u64, maker.required_size());
    }

    #[test]
    fn empty_tag_emits_meta_and_hdlr_only_with_warning() {
        let tag = Mp4Tag::default();
        let mut diag = Diagnostics::new();
        let maker = tag.prepare_making(&mut diag).unwrap();
        assert_eq!(maker.required_size(), 8 + 37);
        let mut out = Vec::new();
        maker.make(&mut out, &mut diag).unwrap();
        assert_eq!(out.len(), 45);
        assert!(diag
            .entries()
            .iter()
            .any(|e| e.message == "Tag is empty."));
    }

    #[test]
    fn made_tag_parses_back_equal() {
        let mut tag = Mp4Tag::default();
        tag.set_value(KnownField::Title, TagValue::utf8("T"));
        tag.set_value(KnownField::Genre, TagValue::StandardGenreIndex(17));
        tag.set_value(
            KnownField::Cover,
            TagValue::Picture(Box::new(Picture::new(
                vec![0xFF, 0xD8, 0xFF],
                "image/jpeg".into(),
                String::new(),
            ))),
        );

        let mut diag = Diagnostics::new();
        let mut out = Vec::new();
        tag.make(&mut out, &mut diag).unwrap();
        let (reparsed, rediag) = tag_from(out);
        assert!(rediag.is_empty());
        assert_eq!(reparsed.fields.len(), tag.fields.len());
        assert_eq!(reparsed.value(KnownField::Title).unwrap().as_text().unwrap(), "T");
        assert_eq!(
            reparsed
                .value(KnownField::Genre)
                .unwrap()
                .as_standard_genre_index()
                .unwrap(),
            17
        );
        assert_eq!(
            reparsed
                .value(KnownField::Cover)
                .unwrap()
                .as_picture()
                .unwrap()
                .data,
            vec![0xFF, 0xD8, 0xFF]
        );
    }
}
