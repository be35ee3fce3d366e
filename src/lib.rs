//! ferrotag - a container-aware audio metadata library
//!
//! The library opens a media file, identifies its container format, decodes
//! the embedded metadata into a uniform tag model and writes edits back
//! byte-exactly, leaving the media payload untouched. Supported containers:
//! FLAC, MP4/M4A, MPEG audio (ID3v2) and Ogg Vorbis.
//!
//! ```no_run
//! use ferrotag::{KnownField, MediaFile, TagValue};
//!
//! let mut file = MediaFile::open("song.flac").unwrap();
//! file.set_value(KnownField::Artist, TagValue::utf8("Someone"));
//! file.save().unwrap();
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize, Serializer};

pub mod diag;
pub mod error;
pub mod fields;
pub mod flac;
pub mod id3;
pub mod mp4;
pub mod mpeg;
pub mod ogg;
pub mod track;
pub mod utils;
pub mod value;
pub mod vorbis;

pub use diag::{Diagnostic, Diagnostics, Severity};
pub use error::{Result, TagError};
pub use fields::KnownField;
pub use track::TrackDescriptor;
pub use utils::encoding::TagTextEncoding;
pub use value::{Picture, PictureRole, PositionInSet, TagValue};

use flac::FlacStream;
use id3::{Id3v2Header, Id3v2Tag};
use mp4::ids::atom_ids;
use mp4::tag::Mp4Tag;
use mp4::Mp4Stream;
use mpeg::MpegStream;
use ogg::OggStream;
use utils::io::copy_n;
use vorbis::VorbisComment;

/// Custom serialization for `Vec<u8>` as a base64 string.
pub(crate) fn serialize_as_base64<S>(data: &Vec<u8>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    use base64::prelude::*;
    serializer.serialize_str(&BASE64_STANDARD.encode(data))
}

/// Custom deserialization of a base64 string back into bytes.
pub(crate) fn deserialize_base64_to_vec<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use base64::prelude::*;
    let s = String::deserialize(deserializer)?;
    BASE64_STANDARD.decode(&s).map_err(serde::de::Error::custom)
}

/// Fresh padding written after FLAC metadata on a full rewrite, so later
/// edits can go in place.
const FLAC_PADDING_SIZE: u64 = 4096;

/// Fresh padding inside a rewritten ID3v2 region.
const ID3_PADDING_SIZE: u32 = 512;

/// Fresh free atom written after a rewritten meta atom.
const MP4_FREE_SIZE: u64 = 1024;

/// The container format of an opened file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileFormat {
    Flac,
    Mp4,
    MpegAudio,
    OggVorbis,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Flac => "FLAC",
            FileFormat::Mp4 => "MP4",
            FileFormat::MpegAudio => "MPEG audio",
            FileFormat::OggVorbis => "Ogg Vorbis",
        }
    }
}

/// One tag of a file, dispatched by kind.
#[derive(Debug, Clone)]
pub enum Tag {
    VorbisComment(VorbisComment),
    Mp4(Mp4Tag),
    Id3v2(Id3v2Tag),
}

impl Tag {
    pub fn kind(&self) -> &'static str {
        match self {
            Tag::VorbisComment(_) => "Vorbis comment",
            Tag::Mp4(_) => "MP4 tag",
            Tag::Id3v2(_) => "ID3v2 tag",
        }
    }

    pub fn value(&self, field: KnownField) -> Option<&TagValue> {
        match self {
            Tag::VorbisComment(tag) => tag.value(field),
            Tag::Mp4(tag) => tag.value(field),
            Tag::Id3v2(tag) => tag.value(field),
        }
    }

    /// Assign a field; returns false when the tag kind has no identifier
    /// for it.
    pub fn set_value(&mut self, field: KnownField, value: TagValue) -> bool {
        match self {
            Tag::VorbisComment(tag) => {
                tag.set_value(field, value);
                true
            }
            Tag::Mp4(tag) => {
                tag.set_value(field, value);
                true
            }
            Tag::Id3v2(tag) => tag.set_value(field, value),
        }
    }

    pub fn has_field(&self, field: KnownField) -> bool {
        match self {
            Tag::VorbisComment(tag) => tag.has_field(field),
            Tag::Mp4(tag) => tag.has_field(field),
            Tag::Id3v2(tag) => tag.has_field(field),
        }
    }

    /// All cover pictures, in field order.
    pub fn covers(&self) -> Vec<&Picture> {
        match self {
            Tag::VorbisComment(tag) => tag
                .covers()
                .filter_map(|f| f.value.as_picture().ok())
                .collect(),
            Tag::Mp4(tag) => tag
                .fields
                .values(&Mp4Tag::field_id(KnownField::Cover))
                .filter_map(|f| f.value.as_picture().ok())
                .collect(),
            Tag::Id3v2(tag) => tag
                .fields
                .values(&id3::Id3FrameIds::COVER.to_string())
                .filter_map(|f| f.value.as_picture().ok())
                .collect(),
        }
    }
}

/// Per-format state kept between open and save.
#[derive(Debug)]
enum Backend {
    Flac(FlacStream),
    Mp4(Mp4Stream),
    Mpeg {
        stream: MpegStream,
        /// Bytes occupied by the leading ID3v2 region, header included.
        id3_region: u64,
    },
    Ogg(OggStream),
}

/// An opened media file: track descriptors, tags and the diagnostic log.
#[derive(Debug)]
pub struct MediaFile {
    path: PathBuf,
    file_size: u64,
    format: FileFormat,
    backend: Backend,
    tracks: Vec<TrackDescriptor>,
    tags: Vec<Tag>,
    diagnostics: Diagnostics,
}

impl MediaFile {
    /// Open and parse a media file. Recoverable structural problems land
    /// in [`MediaFile::diagnostics`]; the model stays usable.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut diag = Diagnostics::new();

        let format = Self::detect_format(&mut reader)?;
        tracing::info!(path = %path.display(), format = format.as_str(), "parsing media file");

        let (backend, tracks, tags) = match format {
            FileFormat::Flac => {
                let mut stream = FlacStream::parse(&mut reader, 0, &mut diag)?;
                let tracks = vec![stream.descriptor.clone()];
                let tags = stream
                    .vorbis_comment
                    .take()
                    .map(Tag::VorbisComment)
                    .into_iter()
                    .collect();
                (Backend::Flac(stream), tracks, tags)
            }
            FileFormat::Mp4 => {
                let mut stream = Mp4Stream::parse(&mut reader, file_size, &mut diag)?;
                let tracks = stream.tracks.clone();
                let tags = stream.tag.take().map(Tag::Mp4).into_iter().collect();
                (Backend::Mp4(stream), tracks, tags)
            }
            FileFormat::MpegAudio => {
                reader.seek(SeekFrom::Start(0))?;
                let mut id3_region = 0u64;
                let mut tags = Vec::new();
                if let Some(header) = Id3v2Header::read(&mut reader)? {
                    id3_region = Id3v2Header::SIZE + header.size as u64;
                    let tag = Id3v2Tag::parse(&mut reader, header, &mut diag)?;
                    if !tag.fields.is_empty() {
                        tags.push(Tag::Id3v2(tag));
                    }
                }
                let stream = MpegStream::parse(&mut reader, id3_region, file_size, &mut diag)?;
                let tracks = vec![stream.descriptor.clone()];
                (Backend::Mpeg { stream, id3_region }, tracks, tags)
            }
            FileFormat::OggVorbis => {
                let mut stream = OggStream::parse(&mut reader, file_size, &mut diag)?;
                let tracks = vec![stream.descriptor.clone()];
                let tags = stream
                    .comment
                    .take()
                    .map(Tag::VorbisComment)
                    .into_iter()
                    .collect();
                (Backend::Ogg(stream), tracks, tags)
            }
        };

        Ok(MediaFile {
            path,
            file_size,
            format,
            backend,
            tracks,
            tags,
            diagnostics: diag,
        })
    }

    /// Sniff the first bytes for a known container signature.
    fn detect_format<R: Read + Seek>(reader: &mut R) -> Result<FileFormat> {
        reader.seek(SeekFrom::Start(0))?;
        let mut head = [0u8; 12];
        let got = reader.read(&mut head)?;
        let head = &head[..got];

        if head.starts_with(b"fLaC") {
            return Ok(FileFormat::Flac);
        }
        if head.starts_with(b"ID3") {
            return Ok(FileFormat::MpegAudio);
        }
        if head.starts_with(b"OggS") {
            return Ok(FileFormat::OggVorbis);
        }
        if head.len() >= 8 && &head[4..8] == b"ftyp" {
            return Ok(FileFormat::Mp4);
        }
        if head.len() >= 2 && head[0] == 0xFF && head[1] & 0xE0 == 0xE0 {
            return Ok(FileFormat::MpegAudio);
        }
        Err(TagError::InvalidData(
            "no supported container signature found".into(),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn tracks(&self) -> &[TrackDescriptor] {
        &self.tracks
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// The primary tag, creating one of the format's native kind when the
    /// file has none yet.
    pub fn create_tag(&mut self) -> &mut Tag {
        if self.tags.is_empty() {
            let tag = match self.format {
                FileFormat::Flac | FileFormat::OggVorbis => {
                    Tag::VorbisComment(VorbisComment::new())
                }
                FileFormat::Mp4 => Tag::Mp4(Mp4Tag::default()),
                FileFormat::MpegAudio => Tag::Id3v2(Id3v2Tag::default()),
            };
            self.tags.push(tag);
        }
        &mut self.tags[0]
    }

    /// Remove every tag; the next save strips the metadata regions.
    /// Ogg keeps a vendor-only comment packet, which its framing requires.
    pub fn remove_all_tags(&mut self) {
        self.tags.clear();
    }

    pub fn value(&self, field: KnownField) -> Option<&TagValue> {
        self.tags.iter().find_map(|t| t.value(field))
    }

    pub fn set_value(&mut self, field: KnownField, value: TagValue) -> bool {
        self.create_tag().set_value(field, value)
    }

    pub fn has_field(&self, field: KnownField) -> bool {
        self.tags.iter().any(|t| t.has_field(field))
    }

    pub fn covers(&self) -> Vec<&Picture> {
        self.tags.iter().flat_map(|t| t.covers()).collect()
    }

    /// Write the current tags back to the file.
    ///
    /// When the new metadata fits the space the old metadata occupied, only
    /// that region is rewritten in place; otherwise the whole file is
    /// rebuilt through a temporary sibling and atomically renamed over the
    /// original. The media payload is copied verbatim either way.
    pub fn save(&mut self) -> Result<()> {
        match self.format {
            FileFormat::Flac => self.save_flac()?,
            FileFormat::Mp4 => self.save_mp4()?,
            FileFormat::MpegAudio => self.save_mpeg()?,
            FileFormat::OggVorbis => self.save_ogg()?,
        }
        self.reload()
    }

    /// Re-parse the file so offsets and descriptors match what is on disk.
    fn reload(&mut self) -> Result<()> {
        let reopened = MediaFile::open(&self.path)?;
        self.file_size = reopened.file_size;
        self.backend = reopened.backend;
        self.tracks = reopened.tracks;
        self.tags = reopened.tags;
        self.diagnostics.absorb(reopened.diagnostics);
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".ferrotag-tmp");
        self.path.with_file_name(name)
    }

    /// Write `region` over `[offset, offset + region.len())` of the file.
    fn write_in_place(&self, offset: u64, region: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(region)?;
        file.flush()?;
        Ok(())
    }

    /// Build a new file as: `prefix` + the byte range `[tail_start, EOF)`
    /// of the original, then rename it over the original.
    fn rewrite_with_tail(&self, prefix: &[u8], tail_start: u64) -> Result<()> {
        let temp = self.temp_path();
        let result = (|| -> Result<()> {
            let mut reader = BufReader::new(File::open(&self.path)?);
            let mut writer = BufWriter::new(File::create(&temp)?);
            writer.write_all(prefix)?;
            reader.seek(SeekFrom::Start(tail_start))?;
            copy_n(&mut reader, &mut writer, self.file_size - tail_start)?;
            writer.flush()?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                std::fs::rename(&temp, &self.path)?;
                Ok(())
            }
            Err(e) => {
                let _ = std::fs::remove_file(&temp);
                Err(e)
            }
        }
    }

    fn save_flac(&mut self) -> Result<()> {
        let Backend::Flac(stream) = &self.backend else {
            unreachable!("format/backend mismatch");
        };
        let comment = self.tags.iter().find_map(|t| match t {
            Tag::VorbisComment(c) => Some(c),
            _ => None,
        });
        let mut reader = BufReader::new(File::open(&self.path)?);

        let new_size = stream.required_header_size(comment, &mut reader)?;
        let old_region = stream.stream_offset - stream.start_offset;

        // in place when the chain fits exactly or leaves room for a
        // padding block
        if new_size == old_region || new_size + flac::metadata::FlacBlockHeader::SIZE <= old_region
        {
            let padding = old_region - new_size;
            let mut out = Cursor::new(Vec::with_capacity(old_region as usize));
            stream.make_header(comment, &mut reader, &mut out, padding > 0, &mut self.diagnostics)?;
            if padding > 0 {
                FlacStream::make_padding(&mut out, padding, true)?;
            }
            let region = out.into_inner();
            debug_assert_eq!(region.len() as u64, old_region);
            tracing::debug!(padding, "rewriting FLAC metadata in place");
            self.write_in_place(stream.start_offset, &region)?;
        } else {
            let mut out = Cursor::new(Vec::with_capacity((new_size + FLAC_PADDING_SIZE) as usize));
            stream.make_header(comment, &mut reader, &mut out, true, &mut self.diagnostics)?;
            FlacStream::make_padding(&mut out, FLAC_PADDING_SIZE, true)?;
            tracing::debug!("rewriting FLAC file");
            self.rewrite_with_tail(&out.into_inner(), stream.stream_offset)?;
        }
        Ok(())
    }

    fn save_mp4(&mut self) -> Result<()> {
        let Backend::Mp4(stream) = &self.backend else {
            unreachable!("format/backend mismatch");
        };
        let tag = self.tags.iter().find_map(|t| match t {
            Tag::Mp4(tag) => Some(tag),
            _ => None,
        });

        let had_meta = stream
            .arena
            .find_path(&[atom_ids::MOOV, atom_ids::UDTA, atom_ids::META])
            .is_some();
        if tag.is_none() && !had_meta {
            return Ok(());
        }

        let mut new_meta = Vec::new();
        if let Some(tag) = tag {
            let maker = tag.prepare_making(&mut self.diagnostics)?;
            maker.make(&mut new_meta, &mut self.diagnostics)?;
            debug_assert_eq!(new_meta.len() as u64, maker.required_size());
        } else {
            // an empty tag still yields a valid meta atom
            Mp4Tag::default().make(&mut new_meta, &mut self.diagnostics)?;
        }

        let arena = &stream.arena;
        let moov_index = arena
            .root_by_id(atom_ids::MOOV)
            .ok_or_else(|| TagError::InvalidData("no moov atom".into()))?;
        let moov = arena.get(moov_index).clone();

        // fast path: the meta atom shrinks or keeps its size and an
        // adjacent free atom absorbs the difference
        if let Some(meta_index) = arena.find_path(&[atom_ids::MOOV, atom_ids::UDTA, atom_ids::META])
        {
            let meta = arena.get(meta_index);
            let old_meta_size = meta.total_size;
            let new_meta_size = new_meta.len() as u64;

            if new_meta_size == old_meta_size {
                tracing::debug!("rewriting meta atom in place");
                self.write_in_place(meta.start, &new_meta)?;
                return Ok(());
            }

            let udta_index = meta.parent.expect("meta has parent");
            let siblings = arena.children(udta_index);
            let next_free = siblings
                .iter()
                .position(|&i| i == meta_index)
                .and_then(|pos| siblings.get(pos + 1).copied())
                .filter(|&i| {
                    let atom = arena.get(i);
                    atom.id == atom_ids::FREE || atom.id == atom_ids::SKIP
                });
            if let Some(free_index) = next_free {
                let free = arena.get(free_index);
                let budget = old_meta_size + free.total_size;
                if new_meta_size + 8 <= budget {
                    let free_size = budget - new_meta_size;
                    let mut region = new_meta.clone();
                    region.extend_from_slice(&(free_size as u32).to_be_bytes());
                    region.extend_from_slice(&atom_ids::FREE.to_be_bytes());
                    region.resize((budget) as usize, 0);
                    tracing::debug!(free_size, "balancing meta atom against free atom");
                    self.write_in_place(meta.start, &region)?;
                    return Ok(());
                }
            }
        }

        // full rewrite: splice the new meta into an in-memory moov, patch
        // the chunk offsets the layout shift invalidates, rebuild the file
        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(moov.start))?;
        let mut moov_bytes = vec![0u8; moov.total_size as usize];
        reader.read_exact(&mut moov_bytes)?;

        // a fresh free atom after the meta keeps the next edit in place
        let mut meta_with_free = new_meta;
        meta_with_free.extend_from_slice(&(MP4_FREE_SIZE as u32).to_be_bytes());
        meta_with_free.extend_from_slice(&atom_ids::FREE.to_be_bytes());
        meta_with_free.resize(meta_with_free.len() + MP4_FREE_SIZE as usize - 8, 0);

        let (mut new_moov, delta, splice_offset) = mp4::replace_meta(
            &moov_bytes,
            moov.start,
            &meta_with_free,
            &mut self.diagnostics,
        )?;
        mp4::patch_chunk_offsets(&mut new_moov, splice_offset, delta, &mut self.diagnostics)?;

        let temp = self.temp_path();
        let result = (|| -> Result<()> {
            let mut reader = BufReader::new(File::open(&self.path)?);
            let mut writer = BufWriter::new(File::create(&temp)?);
            copy_n(&mut reader, &mut writer, moov.start)?;
            writer.write_all(&new_moov)?;
            reader.seek(SeekFrom::Start(moov.end()))?;
            copy_n(&mut reader, &mut writer, self.file_size - moov.end())?;
            writer.flush()?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                std::fs::rename(&temp, &self.path)?;
                tracing::debug!(delta, "rewrote MP4 file");
                Ok(())
            }
            Err(e) => {
                let _ = std::fs::remove_file(&temp);
                Err(e)
            }
        }
    }

    fn save_mpeg(&mut self) -> Result<()> {
        let Backend::Mpeg { id3_region, .. } = &self.backend else {
            unreachable!("format/backend mismatch");
        };
        let id3_region = *id3_region;
        let tag = self.tags.iter().find_map(|t| match t {
            Tag::Id3v2(tag) => Some(tag),
            _ => None,
        });

        match tag {
            Some(tag) => {
                let frames = tag.make_frames(&mut self.diagnostics)?;
                let needed = Id3v2Header::SIZE + frames.len() as u64;
                if id3_region >= needed {
                    // refill the existing region, padding the rest
                    let padding = (id3_region - needed) as u32;
                    let mut out = Vec::with_capacity(id3_region as usize);
                    tag.make(&mut out, padding, &mut self.diagnostics)?;
                    debug_assert_eq!(out.len() as u64, id3_region);
                    tracing::debug!(padding, "rewriting ID3v2 region in place");
                    self.write_in_place(0, &out)?;
                } else {
                    let mut out = Vec::new();
                    tag.make(&mut out, ID3_PADDING_SIZE, &mut self.diagnostics)?;
                    tracing::debug!("rewriting MPEG file with a larger ID3v2 region");
                    self.rewrite_with_tail(&out, id3_region)?;
                }
            }
            None if id3_region > 0 => {
                tracing::debug!("stripping ID3v2 region");
                self.rewrite_with_tail(&[], id3_region)?;
            }
            None => {}
        }
        Ok(())
    }

    fn save_ogg(&mut self) -> Result<()> {
        let Backend::Ogg(stream) = &self.backend else {
            unreachable!("format/backend mismatch");
        };
        // the comment packet is structurally required, so removing every
        // tag rewrites it vendor-only instead of stripping the page
        let empty;
        let comment = match self.tags.iter().find_map(|t| match t {
            Tag::VorbisComment(c) => Some(c),
            _ => None,
        }) {
            Some(comment) => comment,
            None => {
                empty = VorbisComment::new();
                &empty
            }
        };
        let Some(location) = stream.comment_location else {
            return Err(TagError::InvalidData(
                "file has no editable comment page".into(),
            ));
        };

        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(location.page_offset))?;
        let mut original_page = vec![0u8; location.page_size as usize];
        reader.read_exact(&mut original_page)?;

        let new_page =
            stream.make_comment_page(Some(comment), &original_page, &mut self.diagnostics)?;

        if new_page.len() as u64 == location.page_size {
            tracing::debug!("rewriting Ogg comment page in place");
            self.write_in_place(location.page_offset, &new_page)?;
        } else {
            tracing::debug!("rewriting Ogg file around the comment page");
            let mut prefix = Vec::with_capacity(location.page_offset as usize + new_page.len());
            let mut reader = BufReader::new(File::open(&self.path)?);
            copy_n(&mut reader, &mut prefix, location.page_offset)?;
            prefix.extend_from_slice(&new_page);
            self.rewrite_with_tail(&prefix, location.page_offset + location.page_size)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_format_by_signature() {
        let probe = |bytes: &[u8]| {
            MediaFile::detect_format(&mut Cursor::new(bytes.to_vec()))
        };
        assert_eq!(probe(b"fLaC\0\0\0\x22").unwrap(), FileFormat::Flac);
        assert_eq!(probe(b"ID3\x04\x00\x00\x00\x00\x00\x00").unwrap(), FileFormat::MpegAudio);
        assert_eq!(probe(b"OggS\x00\x02").unwrap(), FileFormat::OggVorbis);
        assert_eq!(
            probe(b"\x00\x00\x00\x20ftypM4A ").unwrap(),
            FileFormat::Mp4
        );
        assert_eq!(probe(&[0xFF, 0xFB, 0x90, 0x00]).unwrap(), FileFormat::MpegAudio);
        assert!(probe(b"RIFF....WAVE").is_err());
    }

    #[test]
    fn tag_enum_dispatches_uniform_access() {
        let mut tag = Tag::Mp4(Mp4Tag::default());
        assert!(tag.set_value(KnownField::Genre, TagValue::utf8("Jazz")));
        assert!(tag.has_field(KnownField::Genre));
        assert_eq!(
            tag.value(KnownField::Genre).unwrap().as_text().unwrap(),
            "Jazz"
        );

        let mut tag = Tag::VorbisComment(VorbisComment::new());
        assert!(tag.set_value(KnownField::Artist, TagValue::utf8("A")));
        assert!(tag.has_field(KnownField::Artist));
    }
}
