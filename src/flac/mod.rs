// FLAC stream backend: metadata block chain parsing and rewriting

pub mod metadata;
pub mod picture;

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::diag::Diagnostics;
use crate::error::{Result, TagError};
use crate::fields::Field;
use crate::track::{FormatId, MediaType, TrackDescriptor};
use crate::utils::io::copy_n;
use crate::vorbis::{VorbisComment, VorbisCommentFlags, VorbisKeys};
use crate::value::TagValue;

use metadata::{FlacBlockHeader, FlacBlockType, FlacStreamInfo};

/// FLAC file signature, "fLaC".
pub const FLAC_SIGNATURE: u32 = 0x664C_6143;

/// A raw FLAC stream: the metadata block chain up to the first audio frame.
#[derive(Debug, Default)]
pub struct FlacStream {
    /// Offset of the "fLaC" signature within the file.
    pub start_offset: u64,
    /// Offset of the first audio frame (end of the metadata chain).
    pub stream_offset: u64,
    /// Total bytes occupied by PADDING blocks, headers included.
    pub padding_size: u64,
    pub descriptor: TrackDescriptor,
    pub vorbis_comment: Option<VorbisComment>,
}

impl FlacStream {
    /// Returns the Vorbis comment, creating an empty one when absent.
    pub fn create_vorbis_comment(&mut self) -> &mut VorbisComment {
        self.vorbis_comment.get_or_insert_with(VorbisComment::new)
    }

    /// Removes the Vorbis comment; returns whether one was assigned.
    pub fn remove_vorbis_comment(&mut self) -> bool {
        self.vorbis_comment.take().is_some()
    }

    /// Walk the metadata block chain at `start_offset`.
    ///
    /// Truncated or malformed blocks are diagnosed and skipped; the walk
    /// trusts each header's size for advancing, so one bad block cannot
    /// desynchronize the rest of the chain.
    pub fn parse<R: Read + Seek>(
        reader: &mut R,
        start_offset: u64,
        diag: &mut Diagnostics,
    ) -> Result<Self> {
        const CONTEXT: &str = "parsing FLAC header";

        reader.seek(SeekFrom::Start(start_offset))?;
        if reader.read_u32::<BigEndian>()? != FLAC_SIGNATURE {
            diag.critical(CONTEXT, "Signature (fLaC) not found.");
            return Err(TagError::InvalidData("FLAC signature not found".into()));
        }

        let mut stream = FlacStream {
            start_offset,
            descriptor: TrackDescriptor::new(MediaType::Audio, FormatId::Flac),
            ..Default::default()
        };
        stream.descriptor.start_offset = start_offset;

        loop {
            let header = FlacBlockHeader::read(reader)?;
            let block_start = reader.stream_position()?;

            match header.block_type {
                FlacBlockType::StreamInfo => {
                    if header.data_size >= FlacStreamInfo::SIZE {
                        let mut buffer = [0u8; FlacStreamInfo::SIZE as usize];
                        reader.read_exact(&mut buffer)?;
                        let info = FlacStreamInfo::parse(&buffer)?;
                        stream.descriptor.channel_count = info.channel_count;
                        stream.descriptor.bits_per_sample = info.bits_per_sample;
                        stream
                            .descriptor
                            .set_extent(info.total_sample_count, info.sampling_frequency);
                    } else {
                        diag.critical(
                            CONTEXT,
                            "\"METADATA_BLOCK_STREAMINFO\" is truncated and will be ignored.",
                        );
                    }
                }
                FlacBlockType::VorbisComment => {
                    // several comment blocks merge into one
                    let mut data = vec![0u8; header.data_size as usize];
                    reader.read_exact(&mut data)?;
                    let comment = stream.vorbis_comment.get_or_insert_with(VorbisComment::default);
                    if let Err(e) = comment.parse(&data, VorbisCommentFlags::flac(), diag) {
                        if e.is_fatal() {
                            return Err(e);
                        }
                        diag.critical(
                            CONTEXT,
                            format!("\"METADATA_BLOCK_VORBIS_COMMENT\" is invalid ({e}) and will be ignored."),
                        );
                    }
                }
                FlacBlockType::Picture => {
                    let mut data = vec![0u8; header.data_size as usize];
                    reader.read_exact(&mut data)?;
                    match picture::parse_picture(&data) {
                        Ok(picture) if picture.data.is_empty() => {
                            diag.warning(CONTEXT, "\"METADATA_BLOCK_PICTURE\" contains no picture.");
                        }
                        Ok(picture) => {
                            let comment = stream.vorbis_comment.get_or_insert_with(VorbisComment::new);
                            let role = picture.role as u32;
                            comment.fields.insert(Field::with_type_info(
                                VorbisKeys::COVER.to_string(),
                                TagValue::Picture(Box::new(picture)),
                                role,
                            ));
                        }
                        Err(e) if !e.is_fatal() => {
                            diag.critical(
                                CONTEXT,
                                "\"METADATA_BLOCK_PICTURE\" is truncated and will be ignored.",
                            );
                        }
                        Err(e) => return Err(e),
                    }
                }
                FlacBlockType::Padding => {
                    stream.padding_size += FlacBlockHeader::SIZE + header.data_size as u64;
                }
                _ => {}
            }

            // the header's size is authoritative for advancing
            reader.seek(SeekFrom::Start(block_start + header.data_size as u64))?;
            if header.is_last {
                break;
            }
        }

        stream.stream_offset = reader.stream_position()?;
        stream.descriptor.stream_offset = stream.stream_offset;
        stream.descriptor.padding_size = stream.padding_size;
        Ok(stream)
    }

    /// Write the rewritten metadata chain to `out`.
    ///
    /// Blocks other than VorbisComment, Picture and Padding are copied
    /// verbatim from `original`; the Vorbis comment is re-serialized, each
    /// cover becomes its own PICTURE block in field-insertion order, and
    /// padding is dropped (the caller appends fresh padding if wanted).
    ///
    /// When `padding_follows` is false, the last written block carries the
    /// last-block flag.
    ///
    /// The comment to serialize is passed in; the one captured at parse
    /// time is only a default for callers that never moved it out.
    pub fn make_header<R, W>(
        &self,
        comment: Option<&VorbisComment>,
        original: &mut R,
        out: &mut W,
        padding_follows: bool,
        diag: &mut Diagnostics,
    ) -> Result<()>
    where
        R: Read + Seek,
        W: Write + Seek,
    {
        original.seek(SeekFrom::Start(self.start_offset + 4))?;
        out.write_u32::<BigEndian>(FLAC_SIGNATURE)?;

        // offset and type byte of the block written last, for the final
        // last-block patch
        let mut last_block: Option<(u64, u8)> = None;

        loop {
            let header = FlacBlockHeader::read(original)?;
            match header.block_type {
                FlacBlockType::VorbisComment
                | FlacBlockType::Picture
                | FlacBlockType::Padding => {
                    original.seek(SeekFrom::Current(header.data_size as i64))?;
                }
                block_type => {
                    let offset = out.stream_position()?;
                    let rewritten = FlacBlockHeader::new(block_type, header.data_size, false);
                    rewritten.make(out)?;
                    copy_n(original, out, header.data_size as u64)?;
                    last_block = Some((offset, block_type.as_u8()));
                }
            }
            if header.is_last {
                break;
            }
        }

        if let Some(comment) = comment.or(self.vorbis_comment.as_ref()) {
            let body = comment.make(VorbisCommentFlags::flac(), diag)?;
            let has_covers = comment.has_covers();

            let offset = out.stream_position()?;
            let header = FlacBlockHeader::new(
                FlacBlockType::VorbisComment,
                body.len() as u32,
                !has_covers && !padding_follows,
            );
            header.make(out)?;
            out.write_all(&body)?;
            last_block = Some((offset, FlacBlockType::VorbisComment.as_u8()));

            let covers: Vec<_> = comment.covers().collect();
            let cover_count = covers.len();
            for (index, field) in covers.into_iter().enumerate() {
                let picture = field.value.as_picture()?;
                let offset = out.stream_position()?;
                let header = FlacBlockHeader::new(
                    FlacBlockType::Picture,
                    picture::required_size(picture),
                    index + 1 == cover_count && !padding_follows,
                );
                header.make(out)?;
                out.write_all(&picture::make_picture(picture))?;
                last_block = Some((offset, FlacBlockType::Picture.as_u8()));
            }
        }

        // without trailing padding the chain has to end explicitly
        if !padding_follows {
            match last_block {
                Some((offset, type_byte)) => {
                    let end = out.stream_position()?;
                    out.seek(SeekFrom::Start(offset))?;
                    out.write_u8(type_byte | 0x80)?;
                    out.seek(SeekFrom::Start(end))?;
                }
                None => {
                    return Err(TagError::InvalidData(
                        "FLAC stream has no metadata blocks to write".into(),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Exact size of the chain [`FlacStream::make_header`] writes, the
    /// signature included, given the original block chain in `original`.
    pub fn required_header_size<R: Read + Seek>(
        &self,
        comment: Option<&VorbisComment>,
        original: &mut R,
    ) -> Result<u64> {
        original.seek(SeekFrom::Start(self.start_offset + 4))?;
        let mut size = 4u64;
        loop {
            let header = FlacBlockHeader::read(original)?;
            original.seek(SeekFrom::Current(header.data_size as i64))?;
            match header.block_type {
                FlacBlockType::VorbisComment
                | FlacBlockType::Picture
                | FlacBlockType::Padding => {}
                _ => size += FlacBlockHeader::SIZE + header.data_size as u64,
            }
            if header.is_last {
                break;
            }
        }
        if let Some(comment) = comment.or(self.vorbis_comment.as_ref()) {
            size += FlacBlockHeader::SIZE + comment.required_size(VorbisCommentFlags::flac());
            for field in comment.covers() {
                let picture = field.value.as_picture()?;
                size += FlacBlockHeader::SIZE + picture::required_size(picture) as u64;
            }
        }
        Ok(size)
    }

    /// Write a PADDING block of `size` total bytes (header included).
    pub fn make_padding<W: Write>(out: &mut W, size: u64, is_last: bool) -> Result<()> {
        if size < FlacBlockHeader::SIZE || size - FlacBlockHeader::SIZE > 0xFF_FFFF {
            return Err(TagError::InvalidData(format!(
                "padding of {size} bytes is not representable"
            )));
        }
        let data_size = (size - FlacBlockHeader::SIZE) as u32;
        FlacBlockHeader::new(FlacBlockType::Padding, data_size, is_last).make(out)?;
        let zeroes = [0u8; 512];
        let mut remaining = data_size as usize;
        while remaining > 0 {
            let chunk = remaining.min(zeroes.len());
            out.write_all(&zeroes[..chunk])?;
            remaining -= chunk;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::KnownField;
    use crate::value::{Picture, PictureRole};
    use std::io::Cursor;
    use std::time::Duration;

    fn block(block_type: FlacBlockType, data: &[u8], is_last: bool) -> Vec<u8> {
        let mut out = Vec::new();
        FlacBlockHeader::new(block_type, data.len() as u32, is_last)
            .make(&mut out)
            .unwrap();
        out.extend_from_slice(data);
        out
    }

    fn minimal_flac() -> Vec<u8> {
        let mut file = b"fLaC".to_vec();
        let info = metadata::make_stream_info(44_100, 2, 16, 88_200);
        file.extend_from_slice(&block(FlacBlockType::StreamInfo, &info, true));
        file
    }

    #[test]
    fn minimal_file_fills_descriptor_without_tag() {
        let mut diag = Diagnostics::new();
        let stream = FlacStream::parse(&mut Cursor::new(minimal_flac()), 0, &mut diag).unwrap();
        assert_eq!(stream.descriptor.channel_count, 2);
        assert_eq!(stream.descriptor.sampling_frequency, 44_100);
        assert_eq!(stream.descriptor.bits_per_sample, 16);
        assert_eq!(stream.descriptor.sample_count, 88_200);
        assert_eq!(stream.descriptor.duration, Duration::from_secs(2));
        assert!(stream.vorbis_comment.is_none());
        assert!(diag.is_empty());
    }

    #[test]
    fn truncated_stream_info_is_diagnosed_and_skipped() {
        let mut file = b"fLaC".to_vec();
        file.extend_from_slice(&block(FlacBlockType::StreamInfo, &[0u8; 10], false));
        let info = metadata::make_stream_info(48_000, 1, 24, 48_000);
        file.extend_from_slice(&block(FlacBlockType::StreamInfo, &info, true));

        let mut diag = Diagnostics::new();
        let stream = FlacStream::parse(&mut Cursor::new(file), 0, &mut diag).unwrap();
        assert!(diag.has_critical());
        // the second, intact block still got parsed
        assert_eq!(stream.descriptor.sampling_frequency, 48_000);
    }

    #[test]
    fn padding_accumulates_with_headers() {
        let mut file = b"fLaC".to_vec();
        let info = metadata::make_stream_info(44_100, 2, 16, 0);
        file.extend_from_slice(&block(FlacBlockType::StreamInfo, &info, false));
        file.extend_from_slice(&block(FlacBlockType::Padding, &[0u8; 20], false));
        file.extend_from_slice(&block(FlacBlockType::Padding, &[0u8; 6], true));

        let mut diag = Diagnostics::new();
        let stream = FlacStream::parse(&mut Cursor::new(file), 0, &mut diag).unwrap();
        assert_eq!(stream.padding_size, 24 + 10);
    }

    fn cover(desc: &str, role: PictureRole) -> Picture {
        Picture {
            mime_type: "image/png".into(),
            description: desc.into(),
            role,
            width: 0,
            height: 0,
            depth: 0,
            colors: 0,
            data: vec![role as u8; 8],
        }
    }

    fn flac_with_comment_and_two_covers() -> Vec<u8> {
        let mut diag = Diagnostics::new();
        let mut comment = VorbisComment::default();
        comment.vendor = TagValue::utf8("vend");
        comment.set_value(KnownField::Artist, TagValue::utf8("X"));
        let body = comment.make(VorbisCommentFlags::flac(), &mut diag).unwrap();

        let mut file = b"fLaC".to_vec();
        let info = metadata::make_stream_info(44_100, 2, 16, 44_100);
        file.extend_from_slice(&block(FlacBlockType::StreamInfo, &info, false));
        file.extend_from_slice(&block(FlacBlockType::VorbisComment, &body, false));
        let front = picture::make_picture(&cover("front", PictureRole::CoverFront));
        file.extend_from_slice(&block(FlacBlockType::Picture, &front, false));
        let back = picture::make_picture(&cover("back", PictureRole::CoverBack));
        file.extend_from_slice(&block(FlacBlockType::Picture, &back, true));
        file.extend_from_slice(&[0xFF; 16]); // stand-in for audio frames
        file
    }

    #[test]
    fn covers_populate_comment_in_file_order() {
        let mut diag = Diagnostics::new();
        let stream =
            FlacStream::parse(&mut Cursor::new(flac_with_comment_and_two_covers()), 0, &mut diag)
                .unwrap();
        let comment = stream.vorbis_comment.as_ref().unwrap();
        assert_eq!(comment.vendor.as_text().unwrap(), "vend");
        assert_eq!(
            comment.value(KnownField::Artist).unwrap().as_text().unwrap(),
            "X"
        );
        let descriptions: Vec<String> = comment
            .covers()
            .map(|f| f.value.as_picture().unwrap().description.clone())
            .collect();
        assert_eq!(descriptions, ["front", "back"]);
    }

    #[test]
    fn make_header_orders_blocks_and_flags_last() {
        let original = flac_with_comment_and_two_covers();
        let mut diag = Diagnostics::new();
        let stream = FlacStream::parse(&mut Cursor::new(original.clone()), 0, &mut diag).unwrap();

        let mut out = Cursor::new(Vec::new());
        stream
            .make_header(None, &mut Cursor::new(original.clone()), &mut out, false, &mut diag)
            .unwrap();
        let bytes = out.into_inner();
        assert_eq!(
            bytes.len() as u64,
            stream
                .required_header_size(None, &mut Cursor::new(original))
                .unwrap()
        );

        // walk the produced chain: StreamInfo, VorbisComment, Picture, Picture(last)
        let mut cursor = Cursor::new(&bytes[4..]);
        let mut kinds = Vec::new();
        loop {
            let header = FlacBlockHeader::read(&mut cursor).unwrap();
            kinds.push((header.block_type, header.is_last));
            cursor
                .seek(SeekFrom::Current(header.data_size as i64))
                .unwrap();
            if header.is_last {
                break;
            }
        }
        assert_eq!(
            kinds,
            [
                (FlacBlockType::StreamInfo, false),
                (FlacBlockType::VorbisComment, false),
                (FlacBlockType::Picture, false),
                (FlacBlockType::Picture, true),
            ]
        );
    }

    #[test]
    fn rewritten_chain_parses_back_identically() {
        let original = flac_with_comment_and_two_covers();
        let mut diag = Diagnostics::new();
        let stream = FlacStream::parse(&mut Cursor::new(original.clone()), 0, &mut diag).unwrap();

        let mut out = Cursor::new(Vec::new());
        stream
            .make_header(None, &mut Cursor::new(original), &mut out, false, &mut diag)
            .unwrap();
        let rewritten = out.into_inner();

        let reparsed = FlacStream::parse(&mut Cursor::new(rewritten), 0, &mut diag).unwrap();
        let a = stream.vorbis_comment.unwrap();
        let b = reparsed.vorbis_comment.unwrap();
        assert_eq!(a.fields.len(), b.fields.len());
        assert_eq!(
            b.value(KnownField::Artist).unwrap().as_text().unwrap(),
            "X"
        );
        assert_eq!(b.covers().count(), 2);
    }

    #[test]
    fn padding_block_layout() {
        let mut out = Vec::new();
        FlacStream::make_padding(&mut out, 64, true).unwrap();
        assert_eq!(out.len(), 64);
        assert_eq!(out[0], 0x81);
        assert_eq!(&out[1..4], &[0, 0, 60]);
        assert!(out[4..].iter().all(|&b| b == 0));
        assert!(FlacStream::make_padding(&mut out, 3, true).is_err());
    }
}
