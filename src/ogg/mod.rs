// Ogg Vorbis backend: comment packet location and page-level rewriting
//
// Only the comment header packet is touched; identification and setup
// packets pass through untouched. A comment packet spanning multiple pages
// is refused rather than risking a broken lacing table.

pub mod page;

use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::diag::Diagnostics;
use crate::error::{Result, TagError};
use crate::track::{FormatId, MediaType, TrackDescriptor};
use crate::vorbis::{VorbisComment, VorbisCommentFlags};

pub use page::OGG_SIGNATURE;

use page::{apply_crc, lacing_for, OggPageHeader};

/// Where the comment packet lives, for the rewrite pass.
#[derive(Debug, Clone, Copy)]
pub struct CommentPageLocation {
    /// File offset of the page carrying the comment packet.
    pub page_offset: u64,
    /// Total size of that page.
    pub page_size: u64,
}

/// A parsed Ogg Vorbis file.
#[derive(Debug, Default)]
pub struct OggStream {
    pub descriptor: TrackDescriptor,
    pub comment: Option<VorbisComment>,
    pub comment_location: Option<CommentPageLocation>,
}

impl OggStream {
    /// Walk every page: identification header into the descriptor, the
    /// comment packet into a [`VorbisComment`], the final granule position
    /// into the duration.
    pub fn parse<R: Read + Seek>(
        reader: &mut R,
        file_size: u64,
        diag: &mut Diagnostics,
    ) -> Result<Self> {
        const CONTEXT: &str = "parsing Ogg stream";
        let mut stream = OggStream {
            descriptor: TrackDescriptor::new(MediaType::Audio, FormatId::Vorbis),
            ..Default::default()
        };
        let mut last_granule = 0u64;
        let mut offset = 0u64;

        while offset + 27 <= file_size {
            reader.seek(SeekFrom::Start(offset))?;
            let header = match OggPageHeader::read(reader) {
                Ok(header) => header,
                Err(e) if e.is_fatal() => return Err(e),
                Err(_) => {
                    diag.critical(CONTEXT, "Page capture pattern lost; remaining pages ignored.");
                    break;
                }
            };
            let data_offset = offset + header.header_size() as u64;

            if header.page_sequence == 0 {
                let mut marker = [0u8; 7];
                if reader.read_exact(&mut marker).is_ok() && &marker == b"\x01vorbis" {
                    reader.read_u32::<LittleEndian>()?; // vorbis version
                    stream.descriptor.channel_count = reader.read_u8()? as u16;
                    stream.descriptor.sampling_frequency = reader.read_u32::<LittleEndian>()?;
                    reader.seek(SeekFrom::Current(4))?; // maximum bitrate
                    stream.descriptor.bitrate_kbps = reader.read_u32::<LittleEndian>()? / 1000;
                } else {
                    diag.warning(CONTEXT, "First page holds no Vorbis identification header.");
                }
                stream.descriptor.start_offset = offset;
            } else if stream.comment.is_none() && header.page_sequence == 1 {
                match header.first_packet_size() {
                    Some(packet_size) => {
                        reader.seek(SeekFrom::Start(data_offset))?;
                        let mut packet = vec![0u8; packet_size];
                        reader.read_exact(&mut packet)?;
                        if packet.starts_with(b"\x03vorbis") {
                            let mut comment = VorbisComment::default();
                            match comment.parse(&packet, VorbisCommentFlags::ogg(), diag) {
                                Ok(()) => {
                                    stream.comment = Some(comment);
                                    stream.comment_location = Some(CommentPageLocation {
                                        page_offset: offset,
                                        page_size: header.total_size() as u64,
                                    });
                                }
                                Err(e) if !e.is_fatal() => {
                                    diag.critical(
                                        CONTEXT,
                                        format!("Comment header is invalid ({e}) and will be ignored."),
                                    );
                                }
                                Err(e) => return Err(e),
                            }
                        }
                    }
                    None => {
                        diag.warning(
                            CONTEXT,
                            "Comment packet spans several pages; editing it is not supported.",
                        );
                    }
                }
            }

            if header.granule_position != u64::MAX {
                last_granule = last_granule.max(header.granule_position);
            }
            offset += header.total_size() as u64;
        }

        if stream.descriptor.sampling_frequency > 0 {
            stream
                .descriptor
                .set_extent(last_granule, stream.descriptor.sampling_frequency);
        }
        stream.descriptor.stream_offset = stream.descriptor.start_offset;
        Ok(stream)
    }

    /// Build the replacement page for the comment page: the new comment
    /// packet followed by whatever other packets the page carried.
    ///
    /// The comment to serialize is passed in; the one captured at parse
    /// time is only a default for callers that never moved it out.
    pub fn make_comment_page(
        &self,
        comment: Option<&VorbisComment>,
        original_page: &[u8],
        diag: &mut Diagnostics,
    ) -> Result<Vec<u8>> {
        let comment = comment.or(self.comment.as_ref()).ok_or(TagError::NoTag)?;
        let header = OggPageHeader::read(&mut std::io::Cursor::new(original_page))?;
        let packet_size = header.first_packet_size().ok_or_else(|| {
            TagError::InvalidData("comment packet spans several pages".into())
        })?;

        let new_packet = comment.make(VorbisCommentFlags::ogg(), diag)?;
        let kept_segments = header.first_packet_segments();
        let trailing_lacing = &header.segment_table[kept_segments..];
        let trailing_data = &original_page[header.header_size() + packet_size..];

        let mut lacing = lacing_for(new_packet.len());
        lacing.extend_from_slice(trailing_lacing);
        if lacing.len() > 255 {
            return Err(TagError::InvalidData(
                "rewritten comment page needs more than 255 segments".into(),
            ));
        }

        let mut out = Vec::with_capacity(27 + lacing.len() + new_packet.len() + trailing_data.len());
        out.extend_from_slice(&original_page[..26]);
        out.push(lacing.len() as u8);
        out.extend_from_slice(&lacing);
        out.extend_from_slice(&new_packet);
        out.extend_from_slice(trailing_data);
        apply_crc(&mut out);
        Ok(out)
    }
}
