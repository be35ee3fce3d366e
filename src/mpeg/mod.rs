// MPEG audio frame header decoding, including the Xing/Info header

use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt};

use crate::diag::Diagnostics;
use crate::error::{Result, TagError};
use crate::track::{FormatId, MediaType, TrackDescriptor};

/// 11-bit frame sync in the top bits of the header word.
const SYNC_MASK: u32 = 0xFFE0_0000;

/// Channel mode from header bits 6-7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegChannelMode {
    Stereo,
    JointStereo,
    DualChannel,
    SingleChannel,
    /// Only reported for invalid frames.
    Unspecified,
}

/// Xing header flag bits.
pub struct XingHeaderFlags;
impl XingHeaderFlags {
    pub const HAS_FRAMES_FIELD: u32 = 0x1;
    pub const HAS_BYTES_FIELD: u32 = 0x2;
    pub const HAS_TOC_FIELD: u32 = 0x4;
    pub const HAS_QUALITY_INDICATOR: u32 = 0x8;
}

/// Bitrates in kbit/s, indexed by [version-class][layer - 1][bits 12-15].
/// Index 0 is "free format", index 15 is reserved; both decode to 0 here.
const BITRATE_TABLE: [[[u32; 15]; 3]; 2] = [
    // MPEG 1.0
    [
        [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
        [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
    ],
    // MPEG 2.0 / 2.5
    [
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
    ],
];

/// A decoded MPEG audio frame header plus the optional Xing/Info fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct MpegAudioFrame {
    header: u32,
    xing_header: u64,
    xing_flags: u32,
    xing_frame_count: u32,
    xing_bytes_field: u32,
    xing_quality_indicator: u32,
}

impl MpegAudioFrame {
    /// Read and decode the 32-bit header word at the reader's position,
    /// followed by the Xing/Info header when one is present.
    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let frame_start = reader.stream_position()?;
        let mut frame = MpegAudioFrame {
            header: reader.read_u32::<BigEndian>()?,
            ..Default::default()
        };
        if !frame.is_valid() {
            return Err(TagError::InvalidSync);
        }
        // both table lookups must resolve before the frame is usable
        frame.bitrate()?;
        frame.sampling_frequency()?;

        // the Xing/Info header sits after the side info, whose size depends
        // on version and channel mode
        let offset = frame_start + frame.xing_offset();
        if reader.seek(SeekFrom::Start(offset)).is_ok() {
            if let Ok(marker) = reader.read_u64::<BigEndian>() {
                frame.xing_header = marker;
                if frame.is_xing_header_available() {
                    frame.xing_flags = marker as u32;
                    if frame.is_xing_frame_field_present() {
                        frame.xing_frame_count = reader.read_u32::<BigEndian>()?;
                    }
                    if frame.is_xing_bytes_field_present() {
                        frame.xing_bytes_field = reader.read_u32::<BigEndian>()?;
                    }
                    if frame.is_xing_toc_field_present() {
                        reader.seek(SeekFrom::Current(100))?;
                    }
                    if frame.is_xing_quality_indicator_field_present() {
                        frame.xing_quality_indicator = reader.read_u32::<BigEndian>()?;
                    }
                }
            }
        }
        Ok(frame)
    }

    pub fn is_valid(&self) -> bool {
        self.header & SYNC_MASK == SYNC_MASK
    }

    /// MPEG version: 1.0, 2.0 or 2.5; 0.0 when reserved.
    pub fn mpeg_version(&self) -> f64 {
        match (self.header & 0x18_0000) >> 19 {
            0b00 => 2.5,
            0b10 => 2.0,
            0b11 => 1.0,
            _ => 0.0,
        }
    }

    /// Layer 1-3; 0 when reserved.
    pub fn layer(&self) -> u8 {
        match (self.header & 0x06_0000) >> 17 {
            0b01 => 3,
            0b10 => 2,
            0b11 => 1,
            _ => 0,
        }
    }

    /// CRC protection is signalled by a cleared bit 16.
    pub fn is_protected_by_crc(&self) -> bool {
        self.header & 0x1_0000 == 0
    }

    /// Bitrate in kbit/s from the 2x3x15 table.
    pub fn bitrate(&self) -> Result<u32> {
        let version = self.mpeg_version();
        let layer = self.layer();
        if version == 0.0 {
            return Err(TagError::ReservedField {
                field: "MPEG version",
            });
        }
        if layer == 0 {
            return Err(TagError::ReservedField { field: "layer" });
        }
        let index = ((self.header & 0xF000) >> 12) as usize;
        if index == 15 {
            return Err(TagError::ReservedField {
                field: "bitrate index",
            });
        }
        let class = if version == 1.0 { 0 } else { 1 };
        Ok(BITRATE_TABLE[class][layer as usize - 1][index])
    }

    /// Sampling frequency in Hz from bits 10-11 and the version.
    pub fn sampling_frequency(&self) -> Result<u32> {
        let base = match (self.header & 0x0C00) >> 10 {
            0b00 => 44_100,
            0b01 => 48_000,
            0b10 => 32_000,
            _ => {
                return Err(TagError::ReservedField {
                    field: "sampling frequency index",
                })
            }
        };
        Ok(match self.mpeg_version() {
            v if v == 1.0 => base,
            v if v == 2.0 => base / 2,
            v if v == 2.5 => base / 4,
            _ => {
                return Err(TagError::ReservedField {
                    field: "MPEG version",
                })
            }
        })
    }

    /// Bytes of padding in this frame: 4 for layer I, 1 otherwise,
    /// 0 when the padding bit is clear.
    pub fn padding_size(&self) -> u32 {
        if self.header & 0x200 == 0 {
            0
        } else if self.layer() == 1 {
            4
        } else {
            1
        }
    }

    pub fn channel_mode(&self) -> MpegChannelMode {
        if !self.is_valid() {
            return MpegChannelMode::Unspecified;
        }
        match (self.header & 0xC0) >> 6 {
            0b00 => MpegChannelMode::Stereo,
            0b01 => MpegChannelMode::JointStereo,
            0b10 => MpegChannelMode::DualChannel,
            _ => MpegChannelMode::SingleChannel,
        }
    }

    pub fn has_copyright(&self) -> bool {
        self.header & 0x8 != 0
    }

    pub fn is_original(&self) -> bool {
        self.header & 0x4 != 0
    }

    /// Samples per frame for this version and layer.
    pub fn sample_count(&self) -> u32 {
        match self.layer() {
            1 => 384,
            2 => 1152,
            3 => {
                if self.mpeg_version() == 1.0 {
                    1152
                } else {
                    576
                }
            }
            _ => 0,
        }
    }

    /// Total frame size in bytes derived from bitrate and sampling rate.
    pub fn size(&self) -> Result<u32> {
        let bitrate = self.bitrate()? * 1000;
        let rate = self.sampling_frequency()?;
        if bitrate == 0 || rate == 0 {
            return Ok(0);
        }
        Ok(match self.layer() {
            1 => (12 * bitrate / rate + self.padding_size() / 4) * 4,
            _ => self.sample_count() / 8 * bitrate / rate + self.padding_size(),
        })
    }

    /// Offset of the Xing/Info marker from the frame start.
    fn xing_offset(&self) -> u64 {
        let mono = self.channel_mode() == MpegChannelMode::SingleChannel;
        if self.mpeg_version() == 1.0 {
            if mono {
                0x15
            } else {
                0x24
            }
        } else if mono {
            0x0D
        } else {
            0x15
        }
    }

    pub fn is_xing_header_available(&self) -> bool {
        const XING: u64 = 0x5869_6E67_0000_0000;
        const INFO: u64 = 0x496E_666F_0000_0000;
        (self.xing_header & 0xFFFF_FFFF_0000_0000) == XING
            || (self.xing_header & 0xFFFF_FFFF_0000_0000) == INFO
    }

    pub fn xing_header_flags(&self) -> u32 {
        self.xing_flags
    }

    pub fn is_xing_frame_field_present(&self) -> bool {
        self.is_xing_header_available()
            && self.xing_flags & XingHeaderFlags::HAS_FRAMES_FIELD != 0
    }

    pub fn is_xing_bytes_field_present(&self) -> bool {
        self.is_xing_header_available() && self.xing_flags & XingHeaderFlags::HAS_BYTES_FIELD != 0
    }

    pub fn is_xing_toc_field_present(&self) -> bool {
        self.is_xing_header_available() && self.xing_flags & XingHeaderFlags::HAS_TOC_FIELD != 0
    }

    pub fn is_xing_quality_indicator_field_present(&self) -> bool {
        self.is_xing_header_available()
            && self.xing_flags & XingHeaderFlags::HAS_QUALITY_INDICATOR != 0
    }

    pub fn xing_frame_count(&self) -> u32 {
        self.xing_frame_count
    }

    pub fn xing_bytes_field(&self) -> u32 {
        self.xing_bytes_field
    }

    pub fn xing_quality_indicator(&self) -> u32 {
        self.xing_quality_indicator
    }

    fn format_id(&self) -> FormatId {
        match (self.mpeg_version(), self.layer()) {
            (v, 1) if v == 1.0 => FormatId::Mpeg1Layer1,
            (v, 2) if v == 1.0 => FormatId::Mpeg1Layer2,
            (v, 3) if v == 1.0 => FormatId::Mpeg1Layer3,
            _ => FormatId::Other,
        }
    }
}

/// The audio portion of an MPEG file: the first frame plus derived totals.
#[derive(Debug, Default)]
pub struct MpegStream {
    pub first_frame: MpegAudioFrame,
    pub descriptor: TrackDescriptor,
}

impl MpegStream {
    /// Locate and decode the first audio frame at or after `start_offset`,
    /// scanning past garbage for at most 8 KiB.
    pub fn parse<R: Read + Seek>(
        reader: &mut R,
        start_offset: u64,
        stream_size: u64,
        diag: &mut Diagnostics,
    ) -> Result<Self> {
        const CONTEXT: &str = "parsing MPEG audio frame";
        const SCAN_LIMIT: u64 = 8192;

        let mut offset = start_offset;
        let frame = loop {
            reader.seek(SeekFrom::Start(offset))?;
            match MpegAudioFrame::parse(reader) {
                Ok(frame) => break frame,
                Err(e) if e.is_fatal() => return Err(e),
                Err(_) if offset - start_offset < SCAN_LIMIT => {
                    offset += 1;
                }
                Err(_) => {
                    diag.critical(CONTEXT, "No valid MPEG frame found.");
                    return Err(TagError::InvalidSync);
                }
            }
        };
        if offset != start_offset {
            diag.warning(
                CONTEXT,
                format!("First frame found {} bytes past the expected offset.", offset - start_offset),
            );
        }

        let mut descriptor = TrackDescriptor::new(MediaType::Audio, frame.format_id());
        descriptor.start_offset = offset;
        descriptor.stream_offset = offset;
        descriptor.channel_count = match frame.channel_mode() {
            MpegChannelMode::SingleChannel => 1,
            _ => 2,
        };
        let rate = frame.sampling_frequency()?;
        let bitrate = frame.bitrate()?;

        if frame.is_xing_frame_field_present() {
            let samples = frame.xing_frame_count() as u64 * frame.sample_count() as u64;
            descriptor.set_extent(samples, rate);
            if frame.is_xing_bytes_field_present() && !descriptor.duration.is_zero() {
                descriptor.bitrate_kbps = (frame.xing_bytes_field() as f64 * 8.0
                    / descriptor.duration.as_secs_f64()
                    / 1000.0) as u32;
            } else {
                descriptor.bitrate_kbps = bitrate;
            }
        } else {
            descriptor.bitrate_kbps = bitrate;
            descriptor.sampling_frequency = rate;
            if bitrate > 0 {
                let media_bytes = stream_size.saturating_sub(offset);
                let seconds = media_bytes as f64 * 8.0 / (bitrate as f64 * 1000.0);
                descriptor.duration = std::time::Duration::from_secs_f64(seconds);
                descriptor.sample_count =
                    (seconds * rate as f64) as u64;
            }
        }

        Ok(MpegStream {
            first_frame: frame,
            descriptor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frame_bytes(header: u32, len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        data[..4].copy_from_slice(&header.to_be_bytes());
        data
    }

    #[test]
    fn reference_header_decodes() {
        // MPEG-1 Layer III, 128 kbps, 44100 Hz, no padding, stereo
        let data = frame_bytes(0xFFFB_9000, 417);
        let frame = MpegAudioFrame::parse(&mut Cursor::new(data)).unwrap();
        assert!(frame.is_valid());
        assert_eq!(frame.mpeg_version(), 1.0);
        assert_eq!(frame.layer(), 3);
        assert!(!frame.is_protected_by_crc());
        assert_eq!(frame.bitrate().unwrap(), 128);
        assert_eq!(frame.sampling_frequency().unwrap(), 44_100);
        assert_eq!(frame.padding_size(), 0);
        assert_eq!(frame.channel_mode(), MpegChannelMode::Stereo);
        assert_eq!(frame.sample_count(), 1152);
    }

    #[test]
    fn bad_sync_is_rejected() {
        let err = MpegAudioFrame::parse(&mut Cursor::new(frame_bytes(0x0000_9000, 8))).unwrap_err();
        assert!(matches!(err, TagError::InvalidSync));
    }

    #[test]
    fn reserved_bitrate_index_is_rejected() {
        let err = MpegAudioFrame::parse(&mut Cursor::new(frame_bytes(0xFFFB_F000, 8))).unwrap_err();
        assert!(matches!(
            err,
            TagError::ReservedField {
                field: "bitrate index"
            }
        ));
    }

    #[test]
    fn reserved_sampling_index_is_rejected() {
        let err = MpegAudioFrame::parse(&mut Cursor::new(frame_bytes(0xFFFB_9C00, 8))).unwrap_err();
        assert!(matches!(
            err,
            TagError::ReservedField {
                field: "sampling frequency index"
            }
        ));
    }

    #[test]
    fn mpeg2_halves_sampling_frequency() {
        // version bits = 10 (MPEG 2.0), layer III, samplerate index 0
        let data = frame_bytes(0xFFF3_9000, 417);
        let frame = MpegAudioFrame::parse(&mut Cursor::new(data)).unwrap();
        assert_eq!(frame.mpeg_version(), 2.0);
        assert_eq!(frame.sampling_frequency().unwrap(), 22_050);
        assert_eq!(frame.sample_count(), 576);
    }

    fn xing_frame(flags: u32, fields: &[u32]) -> Vec<u8> {
        let mut data = frame_bytes(0xFFFB_9000, 417);
        // stereo MPEG-1 puts the marker at 0x24
        data[0x24..0x28].copy_from_slice(b"Xing");
        data[0x28..0x2C].copy_from_slice(&flags.to_be_bytes());
        let mut pos = 0x2C;
        for field in fields {
            data[pos..pos + 4].copy_from_slice(&field.to_be_bytes());
            pos += 4;
        }
        data
    }

    #[test]
    fn xing_fields_parse_in_fixed_order() {
        let data = xing_frame(
            XingHeaderFlags::HAS_FRAMES_FIELD | XingHeaderFlags::HAS_BYTES_FIELD,
            &[1000, 4_000_000],
        );
        let frame = MpegAudioFrame::parse(&mut Cursor::new(data)).unwrap();
        assert!(frame.is_xing_header_available());
        assert!(frame.is_xing_frame_field_present());
        assert!(frame.is_xing_bytes_field_present());
        assert!(!frame.is_xing_toc_field_present());
        assert_eq!(frame.xing_frame_count(), 1000);
        assert_eq!(frame.xing_bytes_field(), 4_000_000);
    }

    #[test]
    fn bytes_field_presence_tracks_its_own_flag() {
        let data = xing_frame(XingHeaderFlags::HAS_FRAMES_FIELD, &[1000]);
        let frame = MpegAudioFrame::parse(&mut Cursor::new(data)).unwrap();
        assert!(frame.is_xing_frame_field_present());
        assert!(!frame.is_xing_bytes_field_present());
        assert_eq!(frame.xing_bytes_field(), 0);
    }

    #[test]
    fn stream_duration_from_xing_frame_count() {
        // 1000 frames x 1152 samples at 44100 Hz
        let data = xing_frame(XingHeaderFlags::HAS_FRAMES_FIELD, &[1000]);
        let mut diag = Diagnostics::new();
        let len = data.len() as u64;
        let stream = MpegStream::parse(&mut Cursor::new(data), 0, len, &mut diag).unwrap();
        assert_eq!(stream.descriptor.sample_count, 1_152_000);
        let expected = 1_152_000f64 / 44_100f64;
        assert!((stream.descriptor.duration.as_secs_f64() - expected).abs() < 1e-6);
    }

    #[test]
    fn stream_scans_past_leading_garbage() {
        let mut data = vec![0u8; 100];
        data.extend_from_slice(&frame_bytes(0xFFFB_9000, 417));
        let mut diag = Diagnostics::new();
        let len = data.len() as u64;
        let stream = MpegStream::parse(&mut Cursor::new(data), 0, len, &mut diag).unwrap();
        assert_eq!(stream.descriptor.start_offset, 100);
        assert!(!diag.is_empty());
    }
}
