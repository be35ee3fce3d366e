// FLAC metadata block headers and the STREAMINFO block

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, TagError};

/// FLAC metadata block types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlacBlockType {
    StreamInfo,
    Padding,
    Application,
    SeekTable,
    VorbisComment,
    CueSheet,
    Picture,
    Reserved(u8),
    Invalid,
}

impl FlacBlockType {
    pub fn from_u8(byte: u8) -> Self {
        match byte {
            0 => FlacBlockType::StreamInfo,
            1 => FlacBlockType::Padding,
            2 => FlacBlockType::Application,
            3 => FlacBlockType::SeekTable,
            4 => FlacBlockType::VorbisComment,
            5 => FlacBlockType::CueSheet,
            6 => FlacBlockType::Picture,
            127 => FlacBlockType::Invalid,
            other => FlacBlockType::Reserved(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            FlacBlockType::StreamInfo => 0,
            FlacBlockType::Padding => 1,
            FlacBlockType::Application => 2,
            FlacBlockType::SeekTable => 3,
            FlacBlockType::VorbisComment => 4,
            FlacBlockType::CueSheet => 5,
            FlacBlockType::Picture => 6,
            FlacBlockType::Reserved(other) => *other,
            FlacBlockType::Invalid => 127,
        }
    }
}

/// The 4-byte header preceding each metadata block: last-block flag,
/// 7-bit type, 24-bit big-endian data size.
#[derive(Debug, Clone, Copy)]
pub struct FlacBlockHeader {
    pub is_last: bool,
    pub block_type: FlacBlockType,
    pub data_size: u32,
}

impl FlacBlockHeader {
    pub const SIZE: u64 = 4;

    pub fn new(block_type: FlacBlockType, data_size: u32, is_last: bool) -> Self {
        FlacBlockHeader {
            is_last,
            block_type,
            data_size,
        }
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buffer = [0u8; 4];
        reader.read_exact(&mut buffer)?;
        Ok(FlacBlockHeader {
            is_last: buffer[0] & 0x80 != 0,
            block_type: FlacBlockType::from_u8(buffer[0] & 0x7F),
            data_size: ((buffer[1] as u32) << 16) | ((buffer[2] as u32) << 8) | buffer[3] as u32,
        })
    }

    pub fn make<W: Write>(&self, writer: &mut W) -> Result<()> {
        let type_byte = self.block_type.as_u8() | if self.is_last { 0x80 } else { 0 };
        writer.write_u8(type_byte)?;
        writer.write_u24::<BigEndian>(self.data_size)?;
        Ok(())
    }
}

/// Decoded STREAMINFO block.
#[derive(Debug, Clone, Copy)]
pub struct FlacStreamInfo {
    pub min_block_size: u16,
    pub max_block_size: u16,
    pub min_frame_size: u32,
    pub max_frame_size: u32,
    pub sampling_frequency: u32,
    pub channel_count: u16,
    pub bits_per_sample: u16,
    pub total_sample_count: u64,
    pub md5: [u8; 16],
}

impl FlacStreamInfo {
    /// Minimum STREAMINFO payload size.
    pub const SIZE: u32 = 0x22;

    /// Decode the 34-byte STREAMINFO payload.
    ///
    /// Bit layout after the four length fields: 20 bits sample rate,
    /// 3 bits channels-1, 5 bits bits-per-sample-1, 36 bits sample count.
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < Self::SIZE as usize {
            return Err(TagError::Truncated {
                context: "METADATA_BLOCK_STREAMINFO",
            });
        }
        let mut cursor = &buffer[..];
        let min_block_size = cursor.read_u16::<BigEndian>()?;
        let max_block_size = cursor.read_u16::<BigEndian>()?;
        let min_frame_size = cursor.read_u24::<BigEndian>()?;
        let max_frame_size = cursor.read_u24::<BigEndian>()?;

        let packed = &buffer[10..18];
        let sampling_frequency = ((packed[0] as u32) << 12)
            | ((packed[1] as u32) << 4)
            | ((packed[2] as u32) >> 4);
        let channel_count = (((packed[2] >> 1) & 0x07) + 1) as u16;
        let bits_per_sample = ((((packed[2] & 0x01) << 4) | (packed[3] >> 4)) + 1) as u16;
        let total_sample_count = (((packed[3] & 0x0F) as u64) << 32)
            | ((packed[4] as u64) << 24)
            | ((packed[5] as u64) << 16)
            | ((packed[6] as u64) << 8)
            | packed[7] as u64;

        let mut md5 = [0u8; 16];
        md5.copy_from_slice(&buffer[18..34]);

        Ok(FlacStreamInfo {
            min_block_size,
            max_block_size,
            min_frame_size,
            max_frame_size,
            sampling_frequency,
            channel_count,
            bits_per_sample,
            total_sample_count,
            md5,
        })
    }
}

#[cfg(test)]
pub(crate) fn make_stream_info(
    sampling_frequency: u32,
    channel_count: u16,
    bits_per_sample: u16,
    total_sample_count: u64,
) -> Vec<u8> {
    let mut buffer = vec![0u8; 34];
    buffer[0..2].copy_from_slice(&4096u16.to_be_bytes());
    buffer[2..4].copy_from_slice(&4096u16.to_be_bytes());
    buffer[10] = (sampling_frequency >> 12) as u8;
    buffer[11] = (sampling_frequency >> 4) as u8;
    buffer[12] = ((sampling_frequency << 4) as u8 & 0xF0)
        | (((channel_count - 1) as u8 & 0x07) << 1)
        | (((bits_per_sample - 1) >> 4) as u8 & 0x01);
    buffer[13] = ((((bits_per_sample - 1) & 0x0F) as u8) << 4)
        | ((total_sample_count >> 32) as u8 & 0x0F);
    buffer[14..18].copy_from_slice(&(total_sample_count as u32).to_be_bytes());
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_round_trip() {
        let header = FlacBlockHeader::new(FlacBlockType::VorbisComment, 0x012345, true);
        let mut out = Vec::new();
        header.make(&mut out).unwrap();
        assert_eq!(out, [0x84, 0x01, 0x23, 0x45]);

        let parsed = FlacBlockHeader::read(&mut Cursor::new(out)).unwrap();
        assert!(parsed.is_last);
        assert_eq!(parsed.block_type, FlacBlockType::VorbisComment);
        assert_eq!(parsed.data_size, 0x012345);
    }

    #[test]
    fn stream_info_unpacks_fields() {
        let buffer = make_stream_info(44_100, 2, 16, 88_200);
        let info = FlacStreamInfo::parse(&buffer).unwrap();
        assert_eq!(info.sampling_frequency, 44_100);
        assert_eq!(info.channel_count, 2);
        assert_eq!(info.bits_per_sample, 16);
        assert_eq!(info.total_sample_count, 88_200);
    }

    #[test]
    fn stream_info_rejects_short_buffer() {
        let err = FlacStreamInfo::parse(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, TagError::Truncated { .. }));
    }

    #[test]
    fn twenty_bit_rate_and_wide_sample_count() {
        let buffer = make_stream_info(655_350, 8, 32, 0x0F_FFFF_FFFF);
        let info = FlacStreamInfo::parse(&buffer).unwrap();
        assert_eq!(info.sampling_frequency, 655_350);
        assert_eq!(info.channel_count, 8);
        assert_eq!(info.bits_per_sample, 32);
        assert_eq!(info.total_sample_count, 0x0F_FFFF_FFFF);
    }
}
