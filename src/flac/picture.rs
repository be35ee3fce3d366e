// FLAC PICTURE block codec
//
// The same structure is carried base64-encoded in Ogg Vorbis comments under
// METADATA_BLOCK_PICTURE, so the Vorbis backend reuses this codec. The image
// payload itself is opaque; only the outer structure is decoded.

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{Result, TagError};
use crate::value::{Picture, PictureRole};

const CONTEXT: &str = "METADATA_BLOCK_PICTURE";

fn read_block<'a>(data: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if data.len() < len {
        return Err(TagError::Truncated { context: CONTEXT });
    }
    let (head, tail) = data.split_at(len);
    *data = tail;
    Ok(head)
}

/// Decode a picture structure from a metadata block payload.
pub fn parse_picture(mut data: &[u8]) -> Result<Picture> {
    let role = PictureRole::from_u32(data.read_u32::<BigEndian>().map_err(truncated)?);

    let mime_len = data.read_u32::<BigEndian>().map_err(truncated)? as usize;
    let mime_type = String::from_utf8_lossy(read_block(&mut data, mime_len)?).into_owned();

    let desc_len = data.read_u32::<BigEndian>().map_err(truncated)? as usize;
    let description = String::from_utf8(read_block(&mut data, desc_len)?.to_vec())
        .map_err(|_| TagError::BadUtf8 { context: CONTEXT })?;

    let width = data.read_u32::<BigEndian>().map_err(truncated)?;
    let height = data.read_u32::<BigEndian>().map_err(truncated)?;
    let depth = data.read_u32::<BigEndian>().map_err(truncated)?;
    let colors = data.read_u32::<BigEndian>().map_err(truncated)?;

    let data_len = data.read_u32::<BigEndian>().map_err(truncated)? as usize;
    let payload = read_block(&mut data, data_len)?.to_vec();

    Ok(Picture {
        mime_type,
        description,
        role,
        width,
        height,
        depth,
        colors,
        data: payload,
    })
}

/// Serialize a picture structure to metadata block payload bytes.
pub fn make_picture(picture: &Picture) -> Vec<u8> {
    let mut out = Vec::with_capacity(required_size(picture) as usize);
    out.extend_from_slice(&(picture.role as u32).to_be_bytes());
    out.extend_from_slice(&(picture.mime_type.len() as u32).to_be_bytes());
    out.extend_from_slice(picture.mime_type.as_bytes());
    out.extend_from_slice(&(picture.description.len() as u32).to_be_bytes());
    out.extend_from_slice(picture.description.as_bytes());
    out.extend_from_slice(&picture.width.to_be_bytes());
    out.extend_from_slice(&picture.height.to_be_bytes());
    out.extend_from_slice(&picture.depth.to_be_bytes());
    out.extend_from_slice(&picture.colors.to_be_bytes());
    out.extend_from_slice(&(picture.data.len() as u32).to_be_bytes());
    out.extend_from_slice(&picture.data);
    out
}

/// Exact serialized size of the picture structure.
pub fn required_size(picture: &Picture) -> u32 {
    (8 * 4 + picture.mime_type.len() + picture.description.len() + picture.data.len()) as u32
}

fn truncated(_: std::io::Error) -> TagError {
    TagError::Truncated { context: CONTEXT }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Picture {
        Picture {
            mime_type: "image/png".into(),
            description: "front".into(),
            role: PictureRole::CoverFront,
            width: 600,
            height: 600,
            depth: 24,
            colors: 0,
            data: vec![0x89, 0x50, 0x4E, 0x47],
        }
    }

    #[test]
    fn round_trip() {
        let picture = sample();
        let bytes = make_picture(&picture);
        assert_eq!(bytes.len() as u32, required_size(&picture));
        let parsed = parse_picture(&bytes).unwrap();
        assert_eq!(parsed, picture);
    }

    #[test]
    fn truncated_payload_is_detected() {
        let bytes = make_picture(&sample());
        let err = parse_picture(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, TagError::Truncated { .. }));
    }
}
