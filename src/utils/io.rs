// I/O primitives shared by the format backends

use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{Result, TagError};

/// Read a synchsafe 32-bit integer (7 bits per byte, ID3).
pub fn read_synchsafe_u32<R: Read>(reader: &mut R) -> std::io::Result<u32> {
    let mut buffer = [0u8; 4];
    reader.read_exact(&mut buffer)?;
    Ok(((buffer[0] as u32 & 0x7F) << 21)
        | ((buffer[1] as u32 & 0x7F) << 14)
        | ((buffer[2] as u32 & 0x7F) << 7)
        | (buffer[3] as u32 & 0x7F))
}

/// Encode a 32-bit integer as 4 synchsafe bytes. The value must fit in 28 bits.
pub fn synchsafe_bytes(value: u32) -> [u8; 4] {
    [
        ((value >> 21) & 0x7F) as u8,
        ((value >> 14) & 0x7F) as u8,
        ((value >> 7) & 0x7F) as u8,
        (value & 0x7F) as u8,
    ]
}

/// Copy exactly `count` bytes from the reader's current position to the
/// writer. Fails with [`TagError::Truncated`] when the source runs dry.
pub fn copy_n<R: Read, W: Write>(reader: &mut R, writer: &mut W, mut count: u64) -> Result<()> {
    let mut buffer = [0u8; 8192];
    while count > 0 {
        let chunk = count.min(buffer.len() as u64) as usize;
        let got = reader.read(&mut buffer[..chunk])?;
        if got == 0 {
            return Err(TagError::Truncated {
                context: "copied region",
            });
        }
        writer.write_all(&buffer[..got])?;
        count -= got as u64;
    }
    Ok(())
}

/// Check whether the stream carries `signature` at its current position.
/// The read position is restored on every exit path.
pub fn check_signature<R: Read + Seek>(reader: &mut R, signature: &[u8]) -> std::io::Result<bool> {
    let pos = reader.stream_position()?;
    let mut buffer = vec![0u8; signature.len()];
    let outcome = match reader.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == signature),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    };
    reader.seek(SeekFrom::Start(pos))?;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn synchsafe_round_trip() {
        for value in [0u32, 1, 127, 128, 0x0FFF_FFFF] {
            let bytes = synchsafe_bytes(value);
            let mut cursor = Cursor::new(bytes.to_vec());
            assert_eq!(read_synchsafe_u32(&mut cursor).unwrap(), value);
        }
    }

    #[test]
    fn synchsafe_keeps_high_bits_clear() {
        let bytes = synchsafe_bytes(0x0FFF_FFFF);
        assert!(bytes.iter().all(|b| b & 0x80 == 0));
    }

    #[test]
    fn copy_n_copies_exact_count() {
        let src: Vec<u8> = (0..100u8).collect();
        let mut reader = Cursor::new(src.clone());
        let mut out = Vec::new();
        copy_n(&mut reader, &mut out, 42).unwrap();
        assert_eq!(out, &src[..42]);
    }

    #[test]
    fn copy_n_reports_truncation() {
        let mut reader = Cursor::new(vec![0u8; 10]);
        let mut out = Vec::new();
        let err = copy_n(&mut reader, &mut out, 11).unwrap_err();
        assert!(matches!(err, TagError::Truncated { .. }));
    }

    #[test]
    fn signature_probe_restores_position() {
        let mut reader = Cursor::new(b"fLaC....".to_vec());
        assert!(check_signature(&mut reader, b"fLaC").unwrap());
        assert!(!check_signature(&mut reader, b"OggS").unwrap());
        assert_eq!(reader.stream_position().unwrap(), 0);
    }
}
