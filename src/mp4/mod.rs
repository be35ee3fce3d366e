// MP4/M4A backend: atom tree, iTunes tag and moov rewriting

pub mod atom;
pub mod ids;
pub mod tag;

use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt};

use crate::diag::Diagnostics;
use crate::error::{Result, TagError};
use crate::track::{FormatId, MediaType, TrackDescriptor};

use atom::AtomArena;
use ids::{atom_ids, fourcc, fourcc_string, MAJOR_BRANDS};
use tag::Mp4Tag;

/// A parsed MP4 file: the atom tree, per-trak descriptors and the tag.
#[derive(Debug, Default)]
pub struct Mp4Stream {
    pub arena: AtomArena,
    pub tracks: Vec<TrackDescriptor>,
    pub tag: Option<Mp4Tag>,
}

impl Mp4Stream {
    /// Parse the whole atom tree plus the metadata relevant to tagging.
    pub fn parse<R: Read + Seek>(
        reader: &mut R,
        file_size: u64,
        diag: &mut Diagnostics,
    ) -> Result<Self> {
        const CONTEXT: &str = "parsing MP4 container";
        let arena = AtomArena::parse(reader, file_size, diag)?;

        let Some(ftyp_index) = arena.root_by_id(atom_ids::FTYP) else {
            diag.critical(CONTEXT, "No ftyp atom found.");
            return Err(TagError::InvalidData("not an MP4 file".into()));
        };
        let ftyp = arena.get(ftyp_index);
        if ftyp.data_size() >= 4 {
            reader.seek(SeekFrom::Start(ftyp.data_offset()))?;
            let mut brand = [0u8; 4];
            reader.read_exact(&mut brand)?;
            if !MAJOR_BRANDS.contains(&&brand) {
                diag.warning(
                    CONTEXT,
                    format!(
                        "Major brand \"{}\" is unknown. Trying to parse the file anyhow.",
                        fourcc_string(u32::from_be_bytes(brand))
                    ),
                );
            }
        }

        let Some(moov_index) = arena.root_by_id(atom_ids::MOOV) else {
            diag.critical(CONTEXT, "No moov atom found.");
            return Err(TagError::InvalidData("no moov atom".into()));
        };

        let mut tracks = Vec::new();
        for &child in arena.children(moov_index) {
            if arena.get(child).id == atom_ids::TRAK {
                match parse_track(&arena, child, reader) {
                    Ok(track) => tracks.push(track),
                    Err(e) if !e.is_fatal() => {
                        diag.critical(CONTEXT, format!("Unable to parse trak atom ({e})."));
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let tag = match arena.find_path(&[atom_ids::MOOV, atom_ids::UDTA, atom_ids::META]) {
            Some(meta_index) => match Mp4Tag::parse(&arena, meta_index, reader, diag) {
                Ok(tag) => Some(tag),
                Err(TagError::NoTag) => None,
                Err(e) if !e.is_fatal() => {
                    diag.critical(CONTEXT, format!("Unable to parse MP4 tag ({e})."));
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };

        Ok(Mp4Stream { arena, tracks, tag })
    }

    /// The tag, creating an empty one when absent.
    pub fn create_tag(&mut self) -> &mut Mp4Tag {
        self.tag.get_or_insert_with(Mp4Tag::default)
    }
}

/// Extract one trak's parameters from mdhd, hdlr and the first stsd entry.
fn parse_track<R: Read + Seek>(
    arena: &AtomArena,
    trak_index: usize,
    reader: &mut R,
) -> Result<TrackDescriptor> {
    let mut track = TrackDescriptor::default();
    let trak = arena.get(trak_index);
    track.start_offset = trak.start;

    let Some(mdia_index) = arena.child_by_id(trak_index, atom_ids::MDIA) else {
        return Err(TagError::InvalidData("trak without mdia".into()));
    };

    if let Some(hdlr_index) = arena.child_by_id(mdia_index, atom_ids::HDLR) {
        reader.seek(SeekFrom::Start(arena.get(hdlr_index).data_offset() + 8))?;
        let mut handler = [0u8; 4];
        reader.read_exact(&mut handler)?;
        track.media_type = match &handler {
            b"soun" => MediaType::Audio,
            b"vide" => MediaType::Video,
            _ => MediaType::Unknown,
        };
    }

    let mut media_duration = 0u64;
    let mut timescale = 0u32;
    if let Some(mdhd_index) = arena.child_by_id(mdia_index, atom_ids::MDHD) {
        reader.seek(SeekFrom::Start(arena.get(mdhd_index).data_offset()))?;
        let version = reader.read_u8()?;
        reader.read_u24::<BigEndian>()?; // flags
        if version == 1 {
            reader.seek(SeekFrom::Current(16))?; // creation + modification time
            timescale = reader.read_u32::<BigEndian>()?;
            media_duration = reader.read_u64::<BigEndian>()?;
        } else {
            reader.seek(SeekFrom::Current(8))?;
            timescale = reader.read_u32::<BigEndian>()?;
            media_duration = reader.read_u32::<BigEndian>()? as u64;
        }
    }

    let stsd_index = arena
        .child_by_id(mdia_index, atom_ids::MINF)
        .and_then(|minf| arena.child_by_id(minf, atom_ids::STBL))
        .and_then(|stbl| arena.child_by_id(stbl, atom_ids::STSD));
    if let Some(stsd_index) = stsd_index {
        let stsd = arena.get(stsd_index);
        reader.seek(SeekFrom::Start(stsd.data_offset()))?;
        reader.read_u32::<BigEndian>()?; // version/flags
        let entry_count = reader.read_u32::<BigEndian>()?;
        if entry_count > 0 && stsd.data_size() >= 8 + 36 {
            reader.read_u32::<BigEndian>()?; // entry size
            let format = reader.read_u32::<BigEndian>()?;
            track.format = match format {
                f if f == fourcc(b"mp4a") => FormatId::Aac,
                f if f == fourcc(b"alac") => FormatId::Alac,
                _ => FormatId::Other,
            };
            if track.media_type == MediaType::Audio {
                // 6 reserved + 2 data ref index + 2 version + 2 revision + 4 vendor
                reader.seek(SeekFrom::Current(16))?;
                track.channel_count = reader.read_u16::<BigEndian>()?;
                track.bits_per_sample = reader.read_u16::<BigEndian>()?;
                reader.seek(SeekFrom::Current(4))?; // compression id + packet size
                let rate_fixed = reader.read_u32::<BigEndian>()?;
                let sample_rate = rate_fixed >> 16;
                if sample_rate > 0 {
                    // the media timescale normally equals the sample rate;
                    // rescale the mdhd duration when it does not
                    let samples = if timescale == sample_rate || timescale == 0 {
                        media_duration
                    } else {
                        media_duration * sample_rate as u64 / timescale as u64
                    };
                    track.set_extent(samples, sample_rate);
                }
            }
        }
    }

    if track.sampling_frequency == 0 && timescale > 0 {
        track.set_extent(media_duration, timescale);
    }
    Ok(track)
}

/// Replace (or insert) the meta atom inside an in-memory moov buffer.
///
/// Returns the rewritten buffer, the size delta, and the splice offset in
/// file coordinates. Ancestor atom sizes are patched; chunk offsets are the
/// caller's business via [`patch_chunk_offsets`].
pub fn replace_meta(
    moov: &[u8],
    moov_file_offset: u64,
    new_meta: &[u8],
    diag: &mut Diagnostics,
) -> Result<(Vec<u8>, i64, u64)> {
    let mut scratch = Diagnostics::new();
    let arena = AtomArena::parse(
        &mut std::io::Cursor::new(moov),
        moov.len() as u64,
        &mut scratch,
    )?;
    diag.absorb(scratch);

    let Some(moov_index) = arena.root_by_id(atom_ids::MOOV) else {
        return Err(TagError::InvalidData("moov buffer without moov atom".into()));
    };

    let udta_index = arena.child_by_id(moov_index, atom_ids::UDTA);
    let meta_index = udta_index.and_then(|udta| arena.child_by_id(udta, atom_ids::META));

    // region of the buffer to replace, and the bytes replacing it
    let (splice_start, splice_end, replacement, grown_ancestors) = match (udta_index, meta_index) {
        (Some(udta), Some(meta)) => {
            let meta_atom = arena.get(meta);
            (
                meta_atom.start as usize,
                meta_atom.end() as usize,
                new_meta.to_vec(),
                vec![udta],
            )
        }
        (Some(udta), None) => {
            let end = arena.get(udta).end() as usize;
            (end, end, new_meta.to_vec(), vec![udta])
        }
        (None, None) | (None, Some(_)) => {
            let mut udta = Vec::with_capacity(8 + new_meta.len());
            udta.extend_from_slice(&((8 + new_meta.len()) as u32).to_be_bytes());
            udta.extend_from_slice(&atom_ids::UDTA.to_be_bytes());
            udta.extend_from_slice(new_meta);
            let end = arena.get(moov_index).end() as usize;
            (end, end, udta, vec![])
        }
    };

    let delta = replacement.len() as i64 - (splice_end - splice_start) as i64;

    let mut out = Vec::with_capacity((moov.len() as i64 + delta) as usize);
    out.extend_from_slice(&moov[..splice_start]);
    out.extend_from_slice(&replacement);
    out.extend_from_slice(&moov[splice_end..]);

    // grow/shrink every container the splice lives in
    for index in grown_ancestors.into_iter().chain([moov_index]) {
        patch_atom_size(&mut out, &arena, index, delta)?;
    }

    Ok((out, delta, moov_file_offset + splice_start as u64))
}

fn patch_atom_size(buffer: &mut [u8], arena: &AtomArena, index: usize, delta: i64) -> Result<()> {
    let atom = arena.get(index);
    let start = atom.start as usize;
    let new_size = atom.total_size as i64 + delta;
    if new_size < atom.header_size as i64 {
        return Err(TagError::InvalidData("atom shrunk below header size".into()));
    }
    if atom.header_size == 16 {
        buffer[start + 8..start + 16].copy_from_slice(&(new_size as u64).to_be_bytes());
    } else {
        let new_size = u32::try_from(new_size)
            .map_err(|_| TagError::InvalidData("atom grew past 32-bit size".into()))?;
        buffer[start..start + 4].copy_from_slice(&new_size.to_be_bytes());
    }
    Ok(())
}

/// Shift every stco/co64 chunk offset at or past `splice_offset` by `delta`.
///
/// Required after a rewrite that moves the media data, so sample lookups
/// keep pointing into mdat.
pub fn patch_chunk_offsets(
    moov: &mut [u8],
    splice_offset: u64,
    delta: i64,
    diag: &mut Diagnostics,
) -> Result<()> {
    if delta == 0 {
        return Ok(());
    }
    let mut scratch = Diagnostics::new();
    let arena = AtomArena::parse(
        &mut std::io::Cursor::new(&moov[..]),
        moov.len() as u64,
        &mut scratch,
    )?;
    diag.absorb(scratch);

    for index in arena.all_by_id(atom_ids::STCO) {
        let atom = arena.get(index);
        let base = atom.data_offset() as usize + 4; // skip version/flags
        let count = u32::from_be_bytes(moov[base..base + 4].try_into().unwrap()) as usize;
        for i in 0..count {
            let pos = base + 4 + i * 4;
            if pos + 4 > moov.len() {
                return Err(TagError::Truncated { context: "stco" });
            }
            let offset = u32::from_be_bytes(moov[pos..pos + 4].try_into().unwrap());
            if offset as u64 >= splice_offset {
                let patched = u32::try_from(offset as i64 + delta)
                    .map_err(|_| TagError::InvalidData("chunk offset out of range".into()))?;
                moov[pos..pos + 4].copy_from_slice(&patched.to_be_bytes());
            }
        }
    }
    for index in arena.all_by_id(atom_ids::CO64) {
        let atom = arena.get(index);
        let base = atom.data_offset() as usize + 4;
        let count = u32::from_be_bytes(moov[base..base + 4].try_into().unwrap()) as usize;
        for i in 0..count {
            let pos = base + 4 + i * 8;
            if pos + 8 > moov.len() {
                return Err(TagError::Truncated { context: "co64" });
            }
            let offset = u64::from_be_bytes(moov[pos..pos + 8].try_into().unwrap());
            if offset >= splice_offset {
                let patched = offset
                    .checked_add_signed(delta)
                    .ok_or_else(|| TagError::InvalidData("chunk offset out of range".into()))?;
                moov[pos..pos + 8].copy_from_slice(&patched.to_be_bytes());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::atom::test_support::{atom, meta_atom};
    use super::*;
    use crate::diag::Diagnostics;

    fn moov_with_meta(meta_children: &[u8]) -> Vec<u8> {
        let udta = atom(b"udta", &meta_atom(meta_children));
        atom(b"moov", &udta)
    }

    #[test]
    fn replace_meta_patches_ancestor_sizes() {
        let moov = moov_with_meta(&[]);
        let new_meta = meta_atom(&atom(b"ilst", &[]));

        let mut diag = Diagnostics::new();
        let (out, delta, splice) = replace_meta(&moov, 100, &new_meta, &mut diag).unwrap();
        assert_eq!(delta, 8); // the added empty ilst
        assert_eq!(splice, 100 + 16); // moov header + udta header
        // moov and udta sizes both grew by delta
        assert_eq!(
            u32::from_be_bytes(out[0..4].try_into().unwrap()) as usize,
            moov.len() + 8
        );
        assert_eq!(
            u32::from_be_bytes(out[8..12].try_into().unwrap()) as usize,
            moov.len() - 8 + 8
        );
    }

    #[test]
    fn replace_meta_creates_udta_when_missing() {
        let moov = atom(b"moov", &atom(b"mvhd", &[0u8; 20]));
        let new_meta = meta_atom(&[]);

        let mut diag = Diagnostics::new();
        let (out, delta, _) = replace_meta(&moov, 0, &new_meta, &mut diag).unwrap();
        assert_eq!(delta, 8 + new_meta.len() as i64);
        assert_eq!(out.len(), moov.len() + delta as usize);
        // the appended udta wraps the meta
        let udta_start = moov.len();
        assert_eq!(&out[udta_start + 4..udta_start + 8], b"udta");
        assert_eq!(&out[udta_start + 12..udta_start + 16], b"meta");
    }

    #[test]
    fn chunk_offsets_shift_only_past_the_splice() {
        // stco with entries 50 and 500, splice at 100, delta +12
        let mut stco_body = vec![0u8; 4];
        stco_body.extend_from_slice(&2u32.to_be_bytes());
        stco_body.extend_from_slice(&50u32.to_be_bytes());
        stco_body.extend_from_slice(&500u32.to_be_bytes());
        let stbl = atom(b"stbl", &atom(b"stco", &stco_body));
        let minf = atom(b"minf", &stbl);
        let mdia = atom(b"mdia", &minf);
        let trak = atom(b"trak", &mdia);
        let mut moov = atom(b"moov", &trak);

        let mut diag = Diagnostics::new();
        patch_chunk_offsets(&mut moov, 100, 12, &mut diag).unwrap();

        let arena = AtomArena::parse(
            &mut std::io::Cursor::new(&moov[..]),
            moov.len() as u64,
            &mut diag,
        )
        .unwrap();
        let stco = arena.get(arena.all_by_id(atom_ids::STCO)[0]);
        let base = stco.data_offset() as usize + 8;
        assert_eq!(u32::from_be_bytes(moov[base..base + 4].try_into().unwrap()), 50);
        assert_eq!(
            u32::from_be_bytes(moov[base + 4..base + 8].try_into().unwrap()),
            512
        );
    }
}
