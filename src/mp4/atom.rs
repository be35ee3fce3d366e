// MP4 atom tree held in an index-addressed arena
//
// Children refer to their parent by index instead of holding references,
// so the tree is plain data that can be walked in any direction without
// ownership cycles.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt};

use crate::diag::Diagnostics;
use crate::error::{Result, TagError};
use crate::mp4::ids::{atom_ids, fourcc_string};

/// Containers whose payload is a sequence of child atoms.
const CONTAINER_IDS: [u32; 8] = [
    atom_ids::MOOV,
    atom_ids::UDTA,
    atom_ids::TRAK,
    atom_ids::MDIA,
    atom_ids::MINF,
    atom_ids::STBL,
    atom_ids::META,
    atom_ids::ILST,
];

/// Nesting deeper than this is treated as a damaged file.
const MAX_DEPTH: u8 = 16;

/// One atom: its identity and extent, plus arena links.
#[derive(Debug, Clone)]
pub struct Mp4Atom {
    pub id: u32,
    /// Absolute offset of the atom's size field.
    pub start: u64,
    /// 8, or 16 with a 64-bit extended size.
    pub header_size: u8,
    /// Size of the whole atom, header included.
    pub total_size: u64,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

impl Mp4Atom {
    pub fn data_offset(&self) -> u64 {
        self.start + self.header_size as u64
    }

    pub fn data_size(&self) -> u64 {
        self.total_size - self.header_size as u64
    }

    pub fn end(&self) -> u64 {
        self.start + self.total_size
    }

    /// Where child atoms begin. `meta` is a full atom whose children
    /// follow a 4-byte version/flags word.
    pub fn children_offset(&self) -> u64 {
        if self.id == atom_ids::META {
            self.data_offset() + 4
        } else {
            self.data_offset()
        }
    }
}

/// All atoms of one file, in document order.
#[derive(Debug, Default)]
pub struct AtomArena {
    atoms: Vec<Mp4Atom>,
    roots: Vec<usize>,
}

impl AtomArena {
    /// Parse the atom tree covering `[0, region_end)` of the stream.
    pub fn parse<R: Read + Seek>(
        reader: &mut R,
        region_end: u64,
        diag: &mut Diagnostics,
    ) -> Result<Self> {
        let mut arena = AtomArena::default();
        arena.parse_level(reader, None, 0, region_end, 0, diag)?;
        Ok(arena)
    }

    fn parse_level<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        parent: Option<usize>,
        mut offset: u64,
        end: u64,
        depth: u8,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        const CONTEXT: &str = "parsing MP4 atoms";
        if depth > MAX_DEPTH {
            return Err(TagError::InvalidData("atom nesting too deep".into()));
        }

        while offset + 8 <= end {
            reader.seek(SeekFrom::Start(offset))?;
            let size32 = reader.read_u32::<BigEndian>()?;
            let id = reader.read_u32::<BigEndian>()?;

            let (total_size, header_size) = match size32 {
                0 => (end - offset, 8u8),
                1 => (reader.read_u64::<BigEndian>()?, 16u8),
                n => (n as u64, 8u8),
            };

            if total_size < header_size as u64 || offset + total_size > end {
                diag.critical(
                    CONTEXT,
                    format!(
                        "Atom \"{}\" at offset {offset} has an invalid size and the rest of this level will be ignored.",
                        fourcc_string(id)
                    ),
                );
                break;
            }

            let index = self.atoms.len();
            self.atoms.push(Mp4Atom {
                id,
                start: offset,
                header_size,
                total_size,
                parent,
                children: Vec::new(),
            });
            match parent {
                Some(p) => self.atoms[p].children.push(index),
                None => self.roots.push(index),
            }

            if CONTAINER_IDS.contains(&id) {
                let child_start = self.atoms[index].children_offset();
                let child_end = offset + total_size;
                if child_start <= child_end {
                    self.parse_level(reader, Some(index), child_start, child_end, depth + 1, diag)?;
                }
            }

            offset += total_size;
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> &Mp4Atom {
        &self.atoms[index]
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn root_by_id(&self, id: u32) -> Option<usize> {
        self.roots
            .iter()
            .copied()
            .find(|&i| self.atoms[i].id == id)
    }

    pub fn child_by_id(&self, parent: usize, id: u32) -> Option<usize> {
        self.atoms[parent]
            .children
            .iter()
            .copied()
            .find(|&i| self.atoms[i].id == id)
    }

    pub fn children(&self, parent: usize) -> &[usize] {
        &self.atoms[parent].children
    }

    /// Resolve a path of ids from the root, e.g. moov/udta/meta.
    pub fn find_path(&self, path: &[u32]) -> Option<usize> {
        let (&first, rest) = path.split_first()?;
        let mut index = self.root_by_id(first)?;
        for &id in rest {
            index = self.child_by_id(index, id)?;
        }
        Some(index)
    }

    /// Indices of every atom with the given id, document order.
    pub fn all_by_id(&self, id: u32) -> Vec<usize> {
        self.atoms
            .iter()
            .enumerate()
            .filter(|(_, a)| a.id == id)
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    /// Build an atom with a 32-bit size header.
    pub fn atom(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + payload.len());
        out.extend_from_slice(&((payload.len() as u32 + 8).to_be_bytes()));
        out.extend_from_slice(id);
        out.extend_from_slice(payload);
        out
    }

    /// Build a `meta` full atom: version/flags word, then children.
    pub fn meta_atom(children: &[u8]) -> Vec<u8> {
        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(children);
        atom(b"meta", &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::atom;
    use super::*;
    use crate::mp4::ids::fourcc;
    use std::io::Cursor;

    #[test]
    fn nested_containers_resolve_by_path() {
        let meta = super::test_support::meta_atom(&atom(b"ilst", &[]));
        let udta = atom(b"udta", &meta);
        let moov = atom(b"moov", &udta);
        let mut file = atom(b"ftyp", b"M4A \x00\x00\x02\x00");
        file.extend_from_slice(&moov);

        let mut diag = Diagnostics::new();
        let len = file.len() as u64;
        let arena = AtomArena::parse(&mut Cursor::new(file), len, &mut diag).unwrap();
        assert!(diag.is_empty());

        let meta_idx = arena
            .find_path(&[atom_ids::MOOV, atom_ids::UDTA, atom_ids::META])
            .expect("meta found");
        let ilst_idx = arena.child_by_id(meta_idx, atom_ids::ILST).expect("ilst found");
        assert_eq!(arena.get(ilst_idx).data_size(), 0);
        assert_eq!(arena.get(ilst_idx).parent, Some(meta_idx));
    }

    #[test]
    fn extended_size_header_is_honoured() {
        let mut file = Vec::new();
        file.extend_from_slice(&1u32.to_be_bytes());
        file.extend_from_slice(b"mdat");
        file.extend_from_slice(&24u64.to_be_bytes());
        file.extend_from_slice(&[0u8; 8]);

        let mut diag = Diagnostics::new();
        let len = file.len() as u64;
        let arena = AtomArena::parse(&mut Cursor::new(file), len, &mut diag).unwrap();
        let mdat = arena.get(arena.root_by_id(fourcc(b"mdat")).unwrap());
        assert_eq!(mdat.header_size, 16);
        assert_eq!(mdat.total_size, 24);
        assert_eq!(mdat.data_size(), 8);
    }

    #[test]
    fn oversized_atom_is_diagnosed_and_level_abandoned() {
        let mut file = atom(b"ftyp", b"M4A ");
        file.extend_from_slice(&999u32.to_be_bytes());
        file.extend_from_slice(b"moov");

        let mut diag = Diagnostics::new();
        let len = file.len() as u64;
        let arena = AtomArena::parse(&mut Cursor::new(file), len, &mut diag).unwrap();
        assert!(diag.has_critical());
        assert_eq!(arena.roots().len(), 1);
    }

    #[test]
    fn size_zero_runs_to_region_end() {
        let mut file = atom(b"ftyp", b"M4A ");
        let mdat_start = file.len() as u64;
        file.extend_from_slice(&0u32.to_be_bytes());
        file.extend_from_slice(b"mdat");
        file.extend_from_slice(&[0xAB; 32]);

        let mut diag = Diagnostics::new();
        let len = file.len() as u64;
        let arena = AtomArena::parse(&mut Cursor::new(file), len, &mut diag).unwrap();
        let mdat = arena.get(arena.root_by_id(fourcc(b"mdat")).unwrap());
        assert_eq!(mdat.start, mdat_start);
        assert_eq!(mdat.end(), len);
    }
}
