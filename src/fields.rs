//! Field identifiers and the ordered multimap every tag kind is built on.
//!
//! Identifier semantics differ per format: MP4 atoms compare as raw 32-bit
//! codes, Vorbis keys compare ASCII case-insensitively, and iTunes extended
//! atoms compare by their mean/name pair. The multimap is parameterized over
//! a comparator trait so the shared operations are written once.

use crate::value::TagValue;

/// Format-specific field identifier with its equality rule.
pub trait FieldId: Clone {
    fn matches(&self, other: &Self) -> bool;
}

impl FieldId for u32 {
    fn matches(&self, other: &Self) -> bool {
        self == other
    }
}

impl FieldId for String {
    fn matches(&self, other: &Self) -> bool {
        self.eq_ignore_ascii_case(other)
    }
}

/// One tag field: identifier, value, and optional format type info
/// (the picture role for cover fields).
#[derive(Debug, Clone)]
pub struct Field<I: FieldId> {
    pub id: I,
    pub value: TagValue,
    pub type_info: Option<u32>,
}

impl<I: FieldId> Field<I> {
    pub fn new(id: I, value: TagValue) -> Self {
        Field {
            id,
            value,
            type_info: None,
        }
    }

    pub fn with_type_info(id: I, value: TagValue, type_info: u32) -> Self {
        Field {
            id,
            value,
            type_info: Some(type_info),
        }
    }
}

/// Insertion-order-stable multimap from field identifier to field.
///
/// Iteration order within one identifier equals insertion order; rewrites
/// depend on this to keep multiple covers in their original sequence.
#[derive(Debug, Clone)]
pub struct FieldMap<I: FieldId> {
    entries: Vec<Field<I>>,
}

impl<I: FieldId> Default for FieldMap<I> {
    fn default() -> Self {
        FieldMap {
            entries: Vec::new(),
        }
    }
}

impl<I: FieldId> FieldMap<I> {
    pub fn new() -> Self {
        FieldMap {
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, field: Field<I>) {
        self.entries.push(field);
    }

    /// Remove every field with the given identifier, returning how many
    /// were removed.
    pub fn erase_all(&mut self, id: &I) -> usize {
        let before = self.entries.len();
        self.entries.retain(|f| !f.id.matches(id));
        before - self.entries.len()
    }

    pub fn count(&self, id: &I) -> usize {
        self.entries.iter().filter(|f| f.id.matches(id)).count()
    }

    pub fn has(&self, id: &I) -> bool {
        self.entries.iter().any(|f| f.id.matches(id))
    }

    /// All fields with the given identifier, in insertion order.
    pub fn values<'a>(&'a self, id: &I) -> impl Iterator<Item = &'a Field<I>> + 'a {
        let id = id.clone();
        self.entries.iter().filter(move |f| f.id.matches(&id))
    }

    pub fn first(&self, id: &I) -> Option<&Field<I>> {
        self.entries.iter().find(|f| f.id.matches(id))
    }

    pub fn first_mut(&mut self, id: &I) -> Option<&mut Field<I>> {
        self.entries.iter_mut().find(|f| f.id.matches(id))
    }

    /// Replace the first field with this identifier, or insert a new one.
    /// Additional fields with the same identifier are removed so that a
    /// plain set cannot silently produce duplicates.
    pub fn set(&mut self, id: I, value: TagValue) {
        if let Some(pos) = self.entries.iter().position(|f| f.id.matches(&id)) {
            self.entries[pos].value = value;
            let mut index = self.entries.len();
            while index > pos + 1 {
                index -= 1;
                if self.entries[index].id.matches(&id) {
                    self.entries.remove(index);
                }
            }
        } else {
            self.entries.push(Field::new(id, value));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field<I>> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Field<I>> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The format-agnostic fields exposed to callers; each backend maps these
/// to its own identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownField {
    Album,
    AlbumArtist,
    Artist,
    Bpm,
    Comment,
    Composer,
    Cover,
    Description,
    DiskPosition,
    Encoder,
    EncoderSettings,
    Genre,
    Grouping,
    Lyricist,
    Lyrics,
    Performers,
    Rating,
    RecordLabel,
    Title,
    TrackPosition,
    Year,
}

impl KnownField {
    /// Every known field, for CLI enumeration.
    pub const ALL: [KnownField; 21] = [
        KnownField::Album,
        KnownField::AlbumArtist,
        KnownField::Artist,
        KnownField::Bpm,
        KnownField::Comment,
        KnownField::Composer,
        KnownField::Cover,
        KnownField::Description,
        KnownField::DiskPosition,
        KnownField::Encoder,
        KnownField::EncoderSettings,
        KnownField::Genre,
        KnownField::Grouping,
        KnownField::Lyricist,
        KnownField::Lyrics,
        KnownField::Performers,
        KnownField::Rating,
        KnownField::RecordLabel,
        KnownField::Title,
        KnownField::TrackPosition,
        KnownField::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KnownField::Album => "album",
            KnownField::AlbumArtist => "album_artist",
            KnownField::Artist => "artist",
            KnownField::Bpm => "bpm",
            KnownField::Comment => "comment",
            KnownField::Composer => "composer",
            KnownField::Cover => "cover",
            KnownField::Description => "description",
            KnownField::DiskPosition => "disk",
            KnownField::Encoder => "encoder",
            KnownField::EncoderSettings => "encoder_settings",
            KnownField::Genre => "genre",
            KnownField::Grouping => "grouping",
            KnownField::Lyricist => "lyricist",
            KnownField::Lyrics => "lyrics",
            KnownField::Performers => "performers",
            KnownField::Rating => "rating",
            KnownField::RecordLabel => "label",
            KnownField::Title => "title",
            KnownField::TrackPosition => "track",
            KnownField::Year => "year",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        KnownField::ALL
            .iter()
            .copied()
            .find(|f| f.as_str().eq_ignore_ascii_case(name.trim()))
    }
}
