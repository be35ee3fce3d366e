//! Per-stream parameters extracted while parsing a container.

use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MediaType {
    #[default]
    Unknown,
    Audio,
    Video,
}

/// The general format of a parsed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum FormatId {
    #[default]
    Unknown,
    Flac,
    Mpeg1Layer1,
    Mpeg1Layer2,
    Mpeg1Layer3,
    Aac,
    Alac,
    Vorbis,
    Other,
}

/// Technical parameters of one audio/video stream.
///
/// `duration` is derived: `sample_count / sampling_frequency` whenever both
/// are known, so `sampling_frequency` is non-zero whenever `sample_count` is.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackDescriptor {
    pub media_type: MediaType,
    pub format: FormatId,
    pub channel_count: u16,
    pub sampling_frequency: u32,
    pub sample_count: u64,
    pub bits_per_sample: u16,
    #[serde(serialize_with = "serialize_duration_secs")]
    pub duration: Duration,
    /// Average bitrate in kbit/s, when the container states or implies one.
    pub bitrate_kbps: u32,
    /// Where the track (headers included) begins within the file.
    pub start_offset: u64,
    /// Where the encoded media payload begins.
    pub stream_offset: u64,
    /// Total bytes of padding seen between metadata and payload.
    pub padding_size: u64,
}

impl TrackDescriptor {
    pub fn new(media_type: MediaType, format: FormatId) -> Self {
        TrackDescriptor {
            media_type,
            format,
            ..Default::default()
        }
    }

    /// Set sample count and rate together, deriving the duration.
    pub fn set_extent(&mut self, sample_count: u64, sampling_frequency: u32) {
        self.sample_count = sample_count;
        self.sampling_frequency = sampling_frequency;
        if sampling_frequency > 0 {
            self.duration =
                Duration::from_secs_f64(sample_count as f64 / sampling_frequency as f64);
        }
    }
}

fn serialize_duration_secs<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}
