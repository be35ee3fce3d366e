// CLI command implementations

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;

use ferrotag::{KnownField, MediaFile, Picture, PositionInSet, TagValue};

use crate::cli::{CliError, CliResult, OutputFormatter};

/// The flat metadata view the CLI reads and writes as JSON.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TagSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lyrics: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover: Option<Picture>,
}

impl TagSnapshot {
    pub fn from_file(file: &MediaFile, with_cover: bool) -> Self {
        let text = |field: KnownField| {
            file.value(field)
                .and_then(|v| v.as_text().ok())
                .filter(|t| !t.is_empty())
        };
        TagSnapshot {
            title: text(KnownField::Title),
            artist: text(KnownField::Artist),
            album: text(KnownField::Album),
            album_artist: text(KnownField::AlbumArtist),
            year: text(KnownField::Year),
            track: text(KnownField::TrackPosition),
            disk: text(KnownField::DiskPosition),
            genre: text(KnownField::Genre),
            comment: text(KnownField::Comment),
            composer: text(KnownField::Composer),
            lyrics: text(KnownField::Lyrics),
            encoder: text(KnownField::Encoder),
            bpm: text(KnownField::Bpm),
            cover: if with_cover {
                file.covers().first().map(|p| (*p).clone())
            } else {
                None
            },
        }
    }

    /// Apply every field present in the JSON object; empty strings erase.
    pub fn apply(updates: &serde_json::Value, file: &mut MediaFile) -> CliResult<()> {
        let Some(object) = updates.as_object() else {
            return Err(CliError::Parse("metadata JSON must be an object".into()));
        };
        for (key, value) in object {
            if key == "cover" {
                match value {
                    serde_json::Value::Null => {
                        file.set_value(KnownField::Cover, TagValue::Empty);
                    }
                    _ => {
                        let picture: Picture = serde_json::from_value(value.clone())?;
                        file.set_value(KnownField::Cover, TagValue::Picture(Box::new(picture)));
                    }
                }
                continue;
            }
            let Some(field) = KnownField::parse(key) else {
                return Err(CliError::InvalidArgument(format!("unknown field \"{key}\"")));
            };
            let text = match value {
                serde_json::Value::Null => String::new(),
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            file.set_value(field, tag_value_for(field, &text)?);
        }
        Ok(())
    }
}

/// Convert CLI text input into the value kind the field wants.
fn tag_value_for(field: KnownField, text: &str) -> CliResult<TagValue> {
    if text.is_empty() {
        return Ok(TagValue::Empty);
    }
    Ok(match field {
        KnownField::TrackPosition | KnownField::DiskPosition => {
            let position = PositionInSet::parse(text).ok_or_else(|| {
                CliError::InvalidArgument(format!("\"{text}\" is not a position like 3 or 3/12"))
            })?;
            TagValue::PositionInSet(position)
        }
        KnownField::Bpm => {
            let bpm: i64 = text.trim().parse().map_err(|_| {
                CliError::InvalidArgument(format!("\"{text}\" is not an integer"))
            })?;
            TagValue::Integer(bpm)
        }
        _ => TagValue::utf8(text),
    })
}

fn open_checked(path: &str) -> CliResult<MediaFile> {
    if !Path::new(path).exists() {
        return Err(CliError::FileNotFound(path.to_string()));
    }
    Ok(MediaFile::open(path)?)
}

fn writer_for(output: Option<&str>) -> CliResult<Box<dyn Write>> {
    Ok(match output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(std::io::stdout()),
    })
}

/// Read metadata from files as JSON.
pub fn command_read(
    files: &[String],
    output: Option<&str>,
    with_cover: bool,
    formatter: &OutputFormatter,
) -> CliResult<()> {
    if files.is_empty() {
        return Err(CliError::InvalidArgument("no files specified".into()));
    }
    let mut writer = writer_for(output)?;
    for path in files {
        match open_checked(path) {
            Ok(file) => {
                let snapshot = TagSnapshot::from_file(&file, with_cover);
                let mut value = serde_json::to_value(&snapshot)?;
                value["file"] = json!(path);
                value["format"] = json!(file.format().as_str());
                formatter.output(&value, &mut writer)?;
            }
            Err(e) => formatter.print_error(&format!("{path}: {e}")),
        }
    }
    Ok(())
}

/// Write metadata to a file from a JSON object.
pub fn command_write(
    path: &str,
    metadata: Option<&str>,
    from_file: Option<&str>,
    formatter: &OutputFormatter,
) -> CliResult<()> {
    let json_text = match (metadata, from_file) {
        (Some(text), None) => text.to_string(),
        (None, Some(json_path)) => std::fs::read_to_string(json_path)?,
        _ => {
            return Err(CliError::InvalidArgument(
                "pass exactly one of --metadata or --from-file".into(),
            ))
        }
    };
    let updates: serde_json::Value = serde_json::from_str(&json_text)?;

    let mut file = open_checked(path)?;
    TagSnapshot::apply(&updates, &mut file)?;
    file.save()?;
    formatter.print_success(&format!("{path}: metadata written"));
    Ok(())
}

/// Report the detected container format.
pub fn command_detect(files: &[String], formatter: &OutputFormatter) -> CliResult<()> {
    if files.is_empty() {
        return Err(CliError::InvalidArgument("no files specified".into()));
    }
    for path in files {
        match open_checked(path) {
            Ok(file) => {
                let tags: Vec<&str> = file.tags().iter().map(|t| t.kind()).collect();
                formatter.print_info(&format!(
                    "{path}: {} (tags: {})",
                    file.format().as_str(),
                    if tags.is_empty() {
                        "none".to_string()
                    } else {
                        tags.join(", ")
                    }
                ));
            }
            Err(e) => formatter.print_error(&format!("{path}: {e}")),
        }
    }
    Ok(())
}

/// Show technical stream information and parse diagnostics.
pub fn command_info(
    files: &[String],
    formatter: &OutputFormatter,
    output: Option<&str>,
) -> CliResult<()> {
    if files.is_empty() {
        return Err(CliError::InvalidArgument("no files specified".into()));
    }
    let mut writer = writer_for(output)?;
    for path in files {
        match open_checked(path) {
            Ok(file) => {
                let value = json!({
                    "file": path,
                    "format": file.format().as_str(),
                    "size": file.file_size(),
                    "tracks": file.tracks(),
                    "diagnostics": file.diagnostics().entries(),
                });
                formatter.output(&value, &mut writer)?;
            }
            Err(e) => formatter.print_error(&format!("{path}: {e}")),
        }
    }
    Ok(())
}

/// Export embedded cover art to a directory.
pub fn command_export_cover(
    path: &str,
    output_dir: &str,
    index: Option<usize>,
    formatter: &OutputFormatter,
) -> CliResult<()> {
    let file = open_checked(path)?;
    let covers = file.covers();
    if covers.is_empty() {
        return Err(CliError::InvalidArgument(format!("{path}: no cover art")));
    }
    let stem = Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cover".to_string());

    let selected: Vec<(usize, &&Picture)> = match index {
        Some(i) => {
            let picture = covers.get(i).ok_or_else(|| {
                CliError::InvalidArgument(format!("cover index {i} out of range"))
            })?;
            vec![(i, picture)]
        }
        None => covers.iter().enumerate().collect(),
    };
    for (i, picture) in selected {
        let name = if covers.len() > 1 {
            format!("{stem}-{i}.{}", picture.extension())
        } else {
            format!("{stem}.{}", picture.extension())
        };
        let target = Path::new(output_dir).join(name);
        std::fs::write(&target, &picture.data)?;
        formatter.print_success(&format!("wrote {}", target.display()));
    }
    Ok(())
}

/// Set the cover art from an image file, replacing existing covers.
pub fn command_set_cover(
    path: &str,
    image: &str,
    mime_type: Option<&str>,
    description: Option<&str>,
    formatter: &OutputFormatter,
) -> CliResult<()> {
    let data = std::fs::read(image)?;
    let mime = match mime_type {
        Some(mime) => mime.to_string(),
        None => match Path::new(image)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("png") => "image/png".to_string(),
            Some("gif") => "image/gif".to_string(),
            Some("webp") => "image/webp".to_string(),
            Some("bmp") => "image/bmp".to_string(),
            _ => "image/jpeg".to_string(),
        },
    };
    let picture = Picture::new(data, mime, description.unwrap_or_default().to_string());

    let mut file = open_checked(path)?;
    file.set_value(KnownField::Cover, TagValue::Picture(Box::new(picture)));
    file.save()?;
    formatter.print_success(&format!("{path}: cover art set"));
    Ok(())
}

/// Erase one field from a file's tags.
pub fn command_remove(path: &str, field_name: &str, formatter: &OutputFormatter) -> CliResult<()> {
    let field = KnownField::parse(field_name).ok_or_else(|| {
        CliError::InvalidArgument(format!("unknown field \"{field_name}\""))
    })?;
    let mut file = open_checked(path)?;
    if !file.has_field(field) {
        formatter.print_info(&format!("{path}: field \"{field_name}\" not present"));
        return Ok(());
    }
    file.set_value(field, TagValue::Empty);
    file.save()?;
    formatter.print_success(&format!("{path}: field \"{field_name}\" removed"));
    Ok(())
}
