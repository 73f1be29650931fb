use crate::error::{DedupError, Result};
use chrono::{Local, NaiveDateTime, TimeZone};
use exif::{In, Reader, Tag, Value};
use image::{DynamicImage, ImageReader};
use image_hasher::{HashAlg, Hasher, HasherConfig, ImageHash};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::process::Command;

pub const IMAGE_SUFFIXES: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".avif", ".webp", ".heic", ".bmp", ".tif", ".tiff",
];
pub const VIDEO_SUFFIXES: &[&str] = &[
    ".mp4", ".mov", ".avi", ".vob", ".mts", ".3gp", ".mpg", ".mpeg", ".wmv", ".hevc",
];

const EXIF_TIME_TAGS: [Tag; 3] = [Tag::DateTime, Tag::DateTimeOriginal, Tag::DateTimeDigitized];

/// Lower-cased extension with its leading dot, or an empty string.
pub fn suffix_of(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn of(path: &Path) -> Option<Self> {
        let suffix = suffix_of(path);
        if IMAGE_SUFFIXES.contains(&suffix.as_str()) {
            Some(MediaKind::Image)
        } else if VIDEO_SUFFIXES.contains(&suffix.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

/// Heavy per-file measurements the matcher relies on. The engine never
/// decodes media itself; it asks a probe.
pub trait MediaProbe: Send + Sync {
    fn decode(&self, path: &Path) -> Result<DynamicImage>;

    fn perceptual_hash(&self, image: &DynamicImage) -> ImageHash;

    /// Capture timestamps (seconds since the epoch) found in the EXIF block.
    /// Files without EXIF yield an empty list.
    fn exif_capture_times(&self, path: &Path) -> Vec<i64>;

    fn frame_count(&self, path: &Path) -> Result<u64>;
}

/// Probe backed by `image` decoding, a mean (average) hash, the EXIF
/// container reader and `ffprobe` for videos.
pub struct StdProbe {
    hasher: Hasher,
}

impl StdProbe {
    pub fn new() -> Self {
        Self {
            hasher: HasherConfig::new().hash_alg(HashAlg::Mean).to_hasher(),
        }
    }

    fn field_to_string(value: &Value) -> Option<String> {
        match value {
            Value::Ascii(vec) => vec.first().map(|ascii| {
                String::from_utf8_lossy(ascii)
                    .trim_end_matches('\0')
                    .to_string()
            }),
            _ => None,
        }
    }

    /// EXIF stores "YYYY:MM:DD HH:MM:SS" in camera local time.
    fn parse_exif_datetime(datetime: &str) -> Option<i64> {
        let naive = NaiveDateTime::parse_from_str(datetime.trim(), "%Y:%m:%d %H:%M:%S").ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.timestamp())
    }
}

impl Default for StdProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaProbe for StdProbe {
    fn decode(&self, path: &Path) -> Result<DynamicImage> {
        let reader = ImageReader::open(path)?
            .with_guessed_format()
            .map_err(|e| DedupError::corrupt(path, e))?;
        reader.decode().map_err(|e| DedupError::corrupt(path, e))
    }

    fn perceptual_hash(&self, image: &DynamicImage) -> ImageHash {
        self.hasher.hash_image(image)
    }

    fn exif_capture_times(&self, path: &Path) -> Vec<i64> {
        let Ok(file) = File::open(path) else {
            return Vec::new();
        };
        let mut reader = BufReader::new(file);
        let exif = match Reader::new().read_from_container(&mut reader) {
            Ok(exif) => exif,
            Err(_) => return Vec::new(),
        };

        let mut times: Vec<i64> = exif
            .fields()
            .filter(|field| field.ifd_num == In::PRIMARY && EXIF_TIME_TAGS.contains(&field.tag))
            .filter_map(|field| Self::field_to_string(&field.value))
            .filter_map(|text| {
                let parsed = Self::parse_exif_datetime(&text);
                if parsed.is_none() {
                    log::debug!("Failed to parse EXIF datetime {text:?} in {}", path.display());
                }
                parsed
            })
            .collect();
        times.sort_unstable();
        times.dedup();
        times
    }

    fn frame_count(&self, path: &Path) -> Result<u64> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-count_packets",
                "-show_entries",
                "stream=nb_read_packets",
                "-of",
                "csv=p=0",
            ])
            .arg(path)
            .output()
            .map_err(|e| DedupError::ProbeUnavailable {
                tool: "ffprobe".to_string(),
                message: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(DedupError::corrupt(
                path,
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        text.trim()
            .trim_end_matches(',')
            .parse()
            .map_err(|_| DedupError::corrupt(path, format!("unexpected frame count {:?}", text.trim())))
    }
}

/// CRC32 of the whole file content.
pub fn checksum(path: &Path) -> std::io::Result<u32> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = crc32fast::Hasher::new();
    let mut buffer = [0; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}
