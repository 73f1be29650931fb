use crate::error::Result;
use crate::media::{self, MediaProbe};
use filetime::FileTime;
use image::DynamicImage;
use image_hasher::ImageHash;
use indicatif::ProgressBar;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Size and modification time, the two attributes every strategy needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mtime: FileTime,
}

impl FileStat {
    pub fn read(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            size: metadata.len(),
            mtime: FileTime::from_last_modification_time(&metadata),
        })
    }

    pub fn mtime_secs(&self) -> f64 {
        secs(self.mtime)
    }
}

pub fn secs(time: FileTime) -> f64 {
    time.unix_seconds() as f64 + f64::from(time.nanoseconds()) / 1e9
}

/// Everything ever computed for one path. Fields fill in on first use.
#[derive(Default)]
struct FileMetadata {
    stat: Option<FileStat>,
    image_hash: Option<ImageHash>,
    exif_times: Option<Vec<i64>>,
    frame_count: Option<u64>,
    checksum: Option<u32>,
    /// Kept between hashing and [`MetadataCache::reclaim`].
    decoded: Option<DynamicImage>,
}

/// Result of warming one file in a worker thread.
struct Preloaded {
    path: PathBuf,
    stat: FileStat,
    image_hash: ImageHash,
    exif_times: Vec<i64>,
}

/// Per-path metadata keyed by the path at the time it was read. Any path that
/// gets renamed, deleted, replaced or redated must be evicted.
#[derive(Default)]
pub struct MetadataCache {
    entries: HashMap<PathBuf, FileMetadata>,
    reclaimed: usize,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, path: &Path) -> &mut FileMetadata {
        self.entries.entry(path.to_path_buf()).or_default()
    }

    pub fn stat(&mut self, path: &Path) -> io::Result<FileStat> {
        let entry = self.entry(path);
        if let Some(stat) = entry.stat {
            return Ok(stat);
        }
        let stat = FileStat::read(path)?;
        entry.stat = Some(stat);
        Ok(stat)
    }

    pub fn image_hash(&mut self, path: &Path, probe: &dyn MediaProbe) -> Result<ImageHash> {
        let entry = self.entry(path);
        if let Some(hash) = &entry.image_hash {
            return Ok(hash.clone());
        }
        let image = match entry.decoded.take() {
            Some(image) => image,
            None => probe.decode(path)?,
        };
        let hash = probe.perceptual_hash(&image);
        entry.decoded = Some(image);
        entry.image_hash = Some(hash.clone());
        Ok(hash)
    }

    pub fn exif_times(&mut self, path: &Path, probe: &dyn MediaProbe) -> Vec<i64> {
        self.entry(path)
            .exif_times
            .get_or_insert_with(|| probe.exif_capture_times(path))
            .clone()
    }

    pub fn frame_count(&mut self, path: &Path, probe: &dyn MediaProbe) -> Result<u64> {
        let entry = self.entry(path);
        if let Some(frames) = entry.frame_count {
            return Ok(frames);
        }
        let frames = probe.frame_count(path)?;
        entry.frame_count = Some(frames);
        Ok(frames)
    }

    pub fn checksum(&mut self, path: &Path) -> io::Result<u32> {
        let entry = self.entry(path);
        if let Some(crc) = entry.checksum {
            return Ok(crc);
        }
        let crc = media::checksum(path)?;
        entry.checksum = Some(crc);
        Ok(crc)
    }

    /// Drop the decoded image of `path`; the derived hash stays cached.
    pub fn reclaim(&mut self, path: &Path) {
        if let Some(entry) = self.entries.get_mut(path) {
            if entry.decoded.take().is_some() {
                self.reclaimed += 1;
            }
        }
    }

    pub fn evict(&mut self, path: &Path) {
        self.entries.remove(path);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn has_image_hash(&self, path: &Path) -> bool {
        self.entries
            .get(path)
            .is_some_and(|entry| entry.image_hash.is_some())
    }

    pub fn holds_decoded(&self, path: &Path) -> bool {
        self.entries
            .get(path)
            .is_some_and(|entry| entry.decoded.is_some())
    }

    /// How many decoded images were released so far.
    pub fn reclaimed_count(&self) -> usize {
        self.reclaimed
    }

    /// Hash every image of `paths` on the rayon pool and merge the results
    /// once the whole batch is done. Unreadable files are logged and skipped.
    /// Returns the number of cached files.
    pub fn preload(
        &mut self,
        paths: &[PathBuf],
        probe: &dyn MediaProbe,
        progress: &ProgressBar,
    ) -> usize {
        let images: Vec<&PathBuf> = paths
            .iter()
            .filter(|p| media::MediaKind::of(p) == Some(media::MediaKind::Image))
            .collect();
        progress.set_length(images.len() as u64);

        let results: Vec<Preloaded> = images
            .par_iter()
            .filter_map(|path| {
                let result = Self::compute(path, probe);
                progress.inc(1);
                match result {
                    Ok(preloaded) => Some(preloaded),
                    Err(e) => {
                        log::warn!("Failed to cache {}: {}", path.display(), e);
                        None
                    }
                }
            })
            .collect();
        progress.finish_and_clear();

        let count = results.len();
        for preloaded in results {
            self.entries.insert(
                preloaded.path,
                FileMetadata {
                    stat: Some(preloaded.stat),
                    image_hash: Some(preloaded.image_hash),
                    exif_times: Some(preloaded.exif_times),
                    ..FileMetadata::default()
                },
            );
        }
        count
    }

    fn compute(path: &Path, probe: &dyn MediaProbe) -> Result<Preloaded> {
        let stat = FileStat::read(path)?;
        let image = probe.decode(path)?;
        let image_hash = probe.perceptual_hash(&image);
        let exif_times = probe.exif_capture_times(path);
        Ok(Preloaded {
            path: path.to_path_buf(),
            stat,
            image_hash,
            exif_times,
        })
    }
}
