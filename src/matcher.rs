use crate::config::Config;
use crate::error::Result;
use crate::media::{MediaKind, MediaProbe};
use crate::metadata::MetadataCache;
use std::path::{Path, PathBuf};

/// Window around the work file mtime for the image date gate.
const IMAGE_DATE_WINDOW: f64 = 3600.0;

/// Outcome of matching one work file against its candidate pool.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Candidates actually tested, after the extension / media-kind filter.
    pub candidates: Vec<PathBuf>,
    pub original: Option<PathBuf>,
}

impl MatchResult {
    /// Several candidates, none of them good enough.
    pub fn is_ambiguous(&self) -> bool {
        self.original.is_none() && self.candidates.len() > 1
    }
}

pub struct SimilarityMatcher<'a> {
    config: &'a Config,
    probe: &'a dyn MediaProbe,
}

impl<'a> SimilarityMatcher<'a> {
    pub fn new(config: &'a Config, probe: &'a dyn MediaProbe) -> Self {
        Self { config, probe }
    }

    pub fn find(
        &self,
        work_file: &Path,
        pool: Vec<PathBuf>,
        cache: &mut MetadataCache,
    ) -> Result<MatchResult> {
        if self.config.media_magic {
            self.find_media(work_file, pool, cache)
        } else {
            self.find_plain(work_file, pool, cache)
        }
    }

    /// Same extension, then date and size. First hit wins.
    fn find_plain(
        &self,
        work_file: &Path,
        pool: Vec<PathBuf>,
        cache: &mut MetadataCache,
    ) -> Result<MatchResult> {
        let ext = |p: &Path| {
            let ext = p.extension().map(|e| e.to_string_lossy().into_owned());
            if self.config.casefold {
                ext.map(|e| e.to_lowercase())
            } else {
                ext
            }
        };
        let work_ext = ext(work_file);
        let candidates: Vec<PathBuf> = pool.into_iter().filter(|p| ext(p) == work_ext).collect();

        let mut original = None;
        for candidate in &candidates {
            if self.plain_similar(work_file, candidate, cache)? {
                original = Some(candidate.clone());
                break;
            }
        }
        Ok(MatchResult {
            candidates,
            original,
        })
    }

    fn plain_similar(
        &self,
        work_file: &Path,
        candidate: &Path,
        cache: &mut MetadataCache,
    ) -> Result<bool> {
        let wst = cache.stat(work_file)?;
        let ost = cache.stat(candidate)?;

        let date_ok = self.config.ignore_date
            || wst.mtime == ost.mtime
            || self.config.tolerance.is_some_and(|(lo, hi)| {
                let hours = (wst.mtime_secs() - ost.mtime_secs()) / 3600.0;
                lo as f64 <= hours && hours <= hi as f64
            });
        if !date_ok {
            return Ok(false);
        }
        if self.config.ignore_size {
            return Ok(true);
        }
        if wst.size != ost.size {
            return Ok(false);
        }
        if self.config.checksum {
            return Ok(cache.checksum(candidate)? == cache.checksum(work_file)?);
        }
        Ok(true)
    }

    /// Images by perceptual hash, videos by frame count. Media of the other
    /// kind and non-media files never pair.
    fn find_media(
        &self,
        work_file: &Path,
        pool: Vec<PathBuf>,
        cache: &mut MetadataCache,
    ) -> Result<MatchResult> {
        let Some(kind) = MediaKind::of(work_file) else {
            log::debug!("Not a media file: {}", work_file.display());
            return Ok(MatchResult {
                candidates: Vec::new(),
                original: None,
            });
        };
        let candidates: Vec<PathBuf> = pool
            .into_iter()
            .filter(|p| MediaKind::of(p) == Some(kind))
            .collect();
        log::debug!("File {} candidates {:?}", work_file.display(), candidates);

        let found = match kind {
            MediaKind::Image => self.find_similar_image(work_file, &candidates, cache),
            MediaKind::Video => self.find_similar_video(work_file, &candidates, cache),
        };
        cache.reclaim(work_file);
        Ok(MatchResult {
            original: found?,
            candidates,
        })
    }

    fn find_similar_image(
        &self,
        work_file: &Path,
        candidates: &[PathBuf],
        cache: &mut MetadataCache,
    ) -> Result<Option<PathBuf>> {
        for candidate in candidates {
            if !candidate.exists() {
                continue;
            }
            let similar = self.image_similar(work_file, candidate, cache);
            cache.reclaim(candidate);
            if similar? {
                return Ok(Some(candidate.clone()));
            }
        }
        Ok(None)
    }

    /// Errors on the candidate side only disqualify the candidate; errors on
    /// the work file propagate.
    fn image_similar(
        &self,
        work_file: &Path,
        candidate: &Path,
        cache: &mut MetadataCache,
    ) -> Result<bool> {
        if self.config.img_compare_date {
            let reference = cache.stat(work_file)?.mtime_secs();
            let own = match cache.stat(candidate) {
                Ok(stat) => stat.mtime_secs(),
                Err(e) => {
                    log::error!("Cannot stat {}: {}", candidate.display(), e);
                    return Ok(false);
                }
            };
            let close = (reference - own).abs() <= IMAGE_DATE_WINDOW
                || cache
                    .exif_times(candidate, self.probe)
                    .iter()
                    .any(|&t| (reference - t as f64).abs() <= IMAGE_DATE_WINDOW);
            if !close {
                return Ok(false);
            }
        }

        let work_hash = cache.image_hash(work_file, self.probe)?;
        let candidate_hash = match cache.image_hash(candidate, self.probe) {
            Ok(hash) => hash,
            Err(e) => {
                log::error!("Cannot hash {}: {}", candidate.display(), e);
                return Ok(false);
            }
        };
        let distance = work_hash.dist(&candidate_hash);
        if distance > self.config.accepted_img_hash_diff {
            log::debug!("Hash distance {}: {} {}", distance, work_file.display(), candidate.display());
            return Ok(false);
        }
        Ok(true)
    }

    fn find_similar_video(
        &self,
        work_file: &Path,
        candidates: &[PathBuf],
        cache: &mut MetadataCache,
    ) -> Result<Option<PathBuf>> {
        let mut work_frames = None;
        for candidate in candidates {
            if !candidate.exists() {
                continue;
            }
            let frames = match work_frames {
                Some(frames) => frames,
                None => {
                    let frames = cache.frame_count(work_file, self.probe)?;
                    work_frames = Some(frames);
                    frames
                }
            };
            let other_frames = match cache.frame_count(candidate, self.probe) {
                Ok(frames) => frames,
                Err(e) => {
                    log::error!("Cannot count frames of {}: {}", candidate.display(), e);
                    continue;
                }
            };
            let delta = frames.abs_diff(other_frames);
            if delta <= self.config.accepted_frame_delta {
                return Ok(Some(candidate.clone()));
            }
            log::debug!("Frame delta {}: {} {}", delta, work_file.display(), candidate.display());
        }
        Ok(None)
    }
}
