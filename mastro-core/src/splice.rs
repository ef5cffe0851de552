use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

use crate::config::MastroConfig;
use crate::render::{RenderError, Renderer};

/// The tag lands this many seconds before the end of the master...
pub const TAG_LEAD_SECONDS: f64 = 3.0;
/// ...unless the track is short enough that 80% through comes later.
pub const TAG_POSITION_RATIO: f64 = 0.8;

#[derive(Debug, Error)]
pub enum SpliceError {
    #[error("splice render step failed: {0}")]
    Render(#[from] RenderError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type SpliceResult<T> = Result<T, SpliceError>;

/// Where the tag clip starts inside a master of the given duration.
pub fn insert_point(master_duration: f64) -> f64 {
    (master_duration - TAG_LEAD_SECONDS).max(master_duration * TAG_POSITION_RATIO)
}

/// Resolves the voice-tag asset from the fixed candidate list. Absence of
/// every candidate simply disables the splice stage.
pub fn resolve_tag_asset(config: &MastroConfig) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(explicit) = &config.mastering.voice_tag {
        candidates.push(config.resolve_path(explicit));
    }
    candidates.push(config.assets_dir().join("voice_tag.wav"));
    candidates.push(config.assets_dir().join("tag.mp3"));
    candidates.into_iter().find(|path| path.exists())
}

/// Splices the configured voice tag near the end of a finished master by
/// splitting, leveling and reassembling on disk.
pub struct VoiceTagSplicer {
    renderer: Renderer,
    tag_gain_db: f64,
}

impl VoiceTagSplicer {
    pub fn new(renderer: Renderer, tag_gain_db: f64) -> Self {
        Self {
            renderer,
            tag_gain_db,
        }
    }

    /// Replaces `master` with a tagged copy. Every intermediate file is
    /// deleted whether the splice succeeds or not.
    pub async fn splice(&self, master: &Path, tag: &Path, scratch_dir: &Path) -> SpliceResult<()> {
        let mut intermediates: Vec<PathBuf> = Vec::new();
        let result = self
            .splice_inner(master, tag, scratch_dir, &mut intermediates)
            .await;
        for path in intermediates {
            if let Err(err) = fs::remove_file(&path).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %err, "failed to remove splice intermediate");
                }
            }
        }
        result
    }

    async fn splice_inner(
        &self,
        master: &Path,
        tag: &Path,
        scratch_dir: &Path,
        intermediates: &mut Vec<PathBuf>,
    ) -> SpliceResult<()> {
        let master_duration = self.renderer.duration_seconds(master).await?;
        let tag_duration = self.renderer.duration_seconds(tag).await?;
        let at = insert_point(master_duration);
        debug!(
            master_duration,
            tag_duration, at, "splicing voice tag into master"
        );

        let head = scratch_dir.join("splice_head.wav");
        intermediates.push(head.clone());
        self.renderer.extract(master, 0.0, Some(at), &head).await?;

        let leveled_tag = scratch_dir.join("splice_tag.wav");
        intermediates.push(leveled_tag.clone());
        self.renderer
            .adjust_gain(tag, self.tag_gain_db, &leveled_tag)
            .await?;

        let mut parts = vec![head, leveled_tag];
        let tail_start = at + tag_duration;
        if tail_start < master_duration {
            let tail = scratch_dir.join("splice_tail.wav");
            intermediates.push(tail.clone());
            self.renderer.extract(master, tail_start, None, &tail).await?;
            parts.push(tail);
        }

        let list_file = scratch_dir.join("splice_parts.txt");
        intermediates.push(list_file.clone());
        let mut listing = String::new();
        for part in &parts {
            listing.push_str(&format!("file '{}'\n", part.display()));
        }
        fs::write(&list_file, listing)
            .await
            .map_err(|source| SpliceError::Io {
                source,
                path: list_file.clone(),
            })?;

        let assembled = scratch_dir.join("splice_master.wav");
        intermediates.push(assembled.clone());
        self.renderer.concat(&list_file, &assembled).await?;

        // Copy instead of rename: scratch and output may live on different
        // filesystems. The assembled copy is cleaned up with the rest.
        fs::copy(&assembled, master)
            .await
            .map_err(|source| SpliceError::Io {
                source,
                path: master.to_path_buf(),
            })?;
        Ok(())
    }
}
