use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MastroConfig {
    pub server: ServerSection,
    pub paths: PathsSection,
    pub tools: ToolsSection,
    pub mastering: MasteringSection,
}

impl MastroConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.work_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.output_dir)
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.assets_dir)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tools.tool_timeout_secs)
    }

    pub fn job_deadline(&self) -> Duration {
        Duration::from_secs(self.tools.job_deadline_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.mastering.retention_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub bind_addr: String,
    pub public_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub work_dir: String,
    pub output_dir: String,
    pub assets_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub tool_timeout_secs: u64,
    pub job_deadline_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MasteringSection {
    pub default_preset: String,
    pub loudness_tolerance_lu: f64,
    pub fine_tune_lra: f64,
    pub voice_tag_gain_db: f64,
    pub voice_tag: Option<String>,
    pub retention_secs: u64,
    pub mp3_bitrate: String,
}

pub fn load_mastro_config<P: AsRef<Path>>(path: P) -> Result<MastroConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
