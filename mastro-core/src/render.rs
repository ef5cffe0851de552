use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::chain::ProcessingChain;
use crate::tool::{run_tool, SystemToolExecutor, ToolError, ToolExecutor};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render failed: {0}")]
    Tool(#[from] ToolError),
    #[error("could not read duration of {path}: {raw:?}")]
    Duration { path: PathBuf, raw: String },
}

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("distribution encode failed: {0}")]
    Tool(#[from] ToolError),
}

/// Adapter over the external processing utility. Every method builds a
/// structured argument list; filter parameters never pass through a single
/// interpolated command string.
#[derive(Clone)]
pub struct Renderer {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    executor: Arc<dyn ToolExecutor>,
    timeout: Duration,
}

impl Renderer {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            executor: Arc::new(SystemToolExecutor),
            timeout,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Renders `input` through the chain, preserving stage order exactly as
    /// the chain builder emitted it.
    pub async fn render(
        &self,
        input: &Path,
        chain: &ProcessingChain,
        output: &Path,
    ) -> RenderResult<()> {
        let mut args = base_args(input);
        if !chain.is_empty() {
            args.push("-af".to_string());
            args.push(chain.to_filtergraph());
        }
        args.push(output.display().to_string());
        run_tool(self.executor.as_ref(), &self.ffmpeg, &args, self.timeout).await?;
        Ok(())
    }

    /// Normalization-mode invocation used by the fine-tune pass: explicit
    /// integrated target, true-peak ceiling and loudness range instead of a
    /// stage chain.
    pub async fn normalize(
        &self,
        input: &Path,
        target_lufs: f64,
        true_peak_db: f64,
        loudness_range: f64,
        output: &Path,
    ) -> RenderResult<()> {
        let mut args = base_args(input);
        args.push("-af".to_string());
        args.push(format!(
            "loudnorm=I={target_lufs:.1}:TP={true_peak_db:.1}:LRA={loudness_range:.1}"
        ));
        args.push(output.display().to_string());
        run_tool(self.executor.as_ref(), &self.ffmpeg, &args, self.timeout).await?;
        Ok(())
    }

    /// Applies a flat gain, used to keep the voice tag under the master.
    pub async fn adjust_gain(&self, input: &Path, gain_db: f64, output: &Path) -> RenderResult<()> {
        let mut args = base_args(input);
        args.push("-af".to_string());
        args.push(format!("volume={gain_db:.1}dB"));
        args.push(output.display().to_string());
        run_tool(self.executor.as_ref(), &self.ffmpeg, &args, self.timeout).await?;
        Ok(())
    }

    /// Cuts `[start, start+duration)` (or through the end when `duration`
    /// is `None`) into a new file, re-encoding for clean boundaries.
    pub async fn extract(
        &self,
        input: &Path,
        start: f64,
        duration: Option<f64>,
        output: &Path,
    ) -> RenderResult<()> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-ss".to_string(),
            format!("{start:.3}"),
            "-i".to_string(),
            input.display().to_string(),
        ];
        if let Some(duration) = duration {
            args.push("-t".to_string());
            args.push(format!("{duration:.3}"));
        }
        args.push(output.display().to_string());
        run_tool(self.executor.as_ref(), &self.ffmpeg, &args, self.timeout).await?;
        Ok(())
    }

    /// Concatenates the parts named in a concat list file.
    pub async fn concat(&self, list_file: &Path, output: &Path) -> RenderResult<()> {
        let args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            list_file.display().to_string(),
            output.display().to_string(),
        ];
        run_tool(self.executor.as_ref(), &self.ffmpeg, &args, self.timeout).await?;
        Ok(())
    }

    /// Transcodes the master into the constant-bitrate distribution copy.
    pub async fn encode_mp3(
        &self,
        input: &Path,
        output: &Path,
        bitrate: &str,
    ) -> Result<(), EncodeError> {
        let mut args = base_args(input);
        args.push("-codec:a".to_string());
        args.push("libmp3lame".to_string());
        args.push("-b:a".to_string());
        args.push(bitrate.to_string());
        args.push(output.display().to_string());
        run_tool(self.executor.as_ref(), &self.ffmpeg, &args, self.timeout).await?;
        Ok(())
    }

    /// Probes total duration in seconds.
    pub async fn duration_seconds(&self, path: &Path) -> RenderResult<f64> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "format=duration".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1:nokey=1".to_string(),
            path.display().to_string(),
        ];
        let output = run_tool(self.executor.as_ref(), &self.ffprobe, &args, self.timeout).await?;
        let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
        raw.parse::<f64>().map_err(|_| RenderError::Duration {
            path: path.to_path_buf(),
            raw,
        })
    }
}

fn base_args(input: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        input.display().to_string(),
    ]
}
