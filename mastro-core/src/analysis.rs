use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::tool::{run_tool, SystemToolExecutor, ToolError, ToolExecutor};

/// Integrated loudness assumed when the measurement report carries no
/// loudness line at all (broadcast reference level).
pub const FALLBACK_INTEGRATED_LUFS: f64 = -23.0;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("loudness scan failed: {0}")]
    Tool(#[from] ToolError),
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Loudness reading for one audio file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioAnalysis {
    pub integrated_lufs: f64,
    pub peak_db: f64,
}

/// Runs the external loudness measurement over a file and parses the
/// textual report it writes to stderr.
#[derive(Clone)]
pub struct AudioAnalyzer {
    ffmpeg: PathBuf,
    executor: Arc<dyn ToolExecutor>,
    timeout: Duration,
}

impl AudioAnalyzer {
    pub fn new(ffmpeg: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            executor: Arc::new(SystemToolExecutor),
            timeout,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Measures integrated loudness and peak. Only an invocation failure is
    /// an error; a report missing values falls back to neutral defaults.
    pub async fn analyze(&self, path: &Path) -> AnalysisResult<AudioAnalysis> {
        let args = vec![
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-i".to_string(),
            path.display().to_string(),
            "-af".to_string(),
            "ebur128=peak=true".to_string(),
            "-f".to_string(),
            "null".to_string(),
            "-".to_string(),
        ];
        let output = run_tool(self.executor.as_ref(), &self.ffmpeg, &args, self.timeout).await?;
        let report = String::from_utf8_lossy(&output.stderr);
        Ok(parse_loudness_report(&report))
    }
}

fn integrated_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"I:\s*(-?\d+(?:\.\d+)?)\s*LUFS").expect("valid regex"))
}

fn peak_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Peak:\s*(-?\d+(?:\.\d+)?)\s*dBFS").expect("valid regex"))
}

/// The measurement prints rolling loudness lines followed by a summary
/// block; the last reported value is the authoritative one.
pub fn parse_loudness_report(report: &str) -> AudioAnalysis {
    let integrated_lufs = integrated_pattern()
        .captures_iter(report)
        .filter_map(|capture| capture.get(1))
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .last()
        .unwrap_or(FALLBACK_INTEGRATED_LUFS);
    let peak_db = peak_pattern()
        .captures_iter(report)
        .filter_map(|capture| capture.get(1))
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .last()
        .unwrap_or(0.0);
    AudioAnalysis {
        integrated_lufs,
        peak_db,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_REPORT: &str = r#"
[Parsed_ebur128_0 @ 0x55aa] t: 2.5  TARGET:-23 LUFS  M: -15.1 S: -14.8  I: -14.9 LUFS  LRA: 2.1 LU
[Parsed_ebur128_0 @ 0x55aa] Summary:

  Integrated loudness:
    I:         -14.2 LUFS
    Threshold: -24.9 LUFS

  Loudness range:
    LRA:         4.3 LU

  True peak:
    Peak:       -0.3 dBFS
"#;

    #[test]
    fn parses_last_reported_values() {
        let analysis = parse_loudness_report(SAMPLE_REPORT);
        assert_eq!(analysis.integrated_lufs, -14.2);
        assert_eq!(analysis.peak_db, -0.3);
    }

    #[test]
    fn missing_loudness_falls_back_to_reference_level() {
        let analysis = parse_loudness_report("no loudness summary here");
        assert_eq!(analysis.integrated_lufs, FALLBACK_INTEGRATED_LUFS);
        assert_eq!(analysis.peak_db, 0.0);
    }

    #[test]
    fn missing_peak_defaults_to_zero() {
        let analysis = parse_loudness_report("    I: -9.8 LUFS\n");
        assert_eq!(analysis.integrated_lufs, -9.8);
        assert_eq!(analysis.peak_db, 0.0);
    }
}
