use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Output};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use uuid::Uuid;

use mastro_core::config::{
    MasteringSection, MastroConfig, PathsSection, ServerSection, ToolsSection,
};
use mastro_core::job::{Job, JobStatus};
use mastro_core::pipeline::{MasteringPipeline, PipelineError};
use mastro_core::tool::ToolExecutor;

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;
#[cfg(windows)]
use std::os::windows::process::ExitStatusExt;

/// Scripted stand-in for the external audio tools. Loudness readings are
/// consumed in analyze order; durations are resolved by path suffix; render
/// style invocations create their output file so later stages find it.
struct StubTool {
    calls: Mutex<Vec<Vec<String>>>,
    loudness: Mutex<VecDeque<f64>>,
    durations: Vec<(&'static str, f64)>,
    fail_render: bool,
    fail_encode: bool,
    fail_probe_suffix: Option<&'static str>,
}

impl StubTool {
    fn new(loudness: &[f64]) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            loudness: Mutex::new(loudness.iter().copied().collect()),
            durations: Vec::new(),
            fail_render: false,
            fail_encode: false,
            fail_probe_suffix: None,
        })
    }

    fn with_durations(loudness: &[f64], durations: Vec<(&'static str, f64)>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            loudness: Mutex::new(loudness.iter().copied().collect()),
            durations,
            fail_render: false,
            fail_encode: false,
            fail_probe_suffix: None,
        })
    }

    fn failing(fail_render: bool, fail_encode: bool, loudness: &[f64]) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            loudness: Mutex::new(loudness.iter().copied().collect()),
            durations: Vec::new(),
            fail_render,
            fail_encode,
            fail_probe_suffix: None,
        })
    }

    fn with_failing_probe(loudness: &[f64], suffix: &'static str) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            loudness: Mutex::new(loudness.iter().copied().collect()),
            durations: Vec::new(),
            fail_render: false,
            fail_encode: false,
            fail_probe_suffix: Some(suffix),
        })
    }

    fn calls_containing(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|args| args.iter().any(|arg| arg.contains(needle)))
            .count()
    }

    fn loudness_report(&self) -> Vec<u8> {
        let value = self
            .loudness
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(-23.0);
        format!(
            "  Integrated loudness:\n    I:         {value:.1} LUFS\n\n  True peak:\n    Peak:       -0.9 dBFS\n"
        )
        .into_bytes()
    }
}

fn exit(code: i32) -> ExitStatus {
    #[cfg(unix)]
    {
        ExitStatus::from_raw(code << 8)
    }
    #[cfg(windows)]
    {
        ExitStatus::from_raw(code as u32)
    }
}

#[async_trait]
impl ToolExecutor for StubTool {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output> {
        self.calls.lock().unwrap().push(args.to_vec());
        let program = program.to_string_lossy();

        if program.ends_with("ffprobe") {
            let queried = args.last().cloned().unwrap_or_default();
            if let Some(suffix) = self.fail_probe_suffix {
                if queried.ends_with(suffix) {
                    return Ok(Output {
                        status: exit(1),
                        stdout: Vec::new(),
                        stderr: b"Invalid data found when processing input".to_vec(),
                    });
                }
            }
            let duration = self
                .durations
                .iter()
                .find(|(suffix, _)| queried.ends_with(suffix))
                .map(|(_, seconds)| *seconds)
                .unwrap_or(30.0);
            return Ok(Output {
                status: exit(0),
                stdout: format!("{duration:.6}\n").into_bytes(),
                stderr: Vec::new(),
            });
        }

        if args.iter().any(|arg| arg.contains("ebur128")) {
            return Ok(Output {
                status: exit(0),
                stdout: Vec::new(),
                stderr: self.loudness_report(),
            });
        }

        if args.iter().any(|arg| arg == "libmp3lame") {
            if self.fail_encode {
                return Ok(Output {
                    status: exit(1),
                    stdout: Vec::new(),
                    stderr: b"lame: insufficient cowbell".to_vec(),
                });
            }
        } else if self.fail_render {
            return Ok(Output {
                status: exit(1),
                stdout: Vec::new(),
                stderr: b"Error initializing filter graph".to_vec(),
            });
        }

        // Everything else writes its output file, which is always the last
        // argument for render, normalize, extract, concat and encode.
        if let Some(output_path) = args.last() {
            std::fs::write(output_path, b"AUDIO")?;
        }
        Ok(Output {
            status: exit(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }
}

fn test_config(base: &Path) -> MastroConfig {
    MastroConfig {
        server: ServerSection {
            bind_addr: "127.0.0.1:0".to_string(),
            public_prefix: "/downloads".to_string(),
        },
        paths: PathsSection {
            base_dir: base.to_string_lossy().to_string(),
            work_dir: "work".to_string(),
            output_dir: "masters".to_string(),
            assets_dir: "assets".to_string(),
        },
        tools: ToolsSection {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            tool_timeout_secs: 5,
            job_deadline_secs: 30,
        },
        mastering: MasteringSection {
            default_preset: "kidandali".to_string(),
            loudness_tolerance_lu: 2.0,
            fine_tune_lra: 20.0,
            voice_tag_gain_db: -3.0,
            voice_tag: None,
            retention_secs: 300,
            mp3_bitrate: "320k".to_string(),
        },
    }
}

fn build_pipeline(config: MastroConfig, stub: Arc<StubTool>) -> MasteringPipeline {
    MasteringPipeline::new(config)
        .expect("pipeline should build")
        .with_executor(stub)
}

async fn wait_terminal(pipeline: &MasteringPipeline, id: Uuid) -> Job {
    for _ in 0..500 {
        if let Some(job) = pipeline.registry().get(id) {
            if job.status.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never reached a terminal state");
}

#[tokio::test]
async fn masters_a_track_end_to_end() {
    let base = TempDir::new().unwrap();
    let stub = StubTool::new(&[-20.0, -9.5]);
    let pipeline = build_pipeline(test_config(base.path()), Arc::clone(&stub));

    let id = pipeline
        .submit("upload.wav", b"RIFFdata", None)
        .await
        .unwrap();
    let job = wait_terminal(&pipeline, id).await;

    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.progress_percent, 100);
    let result = job.result.expect("completed job carries a result");
    assert_eq!(result.gain_db, 11.0);
    assert_eq!(result.preset, "kidandali");
    assert_eq!(result.input.integrated_lufs, -20.0);
    assert_eq!(result.output.integrated_lufs, -9.5);
    assert!(result.master_file.starts_with("/downloads/"));
    // Cleanup runs just after the terminal status lands.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(base
        .path()
        .join("masters")
        .join(format!("{id}_master.wav"))
        .exists());
    assert!(base.path().join("masters").join(format!("{id}.mp3")).exists());

    // Within tolerance: no normalization-mode invocation.
    assert_eq!(stub.calls_containing("loudnorm"), 0);
    // No voice tag asset anywhere: the splice stage never touches disk.
    assert_eq!(stub.calls_containing("concat"), 0);
    assert!(!result.voice_tag_added);
    // Staging is reclaimed after the terminal state.
    assert!(!base.path().join("work").join(id.to_string()).exists());
}

#[tokio::test]
async fn fine_tune_runs_once_and_records_the_second_reading() {
    let base = TempDir::new().unwrap();
    // Input, first verify (4 dB off target), post-correction verify.
    let stub = StubTool::new(&[-20.0, -13.0, -9.2]);
    let pipeline = build_pipeline(test_config(base.path()), Arc::clone(&stub));

    let id = pipeline
        .submit("upload.wav", b"RIFFdata", Some("kidandali"))
        .await
        .unwrap();
    let job = wait_terminal(&pipeline, id).await;

    assert_eq!(job.status, JobStatus::Complete);
    let result = job.result.unwrap();
    assert_eq!(stub.calls_containing("loudnorm"), 1);
    assert_eq!(result.output.integrated_lufs, -9.2);
    // The aside copy used as the normalization source is discarded.
    assert!(!base
        .path()
        .join("masters")
        .join(format!("{id}_pre_tune.wav"))
        .exists());
}

#[tokio::test]
async fn fine_tune_skipped_when_within_tolerance() {
    let base = TempDir::new().unwrap();
    // -10.5 against a -9 target is inside the 2 LU tolerance.
    let stub = StubTool::new(&[-20.0, -10.5]);
    let pipeline = build_pipeline(test_config(base.path()), Arc::clone(&stub));

    let id = pipeline
        .submit("upload.wav", b"RIFFdata", None)
        .await
        .unwrap();
    let job = wait_terminal(&pipeline, id).await;

    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(stub.calls_containing("loudnorm"), 0);
    assert_eq!(job.result.unwrap().output.integrated_lufs, -10.5);
}

#[tokio::test]
async fn render_failure_fails_the_job() {
    let base = TempDir::new().unwrap();
    let stub = StubTool::failing(true, false, &[-20.0]);
    let pipeline = build_pipeline(test_config(base.path()), stub);

    let id = pipeline
        .submit("upload.wav", b"RIFFdata", None)
        .await
        .unwrap();
    let job = wait_terminal(&pipeline, id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.result.is_none());
    assert!(job.message.contains("filter graph"));
}

#[tokio::test]
async fn encode_failure_fails_the_job_even_with_a_valid_master() {
    let base = TempDir::new().unwrap();
    let stub = StubTool::failing(false, true, &[-20.0, -9.5]);
    let pipeline = build_pipeline(test_config(base.path()), stub);

    let id = pipeline
        .submit("upload.wav", b"RIFFdata", None)
        .await
        .unwrap();
    let job = wait_terminal(&pipeline, id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.message.contains("cowbell"));
    // Partial outputs of a failed job are reclaimed.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!base
        .path()
        .join("masters")
        .join(format!("{id}_master.wav"))
        .exists());
}

#[tokio::test]
async fn unknown_preset_falls_back_to_the_default() {
    let base = TempDir::new().unwrap();
    let stub = StubTool::new(&[-20.0, -9.5]);
    let pipeline = build_pipeline(test_config(base.path()), stub);

    let id = pipeline
        .submit("upload.wav", b"RIFFdata", Some("vaporwave"))
        .await
        .unwrap();
    let job = wait_terminal(&pipeline, id).await;

    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.result.unwrap().preset, "kidandali");
}

#[tokio::test]
async fn voice_tag_is_spliced_near_the_end() {
    let base = TempDir::new().unwrap();
    let config = test_config(base.path());
    std::fs::create_dir_all(base.path().join("assets")).unwrap();
    std::fs::write(base.path().join("assets/voice_tag.wav"), b"TAG").unwrap();

    let stub = StubTool::with_durations(
        &[-20.0, -9.5],
        vec![("_master.wav", 60.0), ("voice_tag.wav", 4.0)],
    );
    let pipeline = build_pipeline(config, Arc::clone(&stub));

    let id = pipeline
        .submit("upload.wav", b"RIFFdata", None)
        .await
        .unwrap();
    let job = wait_terminal(&pipeline, id).await;

    assert_eq!(job.status, JobStatus::Complete);
    assert!(job.result.unwrap().voice_tag_added);
    assert_eq!(stub.calls_containing("concat"), 1);
    // Insert point for a 60s master is 57s; the tail resumes at 61s.
    assert!(stub.calls_containing("57.000") >= 1);
    assert!(stub.calls_containing("61.000") >= 1);
    // Tag leveled down relative to the master.
    assert_eq!(stub.calls_containing("volume=-3.0dB"), 1);
    // All splice intermediates lived in staging, which is gone.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!base.path().join("work").join(id.to_string()).exists());
}

#[tokio::test]
async fn splice_failure_ships_the_master_without_the_tag() {
    let base = TempDir::new().unwrap();
    let config = test_config(base.path());
    std::fs::create_dir_all(base.path().join("assets")).unwrap();
    std::fs::write(base.path().join("assets/voice_tag.wav"), b"TAG").unwrap();

    // The duration probe rejects the tag clip, so the splice stage errors
    // out before touching the master.
    let stub = StubTool::with_failing_probe(&[-20.0, -9.5], "voice_tag.wav");
    let pipeline = build_pipeline(config, stub);

    let id = pipeline
        .submit("upload.wav", b"RIFFdata", None)
        .await
        .unwrap();
    let job = wait_terminal(&pipeline, id).await;

    // The job still completes; it just ships untagged.
    assert_eq!(job.status, JobStatus::Complete);
    assert!(!job.result.unwrap().voice_tag_added);
}

#[tokio::test]
async fn empty_payload_is_rejected_before_a_job_exists() {
    let base = TempDir::new().unwrap();
    let stub = StubTool::new(&[]);
    let pipeline = build_pipeline(test_config(base.path()), stub);

    let err = pipeline.submit("upload.wav", b"", None).await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
    assert!(pipeline.registry().is_empty());
}

#[tokio::test]
async fn failed_staging_leaves_no_job_record_behind() {
    let base = TempDir::new().unwrap();
    let stub = StubTool::new(&[]);
    let pipeline = build_pipeline(test_config(base.path()), stub);

    // A regular file where the work dir should be makes staging fail.
    std::fs::remove_dir_all(base.path().join("work")).unwrap();
    std::fs::write(base.path().join("work"), b"not a directory").unwrap();

    let err = pipeline
        .submit("upload.wav", b"RIFFdata", None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Io { .. }));
    assert!(pipeline.registry().is_empty());
}

#[tokio::test]
async fn retention_window_reclaims_the_record() {
    let base = TempDir::new().unwrap();
    let mut config = test_config(base.path());
    config.mastering.retention_secs = 1;
    let stub = StubTool::new(&[-20.0, -9.5]);
    let pipeline = build_pipeline(config, stub);

    let id = pipeline
        .submit("upload.wav", b"RIFFdata", None)
        .await
        .unwrap();
    let job = wait_terminal(&pipeline, id).await;
    assert_eq!(job.status, JobStatus::Complete);

    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert!(pipeline.registry().get(id).is_none());
}

#[tokio::test]
async fn progress_only_moves_forward() {
    let base = TempDir::new().unwrap();
    let stub = StubTool::new(&[-20.0, -13.0, -9.2]);
    let pipeline = build_pipeline(test_config(base.path()), stub);

    let id = pipeline
        .submit("upload.wav", b"RIFFdata", None)
        .await
        .unwrap();

    let mut last = 0u8;
    for _ in 0..500 {
        if let Some(job) = pipeline.registry().get(id) {
            assert!(job.progress_percent >= last, "progress went backwards");
            last = job.progress_percent;
            if job.status.is_terminal() {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(last, 100);
}
