mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::AudioAnalyzer;
use crate::chain::build_chain;
use crate::config::MastroConfig;
use crate::job::{JobRegistry, JobResult, JobStatus};
use crate::preset::PresetCatalog;
use crate::render::Renderer;
use crate::splice::{resolve_tag_asset, VoiceTagSplicer};
use crate::tool::ToolExecutor;

pub use error::{PipelineError, PipelineResult};

/// Drives mastering jobs from submission to terminal state. One background
/// task per job; stages within a job are strictly sequential because each
/// stage consumes its predecessor's output file.
#[derive(Clone)]
pub struct MasteringPipeline {
    config: Arc<MastroConfig>,
    catalog: Arc<PresetCatalog>,
    analyzer: AudioAnalyzer,
    renderer: Renderer,
    registry: JobRegistry,
}

impl MasteringPipeline {
    pub fn new(config: MastroConfig) -> PipelineResult<Self> {
        let config = Arc::new(config);
        for dir in [config.work_dir(), config.output_dir()] {
            std::fs::create_dir_all(&dir).map_err(|source| PipelineError::Io {
                source,
                path: dir.clone(),
            })?;
        }
        let analyzer = AudioAnalyzer::new(&config.tools.ffmpeg, config.tool_timeout());
        let renderer = Renderer::new(
            &config.tools.ffmpeg,
            &config.tools.ffprobe,
            config.tool_timeout(),
        );
        let catalog = Arc::new(PresetCatalog::builtin(&config.mastering.default_preset));
        Ok(Self {
            config,
            catalog,
            analyzer,
            renderer,
            registry: JobRegistry::new(),
        })
    }

    pub fn with_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.analyzer = self.analyzer.with_executor(Arc::clone(&executor));
        self.renderer = self.renderer.with_executor(executor);
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &PresetCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &MastroConfig {
        &self.config
    }

    /// Stages the uploaded payload, creates the job record and hands off to
    /// a background task. Returns the job id immediately.
    pub async fn submit(
        &self,
        file_name: &str,
        payload: &[u8],
        preset: Option<&str>,
    ) -> PipelineResult<Uuid> {
        if payload.is_empty() {
            return Err(PipelineError::Validation("empty audio payload".to_string()));
        }
        let job = self.registry.create();
        let staging = self.config.work_dir().join(job.id.to_string());
        let input = match self.stage_payload(file_name, payload, &staging).await {
            Ok(input) => input,
            // No pipeline task ever runs for a job that failed to stage,
            // so nothing else would reclaim the record.
            Err(err) => {
                self.registry.remove(job.id);
                return Err(err);
            }
        };
        let preset_name = preset
            .unwrap_or(&self.config.mastering.default_preset)
            .to_string();

        self.registry.update(job.id, |job| {
            job.status = JobStatus::Processing;
            job.message = "mastering started".to_string();
        });
        let pipeline = self.clone();
        let id = job.id;
        tokio::spawn(async move {
            pipeline.drive(id, input, staging, preset_name).await;
        });
        Ok(id)
    }

    /// Writes the uploaded payload into a fresh staging directory and
    /// returns the staged input path.
    async fn stage_payload(
        &self,
        file_name: &str,
        payload: &[u8],
        staging: &Path,
    ) -> PipelineResult<PathBuf> {
        fs::create_dir_all(staging)
            .await
            .map_err(|source| PipelineError::Io {
                source,
                path: staging.to_path_buf(),
            })?;
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("wav");
        let input = staging.join(format!("input.{extension}"));
        fs::write(&input, payload)
            .await
            .map_err(|source| PipelineError::Io {
                source,
                path: input.clone(),
            })?;
        Ok(input)
    }

    async fn drive(&self, id: Uuid, input: PathBuf, staging: PathBuf, preset_name: String) {
        let deadline = self.config.job_deadline();
        let outcome = match timeout(deadline, self.run(id, &input, &staging, &preset_name)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Deadline(deadline)),
        };
        match outcome {
            Ok(result) => {
                info!(job = %id, preset = %result.preset, gain_db = result.gain_db, "mastering complete");
                self.registry.update(id, |job| {
                    job.status = JobStatus::Complete;
                    job.progress_percent = 100;
                    job.stage = "done".to_string();
                    job.message = "mastering complete".to_string();
                    job.completed_at = Some(chrono::Utc::now());
                    job.result = Some(result);
                });
            }
            Err(err) => {
                warn!(job = %id, error = %err, "mastering job failed");
                self.registry.update(id, |job| {
                    job.status = JobStatus::Failed;
                    job.message = err.to_string();
                    job.completed_at = Some(chrono::Utc::now());
                });
                self.discard_partial_outputs(id).await;
            }
        }

        if let Err(err) = fs::remove_dir_all(&staging).await {
            warn!(path = %staging.display(), error = %err, "failed to clean job staging directory");
        }

        let registry = self.registry.clone();
        let retention = self.config.retention();
        tokio::spawn(async move {
            sleep(retention).await;
            registry.remove(id);
        });
    }

    async fn run(
        &self,
        id: Uuid,
        input: &Path,
        staging: &Path,
        preset_name: &str,
    ) -> PipelineResult<JobResult> {
        self.progress(id, 10, "analyze", "measuring input loudness");
        let input_analysis = self.analyzer.analyze(input).await?;

        let (applied_name, preset) = self.catalog.lookup(preset_name);
        let applied_name = applied_name.to_string();
        self.progress(id, 20, "chain", &format!("building {applied_name} chain"));
        let (chain, gain_db) = build_chain(preset, &input_analysis);

        let master_path = self
            .config
            .output_dir()
            .join(format!("{id}_master.wav"));
        self.progress(
            id,
            45,
            "render",
            &format!("rendering {} stages", chain.len()),
        );
        self.renderer.render(input, &chain, &master_path).await?;

        self.progress(id, 60, "verify", "verifying output loudness");
        let mut output_analysis = self.analyzer.analyze(&master_path).await?;

        let target = preset.target_lufs();
        let tolerance = self.config.mastering.loudness_tolerance_lu;
        if (output_analysis.integrated_lufs - target).abs() > tolerance {
            self.progress(
                id,
                75,
                "fine-tune",
                &format!(
                    "output at {:.1} LUFS, correcting towards {target:.1} LUFS",
                    output_analysis.integrated_lufs
                ),
            );
            // Single corrective pass. The previous render moves aside in the
            // same directory, becomes the normalization source, and is
            // discarded afterwards. A second miss still ships.
            let aside = self.config.output_dir().join(format!("{id}_pre_tune.wav"));
            fs::rename(&master_path, &aside)
                .await
                .map_err(|source| PipelineError::Io {
                    source,
                    path: aside.clone(),
                })?;
            let tuned = self
                .renderer
                .normalize(
                    &aside,
                    target,
                    preset.true_peak_db(),
                    self.config.mastering.fine_tune_lra,
                    &master_path,
                )
                .await;
            if let Err(err) = fs::remove_file(&aside).await {
                warn!(path = %aside.display(), error = %err, "failed to remove pre-tune copy");
            }
            tuned?;
            output_analysis = self.analyzer.analyze(&master_path).await?;
        } else {
            self.progress(id, 75, "fine-tune", "output within tolerance");
        }

        let mut voice_tag_added = false;
        match resolve_tag_asset(&self.config) {
            Some(tag) => {
                self.progress(id, 85, "voice-tag", "splicing voice tag");
                let splicer = VoiceTagSplicer::new(
                    self.renderer.clone(),
                    self.config.mastering.voice_tag_gain_db,
                );
                match splicer.splice(&master_path, &tag, staging).await {
                    Ok(()) => voice_tag_added = true,
                    // A failed tag insertion never fails the job; the
                    // master simply ships untagged.
                    Err(err) => {
                        warn!(job = %id, error = %err, "voice tag splice failed, shipping without tag")
                    }
                }
            }
            None => {
                debug!(job = %id, "no voice tag asset configured");
                self.progress(id, 85, "voice-tag", "no voice tag configured");
            }
        }

        self.progress(id, 95, "mp3", "encoding distribution copy");
        let mp3_path = self.config.output_dir().join(format!("{id}.mp3"));
        self.renderer
            .encode_mp3(&master_path, &mp3_path, &self.config.mastering.mp3_bitrate)
            .await?;

        let prefix = self.config.server.public_prefix.trim_end_matches('/');
        Ok(JobResult {
            input: input_analysis,
            output: output_analysis,
            gain_db,
            voice_tag_added,
            preset: applied_name,
            master_file: format!("{prefix}/{id}_master.wav"),
            distribution_file: format!("{prefix}/{id}.mp3"),
        })
    }

    /// Removes whatever output files a failed job managed to produce.
    async fn discard_partial_outputs(&self, id: Uuid) {
        let output_dir = self.config.output_dir();
        for name in [
            format!("{id}_master.wav"),
            format!("{id}_pre_tune.wav"),
            format!("{id}.mp3"),
        ] {
            let path = output_dir.join(name);
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to remove partial output")
                }
            }
        }
    }

    fn progress(&self, id: Uuid, percent: u8, stage: &str, message: &str) {
        self.registry.update(id, |job| {
            // Progress only ever moves forward.
            job.progress_percent = job.progress_percent.max(percent);
            job.stage = stage.to_string();
            job.message = message.to_string();
        });
    }
}
