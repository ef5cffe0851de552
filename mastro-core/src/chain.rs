use std::fmt;

use crate::analysis::AudioAnalysis;
use crate::preset::Preset;

/// Hard safety bounds for the make-up gain computed from the loudness gap.
/// Pathological inputs (near-silent files) would otherwise request runaway
/// gain; the fine-tune pass closes whatever gap the clamp leaves open.
pub const GAIN_MIN_DB: f64 = -6.0;
pub const GAIN_MAX_DB: f64 = 12.0;

/// Gain below this magnitude is not worth a dedicated stage.
pub const GAIN_EPSILON_DB: f64 = 0.5;

/// Material quieter than this is left uncompressed.
pub const COMPRESSION_FLOOR_LUFS: f64 = -20.0;

/// One DSP stage: a filter name plus ordered numeric parameters. Stages
/// serialize themselves into the tool's filter syntax so no free-form
/// command string is ever interpolated.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    name: String,
    params: Vec<(String, String)>,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn to_filter(&self) -> String {
        if self.params.is_empty() {
            return self.name.clone();
        }
        let params = self
            .params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(":");
        format!("{}={}", self.name, params)
    }
}

/// Ordered stage list built fresh per job and consumed once by the renderer.
#[derive(Debug, Clone, Default)]
pub struct ProcessingChain {
    stages: Vec<Stage>,
}

impl ProcessingChain {
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn to_filtergraph(&self) -> String {
        self.stages
            .iter()
            .map(Stage::to_filter)
            .collect::<Vec<_>>()
            .join(",")
    }
}

pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Builds the processing chain for one job from the preset and the input
/// loudness reading. Returns the chain together with the clamped make-up
/// gain that was baked into it.
pub fn build_chain(preset: &Preset, input: &AudioAnalysis) -> (ProcessingChain, f64) {
    let gain_db = (preset.target_lufs() - input.integrated_lufs).clamp(GAIN_MIN_DB, GAIN_MAX_DB);
    let mut stages = Vec::new();

    match preset {
        Preset::Parametric(parametric) => {
            if parametric.bass.gain != 0.0 {
                stages.push(
                    Stage::new("bass")
                        .with("g", parametric.bass.gain)
                        .with("f", parametric.bass.freq),
                );
            }
            if parametric.mid.gain != 0.0 {
                stages.push(
                    Stage::new("equalizer")
                        .with("f", parametric.mid.freq)
                        .with("t", "q")
                        .with("w", parametric.mid.q)
                        .with("g", parametric.mid.gain),
                );
            }
            if parametric.high.gain != 0.0 {
                stages.push(
                    Stage::new("treble")
                        .with("g", parametric.high.gain)
                        .with("f", parametric.high.freq),
                );
            }
            if input.integrated_lufs > COMPRESSION_FLOOR_LUFS {
                let compressor = &parametric.compressor;
                stages.push(
                    Stage::new("acompressor")
                        .with("threshold", format!("{:.6}", db_to_linear(compressor.threshold_db)))
                        .with("ratio", compressor.ratio)
                        .with("attack", compressor.attack_ms)
                        .with("release", compressor.release_ms),
                );
            }
        }
        Preset::FixedChain(fixed) => {
            stages.extend(fixed.stages.iter().cloned());
        }
    }

    if gain_db.abs() > GAIN_EPSILON_DB {
        stages.push(Stage::new("volume").with("volume", format!("{gain_db:.2}dB")));
    }

    let limiter = preset.limiter();
    stages.push(
        Stage::new("alimiter")
            .with("limit", format!("{:.6}", db_to_linear(limiter.ceiling_db)))
            .with("attack", limiter.attack_ms)
            .with("release", limiter.release_ms),
    );

    (ProcessingChain { stages }, gain_db)
}
