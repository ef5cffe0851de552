use std::collections::HashMap;

use tracing::debug;

use crate::chain::Stage;

#[derive(Debug, Clone, Copy)]
pub struct EqBand {
    pub freq: f64,
    pub gain: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct MidBand {
    pub freq: f64,
    pub gain: f64,
    pub q: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct CompressorSettings {
    pub threshold_db: f64,
    pub ratio: f64,
    pub attack_ms: f64,
    pub release_ms: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct LimiterSettings {
    pub ceiling_db: f64,
    pub attack_ms: f64,
    pub release_ms: f64,
}

#[derive(Debug, Clone)]
pub struct ParametricPreset {
    pub target_lufs: f64,
    pub true_peak_db: f64,
    pub bass: EqBand,
    pub mid: MidBand,
    pub high: EqBand,
    pub compressor: CompressorSettings,
    pub limiter: LimiterSettings,
}

/// A preset whose stage list is declared literally instead of being derived
/// from EQ/compressor fields. Target loudness and ceiling still apply for
/// verification and fine-tuning.
#[derive(Debug, Clone)]
pub struct FixedChainPreset {
    pub target_lufs: f64,
    pub true_peak_db: f64,
    pub limiter: LimiterSettings,
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone)]
pub enum Preset {
    Parametric(ParametricPreset),
    FixedChain(FixedChainPreset),
}

impl Preset {
    pub fn target_lufs(&self) -> f64 {
        match self {
            Preset::Parametric(preset) => preset.target_lufs,
            Preset::FixedChain(preset) => preset.target_lufs,
        }
    }

    pub fn true_peak_db(&self) -> f64 {
        match self {
            Preset::Parametric(preset) => preset.true_peak_db,
            Preset::FixedChain(preset) => preset.true_peak_db,
        }
    }

    pub fn limiter(&self) -> &LimiterSettings {
        match self {
            Preset::Parametric(preset) => &preset.limiter,
            Preset::FixedChain(preset) => &preset.limiter,
        }
    }
}

/// Static table of named mastering presets, loaded once at startup and
/// shared immutably.
#[derive(Debug)]
pub struct PresetCatalog {
    presets: HashMap<String, Preset>,
    default_name: String,
}

impl PresetCatalog {
    pub fn builtin(default_name: &str) -> Self {
        let mut presets = HashMap::new();
        presets.insert(
            "kidandali".to_string(),
            parametric(
                -9.0,
                -0.6,
                EqBand { freq: 90.0, gain: 4.0 },
                MidBand { freq: 900.0, gain: -2.0, q: 1.2 },
                EqBand { freq: 7500.0, gain: 3.0 },
            ),
        );
        presets.insert(
            "afrobeat".to_string(),
            parametric(
                -8.5,
                -0.5,
                EqBand { freq: 100.0, gain: 5.0 },
                MidBand { freq: 1200.0, gain: -1.5, q: 1.0 },
                EqBand { freq: 8000.0, gain: 2.5 },
            ),
        );
        presets.insert(
            "gospel".to_string(),
            parametric(
                -10.0,
                -1.0,
                EqBand { freq: 80.0, gain: 2.5 },
                MidBand { freq: 1000.0, gain: 1.0, q: 0.9 },
                EqBand { freq: 6500.0, gain: 2.0 },
            ),
        );
        presets.insert(
            "hiphop".to_string(),
            parametric(
                -8.0,
                -0.4,
                EqBand { freq: 60.0, gain: 6.0 },
                MidBand { freq: 800.0, gain: -3.0, q: 1.4 },
                EqBand { freq: 9000.0, gain: 2.0 },
            ),
        );
        presets.insert(
            "acoustic".to_string(),
            parametric(
                -12.0,
                -1.5,
                EqBand { freq: 110.0, gain: 1.5 },
                MidBand { freq: 1500.0, gain: 0.0, q: 0.8 },
                EqBand { freq: 7000.0, gain: 1.5 },
            ),
        );
        presets.insert(
            "restore".to_string(),
            Preset::FixedChain(FixedChainPreset {
                target_lufs: -11.0,
                true_peak_db: -1.0,
                limiter: LimiterSettings {
                    ceiling_db: -1.0,
                    attack_ms: 5.0,
                    release_ms: 80.0,
                },
                stages: vec![
                    Stage::new("highpass").with("f", 35),
                    Stage::new("lowpass").with("f", 17000),
                    Stage::new("afftdn").with("nr", 12).with("nf", -30),
                    Stage::new("dynaudnorm").with("f", 250).with("g", 15),
                ],
            }),
        );
        Self {
            presets,
            default_name: default_name.to_string(),
        }
    }

    /// Looks up a preset by name, silently degrading to the default preset
    /// for unknown names. Leniency is deliberate: a bad preset name never
    /// rejects a job.
    pub fn lookup(&self, name: &str) -> (&str, &Preset) {
        if let Some((key, preset)) = self.presets.get_key_value(name) {
            return (key.as_str(), preset);
        }
        debug!(requested = name, fallback = %self.default_name, "unknown preset, using default");
        let (key, preset) = self
            .presets
            .get_key_value(self.default_name.as_str())
            .unwrap_or_else(|| {
                // Builtin catalogs always contain their default name.
                self.presets.iter().next().map(|(k, v)| (k, v)).unwrap()
            });
        (key.as_str(), preset)
    }

    pub fn names(&self) -> Vec<&str> {
        self.presets.keys().map(String::as_str).collect()
    }
}

fn parametric(
    target_lufs: f64,
    true_peak_db: f64,
    bass: EqBand,
    mid: MidBand,
    high: EqBand,
) -> Preset {
    Preset::Parametric(ParametricPreset {
        target_lufs,
        true_peak_db,
        bass,
        mid,
        high,
        compressor: CompressorSettings {
            threshold_db: -18.0,
            ratio: 3.0,
            attack_ms: 20.0,
            release_ms: 250.0,
        },
        limiter: LimiterSettings {
            ceiling_db: true_peak_db,
            attack_ms: 5.0,
            release_ms: 50.0,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_preset_by_name() {
        let catalog = PresetCatalog::builtin("kidandali");
        let (name, preset) = catalog.lookup("restore");
        assert_eq!(name, "restore");
        assert!(matches!(preset, Preset::FixedChain(_)));
    }

    #[test]
    fn unknown_preset_always_resolves_to_the_same_default() {
        let catalog = PresetCatalog::builtin("kidandali");
        let (first, preset) = catalog.lookup("definitely-not-a-preset");
        assert_eq!(first, "kidandali");
        assert_eq!(preset.target_lufs(), -9.0);
        let (second, _) = catalog.lookup("another-unknown");
        assert_eq!(first, second);
    }

    #[test]
    fn catalog_carries_all_builtin_styles() {
        let catalog = PresetCatalog::builtin("kidandali");
        let mut names = catalog.names();
        names.sort();
        assert_eq!(
            names,
            vec!["acoustic", "afrobeat", "gospel", "hiphop", "kidandali", "restore"]
        );
    }
}
