use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cycle_segmenter::SegmenterConfig;
use crate::gait_database::DatabaseConfig;
use crate::phase_filter::PhaseFilterConfig;
use crate::template_fusion::FusionParams;
use crate::vibro_controller::VibroControllerConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid [{section}] setting: {reason}")]
    Invalid { section: &'static str, reason: String },
}

/// Configuración completa del pipeline; todo campo tiene valor por defecto
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub filter: PhaseFilterConfig,
    pub segmenter: SegmenterConfig,
    pub database: DatabaseConfig,
    pub fusion: FusionParams,
    pub controller: VibroControllerConfig,
    /// Curva normativa propia; si falta se usa la curva por defecto
    pub normative_template: Option<Vec<f32>>,
    /// Muestras inválidas seguidas que cancelan el ciclo pendiente
    pub max_invalid_run: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filter: PhaseFilterConfig::default(),
            segmenter: SegmenterConfig::default(),
            database: DatabaseConfig::default(),
            fusion: FusionParams::default(),
            controller: VibroControllerConfig::default(),
            normative_template: None,
            max_invalid_run: 5,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Longitud del vector de ciclo compartida por todo el sistema
    pub fn resample_len(&self) -> usize {
        self.segmenter.resample_len
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |section: &'static str, reason: String| ConfigError::Invalid { section, reason };

        let f = &self.filter;
        if f.variance_window < 2 {
            return Err(invalid("filter", "variance_window debe ser >= 2".into()));
        }
        if f.variance_threshold <= 0.0 {
            return Err(invalid("filter", "variance_threshold debe ser positivo".into()));
        }
        if f.forward_axis == f.vertical_axis {
            return Err(invalid("filter", "forward_axis y vertical_axis coinciden".into()));
        }
        for (name, w) in [
            ("static_accel_weight", f.static_accel_weight),
            ("dynamic_accel_weight", f.dynamic_accel_weight),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(invalid("filter", format!("{} fuera de [0, 1]", name)));
            }
        }
        if f.phase_debounce == 0 || f.motion_hysteresis == 0 || f.trend_window == 0 {
            return Err(invalid("filter", "contadores de histéresis deben ser >= 1".into()));
        }

        let s = &self.segmenter;
        if s.resample_len < 2 {
            return Err(invalid("segmenter", "resample_len debe ser >= 2".into()));
        }
        if s.min_cycle_s <= 0.0 || s.min_cycle_s >= s.max_cycle_s {
            return Err(invalid("segmenter", "se requiere 0 < min_cycle_s < max_cycle_s".into()));
        }
        if s.abort_after_s < s.max_cycle_s {
            return Err(invalid("segmenter", "abort_after_s menor que max_cycle_s".into()));
        }

        let d = &self.database;
        if d.resample_len != s.resample_len {
            return Err(invalid(
                "database",
                format!(
                    "resample_len {} distinto del segmentador ({})",
                    d.resample_len, s.resample_len
                ),
            ));
        }
        if d.max_entries == 0 || d.min_samples == 0 {
            return Err(invalid("database", "max_entries y min_samples deben ser >= 1".into()));
        }
        // Fuera del arranque deben caber min_samples vecinos, y el arranque debe terminar
        if d.min_samples > d.bootstrap_entries || d.bootstrap_entries > d.max_entries {
            return Err(invalid(
                "database",
                format!(
                    "se requiere min_samples ({}) <= bootstrap_entries ({}) <= max_entries ({})",
                    d.min_samples, d.bootstrap_entries, d.max_entries
                ),
            ));
        }
        if !(0.0..=100.0).contains(&d.epsilon_percentile) {
            return Err(invalid("database", "epsilon_percentile fuera de [0, 100]".into()));
        }
        if d.decay_rate < 0.0 || !(0.0..=1.0).contains(&d.density_weight) {
            return Err(invalid("database", "decay_rate o density_weight inválidos".into()));
        }

        let p = &self.fusion;
        if !(0.0..=1.0).contains(&p.w_patient_max) || p.saturation_entries <= 0.0 {
            return Err(invalid("fusion", "w_patient_max o saturation_entries inválidos".into()));
        }

        self.controller
            .validate()
            .map_err(|reason| invalid("controller", reason))?;

        if let Some(curve) = &self.normative_template {
            if curve.len() < 2 || curve.iter().any(|v| !v.is_finite()) {
                return Err(invalid("normative_template", "curva vacía o no finita".into()));
            }
        }

        Ok(())
    }
}
