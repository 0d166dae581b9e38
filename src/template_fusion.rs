//! Fusión de la plantilla personalizada con la curva normativa y
//! puntuación de normalidad de un ciclo.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::gait_database::GaitDatabase;
use crate::signal;

/// Escala mínima (grados) para normalizar el RMSE
pub const NORMALITY_SCALE_FLOOR_DEG: f32 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionParams {
    /// Asíntota del peso de la plantilla personalizada (1 = puede sustituir
    /// por completo a la normativa)
    pub w_patient_max: f32,
    /// Entradas para alcanzar ~63 % del peso máximo
    pub saturation_entries: f32,
    /// Por debajo de esto solo se usa la curva normativa
    pub min_entries: usize,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            w_patient_max: 1.0,
            saturation_entries: 10.0,
            min_entries: 3,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("normative template is empty")]
    EmptyNormative,

    #[error("normative template has a non-finite value at index {0}")]
    NonFiniteNormative(usize),

    #[error("invalid fusion parameter: {0}")]
    InvalidParams(String),
}

/// Plantilla objetivo: w_patient + w_norm == 1
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedTemplate {
    pub vector: Vec<f32>,
    pub w_patient: f32,
    pub w_norm: f32,
    /// Entradas retenidas en la base de datos al fusionar
    pub entries: usize,
}

impl FusedTemplate {
    fn normative_only(normative: &[f32]) -> Self {
        Self {
            vector: normative.to_vec(),
            w_patient: 0.0,
            w_norm: 1.0,
            entries: 0,
        }
    }
}

pub struct TemplateFusion {
    normative: Vec<f32>,
    params: FusionParams,
    fused: FusedTemplate,
}

impl TemplateFusion {
    /// `normative` se remuestrea a `len` si hace falta
    pub fn new(normative: &[f32], params: FusionParams, len: usize) -> Result<Self, FusionError> {
        if normative.is_empty() || len == 0 {
            return Err(FusionError::EmptyNormative);
        }
        if let Some(i) = normative.iter().position(|v| !v.is_finite()) {
            return Err(FusionError::NonFiniteNormative(i));
        }
        if !(0.0..=1.0).contains(&params.w_patient_max) {
            return Err(FusionError::InvalidParams(format!(
                "w_patient_max={} fuera de [0, 1]",
                params.w_patient_max
            )));
        }
        if params.saturation_entries <= 0.0 || !params.saturation_entries.is_finite() {
            return Err(FusionError::InvalidParams(format!(
                "saturation_entries={} debe ser positivo",
                params.saturation_entries
            )));
        }

        let normative = signal::resample_uniform(normative, len);
        let fused = FusedTemplate::normative_only(&normative);
        Ok(Self {
            normative,
            params,
            fused,
        })
    }

    /// Peso de la plantilla personalizada para n entradas y una confianza dada
    pub fn patient_weight(&self, entries: usize, confidence: f32) -> f32 {
        if entries < self.params.min_entries.max(1) {
            return 0.0;
        }
        let saturation = 1.0 - (-(entries as f32) / self.params.saturation_entries).exp();
        (self.params.w_patient_max * saturation * confidence.clamp(0.0, 1.0)).clamp(0.0, 1.0)
    }

    /// Recalcula la plantilla fusionada con el estado actual de la base de datos
    pub fn update(&mut self, db: &GaitDatabase) -> &FusedTemplate {
        let personal = db.current_template();
        if personal.is_empty() {
            self.fused = FusedTemplate::normative_only(&self.normative);
            return &self.fused;
        }

        let patient = signal::resample_uniform(&personal.vector, self.normative.len());
        let w_patient = self.patient_weight(personal.entries, db.confidence());
        let w_norm = 1.0 - w_patient;
        let vector = patient
            .iter()
            .zip(&self.normative)
            .map(|(p, n)| w_patient * p + w_norm * n)
            .collect();

        debug!(w_patient, entries = personal.entries, "plantilla fusionada");
        self.fused = FusedTemplate {
            vector,
            w_patient,
            w_norm,
            entries: personal.entries,
        };
        &self.fused
    }

    pub fn fused_template(&self) -> &FusedTemplate {
        &self.fused
    }

    pub fn normative(&self) -> &[f32] {
        &self.normative
    }

    pub fn params(&self) -> &FusionParams {
        &self.params
    }
}

/// Normalidad de un ciclo frente a una plantilla objetivo, en [0, 1].
/// 1.0 para vectores idénticos; no crece al aumentar la distancia.
pub fn gait_normality(cycle: &[f32], target: &[f32]) -> f32 {
    if target.is_empty() {
        return 0.0;
    }
    let resampled;
    let cycle = if cycle.len() == target.len() {
        cycle
    } else {
        resampled = signal::resample_uniform(cycle, target.len());
        &resampled
    };
    let scale = signal::range(target).max(NORMALITY_SCALE_FLOOR_DEG);
    (1.0 - signal::rmse(cycle, target) / scale).clamp(0.0, 1.0)
}
