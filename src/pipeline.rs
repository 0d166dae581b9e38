//! Pipeline completo: filtro → controlador por muestra, y segmentador →
//! base de datos → fusión → normalidad por ciclo.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, PipelineConfig};
use crate::cycle_segmenter::{CycleError, CycleSegmenter, SegmentEvent};
use crate::gait_database::GaitDatabase;
use crate::normative;
use crate::phase_filter::PhaseFilter;
use crate::snapshot::{SnapshotCell, TemplateSnapshot};
use crate::template_fusion::{gait_normality, FusionError, TemplateFusion};
use crate::types::{AngleEstimate, Decision, GaitPhase, SensorSample, VibrationCommand};
use crate::vibro_controller::VibroController;

/// Cada cuántas publicaciones se registra un resumen
const SNAPSHOT_LOG_EVERY: u64 = 10;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fusion(#[from] FusionError),
}

/// Resultado de un ciclo que terminó en esta muestra
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Resolved {
        id: u64,
        duration_s: f64,
        decision: Decision,
        normality: f32,
    },
    Discarded(CycleError),
}

#[derive(Debug, Clone)]
pub struct StepOutput {
    pub estimate: AngleEstimate,
    pub commands: Vec<VibrationCommand>,
    pub cycle: Option<CycleOutcome>,
}

/// Resumen de solo lectura para el exterior
#[derive(Debug, Clone, Serialize)]
pub struct GaitReport {
    pub timestamp_s: f64,
    pub phase: GaitPhase,
    pub angle_deg: f32,
    pub last_normality: Option<f32>,
    pub confidence: f32,
    pub reliability: f32,
    pub entries: usize,
    pub w_patient: f32,
    pub accepted: u64,
    pub rejected: u64,
    pub discarded: u64,
    pub invalid_samples: u64,
    pub triggers: u64,
    pub snapshot_version: u64,
}

pub struct GaitPipeline {
    config: PipelineConfig,
    filter: PhaseFilter,
    segmenter: CycleSegmenter,
    database: GaitDatabase,
    fusion: TemplateFusion,
    controller: VibroController,
    snapshot: Arc<SnapshotCell<TemplateSnapshot>>,
    last_estimate: Option<AngleEstimate>,
    last_normality: Option<f32>,
    invalid_run: usize,
    version: u64,
}

impl GaitPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let len = config.resample_len();
        let normative = match &config.normative_template {
            Some(curve) => normative::fit_to_length(curve, len),
            None => normative::default_thigh_curve(len),
        };
        let fusion = TemplateFusion::new(&normative, config.fusion.clone(), len)?;
        let snapshot = Arc::new(SnapshotCell::new(TemplateSnapshot::initial(
            fusion.fused_template().clone(),
        )));

        Ok(Self {
            filter: PhaseFilter::new(config.filter.clone()),
            segmenter: CycleSegmenter::new(config.segmenter.clone()),
            database: GaitDatabase::new(config.database.clone()),
            controller: VibroController::new(config.controller.clone()),
            fusion,
            snapshot,
            last_estimate: None,
            last_normality: None,
            invalid_run: 0,
            version: 0,
            config,
        })
    }

    /// Procesa una muestra en orden fijo: filtro, controlador, segmentador
    pub fn process(&mut self, sample: &SensorSample) -> StepOutput {
        let estimate = self.filter.step(sample);
        self.last_estimate = Some(estimate);

        if !estimate.is_valid() {
            self.invalid_run += 1;
            let cycle = if self.invalid_run == self.config.max_invalid_run.max(1) {
                warn!(run = self.invalid_run, "racha de muestras inválidas");
                self.segmenter
                    .abort("invalid sample run")
                    .and_then(|event| self.handle_event(event))
            } else {
                None
            };
            return StepOutput {
                estimate,
                commands: Vec::new(),
                cycle,
            };
        }
        self.invalid_run = 0;

        let commands = self
            .controller
            .on_sample(estimate.angle_deg, estimate.phase, estimate.timestamp_s);

        let cycle = self
            .segmenter
            .push(&estimate)
            .and_then(|event| self.handle_event(event));

        StepOutput {
            estimate,
            commands,
            cycle,
        }
    }

    fn handle_event(&mut self, event: SegmentEvent) -> Option<CycleOutcome> {
        match event {
            SegmentEvent::Discarded(error) => Some(CycleOutcome::Discarded(error)),
            SegmentEvent::Completed(mut cycle) => {
                let decision = self.database.submit(&mut cycle);
                let fused = self.fusion.update(&self.database);
                let normality = gait_normality(&cycle.resampled, &fused.vector);
                self.last_normality = Some(normality);
                self.controller.set_normality(Some(normality));
                self.publish(normality);

                debug!(
                    id = cycle.id,
                    duration_s = cycle.duration_s(),
                    ?decision,
                    normality,
                    "ciclo resuelto"
                );
                Some(CycleOutcome::Resolved {
                    id: cycle.id,
                    duration_s: cycle.duration_s(),
                    decision,
                    normality,
                })
            }
        }
    }

    fn publish(&mut self, normality: f32) {
        self.version += 1;
        let snapshot = TemplateSnapshot {
            version: self.version,
            fused: self.fusion.fused_template().clone(),
            last_normality: Some(normality),
            confidence: self.database.confidence(),
        };
        if self.version % SNAPSHOT_LOG_EVERY == 0 {
            info!(
                version = self.version,
                entries = snapshot.fused.entries,
                w_patient = snapshot.fused.w_patient,
                confidence = snapshot.confidence,
                normality,
                "plantilla publicada"
            );
        }
        self.snapshot.store(snapshot);
    }

    /// Fin del flujo: el ciclo pendiente se descarta
    pub fn finish(&mut self) -> Option<CycleOutcome> {
        self.segmenter
            .abort("end of stream")
            .and_then(|event| self.handle_event(event))
    }

    /// Handle compartible con otros hilos
    pub fn snapshot_handle(&self) -> Arc<SnapshotCell<TemplateSnapshot>> {
        Arc::clone(&self.snapshot)
    }

    pub fn report(&self) -> GaitReport {
        let fused = self.fusion.fused_template();
        let (timestamp_s, phase, angle_deg) = match &self.last_estimate {
            Some(e) => (e.timestamp_s, e.phase, e.angle_deg),
            None => (0.0, self.filter.phase(), self.filter.angle_deg()),
        };
        GaitReport {
            timestamp_s,
            phase,
            angle_deg,
            last_normality: self.last_normality,
            confidence: self.database.confidence(),
            reliability: self.database.reliability_index(),
            entries: self.database.len(),
            w_patient: fused.w_patient,
            accepted: self.database.accepted_count(),
            rejected: self.database.rejected_count(),
            discarded: self.segmenter.discarded_count(),
            invalid_samples: self.filter.invalid_count(),
            triggers: self.controller.trigger_count(),
            snapshot_version: self.version,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn database(&self) -> &GaitDatabase {
        &self.database
    }

    pub fn fusion(&self) -> &TemplateFusion {
        &self.fusion
    }

    pub fn controller(&self) -> &VibroController {
        &self.controller
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal;
    use crate::synthetic::{GaitProfile, SyntheticGait};
    use crate::types::CueMode;

    struct Run {
        outcomes: Vec<CycleOutcome>,
        commands: Vec<VibrationCommand>,
    }

    fn run(pipeline: &mut GaitPipeline, samples: impl IntoIterator<Item = SensorSample>) -> Run {
        let mut outcomes = Vec::new();
        let mut commands = Vec::new();
        for sample in samples {
            let out = pipeline.process(&sample);
            commands.extend(out.commands);
            outcomes.extend(out.cycle);
        }
        Run { outcomes, commands }
    }

    fn resolved(outcomes: &[CycleOutcome]) -> Vec<(Decision, f32)> {
        outcomes
            .iter()
            .filter_map(|o| match o {
                CycleOutcome::Resolved {
                    decision, normality, ..
                } => Some((*decision, *normality)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn synthetic_walk_end_to_end() {
        let mut pipeline = GaitPipeline::new(PipelineConfig::default()).unwrap();
        let snapshots = pipeline.snapshot_handle();
        let mut gait = SyntheticGait::new(GaitProfile::default(), 7);
        let result = run(&mut pipeline, gait.take_secs(40.0));

        let cycles = resolved(&result.outcomes);
        assert!(cycles.len() >= 30, "ciclos={}", cycles.len());
        let accepted = cycles.iter().filter(|(d, _)| *d == Decision::Accepted).count();
        assert!(accepted * 10 >= cycles.len() * 8, "aceptados={}", accepted);
        assert!(cycles.iter().all(|(_, n)| (0.0..=1.0).contains(n)));

        // Un lote SpaVib por ciclo
        let report = pipeline.report();
        assert_eq!(result.commands.len() as u64, 4 * report.triggers);
        assert!(report.triggers as usize >= cycles.len());
        assert!(report.triggers as usize <= cycles.len() + 3);
        assert!(result.commands.iter().all(|c| c.mode == CueMode::SpaVib));

        let snap = snapshots.load();
        assert_eq!(snap.version, cycles.len() as u64);
        assert!(snap.fused.w_patient > 0.5);
        assert!((snap.fused.w_patient + snap.fused.w_norm - 1.0).abs() < 1e-6);
        assert!(report.last_normality.unwrap() > 0.6);
        assert_eq!(report.entries, pipeline.database().len());
    }

    #[test]
    fn reader_thread_sees_published_snapshot() {
        let mut pipeline = GaitPipeline::new(PipelineConfig::default()).unwrap();
        let handle = pipeline.snapshot_handle();
        let mut gait = SyntheticGait::new(GaitProfile::default(), 11);

        let initial = std::thread::spawn({
            let handle = Arc::clone(&handle);
            move || handle.load().version
        })
        .join()
        .unwrap();
        assert_eq!(initial, 0);

        run(&mut pipeline, gait.take_secs(10.0));
        let report = pipeline.report();
        let seen = std::thread::spawn(move || handle.load())
            .join()
            .unwrap();
        assert!(seen.version > 0);
        assert_eq!(seen.version, report.snapshot_version);
        assert_eq!(seen.last_normality, report.last_normality);
    }

    #[test]
    fn pathological_cycles_do_not_move_template() {
        let mut pipeline = GaitPipeline::new(PipelineConfig::default()).unwrap();
        let mut gait = SyntheticGait::new(GaitProfile::default(), 3);
        run(&mut pipeline, gait.take_secs(30.0));
        let before = pipeline.database().current_template();
        let rejected_before = pipeline.database().rejected_count();

        gait.set_profile(GaitProfile {
            amplitude_deg: 80.0,
            ..GaitProfile::default()
        });
        let result = run(&mut pipeline, gait.take_secs(5.0));

        let cycles = resolved(&result.outcomes);
        assert!(!cycles.is_empty());
        assert!(cycles.iter().all(|(d, _)| *d == Decision::Rejected));
        assert!(pipeline.database().rejected_count() > rejected_before);
        let after = pipeline.database().current_template();
        assert!(signal::rmse(&before.vector, &after.vector) < 1e-6);
        assert!(pipeline.database().confidence() < 1.0);
    }

    #[test]
    fn invalid_run_aborts_pending_cycle() {
        let mut pipeline = GaitPipeline::new(PipelineConfig::default()).unwrap();
        let mut gait = SyntheticGait::new(GaitProfile::default(), 5);
        run(&mut pipeline, gait.take_secs(5.0));

        let mut aborted = Vec::new();
        for i in 0..8 {
            let t = 5.0 + i as f64 * 0.01;
            let out = pipeline.process(&SensorSample::new(t, [f32::NAN, 0.0, 1.0], [0.0; 3]));
            assert!(out.estimate.fault.is_some());
            assert!(out.commands.is_empty());
            aborted.extend(out.cycle);
        }
        assert_eq!(aborted.len(), 1);
        assert!(matches!(
            aborted[0],
            CycleOutcome::Discarded(CycleError::Aborted { .. })
        ));
        assert_eq!(pipeline.report().invalid_samples, 8);
    }

    #[test]
    fn const_mode_ignores_phase() {
        let mut config = PipelineConfig::default();
        config.controller.mode = CueMode::Const;
        let mut pipeline = GaitPipeline::new(config).unwrap();
        let mut gait = SyntheticGait::new(GaitProfile::default(), 9);
        let result = run(&mut pipeline, gait.take_secs(10.0));
        assert_eq!(result.commands.len(), 40);
        assert!(result.commands.iter().all(|c| c.mode == CueMode::Const));
    }

    #[test]
    fn empty_pipeline_reports_normative_only() {
        let pipeline = GaitPipeline::new(PipelineConfig::default()).unwrap();
        let report = pipeline.report();
        assert_eq!(report.w_patient, 0.0);
        assert_eq!(report.entries, 0);
        assert!(report.last_normality.is_none());
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"phase\":\"STANCE\""));
        assert_eq!(pipeline.snapshot_handle().load().version, 0);
    }

    #[test]
    fn custom_normative_is_resampled() {
        let config = PipelineConfig {
            normative_template: Some(vec![0.0, 10.0, 0.0]),
            ..PipelineConfig::default()
        };
        let pipeline = GaitPipeline::new(config).unwrap();
        let normative = pipeline.fusion().normative();
        assert_eq!(normative.len(), 101);
        assert!((normative[50] - 10.0).abs() < 1e-4);
    }
}
