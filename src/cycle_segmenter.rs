use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{AngleEstimate, GaitCycle, PhaseTransition, RESAMPLE_LEN};

/// Parámetros del segmentador de ciclos
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Duración mínima plausible de un ciclo (s)
    pub min_cycle_s: f64,
    /// Duración máxima plausible de un ciclo (s)
    pub max_cycle_s: f64,
    /// Un ciclo pendiente más largo se cancela (la marcha se detuvo)
    pub abort_after_s: f64,
    /// Hueco máximo entre muestras válidas antes de cancelar
    pub max_gap_s: f64,
    /// Puntos del vector remuestreado
    pub resample_len: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_cycle_s: 0.4,
            max_cycle_s: 2.5,
            abort_after_s: 4.0,
            max_gap_s: 0.25,
            resample_len: RESAMPLE_LEN,
        }
    }
}

/// Motivo por el que un ciclo nunca llega a la base de datos
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum CycleError {
    #[error("cycle too short: {duration_s:.3} s < {min_s:.3} s")]
    TooShort { duration_s: f64, min_s: f64 },

    #[error("cycle too long: {duration_s:.3} s > {max_s:.3} s")]
    TooLong { duration_s: f64, max_s: f64 },

    #[error("pending cycle aborted: {reason}")]
    Aborted { reason: &'static str },
}

#[derive(Debug, Clone)]
pub enum SegmentEvent {
    /// Ciclo completo, pendiente de decisión
    Completed(GaitCycle),
    /// Ciclo descartado antes de la base de datos
    Discarded(CycleError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Esperando el primer contacto inicial
    Idle,
    /// Acumulando un ciclo
    Collecting,
}

/// Corta el flujo (ángulo, fase) en ciclos de contacto inicial a contacto inicial
pub struct CycleSegmenter {
    config: SegmenterConfig,
    state: State,
    pending: Vec<AngleEstimate>,
    last_timestamp: Option<f64>,
    next_id: u64,
    completed: u64,
    discarded: u64,
}

impl CycleSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            state: State::Idle,
            pending: Vec::new(),
            last_timestamp: None,
            next_id: 1,
            completed: 0,
            discarded: 0,
        }
    }

    /// Alimenta el segmentador con una estimación válida
    pub fn push(&mut self, estimate: &AngleEstimate) -> Option<SegmentEvent> {
        if !estimate.is_valid() {
            return None;
        }

        let mut event = None;

        if let Some(prev) = self.last_timestamp {
            if estimate.timestamp_s - prev > self.config.max_gap_s && self.state == State::Collecting {
                event = self.discard(CycleError::Aborted {
                    reason: "sensor dropout",
                });
            }
        }
        self.last_timestamp = Some(estimate.timestamp_s);

        match self.state {
            State::Idle => {
                if estimate.transition == Some(PhaseTransition::StanceOnset) {
                    self.start(estimate);
                }
            }

            State::Collecting => {
                self.pending.push(*estimate);

                if estimate.transition == Some(PhaseTransition::StanceOnset) {
                    event = Some(self.close());
                    self.start(estimate);
                } else if self.pending_duration() > self.config.abort_after_s {
                    event = self.discard(CycleError::Aborted {
                        reason: "no stance onset before timeout",
                    });
                }
            }
        }

        event
    }

    /// Cancela el ciclo pendiente (pérdida de sensor, parada)
    pub fn abort(&mut self, reason: &'static str) -> Option<SegmentEvent> {
        if self.state != State::Collecting {
            return None;
        }
        self.discard(CycleError::Aborted { reason })
    }

    fn start(&mut self, estimate: &AngleEstimate) {
        self.pending.clear();
        self.pending.push(*estimate);
        self.state = State::Collecting;
    }

    fn pending_duration(&self) -> f64 {
        match (self.pending.first(), self.pending.last()) {
            (Some(a), Some(b)) => b.timestamp_s - a.timestamp_s,
            _ => 0.0,
        }
    }

    fn close(&mut self) -> SegmentEvent {
        let duration_s = self.pending_duration();
        let estimates = std::mem::take(&mut self.pending);
        self.state = State::Idle;

        if duration_s < self.config.min_cycle_s {
            self.discarded += 1;
            return SegmentEvent::Discarded(CycleError::TooShort {
                duration_s,
                min_s: self.config.min_cycle_s,
            });
        }
        if duration_s > self.config.max_cycle_s {
            self.discarded += 1;
            return SegmentEvent::Discarded(CycleError::TooLong {
                duration_s,
                max_s: self.config.max_cycle_s,
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        self.completed += 1;
        let cycle = GaitCycle::new(id, estimates, self.config.resample_len);
        debug!(id, duration_s, samples = cycle.estimates.len(), "ciclo completo");
        SegmentEvent::Completed(cycle)
    }

    fn discard(&mut self, error: CycleError) -> Option<SegmentEvent> {
        warn!(%error, samples = self.pending.len(), "ciclo pendiente descartado");
        self.pending.clear();
        self.state = State::Idle;
        self.discarded += 1;
        Some(SegmentEvent::Discarded(error))
    }

    pub fn is_collecting(&self) -> bool {
        self.state == State::Collecting
    }

    /// Retorna el estado actual (para depuración)
    pub fn state(&self) -> &str {
        match self.state {
            State::Idle => "IDLE",
            State::Collecting => "COLLECTING",
        }
    }

    pub fn completed_count(&self) -> u64 {
        self.completed
    }

    pub fn discarded_count(&self) -> u64 {
        self.discarded
    }
}

impl Default for CycleSegmenter {
    fn default() -> Self {
        Self::new(SegmenterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CycleStatus, GaitPhase};

    fn est(t: f64, transition: Option<PhaseTransition>) -> AngleEstimate {
        AngleEstimate {
            timestamp_s: t,
            angle_deg: (t * 10.0) as f32,
            phase: GaitPhase::Stance,
            confidence: 0.2,
            transition,
            fault: None,
        }
    }

    /// Alimenta muestras a 100 Hz con contactos iniciales en los tiempos dados
    fn feed(seg: &mut CycleSegmenter, until: f64, onsets: &[f64]) -> Vec<SegmentEvent> {
        let mut events = Vec::new();
        let n = (until * 100.0).round() as usize;
        for i in 0..=n {
            let t = i as f64 * 0.01;
            let is_onset = onsets.iter().any(|o| (o - t).abs() < 1e-6);
            let tr = if is_onset {
                Some(PhaseTransition::StanceOnset)
            } else {
                None
            };
            events.extend(seg.push(&est(t, tr)));
        }
        events
    }

    #[test]
    fn test_idle_until_first_stance_onset() {
        let mut seg = CycleSegmenter::default();
        assert_eq!(seg.state(), "IDLE");
        let events = feed(&mut seg, 0.5, &[]);
        assert!(events.is_empty());
        assert_eq!(seg.state(), "IDLE");
    }

    #[test]
    fn test_cycles_between_stance_onsets() {
        let mut seg = CycleSegmenter::default();
        let events = feed(&mut seg, 3.5, &[0.2, 1.2, 2.3]);
        assert_eq!(events.len(), 2);
        for (ev, expected) in events.iter().zip([1.0, 1.1]) {
            match ev {
                SegmentEvent::Completed(cycle) => {
                    assert!((cycle.duration_s() - expected).abs() < 1e-6);
                    assert_eq!(cycle.resampled.len(), RESAMPLE_LEN);
                    assert_eq!(cycle.status(), CycleStatus::Pending);
                }
                other => panic!("evento inesperado {:?}", other),
            }
        }
        assert!(seg.is_collecting());
    }

    #[test]
    fn test_short_and_long_cycles_are_discarded() {
        let mut seg = CycleSegmenter::default();
        let events = feed(&mut seg, 4.0, &[0.1, 0.3, 3.2]);
        assert!(matches!(
            events[0],
            SegmentEvent::Discarded(CycleError::TooShort { .. })
        ));
        assert!(matches!(
            events[1],
            SegmentEvent::Discarded(CycleError::TooLong { .. })
        ));
        assert_eq!(seg.completed_count(), 0);
        assert_eq!(seg.discarded_count(), 2);
    }

    #[test]
    fn test_stopped_walking_aborts_pending() {
        let mut seg = CycleSegmenter::default();
        let events = feed(&mut seg, 6.0, &[0.5]);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            SegmentEvent::Discarded(CycleError::Aborted { .. })
        ));
        assert!(!seg.is_collecting());
    }

    #[test]
    fn test_dropout_gap_aborts_pending() {
        let mut seg = CycleSegmenter::default();
        seg.push(&est(0.0, Some(PhaseTransition::StanceOnset)));
        seg.push(&est(0.01, None));
        let ev = seg.push(&est(0.60, None));
        assert!(matches!(
            ev,
            Some(SegmentEvent::Discarded(CycleError::Aborted { .. }))
        ));
        // La siguiente frontera no produce un ciclo: no había nada pendiente
        let ev = seg.push(&est(0.61, Some(PhaseTransition::StanceOnset)));
        assert!(ev.is_none());
        assert!(seg.is_collecting());
    }

    #[test]
    fn test_explicit_abort() {
        let mut seg = CycleSegmenter::default();
        assert!(seg.abort("test").is_none());
        seg.push(&est(0.0, Some(PhaseTransition::StanceOnset)));
        assert!(seg.abort("test").is_some());
        assert_eq!(seg.state(), "IDLE");
    }
}
