use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{AngleEstimate, GaitPhase, PhaseTransition, SampleFault, SensorSample};

/// Eje del sensor que se usa para cada magnitud
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionAxis {
    X,
    Y,
    Z,
}

impl MotionAxis {
    fn sample(self, v: [f32; 3]) -> f32 {
        match self {
            MotionAxis::X => v[0],
            MotionAxis::Y => v[1],
            MotionAxis::Z => v[2],
        }
    }

    /// El eje restante, para el denominador de la inclinación
    fn remaining(self, other: MotionAxis) -> MotionAxis {
        match (self, other) {
            (MotionAxis::X, MotionAxis::Y) | (MotionAxis::Y, MotionAxis::X) => MotionAxis::Z,
            (MotionAxis::X, MotionAxis::Z) | (MotionAxis::Z, MotionAxis::X) => MotionAxis::Y,
            _ => MotionAxis::X,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseFilterConfig {
    /// Eje antero-posterior del acelerómetro (numerador del pitch)
    pub forward_axis: MotionAxis,
    /// Eje vertical (ventana de varianza)
    pub vertical_axis: MotionAxis,
    /// Eje del giróscopo alineado con la flexión del muslo
    pub gyro_axis: MotionAxis,
    pub gyro_sign: f32,
    /// Muestras de la ventana de varianza
    pub variance_window: usize,
    /// Umbral de varianza vertical (g²) entre reposo y movimiento
    pub variance_threshold: f32,
    /// Muestras consecutivas para cambiar entre estático y dinámico
    pub motion_hysteresis: usize,
    /// Peso del acelerómetro con baja varianza (predomina sobre el giróscopo)
    pub static_accel_weight: f32,
    /// Peso del ancla con alta varianza (predomina el giróscopo)
    pub dynamic_accel_weight: f32,
    /// Muestras para la tendencia del ángulo
    pub trend_window: usize,
    /// Pendiente mínima (deg/s) para votar SWING
    pub swing_rise_rate_dps: f32,
    /// Votos consecutivos para confirmar un cambio de fase
    pub phase_debounce: usize,
    pub max_accel_g: f32,
    pub max_gyro_dps: f32,
    /// Huecos mayores reinician el ángulo desde el acelerómetro
    pub max_gap_s: f64,
}

impl Default for PhaseFilterConfig {
    fn default() -> Self {
        Self {
            forward_axis: MotionAxis::X,
            vertical_axis: MotionAxis::Z,
            gyro_axis: MotionAxis::Y,
            gyro_sign: 1.0,
            variance_window: 10,       // 100 ms a 100 Hz
            variance_threshold: 0.01,  // g²
            motion_hysteresis: 2,
            static_accel_weight: 0.9,
            dynamic_accel_weight: 0.02,
            trend_window: 3,
            swing_rise_rate_dps: 20.0,
            phase_debounce: 3,
            max_accel_g: 16.0,
            max_gyro_dps: 2000.0,
            max_gap_s: 0.5,
        }
    }
}

/// Confianza en la inclinación del acelerómetro
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionState {
    Static,
    Dynamic,
}

/// Máquina de estados de la fase con anti-rebote
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseState {
    Stance,
    /// En STANCE, acumulando votos de SWING
    SwingPending(usize),
    Swing,
    /// En SWING, acumulando votos de STANCE
    StancePending(usize),
}

impl PhaseState {
    /// Fase confirmada (las pendientes conservan la fase de origen)
    pub fn phase(self) -> GaitPhase {
        match self {
            PhaseState::Stance | PhaseState::SwingPending(_) => GaitPhase::Stance,
            PhaseState::Swing | PhaseState::StancePending(_) => GaitPhase::Swing,
        }
    }

    /// Aplica un voto y devuelve el nuevo estado y el cambio confirmado, si hay
    pub fn advance(self, vote: Option<GaitPhase>, debounce: usize) -> (Self, Option<PhaseTransition>) {
        let debounce = debounce.max(1);
        match (self, vote) {
            (PhaseState::Stance, Some(GaitPhase::Swing)) | (PhaseState::SwingPending(_), Some(GaitPhase::Swing)) => {
                let count = match self {
                    PhaseState::SwingPending(n) => n + 1,
                    _ => 1,
                };
                if count >= debounce {
                    (PhaseState::Swing, Some(PhaseTransition::SwingOnset))
                } else {
                    (PhaseState::SwingPending(count), None)
                }
            }
            (PhaseState::Swing, Some(GaitPhase::Stance)) | (PhaseState::StancePending(_), Some(GaitPhase::Stance)) => {
                let count = match self {
                    PhaseState::StancePending(n) => n + 1,
                    _ => 1,
                };
                if count >= debounce {
                    (PhaseState::Stance, Some(PhaseTransition::StanceOnset))
                } else {
                    (PhaseState::StancePending(count), None)
                }
            }
            // Voto contrario: se pierde la racha
            (PhaseState::SwingPending(_), Some(GaitPhase::Stance)) => (PhaseState::Stance, None),
            (PhaseState::StancePending(_), Some(GaitPhase::Swing)) => (PhaseState::Swing, None),
            // Sin voto (zona ambigua) o voto que confirma el estado actual
            (state, _) => (state, None),
        }
    }
}

/// Filtro complementario adaptativo a la fase para un solo IMU
pub struct PhaseFilter {
    config: PhaseFilterConfig,
    angle_deg: f32,
    anchor_deg: f32,
    confidence: f32,
    last_timestamp: Option<f64>,
    vertical_window: VecDeque<f32>,
    trend: VecDeque<(f64, f32)>,
    motion: MotionState,
    motion_votes: usize,
    phase: PhaseState,
    invalid_count: u64,
}

impl PhaseFilter {
    pub fn new(config: PhaseFilterConfig) -> Self {
        let window = config.variance_window.max(2);
        let trend = config.trend_window.max(2);
        Self {
            config,
            angle_deg: 0.0,
            anchor_deg: 0.0,
            confidence: 1.0,
            last_timestamp: None,
            vertical_window: VecDeque::with_capacity(window),
            trend: VecDeque::with_capacity(trend),
            motion: MotionState::Static,
            motion_votes: 0,
            phase: PhaseState::Stance,
            invalid_count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.angle_deg = 0.0;
        self.anchor_deg = 0.0;
        self.confidence = 1.0;
        self.last_timestamp = None;
        self.vertical_window.clear();
        self.trend.clear();
        self.motion = MotionState::Static;
        self.motion_votes = 0;
        self.phase = PhaseState::Stance;
    }

    pub fn phase(&self) -> GaitPhase {
        self.phase.phase()
    }

    pub fn phase_state(&self) -> PhaseState {
        self.phase
    }

    pub fn motion_state(&self) -> MotionState {
        self.motion
    }

    pub fn angle_deg(&self) -> f32 {
        self.angle_deg
    }

    pub fn invalid_count(&self) -> u64 {
        self.invalid_count
    }

    /// Inclinación (deg) a partir del acelerómetro
    pub fn accel_pitch_deg(&self, accel: [f32; 3]) -> f32 {
        let fwd = self.config.forward_axis.sample(accel);
        let vert = self.config.vertical_axis.sample(accel);
        let lat = self
            .config
            .forward_axis
            .remaining(self.config.vertical_axis)
            .sample(accel);
        (-fwd).atan2((lat * lat + vert * vert).sqrt()).to_degrees()
    }

    fn validate(&self, sample: &SensorSample) -> Result<(), SampleFault> {
        if !sample.is_finite() {
            return Err(SampleFault::NonFinite);
        }
        let accel = sample.max_abs_accel();
        if accel > self.config.max_accel_g {
            return Err(SampleFault::AccelOutOfRange {
                value: accel,
                limit: self.config.max_accel_g,
            });
        }
        let gyro = sample.max_abs_gyro();
        if gyro > self.config.max_gyro_dps {
            return Err(SampleFault::GyroOutOfRange {
                value: gyro,
                limit: self.config.max_gyro_dps,
            });
        }
        if let Some(prev) = self.last_timestamp {
            if sample.timestamp_s <= prev {
                return Err(SampleFault::NonMonotonic {
                    timestamp_s: sample.timestamp_s,
                    previous_s: prev,
                });
            }
        }
        Ok(())
    }

    /// Procesa una muestra. Nunca falla: una muestra inválida conserva el
    /// ángulo y la fase anteriores y se marca con `fault`.
    pub fn step(&mut self, sample: &SensorSample) -> AngleEstimate {
        if let Err(fault) = self.validate(sample) {
            self.invalid_count += 1;
            warn!(timestamp_s = sample.timestamp_s, %fault, "muestra IMU descartada");
            return AngleEstimate {
                timestamp_s: sample.timestamp_s,
                angle_deg: self.angle_deg,
                phase: self.phase.phase(),
                confidence: self.confidence,
                transition: None,
                fault: Some(fault),
            };
        }

        let accel_angle = self.accel_pitch_deg(sample.accel);
        let rate = self.config.gyro_axis.sample(sample.gyro) * self.config.gyro_sign;

        // Varianza vertical en ventana corta
        self.vertical_window
            .push_back(self.config.vertical_axis.sample(sample.accel));
        if self.vertical_window.len() > self.config.variance_window.max(2) {
            self.vertical_window.pop_front();
        }
        let var = crate::signal::variance(self.vertical_window.make_contiguous());
        self.update_motion(var);

        let dt = self.last_timestamp.map(|prev| sample.timestamp_s - prev);
        self.last_timestamp = Some(sample.timestamp_s);

        match dt {
            Some(dt) if dt <= self.config.max_gap_s => {
                let (weight, reference) = match self.motion {
                    MotionState::Static => {
                        self.anchor_deg = accel_angle;
                        (self.config.static_accel_weight, accel_angle)
                    }
                    MotionState::Dynamic => (self.config.dynamic_accel_weight, self.anchor_deg),
                };
                let gyro_angle = self.angle_deg + rate * dt as f32;
                self.angle_deg = weight * reference + (1.0 - weight) * gyro_angle;
                self.confidence = weight;
            }
            _ => {
                // Primera muestra o hueco largo: se siembra con el acelerómetro
                self.angle_deg = accel_angle;
                self.anchor_deg = accel_angle;
                self.confidence = 1.0;
                self.trend.clear();
            }
        }

        self.trend.push_back((sample.timestamp_s, self.angle_deg));
        if self.trend.len() > self.config.trend_window.max(2) {
            self.trend.pop_front();
        }

        let vote = self.phase_vote(var);
        let (next, transition) = self.phase.advance(vote, self.config.phase_debounce);
        self.phase = next;

        AngleEstimate {
            timestamp_s: sample.timestamp_s,
            angle_deg: self.angle_deg,
            phase: self.phase.phase(),
            confidence: self.confidence,
            transition,
            fault: None,
        }
    }

    fn update_motion(&mut self, var: f32) {
        let wants_dynamic = var > self.config.variance_threshold;
        let opposite = match self.motion {
            MotionState::Static => wants_dynamic,
            MotionState::Dynamic => !wants_dynamic,
        };
        if !opposite {
            self.motion_votes = 0;
            return;
        }
        self.motion_votes += 1;
        if self.motion_votes >= self.config.motion_hysteresis.max(1) {
            self.motion = if wants_dynamic {
                MotionState::Dynamic
            } else {
                MotionState::Static
            };
            self.motion_votes = 0;
        }
    }

    /// Pendiente del ángulo (deg/s) sobre la ventana de tendencia
    fn trend_rate(&self) -> f32 {
        match (self.trend.front(), self.trend.back()) {
            (Some(&(t0, a0)), Some(&(t1, a1))) if t1 > t0 => (a1 - a0) / (t1 - t0) as f32,
            _ => 0.0,
        }
    }

    fn phase_vote(&self, var: f32) -> Option<GaitPhase> {
        if var <= self.config.variance_threshold {
            Some(GaitPhase::Stance)
        } else if self.trend_rate() > self.config.swing_rise_rate_dps {
            Some(GaitPhase::Swing)
        } else {
            None
        }
    }
}

impl Default for PhaseFilter {
    fn default() -> Self {
        Self::new(PhaseFilterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dynamic_sample(t: f64, angle_deg: f32, rate_dps: f32, vib: f32) -> SensorSample {
        let r = angle_deg.to_radians();
        SensorSample::new(t, [-r.sin(), 0.0, r.cos() + vib], [0.0, rate_dps, 0.0])
    }

    #[test]
    fn gravity_aligned_rest_is_constant_stance() {
        let mut filter = PhaseFilter::default();
        let first = filter.step(&SensorSample::at_rest(0.0));
        for i in 1..2000 {
            let est = filter.step(&SensorSample::at_rest(i as f64 * 0.01));
            assert!((est.angle_deg - first.angle_deg).abs() < 1e-6);
            assert_eq!(est.phase, GaitPhase::Stance);
            assert!(est.transition.is_none());
        }
    }

    #[test]
    fn static_tilt_matches_accelerometer() {
        let mut filter = PhaseFilter::default();
        let mut last = 0.0;
        for i in 0..200 {
            last = filter.step(&dynamic_sample(i as f64 * 0.01, 25.0, 0.0, 0.0)).angle_deg;
        }
        assert!((last - 25.0).abs() < 0.01, "angle={}", last);
    }

    #[test]
    fn invalid_sample_holds_previous_state() {
        let mut filter = PhaseFilter::default();
        for i in 0..50 {
            filter.step(&dynamic_sample(i as f64 * 0.01, 10.0, 0.0, 0.0));
        }
        let before = filter.angle_deg();

        let bad = [
            SensorSample::new(0.50, [f32::NAN, 0.0, 1.0], [0.0; 3]),
            SensorSample::new(0.51, [40.0, 0.0, 1.0], [0.0; 3]),
            SensorSample::new(0.52, [0.0, 0.0, 1.0], [0.0, 5000.0, 0.0]),
            SensorSample::new(0.20, [0.0, 0.0, 1.0], [0.0; 3]),
        ];
        for sample in &bad {
            let est = filter.step(sample);
            assert!(!est.is_valid());
            assert_eq!(est.angle_deg, before);
            assert_eq!(est.phase, GaitPhase::Stance);
        }
        assert_eq!(filter.invalid_count(), 4);

        // La siguiente muestra válida continúa con normalidad
        let est = filter.step(&dynamic_sample(0.50, 10.0, 0.0, 0.0));
        assert!(est.is_valid());
        assert!((est.angle_deg - 10.0).abs() < 0.1);
    }

    #[test]
    fn rest_favors_accelerometer() {
        let mut filter = PhaseFilter::default();
        for i in 0..50 {
            filter.step(&dynamic_sample(i as f64 * 0.01, 10.0, 0.0, 0.0));
        }
        let est = filter.step(&dynamic_sample(0.50, 30.0, 0.0, 0.0));
        assert_eq!(filter.motion_state(), MotionState::Static);
        assert!(est.confidence > 0.5);
        // Un solo paso ya recorre la mayor parte del salto
        assert!(est.angle_deg > 20.0, "angle={}", est.angle_deg);
    }

    #[test]
    fn long_gap_reseeds_from_accelerometer() {
        let mut filter = PhaseFilter::default();
        for i in 0..50 {
            filter.step(&dynamic_sample(i as f64 * 0.01, 10.0, 0.0, 0.0));
        }
        // 0.71 s sin muestras, por encima de max_gap_s
        let est = filter.step(&dynamic_sample(1.20, 30.0, 0.0, 0.0));
        assert!(est.is_valid());
        assert_eq!(est.confidence, 1.0);
        assert!((est.angle_deg - 30.0).abs() < 1e-3, "angle={}", est.angle_deg);

        // Dentro del límite se mezcla con el ángulo previo
        let est = filter.step(&dynamic_sample(1.21, 35.0, 0.0, 0.0));
        assert!(est.confidence < 1.0);
        assert!(est.angle_deg < 35.0 - 1e-3);
    }

    #[test]
    fn gyro_dominates_during_vibration() {
        let mut filter = PhaseFilter::default();
        for i in 0..50 {
            filter.step(&dynamic_sample(i as f64 * 0.01, 0.0, 0.0, 0.0));
        }
        // Rotación rápida con aceleración corrupta
        let mut est = None;
        for i in 0..20 {
            let t = 0.5 + i as f64 * 0.01;
            let vib = if i % 2 == 0 { 0.4 } else { -0.4 };
            est = Some(filter.step(&SensorSample::new(t, [0.9, 0.0, 1.0 + vib], [0.0, 300.0, 0.0])));
        }
        let est = est.unwrap();
        assert_eq!(filter.motion_state(), MotionState::Dynamic);
        assert!(est.confidence < 0.1);
        // El acelerómetro diría ~-42°, el giróscopo lleva el ángulo hacia arriba
        assert!(est.angle_deg > 10.0, "angle={}", est.angle_deg);
    }

    #[test]
    fn phase_machine_requires_consecutive_votes() {
        let (s, t) = PhaseState::Stance.advance(Some(GaitPhase::Swing), 3);
        assert_eq!((s, t), (PhaseState::SwingPending(1), None));
        let (s, t) = s.advance(None, 3);
        assert_eq!((s, t), (PhaseState::SwingPending(1), None));
        let (s, _) = s.advance(Some(GaitPhase::Stance), 3);
        assert_eq!(s, PhaseState::Stance);

        let mut state = PhaseState::Stance;
        let mut transitions = Vec::new();
        for _ in 0..3 {
            let (next, t) = state.advance(Some(GaitPhase::Swing), 3);
            state = next;
            transitions.extend(t);
        }
        assert_eq!(state, PhaseState::Swing);
        assert_eq!(transitions, vec![PhaseTransition::SwingOnset]);

        let (s, t) = PhaseState::StancePending(2).advance(Some(GaitPhase::Stance), 3);
        assert_eq!((s, t), (PhaseState::Stance, Some(PhaseTransition::StanceOnset)));
        let (s, _) = PhaseState::StancePending(2).advance(Some(GaitPhase::Swing), 3);
        assert_eq!(s, PhaseState::Swing);
    }

    #[test]
    fn swing_detected_on_rising_vibrating_limb() {
        let mut filter = PhaseFilter::default();
        let mut onset = None;
        for i in 0..100 {
            let t = i as f64 * 0.01;
            filter.step(&dynamic_sample(t, 0.0, 0.0, 0.0));
        }
        for i in 0..40 {
            let t = 1.0 + i as f64 * 0.01;
            let angle = i as f32 * 1.0; // 100 deg/s
            let vib = 0.3 * (2.0 * std::f32::consts::PI * 8.0 * t as f32).sin();
            let est = filter.step(&dynamic_sample(t, angle, 100.0, vib));
            if est.transition == Some(PhaseTransition::SwingOnset) {
                onset = Some(t);
            }
        }
        assert_eq!(filter.phase(), GaitPhase::Swing);
        assert!(onset.unwrap() < 1.15);
    }
}
