//! Controlador vibrotáctil espaciotemporal.
//!
//! Detecta el inicio del balanceo a partir del ángulo del muslo y programa
//! una ráfaga por canal con desfases distintos (modo SpaVib), o emite
//! ráfagas periódicas independientes de la fase (modo Const).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{CueMode, GaitPhase, VibrationCommand, NUM_CHANNELS};

/// Programa de un canal relativo al instante de disparo
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelSchedule {
    pub offset_s: f32,
    pub duration_s: f32,
    pub frequency_hz: f32,
    pub intensity: f32,
}

impl ChannelSchedule {
    pub fn new(offset_s: f32) -> Self {
        Self {
            offset_s,
            duration_s: 0.2,
            frequency_hz: 40.0,
            intensity: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VibroControllerConfig {
    pub mode: CueMode,
    /// Pendiente del ángulo (deg/s) que dispara durante el apoyo
    pub onset_slope_dps: f32,
    /// Tras un cambio STANCE -> SWING se dispara si aún no se hizo
    pub onset_grace_s: f64,
    /// Ángulo mínimo para disparar (opcional)
    pub min_trigger_angle_deg: Option<f32>,
    /// Tiempo mínimo entre disparos
    pub refractory_s: f64,
    /// Un programa por canal, desfases distintos
    pub channels: Vec<ChannelSchedule>,
    pub const_period_s: f64,
    pub const_duration_s: f32,
    pub const_frequency_hz: f32,
    pub const_intensity: f32,
    /// Escala la intensidad según la normalidad del último ciclo
    pub modulate_by_normality: bool,
    /// Ganancia con normalidad perfecta
    pub min_gain: f32,
}

impl Default for VibroControllerConfig {
    fn default() -> Self {
        Self {
            mode: CueMode::SpaVib,
            onset_slope_dps: 60.0,
            onset_grace_s: 0.15,
            min_trigger_angle_deg: None,
            refractory_s: 0.4,
            channels: (0..NUM_CHANNELS)
                .map(|i| ChannelSchedule::new(0.05 * i as f32))
                .collect(),
            const_period_s: 1.0,
            const_duration_s: 0.2,
            const_frequency_hz: 40.0,
            const_intensity: 1.0,
            modulate_by_normality: false,
            min_gain: 0.3,
        }
    }
}

impl VibroControllerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.channels.len() != NUM_CHANNELS {
            return Err(format!(
                "se esperaban {} canales, hay {}",
                NUM_CHANNELS,
                self.channels.len()
            ));
        }
        for (i, a) in self.channels.iter().enumerate() {
            if a.duration_s <= 0.0 || a.offset_s < 0.0 {
                return Err(format!("canal {}: desfase o duración inválidos", i + 1));
            }
            if !(0.0..=1.0).contains(&a.intensity) {
                return Err(format!("canal {}: intensidad fuera de [0, 1]", i + 1));
            }
            if self.channels[i + 1..]
                .iter()
                .any(|b| (a.offset_s - b.offset_s).abs() < f32::EPSILON)
            {
                return Err(format!("canal {}: desfase repetido", i + 1));
            }
        }
        if !(self.const_period_s > 0.0 && self.const_duration_s > 0.0) {
            return Err("periodo y duración del modo Const deben ser positivos".into());
        }
        if !(0.0..=1.0).contains(&self.min_gain) {
            return Err("min_gain fuera de [0, 1]".into());
        }
        Ok(())
    }

    /// Fin de la última ráfaga relativo al disparo
    fn cue_span_s(&self) -> f64 {
        self.channels
            .iter()
            .map(|c| (c.offset_s + c.duration_s) as f64)
            .fold(0.0, f64::max)
    }
}

/// Estados del disparo
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CueState {
    /// Esperando el inicio del balanceo
    Armed,
    /// Ráfagas en curso
    Triggered { until: f64, swing_seen: bool },
    /// Esperando un apoyo sin subida tras el balanceo antes de rearmar
    Cooldown { swing_seen: bool },
}

pub struct VibroController {
    config: VibroControllerConfig,
    state: CueState,
    prev: Option<(f64, f32)>,
    last_phase: GaitPhase,
    swing_entered_s: Option<f64>,
    last_trigger_s: Option<f64>,
    next_const_s: Option<f64>,
    normality: Option<f32>,
    triggers: u64,
}

impl VibroController {
    pub fn new(config: VibroControllerConfig) -> Self {
        Self {
            config,
            state: CueState::Armed,
            prev: None,
            last_phase: GaitPhase::Stance,
            swing_entered_s: None,
            last_trigger_s: None,
            next_const_s: None,
            normality: None,
            triggers: 0,
        }
    }

    pub fn reset(&mut self) {
        let config = self.config.clone();
        *self = Self::new(config);
    }

    /// Normalidad del último ciclo (para la modulación)
    pub fn set_normality(&mut self, normality: Option<f32>) {
        self.normality = normality.map(|n| n.clamp(0.0, 1.0));
    }

    pub fn state(&self) -> CueState {
        self.state
    }

    pub fn mode(&self) -> CueMode {
        self.config.mode
    }

    pub fn trigger_count(&self) -> u64 {
        self.triggers
    }

    /// Procesa una estimación y devuelve los comandos a emitir ahora
    pub fn on_sample(&mut self, angle_deg: f32, phase: GaitPhase, timestamp_s: f64) -> Vec<VibrationCommand> {
        if phase == GaitPhase::Swing && self.last_phase == GaitPhase::Stance {
            self.swing_entered_s = Some(timestamp_s);
        }

        let slope = match self.prev {
            Some((t, a)) if timestamp_s > t => Some((angle_deg - a) / (timestamp_s - t) as f32),
            _ => None,
        };

        let commands = match self.config.mode {
            CueMode::SpaVib => self.spavib_step(angle_deg, phase, timestamp_s, slope),
            CueMode::Const => self.const_step(timestamp_s),
        };

        self.prev = Some((timestamp_s, angle_deg));
        self.last_phase = phase;
        commands
    }

    fn spavib_step(
        &mut self,
        angle_deg: f32,
        phase: GaitPhase,
        timestamp_s: f64,
        slope: Option<f32>,
    ) -> Vec<VibrationCommand> {
        let is_swing = phase == GaitPhase::Swing;

        match self.state {
            CueState::Armed => {
                if self.onset_detected(angle_deg, phase, timestamp_s, slope) {
                    self.state = CueState::Triggered {
                        until: timestamp_s + self.config.cue_span_s(),
                        swing_seen: is_swing,
                    };
                    self.last_trigger_s = Some(timestamp_s);
                    self.triggers += 1;
                    debug!(t = timestamp_s, angle_deg, ?slope, "inicio de balanceo");
                    return self.spavib_batch(timestamp_s);
                }
            }

            CueState::Triggered { until, swing_seen } => {
                let swing_seen = swing_seen || is_swing;
                self.state = if timestamp_s >= until {
                    CueState::Cooldown { swing_seen }
                } else {
                    CueState::Triggered { until, swing_seen }
                };
            }

            CueState::Cooldown { swing_seen } => {
                // Al volver al apoyo el ángulo puede seguir corrigiéndose hacia arriba
                let settled = slope.map_or(true, |s| s < self.config.onset_slope_dps);
                if swing_seen && !is_swing && settled {
                    self.state = CueState::Armed;
                } else if is_swing {
                    self.state = CueState::Cooldown { swing_seen: true };
                }
            }
        }

        Vec::new()
    }

    fn onset_detected(&self, angle_deg: f32, phase: GaitPhase, timestamp_s: f64, slope: Option<f32>) -> bool {
        if let Some(last) = self.last_trigger_s {
            if timestamp_s - last < self.config.refractory_s {
                return false;
            }
        }
        if let Some(min_angle) = self.config.min_trigger_angle_deg {
            if angle_deg < min_angle {
                return false;
            }
        }

        match phase {
            GaitPhase::Stance => slope.map_or(false, |s| s >= self.config.onset_slope_dps),
            GaitPhase::Swing => self
                .swing_entered_s
                .map_or(false, |t0| timestamp_s - t0 <= self.config.onset_grace_s),
        }
    }

    fn gain(&self) -> f32 {
        match (self.config.modulate_by_normality, self.normality) {
            (true, Some(n)) => self.config.min_gain + (1.0 - self.config.min_gain) * (1.0 - n),
            _ => 1.0,
        }
    }

    fn spavib_batch(&self, onset_s: f64) -> Vec<VibrationCommand> {
        let gain = self.gain();
        self.config
            .channels
            .iter()
            .enumerate()
            .map(|(i, ch)| VibrationCommand {
                channel: (i + 1) as u8,
                onset_s: onset_s + ch.offset_s as f64,
                duration_s: ch.duration_s,
                frequency_hz: ch.frequency_hz,
                intensity: (ch.intensity * gain).clamp(0.0, 1.0),
                mode: CueMode::SpaVib,
            })
            .collect()
    }

    fn const_step(&mut self, timestamp_s: f64) -> Vec<VibrationCommand> {
        let period = self.config.const_period_s;
        if !(period.is_finite() && period > 0.0) {
            return Vec::new();
        }
        let next = *self.next_const_s.get_or_insert(timestamp_s);
        if timestamp_s < next {
            return Vec::new();
        }

        // Primer múltiplo del periodo estrictamente posterior a la muestra
        let elapsed = ((timestamp_s - next) / period).floor() + 1.0;
        self.next_const_s = Some(next + elapsed * period);
        self.triggers += 1;

        let intensity = (self.config.const_intensity * self.gain()).clamp(0.0, 1.0);
        (1..=NUM_CHANNELS as u8)
            .map(|channel| VibrationCommand {
                channel,
                onset_s: timestamp_s,
                duration_s: self.config.const_duration_s,
                frequency_hz: self.config.const_frequency_hz,
                intensity,
                mode: CueMode::Const,
            })
            .collect()
    }
}

impl Default for VibroController {
    fn default() -> Self {
        Self::new(VibroControllerConfig::default())
    }
}
