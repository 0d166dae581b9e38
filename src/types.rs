use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longitud del vector remuestreado de un ciclo (0..100 % del ciclo)
pub const RESAMPLE_LEN: usize = 101;

/// Número de canales del parche vibrotáctil
pub const NUM_CHANNELS: usize = 4;

/// Frecuencia de muestreo nominal del IMU (Hz)
pub const SAMPLING_RATE: f32 = 100.0;

/// Una muestra del IMU: aceleración en g y velocidad angular en deg/s
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorSample {
    pub timestamp_s: f64,
    /// [ax, ay, az] en g
    pub accel: [f32; 3],
    /// [gx, gy, gz] en deg/s
    pub gyro: [f32; 3],
}

impl SensorSample {
    pub fn new(timestamp_s: f64, accel: [f32; 3], gyro: [f32; 3]) -> Self {
        Self {
            timestamp_s,
            accel,
            gyro,
        }
    }

    /// Muestra en reposo con la gravedad alineada al eje z
    pub fn at_rest(timestamp_s: f64) -> Self {
        Self::new(timestamp_s, [0.0, 0.0, 1.0], [0.0; 3])
    }

    /// Valor absoluto máximo de aceleración en los tres ejes
    pub fn max_abs_accel(&self) -> f32 {
        self.accel.iter().fold(0.0f32, |m, a| m.max(a.abs()))
    }

    pub fn max_abs_gyro(&self) -> f32 {
        self.gyro.iter().fold(0.0f32, |m, g| m.max(g.abs()))
    }

    pub fn is_finite(&self) -> bool {
        self.timestamp_s.is_finite()
            && self.accel.iter().all(|a| a.is_finite())
            && self.gyro.iter().all(|g| g.is_finite())
    }
}

/// Fase de la marcha
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GaitPhase {
    Stance,
    Swing,
}

impl GaitPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            GaitPhase::Stance => "STANCE",
            GaitPhase::Swing => "SWING",
        }
    }
}

impl std::fmt::Display for GaitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cambio de fase confirmado (tras el anti-rebote)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseTransition {
    /// STANCE -> SWING (despegue del pie)
    SwingOnset,
    /// SWING -> STANCE (contacto inicial, frontera de ciclo)
    StanceOnset,
}

/// Motivo por el que una muestra se descarta
#[derive(Error, Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SampleFault {
    #[error("non-finite value in sample")]
    NonFinite,

    #[error("acceleration {value:.2} g exceeds ±{limit:.1} g")]
    AccelOutOfRange { value: f32, limit: f32 },

    #[error("angular rate {value:.1} deg/s exceeds ±{limit:.0} deg/s")]
    GyroOutOfRange { value: f32, limit: f32 },

    #[error("timestamp {timestamp_s:.4} s does not advance past {previous_s:.4} s")]
    NonMonotonic { timestamp_s: f64, previous_s: f64 },
}

/// Salida del filtro, una por cada SensorSample
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AngleEstimate {
    pub timestamp_s: f64,
    /// Ángulo del muslo en grados (flexión positiva)
    pub angle_deg: f32,
    pub phase: GaitPhase,
    /// Peso dado al ángulo del acelerómetro en la fusión
    pub confidence: f32,
    pub transition: Option<PhaseTransition>,
    pub fault: Option<SampleFault>,
}

impl AngleEstimate {
    pub fn is_valid(&self) -> bool {
        self.fault.is_none()
    }
}

/// Estado de aceptación de un ciclo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleStatus {
    Pending,
    Accepted,
    Rejected,
}

/// Decisión de la base de datos sobre un ciclo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Accepted,
    Rejected,
}

impl From<Decision> for CycleStatus {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Accepted => CycleStatus::Accepted,
            Decision::Rejected => CycleStatus::Rejected,
        }
    }
}

/// Un ciclo de marcha completo, de un contacto inicial al siguiente
#[derive(Debug, Clone)]
pub struct GaitCycle {
    pub id: u64,
    pub start_s: f64,
    pub end_s: f64,
    /// Estimaciones del ciclo, incluyendo ambas fronteras
    pub estimates: Vec<AngleEstimate>,
    /// Ángulo remuestreado a longitud fija sobre 0..100 % del ciclo
    pub resampled: Vec<f32>,
    status: CycleStatus,
}

impl GaitCycle {
    pub fn new(id: u64, estimates: Vec<AngleEstimate>, resample_len: usize) -> Self {
        let start_s = estimates.first().map(|e| e.timestamp_s).unwrap_or(0.0);
        let end_s = estimates.last().map(|e| e.timestamp_s).unwrap_or(start_s);
        let mut cycle = Self {
            id,
            start_s,
            end_s,
            estimates,
            resampled: Vec::new(),
            status: CycleStatus::Pending,
        };
        cycle.ensure_resampled(resample_len);
        cycle
    }

    /// Ciclo construido directamente desde un vector ya remuestreado
    pub fn from_vector(id: u64, duration_s: f64, resampled: Vec<f32>) -> Self {
        Self {
            id,
            start_s: 0.0,
            end_s: duration_s,
            estimates: Vec::new(),
            resampled,
            status: CycleStatus::Pending,
        }
    }

    pub fn duration_s(&self) -> f64 {
        self.end_s - self.start_s
    }

    pub fn status(&self) -> CycleStatus {
        self.status
    }

    /// Remuestrea la traza si el vector no tiene la longitud pedida
    pub fn ensure_resampled(&mut self, len: usize) {
        if self.resampled.len() == len || self.estimates.is_empty() {
            return;
        }
        let times: Vec<f64> = self.estimates.iter().map(|e| e.timestamp_s).collect();
        let angles: Vec<f32> = self.estimates.iter().map(|e| e.angle_deg).collect();
        self.resampled = crate::signal::resample_trace(&times, &angles, len);
    }

    /// Solo la base de datos resuelve un ciclo, y una sola vez
    pub(crate) fn resolve(&mut self, decision: Decision) {
        if self.status == CycleStatus::Pending {
            self.status = decision.into();
        }
    }
}

/// Modo de estimulación
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CueMode {
    /// Sincronizado con el despegue, desfase distinto por canal
    SpaVib,
    /// Ráfagas fijas independientes de la fase
    Const,
}

impl std::str::FromStr for CueMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spavib" => Ok(CueMode::SpaVib),
            "const" => Ok(CueMode::Const),
            other => Err(format!("modo desconocido: {}", other)),
        }
    }
}

/// Comando lógico para un canal del actuador
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VibrationCommand {
    /// Canal 1..=4
    pub channel: u8,
    pub onset_s: f64,
    pub duration_s: f32,
    pub frequency_hz: f32,
    /// 0..1 (se mapea a PWM en el MCU)
    pub intensity: f32,
    pub mode: CueMode,
}

impl VibrationCommand {
    pub fn end_s(&self) -> f64 {
        self.onset_s + self.duration_s as f64
    }
}
