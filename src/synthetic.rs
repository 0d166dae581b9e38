//! Generador de marcha sintética para demos y pruebas.
//!
//! El muslo baja de +A/2 a -A/2 durante el apoyo y vuelve a subir en el
//! balanceo. Durante el balanceo el eje vertical oscila, como hace un
//! muslo en movimiento libre.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::types::{SensorSample, SAMPLING_RATE};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaitProfile {
    pub cycle_s: f64,
    /// Excursión pico a pico del muslo (deg)
    pub amplitude_deg: f32,
    pub stance_fraction: f64,
    /// Oscilación vertical durante el balanceo (g)
    pub swing_vibration_g: f32,
    /// Oscilaciones por balanceo
    pub swing_oscillations: f32,
    pub accel_noise_g: f32,
    pub gyro_noise_dps: f32,
    pub sample_rate_hz: f32,
}

impl Default for GaitProfile {
    fn default() -> Self {
        Self {
            cycle_s: 1.1,
            amplitude_deg: 40.0,
            stance_fraction: 0.6,
            swing_vibration_g: 0.3,
            swing_oscillations: 4.0,
            accel_noise_g: 0.005,
            gyro_noise_dps: 0.5,
            sample_rate_hz: SAMPLING_RATE,
        }
    }
}

impl GaitProfile {
    /// Ángulo (deg), velocidad angular (deg/s) y oscilación vertical (g)
    /// en la fracción de ciclo `p`
    pub fn kinematics(&self, p: f64) -> (f32, f32, f32) {
        use std::f64::consts::PI;
        let half = self.amplitude_deg as f64 / 2.0;
        let sf = self.stance_fraction.clamp(0.05, 0.95);
        if p < sf {
            let x = PI * p / sf;
            let angle = half * x.cos();
            let rate = -half * PI / (sf * self.cycle_s) * x.sin();
            (angle as f32, rate as f32, 0.0)
        } else {
            let q = (p - sf) / (1.0 - sf);
            let angle = -half * (PI * q).cos();
            let rate = half * PI / ((1.0 - sf) * self.cycle_s) * (PI * q).sin();
            let vib = self.swing_vibration_g as f64
                * (2.0 * PI * self.swing_oscillations as f64 * q).sin();
            (angle as f32, rate as f32, vib as f32)
        }
    }
}

/// Fuente de muestras IMU de un muslo caminando
pub struct SyntheticGait {
    profile: GaitProfile,
    pending: Option<GaitProfile>,
    rng: StdRng,
    index: u64,
    cycle_start_s: f64,
    cycles: u64,
}

impl SyntheticGait {
    pub fn new(profile: GaitProfile, seed: u64) -> Self {
        Self {
            profile,
            pending: None,
            rng: StdRng::seed_from_u64(seed),
            index: 0,
            cycle_start_s: 0.0,
            cycles: 0,
        }
    }

    /// El perfil nuevo se aplica en el próximo contacto inicial
    pub fn set_profile(&mut self, profile: GaitProfile) {
        self.pending = Some(profile);
    }

    pub fn profile(&self) -> &GaitProfile {
        &self.profile
    }

    /// Ciclos completos generados
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn noise(&mut self, amplitude: f32) -> f32 {
        if amplitude > 0.0 {
            self.rng.gen_range(-amplitude..amplitude)
        } else {
            0.0
        }
    }

    pub fn next_sample(&mut self) -> SensorSample {
        let t = self.index as f64 / self.profile.sample_rate_hz as f64;
        self.index += 1;

        while t - self.cycle_start_s >= self.profile.cycle_s {
            self.cycle_start_s += self.profile.cycle_s;
            self.cycles += 1;
            if let Some(next) = self.pending.take() {
                self.profile = next;
            }
        }

        let p = (t - self.cycle_start_s) / self.profile.cycle_s;
        let (angle, rate, vib) = self.profile.kinematics(p);
        let theta = angle.to_radians();

        let an = self.profile.accel_noise_g;
        let gn = self.profile.gyro_noise_dps;
        let accel = [
            -theta.sin() + self.noise(an),
            self.noise(an),
            theta.cos() + vib + self.noise(an),
        ];
        let gyro = [self.noise(gn), rate + self.noise(gn), self.noise(gn)];
        SensorSample::new(t, accel, gyro)
    }

    /// `secs` segundos de muestras
    pub fn take_secs(&mut self, secs: f64) -> Vec<SensorSample> {
        let n = (secs * self.profile.sample_rate_hz as f64).round() as usize;
        (0..n).map(|_| self.next_sample()).collect()
    }
}

impl Iterator for SyntheticGait {
    type Item = SensorSample;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_sample())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinematics_are_continuous_at_phase_boundaries() {
        let profile = GaitProfile::default();
        let (a0, _, _) = profile.kinematics(0.0);
        let (a_end, _, _) = profile.kinematics(0.999_999);
        assert!((a0 - 20.0).abs() < 1e-4);
        assert!((a_end - 20.0).abs() < 1e-3);
        let (before, _, _) = profile.kinematics(0.599_999);
        let (after, _, v) = profile.kinematics(0.6);
        assert!((before - after).abs() < 1e-3);
        assert!(v.abs() < 1e-6);
    }

    #[test]
    fn same_seed_same_stream() {
        let a = SyntheticGait::new(GaitProfile::default(), 42).take_secs(2.0);
        let b = SyntheticGait::new(GaitProfile::default(), 42).take_secs(2.0);
        assert_eq!(a, b);
        assert_eq!(a.len(), 200);
        assert!(a.windows(2).all(|w| w[1].timestamp_s > w[0].timestamp_s));
    }

    #[test]
    fn profile_change_waits_for_next_cycle() {
        let mut gait = SyntheticGait::new(GaitProfile::default(), 1);
        gait.take_secs(0.5);
        gait.set_profile(GaitProfile {
            amplitude_deg: 80.0,
            ..GaitProfile::default()
        });
        gait.take_secs(0.5);
        assert_eq!(gait.profile().amplitude_deg, 40.0);
        gait.take_secs(0.2);
        assert_eq!(gait.profile().amplitude_deg, 80.0);
        assert_eq!(gait.cycles(), 1);
    }
}
