//! Curva de referencia del ángulo del muslo en marcha sana.

use crate::signal;

/// Puntos clave (fracción del ciclo, grados) desde el contacto inicial
const THIGH_KEYPOINTS: [(f64, f32); 9] = [
    (0.00, 25.0),
    (0.10, 22.0),
    (0.30, 8.0),
    (0.50, -8.0),
    (0.60, -10.0),
    (0.70, 0.0),
    (0.80, 18.0),
    (0.90, 27.0),
    (1.00, 25.0),
];

/// Curva normativa del muslo remuestreada a `len` puntos
pub fn default_thigh_curve(len: usize) -> Vec<f32> {
    let (times, values): (Vec<f64>, Vec<f32>) = THIGH_KEYPOINTS.iter().copied().unzip();
    signal::resample_trace(&times, &values, len)
}

/// Ajusta una curva externa a la longitud del sistema
pub fn fit_to_length(curve: &[f32], len: usize) -> Vec<f32> {
    signal::resample_uniform(curve, len)
}
