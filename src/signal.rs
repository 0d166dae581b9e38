//! Funciones estadísticas y de remuestreo compartidas por el filtro,
//! la base de datos y la fusión.

// ========== Funciones estadísticas ==========

pub fn mean(data: &[f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f32>() / data.len() as f32
}

/// Varianza poblacional (ddof = 0)
pub fn variance(data: &[f32]) -> f32 {
    if data.len() <= 1 {
        return 0.0;
    }
    let m = mean(data);
    data.iter().map(|x| (x - m).powi(2)).sum::<f32>() / data.len() as f32
}

pub fn range(data: &[f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let min = data.iter().fold(f32::INFINITY, |a, &b| a.min(b));
    let max = data.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    max - min
}

pub fn rms(data: &[f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    (data.iter().map(|x| x * x).sum::<f32>() / data.len() as f32).sqrt()
}

/// Distancia euclídea entre dos vectores de la misma longitud
pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// RMSE punto a punto
pub fn rmse(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    (a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        / n as f32)
        .sqrt()
}

/// Percentil con interpolación lineal entre rangos (p en 0..100).
/// Ordena `data` in situ.
pub fn percentile(data: &mut [f32], p: f32) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    data.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let p = p.clamp(0.0, 100.0) / 100.0;
    let pos = p * (data.len() - 1) as f32;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f32;
    data[lo] + (data[hi] - data[lo]) * frac
}

// ========== Remuestreo ==========

/// Remuestrea una traza temporal a `len` puntos equiespaciados sobre
/// 0..100 % de su duración (interpolación lineal).
pub fn resample_trace(times: &[f64], values: &[f32], len: usize) -> Vec<f32> {
    let n = times.len().min(values.len());
    if len == 0 {
        return Vec::new();
    }
    if n == 0 {
        return vec![0.0; len];
    }
    if n == 1 {
        return vec![values[0]; len];
    }

    let t0 = times[0];
    let span = (times[n - 1] - t0).max(1e-9);
    let mut out = Vec::with_capacity(len);
    let mut j = 0usize;

    for k in 0..len {
        let target = if len == 1 {
            0.0
        } else {
            k as f64 / (len - 1) as f64
        };
        while j + 2 < n && (times[j + 1] - t0) / span < target {
            j += 1;
        }
        let pa = (times[j] - t0) / span;
        let pb = (times[j + 1] - t0) / span;
        let frac = if pb > pa {
            ((target - pa) / (pb - pa)).clamp(0.0, 1.0) as f32
        } else {
            0.0
        };
        out.push(values[j] + (values[j + 1] - values[j]) * frac);
    }

    out
}

/// Remuestrea un vector definido sobre una rejilla uniforme a otra longitud
pub fn resample_uniform(values: &[f32], len: usize) -> Vec<f32> {
    if values.len() == len {
        return values.to_vec();
    }
    let times: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    resample_trace(&times, values, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variance_of_constant_is_zero() {
        assert_eq!(variance(&[2.5; 12]), 0.0);
        assert!((variance(&[1.0, -1.0, 1.0, -1.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn percentile_interpolates() {
        let mut data = vec![4.0, 1.0, 3.0, 2.0, 5.0];
        assert!((percentile(&mut data, 50.0) - 3.0).abs() < 1e-6);
        assert!((percentile(&mut data, 0.0) - 1.0).abs() < 1e-6);
        assert!((percentile(&mut data, 100.0) - 5.0).abs() < 1e-6);
        assert!((percentile(&mut data, 75.0) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn resample_keeps_endpoints_and_line() {
        let times: Vec<f64> = (0..37).map(|i| i as f64 * 0.013).collect();
        let values: Vec<f32> = (0..37).map(|i| 2.0 * i as f32).collect();
        let out = resample_trace(&times, &values, 101);
        assert_eq!(out.len(), 101);
        assert!((out[0] - 0.0).abs() < 1e-4);
        assert!((out[100] - 72.0).abs() < 1e-3);
        assert!((out[50] - 36.0).abs() < 1e-3);
    }

    #[test]
    fn resample_irregular_timestamps() {
        // Muestras no equiespaciadas: el valor sigue siendo lineal en el tiempo
        let times = [0.0, 0.1, 0.15, 0.7, 1.0];
        let values: Vec<f32> = times.iter().map(|t| (*t * 10.0) as f32).collect();
        let out = resample_trace(&times, &values, 11);
        for (k, v) in out.iter().enumerate() {
            assert!((v - k as f32).abs() < 1e-3, "k={} v={}", k, v);
        }
    }

    #[test]
    fn normalized_distance_helpers() {
        let a = [0.0, 3.0];
        let b = [4.0, 0.0];
        assert!((euclidean(&a, &b) - 5.0).abs() < 1e-6);
        assert!((rmse(&a, &a)).abs() < 1e-9);
        assert!((range(&[-2.0, 5.0, 1.0]) - 7.0).abs() < 1e-6);
    }
}
