use std::io::Read;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use csv::ReaderBuilder;

use crate::types::SensorSample;

const COLUMNS: usize = 7;

/// Carga muestras IMU desde un CSV `t,ax,ay,az,gx,gy,gz`
/// (t en s, aceleración en g, giro en deg/s) con cabecera.
pub fn load_samples_from_csv(path: impl AsRef<Path>) -> Result<Vec<SensorSample>> {
    let path = path.as_ref();
    let reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("No se pudo abrir el CSV {:?}", path))?;
    read_samples(reader).with_context(|| format!("CSV inválido {:?}", path))
}

/// Igual que `load_samples_from_csv` pero desde cualquier lector
pub fn load_samples_from_reader<R: Read>(input: R) -> Result<Vec<SensorSample>> {
    let reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(input);
    read_samples(reader)
}

fn read_samples<R: Read>(mut reader: csv::Reader<R>) -> Result<Vec<SensorSample>> {
    let mut samples: Vec<SensorSample> = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let row = row_idx + 1;
        let record = result.with_context(|| format!("Fila {} inválida", row))?;
        if record.len() < COLUMNS {
            bail!("La fila {} no tiene {} columnas", row, COLUMNS);
        }

        let field = |i: usize, name: &str| -> Result<f64> {
            record[i]
                .parse::<f64>()
                .with_context(|| format!("{} inválido en fila {}", name, row))
        };

        let t = field(0, "t")?;
        let accel = [
            field(1, "ax")? as f32,
            field(2, "ay")? as f32,
            field(3, "az")? as f32,
        ];
        let gyro = [
            field(4, "gx")? as f32,
            field(5, "gy")? as f32,
            field(6, "gz")? as f32,
        ];

        if let Some(prev) = samples.last() {
            ensure!(
                t > prev.timestamp_s,
                "Timestamps no crecientes en fila {} ({} tras {})",
                row,
                t,
                prev.timestamp_s
            );
        }

        samples.push(SensorSample::new(t, accel, gyro));
    }

    ensure!(!samples.is_empty(), "El CSV no contiene datos");
    Ok(samples)
}

/// Escribe muestras en el mismo formato que lee el cargador
pub fn write_samples_csv(path: impl AsRef<Path>, samples: &[SensorSample]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("No se pudo crear el CSV {:?}", path))?;
    writer.write_record(["t", "ax", "ay", "az", "gx", "gy", "gz"])?;
    for s in samples {
        writer.write_record(&[
            format!("{:.4}", s.timestamp_s),
            s.accel[0].to_string(),
            s.accel[1].to_string(),
            s.accel[2].to_string(),
            s.gyro[0].to_string(),
            s.gyro[1].to_string(),
            s.gyro[2].to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_in_order() {
        let text = "t,ax,ay,az,gx,gy,gz\n0.00,0,0,1,0,0,0\n0.01, 0.1, 0, 0.99, 0, 12.5, 0\n";
        let samples = load_samples_from_reader(text.as_bytes()).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].gyro[1], 12.5);
        assert!((samples[1].accel[2] - 0.99).abs() < 1e-6);
    }

    #[test]
    fn rejects_non_increasing_timestamps() {
        let text = "t,ax,ay,az,gx,gy,gz\n0.01,0,0,1,0,0,0\n0.01,0,0,1,0,0,0\n";
        let err = load_samples_from_reader(text.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("fila 2"));
    }

    #[test]
    fn rejects_short_rows_and_bad_numbers() {
        let short = "t,ax,ay,az,gx,gy,gz\n0.0,0,0,1\n";
        assert!(load_samples_from_reader(short.as_bytes()).is_err());
        let bad = "t,ax,ay,az,gx,gy,gz\n0.0,x,0,1,0,0,0\n";
        assert!(load_samples_from_reader(bad.as_bytes()).is_err());
        let empty = "t,ax,ay,az,gx,gy,gz\n";
        assert!(load_samples_from_reader(empty.as_bytes()).is_err());
    }

    #[test]
    fn writer_output_loads_back() {
        let path = std::env::temp_dir().join(format!("marcha_csv_{}.csv", std::process::id()));
        let samples: Vec<SensorSample> = (0..5).map(|i| SensorSample::at_rest(i as f64 * 0.01)).collect();
        write_samples_csv(&path, &samples).unwrap();
        let loaded = load_samples_from_csv(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded[4].accel, [0.0, 0.0, 1.0]);
    }
}
