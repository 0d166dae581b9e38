use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::Sender;
use tracing::{debug, info};

use crate::synthetic::SyntheticGait;
use crate::types::SensorSample;

/// Origen de muestras del hilo de adquisición
pub enum SampleSource {
    /// Muestras grabadas (CSV)
    Recorded(Vec<SensorSample>),
    /// Marcha sintética durante `secs` segundos
    Synthetic { gait: SyntheticGait, secs: f64 },
}

/// Estadísticas de adquisición
#[derive(Debug, Clone, Default)]
pub struct SourceStats {
    pub sent: u64,
    pub blocked: u64,
}

static SENT: AtomicU64 = AtomicU64::new(0);
static BLOCKED: AtomicU64 = AtomicU64::new(0);

/// Envía cada muestra por el canal. Con `realtime` respeta los timestamps.
/// Termina al agotar la fuente o si el receptor se cierra.
pub fn start_sample_source(source: SampleSource, tx: Sender<SensorSample>, realtime: bool) -> Result<()> {
    let samples: Box<dyn Iterator<Item = SensorSample>> = match source {
        SampleSource::Recorded(samples) => {
            info!(samples = samples.len(), "fuente: CSV");
            Box::new(samples.into_iter())
        }
        SampleSource::Synthetic { gait, secs } => {
            info!(secs, cycle_s = gait.profile().cycle_s, "fuente: marcha sintética");
            Box::new(gait.take_while(move |s| s.timestamp_s < secs))
        }
    };

    let started = Instant::now();
    let mut first_t: Option<f64> = None;

    for sample in samples {
        if realtime {
            let t0 = *first_t.get_or_insert(sample.timestamp_s);
            let due = Duration::from_secs_f64((sample.timestamp_s - t0).max(0.0));
            if let Some(wait) = due.checked_sub(started.elapsed()) {
                std::thread::sleep(wait);
            }
        }

        if tx.is_full() {
            BLOCKED.fetch_add(1, Ordering::Relaxed);
        }
        if tx.send(sample).is_err() {
            debug!("receptor cerrado, fin de adquisición");
            return Ok(());
        }
        SENT.fetch_add(1, Ordering::Relaxed);
    }

    info!(sent = SENT.load(Ordering::Relaxed), "fuente agotada");
    Ok(())
}

/// Obtiene las estadísticas actuales de adquisición
pub fn get_stats() -> SourceStats {
    SourceStats {
        sent: SENT.load(Ordering::Relaxed),
        blocked: BLOCKED.load(Ordering::Relaxed),
    }
}
