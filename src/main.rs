/*
Estimulación vibrotáctil de la marcha en lazo cerrado - un solo IMU en el muslo

El daemon:
1. Recibe muestras IMU (CSV grabado o marcha sintética) en un hilo de adquisición
2. Estima ángulo y fase, segmenta ciclos y mantiene la plantilla personalizada
3. Puntúa cada ciclo frente a la plantilla fusionada
4. Envía los comandos de vibración al hilo de actuación

Uso:
     ./target/release/marcha [--config marcha.json] [--mode spavib|const]
                             [--realtime] [--secs 60] [--seed 7] [archivo.csv]

Sin CSV se usa la marcha sintética. Nivel de log con RUST_LOG (p.ej. marcha=debug).
*/

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{bounded, select, tick, unbounded};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use marcha::actuation::{Actuator, ConsoleActuator};
use marcha::csv_loader::load_samples_from_csv;
use marcha::pipeline::{CycleOutcome, GaitPipeline, GaitReport};
use marcha::snapshot::TemplateSnapshot;
use marcha::source::{get_stats, start_sample_source, SampleSource};
use marcha::synthetic::{GaitProfile, SyntheticGait};
use marcha::types::{CueMode, Decision, SensorSample, VibrationCommand};
use marcha::PipelineConfig;

const SAMPLE_QUEUE: usize = 100;
const REPORT_EVERY_CYCLES: u64 = 10;
const SNAPSHOT_POLL: Duration = Duration::from_millis(500);

struct DaemonOptions {
    config: Option<PathBuf>,
    mode: Option<CueMode>,
    realtime: bool,
    secs: f64,
    seed: u64,
    csv: Option<PathBuf>,
}

fn parse_args() -> Result<DaemonOptions> {
    let mut opts = DaemonOptions {
        config: None,
        mode: None,
        realtime: false,
        secs: 60.0,
        seed: 7,
        csv: None,
    };

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().ok_or_else(|| anyhow!("--config requiere una ruta"))?;
                opts.config = Some(PathBuf::from(path));
            }
            "--mode" => {
                let mode = args.next().ok_or_else(|| anyhow!("--mode requiere spavib o const"))?;
                opts.mode = Some(mode.parse().map_err(|e: String| anyhow!(e))?);
            }
            "--secs" => {
                let secs = args.next().ok_or_else(|| anyhow!("--secs requiere un número"))?;
                opts.secs = secs.parse().context("--secs inválido")?;
            }
            "--seed" => {
                let seed = args.next().ok_or_else(|| anyhow!("--seed requiere un número"))?;
                opts.seed = seed.parse().context("--seed inválido")?;
            }
            "--realtime" => opts.realtime = true,
            _ if arg.starts_with("--") => bail!("Opción desconocida: {}", arg),
            _ => {
                if opts.csv.is_some() {
                    bail!("Uso: marcha [--config f.json] [--mode spavib|const] [--realtime] [--secs N] [--seed N] [archivo.csv]");
                }
                opts.csv = Some(PathBuf::from(arg));
            }
        }
    }

    Ok(opts)
}

fn print_report(report: &GaitReport) {
    println!(
        "📊 t={:.1}s fase={} entradas={} w_paciente={:.2} confianza={:.2} normalidad={} aceptados={} rechazados={} descartados={}",
        report.timestamp_s,
        report.phase,
        report.entries,
        report.w_patient,
        report.confidence,
        report
            .last_normality
            .map(|n| format!("{:.2}", n))
            .unwrap_or_else(|| "-".to_string()),
        report.accepted,
        report.rejected,
        report.discarded,
    );
}

fn print_snapshot(snapshot: &TemplateSnapshot) {
    println!(
        "🧬 Plantilla v{}: {} entradas, w_paciente={:.2}, confianza={:.2}, normalidad={}",
        snapshot.version,
        snapshot.fused.entries,
        snapshot.fused.w_patient,
        snapshot.confidence,
        snapshot
            .last_normality
            .map(|n| format!("{:.2}", n))
            .unwrap_or_else(|| "-".to_string()),
    );
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("marcha=info")))
        .init();

    println!("🦵 Marcha - estimulación vibrotáctil en lazo cerrado\n");

    let opts = parse_args()?;

    let mut config = match &opts.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("No se pudo cargar la configuración {:?}", path))?,
        None => PipelineConfig::default(),
    };
    if let Some(mode) = opts.mode {
        config.controller.mode = mode;
    }
    println!("🔧 Modo de estimulación: {:?}", config.controller.mode);

    let source = match &opts.csv {
        Some(path) => {
            println!("📂 Fuente: {:?}", path);
            SampleSource::Recorded(load_samples_from_csv(path)?)
        }
        None => {
            println!("🧪 Fuente: marcha sintética ({:.0} s, semilla {})", opts.secs, opts.seed);
            SampleSource::Synthetic {
                gait: SyntheticGait::new(GaitProfile::default(), opts.seed),
                secs: opts.secs,
            }
        }
    };

    let mut pipeline = GaitPipeline::new(config).context("Configuración del pipeline inválida")?;
    println!("✅ Pipeline inicializado\n");

    // Canal de muestras desde el hilo de adquisición
    let (tx, rx) = bounded::<SensorSample>(SAMPLE_QUEUE);
    let realtime = opts.realtime;
    let acquisition = std::thread::spawn(move || {
        if let Err(e) = start_sample_source(source, tx, realtime) {
            eprintln!("❌ Error en adquisición: {}", e);
        }
    });

    // Hilo de actuación: comandos por canal, plantilla leída del snapshot compartido
    let (tx_commands, rx_commands) = unbounded::<Vec<VibrationCommand>>();
    let snapshot = pipeline.snapshot_handle();

    let actuation = std::thread::spawn(move || {
        let mut actuator = ConsoleActuator::new();
        let ticker = tick(SNAPSHOT_POLL);
        let mut seen_version = 0u64;
        println!("✅ Actuador inicializado (consola)");

        loop {
            select! {
                recv(rx_commands) -> batch => {
                    match batch {
                        Ok(batch) => {
                            if let Err(e) = actuator.send_all(&batch) {
                                eprintln!("❌ Error enviando vibración: {}", e);
                            }
                        }
                        Err(_) => break,
                    }
                }
                recv(ticker) -> _ => {
                    let current = snapshot.load();
                    if current.version != seen_version {
                        seen_version = current.version;
                        print_snapshot(&current);
                    }
                }
            }
        }

        let last = snapshot.load();
        if last.version != seen_version {
            print_snapshot(&last);
        }
        println!("📳 Comandos enviados: {}", actuator.sent());
    });

    println!("🎬 Procesando marcha...\n");

    let mut resolved = 0u64;
    loop {
        select! {
            recv(rx) -> msg => {
                match msg {
                    Ok(sample) => {
                        let out = pipeline.process(&sample);

                        if !out.commands.is_empty() {
                            let _ = tx_commands.send(out.commands);
                        }

                        match out.cycle {
                            Some(CycleOutcome::Resolved { id, duration_s, decision, normality }) => {
                                resolved += 1;
                                let tag = match decision {
                                    Decision::Accepted => "ACEPTADO",
                                    Decision::Rejected => "RECHAZADO",
                                };
                                println!(
                                    "👣 Ciclo #{} ({:.2} s) {} - normalidad {:.2}",
                                    id, duration_s, tag, normality
                                );
                                if resolved % REPORT_EVERY_CYCLES == 0 {
                                    print_report(&pipeline.report());
                                }
                            }
                            Some(CycleOutcome::Discarded(error)) => {
                                println!("⚠️  Ciclo descartado: {}", error);
                            }
                            None => {}
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }

    pipeline.finish();
    let report = pipeline.report();
    drop(tx_commands);

    if acquisition.join().is_err() {
        eprintln!("❌ El hilo de adquisición terminó con pánico");
    }
    if actuation.join().is_err() {
        eprintln!("❌ El hilo de actuación terminó con pánico");
    }

    let stats = get_stats();
    println!("\n📡 Muestras recibidas: {} (cola llena {} veces)", stats.sent, stats.blocked);
    println!(
        "🏁 Resumen final:\n{}",
        serde_json::to_string_pretty(&report).context("No se pudo serializar el resumen")?
    );

    Ok(())
}
