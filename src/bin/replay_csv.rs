use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use marcha::actuation::{Actuator, ActuatorPacket, RecordingActuator};
use marcha::csv_loader::load_samples_from_csv;
use marcha::pipeline::{CycleOutcome, GaitPipeline};
use marcha::types::Decision;
use marcha::PipelineConfig;

struct ReplayOptions {
    config: Option<PathBuf>,
    dump_template: bool,
    dump_commands: bool,
}

fn parse_args() -> Result<(PathBuf, ReplayOptions)> {
    let mut opts = ReplayOptions {
        config: None,
        dump_template: false,
        dump_commands: false,
    };
    let mut csv_path: Option<PathBuf> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dump-template" => opts.dump_template = true,
            "--dump-commands" => opts.dump_commands = true,
            "--config" => {
                let path = args.next().ok_or_else(|| anyhow!("--config requiere una ruta"))?;
                opts.config = Some(PathBuf::from(path));
            }
            _ => {
                if csv_path.is_some() {
                    bail!("Uso: replay_csv [--config f.json] [--dump-template] [--dump-commands] <archivo.csv>");
                }
                csv_path = Some(PathBuf::from(arg));
            }
        }
    }

    let csv_path = csv_path.ok_or_else(|| anyhow!("Debes especificar un archivo CSV"))?;
    Ok((csv_path, opts))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("marcha=warn")),
        )
        .init();

    let (csv_path, opts) = parse_args()?;
    println!("🎞️  Reproduciendo marcha desde {:?}", csv_path);

    let config = match &opts.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("No se pudo cargar la configuración {:?}", path))?,
        None => PipelineConfig::default(),
    };
    let samples = load_samples_from_csv(&csv_path)?;
    let duration = samples
        .last()
        .zip(samples.first())
        .map(|(b, a)| b.timestamp_s - a.timestamp_s)
        .unwrap_or(0.0);
    println!("ℹ️  {} muestras ({:.1} s)", samples.len(), duration);

    let mut pipeline = GaitPipeline::new(config)?;
    let mut actuator = RecordingActuator::default();

    println!("\n{:>5} {:>8} {:>10} {:>10}", "ciclo", "dur (s)", "decisión", "normalidad");
    for sample in &samples {
        let out = pipeline.process(sample);
        actuator.send_all(&out.commands)?;

        match out.cycle {
            Some(CycleOutcome::Resolved {
                id,
                duration_s,
                decision,
                normality,
            }) => {
                let tag = match decision {
                    Decision::Accepted => "✓",
                    Decision::Rejected => "✗",
                };
                println!("{:>5} {:>8.3} {:>10} {:>10.3}", id, duration_s, tag, normality);
            }
            Some(CycleOutcome::Discarded(error)) => println!("    - descartado: {}", error),
            None => {}
        }
    }
    pipeline.finish();

    let report = pipeline.report();
    println!(
        "\n🥇 Aceptados {} / rechazados {} / descartados {}",
        report.accepted, report.rejected, report.discarded
    );
    println!(
        "🧬 Plantilla: {} entradas, w_paciente={:.2}, confianza={:.2}, fiabilidad={:.2}",
        report.entries, report.w_patient, report.confidence, report.reliability
    );
    println!(
        "📳 {} disparos, {} comandos",
        report.triggers,
        actuator.commands.len()
    );

    if opts.dump_template {
        let fused = pipeline.fusion().fused_template();
        let personal = pipeline.database().current_template();
        let normative = pipeline.fusion().normative();
        println!("\n📈 Plantillas ({} puntos):", fused.vector.len());
        println!("  {:>4} {:>10} {:>10} {:>10}", "%", "normativa", "personal", "fusionada");
        for (k, value) in fused.vector.iter().enumerate() {
            let p = personal
                .vector
                .get(k)
                .map(|v| format!("{:>10.3}", v))
                .unwrap_or_else(|| format!("{:>10}", "-"));
            println!("  {:>4} {:>10.3} {} {:>10.3}", k, normative[k], p, value);
        }
    }

    if opts.dump_commands {
        println!("\n🧱 Paquetes para el MCU:");
        for packet in ActuatorPacket::pack(&actuator.commands) {
            println!("  {}", serde_json::to_string(&packet)?);
        }
    }

    Ok(())
}
