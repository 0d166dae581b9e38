//! Núcleo de estimulación vibrotáctil en lazo cerrado para la marcha:
//! ángulo del muslo y fase a partir de un IMU, plantilla personalizada
//! con rechazo de ciclos atípicos, normalidad frente a una curva de
//! referencia y disparo de cuatro canales al inicio del balanceo.

pub mod actuation;
pub mod config;
pub mod csv_loader;
pub mod cycle_segmenter;
pub mod gait_database;
pub mod normative;
pub mod phase_filter;
pub mod pipeline;
pub mod signal;
pub mod snapshot;
pub mod source;
pub mod synthetic;
pub mod template_fusion;
pub mod types;
pub mod vibro_controller;

pub use config::PipelineConfig;
pub use pipeline::{CycleOutcome, GaitPipeline, GaitReport, StepOutput};
pub use types::{AngleEstimate, CueMode, GaitPhase, SensorSample, VibrationCommand};
