use crossbeam_channel::Sender;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::types::{CueMode, VibrationCommand, NUM_CHANNELS};

#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("channel {0} outside 1..={max}", max = NUM_CHANNELS)]
    InvalidChannel(u8),

    #[error("intensity {0} outside [0, 1]")]
    InvalidIntensity(f32),

    #[error("actuator link disconnected")]
    Disconnected,
}

/// Paquete para el MCU del parche: varios canales con el mismo programa
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActuatorPacket {
    pub t_start: f64,
    pub t_end: f64,
    /// bit (canal - 1)
    pub channel_mask: u8,
    pub amplitude: f32,
    pub frequency: f32,
    pub mode: CueMode,
}

impl ActuatorPacket {
    pub fn from_command(cmd: &VibrationCommand) -> Self {
        Self {
            t_start: cmd.onset_s,
            t_end: cmd.end_s(),
            channel_mask: 1 << (cmd.channel.saturating_sub(1)),
            amplitude: cmd.intensity,
            frequency: cmd.frequency_hz,
            mode: cmd.mode,
        }
    }

    /// Agrupa comandos idénticos salvo el canal en un solo paquete
    pub fn pack(commands: &[VibrationCommand]) -> Vec<ActuatorPacket> {
        let mut packets: Vec<ActuatorPacket> = Vec::new();
        for cmd in commands {
            let packet = Self::from_command(cmd);
            match packets.iter_mut().find(|p| p.same_program(&packet)) {
                Some(existing) => existing.channel_mask |= packet.channel_mask,
                None => packets.push(packet),
            }
        }
        packets
    }

    fn same_program(&self, other: &ActuatorPacket) -> bool {
        self.t_start == other.t_start
            && self.t_end == other.t_end
            && self.amplitude == other.amplitude
            && self.frequency == other.frequency
            && self.mode == other.mode
    }

    pub fn channels(&self) -> Vec<u8> {
        (1..=NUM_CHANNELS as u8)
            .filter(|ch| self.channel_mask & (1 << (ch - 1)) != 0)
            .collect()
    }
}

/// Salida hacia el actuador físico o un sustituto
pub trait Actuator {
    fn send(&mut self, cmd: &VibrationCommand) -> Result<(), ActuatorError>;

    fn send_all(&mut self, commands: &[VibrationCommand]) -> Result<(), ActuatorError> {
        for cmd in commands {
            self.send(cmd)?;
        }
        Ok(())
    }
}

fn check(cmd: &VibrationCommand) -> Result<(), ActuatorError> {
    if cmd.channel == 0 || cmd.channel as usize > NUM_CHANNELS {
        return Err(ActuatorError::InvalidChannel(cmd.channel));
    }
    if !(0.0..=1.0).contains(&cmd.intensity) {
        return Err(ActuatorError::InvalidIntensity(cmd.intensity));
    }
    Ok(())
}

/// Registra cada comando en el log
#[derive(Default)]
pub struct ConsoleActuator {
    sent: u64,
}

impl ConsoleActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl Actuator for ConsoleActuator {
    fn send(&mut self, cmd: &VibrationCommand) -> Result<(), ActuatorError> {
        check(cmd)?;
        self.sent += 1;
        info!(
            channel = cmd.channel,
            onset_s = cmd.onset_s,
            duration_s = cmd.duration_s,
            frequency_hz = cmd.frequency_hz,
            intensity = cmd.intensity,
            mode = ?cmd.mode,
            "vibración"
        );
        Ok(())
    }
}

/// Envía paquetes a otro hilo (enlace con el MCU)
pub struct ChannelActuator {
    tx: Sender<ActuatorPacket>,
}

impl ChannelActuator {
    pub fn new(tx: Sender<ActuatorPacket>) -> Self {
        Self { tx }
    }
}

impl Actuator for ChannelActuator {
    fn send(&mut self, cmd: &VibrationCommand) -> Result<(), ActuatorError> {
        check(cmd)?;
        self.tx
            .send(ActuatorPacket::from_command(cmd))
            .map_err(|_| ActuatorError::Disconnected)
    }

    fn send_all(&mut self, commands: &[VibrationCommand]) -> Result<(), ActuatorError> {
        for cmd in commands {
            check(cmd)?;
        }
        for packet in ActuatorPacket::pack(commands) {
            self.tx.send(packet).map_err(|_| ActuatorError::Disconnected)?;
        }
        Ok(())
    }
}

/// Guarda los comandos en memoria (reproducción y pruebas)
#[derive(Default)]
pub struct RecordingActuator {
    pub commands: Vec<VibrationCommand>,
}

impl Actuator for RecordingActuator {
    fn send(&mut self, cmd: &VibrationCommand) -> Result<(), ActuatorError> {
        check(cmd)?;
        self.commands.push(*cmd);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn cmd(channel: u8, onset_s: f64) -> VibrationCommand {
        VibrationCommand {
            channel,
            onset_s,
            duration_s: 0.2,
            frequency_hz: 40.0,
            intensity: 1.0,
            mode: CueMode::Const,
        }
    }

    #[test]
    fn const_batch_packs_into_one_mask() {
        let batch: Vec<_> = (1..=4).map(|ch| cmd(ch, 2.0)).collect();
        let packets = ActuatorPacket::pack(&batch);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].channel_mask, 0b1111);
        assert_eq!(packets[0].channels(), vec![1, 2, 3, 4]);
        assert!((packets[0].t_end - 2.2).abs() < 1e-6);
    }

    #[test]
    fn staggered_batch_keeps_one_packet_per_channel() {
        let batch: Vec<_> = (1..=4).map(|ch| cmd(ch, 0.05 * ch as f64)).collect();
        let packets = ActuatorPacket::pack(&batch);
        assert_eq!(packets.len(), 4);
        assert_eq!(packets[2].channel_mask, 0b0100);
    }

    #[test]
    fn channel_actuator_reports_disconnect() {
        let (tx, rx) = unbounded();
        let mut act = ChannelActuator::new(tx);
        act.send(&cmd(1, 0.0)).unwrap();
        assert_eq!(rx.recv().unwrap().channel_mask, 1);
        drop(rx);
        assert!(matches!(act.send(&cmd(2, 0.0)), Err(ActuatorError::Disconnected)));
    }

    #[test]
    fn invalid_commands_are_refused() {
        let mut rec = RecordingActuator::default();
        assert!(matches!(rec.send(&cmd(0, 0.0)), Err(ActuatorError::InvalidChannel(0))));
        assert!(matches!(rec.send(&cmd(5, 0.0)), Err(ActuatorError::InvalidChannel(5))));
        let mut loud = cmd(1, 0.0);
        loud.intensity = 1.5;
        assert!(rec.send(&loud).is_err());
        assert!(rec.commands.is_empty());
    }
}
