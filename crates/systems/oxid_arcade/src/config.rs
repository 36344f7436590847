// crates/systems/oxid_arcade/src/config.rs
//! Configuración de la placa. Se consume una sola vez al construir el `Board`.

use oxide_core::ConfigError;
use serde::{Deserialize, Serialize};

use crate::map;

/// Revisión del hardware: fija relojes y temporización de vídeo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareVariant {
    #[default]
    Ntsc,
    Pal,
}

/// Línea por la que el canal avisa a la CPU de sonido de un byte nuevo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioMessageLine {
    #[default]
    Nmi,
    Maskable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub variant: HardwareVariant,
    pub main_clock_hz: u32,
    pub audio_clock_hz: u32,
    pub lines_per_frame: u32,
    pub frames_per_second: u32,
    pub rom_size: u32,
    pub work_ram_size: u32,
    pub sound_ram_size: u32,
    pub channel_capacity: usize,
    /// Nivel 68k del VBLANK (autovector).
    pub vblank_level: u8,
    /// Nivel 68k con el que el canal avisa a la CPU principal.
    pub message_level: u8,
    pub audio_message_line: AudioMessageLine,
    /// `None` deja la RAM sin hilo de refresco.
    pub refresh_interval_ms: Option<u64>,
    pub run_self_test: bool,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self::for_variant(HardwareVariant::Ntsc)
    }
}

impl BoardConfig {
    pub fn for_variant(variant: HardwareVariant) -> Self {
        let (main_clock_hz, audio_clock_hz, lines_per_frame, frames_per_second) = match variant {
            HardwareVariant::Ntsc => (7_670_453, 3_579_545, 262, 60),
            HardwareVariant::Pal => (7_600_489, 3_546_894, 313, 50),
        };
        Self {
            variant,
            main_clock_hz,
            audio_clock_hz,
            lines_per_frame,
            frames_per_second,
            rom_size: 0x10_0000,
            work_ram_size: 0x1_0000,
            sound_ram_size: 0x2000,
            channel_capacity: 16,
            vblank_level: 6,
            message_level: 2,
            audio_message_line: AudioMessageLine::Nmi,
            refresh_interval_ms: None,
            run_self_test: false,
        }
    }

    /// Duración nominal de un frame en milisegundos.
    pub fn frame_ms(&self) -> f64 {
        1000.0 / self.frames_per_second.max(1) as f64
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for clock in [self.main_clock_hz, self.audio_clock_hz] {
            if clock == 0 {
                return Err(ConfigError::InvalidClock(clock));
            }
        }
        if self.lines_per_frame == 0 || self.frames_per_second == 0 {
            return Err(ConfigError::Invalid(format!(
                "video timing {} lines @ {} Hz",
                self.lines_per_frame, self.frames_per_second
            )));
        }
        for (name, level) in [
            ("vblank_level", self.vblank_level),
            ("message_level", self.message_level),
        ] {
            if !(1..=7).contains(&level) {
                return Err(ConfigError::Invalid(format!(
                    "{name} {level} outside 1..=7"
                )));
            }
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel_capacity is zero".into()));
        }
        fits("rom_size", self.rom_size, map::main::ROM_WINDOW)?;
        fits("work_ram_size", self.work_ram_size, map::main::WORK_RAM_WINDOW)?;
        fits("sound_ram_size", self.sound_ram_size, map::audio::SOUND_RAM_WINDOW)?;
        Ok(())
    }
}

fn fits(name: &str, size: u32, window: u32) -> Result<(), ConfigError> {
    if size == 0 || size > window {
        return Err(ConfigError::Invalid(format!(
            "{name} {size:#X} does not fit its {window:#X} window"
        )));
    }
    Ok(())
}
