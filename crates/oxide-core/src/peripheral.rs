// crates/oxide-core/src/peripheral.rs
//! Colaboradores externos que el planificador avanza: el generador de vídeo
//! y el de audio. El núcleo no dibuja píxeles ni sintetiza ondas.

use crate::RegisterHandler;

pub trait VideoSink: Send {
    fn notify_scanline(&mut self, line: u32);
    fn notify_frame_complete(&mut self);
}

pub trait AudioSink: Send {
    /// Advance sample generation by `cycles` audio-CPU cycles.
    fn generate_samples(&mut self, cycles: u32);
}

/// Video collaborator that only counts what it is told.
#[derive(Debug, Default, Clone)]
pub struct NullVideo {
    pub line: u32,
    pub frames: u64,
}

impl VideoSink for NullVideo {
    fn notify_scanline(&mut self, line: u32) {
        self.line = line;
    }

    fn notify_frame_complete(&mut self) {
        self.frames += 1;
    }
}

// Registros de vídeo sin implementar: lectura flotante, escritura ignorada.
impl RegisterHandler for NullVideo {
    fn read8(&mut self, offset: u32) -> u8 {
        log::trace!("video register read +{offset:#X}");
        0xFF
    }

    fn write8(&mut self, offset: u32, value: u8) {
        log::trace!("video register write +{offset:#X} = {value:#04X}");
    }
}

#[derive(Debug, Default, Clone)]
pub struct NullAudio {
    pub cycles: u64,
    /// Last value written to each of the chip's first 4 ports.
    pub latches: [u8; 4],
}

impl AudioSink for NullAudio {
    fn generate_samples(&mut self, cycles: u32) {
        self.cycles += cycles as u64;
    }
}

impl RegisterHandler for NullAudio {
    fn read8(&mut self, _offset: u32) -> u8 {
        // Status: never busy.
        0x00
    }

    fn write8(&mut self, offset: u32, value: u8) {
        self.latches[(offset & 3) as usize] = value;
    }
}
