use std::fs;
use std::path::Path;
use thiserror::Error;

pub mod address_space;
pub mod channel;
pub mod hooks;
pub mod irq;
pub mod peripheral;
pub mod region;

pub use address_space::{AddressLayout, AddressSpace, SelfTestFailure, SelfTestReport};
pub use channel::{CrossCpuChannel, Direction, SendOutcome};
pub use hooks::{HookError, HookFn, HookTable};
pub use irq::{
    AudioAccept, AudioContext, AudioLine, AudioVector, CpuId, InterruptController,
    InterruptMode, InterruptRequest, MainAccept,
};
pub use peripheral::{AudioSink, NullAudio, NullVideo, VideoSink};
pub use region::{
    Access, Endian, MemoryRegion, RegionClass, RegionInfo, RegisterHandler, SharedHandler,
};

// ============================================================================
//  CONTRACTS (TRAITS)
// ============================================================================

/// Estado de ejecución de una CPU. `Reset` es el único estado inicial válido.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Reset,
    Running,
    Halted,
    ExceptionHandling,
}

/// Representa cualquier dispositivo capaz de ejecutar instrucciones (CPU)
pub trait Cpu {
    /// Register file exposed to debuggers and hooks.
    type Registers;

    /// Reinicio en frío (Power On). Deja la CPU en `ExecState::Reset`;
    /// el siguiente `step` ejecuta la secuencia de reset del ISA.
    fn reset(&mut self);

    /// Reinicio con acceso al bus (necesario para 68k que lee vectores de reset)
    fn reset_with_bus(&mut self, bus: &mut dyn MemoryBus) {
        let _ = bus;
        self.reset();
    }

    /// Ejecuta una instrucción o una excepción/interrupción.
    /// Retorna la cantidad de ciclos consumidos.
    fn step(&mut self, bus: &mut dyn MemoryBus, irq: &InterruptController) -> u32;

    /// Runs instructions until `budget` cycles are spent or the CPU halts.
    /// May overshoot the budget by at most one instruction.
    fn execute(
        &mut self,
        bus: &mut dyn MemoryBus,
        irq: &InterruptController,
        budget: u32,
    ) -> u32 {
        let mut consumed = 0u32;
        while consumed < budget {
            consumed = consumed.saturating_add(self.step(bus, irq));
            if matches!(self.state(), ExecState::Halted | ExecState::Reset) {
                break;
            }
        }
        consumed
    }

    fn state(&self) -> ExecState;

    /// Debugging: Obtener el Program Counter actual
    fn pc(&self) -> u32;

    fn registers(&self) -> &Self::Registers;
    fn registers_mut(&mut self) -> &mut Self::Registers;
    fn set_registers(&mut self, regs: Self::Registers);

    /// Hook invoked just before the instruction at `addr` executes.
    fn register_hook(&mut self, addr: u32, hook: HookFn<Self::Registers>)
        -> Result<(), HookError>;
    fn unregister_hook(&mut self, addr: u32) -> bool;
}

/// Kind of bus access that caused a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// No region covers the address.
    Unmapped,
    /// 16/32-bit access at an odd address on an aligned bus.
    Misaligned,
    /// Multi-byte access crossing a region boundary.
    Straddle,
    ReadOnly,
    WriteOnly,
    NoAccess,
}

/// Un acceso fallido al bus, retenido hasta que la CPU lo recoge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFault {
    pub addr: u32,
    pub kind: FaultKind,
    pub access: AccessKind,
}

/// Contrato UNIFICADO para el Bus (Memoria + I/O).
pub trait MemoryBus {
    // --- Métodos Obligatorios (Memoria) ---
    fn read(&self, addr: u32) -> u8;
    fn write(&mut self, addr: u32, val: u8);

    // --- Accesos de ancho nativo ---
    // Por defecto Big Endian (Motorola 68k). Un bus real los sobreescribe para
    // resolver el acceso completo en una sola región.
    fn read_u16(&self, addr: u32) -> u16 {
        let hi = self.read(addr) as u16;
        let lo = self.read(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    fn read_u32(&self, addr: u32) -> u32 {
        ((self.read_u16(addr) as u32) << 16) | self.read_u16(addr.wrapping_add(2)) as u32
    }

    fn write_u16(&mut self, addr: u32, val: u16) {
        self.write(addr, (val >> 8) as u8);
        self.write(addr.wrapping_add(1), (val & 0xFF) as u8);
    }

    fn write_u32(&mut self, addr: u32, val: u32) {
        self.write_u16(addr, (val >> 16) as u16);
        self.write_u16(addr.wrapping_add(2), val as u16);
    }

    // Lectura 16-bit Little Endian byte a byte (Zilog Z80)
    fn read_u16_le(&self, addr: u32) -> u16 {
        let lo = self.read(addr) as u16;
        let hi = self.read(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    // --- Métodos de I/O (Puertos) ---
    fn port_in(&mut self, _port: u16) -> u8 {
        0xFF
    } // Bus flotante devuelve FF
    fn port_out(&mut self, _port: u16, _val: u8) {} // Escritura al vacío

    // --- Bus Error Signaling ---
    /// Returns and clears the first fault latched since the last call.
    fn take_fault(&mut self) -> Option<BusFault> {
        None
    }
}

// ============================================================================
//  ERRORES DE CONFIGURACIÓN
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("region `{name}` has zero size")]
    EmptyRegion { name: String },
    #[error("region `{name}` ({start:#X}+{size:#X}) exceeds the address range (mask {mask:#X})")]
    OutOfRange {
        name: String,
        start: u32,
        size: u32,
        mask: u32,
    },
    #[error("region `{name}` overlaps existing region `{existing}`")]
    Overlap { name: String, existing: String },
    #[error("no ROM region at {base:#X}")]
    NoRomRegion { base: u32 },
    #[error("ROM image of {len} bytes does not fit at {base:#X} (region `{region}` ends at {end:#X})")]
    RomTooLarge {
        len: usize,
        base: u32,
        region: String,
        end: u32,
    },
    #[error("self-test must run before the refresh thread starts")]
    SelfTestAfterStart,
    #[error("invalid clock rate {0} Hz")]
    InvalidClock(u32),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

// ============================================================================
//  ROM LOADER (UTILIDAD)
// ============================================================================

#[derive(Error, Debug)]
pub enum RomError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ROM file is too small or empty")]
    Empty,
}

pub struct Rom {
    pub data: Vec<u8>,
}

impl Rom {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RomError> {
        let data = fs::read(path)?;
        if data.is_empty() {
            return Err(RomError::Empty);
        }
        Ok(Self { data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rom_from_file_rejects_missing_and_empty_files() {
        let dir = std::env::temp_dir().join(format!("oxide-core-rom-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        assert!(matches!(Rom::from_file(dir.join("missing.bin")), Err(RomError::Io(_))));

        let empty = dir.join("empty.bin");
        fs::write(&empty, b"").unwrap();
        assert!(matches!(Rom::from_file(&empty), Err(RomError::Empty)));

        let full = dir.join("full.bin");
        fs::write(&full, [0x4E, 0x71]).unwrap();
        assert_eq!(Rom::from_file(&full).unwrap().data, vec![0x4E, 0x71]);

        fs::remove_dir_all(&dir).unwrap();
    }
}
