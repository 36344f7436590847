// crates/oxide-core/src/region.rs
use std::fmt;
use std::sync::{Arc, Mutex};

/// Orden de bytes de las palabras en almacenamiento crudo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Motorola 68k: byte alto en la dirección baja.
    Big,
    /// Zilog Z80: byte bajo en la dirección baja.
    Little,
}

impl Endian {
    #[inline]
    pub fn join16(self, first: u8, second: u8) -> u16 {
        match self {
            Endian::Big => u16::from_be_bytes([first, second]),
            Endian::Little => u16::from_le_bytes([first, second]),
        }
    }

    #[inline]
    pub fn split16(self, v: u16) -> [u8; 2] {
        match self {
            Endian::Big => v.to_be_bytes(),
            Endian::Little => v.to_le_bytes(),
        }
    }

    /// Combines two words read at increasing addresses into a long.
    #[inline]
    pub fn join32(self, first: u16, second: u16) -> u32 {
        match self {
            Endian::Big => ((first as u32) << 16) | second as u32,
            Endian::Little => ((second as u32) << 16) | first as u32,
        }
    }

    #[inline]
    pub fn split32(self, v: u32) -> [u16; 2] {
        match self {
            Endian::Big => [(v >> 16) as u16, v as u16],
            Endian::Little => [v as u16, (v >> 16) as u16],
        }
    }
}

/// Permisos de acceso de una región.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
    None,
}

impl Access {
    pub fn readable(self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionClass {
    ProgramRom,
    WorkRam,
    VideoRam,
    SoundRam,
    DeviceRegisters,
    Expansion,
}

impl RegionClass {
    /// RAM classes are eligible for the power-on self-test.
    pub fn is_ram(self) -> bool {
        matches!(
            self,
            RegionClass::WorkRam | RegionClass::VideoRam | RegionClass::SoundRam
        )
    }
}

/// Registros de un periférico mapeados en memoria (trampolines de lectura/escritura).
///
/// El bus llama a estos métodos de forma síncrona durante el acceso de la CPU;
/// `offset` es relativo al inicio de la región. Los accesos de 16 bits se
/// componen por defecto con dos accesos de 8 bits en el orden del bus.
pub trait RegisterHandler: Send {
    fn read8(&mut self, offset: u32) -> u8;
    fn write8(&mut self, offset: u32, value: u8);

    fn read16(&mut self, offset: u32, order: Endian) -> u16 {
        let first = self.read8(offset);
        let second = self.read8(offset.wrapping_add(1));
        order.join16(first, second)
    }

    fn write16(&mut self, offset: u32, value: u16, order: Endian) {
        let [first, second] = order.split16(value);
        self.write8(offset, first);
        self.write8(offset.wrapping_add(1), second);
    }
}

/// Handler compartido entre el bus y su dueño (p. ej. el planificador).
pub type SharedHandler = Arc<Mutex<dyn RegisterHandler>>;

pub(crate) enum Backing {
    Storage(Vec<u8>),
    Handler(SharedHandler),
}

/// A named, non-overlapping slice of an address space.
pub struct MemoryRegion {
    pub(crate) name: String,
    pub(crate) start: u32,
    pub(crate) size: u32,
    pub(crate) access: Access,
    pub(crate) class: RegionClass,
    pub(crate) backing: Backing,
}

impl MemoryRegion {
    /// Region backed by zero-filled owned storage.
    pub fn storage(
        name: impl Into<String>,
        start: u32,
        size: u32,
        access: Access,
        class: RegionClass,
    ) -> Self {
        Self {
            name: name.into(),
            start,
            size,
            access,
            class,
            backing: Backing::Storage(vec![0; size as usize]),
        }
    }

    /// Region whose accesses are dispatched to a peripheral.
    pub fn handler(
        name: impl Into<String>,
        start: u32,
        size: u32,
        access: Access,
        class: RegionClass,
        handler: SharedHandler,
    ) -> Self {
        Self {
            name: name.into(),
            start,
            size,
            access,
            class,
            backing: Backing::Handler(handler),
        }
    }

    #[inline]
    pub(crate) fn contains(&self, addr: u32) -> bool {
        addr.wrapping_sub(self.start) < self.size
    }

    /// Last address covered, inclusive.
    #[inline]
    pub(crate) fn end(&self) -> u32 {
        self.start + (self.size - 1)
    }

    pub(crate) fn info(&self) -> RegionInfo {
        RegionInfo {
            name: self.name.clone(),
            start: self.start,
            size: self.size,
            access: self.access,
            class: self.class,
            has_handler: matches!(self.backing, Backing::Handler(_)),
        }
    }
}

impl fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRegion")
            .field("name", &self.name)
            .field("start", &format_args!("{:#08X}", self.start))
            .field("size", &format_args!("{:#X}", self.size))
            .field("access", &self.access)
            .field("class", &self.class)
            .finish()
    }
}

/// Copia de los metadatos de una región, devuelta por `AddressSpace::resolve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    pub name: String,
    pub start: u32,
    pub size: u32,
    pub access: Access,
    pub class: RegionClass,
    pub has_handler: bool,
}
