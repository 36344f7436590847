// crates/oxid68k/src/registers.rs - Register file del Motorola 68000

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Size {
    Byte = 1,
    Word = 2,
    Long = 4,
}

impl Size {
    #[inline]
    pub fn bytes(&self) -> u32 {
        *self as u32
    }
    #[inline]
    pub fn bits(&self) -> u32 {
        self.bytes() * 8
    }
    #[inline]
    pub fn mask(&self) -> u32 {
        match self {
            Size::Byte => 0xFF,
            Size::Word => 0xFFFF,
            Size::Long => 0xFFFFFFFF,
        }
    }
    #[inline]
    pub fn msb(&self) -> u32 {
        match self {
            Size::Byte => 0x80,
            Size::Word => 0x8000,
            Size::Long => 0x80000000,
        }
    }
    /// Standard two-bit size field (00 byte, 01 word, 10 long).
    pub fn from_bits(b: u16) -> Option<Self> {
        match b & 3 {
            0 => Some(Size::Byte),
            1 => Some(Size::Word),
            2 => Some(Size::Long),
            _ => None,
        }
    }
}

/// Implemented bits of the 68000 status register.
pub const SR_MASK: u16 = 0xA71F;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatusRegister {
    pub trace: bool,
    pub supervisor: bool,
    pub int_mask: u8,
    pub extend: bool,
    pub negative: bool,
    pub zero: bool,
    pub overflow: bool,
    pub carry: bool,
}

impl StatusRegister {
    /// Valor tras RESET: supervisor, interrupciones enmascaradas (0x2700).
    pub fn power_on() -> Self {
        Self {
            supervisor: true,
            int_mask: 7,
            ..Default::default()
        }
    }
    pub fn bits(&self) -> u16 {
        (self.carry as u16)
            | (self.overflow as u16) << 1
            | (self.zero as u16) << 2
            | (self.negative as u16) << 3
            | (self.extend as u16) << 4
            | ((self.int_mask as u16 & 7) << 8)
            | (self.supervisor as u16) << 13
            | (self.trace as u16) << 15
    }
    pub fn from_bits(v: u16) -> Self {
        let mut sr = Self {
            int_mask: ((v >> 8) & 7) as u8,
            supervisor: v & 0x2000 != 0,
            trace: v & 0x8000 != 0,
            ..Default::default()
        };
        sr.set_ccr(v as u8);
        sr
    }
    pub fn ccr(&self) -> u8 {
        self.bits() as u8 & 0x1F
    }
    pub fn set_ccr(&mut self, v: u8) {
        self.carry = v & 1 != 0;
        self.overflow = v & 2 != 0;
        self.zero = v & 4 != 0;
        self.negative = v & 8 != 0;
        self.extend = v & 16 != 0;
    }
    #[inline]
    pub fn set_nz(&mut self, v: u32, s: Size) {
        self.zero = (v & s.mask()) == 0;
        self.negative = (v & s.msb()) != 0;
    }
    #[inline]
    pub fn set_logic(&mut self, v: u32, s: Size) {
        self.set_nz(v, s);
        self.overflow = false;
        self.carry = false;
    }
    pub fn test(&self, cc: u8) -> bool {
        match cc & 0xF {
            0 => true,
            1 => false,
            2 => !self.carry && !self.zero,
            3 => self.carry || self.zero,
            4 => !self.carry,
            5 => self.carry,
            6 => !self.zero,
            7 => self.zero,
            8 => !self.overflow,
            9 => self.overflow,
            10 => !self.negative,
            11 => self.negative,
            12 => self.negative == self.overflow,
            13 => self.negative != self.overflow,
            14 => !self.zero && self.negative == self.overflow,
            _ => self.zero || self.negative != self.overflow,
        }
    }
}

/// Register file visible al programa.
///
/// `a[7]` es siempre el puntero de pila activo. El puntero del otro modo se
/// guarda en la sombra correspondiente (`usp` en supervisor, `ssp` en usuario);
/// por eso el SR sólo se cambia con [`Registers::set_sr`], que intercambia las
/// pilas cuando cambia el bit S.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub d: [u32; 8],
    pub a: [u32; 8],
    pub pc: u32,
    pub(crate) sr: StatusRegister,
    pub(crate) usp: u32,
    pub(crate) ssp: u32,
}

impl Default for Registers {
    fn default() -> Self {
        Self::power_on()
    }
}

impl Registers {
    pub fn power_on() -> Self {
        Self {
            d: [0; 8],
            a: [0; 8],
            pc: 0,
            sr: StatusRegister::power_on(),
            usp: 0,
            ssp: 0,
        }
    }

    pub fn sr(&self) -> u16 {
        self.sr.bits()
    }

    pub fn status(&self) -> StatusRegister {
        self.sr
    }

    pub fn set_sr(&mut self, v: u16) {
        let was_supervisor = self.sr.supervisor;
        self.sr = StatusRegister::from_bits(v & SR_MASK);
        match (was_supervisor, self.sr.supervisor) {
            (false, true) => {
                self.usp = self.a[7];
                self.a[7] = self.ssp;
            }
            (true, false) => {
                self.ssp = self.a[7];
                self.a[7] = self.usp;
            }
            _ => {}
        }
    }

    pub fn ccr(&self) -> u8 {
        self.sr.ccr()
    }

    pub fn set_ccr(&mut self, v: u8) {
        self.sr.set_ccr(v);
    }

    pub fn supervisor(&self) -> bool {
        self.sr.supervisor
    }

    pub fn usp(&self) -> u32 {
        if self.sr.supervisor {
            self.usp
        } else {
            self.a[7]
        }
    }

    pub fn set_usp(&mut self, v: u32) {
        if self.sr.supervisor {
            self.usp = v;
        } else {
            self.a[7] = v;
        }
    }

    pub fn ssp(&self) -> u32 {
        if self.sr.supervisor {
            self.a[7]
        } else {
            self.ssp
        }
    }

    pub fn set_ssp(&mut self, v: u32) {
        if self.sr.supervisor {
            self.a[7] = v;
        } else {
            self.ssp = v;
        }
    }

    pub(crate) fn enter_supervisor(&mut self) {
        if !self.sr.supervisor {
            self.usp = self.a[7];
            self.a[7] = self.ssp;
            self.sr.supervisor = true;
        }
    }

    #[inline]
    pub(crate) fn set_d(&mut self, r: usize, v: u32, s: Size) {
        match s {
            Size::Byte => self.d[r] = (self.d[r] & 0xFFFFFF00) | (v & 0xFF),
            Size::Word => self.d[r] = (self.d[r] & 0xFFFF0000) | (v & 0xFFFF),
            Size::Long => self.d[r] = v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clearing_supervisor_swaps_stacks() {
        let mut regs = Registers::power_on();
        regs.a[7] = 0x0000_8000;
        regs.set_usp(0x0000_4000);
        regs.set_sr(0x0000);
        assert_eq!(regs.a[7], 0x4000);
        assert_eq!(regs.ssp(), 0x8000);
        regs.a[7] = 0x3FFC;
        regs.set_sr(0x2000);
        assert_eq!(regs.a[7], 0x8000);
        assert_eq!(regs.usp(), 0x3FFC);
    }

    #[test]
    fn sr_round_trips_implemented_bits_only() {
        let mut regs = Registers::power_on();
        regs.set_sr(0xFFFF);
        assert_eq!(regs.sr(), SR_MASK);
        assert_eq!(regs.ccr(), 0x1F);
        assert!(regs.status().trace);
    }
}
