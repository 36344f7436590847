// crates/oxidz80/src/registers.rs - Register file del Z80
use oxide_core::InterruptMode;

const BC: usize = 0;
const DE: usize = 1;
const HL: usize = 2;

#[inline]
fn hi(v: u16) -> u8 {
    (v >> 8) as u8
}

#[inline]
fn lo(v: u16) -> u8 {
    v as u8
}

#[inline]
fn with_hi(v: u16, b: u8) -> u16 {
    (v & 0x00FF) | ((b as u16) << 8)
}

#[inline]
fn with_lo(v: u16, b: u8) -> u16 {
    (v & 0xFF00) | b as u16
}

/// Z80 register file.
///
/// AF and the BC/DE/HL group each have two banks; `EX AF,AF'` and `EXX`
/// only flip the bank selector, so exactly one bank of each is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    af: [u16; 2],
    af_bank: usize,
    pairs: [[u16; 3]; 2],
    pair_bank: usize,
    pub ix: u16,
    pub iy: u16,
    pub sp: u16,
    pub pc: u16,
    pub i: u8,
    pub r: u8,
    pub iff1: bool,
    pub iff2: bool,
    pub im: InterruptMode,
}

impl Default for Registers {
    fn default() -> Self {
        Self::power_on()
    }
}

impl Registers {
    /// Estado tras RESET: PC=0, interrupciones deshabilitadas, IM 0.
    pub fn power_on() -> Self {
        Self {
            af: [0xFFFF; 2],
            af_bank: 0,
            pairs: [[0; 3]; 2],
            pair_bank: 0,
            ix: 0,
            iy: 0,
            sp: 0xFFFF,
            pc: 0,
            i: 0,
            r: 0,
            iff1: false,
            iff2: false,
            im: InterruptMode::Im0,
        }
    }

    // --- Pares de 16 bits ---
    #[inline] pub fn af(&self) -> u16 { self.af[self.af_bank] }
    #[inline] pub fn bc(&self) -> u16 { self.pairs[self.pair_bank][BC] }
    #[inline] pub fn de(&self) -> u16 { self.pairs[self.pair_bank][DE] }
    #[inline] pub fn hl(&self) -> u16 { self.pairs[self.pair_bank][HL] }
    #[inline] pub fn set_af(&mut self, v: u16) { self.af[self.af_bank] = v; }
    #[inline] pub fn set_bc(&mut self, v: u16) { self.pairs[self.pair_bank][BC] = v; }
    #[inline] pub fn set_de(&mut self, v: u16) { self.pairs[self.pair_bank][DE] = v; }
    #[inline] pub fn set_hl(&mut self, v: u16) { self.pairs[self.pair_bank][HL] = v; }

    // --- Registros de 8 bits ---
    #[inline] pub fn a(&self) -> u8 { hi(self.af()) }
    #[inline] pub fn f(&self) -> u8 { lo(self.af()) }
    #[inline] pub fn b(&self) -> u8 { hi(self.bc()) }
    #[inline] pub fn c(&self) -> u8 { lo(self.bc()) }
    #[inline] pub fn d(&self) -> u8 { hi(self.de()) }
    #[inline] pub fn e(&self) -> u8 { lo(self.de()) }
    #[inline] pub fn h(&self) -> u8 { hi(self.hl()) }
    #[inline] pub fn l(&self) -> u8 { lo(self.hl()) }
    #[inline] pub fn set_a(&mut self, v: u8) { self.set_af(with_hi(self.af(), v)); }
    #[inline] pub fn set_f(&mut self, v: u8) { self.set_af(with_lo(self.af(), v)); }
    #[inline] pub fn set_b(&mut self, v: u8) { self.set_bc(with_hi(self.bc(), v)); }
    #[inline] pub fn set_c(&mut self, v: u8) { self.set_bc(with_lo(self.bc(), v)); }
    #[inline] pub fn set_d(&mut self, v: u8) { self.set_de(with_hi(self.de(), v)); }
    #[inline] pub fn set_e(&mut self, v: u8) { self.set_de(with_lo(self.de(), v)); }
    #[inline] pub fn set_h(&mut self, v: u8) { self.set_hl(with_hi(self.hl(), v)); }
    #[inline] pub fn set_l(&mut self, v: u8) { self.set_hl(with_lo(self.hl(), v)); }

    /// EX AF,AF'
    pub fn ex_af(&mut self) {
        self.af_bank ^= 1;
    }

    /// EXX: cambia BC, DE y HL por el banco alternativo.
    pub fn exx(&mut self) {
        self.pair_bank ^= 1;
    }

    // --- Banco inactivo (depuración y tests) ---
    pub fn af_shadow(&self) -> u16 { self.af[self.af_bank ^ 1] }
    pub fn bc_shadow(&self) -> u16 { self.pairs[self.pair_bank ^ 1][BC] }
    pub fn de_shadow(&self) -> u16 { self.pairs[self.pair_bank ^ 1][DE] }
    pub fn hl_shadow(&self) -> u16 { self.pairs[self.pair_bank ^ 1][HL] }
    pub fn set_af_shadow(&mut self, v: u16) { self.af[self.af_bank ^ 1] = v; }
    pub fn set_bc_shadow(&mut self, v: u16) { self.pairs[self.pair_bank ^ 1][BC] = v; }
    pub fn set_de_shadow(&mut self, v: u16) { self.pairs[self.pair_bank ^ 1][DE] = v; }
    pub fn set_hl_shadow(&mut self, v: u16) { self.pairs[self.pair_bank ^ 1][HL] = v; }

    /// Incrementa los 7 bits bajos de R; el bit 7 sólo cambia con LD R,A.
    #[inline]
    pub(crate) fn refresh(&mut self, count: u8) {
        self.r = (self.r & 0x80) | (self.r.wrapping_add(count) & 0x7F);
    }
}
