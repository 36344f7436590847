// crates/oxidz80/src/lib.rs - Zilog Z80 (CPU de audio)
use oxide_core::{
    AudioAccept, AudioContext, AudioLine, AudioVector, Cpu, ExecState, HookError, HookFn,
    HookTable, InterruptController, InterruptMode, MemoryBus,
};

mod cycles;
mod registers;

pub use registers::Registers;

#[cfg(test)]
mod tests;

// ============================================================================
//  FLAGS & CONSTANTS
// ============================================================================
pub mod flags {
    pub const S: u8 = 0x80; // Sign
    pub const Z: u8 = 0x40; // Zero
    pub const Y: u8 = 0x20; // Unused/Copy bit 5
    pub const H: u8 = 0x10; // Half Carry
    pub const X: u8 = 0x08; // Unused/Copy bit 3
    pub const P: u8 = 0x04; // Parity/Overflow
    pub const N: u8 = 0x02; // Subtract
    pub const C: u8 = 0x01; // Carry
}

const PARITY_TABLE: [bool; 256] = {
    let mut t = [false; 256];
    let mut i = 0;
    while i < 256 {
        t[i] = (i as u8).count_ones() % 2 == 0;
        i += 1;
    }
    t
};

fn logic_flags(v: u8) -> u8 {
    (if v == 0 { flags::Z } else { 0 })
        | (v & flags::S)
        | (if PARITY_TABLE[v as usize] { flags::P } else { 0 })
        | (v & (flags::X | flags::Y))
}

/// Registro que sustituye a HL según el prefijo (DD = IX, FD = IY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Index {
    Hl,
    Ix,
    Iy,
}

// ============================================================================
//  Z80 CORE STRUCTURE
// ============================================================================

pub struct OxidZ80 {
    regs: Registers,
    state: ExecState,
    /// EI bloquea las maskable hasta después de la siguiente instrucción.
    ei_delay: bool,
    cycles: u32,
    instr_pc: u16,
    hooks: HookTable<Registers>,
}

impl Default for OxidZ80 {
    fn default() -> Self {
        Self::new()
    }
}

impl OxidZ80 {
    pub fn new() -> Self {
        Self {
            regs: Registers::power_on(),
            state: ExecState::Reset,
            ei_delay: false,
            cycles: 0,
            instr_pc: 0,
            hooks: HookTable::new(),
        }
    }

    // --- Helpers de Lectura ---
    #[inline(always)]
    fn fetch(&mut self, bus: &dyn MemoryBus) -> u8 {
        let val = bus.read(self.regs.pc as u32);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        val
    }

    #[inline(always)]
    fn fetch_u16(&mut self, bus: &dyn MemoryBus) -> u16 {
        let lo = self.fetch(bus) as u16;
        let hi = self.fetch(bus) as u16;
        (hi << 8) | lo
    }

    fn rd16(&self, bus: &dyn MemoryBus, addr: u16) -> u16 {
        let lo = bus.read(addr as u32) as u16;
        let hi = bus.read(addr.wrapping_add(1) as u32) as u16;
        (hi << 8) | lo
    }

    fn wr16(&self, bus: &mut dyn MemoryBus, addr: u16, v: u16) {
        bus.write(addr as u32, v as u8);
        bus.write(addr.wrapping_add(1) as u32, (v >> 8) as u8);
    }

    // --- Helpers de Stack ---
    fn push(&mut self, bus: &mut dyn MemoryBus, val: u16) {
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        bus.write(self.regs.sp as u32, (val >> 8) as u8); // Hi
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        bus.write(self.regs.sp as u32, val as u8); // Lo
    }

    fn pop(&mut self, bus: &dyn MemoryBus) -> u16 {
        let v = self.rd16(bus, self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(2);
        v
    }

    fn log_fault(&self, bus: &mut dyn MemoryBus) {
        // El Z80 no tiene excepción de bus: el fallo sólo se registra.
        if let Some(fault) = bus.take_fault() {
            log::warn!(
                "[OxidZ80] {:?} {:?} at {:04X} (PC={:04X})",
                fault.access,
                fault.kind,
                fault.addr,
                self.instr_pc
            );
        }
    }
}

// ============================================================================
//  CPU TRAIT
// ============================================================================

impl Cpu for OxidZ80 {
    type Registers = Registers;

    fn reset(&mut self) {
        self.regs = Registers::power_on();
        self.state = ExecState::Reset;
        self.ei_delay = false;
        self.cycles = 0;
        self.instr_pc = 0;
    }

    fn step(&mut self, bus: &mut dyn MemoryBus, irq: &InterruptController) -> u32 {
        if self.state == ExecState::Reset {
            self.regs = Registers::power_on();
            self.state = ExecState::Running;
            log::info!("[OxidZ80] Reset: PC=0000");
            return cycles::RESET;
        }

        let ctx = AudioContext {
            iff1: self.regs.iff1 && !self.ei_delay,
            mode: self.regs.im,
            i: self.regs.i,
        };
        self.ei_delay = false;
        if let Some(accept) = irq.try_accept_audio(ctx) {
            return self.service(bus, accept);
        }

        if self.state == ExecState::Halted {
            // HALT ejecuta NOPs internos hasta la siguiente interrupción.
            self.regs.refresh(1);
            return cycles::HALTED;
        }

        self.hooks.dispatch(self.regs.pc as u32, &mut self.regs);

        self.instr_pc = self.regs.pc;
        let opcode = self.fetch(bus);
        self.regs.refresh(1);

        match opcode {
            0xCB => {
                self.regs.refresh(1);
                let op = self.fetch(bus);
                self.cycles = cycles::cb(op);
                self.exec_cb(bus, op);
            }
            0xED => {
                self.regs.refresh(1);
                let op = self.fetch(bus);
                self.cycles = cycles::ed(op);
                self.exec_ed(bus, op);
            }
            0xDD => self.exec_index(bus, Index::Ix),
            0xFD => self.exec_index(bus, Index::Iy),
            _ => {
                self.cycles = cycles::base(opcode);
                self.exec_normal(bus, opcode, Index::Hl);
            }
        }

        self.log_fault(bus);
        self.cycles
    }

    fn state(&self) -> ExecState {
        self.state
    }

    fn pc(&self) -> u32 {
        self.regs.pc as u32
    }

    fn registers(&self) -> &Registers {
        &self.regs
    }

    fn registers_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    fn set_registers(&mut self, regs: Registers) {
        self.regs = regs;
    }

    fn register_hook(&mut self, addr: u32, hook: HookFn<Registers>) -> Result<(), HookError> {
        self.hooks.register(addr & 0xFFFF, hook)
    }

    fn unregister_hook(&mut self, addr: u32) -> bool {
        self.hooks.unregister(addr & 0xFFFF)
    }
}

// ============================================================================
//  INTERRUPT SYSTEM
// ============================================================================

impl OxidZ80 {
    fn service(&mut self, bus: &mut dyn MemoryBus, accept: AudioAccept) -> u32 {
        self.state = ExecState::ExceptionHandling;
        self.regs.refresh(1);
        let cost = match accept.line {
            AudioLine::NonMaskable => {
                // IFF2 conserva el estado previo para RETN.
                self.regs.iff1 = false;
                cycles::NMI
            }
            AudioLine::Maskable { .. } => {
                self.regs.iff1 = false;
                self.regs.iff2 = false;
                if self.regs.im == InterruptMode::Im2 { cycles::IM2 } else { cycles::IM01 }
            }
        };
        let ret = self.regs.pc;
        self.push(bus, ret);
        let target = match accept.vector {
            AudioVector::Fixed(addr) => addr,
            AudioVector::Indirect(entry) => self.rd16(bus, entry),
        };
        self.regs.pc = target;
        log::debug!("[OxidZ80] {:?} -> {:04X} (return {:04X})", accept.line, target, ret);
        self.log_fault(bus);
        self.state = ExecState::Running;
        cost
    }
}

// ============================================================================
//  OPCODE EXECUTION
// ============================================================================

impl OxidZ80 {
    fn exec_normal(&mut self, bus: &mut dyn MemoryBus, op: u8, x: Index) {
        let y = (op >> 3) & 7;
        let z = op & 7;
        let p = (op >> 4) & 3;
        match op {
            0x00 => {} // NOP
            0x08 => self.regs.ex_af(),
            0x10 => {
                // DJNZ
                let e = self.fetch(bus) as i8;
                let b = self.regs.b().wrapping_sub(1);
                self.regs.set_b(b);
                if b != 0 {
                    self.jump_rel(e);
                    self.cycles += cycles::DJNZ_TAKEN;
                }
            }
            0x18 => {
                let e = self.fetch(bus) as i8;
                self.jump_rel(e);
            }
            0x20 | 0x28 | 0x30 | 0x38 => {
                let e = self.fetch(bus) as i8;
                if self.cond(y - 4) {
                    self.jump_rel(e);
                    self.cycles += cycles::JR_TAKEN;
                }
            }

            // 16-bit Loads / Arith
            0x01 | 0x11 | 0x21 | 0x31 => {
                let v = self.fetch_u16(bus);
                self.set_rp(p, x, v);
            }
            0x09 | 0x19 | 0x29 | 0x39 => {
                let v = self.rp(p, x);
                self.add16(x, v);
            }
            0x03 | 0x13 | 0x23 | 0x33 => {
                let v = self.rp(p, x).wrapping_add(1);
                self.set_rp(p, x, v);
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                let v = self.rp(p, x).wrapping_sub(1);
                self.set_rp(p, x, v);
            }
            0x22 => {
                let a = self.fetch_u16(bus);
                let v = self.index(x);
                self.wr16(bus, a, v);
            }
            0x2A => {
                let a = self.fetch_u16(bus);
                let v = self.rd16(bus, a);
                self.set_index(x, v);
            }

            // Misc Loads
            0x02 => bus.write(self.regs.bc() as u32, self.regs.a()),
            0x12 => bus.write(self.regs.de() as u32, self.regs.a()),
            0x0A => {
                let v = bus.read(self.regs.bc() as u32);
                self.regs.set_a(v);
            }
            0x1A => {
                let v = bus.read(self.regs.de() as u32);
                self.regs.set_a(v);
            }
            0x32 => {
                let a = self.fetch_u16(bus);
                bus.write(a as u32, self.regs.a());
            }
            0x3A => {
                let a = self.fetch_u16(bus);
                let v = bus.read(a as u32);
                self.regs.set_a(v);
            }

            // Inc/Dec 8-bit
            0x34 | 0x35 => {
                let addr = self.mem_addr(bus, x) as u32;
                let v = bus.read(addr);
                let r = if op == 0x34 { self.inc(v) } else { self.dec(v) };
                bus.write(addr, r);
            }
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x3C => {
                let v = self.reg8(y, x);
                let r = self.inc(v);
                self.set_reg8(y, x, r);
            }
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x3D => {
                let v = self.reg8(y, x);
                let r = self.dec(v);
                self.set_reg8(y, x, r);
            }

            // Imm Loads
            0x36 => {
                let addr = self.mem_addr(bus, x);
                let n = self.fetch(bus);
                bus.write(addr as u32, n);
                if x != Index::Hl {
                    // LD (IX+d),n: 19 T-states, el fetch de n se solapa.
                    self.cycles -= 3;
                }
            }
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E => {
                let n = self.fetch(bus);
                self.set_reg8(y, x, n);
            }

            // Rotations
            0x07 => {
                // RLCA
                let a = self.regs.a();
                let r = a.rotate_left(1);
                self.set_acc_rotate(r, a & 0x80 != 0);
            }
            0x0F => {
                // RRCA
                let a = self.regs.a();
                let r = a.rotate_right(1);
                self.set_acc_rotate(r, a & 0x01 != 0);
            }
            0x17 => {
                // RLA
                let a = self.regs.a();
                let r = (a << 1) | self.flag(flags::C) as u8;
                self.set_acc_rotate(r, a & 0x80 != 0);
            }
            0x1F => {
                // RRA
                let a = self.regs.a();
                let r = (a >> 1) | ((self.flag(flags::C) as u8) << 7);
                self.set_acc_rotate(r, a & 0x01 != 0);
            }

            0x27 => self.daa(),
            0x2F => {
                // CPL
                let a = !self.regs.a();
                self.regs.set_a(a);
                let f = (self.regs.f() & (flags::S | flags::Z | flags::P | flags::C))
                    | flags::H
                    | flags::N
                    | (a & (flags::X | flags::Y));
                self.regs.set_f(f);
            }
            0x37 => {
                // SCF
                let f = (self.regs.f() & (flags::S | flags::Z | flags::P))
                    | flags::C
                    | (self.regs.a() & (flags::X | flags::Y));
                self.regs.set_f(f);
            }
            0x3F => {
                // CCF
                let old_c = self.flag(flags::C);
                let f = (self.regs.f() & (flags::S | flags::Z | flags::P))
                    | (if old_c { flags::H } else { flags::C })
                    | (self.regs.a() & (flags::X | flags::Y));
                self.regs.set_f(f);
            }

            0x76 => {
                self.state = ExecState::Halted;
            }

            // 8-bit Loads
            0x40..=0x7F => {
                if z == 6 {
                    // LD r,(HL): con prefijo, r sigue siendo H/L
                    let addr = self.mem_addr(bus, x);
                    let v = bus.read(addr as u32);
                    self.set_reg8(y, Index::Hl, v);
                } else if y == 6 {
                    let addr = self.mem_addr(bus, x);
                    let v = self.reg8(z, Index::Hl);
                    bus.write(addr as u32, v);
                } else {
                    let v = self.reg8(z, x);
                    self.set_reg8(y, x, v);
                }
            }

            // ALU 8-bit
            0x80..=0xBF => {
                let v = if z == 6 {
                    let addr = self.mem_addr(bus, x);
                    bus.read(addr as u32)
                } else {
                    self.reg8(z, x)
                };
                self.alu(y, v);
            }
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let v = self.fetch(bus);
                self.alu(y, v);
            }

            // Jumps / Calls
            0xC3 => self.regs.pc = self.fetch_u16(bus),
            0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => {
                let d = self.fetch_u16(bus);
                if self.cond(y) {
                    self.regs.pc = d;
                }
            }
            0xCD => {
                let dest = self.fetch_u16(bus);
                self.call(bus, dest);
            }
            0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
                let dest = self.fetch_u16(bus);
                if self.cond(y) {
                    self.call(bus, dest);
                    self.cycles += cycles::CALL_TAKEN;
                }
            }
            0xC9 => self.regs.pc = self.pop(bus),
            0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 => {
                if self.cond(y) {
                    self.regs.pc = self.pop(bus);
                    self.cycles += cycles::RET_TAKEN;
                }
            }
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                self.call(bus, y as u16 * 8);
            }
            0xE9 => self.regs.pc = self.index(x),

            // Stack
            0xC1 | 0xD1 | 0xE1 | 0xF1 => {
                let v = self.pop(bus);
                self.set_rp2(p, x, v);
            }
            0xC5 | 0xD5 | 0xE5 | 0xF5 => {
                let v = self.rp2(p, x);
                self.push(bus, v);
            }
            0xE3 => {
                // EX (SP),HL
                let sp = self.regs.sp;
                let v = self.rd16(bus, sp);
                let cur = self.index(x);
                self.wr16(bus, sp, cur);
                self.set_index(x, v);
            }
            0xF9 => self.regs.sp = self.index(x),

            // IO / Misc
            0xD3 => {
                let n = self.fetch(bus);
                let a = self.regs.a();
                bus.port_out(((a as u16) << 8) | n as u16, a);
            }
            0xDB => {
                let n = self.fetch(bus);
                let port = ((self.regs.a() as u16) << 8) | n as u16;
                let v = bus.port_in(port);
                self.regs.set_a(v);
            }
            0xD9 => self.regs.exx(),
            0xEB => {
                // EX DE,HL no se ve afectado por DD/FD
                let de = self.regs.de();
                let hl = self.regs.hl();
                self.regs.set_de(hl);
                self.regs.set_hl(de);
            }
            0xF3 => {
                self.regs.iff1 = false;
                self.regs.iff2 = false;
            }
            0xFB => {
                // EI: las interrupciones se aceptan tras la siguiente instrucción
                self.regs.iff1 = true;
                self.regs.iff2 = true;
                self.ei_delay = true;
            }
            // CB, DD, ED y FD los despacha `step`.
            _ => {}
        }
    }

    // --- PREFIX DD/FD: INDEX IX/IY ---
    fn exec_index(&mut self, bus: &mut dyn MemoryBus, x: Index) {
        let op = self.fetch(bus);
        match op {
            0xDD | 0xFD | 0xED => {
                // Un prefijo seguido de otro actúa como NOP; el siguiente
                // step decodifica el nuevo prefijo.
                self.regs.pc = self.regs.pc.wrapping_sub(1);
                self.cycles = cycles::INDEX_PREFIX;
            }
            0xCB => {
                self.regs.refresh(1);
                let d = self.fetch(bus) as i8;
                let op = self.fetch(bus);
                self.cycles = cycles::indexed_cb(op);
                self.exec_index_cb(bus, x, d, op);
            }
            _ => {
                self.regs.refresh(1);
                self.cycles = cycles::INDEX_PREFIX + cycles::base(op);
                self.exec_normal(bus, op, x);
            }
        }
    }

    // --- PREFIX CB: BITS & SHIFTS ---
    fn exec_cb(&mut self, bus: &mut dyn MemoryBus, op: u8) {
        let r = op & 7;
        let n = (op >> 3) & 7;
        let hl = self.regs.hl();
        let val = if r == 6 { bus.read(hl as u32) } else { self.reg8(r, Index::Hl) };
        let res = match op >> 6 {
            0 => self.rot_shift(n, val),
            1 => {
                // BIT n: X/Y de H en la forma (HL)
                let xy = if r == 6 { self.regs.h() } else { val };
                self.bit(n, val, xy);
                return;
            }
            2 => val & !(1 << n),
            _ => val | (1 << n),
        };
        if r == 6 {
            bus.write(hl as u32, res);
        } else {
            self.set_reg8(r, Index::Hl, res);
        }
    }

    fn exec_index_cb(&mut self, bus: &mut dyn MemoryBus, x: Index, d: i8, op: u8) {
        let addr = self.index(x).wrapping_add(d as i16 as u16);
        let n = (op >> 3) & 7;
        let val = bus.read(addr as u32);
        let res = match op >> 6 {
            0 => self.rot_shift(n, val),
            1 => {
                // Undocumented X/Y for BIT n,(IX+d) come from high byte of address
                self.bit(n, val, (addr >> 8) as u8);
                return;
            }
            2 => val & !(1 << n),
            _ => val | (1 << n),
        };
        bus.write(addr as u32, res);
        // Undocumented: Copy result to register
        let r = op & 7;
        if r != 6 {
            self.set_reg8(r, Index::Hl, res);
        }
    }

    // --- PREFIX ED: EXTENDED ---
    fn exec_ed(&mut self, bus: &mut dyn MemoryBus, op: u8) {
        let y = (op >> 3) & 7;
        let p = (op >> 4) & 3;
        match op {
            // Register I/O
            0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x70 | 0x78 => {
                // IN r,(C); r = 6 sólo afecta a los flags
                let v = bus.port_in(self.regs.bc());
                let f = (self.regs.f() & flags::C) | logic_flags(v);
                self.regs.set_f(f);
                if y != 6 {
                    self.set_reg8(y, Index::Hl, v);
                }
            }
            0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x71 | 0x79 => {
                // OUT (C),r
                let v = if y == 6 { 0 } else { self.reg8(y, Index::Hl) };
                bus.port_out(self.regs.bc(), v);
            }

            // 16-bit Arithmetic
            0x42 | 0x52 | 0x62 | 0x72 => {
                let v = self.rp(p, Index::Hl);
                self.sbc16(v);
            }
            0x4A | 0x5A | 0x6A | 0x7A => {
                let v = self.rp(p, Index::Hl);
                self.adc16(v);
            }

            // 16-bit memory loads
            0x43 | 0x53 | 0x63 | 0x73 => {
                let a = self.fetch_u16(bus);
                let v = self.rp(p, Index::Hl);
                self.wr16(bus, a, v);
            }
            0x4B | 0x5B | 0x6B | 0x7B => {
                let a = self.fetch_u16(bus);
                let v = self.rd16(bus, a);
                self.set_rp(p, Index::Hl, v);
            }

            // Negate
            0x44 | 0x4C | 0x54 | 0x5C | 0x64 | 0x6C | 0x74 | 0x7C => {
                let v = self.regs.a();
                self.regs.set_a(0);
                self.sub8(v, false, true);
            }

            // Returns
            0x45 | 0x55 | 0x65 | 0x75 | 0x4D | 0x5D | 0x6D | 0x7D => {
                // RETN / RETI
                self.regs.pc = self.pop(bus);
                self.regs.iff1 = self.regs.iff2;
            }

            // Interrupt Mode
            0x46 | 0x4E | 0x66 | 0x6E => self.regs.im = InterruptMode::Im0,
            0x56 | 0x76 => self.regs.im = InterruptMode::Im1,
            0x5E | 0x7E => self.regs.im = InterruptMode::Im2,

            // I/R Register
            0x47 => self.regs.i = self.regs.a(),
            0x4F => self.regs.r = self.regs.a(),
            0x57 => self.ld_a_special(self.regs.i),
            0x5F => self.ld_a_special(self.regs.r),

            // BCD
            0x67 => {
                // RRD
                let hl = self.regs.hl() as u32;
                let v = bus.read(hl);
                let a = self.regs.a();
                bus.write(hl, (v >> 4) | (a << 4));
                self.set_acc_digit((a & 0xF0) | (v & 0x0F));
            }
            0x6F => {
                // RLD
                let hl = self.regs.hl() as u32;
                let v = bus.read(hl);
                let a = self.regs.a();
                bus.write(hl, (v << 4) | (a & 0x0F));
                self.set_acc_digit((a & 0xF0) | (v >> 4));
            }

            // Block Transfer / Compare / I/O
            0xA0..=0xA3 | 0xA8..=0xAB | 0xB0..=0xB3 | 0xB8..=0xBB => self.block(bus, op),

            // Sin trap de instrucción ilegal: NOP de 8 T-states.
            _ => log::trace!("[OxidZ80] ED {:02X} at {:04X} executed as NOP", op, self.instr_pc),
        }
    }

    // --- UTILS & HELPERS ---

    #[inline]
    fn flag(&self, f: u8) -> bool {
        (self.regs.f() & f) != 0
    }

    fn cond(&self, cc: u8) -> bool {
        match cc & 7 {
            0 => !self.flag(flags::Z),
            1 => self.flag(flags::Z),
            2 => !self.flag(flags::C),
            3 => self.flag(flags::C),
            4 => !self.flag(flags::P),
            5 => self.flag(flags::P),
            6 => !self.flag(flags::S),
            _ => self.flag(flags::S),
        }
    }

    fn jump_rel(&mut self, e: i8) {
        self.regs.pc = self.regs.pc.wrapping_add(e as i16 as u16);
    }

    fn call(&mut self, bus: &mut dyn MemoryBus, dest: u16) {
        let ret = self.regs.pc;
        self.push(bus, ret);
        self.regs.pc = dest;
    }

    fn index(&self, x: Index) -> u16 {
        match x {
            Index::Hl => self.regs.hl(),
            Index::Ix => self.regs.ix,
            Index::Iy => self.regs.iy,
        }
    }

    fn set_index(&mut self, x: Index, v: u16) {
        match x {
            Index::Hl => self.regs.set_hl(v),
            Index::Ix => self.regs.ix = v,
            Index::Iy => self.regs.iy = v,
        }
    }

    /// (HL), o (IX+d)/(IY+d) leyendo el desplazamiento.
    fn mem_addr(&mut self, bus: &dyn MemoryBus, x: Index) -> u16 {
        if x == Index::Hl {
            return self.regs.hl();
        }
        let d = self.fetch(bus) as i8;
        self.cycles += cycles::INDEX_DISPLACEMENT;
        self.index(x).wrapping_add(d as i16 as u16)
    }

    // r: 0=B 1=C 2=D 3=E 4=H 5=L 7=A. Con prefijo H/L son IXH/IXL (IYH/IYL).
    fn reg8(&self, r: u8, x: Index) -> u8 {
        match r {
            0 => self.regs.b(),
            1 => self.regs.c(),
            2 => self.regs.d(),
            3 => self.regs.e(),
            4 => (self.index(x) >> 8) as u8,
            5 => self.index(x) as u8,
            _ => self.regs.a(),
        }
    }

    fn set_reg8(&mut self, r: u8, x: Index, v: u8) {
        match r {
            0 => self.regs.set_b(v),
            1 => self.regs.set_c(v),
            2 => self.regs.set_d(v),
            3 => self.regs.set_e(v),
            4 => {
                let cur = self.index(x);
                self.set_index(x, (cur & 0x00FF) | ((v as u16) << 8));
            }
            5 => {
                let cur = self.index(x);
                self.set_index(x, (cur & 0xFF00) | v as u16);
            }
            _ => self.regs.set_a(v),
        }
    }

    fn rp(&self, p: u8, x: Index) -> u16 {
        match p {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.index(x),
            _ => self.regs.sp,
        }
    }

    fn set_rp(&mut self, p: u8, x: Index, v: u16) {
        match p {
            0 => self.regs.set_bc(v),
            1 => self.regs.set_de(v),
            2 => self.set_index(x, v),
            _ => self.regs.sp = v,
        }
    }

    // PUSH/POP: el par 3 es AF en lugar de SP.
    fn rp2(&self, p: u8, x: Index) -> u16 {
        if p == 3 { self.regs.af() } else { self.rp(p, x) }
    }

    fn set_rp2(&mut self, p: u8, x: Index, v: u16) {
        if p == 3 {
            self.regs.set_af(v);
        } else {
            self.set_rp(p, x, v);
        }
    }

    fn set_acc_rotate(&mut self, r: u8, carry: bool) {
        self.regs.set_a(r);
        let f = (self.regs.f() & (flags::S | flags::Z | flags::P))
            | (if carry { flags::C } else { 0 })
            | (r & (flags::X | flags::Y));
        self.regs.set_f(f);
    }

    fn set_acc_digit(&mut self, a: u8) {
        self.regs.set_a(a);
        let f = (self.regs.f() & flags::C) | logic_flags(a);
        self.regs.set_f(f);
    }

    fn ld_a_special(&mut self, v: u8) {
        self.regs.set_a(v);
        let f = (self.regs.f() & flags::C)
            | (if v == 0 { flags::Z } else { 0 })
            | (v & flags::S)
            | (if self.regs.iff2 { flags::P } else { 0 })
            | (v & (flags::X | flags::Y));
        self.regs.set_f(f);
    }

    fn inc(&mut self, v: u8) -> u8 {
        let r = v.wrapping_add(1);
        let f = (self.regs.f() & flags::C)
            | (if r == 0 { flags::Z } else { 0 })
            | (r & flags::S)
            | (if (v & 0xF) == 0xF { flags::H } else { 0 })
            | (if v == 0x7F { flags::P } else { 0 })
            | (r & (flags::X | flags::Y));
        self.regs.set_f(f);
        r
    }

    fn dec(&mut self, v: u8) -> u8 {
        let r = v.wrapping_sub(1);
        let f = (self.regs.f() & flags::C)
            | flags::N
            | (if r == 0 { flags::Z } else { 0 })
            | (r & flags::S)
            | (if (v & 0xF) == 0 { flags::H } else { 0 })
            | (if v == 0x80 { flags::P } else { 0 })
            | (r & (flags::X | flags::Y));
        self.regs.set_f(f);
        r
    }

    // ALU Core
    fn alu(&mut self, op: u8, v: u8) {
        match op & 7 {
            0 => self.add8(v, false),
            1 => self.add8(v, true),
            2 => self.sub8(v, false, true),
            3 => self.sub8(v, true, true),
            4 => {
                let r = self.regs.a() & v;
                self.regs.set_a(r);
                self.regs.set_f(flags::H | logic_flags(r));
            }
            5 => {
                let r = self.regs.a() ^ v;
                self.regs.set_a(r);
                self.regs.set_f(logic_flags(r));
            }
            6 => {
                let r = self.regs.a() | v;
                self.regs.set_a(r);
                self.regs.set_f(logic_flags(r));
            }
            _ => {
                // CP: X/Y vienen del operando
                self.sub8(v, false, false);
                let f = (self.regs.f() & !(flags::X | flags::Y)) | (v & (flags::X | flags::Y));
                self.regs.set_f(f);
            }
        }
    }

    fn add8(&mut self, v: u8, with_carry: bool) {
        let a = self.regs.a();
        let c = (with_carry && self.flag(flags::C)) as u8;
        let wide = a as u16 + v as u16 + c as u16;
        let r = wide as u8;
        let h = (a & 0xF) + (v & 0xF) + c > 0xF;
        let ov = (a ^ !v) & (a ^ r) & 0x80 != 0;
        let f = (if r == 0 { flags::Z } else { 0 })
            | (r & flags::S)
            | (if h { flags::H } else { 0 })
            | (if ov { flags::P } else { 0 })
            | (if wide > 0xFF { flags::C } else { 0 })
            | (r & (flags::X | flags::Y));
        self.regs.set_f(f);
        self.regs.set_a(r);
    }

    fn sub8(&mut self, v: u8, with_carry: bool, store: bool) {
        let a = self.regs.a();
        let c = (with_carry && self.flag(flags::C)) as u8;
        let wide = a as i16 - v as i16 - c as i16;
        let r = wide as u8;
        let h = ((a & 0xF) as i16 - (v & 0xF) as i16 - c as i16) < 0;
        let ov = (a ^ v) & (a ^ r) & 0x80 != 0;
        let f = flags::N
            | (if r == 0 { flags::Z } else { 0 })
            | (r & flags::S)
            | (if h { flags::H } else { 0 })
            | (if ov { flags::P } else { 0 })
            | (if wide < 0 { flags::C } else { 0 })
            | (r & (flags::X | flags::Y));
        self.regs.set_f(f);
        if store {
            self.regs.set_a(r);
        }
    }

    // 0=RLC 1=RRC 2=RL 3=RR 4=SLA 5=SRA 6=SLL 7=SRL
    fn rot_shift(&mut self, kind: u8, v: u8) -> u8 {
        let old_c = self.flag(flags::C) as u8;
        let (r, c) = match kind {
            0 => (v.rotate_left(1), v & 0x80 != 0),
            1 => (v.rotate_right(1), v & 1 != 0),
            2 => ((v << 1) | old_c, v & 0x80 != 0),
            3 => ((v >> 1) | (old_c << 7), v & 1 != 0),
            4 => (v << 1, v & 0x80 != 0),
            5 => ((v >> 1) | (v & 0x80), v & 1 != 0),
            6 => ((v << 1) | 1, v & 0x80 != 0),
            _ => (v >> 1, v & 1 != 0),
        };
        self.regs.set_f(logic_flags(r) | (if c { flags::C } else { 0 }));
        r
    }

    fn bit(&mut self, n: u8, v: u8, xy: u8) {
        let z = (v & (1 << n)) == 0;
        let mut f = (self.regs.f() & flags::C) | flags::H | (if z { flags::Z | flags::P } else { 0 });
        if n == 7 && !z {
            f |= flags::S;
        }
        f |= xy & (flags::X | flags::Y);
        self.regs.set_f(f);
    }

    fn daa(&mut self) {
        let a = self.regs.a();
        let f = self.regs.f();
        let mut diff = 0;
        let mut carry = (f & flags::C) != 0;
        let half = (f & flags::H) != 0;
        let subtract = (f & flags::N) != 0;

        if half || (a & 0x0F) > 9 {
            diff |= 0x06;
        }
        if carry || a > 0x99 {
            diff |= 0x60;
            carry = true;
        }

        let res = if subtract { a.wrapping_sub(diff) } else { a.wrapping_add(diff) };
        let h = if subtract {
            half && (a & 0x0F) < 6
        } else {
            (a & 0x0F) > 9
        };

        let f = (if res == 0 { flags::Z } else { 0 })
            | (res & flags::S)
            | (if h { flags::H } else { 0 })
            | (if carry { flags::C } else { 0 })
            | (f & flags::N)
            | (if PARITY_TABLE[res as usize] { flags::P } else { 0 })
            | (res & (flags::X | flags::Y));
        self.regs.set_f(f);
        self.regs.set_a(res);
    }

    // 16-bit
    fn add16(&mut self, x: Index, v: u16) {
        let b = self.index(x);
        let (r, c) = b.overflowing_add(v);
        let h = (b & 0xFFF) + (v & 0xFFF) > 0xFFF;
        let f = (self.regs.f() & (flags::S | flags::Z | flags::P))
            | (if h { flags::H } else { 0 })
            | (if c { flags::C } else { 0 })
            | (((r >> 8) as u8) & (flags::X | flags::Y));
        self.regs.set_f(f);
        self.set_index(x, r);
    }

    fn sbc16(&mut self, v: u16) {
        let hl = self.regs.hl();
        let c = self.flag(flags::C) as u32;
        let wide = (hl as u32).wrapping_sub(v as u32).wrapping_sub(c);
        let res = wide as u16;
        let h = (hl & 0xFFF) < (v & 0xFFF) + c as u16;
        let overflow = (hl ^ v) & (hl ^ res) & 0x8000 != 0;
        let f = flags::N
            | (if res == 0 { flags::Z } else { 0 })
            | (((res >> 8) as u8) & flags::S)
            | (if h { flags::H } else { 0 })
            | (if overflow { flags::P } else { 0 })
            | (if (hl as u32) < v as u32 + c { flags::C } else { 0 })
            | (((res >> 8) as u8) & (flags::X | flags::Y));
        self.regs.set_f(f);
        self.regs.set_hl(res);
    }

    fn adc16(&mut self, v: u16) {
        let hl = self.regs.hl();
        let c = self.flag(flags::C) as u32;
        let wide = hl as u32 + v as u32 + c;
        let res = wide as u16;
        let h = (hl & 0xFFF) as u32 + (v & 0xFFF) as u32 + c > 0xFFF;
        let overflow = !(hl ^ v) & (hl ^ res) & 0x8000 != 0;
        let f = (if res == 0 { flags::Z } else { 0 })
            | (((res >> 8) as u8) & flags::S)
            | (if h { flags::H } else { 0 })
            | (if overflow { flags::P } else { 0 })
            | (if wide > 0xFFFF { flags::C } else { 0 })
            | (((res >> 8) as u8) & (flags::X | flags::Y)); // X/Y from high byte
        self.regs.set_f(f);
        self.regs.set_hl(res);
    }

    // Block: bit 3 = decremento, bit 4 = repetición, bits 0-1 = LD/CP/IN/OUT.
    fn block(&mut self, bus: &mut dyn MemoryBus, op: u8) {
        let step: u16 = if op & 0x08 != 0 { 0xFFFF } else { 1 };
        let repeat = op & 0x10 != 0;
        let hl = self.regs.hl();
        self.regs.set_hl(hl.wrapping_add(step));

        let again = match op & 3 {
            0 => {
                // LDI/LDD
                let v = bus.read(hl as u32);
                let de = self.regs.de();
                bus.write(de as u32, v);
                self.regs.set_de(de.wrapping_add(step));
                let bc = self.regs.bc().wrapping_sub(1);
                self.regs.set_bc(bc);
                let n = self.regs.a().wrapping_add(v);
                let f = (self.regs.f() & (flags::S | flags::Z | flags::C))
                    | (if bc != 0 { flags::P } else { 0 })
                    | (n & flags::X)
                    | ((n << 4) & flags::Y);
                self.regs.set_f(f);
                bc != 0
            }
            1 => {
                // CPI/CPD
                let v = bus.read(hl as u32);
                let a = self.regs.a();
                let res = a.wrapping_sub(v);
                let h = (a & 0xF) < (v & 0xF);
                let bc = self.regs.bc().wrapping_sub(1);
                self.regs.set_bc(bc);
                let n = res.wrapping_sub(h as u8);
                let f = flags::N
                    | (self.regs.f() & flags::C)
                    | (res & flags::S)
                    | (if res == 0 { flags::Z } else { 0 })
                    | (if h { flags::H } else { 0 })
                    | (if bc != 0 { flags::P } else { 0 })
                    | (n & flags::X)
                    | ((n << 4) & flags::Y);
                self.regs.set_f(f);
                bc != 0 && res != 0
            }
            2 => {
                // INI/IND
                let v = bus.port_in(self.regs.bc());
                bus.write(hl as u32, v);
                let b = self.regs.b().wrapping_sub(1);
                self.regs.set_b(b);
                self.set_block_io_flags(b);
                b != 0
            }
            _ => {
                // OUTI/OUTD: B se decrementa antes de poner el puerto
                let v = bus.read(hl as u32);
                let b = self.regs.b().wrapping_sub(1);
                self.regs.set_b(b);
                bus.port_out(self.regs.bc(), v);
                self.set_block_io_flags(b);
                b != 0
            }
        };

        if repeat && again {
            self.regs.pc = self.regs.pc.wrapping_sub(2);
            self.cycles += cycles::BLOCK_REPEAT;
        }
    }

    fn set_block_io_flags(&mut self, b: u8) {
        let f = (self.regs.f() & flags::C)
            | flags::N
            | (b & (flags::S | flags::X | flags::Y))
            | (if b == 0 { flags::Z } else { 0 });
        self.regs.set_f(f);
    }
}
