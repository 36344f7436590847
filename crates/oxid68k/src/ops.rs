// crates/oxid68k/src/ops.rs - Decodificación y ejecución de instrucciones
use crate::registers::Size;
use crate::{vectors, Oxid68k};
use oxide_core::{ExecState, MemoryBus};

/// Operando ya resuelto: los incrementos/decrementos y las palabras de
/// extensión se consumen una sola vez, aunque la instrucción lea y escriba.
#[derive(Debug, Clone, Copy)]
enum Ea {
    D(usize),
    A(usize),
    Mem(u32),
    Imm(u32),
}

// Ciclos extra por modo de direccionamiento (Dn, An, (An), (An)+, -(An),
// d16(An), d8(An,Xn), abs.W, abs.L, d16(PC), d8(PC,Xn), #imm).
const EA_CYCLES: [[u32; 12]; 2] = [
    [0, 0, 4, 4, 6, 8, 10, 8, 12, 8, 10, 4],
    [0, 0, 8, 8, 10, 12, 14, 12, 16, 12, 14, 8],
];

// Modos de control (LEA, PEA, JMP, JSR, MOVEM).
const CONTROL_CYCLES: [u32; 12] = [0, 0, 0, 0, 0, 4, 8, 4, 8, 4, 8, 0];

fn ea_index(m: u8, r: u8) -> Option<usize> {
    match m {
        0..=6 => Some(m as usize),
        7 if r <= 4 => Some(7 + r as usize),
        _ => None,
    }
}

// (A7)+ y -(A7) en tamaño byte mantienen la pila alineada.
fn step_size(r: usize, s: Size) -> u32 {
    if r == 7 && s == Size::Byte {
        2
    } else {
        s.bytes()
    }
}

fn size_from_opmode(opmode: u16) -> Size {
    match opmode & 3 {
        0 => Size::Byte,
        1 => Size::Word,
        _ => Size::Long,
    }
}

impl Oxid68k {
    // ------------------------------------------------------------------------
    //  Acceso al bus
    // ------------------------------------------------------------------------

    fn read_sz(&self, bus: &dyn MemoryBus, a: u32, s: Size) -> u32 {
        match s {
            Size::Byte => bus.read(a) as u32,
            Size::Word => bus.read_u16(a) as u32,
            Size::Long => bus.read_u32(a),
        }
    }

    fn write_sz(&self, bus: &mut dyn MemoryBus, a: u32, v: u32, s: Size) {
        match s {
            Size::Byte => bus.write(a, v as u8),
            Size::Word => bus.write_u16(a, v as u16),
            Size::Long => bus.write_u32(a, v),
        }
    }

    fn imm(&mut self, bus: &dyn MemoryBus, s: Size) -> u32 {
        match s {
            Size::Byte => (self.fetch(bus) & 0xFF) as u32,
            Size::Word => self.fetch(bus) as u32,
            Size::Long => self.fetch_long(bus),
        }
    }

    fn calc_idx(&mut self, bus: &dyn MemoryBus, base: u32) -> u32 {
        let ext = self.fetch(bus);
        let ir = ((ext >> 12) & 7) as usize;
        let ia = ext & 0x8000 != 0;
        let il = ext & 0x0800 != 0;
        let disp = (ext & 0xFF) as i8 as i32;
        let idx = if ia { self.regs.a[ir] } else { self.regs.d[ir] };
        let idx = if il { idx as i32 } else { (idx as i16) as i32 };
        (base as i32).wrapping_add(idx).wrapping_add(disp) as u32
    }

    // ------------------------------------------------------------------------
    //  Direccionamiento efectivo
    // ------------------------------------------------------------------------

    fn resolve(&mut self, bus: &dyn MemoryBus, m: u8, r: u8, s: Size) -> Ea {
        let Some(idx) = ea_index(m, r) else {
            self.illegal();
            return Ea::Imm(0);
        };
        self.cycles += EA_CYCLES[(s == Size::Long) as usize][idx];
        let rn = r as usize;
        match m {
            0 => Ea::D(rn),
            1 => Ea::A(rn),
            2 => Ea::Mem(self.regs.a[rn]),
            3 => {
                let a = self.regs.a[rn];
                self.regs.a[rn] = a.wrapping_add(step_size(rn, s));
                Ea::Mem(a)
            }
            4 => {
                let a = self.regs.a[rn].wrapping_sub(step_size(rn, s));
                self.regs.a[rn] = a;
                Ea::Mem(a)
            }
            5 => {
                let d = self.fetch(bus) as i16 as i32 as u32;
                Ea::Mem(self.regs.a[rn].wrapping_add(d))
            }
            6 => Ea::Mem(self.calc_idx(bus, self.regs.a[rn])),
            _ => match r {
                0 => Ea::Mem(self.fetch(bus) as i16 as i32 as u32),
                1 => Ea::Mem(self.fetch_long(bus)),
                2 => {
                    let base = self.regs.pc;
                    let d = self.fetch(bus) as i16 as i32 as u32;
                    Ea::Mem(base.wrapping_add(d))
                }
                3 => {
                    let base = self.regs.pc;
                    Ea::Mem(self.calc_idx(bus, base))
                }
                _ => Ea::Imm(self.imm(bus, s)),
            },
        }
    }

    /// Address of a control-mode operand; other modes are illegal.
    fn control_ea(&mut self, bus: &dyn MemoryBus, m: u8, r: u8) -> Option<u32> {
        let idx = ea_index(m, r).filter(|_| matches!(m, 2 | 5 | 6 | 7) && !(m == 7 && r == 4));
        let Some(idx) = idx else {
            self.illegal();
            return None;
        };
        self.cycles += CONTROL_CYCLES[idx];
        match self.resolve_no_cost(bus, m, r) {
            Ea::Mem(a) => Some(a),
            _ => None,
        }
    }

    fn resolve_no_cost(&mut self, bus: &dyn MemoryBus, m: u8, r: u8) -> Ea {
        let before = self.cycles;
        let ea = self.resolve(bus, m, r, Size::Long);
        self.cycles = before;
        ea
    }

    fn load(&mut self, bus: &dyn MemoryBus, ea: Ea, s: Size) -> u32 {
        match ea {
            Ea::D(n) => self.regs.d[n] & s.mask(),
            Ea::A(n) => self.regs.a[n] & s.mask(),
            Ea::Mem(a) => self.read_sz(bus, a, s),
            Ea::Imm(v) => v,
        }
    }

    fn store(&mut self, bus: &mut dyn MemoryBus, ea: Ea, s: Size, v: u32) {
        match ea {
            Ea::D(n) => self.regs.set_d(n, v, s),
            // Las escrituras de palabra a An extienden el signo.
            Ea::A(n) => {
                self.regs.a[n] = if s == Size::Word {
                    (v as i16) as i32 as u32
                } else {
                    v
                }
            }
            Ea::Mem(a) => self.write_sz(bus, a, v, s),
            Ea::Imm(_) => self.illegal(),
        }
    }

    fn read_ea(&mut self, bus: &dyn MemoryBus, m: u8, r: u8, s: Size) -> u32 {
        let ea = self.resolve(bus, m, r, s);
        self.load(bus, ea, s)
    }

    fn write_ea(&mut self, bus: &mut dyn MemoryBus, m: u8, r: u8, s: Size, v: u32) {
        let ea = self.resolve(bus, m, r, s);
        self.store(bus, ea, s, v);
    }

    /// Read-modify-write of one operand, resolving its address once.
    fn modify(
        &mut self,
        bus: &mut dyn MemoryBus,
        m: u8,
        r: u8,
        s: Size,
        f: impl FnOnce(&mut Self, u32) -> u32,
    ) {
        let ea = self.resolve(bus, m, r, s);
        if let Ea::Imm(_) = ea {
            self.illegal();
            return;
        }
        let v = self.load(bus, ea, s);
        let res = f(self, v);
        self.store(bus, ea, s, res);
    }

    // ------------------------------------------------------------------------
    //  ALU
    // ------------------------------------------------------------------------

    fn add_flags(&mut self, d: u32, s: u32, sz: Size) -> u32 {
        let m = sz.mask();
        let msb = sz.msb();
        let r = (d & m).wrapping_add(s & m) & m;
        self.regs.sr.carry = r < (d & m);
        self.regs.sr.overflow = (!(d ^ s) & (d ^ r) & msb) != 0;
        self.regs.sr.zero = r == 0;
        self.regs.sr.negative = (r & msb) != 0;
        r
    }

    fn sub_flags(&mut self, d: u32, s: u32, sz: Size) -> u32 {
        let m = sz.mask();
        let msb = sz.msb();
        let r = (d & m).wrapping_sub(s & m) & m;
        self.regs.sr.carry = (s & m) > (d & m);
        self.regs.sr.overflow = ((d ^ s) & (d ^ r) & msb) != 0;
        self.regs.sr.zero = r == 0;
        self.regs.sr.negative = (r & msb) != 0;
        r
    }

    // ADDX/SUBX: Z sólo se limpia, nunca se pone.
    fn addx_flags(&mut self, d: u32, s: u32, sz: Size) -> u32 {
        let m = sz.mask();
        let x = self.regs.sr.extend as u64;
        let wide = (d & m) as u64 + (s & m) as u64 + x;
        let res = wide as u32 & m;
        self.regs.sr.carry = wide > m as u64;
        self.regs.sr.extend = self.regs.sr.carry;
        self.regs.sr.overflow = (!(d ^ s) & (d ^ res) & sz.msb()) != 0;
        if res != 0 {
            self.regs.sr.zero = false;
        }
        self.regs.sr.negative = (res & sz.msb()) != 0;
        res
    }

    fn subx_flags(&mut self, d: u32, s: u32, sz: Size) -> u32 {
        let m = sz.mask();
        let x = self.regs.sr.extend as u32;
        let res = (d & m).wrapping_sub(s & m).wrapping_sub(x) & m;
        self.regs.sr.carry = ((s & m) as u64 + x as u64) > (d & m) as u64;
        self.regs.sr.extend = self.regs.sr.carry;
        self.regs.sr.overflow = ((d ^ s) & (d ^ res) & sz.msb()) != 0;
        if res != 0 {
            self.regs.sr.zero = false;
        }
        self.regs.sr.negative = (res & sz.msb()) != 0;
        res
    }

    fn abcd(&mut self, d: u8, s: u8) -> u8 {
        let x = self.regs.sr.extend as u8;
        let mut lo = (d & 0xF) + (s & 0xF) + x;
        let mut hi = (d >> 4) + (s >> 4);
        if lo > 9 {
            lo -= 10;
            hi += 1;
        }
        let c = hi > 9;
        if c {
            hi -= 10;
        }
        self.regs.sr.carry = c;
        self.regs.sr.extend = c;
        let r = ((hi & 0xF) << 4) | (lo & 0xF);
        if r != 0 {
            self.regs.sr.zero = false;
        }
        r
    }

    fn sbcd(&mut self, d: u8, s: u8) -> u8 {
        let x = self.regs.sr.extend as i16;
        let mut lo = (d & 0xF) as i16 - (s & 0xF) as i16 - x;
        let mut hi = (d >> 4) as i16 - (s >> 4) as i16;
        if lo < 0 {
            lo += 10;
            hi -= 1;
        }
        let c = hi < 0;
        if c {
            hi += 10;
        }
        self.regs.sr.carry = c;
        self.regs.sr.extend = c;
        let r = ((hi as u8 & 0xF) << 4) | (lo as u8 & 0xF);
        if r != 0 {
            self.regs.sr.zero = false;
        }
        r
    }

    // ------------------------------------------------------------------------
    //  Decodificación
    // ------------------------------------------------------------------------

    pub(crate) fn exec(&mut self, op: u16, bus: &mut dyn MemoryBus) {
        match (op >> 12) & 0xF {
            0x0 => self.g0(op, bus),
            0x1 => self.mov(op, bus, Size::Byte),
            0x2 => self.mov(op, bus, Size::Long),
            0x3 => self.mov(op, bus, Size::Word),
            0x4 => self.g4(op, bus),
            0x5 => self.g5(op, bus),
            0x6 => self.g6(op, bus),
            0x7 => self.moveq(op),
            0x8 => self.g8(op, bus),
            0x9 => self.addsub(op, bus, false),
            0xA => self.fault_at_instruction(vectors::LINE_A),
            0xB => self.gb(op, bus),
            0xC => self.gc(op, bus),
            0xD => self.addsub(op, bus, true),
            0xE => self.ge(op, bus),
            _ => self.fault_at_instruction(vectors::LINE_F),
        }
    }

    fn g0(&mut self, op: u16, bus: &mut dyn MemoryBus) {
        let m = ((op >> 3) & 7) as u8;
        let r = (op & 7) as u8;
        // xxxI a CCR / SR
        if matches!(op, 0x003C | 0x023C | 0x0A3C) {
            let v = self.fetch(bus) as u8;
            let ccr = self.regs.ccr();
            self.regs.set_ccr(match op {
                0x003C => ccr | v,
                0x023C => ccr & v,
                _ => ccr ^ v,
            });
            self.cycles += 20;
            return;
        }
        if matches!(op, 0x007C | 0x027C | 0x0A7C) {
            if !self.require_supervisor() {
                return;
            }
            let v = self.fetch(bus);
            let sr = self.regs.sr();
            self.regs.set_sr(match op {
                0x007C => sr | v,
                0x027C => sr & v,
                _ => sr ^ v,
            });
            self.cycles += 20;
            return;
        }
        if (op & 0x0138) == 0x0108 {
            self.movep(op, bus);
            return;
        }
        if (op & 0x0100) != 0 {
            let bit = self.regs.d[((op >> 9) & 7) as usize];
            self.bit_op(op, bus, bit, 4);
            return;
        }
        if (op & 0x0F00) == 0x0800 {
            let bit = (self.fetch(bus) & 0xFF) as u32;
            self.bit_op(op, bus, bit, 8);
            return;
        }
        let Some(sz) = Size::from_bits((op >> 6) & 3) else {
            self.illegal();
            return;
        };
        if m == 1 {
            self.illegal();
            return;
        }
        let base = match (m == 0, sz == Size::Long) {
            (true, false) => 8,
            (true, true) => 16,
            (false, false) => 12,
            (false, true) => 20,
        };
        let i = self.imm(bus, sz);
        match (op >> 9) & 7 {
            0 => self.modify(bus, m, r, sz, |cpu, d| {
                let res = d | i;
                cpu.regs.sr.set_logic(res, sz);
                res
            }),
            1 => self.modify(bus, m, r, sz, |cpu, d| {
                let res = d & i;
                cpu.regs.sr.set_logic(res, sz);
                res
            }),
            2 => self.modify(bus, m, r, sz, |cpu, d| {
                let res = cpu.sub_flags(d, i, sz);
                cpu.regs.sr.extend = cpu.regs.sr.carry;
                res
            }),
            3 => self.modify(bus, m, r, sz, |cpu, d| {
                let res = cpu.add_flags(d, i, sz);
                cpu.regs.sr.extend = cpu.regs.sr.carry;
                res
            }),
            5 => self.modify(bus, m, r, sz, |cpu, d| {
                let res = d ^ i;
                cpu.regs.sr.set_logic(res, sz);
                res
            }),
            6 => {
                let d = self.read_ea(bus, m, r, sz);
                self.sub_flags(d, i, sz);
                self.cycles += if m == 0 && sz == Size::Long { 14 } else { 8 };
                return;
            }
            _ => {
                self.illegal();
                return;
            }
        }
        self.cycles += base;
    }

    /// BTST/BCHG/BCLR/BSET. Registers use bit number mod 32, memory mod 8.
    fn bit_op(&mut self, op: u16, bus: &mut dyn MemoryBus, bit: u32, extra: u32) {
        let m = ((op >> 3) & 7) as u8;
        let r = (op & 7) as u8;
        let kind = (op >> 6) & 3;
        let (sz, width) = if m == 0 { (Size::Long, 31) } else { (Size::Byte, 7) };
        let mk = 1u32 << (bit & width);
        if kind == 0 {
            let v = self.read_ea(bus, m, r, sz);
            self.regs.sr.zero = (v & mk) == 0;
            self.cycles += extra + if m == 0 { 2 } else { 0 };
            return;
        }
        self.modify(bus, m, r, sz, |cpu, v| {
            cpu.regs.sr.zero = (v & mk) == 0;
            match kind {
                1 => v ^ mk,
                2 => v & !mk,
                _ => v | mk,
            }
        });
        self.cycles += extra + 4 + if kind == 2 && m == 0 { 2 } else { 0 };
    }

    fn movep(&mut self, op: u16, bus: &mut dyn MemoryBus) {
        let dr = ((op >> 9) & 7) as usize;
        let ar = (op & 7) as usize;
        let disp = self.fetch(bus) as i16 as i32 as u32;
        let a = self.regs.a[ar].wrapping_add(disp);
        match (op >> 6) & 7 {
            4 => {
                let h = bus.read(a) as u32;
                let l = bus.read(a.wrapping_add(2)) as u32;
                self.regs.d[dr] = (self.regs.d[dr] & 0xFFFF0000) | (h << 8) | l;
                self.cycles += 16;
            }
            5 => {
                let mut v = 0u32;
                for i in 0..4 {
                    v = (v << 8) | bus.read(a.wrapping_add(i * 2)) as u32;
                }
                self.regs.d[dr] = v;
                self.cycles += 24;
            }
            6 => {
                let v = self.regs.d[dr];
                bus.write(a, (v >> 8) as u8);
                bus.write(a.wrapping_add(2), v as u8);
                self.cycles += 16;
            }
            _ => {
                let v = self.regs.d[dr];
                for i in 0..4 {
                    bus.write(a.wrapping_add(i * 2), (v >> (24 - 8 * i)) as u8);
                }
                self.cycles += 24;
            }
        }
    }

    fn mov(&mut self, op: u16, bus: &mut dyn MemoryBus, sz: Size) {
        let sm = ((op >> 3) & 7) as u8;
        let sr = (op & 7) as u8;
        let dr = ((op >> 9) & 7) as u8;
        let dm = ((op >> 6) & 7) as u8;
        if (dm == 7 && dr > 1) || (dm == 1 && sz == Size::Byte) {
            self.illegal();
            return;
        }
        let v = self.read_ea(bus, sm, sr, sz);
        if dm != 1 {
            self.regs.sr.set_logic(v, sz);
        }
        self.write_ea(bus, dm, dr, sz, v);
        self.cycles += 4;
    }

    fn moveq(&mut self, op: u16) {
        if op & 0x0100 != 0 {
            self.illegal();
            return;
        }
        let r = ((op >> 9) & 7) as usize;
        let v = (op & 0xFF) as i8 as i32 as u32;
        self.regs.d[r] = v;
        self.regs.sr.set_logic(v, Size::Long);
        self.cycles += 4;
    }

    fn g4(&mut self, op: u16, bus: &mut dyn MemoryBus) {
        let m = ((op >> 3) & 7) as u8;
        let r = (op & 7) as u8;
        match op {
            0x4AFC => {
                self.illegal();
                return;
            }
            0x4E70 => {
                // RESET: pulsa la línea de reset externa, la CPU sigue.
                if self.require_supervisor() {
                    self.reset_pulses += 1;
                    log::debug!("[Oxid68k] RESET instruction at {:08X}", self.instr_pc);
                    self.cycles += 132;
                }
                return;
            }
            0x4E71 => {
                self.cycles += 4;
                return;
            }
            0x4E72 => {
                if !self.require_supervisor() {
                    return;
                }
                let v = self.fetch(bus);
                self.regs.set_sr(v);
                self.state = ExecState::Halted;
                self.cycles += 4;
                return;
            }
            0x4E73 => {
                if !self.require_supervisor() {
                    return;
                }
                let sr = bus.read_u16(self.regs.a[7]);
                let pc = bus.read_u32(self.regs.a[7].wrapping_add(2));
                self.regs.a[7] = self.regs.a[7].wrapping_add(6);
                self.regs.set_sr(sr);
                self.regs.pc = pc;
                self.cycles += 20;
                return;
            }
            0x4E75 => {
                self.regs.pc = bus.read_u32(self.regs.a[7]);
                self.regs.a[7] = self.regs.a[7].wrapping_add(4);
                self.cycles += 16;
                return;
            }
            0x4E76 => {
                if self.regs.sr.overflow {
                    self.trap(vectors::TRAPV);
                }
                self.cycles += 4;
                return;
            }
            0x4E77 => {
                let c = bus.read_u16(self.regs.a[7]) as u8;
                self.regs.set_ccr(c);
                self.regs.pc = bus.read_u32(self.regs.a[7].wrapping_add(2));
                self.regs.a[7] = self.regs.a[7].wrapping_add(6);
                self.cycles += 20;
                return;
            }
            _ => {}
        }
        if (op & 0xFFF0) == 0x4E60 {
            if !self.require_supervisor() {
                return;
            }
            let rg = (op & 7) as usize;
            if op & 8 != 0 {
                self.regs.a[rg] = self.regs.usp();
            } else {
                let v = self.regs.a[rg];
                self.regs.set_usp(v);
            }
            self.cycles += 4;
            return;
        }
        if (op & 0xFFF0) == 0x4E40 {
            self.trap(vectors::TRAP_BASE + (op & 0xF) as u8);
            self.cycles += 4;
            return;
        }
        if (op & 0xFFF8) == 0x4E50 {
            let rg = (op & 7) as usize;
            let d = self.fetch(bus) as i16 as i32 as u32;
            let v = self.regs.a[rg];
            self.regs.a[7] = self.regs.a[7].wrapping_sub(4);
            bus.write_u32(self.regs.a[7], v);
            self.regs.a[rg] = self.regs.a[7];
            self.regs.a[7] = self.regs.a[7].wrapping_add(d);
            self.cycles += 16;
            return;
        }
        if (op & 0xFFF8) == 0x4E58 {
            let rg = (op & 7) as usize;
            self.regs.a[7] = self.regs.a[rg];
            self.regs.a[rg] = bus.read_u32(self.regs.a[7]);
            self.regs.a[7] = self.regs.a[7].wrapping_add(4);
            self.cycles += 12;
            return;
        }
        if (op & 0xFFC0) == 0x4E80 {
            // JSR
            let Some(t) = self.control_ea(bus, m, r) else {
                return;
            };
            let ret = self.regs.pc;
            self.regs.a[7] = self.regs.a[7].wrapping_sub(4);
            bus.write_u32(self.regs.a[7], ret);
            self.regs.pc = t;
            self.cycles += 16;
            return;
        }
        if (op & 0xFFC0) == 0x4EC0 {
            // JMP
            if let Some(t) = self.control_ea(bus, m, r) {
                self.regs.pc = t;
                self.cycles += 8;
            }
            return;
        }
        // EXT se comprueba antes que MOVEM: comparten codificación con modo 0.
        if (op & 0xFFB8) == 0x4880 {
            let rg = (op & 7) as usize;
            if op & 0x0040 == 0 {
                let v = (self.regs.d[rg] as i8) as i16 as u16;
                self.regs.d[rg] = (self.regs.d[rg] & 0xFFFF0000) | v as u32;
                self.regs.sr.set_logic(v as u32, Size::Word);
            } else {
                let v = (self.regs.d[rg] as i16) as i32 as u32;
                self.regs.d[rg] = v;
                self.regs.sr.set_logic(v, Size::Long);
            }
            self.cycles += 4;
            return;
        }
        if (op & 0xFB80) == 0x4880 {
            self.movem(op, bus);
            return;
        }
        if (op & 0xFFF8) == 0x4840 {
            let rg = (op & 7) as usize;
            let v = self.regs.d[rg].rotate_left(16);
            self.regs.d[rg] = v;
            self.regs.sr.set_logic(v, Size::Long);
            self.cycles += 4;
            return;
        }
        if (op & 0xFFC0) == 0x4840 {
            // PEA
            if let Some(a) = self.control_ea(bus, m, r) {
                self.regs.a[7] = self.regs.a[7].wrapping_sub(4);
                bus.write_u32(self.regs.a[7], a);
                self.cycles += 12;
            }
            return;
        }
        if (op & 0xF1C0) == 0x41C0 {
            let ar = ((op >> 9) & 7) as usize;
            if let Some(a) = self.control_ea(bus, m, r) {
                self.regs.a[ar] = a;
                self.cycles += 4;
            }
            return;
        }
        if (op & 0xF1C0) == 0x4180 {
            let dr = ((op >> 9) & 7) as usize;
            let bnd = self.read_ea(bus, m, r, Size::Word) as i16;
            let v = self.regs.d[dr] as i16;
            if v < 0 {
                self.regs.sr.negative = true;
                self.trap(vectors::CHK);
            } else if v > bnd {
                self.regs.sr.negative = false;
                self.trap(vectors::CHK);
            }
            self.cycles += 10;
            return;
        }
        let Some(sz) = Size::from_bits((op >> 6) & 3) else {
            self.g4_word_ops(op, bus, m, r);
            return;
        };
        match (op >> 8) & 0xF {
            // NEGX = 0 - d - X
            0x0 => self.modify(bus, m, r, sz, |cpu, d| cpu.subx_flags(0, d, sz)),
            0x2 => {
                self.modify(bus, m, r, sz, |_, _| 0);
                self.regs.sr.set_logic(0, sz);
            }
            0x4 => self.modify(bus, m, r, sz, |cpu, d| {
                let res = cpu.sub_flags(0, d, sz);
                cpu.regs.sr.extend = cpu.regs.sr.carry;
                res
            }),
            0x6 => self.modify(bus, m, r, sz, |cpu, d| {
                let res = !d & sz.mask();
                cpu.regs.sr.set_logic(res, sz);
                res
            }),
            0x8 if sz == Size::Byte => {
                self.modify(bus, m, r, Size::Byte, |cpu, d| cpu.sbcd(0, d as u8) as u32);
                self.cycles += 2;
            }
            0xA => {
                let v = self.read_ea(bus, m, r, sz);
                self.regs.sr.set_logic(v, sz);
            }
            _ => {
                self.illegal();
                return;
            }
        }
        self.cycles += if sz == Size::Long { 6 } else { 4 };
    }

    // Tamaño 11 en el grupo 4: MOVE from/to SR/CCR y TAS.
    fn g4_word_ops(&mut self, op: u16, bus: &mut dyn MemoryBus, m: u8, r: u8) {
        match (op >> 8) & 0xF {
            0x0 => {
                let v = self.regs.sr();
                self.write_ea(bus, m, r, Size::Word, v as u32);
                self.cycles += 8;
            }
            0x4 => {
                let v = self.read_ea(bus, m, r, Size::Word);
                self.regs.set_ccr(v as u8);
                self.cycles += 12;
            }
            0x6 => {
                if !self.require_supervisor() {
                    return;
                }
                let v = self.read_ea(bus, m, r, Size::Word) as u16;
                self.regs.set_sr(v);
                self.cycles += 12;
            }
            0xA => {
                self.modify(bus, m, r, Size::Byte, |cpu, v| {
                    cpu.regs.sr.set_logic(v, Size::Byte);
                    v | 0x80
                });
                self.cycles += 4;
            }
            _ => self.illegal(),
        }
    }

    fn movem(&mut self, op: u16, bus: &mut dyn MemoryBus) {
        let to_regs = (op & 0x0400) != 0;
        let sz = if op & 0x0040 != 0 { Size::Long } else { Size::Word };
        let m = ((op >> 3) & 7) as u8;
        let r = (op & 7) as usize;
        // La máscara va justo tras el opcode, antes de las extensiones del EA.
        let mask = self.fetch(bus);
        let base = match (m, to_regs) {
            (3, true) | (4, false) => self.regs.a[r],
            (_, true) if m == 7 && (r == 2 || r == 3) => {
                let Ea::Mem(a) = self.resolve_no_cost(bus, m, r as u8) else {
                    return;
                };
                a
            }
            (_, _) if m == 7 && r >= 2 => {
                self.illegal();
                return;
            }
            _ => match self.control_ea(bus, m, r as u8) {
                Some(a) => a,
                None => return,
            },
        };
        let mut a = base;
        if to_regs {
            for i in 0..16 {
                if mask & (1 << i) != 0 {
                    let v = if sz == Size::Word {
                        (bus.read_u16(a) as i16) as i32 as u32
                    } else {
                        bus.read_u32(a)
                    };
                    if i < 8 {
                        self.regs.d[i] = v;
                    } else {
                        self.regs.a[i - 8] = v;
                    }
                    a = a.wrapping_add(sz.bytes());
                }
            }
            if m == 3 {
                self.regs.a[r] = a;
            }
        } else if m == 4 {
            // Predecremento: bit 0 = A7 ... bit 15 = D0.
            for i in 0..16 {
                if mask & (1 << i) != 0 {
                    a = a.wrapping_sub(sz.bytes());
                    let v = if i < 8 { self.regs.a[7 - i] } else { self.regs.d[15 - i] };
                    self.write_sz(bus, a, v, sz);
                }
            }
            self.regs.a[r] = a;
        } else {
            for i in 0..16 {
                if mask & (1 << i) != 0 {
                    let v = if i < 8 { self.regs.d[i] } else { self.regs.a[i - 8] };
                    self.write_sz(bus, a, v, sz);
                    a = a.wrapping_add(sz.bytes());
                }
            }
        }
        self.cycles += 8 + mask.count_ones() * if sz == Size::Long { 8 } else { 4 };
    }

    fn g5(&mut self, op: u16, bus: &mut dyn MemoryBus) {
        let m = ((op >> 3) & 7) as u8;
        let r = (op & 7) as u8;
        let Some(sz) = Size::from_bits((op >> 6) & 3) else {
            let cc = ((op >> 8) & 0xF) as u8;
            if m == 1 {
                // DBcc
                let disp = self.fetch(bus) as i16 as i32 as u32;
                if self.regs.sr.test(cc) {
                    self.cycles += 12;
                    return;
                }
                let rn = r as usize;
                let v = (self.regs.d[rn] as u16).wrapping_sub(1);
                self.regs.d[rn] = (self.regs.d[rn] & 0xFFFF0000) | v as u32;
                if v != 0xFFFF {
                    self.regs.pc = self.regs.pc.wrapping_sub(2).wrapping_add(disp);
                    self.cycles += 10;
                } else {
                    self.cycles += 14;
                }
            } else {
                let v = if self.regs.sr.test(cc) { 0xFF } else { 0x00 };
                self.write_ea(bus, m, r, Size::Byte, v);
                self.cycles += if m == 0 { 6 } else { 8 };
            }
            return;
        };
        let q = match (op >> 9) & 7 {
            0 => 8,
            n => n as u32,
        };
        let subtract = (op & 0x0100) != 0;
        if m == 1 {
            if sz == Size::Byte {
                self.illegal();
                return;
            }
            let a = self.regs.a[r as usize];
            self.regs.a[r as usize] = if subtract { a.wrapping_sub(q) } else { a.wrapping_add(q) };
            self.cycles += 8;
            return;
        }
        self.modify(bus, m, r, sz, |cpu, d| {
            let res = if subtract {
                cpu.sub_flags(d, q, sz)
            } else {
                cpu.add_flags(d, q, sz)
            };
            cpu.regs.sr.extend = cpu.regs.sr.carry;
            res
        });
        self.cycles += match (m == 0, sz == Size::Long) {
            (true, true) => 8,
            (true, false) => 4,
            (false, true) => 12,
            (false, false) => 8,
        };
    }

    fn g6(&mut self, op: u16, bus: &mut dyn MemoryBus) {
        let cc = ((op >> 8) & 0xF) as u8;
        let base = self.regs.pc;
        let d8 = (op & 0xFF) as i8 as i32;
        let disp = if d8 == 0 { self.fetch(bus) as i16 as i32 } else { d8 } as u32;
        let target = base.wrapping_add(disp);
        match cc {
            0 => {
                self.regs.pc = target;
                self.cycles += 10;
            }
            1 => {
                let ret = self.regs.pc;
                self.regs.a[7] = self.regs.a[7].wrapping_sub(4);
                bus.write_u32(self.regs.a[7], ret);
                self.regs.pc = target;
                self.cycles += 18;
            }
            _ if self.regs.sr.test(cc) => {
                self.regs.pc = target;
                self.cycles += 10;
            }
            _ => self.cycles += if d8 == 0 { 12 } else { 8 },
        }
    }

    fn g8(&mut self, op: u16, bus: &mut dyn MemoryBus) {
        let dr = ((op >> 9) & 7) as usize;
        let m = ((op >> 3) & 7) as u8;
        let r = (op & 7) as u8;
        match (op >> 6) & 7 {
            opmode @ 0..=2 => {
                let sz = size_from_opmode(opmode);
                let s = self.read_ea(bus, m, r, sz);
                let res = self.regs.d[dr] | s;
                self.regs.set_d(dr, res, sz);
                self.regs.sr.set_logic(res, sz);
                self.cycles += if sz == Size::Long { 6 } else { 4 };
            }
            3 => {
                let div = self.read_ea(bus, m, r, Size::Word);
                if div == 0 {
                    self.trap(vectors::ZERO_DIVIDE);
                    self.cycles += 38;
                    return;
                }
                let dvd = self.regs.d[dr];
                let q = dvd / div;
                let rm = dvd % div;
                self.regs.sr.carry = false;
                if q > 0xFFFF {
                    self.regs.sr.overflow = true;
                } else {
                    self.regs.sr.overflow = false;
                    self.regs.sr.zero = q == 0;
                    self.regs.sr.negative = (q & 0x8000) != 0;
                    self.regs.d[dr] = (rm << 16) | (q & 0xFFFF);
                }
                self.cycles += 140;
            }
            4 if m <= 1 => {
                let ry = r as usize;
                if m == 1 {
                    self.regs.a[ry] = self.regs.a[ry].wrapping_sub(step_size(ry, Size::Byte));
                    self.regs.a[dr] = self.regs.a[dr].wrapping_sub(step_size(dr, Size::Byte));
                    let s = bus.read(self.regs.a[ry]);
                    let d = bus.read(self.regs.a[dr]);
                    let res = self.sbcd(d, s);
                    bus.write(self.regs.a[dr], res);
                    self.cycles += 18;
                } else {
                    let s = self.regs.d[ry] as u8;
                    let d = self.regs.d[dr] as u8;
                    let res = self.sbcd(d, s);
                    self.regs.set_d(dr, res as u32, Size::Byte);
                    self.cycles += 6;
                }
            }
            opmode @ 4..=6 => {
                let sz = size_from_opmode(opmode);
                let s = self.regs.d[dr];
                self.modify(bus, m, r, sz, |cpu, d| {
                    let res = s | d;
                    cpu.regs.sr.set_logic(res, sz);
                    res
                });
                self.cycles += if sz == Size::Long { 12 } else { 8 };
            }
            _ => {
                let div = self.read_ea(bus, m, r, Size::Word) as i16 as i32;
                if div == 0 {
                    self.trap(vectors::ZERO_DIVIDE);
                    self.cycles += 38;
                    return;
                }
                let dvd = self.regs.d[dr] as i32;
                let q = dvd.wrapping_div(div);
                let rm = dvd.wrapping_rem(div);
                self.regs.sr.carry = false;
                if !(-32768..=32767).contains(&q) {
                    self.regs.sr.overflow = true;
                } else {
                    self.regs.sr.overflow = false;
                    self.regs.sr.zero = q == 0;
                    self.regs.sr.negative = q < 0;
                    self.regs.d[dr] = ((rm as u32 & 0xFFFF) << 16) | (q as u32 & 0xFFFF);
                }
                self.cycles += 158;
            }
        }
    }

    /// Grupos 9 (SUB) y D (ADD): misma geometría, distinta operación.
    fn addsub(&mut self, op: u16, bus: &mut dyn MemoryBus, add: bool) {
        let dr = ((op >> 9) & 7) as usize;
        let m = ((op >> 3) & 7) as u8;
        let r = (op & 7) as u8;
        let alu = move |cpu: &mut Self, d: u32, s: u32, sz: Size| {
            let res = if add {
                cpu.add_flags(d, s, sz)
            } else {
                cpu.sub_flags(d, s, sz)
            };
            cpu.regs.sr.extend = cpu.regs.sr.carry;
            res
        };
        match (op >> 6) & 7 {
            opmode @ 0..=2 => {
                let sz = size_from_opmode(opmode);
                if m == 1 && sz == Size::Byte {
                    self.illegal();
                    return;
                }
                let s = self.read_ea(bus, m, r, sz);
                let d = self.regs.d[dr];
                let res = alu(self, d, s, sz);
                self.regs.set_d(dr, res, sz);
                self.cycles += if sz == Size::Long { 6 } else { 4 };
            }
            opmode @ (3 | 7) => {
                // ADDA/SUBA: sin flags, operando de palabra con signo.
                let s = if opmode == 3 {
                    self.read_ea(bus, m, r, Size::Word) as i16 as i32 as u32
                } else {
                    self.read_ea(bus, m, r, Size::Long)
                };
                let a = self.regs.a[dr];
                self.regs.a[dr] = if add { a.wrapping_add(s) } else { a.wrapping_sub(s) };
                self.cycles += 8;
            }
            opmode => {
                let sz = size_from_opmode(opmode);
                if m <= 1 {
                    self.extended(op, bus, sz, add);
                    return;
                }
                let s = self.regs.d[dr];
                self.modify(bus, m, r, sz, |cpu, d| alu(cpu, d, s, sz));
                self.cycles += if sz == Size::Long { 12 } else { 8 };
            }
        }
    }

    // ADDX/SUBX, registro a registro o -(Ay),-(Ax).
    fn extended(&mut self, op: u16, bus: &mut dyn MemoryBus, sz: Size, add: bool) {
        let rx = ((op >> 9) & 7) as usize;
        let ry = (op & 7) as usize;
        let (s, d) = if op & 8 != 0 {
            self.regs.a[ry] = self.regs.a[ry].wrapping_sub(step_size(ry, sz));
            self.regs.a[rx] = self.regs.a[rx].wrapping_sub(step_size(rx, sz));
            let s = self.read_sz(bus, self.regs.a[ry], sz);
            let d = self.read_sz(bus, self.regs.a[rx], sz);
            (s, d)
        } else {
            (self.regs.d[ry], self.regs.d[rx])
        };
        let res = if add {
            self.addx_flags(d, s, sz)
        } else {
            self.subx_flags(d, s, sz)
        };
        if op & 8 != 0 {
            self.write_sz(bus, self.regs.a[rx], res, sz);
            self.cycles += if sz == Size::Long { 30 } else { 18 };
        } else {
            self.regs.set_d(rx, res, sz);
            self.cycles += if sz == Size::Long { 8 } else { 4 };
        }
    }

    fn gb(&mut self, op: u16, bus: &mut dyn MemoryBus) {
        let dr = ((op >> 9) & 7) as usize;
        let m = ((op >> 3) & 7) as u8;
        let r = (op & 7) as u8;
        match (op >> 6) & 7 {
            opmode @ 0..=2 => {
                let sz = size_from_opmode(opmode);
                let s = self.read_ea(bus, m, r, sz);
                let d = self.regs.d[dr];
                self.sub_flags(d, s, sz);
                self.cycles += if sz == Size::Long { 6 } else { 4 };
            }
            opmode @ (3 | 7) => {
                let s = if opmode == 3 {
                    self.read_ea(bus, m, r, Size::Word) as i16 as i32 as u32
                } else {
                    self.read_ea(bus, m, r, Size::Long)
                };
                let d = self.regs.a[dr];
                self.sub_flags(d, s, Size::Long);
                self.cycles += 6;
            }
            opmode => {
                let sz = size_from_opmode(opmode);
                if m == 1 {
                    // CMPM (Ay)+,(Ax)+
                    let ay = r as usize;
                    let s = self.read_sz(bus, self.regs.a[ay], sz);
                    self.regs.a[ay] = self.regs.a[ay].wrapping_add(step_size(ay, sz));
                    let d = self.read_sz(bus, self.regs.a[dr], sz);
                    self.regs.a[dr] = self.regs.a[dr].wrapping_add(step_size(dr, sz));
                    self.sub_flags(d, s, sz);
                    self.cycles += if sz == Size::Long { 20 } else { 12 };
                } else {
                    let s = self.regs.d[dr];
                    self.modify(bus, m, r, sz, |cpu, d| {
                        let res = s ^ d;
                        cpu.regs.sr.set_logic(res, sz);
                        res
                    });
                    self.cycles += if m == 0 && sz != Size::Long { 4 } else { 8 };
                }
            }
        }
    }

    fn gc(&mut self, op: u16, bus: &mut dyn MemoryBus) {
        let dr = ((op >> 9) & 7) as usize;
        let m = ((op >> 3) & 7) as u8;
        let r = (op & 7) as u8;
        let ry = r as usize;
        match ((op >> 6) & 7, m) {
            (opmode @ 0..=2, _) => {
                let sz = size_from_opmode(opmode);
                let s = self.read_ea(bus, m, r, sz);
                let res = self.regs.d[dr] & s;
                self.regs.set_d(dr, res, sz);
                self.regs.sr.set_logic(res, sz);
                self.cycles += if sz == Size::Long { 6 } else { 4 };
            }
            (3, _) => {
                let s = self.read_ea(bus, m, r, Size::Word);
                let res = s * (self.regs.d[dr] & 0xFFFF);
                self.regs.d[dr] = res;
                self.regs.sr.set_logic(res, Size::Long);
                self.cycles += 70;
            }
            (7, _) => {
                let s = self.read_ea(bus, m, r, Size::Word) as i16 as i32;
                let d = self.regs.d[dr] as i16 as i32;
                let res = s.wrapping_mul(d) as u32;
                self.regs.d[dr] = res;
                self.regs.sr.set_logic(res, Size::Long);
                self.cycles += 70;
            }
            (4, 0) => {
                let s = self.regs.d[ry] as u8;
                let d = self.regs.d[dr] as u8;
                let res = self.abcd(d, s);
                self.regs.set_d(dr, res as u32, Size::Byte);
                self.cycles += 6;
            }
            (4, 1) => {
                self.regs.a[ry] = self.regs.a[ry].wrapping_sub(step_size(ry, Size::Byte));
                self.regs.a[dr] = self.regs.a[dr].wrapping_sub(step_size(dr, Size::Byte));
                let s = bus.read(self.regs.a[ry]);
                let d = bus.read(self.regs.a[dr]);
                let res = self.abcd(d, s);
                bus.write(self.regs.a[dr], res);
                self.cycles += 18;
            }
            (5, 0) => {
                self.regs.d.swap(dr, ry);
                self.cycles += 6;
            }
            (5, 1) => {
                self.regs.a.swap(dr, ry);
                self.cycles += 6;
            }
            (6, 1) => {
                std::mem::swap(&mut self.regs.d[dr], &mut self.regs.a[ry]);
                self.cycles += 6;
            }
            (opmode, _) => {
                let sz = size_from_opmode(opmode);
                let s = self.regs.d[dr];
                self.modify(bus, m, r, sz, |cpu, d| {
                    let res = s & d;
                    cpu.regs.sr.set_logic(res, sz);
                    res
                });
                self.cycles += if sz == Size::Long { 12 } else { 8 };
            }
        }
    }

    fn ge(&mut self, op: u16, bus: &mut dyn MemoryBus) {
        let Some(sz) = Size::from_bits((op >> 6) & 3) else {
            // Desplazamiento de memoria, una posición, tamaño palabra.
            if op & 0x0800 != 0 {
                self.illegal();
                return;
            }
            let m = ((op >> 3) & 7) as u8;
            let r = (op & 7) as u8;
            let left = (op & 0x0100) != 0;
            let ty = (op >> 9) & 3;
            self.modify(bus, m, r, Size::Word, |cpu, v| cpu.shift(ty, v, 1, left, Size::Word));
            self.cycles += 8;
            return;
        };
        let left = (op & 0x0100) != 0;
        let ty = (op >> 3) & 3;
        let rg = (op & 7) as usize;
        let cnt = if (op & 0x0020) != 0 {
            self.regs.d[((op >> 9) & 7) as usize] % 64
        } else {
            match (op >> 9) & 7 {
                0 => 8,
                c => c as u32,
            }
        };
        let v = self.regs.d[rg] & sz.mask();
        let res = self.shift(ty, v, cnt, left, sz);
        self.regs.set_d(rg, res, sz);
        self.cycles += (if sz == Size::Long { 8 } else { 6 }) + 2 * cnt;
    }

    fn shift(&mut self, ty: u16, v: u32, cnt: u32, left: bool, sz: Size) -> u32 {
        match ty {
            0 => self.asx(v, cnt, left, sz),
            1 => self.lsx(v, cnt, left, sz),
            2 => self.roxx(v, cnt, left, sz),
            _ => self.rox(v, cnt, left, sz),
        }
    }

    fn asx(&mut self, v: u32, c: u32, l: bool, sz: Size) -> u32 {
        if c == 0 {
            self.regs.sr.carry = false;
            self.regs.sr.overflow = false;
            self.regs.sr.set_nz(v, sz);
            return v;
        }
        let m = sz.mask();
        let msb = sz.msb();
        let mut x = v & m;
        let mut car = false;
        let mut ov = false;
        if l {
            for _ in 0..c {
                car = (x & msb) != 0;
                let om = x & msb;
                x = (x << 1) & m;
                if (x & msb) != om {
                    ov = true;
                }
            }
        } else {
            let sign = v & msb;
            for _ in 0..c {
                car = (x & 1) != 0;
                x = (x >> 1) | sign;
            }
        }
        self.regs.sr.carry = car;
        self.regs.sr.extend = car;
        self.regs.sr.overflow = ov;
        self.regs.sr.set_nz(x, sz);
        x
    }

    fn lsx(&mut self, v: u32, c: u32, l: bool, sz: Size) -> u32 {
        if c == 0 {
            self.regs.sr.carry = false;
            self.regs.sr.overflow = false;
            self.regs.sr.set_nz(v, sz);
            return v;
        }
        let m = sz.mask();
        let bits = sz.bits();
        let (res, car) = if c > bits {
            (0, false)
        } else if l {
            let wide = (v as u64) << c;
            (wide as u32 & m, (wide >> bits) & 1 != 0)
        } else {
            let car = (v as u64 >> (c - 1)) & 1 != 0;
            (((v as u64) >> c) as u32 & m, car)
        };
        self.regs.sr.carry = car;
        self.regs.sr.extend = car;
        self.regs.sr.overflow = false;
        self.regs.sr.set_nz(res, sz);
        res
    }

    fn roxx(&mut self, v: u32, c: u32, l: bool, sz: Size) -> u32 {
        let m = sz.mask();
        let msb = sz.msb();
        let c = c % (sz.bits() + 1);
        if c == 0 {
            self.regs.sr.carry = self.regs.sr.extend;
            self.regs.sr.overflow = false;
            self.regs.sr.set_nz(v, sz);
            return v;
        }
        let mut x = v & m;
        let mut ext = self.regs.sr.extend;
        for _ in 0..c {
            if l {
                let out = (x & msb) != 0;
                x = ((x << 1) | ext as u32) & m;
                ext = out;
            } else {
                let out = (x & 1) != 0;
                x = (x >> 1) | if ext { msb } else { 0 };
                ext = out;
            }
        }
        self.regs.sr.carry = ext;
        self.regs.sr.extend = ext;
        self.regs.sr.overflow = false;
        self.regs.sr.set_nz(x, sz);
        x
    }

    fn rox(&mut self, v: u32, c: u32, l: bool, sz: Size) -> u32 {
        let m = sz.mask();
        let msb = sz.msb();
        let bits = sz.bits();
        if c == 0 {
            self.regs.sr.carry = false;
            self.regs.sr.overflow = false;
            self.regs.sr.set_nz(v, sz);
            return v;
        }
        let shift = c % bits;
        let x = v & m;
        let res = match (shift, l) {
            (0, _) => x,
            (s, true) => ((x << s) | (x >> (bits - s))) & m,
            (s, false) => ((x >> s) | (x << (bits - s))) & m,
        };
        // El último bit que sale queda en el bit 0 (ROL) o en el MSB (ROR).
        self.regs.sr.carry = if l { (res & 1) != 0 } else { (res & msb) != 0 };
        self.regs.sr.overflow = false;
        self.regs.sr.set_nz(res, sz);
        res
    }
}
