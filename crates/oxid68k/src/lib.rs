// crates/oxid68k/src/lib.rs - Motorola 68000 Complete Implementation
use oxide_core::{
    AccessKind, BusFault, Cpu, ExecState, FaultKind, HookError, HookFn, HookTable,
    InterruptController, MemoryBus,
};

mod ops;
mod registers;

pub use registers::{Registers, Size, StatusRegister, SR_MASK};

#[cfg(test)]
mod tests;

/// Números de vector de excepción (dirección = vector * 4).
pub mod vectors {
    pub const BUS_ERROR: u8 = 2;
    pub const ADDRESS_ERROR: u8 = 3;
    pub const ILLEGAL: u8 = 4;
    pub const ZERO_DIVIDE: u8 = 5;
    pub const CHK: u8 = 6;
    pub const TRAPV: u8 = 7;
    pub const PRIVILEGE: u8 = 8;
    pub const TRACE: u8 = 9;
    pub const LINE_A: u8 = 10;
    pub const LINE_F: u8 = 11;
    pub const TRAP_BASE: u8 = 32;
}

const RESET_CYCLES: u32 = 40;
const EXCEPTION_CYCLES: u32 = 34;
const GROUP0_CYCLES: u32 = 50;
const INTERRUPT_CYCLES: u32 = 44;

/// Excepción pendiente; se procesa al principio del siguiente `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Exception {
    vector: u8,
    return_pc: u32,
    /// Bus/address errors carry the fault for the long stack frame.
    fault: Option<BusFault>,
}

pub struct Oxid68k {
    regs: Registers,
    state: ExecState,
    pending: Option<Exception>,
    double_faulted: bool,
    cycles: u32,
    ir: u16,
    instr_pc: u32,
    hooks: HookTable<Registers>,
    reset_pulses: u64,
}

impl Default for Oxid68k {
    fn default() -> Self {
        Self::new()
    }
}

impl Oxid68k {
    pub fn new() -> Self {
        Self {
            regs: Registers::power_on(),
            state: ExecState::Reset,
            pending: None,
            double_faulted: false,
            cycles: 0,
            ir: 0,
            instr_pc: 0,
            hooks: HookTable::new(),
            reset_pulses: 0,
        }
    }

    /// Times the RESET instruction has pulsed the external reset line.
    pub fn reset_pulses(&self) -> u64 {
        self.reset_pulses
    }

    pub fn is_double_faulted(&self) -> bool {
        self.double_faulted
    }

    /// Vector of the exception queued for the next step, if any.
    pub fn pending_exception(&self) -> Option<u8> {
        self.pending.map(|e| e.vector)
    }

    #[inline]
    fn fetch(&mut self, bus: &dyn MemoryBus) -> u16 {
        let v = bus.read_u16(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(2);
        v
    }
    #[inline]
    fn fetch_long(&mut self, bus: &dyn MemoryBus) -> u32 {
        let h = self.fetch(bus) as u32;
        let l = self.fetch(bus) as u32;
        (h << 16) | l
    }

    // ------------------------------------------------------------------------
    //  Excepciones
    // ------------------------------------------------------------------------

    fn queue(&mut self, exc: Exception) {
        // Group 0 faults win over anything raised by the same instruction.
        match self.pending {
            None => self.pending = Some(exc),
            Some(prev) if prev.fault.is_none() && exc.fault.is_some() => self.pending = Some(exc),
            Some(_) => {}
        }
    }

    /// TRAP, TRAPV, CHK and divide-by-zero: return to the next instruction.
    fn trap(&mut self, vector: u8) {
        self.queue(Exception {
            vector,
            return_pc: self.regs.pc,
            fault: None,
        });
    }

    /// Illegal, privilege and line A/F: return to the faulting instruction.
    fn fault_at_instruction(&mut self, vector: u8) {
        self.queue(Exception {
            vector,
            return_pc: self.instr_pc,
            fault: None,
        });
    }

    fn illegal(&mut self) {
        self.fault_at_instruction(vectors::ILLEGAL);
    }

    /// Returns `true` in supervisor mode, otherwise queues a privilege violation.
    fn require_supervisor(&mut self) -> bool {
        if !self.regs.sr.supervisor {
            self.fault_at_instruction(vectors::PRIVILEGE);
        }
        self.regs.sr.supervisor
    }

    fn bus_fault(&mut self, fault: BusFault) {
        let vector = if fault.kind == FaultKind::Misaligned {
            vectors::ADDRESS_ERROR
        } else {
            vectors::BUS_ERROR
        };
        log::debug!(
            "[Oxid68k] {:?} at {:08X} ({:?}) PC={:08X} IR={:04X}",
            fault.kind,
            fault.addr,
            fault.access,
            self.instr_pc,
            self.ir
        );
        self.queue(Exception {
            vector,
            return_pc: self.instr_pc,
            fault: Some(fault),
        });
    }

    fn double_fault(&mut self, fault: BusFault) {
        log::error!(
            "[Oxid68k] double fault: {:?} at {:08X} while processing an exception, CPU halted",
            fault.kind,
            fault.addr
        );
        self.double_faulted = true;
        self.pending = None;
        self.state = ExecState::Halted;
    }

    // Apila PC y SR (y el marco largo del grupo 0) y carga el vector.
    fn enter_exception(&mut self, bus: &mut dyn MemoryBus, vector: u8, return_pc: u32, fault: Option<BusFault>) {
        self.state = ExecState::ExceptionHandling;
        let old_sr = self.regs.sr.bits();
        self.regs.enter_supervisor();
        self.regs.sr.trace = false;
        self.push_long(bus, return_pc);
        self.push_word(bus, old_sr);
        if let Some(fault) = fault {
            let read = if fault.access == AccessKind::Read { 0x10 } else { 0 };
            let function_code = if old_sr & 0x2000 != 0 { 5 } else { 1 };
            self.push_word(bus, self.ir);
            self.push_long(bus, fault.addr);
            self.push_word(bus, read | function_code);
        }
        self.regs.pc = bus.read_u32(vector as u32 * 4);
        match bus.take_fault() {
            None => self.state = ExecState::Running,
            // Sólo un fallo dentro de un bus/address error detiene la CPU.
            Some(second) if fault.is_some() => self.double_fault(second),
            Some(second) => {
                self.state = ExecState::Running;
                self.bus_fault(second);
            }
        }
    }

    fn push_word(&mut self, bus: &mut dyn MemoryBus, v: u16) {
        self.regs.a[7] = self.regs.a[7].wrapping_sub(2);
        bus.write_u16(self.regs.a[7], v);
    }

    fn push_long(&mut self, bus: &mut dyn MemoryBus, v: u32) {
        self.regs.a[7] = self.regs.a[7].wrapping_sub(4);
        bus.write_u32(self.regs.a[7], v);
    }

    fn reset_sequence(&mut self, bus: &mut dyn MemoryBus) -> u32 {
        self.regs = Registers::power_on();
        self.regs.a[7] = bus.read_u32(0);
        self.regs.pc = bus.read_u32(4);
        if let Some(fault) = bus.take_fault() {
            self.double_fault(fault);
            return RESET_CYCLES;
        }
        self.state = ExecState::Running;
        log::info!("[Oxid68k] Reset: SSP={:08X} PC={:08X}", self.regs.a[7], self.regs.pc);
        RESET_CYCLES
    }
}

impl Cpu for Oxid68k {
    type Registers = Registers;

    fn reset(&mut self) {
        self.regs = Registers::power_on();
        self.state = ExecState::Reset;
        self.pending = None;
        self.double_faulted = false;
        self.cycles = 0;
        self.ir = 0;
        self.instr_pc = 0;
    }

    fn reset_with_bus(&mut self, bus: &mut dyn MemoryBus) {
        self.reset();
        self.reset_sequence(bus);
    }

    fn step(&mut self, bus: &mut dyn MemoryBus, irq: &InterruptController) -> u32 {
        if self.state == ExecState::Reset {
            return self.reset_sequence(bus);
        }
        if self.double_faulted {
            return 0;
        }
        if let Some(exc) = self.pending.take() {
            log::debug!("[Oxid68k] exception vector {} (return {:08X})", exc.vector, exc.return_pc);
            self.enter_exception(bus, exc.vector, exc.return_pc, exc.fault);
            return if exc.fault.is_some() { GROUP0_CYCLES } else { EXCEPTION_CYCLES };
        }
        if let Some(accept) = irq.try_accept_main(self.regs.sr.int_mask) {
            let return_pc = self.regs.pc;
            self.enter_exception(bus, accept.vector, return_pc, None);
            self.regs.sr.int_mask = accept.level;
            return INTERRUPT_CYCLES;
        }
        if self.state == ExecState::Halted {
            return 0;
        }

        self.hooks.dispatch(self.regs.pc, &mut self.regs);

        let tracing = self.regs.sr.trace;
        self.instr_pc = self.regs.pc;
        self.cycles = 0;
        let op = self.fetch(bus);
        self.ir = op;
        if let Some(fault) = bus.take_fault() {
            self.bus_fault(fault);
            return 4;
        }
        self.exec(op, bus);
        if let Some(fault) = bus.take_fault() {
            self.bus_fault(fault);
        }
        if tracing && self.pending.is_none() {
            self.trap(vectors::TRACE);
        }
        self.cycles
    }

    fn state(&self) -> ExecState {
        self.state
    }

    fn pc(&self) -> u32 {
        self.regs.pc
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
        self.hooks.register(addr, hook)
    }

    fn unregister_hook(&mut self, addr: u32) -> bool {
        self.hooks.unregister(addr)
    }
}
