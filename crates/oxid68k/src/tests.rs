use super::*;
use oxide_core::{
    Access, AddressLayout, AddressSpace, InterruptRequest, MemoryRegion, RegionClass,
};

const SSP: u32 = 0x00FF_FF00;
const ENTRY: u32 = 0x400;

fn handler(vector: u8) -> u32 {
    0x1000 + vector as u32 * 0x10
}

fn put16(rom: &mut [u8], addr: u32, v: u16) {
    rom[addr as usize..addr as usize + 2].copy_from_slice(&v.to_be_bytes());
}

fn put32(rom: &mut [u8], addr: u32, v: u32) {
    rom[addr as usize..addr as usize + 4].copy_from_slice(&v.to_be_bytes());
}

/// ROM with reset vectors, an RTE at every exception handler, and the given
/// code blocks. Returns a CPU that has already run its reset sequence.
fn setup(blocks: &[(u32, &[u16])]) -> (Oxid68k, AddressSpace, InterruptController) {
    let mut rom = vec![0u8; 0x2000];
    put32(&mut rom, 0, SSP);
    put32(&mut rom, 4, ENTRY);
    for v in 2..64u8 {
        put32(&mut rom, v as u32 * 4, handler(v));
        put16(&mut rom, handler(v), 0x4E73);
    }
    for (base, words) in blocks {
        for (i, w) in words.iter().enumerate() {
            put16(&mut rom, base + i as u32 * 2, *w);
        }
    }
    let mut bus = AddressSpace::new("main", AddressLayout::primary().with_mask(0x00FF_FFFF));
    bus.define_region(MemoryRegion::storage("rom", 0, 0x10000, Access::ReadOnly, RegionClass::ProgramRom))
        .unwrap();
    bus.define_region(MemoryRegion::storage("ram", 0xFF0000, 0x10000, Access::ReadWrite, RegionClass::WorkRam))
        .unwrap();
    bus.load_rom(&rom, 0).unwrap();
    let irq = InterruptController::new();
    let mut cpu = Oxid68k::new();
    assert_eq!(cpu.state(), ExecState::Reset);
    assert_eq!(cpu.step(&mut bus, &irq), 40);
    (cpu, bus, irq)
}

fn program(words: &[u16]) -> (Oxid68k, AddressSpace, InterruptController) {
    setup(&[(ENTRY, words)])
}

fn run(cpu: &mut Oxid68k, bus: &mut AddressSpace, irq: &InterruptController, steps: usize) {
    for _ in 0..steps {
        cpu.step(bus, irq);
    }
}

#[test]
fn reset_loads_stack_and_entry_point() {
    let (cpu, _, _) = program(&[0x4E71]);
    assert_eq!(cpu.state(), ExecState::Running);
    assert_eq!(cpu.registers().a[7], SSP);
    assert_eq!(cpu.pc(), ENTRY);
    assert_eq!(cpu.registers().sr(), 0x2700);
}

#[test]
fn reset_is_idempotent() {
    let (mut cpu, mut bus, irq) = program(&[0x7005, 0x7207]);
    run(&mut cpu, &mut bus, &irq, 2);
    cpu.reset();
    let first = *cpu.registers();
    cpu.reset();
    assert_eq!(first, *cpu.registers());
    assert_eq!(first, Registers::power_on());

    cpu.reset_with_bus(&mut bus);
    let booted = *cpu.registers();
    cpu.reset_with_bus(&mut bus);
    assert_eq!(booted, *cpu.registers());
    assert_eq!(booted.pc, ENTRY);
}

#[test]
fn odd_word_read_raises_address_error_with_long_frame() {
    // MOVEA.L #$FF0001,A0 ; MOVE.W (A0),D0
    let (mut cpu, mut bus, irq) = program(&[0x207C, 0x00FF, 0x0001, 0x3010]);
    cpu.step(&mut bus, &irq);
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.pending_exception(), Some(vectors::ADDRESS_ERROR));
    assert_eq!(cpu.step(&mut bus, &irq), 50);
    assert_eq!(cpu.pc(), handler(vectors::ADDRESS_ERROR));
    let sp = cpu.registers().a[7];
    assert_eq!(sp, SSP - 14);
    assert_eq!(bus.read32(sp + 2), 0x00FF_0001);
    assert_eq!(bus.read16(sp + 6), 0x3010);
    assert_eq!(bus.read32(sp + 10), ENTRY + 6);
}

#[test]
fn unmapped_access_raises_bus_error() {
    // MOVE.B $500000,D0
    let (mut cpu, mut bus, irq) = program(&[0x1039, 0x0050, 0x0000]);
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.pending_exception(), Some(vectors::BUS_ERROR));
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.pc(), handler(vectors::BUS_ERROR));
}

#[test]
fn illegal_opcode_stacks_faulting_pc() {
    let (mut cpu, mut bus, irq) = program(&[0x4E71, 0x4AFC]);
    run(&mut cpu, &mut bus, &irq, 3);
    assert_eq!(cpu.pc(), handler(vectors::ILLEGAL));
    let sp = cpu.registers().a[7];
    assert_eq!(sp, SSP - 6);
    assert_eq!(bus.read16(sp), 0x2700);
    assert_eq!(bus.read32(sp + 2), ENTRY + 2);
}

#[test]
fn trap_and_divide_by_zero_stack_next_pc() {
    // TRAP #1
    let (mut cpu, mut bus, irq) = program(&[0x4E41]);
    run(&mut cpu, &mut bus, &irq, 2);
    assert_eq!(cpu.pc(), handler(33));
    assert_eq!(bus.read32(cpu.registers().a[7] + 2), ENTRY + 2);

    // MOVEQ #0,D1 ; DIVU D1,D0
    let (mut cpu, mut bus, irq) = program(&[0x7200, 0x80C1]);
    run(&mut cpu, &mut bus, &irq, 3);
    assert_eq!(cpu.pc(), handler(vectors::ZERO_DIVIDE));
    assert_eq!(bus.read32(cpu.registers().a[7] + 2), ENTRY + 4);
}

#[test]
fn user_mode_sr_write_is_a_privilege_violation() {
    // MOVE #$0000,SR ; MOVE #$2700,SR
    let (mut cpu, mut bus, irq) = program(&[0x46FC, 0x0000, 0x46FC, 0x2700]);
    cpu.registers_mut().set_usp(0x00FF_8000);
    cpu.step(&mut bus, &irq);
    assert!(!cpu.registers().supervisor());
    assert_eq!(cpu.registers().a[7], 0x00FF_8000);
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.pending_exception(), Some(vectors::PRIVILEGE));
    cpu.step(&mut bus, &irq);
    assert!(cpu.registers().supervisor());
    assert_eq!(cpu.registers().a[7], SSP - 6);
    assert_eq!(cpu.registers().usp(), 0x00FF_8000);
    assert_eq!(bus.read32(SSP - 4), ENTRY + 4);
}

#[test]
fn higher_interrupt_first_then_lower_after_rte() {
    // MOVE #$2000,SR ; NOP ; NOP
    let (mut cpu, mut bus, irq) = program(&[0x46FC, 0x2000, 0x4E71, 0x4E71]);
    cpu.step(&mut bus, &irq);
    irq.raise(InterruptRequest::Main { level: 2, vector: None });
    irq.raise(InterruptRequest::Main { level: 5, vector: None });

    assert_eq!(cpu.step(&mut bus, &irq), 44);
    assert_eq!(cpu.pc(), handler(29));
    assert_eq!(cpu.registers().status().int_mask, 5);

    // RTE restores mask 0; the level-2 request is taken at the next boundary.
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.pc(), ENTRY + 4);
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.pc(), handler(26));
    assert_eq!(cpu.registers().status().int_mask, 2);
}

#[test]
fn level_seven_ignores_mask() {
    let (mut cpu, mut bus, irq) = program(&[0x4E71]);
    irq.raise(InterruptRequest::Main { level: 6, vector: None });
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.pc(), ENTRY + 2);
    irq.raise(InterruptRequest::Main { level: 7, vector: Some(64) });
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.pc(), bus.read32(64 * 4));
}

#[test]
fn stop_halts_until_interrupt() {
    // STOP #$2000
    let (mut cpu, mut bus, irq) = program(&[0x4E72, 0x2000]);
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.state(), ExecState::Halted);
    assert_eq!(cpu.step(&mut bus, &irq), 0);
    assert_eq!(cpu.execute(&mut bus, &irq, 1000), 0);

    irq.raise(InterruptRequest::Main { level: 3, vector: None });
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.state(), ExecState::Running);
    assert_eq!(cpu.pc(), handler(27));
    assert_eq!(bus.read32(cpu.registers().a[7] + 2), ENTRY + 4);
}

#[test]
fn fault_while_stacking_is_a_double_fault() {
    // MOVEA.L #$500000,A7 ; ILLEGAL
    let (mut cpu, mut bus, irq) = program(&[0x2E7C, 0x0050, 0x0000, 0x4AFC]);
    run(&mut cpu, &mut bus, &irq, 3);
    // El fallo al apilar ILLEGAL se convierte en bus error...
    assert!(!cpu.is_double_faulted());
    assert_eq!(cpu.pending_exception(), Some(vectors::BUS_ERROR));
    // ...y el bus error tampoco puede apilar su marco.
    cpu.step(&mut bus, &irq);
    assert!(cpu.is_double_faulted());
    assert_eq!(cpu.state(), ExecState::Halted);
    irq.raise(InterruptRequest::Main { level: 7, vector: None });
    assert_eq!(cpu.step(&mut bus, &irq), 0);
    cpu.reset();
    assert!(!cpu.is_double_faulted());
}

#[test]
fn stacking_fault_in_trap_becomes_bus_error() {
    // MOVEA.L #4,A7 ; TRAP #0
    // El PC cae sobre la ROM; el SR y todo lo demás, en RAM tras dar la vuelta.
    let (mut cpu, mut bus, irq) = program(&[0x2E7C, 0x0000, 0x0004, 0x4E40]);
    run(&mut cpu, &mut bus, &irq, 3);
    assert!(!cpu.is_double_faulted());
    assert_eq!(cpu.state(), ExecState::Running);
    assert_eq!(cpu.pending_exception(), Some(vectors::BUS_ERROR));

    cpu.step(&mut bus, &irq);
    assert!(!cpu.is_double_faulted());
    assert_eq!(cpu.state(), ExecState::Running);
    assert_eq!(cpu.pc(), handler(vectors::BUS_ERROR));
    let sp = cpu.registers().a[7];
    assert_eq!(bus.read32(sp + 2), 0);
    assert_eq!(bus.read32(sp + 10), ENTRY + 6);
}

#[test]
fn trace_bit_queues_trace_exception() {
    // MOVE #$A700,SR ; NOP
    let (mut cpu, mut bus, irq) = program(&[0x46FC, 0xA700, 0x4E71]);
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.pending_exception(), None);
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.pending_exception(), Some(vectors::TRACE));
}

#[test]
fn jsr_and_rts() {
    // JSR $0500.W
    let (mut cpu, mut bus, irq) = setup(&[(ENTRY, &[0x4EB8, 0x0500]), (0x500, &[0x4E75])]);
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.pc(), 0x500);
    assert_eq!(bus.read32(cpu.registers().a[7]), ENTRY + 4);
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.pc(), ENTRY + 4);
    assert_eq!(cpu.registers().a[7], SSP);
}

#[test]
fn ext_is_not_decoded_as_movem() {
    // MOVE.L #$12340080,D0 ; EXT.W D0 ; EXT.L D0
    let (mut cpu, mut bus, irq) = program(&[0x203C, 0x1234, 0x0080, 0x4880, 0x48C0]);
    run(&mut cpu, &mut bus, &irq, 2);
    assert_eq!(cpu.registers().d[0], 0x1234_FF80);
    assert!(cpu.registers().status().negative);
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.registers().d[0], 0xFFFF_FF80);
}

#[test]
fn negx_borrows_when_operand_plus_extend_wraps() {
    // NEGX.B D0 ; NEGX.L D1
    let (mut cpu, mut bus, irq) = program(&[0x4000, 0x4081]);
    cpu.registers_mut().d[0] = 0xFF;
    cpu.registers_mut().d[1] = 0;
    cpu.registers_mut().set_ccr(0x14); // X y Z
    cpu.step(&mut bus, &irq);
    let sr = cpu.registers().status();
    assert_eq!(cpu.registers().d[0] & 0xFF, 0x00);
    assert!(sr.carry && sr.extend);
    assert!(sr.zero, "Z only clears on a non-zero result");
    assert!(!sr.negative && !sr.overflow);

    cpu.step(&mut bus, &irq);
    let sr = cpu.registers().status();
    assert_eq!(cpu.registers().d[1], 0xFFFF_FFFF);
    assert!(sr.carry && sr.extend && sr.negative);
    assert!(!sr.zero);
}

#[test]
fn or_byte_to_memory_is_not_sbcd() {
    // MOVEA.L #$FF0010,A0 ; MOVE.B #$0F,(A0) ; MOVEQ #$30,D0 ; OR.B D0,(A0)
    let (mut cpu, mut bus, irq) =
        program(&[0x207C, 0x00FF, 0x0010, 0x10BC, 0x000F, 0x7030, 0x8110]);
    run(&mut cpu, &mut bus, &irq, 4);
    assert_eq!(bus.read8(0xFF0010), 0x3F);
    assert_eq!(cpu.registers().d[0], 0x30);
}

#[test]
fn read_modify_write_resolves_displacement_once() {
    // MOVEA.L #$FF0020,A0 ; MOVEQ #5,D0 ; ADD.W D0,4(A0) ; NOP
    let (mut cpu, mut bus, irq) =
        program(&[0x207C, 0x00FF, 0x0020, 0x7005, 0xD168, 0x0004, 0x4E71]);
    bus.write16(0xFF0024, 0x0100);
    run(&mut cpu, &mut bus, &irq, 3);
    assert_eq!(bus.read16(0xFF0024), 0x0105);
    assert_eq!(cpu.pc(), ENTRY + 12);
}

#[test]
fn movem_predecrement_round_trip() {
    // MOVE.L #$11111111,D0 ; MOVE.L #$22222222,D1 ; MOVEA.L #$FF1234,A0
    // MOVEM.L D0-D1/A0,-(A7) ; MOVEM.L (A7)+,D2-D3/A1
    let (mut cpu, mut bus, irq) = program(&[
        0x203C, 0x1111, 0x1111, 0x223C, 0x2222, 0x2222, 0x207C, 0x00FF, 0x1234, 0x48E7,
        0xC080, 0x4CDF, 0x020C,
    ]);
    run(&mut cpu, &mut bus, &irq, 4);
    assert_eq!(cpu.registers().a[7], SSP - 12);
    assert_eq!(bus.read32(SSP - 12), 0x1111_1111);
    assert_eq!(bus.read32(SSP - 4), 0x00FF_1234);
    cpu.step(&mut bus, &irq);
    let regs = cpu.registers();
    assert_eq!((regs.d[2], regs.d[3], regs.a[1]), (0x1111_1111, 0x2222_2222, 0x00FF_1234));
    assert_eq!(regs.a[7], SSP);
}

#[test]
fn dbf_loops_count_plus_one_times() {
    // MOVEQ #2,D1 ; loop: NOP ; DBF D1,loop
    let (mut cpu, mut bus, irq) = program(&[0x7202, 0x4E71, 0x51C9, 0xFFFC]);
    run(&mut cpu, &mut bus, &irq, 7);
    assert_eq!(cpu.pc(), ENTRY + 8);
    assert_eq!(cpu.registers().d[1] & 0xFFFF, 0xFFFF);
}

#[test]
fn cycle_costs_include_addressing_mode() {
    // MOVE.L D0,D1 ; MOVEA.L #$FF0000,A0 ; MOVE.W (A0),D1 ; MOVE.L (A0)+,D2
    let (mut cpu, mut bus, irq) =
        program(&[0x2200, 0x207C, 0x00FF, 0x0000, 0x3210, 0x2418]);
    assert_eq!(cpu.step(&mut bus, &irq), 4);
    assert_eq!(cpu.step(&mut bus, &irq), 12);
    assert_eq!(cpu.step(&mut bus, &irq), 8);
    assert_eq!(cpu.step(&mut bus, &irq), 12);
}

#[test]
fn execute_overshoots_by_at_most_one_instruction() {
    let (mut cpu, mut bus, irq) = program(&[0x4E71; 16]);
    let used = cpu.execute(&mut bus, &irq, 10);
    assert_eq!(used, 12);
    assert_eq!(cpu.pc(), ENTRY + 6);
}

#[test]
fn hooks_run_before_the_instruction() {
    // MOVEQ #1,D0 ; ADDQ.L #1,D3
    let (mut cpu, mut bus, irq) = program(&[0x7001, 0x5283]);
    cpu.register_hook(ENTRY + 2, Box::new(|_: u32, regs: &mut Registers| regs.d[3] = 0x40))
        .unwrap();
    assert_eq!(
        cpu.register_hook(ENTRY + 2, Box::new(|_: u32, _: &mut Registers| {})),
        Err(HookError::AlreadyRegistered(ENTRY + 2))
    );
    run(&mut cpu, &mut bus, &irq, 2);
    assert_eq!(cpu.registers().d[3], 0x41);
    assert!(cpu.unregister_hook(ENTRY + 2));
}

#[test]
fn reset_instruction_pulses_external_line() {
    let (mut cpu, mut bus, irq) = program(&[0x4E70]);
    assert_eq!(cpu.step(&mut bus, &irq), 132);
    assert_eq!(cpu.reset_pulses(), 1);
    assert_eq!(cpu.state(), ExecState::Running);
}

#[test]
fn write_to_rom_is_a_bus_error_and_rom_is_unchanged() {
    // MOVE.W D0,$0400.W
    let (mut cpu, mut bus, irq) = program(&[0x31C0, 0x0400]);
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.pending_exception(), Some(vectors::BUS_ERROR));
    assert_eq!(bus.read16(ENTRY), 0x31C0);
}
