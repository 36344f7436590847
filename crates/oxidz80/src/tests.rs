// crates/oxidz80/src/tests.rs
use crate::*;
use oxide_core::InterruptRequest;

struct TestBus {
    ram: Vec<u8>,
    port_writes: Vec<(u16, u8)>,
    port_value: u8,
}

impl TestBus {
    fn with_program(program: &[u8]) -> Self {
        let mut ram = vec![0; 0x10000];
        ram[..program.len()].copy_from_slice(program);
        Self { ram, port_writes: Vec::new(), port_value: 0xFF }
    }
}

impl MemoryBus for TestBus {
    fn read(&self, addr: u32) -> u8 {
        self.ram[(addr & 0xFFFF) as usize]
    }
    fn write(&mut self, addr: u32, val: u8) {
        self.ram[(addr & 0xFFFF) as usize] = val;
    }
    fn port_in(&mut self, _port: u16) -> u8 {
        self.port_value
    }
    fn port_out(&mut self, port: u16, val: u8) {
        self.port_writes.push((port, val));
    }
}

/// CPU ya fuera de reset, con el programa cargado en 0x0000.
fn boot(program: &[u8]) -> (OxidZ80, TestBus, InterruptController) {
    let mut cpu = OxidZ80::new();
    let mut bus = TestBus::with_program(program);
    let irq = InterruptController::new();
    assert_eq!(cpu.state(), ExecState::Reset);
    assert_eq!(cpu.step(&mut bus, &irq), 3);
    (cpu, bus, irq)
}

fn maskable(data: u8) -> InterruptRequest {
    InterruptRequest::Audio(AudioLine::Maskable { data })
}

#[test]
fn reset_state() {
    let (cpu, _, _) = boot(&[]);
    let regs = cpu.registers();
    assert_eq!(cpu.state(), ExecState::Running);
    assert_eq!(regs.pc, 0);
    assert_eq!(regs.sp, 0xFFFF);
    assert!(!regs.iff1 && !regs.iff2);
    assert_eq!(regs.im, InterruptMode::Im0);
}

#[test]
fn reset_is_idempotent() {
    let (mut cpu, mut bus, irq) = boot(&[0x3E, 0x12, 0x06, 0x34]);
    cpu.step(&mut bus, &irq);
    cpu.reset();
    let first = *cpu.registers();
    cpu.reset();
    assert_eq!(first, *cpu.registers());
    assert_eq!(cpu.state(), ExecState::Reset);
}

#[test]
fn test_daa() {
    let mut cpu = OxidZ80::new();
    // Addition cases
    cpu.regs.set_a(0x99);
    cpu.regs.set_f(0);
    cpu.alu(0, 0x01);
    cpu.daa();
    assert_eq!(cpu.regs.a(), 0x00);
    assert!(cpu.flag(flags::C));

    cpu.regs.set_a(0x05);
    cpu.regs.set_f(0);
    cpu.alu(0, 0x05);
    cpu.daa();
    assert_eq!(cpu.regs.a(), 0x10);

    // Subtraction cases
    cpu.regs.set_a(0x00);
    cpu.regs.set_f(0);
    cpu.alu(2, 0x01); // 0xFF, C=1, N=1
    cpu.daa();
    assert_eq!(cpu.regs.a(), 0x99);
    assert!(cpu.flag(flags::C));
}

#[test]
fn test_ccf_scf() {
    // LD A,$A5 ; SCF ; CCF
    let (mut cpu, mut bus, irq) = boot(&[0x3E, 0xA5, 0x37, 0x3F]);
    cpu.step(&mut bus, &irq);
    cpu.regs.set_f(0);
    cpu.step(&mut bus, &irq);
    let f = cpu.regs.f();
    assert!(f & flags::C != 0);
    assert!(f & flags::Y != 0); // bit 5 de A
    assert!(f & flags::X == 0);

    cpu.step(&mut bus, &irq);
    let f = cpu.regs.f();
    assert!(f & flags::C == 0);
    assert!(f & flags::H != 0); // H = old C
}

#[test]
fn test_bit_xy_flags() {
    // LD A,$08 ; BIT 3,A ; LD HL,$2000 ; BIT 6,(HL)
    let (mut cpu, mut bus, irq) = boot(&[0x3E, 0x08, 0xCB, 0x5F, 0x21, 0x00, 0x20, 0xCB, 0x76]);
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.step(&mut bus, &irq), 8);
    assert!(!cpu.flag(flags::Z));
    assert!(cpu.flag(flags::X)); // Bit 3 of A is 1

    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.step(&mut bus, &irq), 12);
    assert!(cpu.flag(flags::Z));
    assert!(cpu.flag(flags::Y)); // Y comes from H (bit 5 of 0x20)
}

#[test]
fn add_sets_overflow_and_sign() {
    // LD A,$7F ; ADD A,1
    let (mut cpu, mut bus, irq) = boot(&[0x3E, 0x7F, 0xC6, 0x01]);
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.step(&mut bus, &irq), 7);
    assert_eq!(cpu.regs.a(), 0x80);
    let f = cpu.regs.f();
    assert_eq!(f & (flags::S | flags::P | flags::H | flags::C | flags::N), flags::S | flags::P | flags::H);
}

#[test]
fn branch_cycles_depend_on_condition() {
    // LD BC,$1234 ; XOR A ; JR NZ,+2 ; JR Z,+0 ; CALL $1000 ; ... $1000: RET
    let (mut cpu, mut bus, irq) = boot(&[0x01, 0x34, 0x12, 0xAF, 0x20, 0x02, 0x28, 0x00, 0xCD, 0x00, 0x10]);
    bus.ram[0x1000] = 0xC9;
    assert_eq!(cpu.step(&mut bus, &irq), 10);
    assert_eq!(cpu.regs.bc(), 0x1234);
    assert_eq!(cpu.step(&mut bus, &irq), 4);
    assert_eq!(cpu.step(&mut bus, &irq), 7);
    assert_eq!(cpu.regs.pc, 6);
    assert_eq!(cpu.step(&mut bus, &irq), 12);
    assert_eq!(cpu.regs.pc, 8);
    assert_eq!(cpu.step(&mut bus, &irq), 17);
    assert_eq!(cpu.regs.pc, 0x1000);
    assert_eq!(cpu.step(&mut bus, &irq), 10);
    assert_eq!(cpu.regs.pc, 11);
    assert_eq!(cpu.regs.sp, 0xFFFF);
}

#[test]
fn djnz_counts_down() {
    // LD B,2 ; loop: DJNZ loop
    let (mut cpu, mut bus, irq) = boot(&[0x06, 0x02, 0x10, 0xFE]);
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.step(&mut bus, &irq), 13);
    assert_eq!(cpu.regs.pc, 2);
    assert_eq!(cpu.step(&mut bus, &irq), 8);
    assert_eq!(cpu.regs.pc, 4);
    assert_eq!(cpu.regs.b(), 0);
}

#[test]
fn ldir_repeats_until_bc_is_zero() {
    let (mut cpu, mut bus, irq) = boot(&[0xED, 0xB0]);
    bus.ram[0x1000..0x1003].copy_from_slice(&[1, 2, 3]);
    cpu.regs.set_hl(0x1000);
    cpu.regs.set_de(0x2000);
    cpu.regs.set_bc(3);
    assert_eq!(cpu.step(&mut bus, &irq), 21);
    assert_eq!(cpu.regs.pc, 0);
    assert_eq!(cpu.step(&mut bus, &irq), 21);
    assert_eq!(cpu.step(&mut bus, &irq), 16);
    assert_eq!(cpu.regs.pc, 2);
    assert_eq!(&bus.ram[0x2000..0x2003], &[1, 2, 3]);
    assert_eq!(cpu.regs.bc(), 0);
    assert!(!cpu.flag(flags::P));
}

#[test]
fn exchanges_swap_banks() {
    // LD BC,$1111 ; EXX ; LD BC,$2222 ; EXX ; EX AF,AF'
    let (mut cpu, mut bus, irq) = boot(&[0x01, 0x11, 0x11, 0xD9, 0x01, 0x22, 0x22, 0xD9, 0x08]);
    for _ in 0..4 {
        cpu.step(&mut bus, &irq);
    }
    assert_eq!(cpu.regs.bc(), 0x1111);
    assert_eq!(cpu.regs.bc_shadow(), 0x2222);
    let af = cpu.regs.af();
    cpu.regs.set_af_shadow(0x1234);
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.regs.af(), 0x1234);
    assert_eq!(cpu.regs.af_shadow(), af);
}

#[test]
fn indexed_addressing() {
    let (mut cpu, mut bus, irq) = boot(&[
        0xDD, 0x21, 0x00, 0x40, // LD IX,$4000
        0xDD, 0x36, 0x05, 0xAA, // LD (IX+5),$AA
        0xDD, 0x34, 0x05, // INC (IX+5)
        0xDD, 0x7E, 0x05, // LD A,(IX+5)
        0xDD, 0xCB, 0xFF, 0xDE, // SET 3,(IX-1)
        0xDD, 0x26, 0x12, // LD IXH,$12
    ]);
    assert_eq!(cpu.step(&mut bus, &irq), 14);
    assert_eq!(cpu.regs.ix, 0x4000);
    assert_eq!(cpu.step(&mut bus, &irq), 19);
    assert_eq!(bus.ram[0x4005], 0xAA);
    assert_eq!(cpu.step(&mut bus, &irq), 23);
    assert_eq!(bus.ram[0x4005], 0xAB);
    assert_eq!(cpu.step(&mut bus, &irq), 19);
    assert_eq!(cpu.regs.a(), 0xAB);
    assert_eq!(cpu.step(&mut bus, &irq), 23);
    assert_eq!(bus.ram[0x3FFF], 0x08);
    assert_eq!(cpu.step(&mut bus, &irq), 11);
    assert_eq!(cpu.regs.ix, 0x1200);
    assert_eq!(cpu.regs.h(), 0);
}

#[test]
fn refresh_counts_opcode_fetches() {
    // NOP ; LD IX,0 ; unknown ED 00
    let (mut cpu, mut bus, irq) = boot(&[0x00, 0xDD, 0x21, 0x00, 0x00, 0xED, 0x00]);
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.regs.r, 1);
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.regs.r, 3);
    assert_eq!(cpu.step(&mut bus, &irq), 8);
    assert_eq!(cpu.regs.r, 5);
    assert_eq!(cpu.regs.pc, 7);
}

#[test]
fn port_io_uses_accumulator_as_high_byte() {
    // LD A,$12 ; OUT ($34),A ; LD BC,$0056 ; IN D,(C)
    let (mut cpu, mut bus, irq) = boot(&[0x3E, 0x12, 0xD3, 0x34, 0x01, 0x56, 0x00, 0xED, 0x50]);
    bus.port_value = 0x00;
    for _ in 0..3 {
        cpu.step(&mut bus, &irq);
    }
    assert_eq!(bus.port_writes, vec![(0x1234, 0x12)]);
    assert_eq!(cpu.step(&mut bus, &irq), 12);
    assert_eq!(cpu.regs.d(), 0x00);
    assert!(cpu.flag(flags::Z));
}

#[test]
fn ei_delays_acceptance_by_one_instruction() {
    // IM 1 ; EI ; NOP ; NOP
    let (mut cpu, mut bus, irq) = boot(&[0xED, 0x56, 0xFB, 0x00, 0x00]);
    irq.raise(maskable(0xFF));
    cpu.step(&mut bus, &irq);
    cpu.step(&mut bus, &irq);
    assert!(cpu.regs.iff1);
    assert_eq!(cpu.step(&mut bus, &irq), 4);
    assert_eq!(cpu.regs.pc, 4);
    assert_eq!(cpu.step(&mut bus, &irq), 13);
    assert_eq!(cpu.regs.pc, 0x0038);
    assert!(!cpu.regs.iff1 && !cpu.regs.iff2);
    assert_eq!(cpu.regs.sp, 0xFFFD);
    assert_eq!(bus.read_u16_le(0xFFFD), 0x0004);
}

#[test]
fn im2_reads_vector_table() {
    // LD A,$80 ; LD I,A ; IM 2 ; EI ; NOP ; NOP
    let (mut cpu, mut bus, irq) = boot(&[0x3E, 0x80, 0xED, 0x47, 0xED, 0x5E, 0xFB, 0x00, 0x00]);
    bus.ram[0x8010] = 0x34;
    bus.ram[0x8011] = 0x12;
    irq.raise(maskable(0x10));
    for _ in 0..5 {
        cpu.step(&mut bus, &irq);
    }
    assert_eq!(cpu.regs.pc, 8);
    assert_eq!(cpu.step(&mut bus, &irq), 19);
    assert_eq!(cpu.regs.pc, 0x1234);
    assert_eq!(bus.read_u16_le(cpu.regs.sp as u32), 0x0008);
}

#[test]
fn masked_interrupt_waits_but_nmi_does_not() {
    // DI ; NOP ; NOP
    let (mut cpu, mut bus, irq) = boot(&[0xF3, 0x00, 0x00]);
    irq.raise(maskable(0xFF));
    cpu.step(&mut bus, &irq);
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.regs.pc, 2);
    assert!(irq.can_accept_audio(true));

    irq.raise(InterruptRequest::Audio(AudioLine::NonMaskable));
    assert_eq!(cpu.step(&mut bus, &irq), 11);
    assert_eq!(cpu.regs.pc, 0x0066);
    // La maskable sigue pendiente.
    assert!(irq.has_pending(oxide_core::CpuId::Audio));
}

#[test]
fn halt_idles_until_nmi_and_retn_restores_iff1() {
    // EI ; HALT ; ... $0066: RETN
    let (mut cpu, mut bus, irq) = boot(&[0xFB, 0x76]);
    bus.ram[0x66] = 0xED;
    bus.ram[0x67] = 0x45;
    cpu.step(&mut bus, &irq);
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.state(), ExecState::Halted);
    assert_eq!(cpu.step(&mut bus, &irq), 4);
    assert_eq!(cpu.regs.pc, 2);
    assert_eq!(cpu.execute(&mut bus, &irq, 100), 4);

    irq.raise(InterruptRequest::Audio(AudioLine::NonMaskable));
    assert_eq!(cpu.step(&mut bus, &irq), 11);
    assert_eq!(cpu.state(), ExecState::Running);
    assert_eq!(cpu.regs.pc, 0x0066);
    assert!(!cpu.regs.iff1);
    assert!(cpu.regs.iff2);

    assert_eq!(cpu.step(&mut bus, &irq), 14);
    assert_eq!(cpu.regs.pc, 2);
    assert!(cpu.regs.iff1);
}

#[test]
fn hooks_see_registers_before_execution() {
    // NOP ; INC B
    let (mut cpu, mut bus, irq) = boot(&[0x00, 0x04]);
    cpu.register_hook(1, Box::new(|_: u32, regs: &mut Registers| regs.set_b(0x77)))
        .unwrap();
    assert_eq!(
        cpu.register_hook(1, Box::new(|_: u32, _: &mut Registers| {})),
        Err(HookError::AlreadyRegistered(1))
    );
    cpu.step(&mut bus, &irq);
    cpu.step(&mut bus, &irq);
    assert_eq!(cpu.regs.b(), 0x78);
    assert!(cpu.unregister_hook(1));
    assert!(!cpu.unregister_hook(1));
}

#[test]
fn execute_spends_budget() {
    let (mut cpu, mut bus, irq) = boot(&[0x00; 32]);
    assert_eq!(cpu.execute(&mut bus, &irq, 10), 12);
    assert_eq!(cpu.regs.pc, 3);
}
