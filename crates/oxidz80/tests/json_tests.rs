use oxide_core::{Cpu, InterruptController, MemoryBus};
use oxidz80::{OxidZ80, Registers};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Deserialize, Debug)]
struct TestState {
    pc: u16,
    sp: u16,
    a: u8,
    b: u8,
    c: u8,
    d: u8,
    e: u8,
    f: u8,
    h: u8,
    l: u8,
    i: u8,
    r: u8,
    ix: u16,
    iy: u16,
    #[serde(rename = "af_")]
    af_prime: u16,
    #[serde(rename = "bc_")]
    bc_prime: u16,
    #[serde(rename = "de_")]
    de_prime: u16,
    #[serde(rename = "hl_")]
    hl_prime: u16,
    ram: Vec<(u16, u8)>,
}

#[derive(Deserialize, Debug)]
struct TestCase {
    name: String,
    initial: TestState,
    #[serde(rename = "final")]
    final_state: TestState,
    /// One entry per T-state.
    cycles: Vec<serde_json::Value>,
}

struct TestBus {
    memory: Vec<u8>,
}

impl TestBus {
    fn new(ram: &[(u16, u8)]) -> Self {
        let mut bus = Self { memory: vec![0; 0x10000] };
        for &(addr, val) in ram {
            bus.memory[addr as usize] = val;
        }
        bus
    }
}

impl MemoryBus for TestBus {
    fn read(&self, addr: u32) -> u8 {
        self.memory[(addr & 0xFFFF) as usize]
    }

    fn write(&mut self, addr: u32, value: u8) {
        self.memory[(addr & 0xFFFF) as usize] = value;
    }
}

const TESTS_DIR: &str = "../../tests/z80_json_tests";

fn pair(hi: u8, lo: u8) -> u16 {
    ((hi as u16) << 8) | lo as u16
}

fn load(state: &TestState) -> Registers {
    let mut regs = Registers::power_on();
    regs.pc = state.pc;
    regs.sp = state.sp;
    regs.set_af(pair(state.a, state.f));
    regs.set_bc(pair(state.b, state.c));
    regs.set_de(pair(state.d, state.e));
    regs.set_hl(pair(state.h, state.l));
    regs.i = state.i;
    regs.r = state.r;
    regs.ix = state.ix;
    regs.iy = state.iy;
    regs.set_af_shadow(state.af_prime);
    regs.set_bc_shadow(state.bc_prime);
    regs.set_de_shadow(state.de_prime);
    regs.set_hl_shadow(state.hl_prime);
    regs
}

#[test]
#[ignore] // Needs the single-step vectors under tests/z80_json_tests
fn run_z80_json_tests() {
    let path = Path::new(TESTS_DIR);
    if !path.exists() {
        eprintln!("Test directory not found: {:?}", path);
        return;
    }

    let mut total = 0;
    for entry in std::fs::read_dir(path).expect("read dir") {
        let path = entry.expect("dir entry").path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        let file = File::open(&path).expect("open test file");
        let tests: Vec<TestCase> =
            serde_json::from_reader(BufReader::new(file)).expect("parse test file");
        for test in &tests {
            total += 1;
            let mismatches = run_single_test(test);
            assert!(mismatches.is_empty(), "{}: {}", test.name, mismatches.join(", "));
        }
    }
    eprintln!("Passed {} tests", total);
}

fn run_single_test(test: &TestCase) -> Vec<String> {
    let mut bus = TestBus::new(&test.initial.ram);
    let irq = InterruptController::new();
    let mut cpu = OxidZ80::new();
    // Sale de reset antes de cargar el estado inicial.
    cpu.step(&mut bus, &irq);
    cpu.set_registers(load(&test.initial));

    let cycles = cpu.step(&mut bus, &irq);

    let expected = load(&test.final_state);
    let got = cpu.registers();
    let mut bad = Vec::new();
    let checks = [
        ("PC", got.pc, expected.pc),
        ("SP", got.sp, expected.sp),
        ("AF", got.af(), expected.af()),
        ("BC", got.bc(), expected.bc()),
        ("DE", got.de(), expected.de()),
        ("HL", got.hl(), expected.hl()),
        ("IX", got.ix, expected.ix),
        ("IY", got.iy, expected.iy),
        ("AF'", got.af_shadow(), expected.af_shadow()),
        ("BC'", got.bc_shadow(), expected.bc_shadow()),
        ("DE'", got.de_shadow(), expected.de_shadow()),
        ("HL'", got.hl_shadow(), expected.hl_shadow()),
    ];
    for (name, got, want) in checks {
        if got != want {
            bad.push(format!("{name} {got:04X} != {want:04X}"));
        }
    }
    for &(addr, val) in &test.final_state.ram {
        let mem = bus.memory[addr as usize];
        if mem != val {
            bad.push(format!("RAM[{addr:04X}] {mem:02X} != {val:02X}"));
        }
    }
    if cycles as usize != test.cycles.len() {
        bad.push(format!("cycles {} != {}", cycles, test.cycles.len()));
    }
    bad
}
