// crates/oxidz80/src/cycles.rs - T-states documentados del Z80
//
// Las tablas dan el coste sin salto; los extras de salto tomado se suman
// en el ejecutor.

pub const JR_TAKEN: u32 = 5;
pub const DJNZ_TAKEN: u32 = 5;
pub const RET_TAKEN: u32 = 6;
pub const CALL_TAKEN: u32 = 7;
pub const BLOCK_REPEAT: u32 = 5;

/// Prefijo DD/FD delante de un opcode normal.
pub const INDEX_PREFIX: u32 = 4;
/// Fetch del desplazamiento y cálculo de (IX+d) frente a (HL).
pub const INDEX_DISPLACEMENT: u32 = 8;

pub const NMI: u32 = 11;
pub const IM01: u32 = 13;
pub const IM2: u32 = 19;
pub const HALTED: u32 = 4;
pub const RESET: u32 = 3;

const LOW: [[u8; 16]; 4] = [
    [4, 10, 7, 6, 4, 4, 7, 4, 4, 11, 7, 6, 4, 4, 7, 4],
    [8, 10, 7, 6, 4, 4, 7, 4, 12, 11, 7, 6, 4, 4, 7, 4],
    [7, 10, 16, 6, 4, 4, 7, 4, 7, 11, 16, 6, 4, 4, 7, 4],
    [7, 10, 13, 6, 11, 11, 10, 4, 7, 11, 13, 6, 4, 4, 7, 4],
];

// Los prefijos (CB, DD, ED, FD) valen 0: el coste lo pone la tabla del prefijo.
const HIGH: [[u8; 16]; 4] = [
    [5, 10, 10, 10, 10, 11, 7, 11, 5, 10, 10, 0, 10, 17, 7, 11],
    [5, 10, 10, 11, 10, 11, 7, 11, 5, 4, 10, 11, 10, 0, 7, 11],
    [5, 10, 10, 19, 10, 11, 7, 11, 5, 4, 10, 4, 10, 0, 7, 11],
    [5, 10, 10, 4, 10, 11, 7, 11, 5, 6, 10, 4, 10, 0, 7, 11],
];

const fn build_base() -> [u8; 256] {
    let mut t = [4u8; 256];
    let mut i = 0;
    while i < 64 {
        t[i] = LOW[i / 16][i % 16];
        t[0xC0 + i] = HIGH[i / 16][i % 16];
        i += 1;
    }
    // LD r,r' y ALU: 7 si interviene (HL). HALT queda en 4.
    let mut op = 0x40;
    while op < 0xC0 {
        let src_mem = op & 7 == 6;
        let dst_mem = op < 0x80 && (op >> 3) & 7 == 6;
        if op != 0x76 && (src_mem || dst_mem) {
            t[op] = 7;
        }
        op += 1;
    }
    t
}

static BASE: [u8; 256] = build_base();

/// Unprefixed opcode (branches not taken).
#[inline]
pub fn base(op: u8) -> u32 {
    BASE[op as usize] as u32
}

pub fn cb(op: u8) -> u32 {
    match (op & 7 == 6, op & 0xC0) {
        (false, _) => 8,
        (true, 0x40) => 12,
        (true, _) => 15,
    }
}

/// DDCB/FDCB: the whole four-byte instruction.
pub fn indexed_cb(op: u8) -> u32 {
    if op & 0xC0 == 0x40 { 20 } else { 23 }
}

/// ED-prefixed opcode (block repeats not included).
pub fn ed(op: u8) -> u32 {
    match op {
        0x47 | 0x4F | 0x57 | 0x5F => 9,
        0x67 | 0x6F => 18,
        0x40..=0x7F => match op & 7 {
            0 | 1 => 12,
            2 => 15,
            3 => 20,
            5 => 14,
            _ => 8,
        },
        0xA0..=0xA3 | 0xA8..=0xAB | 0xB0..=0xB3 | 0xB8..=0xBB => 16,
        _ => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_samples() {
        assert_eq!(base(0x00), 4);
        assert_eq!(base(0x36), 10); // LD (HL),n
        assert_eq!(base(0x46), 7); // LD B,(HL)
        assert_eq!(base(0x70), 7); // LD (HL),B
        assert_eq!(base(0x76), 4); // HALT
        assert_eq!(base(0x86), 7); // ADD A,(HL)
        assert_eq!(base(0xCD), 17);
        assert_eq!(base(0xE3), 19);
        assert_eq!(cb(0x46), 12);
        assert_eq!(cb(0x06), 15);
        assert_eq!(ed(0xB0), 16);
        assert_eq!(ed(0x4A), 15);
        assert_eq!(ed(0x43), 20);
        assert_eq!(ed(0x00), 8);
        assert_eq!(indexed_cb(0x46), 20);
    }
}
