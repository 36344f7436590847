// crates/systems/oxid_arcade/src/map.rs
// Mapas de memoria de la placa.
//
// CPU principal (68000, bus de 24 bits, Big Endian):
// $000000 - $3FFFFF: ROM de programa (Read Only)
// $A00000 - $A0FFFF: RAM de sonido (ventana compartida con el Z80)
// $A10000 - $A1001F: Puertos de entrada
// $A11100          : Petición de bus del Z80
// $A11200          : Línea de reset del Z80
// $A12000 - $A1200F: Canal de mensajes (lado principal)
// $C00000 - $C0001F: Registros de vídeo
// $FF0000 - $FFFFFF: RAM de trabajo
// Todo lo demás -> Bus Error
//
// CPU de sonido (Z80, 16 bits, Little Endian):
// $0000 - $3FFF: RAM de sonido
// $4000 - $40FF: Chip de audio
// $7000 - $70FF: Canal de mensajes (lado sonido)
// Todo lo demás -> flotante ($FF)

pub mod main {
    pub const ADDRESS_MASK: u32 = 0x00FF_FFFF;

    pub const ROM: u32 = 0x00_0000;
    pub const ROM_WINDOW: u32 = 0x40_0000;
    pub const SOUND_RAM: u32 = 0xA0_0000;
    pub const INPUT: u32 = 0xA1_0000;
    /// Bus request at +0x000, reset line at +0x100.
    pub const AUDIO_CONTROL: u32 = 0xA1_1100;
    pub const AUDIO_CONTROL_SIZE: u32 = 0x200;
    pub const CHANNEL: u32 = 0xA1_2000;
    pub const CHANNEL_SIZE: u32 = 0x10;
    pub const VIDEO: u32 = 0xC0_0000;
    pub const VIDEO_SIZE: u32 = 0x20;
    pub const WORK_RAM: u32 = 0xFF_0000;
    pub const WORK_RAM_WINDOW: u32 = 0x1_0000;
}

pub mod audio {
    pub const SOUND_RAM: u32 = 0x0000;
    pub const SOUND_RAM_WINDOW: u32 = 0x4000;
    pub const AUDIO_CHIP: u32 = 0x4000;
    pub const AUDIO_CHIP_SIZE: u32 = 0x100;
    pub const CHANNEL: u32 = 0x7000;
    pub const CHANNEL_SIZE: u32 = 0x100;
}

/// Registros del canal (mismo formato en ambos lados).
pub mod channel {
    /// Write sends a byte, read receives one (0xFF when empty).
    pub const DATA: u32 = 0;
    pub const STATUS: u32 = 1;

    pub const STATUS_RX_PENDING: u8 = 0x01;
    pub const STATUS_OVERFLOW: u8 = 0x02;

    /// Lectura del puerto de datos con la cola vacía.
    pub const EMPTY: u8 = 0xFF;
}
