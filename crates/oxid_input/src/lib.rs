use bitflags::bitflags;
use oxide_core::RegisterHandler;

// ============================================================================
//  CONTROLES DEL MUEBLE (ARCADE)
// ============================================================================

bitflags! {
    /// Palanca y botones de un jugador. En el puerto se leen activos a nivel bajo.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PlayerButtons: u8 {
        const UP      = 1 << 0;
        const DOWN    = 1 << 1;
        const LEFT    = 1 << 2;
        const RIGHT   = 1 << 3;
        const BUTTON1 = 1 << 4;
        const BUTTON2 = 1 << 5;
        const BUTTON3 = 1 << 6;
        const START   = 1 << 7;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SystemButtons: u8 {
        const COIN1   = 1 << 0;
        const COIN2   = 1 << 1;
        const SERVICE = 1 << 2;
        const TEST    = 1 << 3;
        const TILT    = 1 << 4;
    }
}

/// Register layout of the input block (byte offsets).
pub mod ports {
    pub const PLAYER1: u32 = 0;
    pub const PLAYER2: u32 = 1;
    pub const SYSTEM: u32 = 2;
    pub const DIP_A: u32 = 3;
    pub const DIP_B: u32 = 4;
    /// Write-only: bit 0/1 pulse the coin counters, bit 2 locks the coin slots.
    pub const COIN_CONTROL: u32 = 5;
    pub const SIZE: u32 = 0x20;
}

// ============================================================================
//  PUERTOS DE ENTRADA
// ============================================================================

/// Estado de los controles visto desde el bus principal.
///
/// El host actualiza los botones entre frames; la CPU lee los puertos a
/// través de la región mapeada (`RegisterHandler`).
#[derive(Debug, Clone, Default)]
pub struct InputPorts {
    pub player1: PlayerButtons,
    pub player2: PlayerButtons,
    pub system: SystemButtons,
    pub dip_a: u8,
    pub dip_b: u8,
    coin_counters: [u32; 2],
    coin_lockout: bool,
    last_coin_control: u8,
}

impl InputPorts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dips(dip_a: u8, dip_b: u8) -> Self {
        Self { dip_a, dip_b, ..Self::default() }
    }

    pub fn press(&mut self, player: usize, buttons: PlayerButtons) {
        match player {
            0 => self.player1.insert(buttons),
            1 => self.player2.insert(buttons),
            _ => log::warn!("input: no player {player}"),
        }
    }

    pub fn release(&mut self, player: usize, buttons: PlayerButtons) {
        match player {
            0 => self.player1.remove(buttons),
            1 => self.player2.remove(buttons),
            _ => log::warn!("input: no player {player}"),
        }
    }

    /// Coins are ignored while the game has the slots locked out.
    pub fn insert_coin(&mut self, slot: usize) {
        if self.coin_lockout {
            log::debug!("input: coin slot {slot} locked out");
            return;
        }
        match slot {
            0 => self.system.insert(SystemButtons::COIN1),
            _ => self.system.insert(SystemButtons::COIN2),
        }
    }

    pub fn clear(&mut self) {
        self.player1 = PlayerButtons::empty();
        self.player2 = PlayerButtons::empty();
        self.system = SystemButtons::empty();
    }

    pub fn coin_counter(&self, slot: usize) -> u32 {
        self.coin_counters.get(slot).copied().unwrap_or(0)
    }

    pub fn coin_lockout(&self) -> bool {
        self.coin_lockout
    }
}

impl RegisterHandler for InputPorts {
    fn read8(&mut self, offset: u32) -> u8 {
        let v = match offset {
            ports::PLAYER1 => !self.player1.bits(),
            ports::PLAYER2 => !self.player2.bits(),
            ports::SYSTEM => !self.system.bits(),
            ports::DIP_A => self.dip_a,
            ports::DIP_B => self.dip_b,
            _ => 0xFF,
        };
        log::trace!("input read +{offset:#X} = {v:#04X}");
        v
    }

    fn write8(&mut self, offset: u32, value: u8) {
        if offset != ports::COIN_CONTROL {
            log::trace!("input write to read-only port +{offset:#X} ignored");
            return;
        }
        // Los contadores avanzan en el flanco de subida.
        let rising = value & !self.last_coin_control;
        for slot in 0..2 {
            if rising & (1 << slot) != 0 {
                self.coin_counters[slot] += 1;
            }
        }
        self.coin_lockout = value & 0x04 != 0;
        self.last_coin_control = value;
        // La moneda se consume al contarla.
        if rising & 0x01 != 0 {
            self.system.remove(SystemButtons::COIN1);
        }
        if rising & 0x02 != 0 {
            self.system.remove(SystemButtons::COIN2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_read_active_low() {
        let mut input = InputPorts::with_dips(0x3C, 0x01);
        assert_eq!(input.read8(ports::PLAYER1), 0xFF);
        input.press(0, PlayerButtons::UP | PlayerButtons::BUTTON1);
        assert_eq!(input.read8(ports::PLAYER1), !0x11);
        input.release(0, PlayerButtons::UP);
        assert_eq!(input.read8(ports::PLAYER1), !0x10);
        assert_eq!(input.read8(ports::PLAYER2), 0xFF);
        assert_eq!(input.read8(ports::DIP_A), 0x3C);
        assert_eq!(input.read8(ports::DIP_B), 0x01);
        assert_eq!(input.read8(0x1F), 0xFF);
    }

    #[test]
    fn coin_counter_counts_rising_edges_and_consumes_coin() {
        let mut input = InputPorts::new();
        input.insert_coin(0);
        assert_eq!(input.read8(ports::SYSTEM), !SystemButtons::COIN1.bits());
        input.write8(ports::COIN_CONTROL, 0x01);
        input.write8(ports::COIN_CONTROL, 0x01);
        input.write8(ports::COIN_CONTROL, 0x00);
        assert_eq!(input.coin_counter(0), 1);
        assert_eq!(input.read8(ports::SYSTEM), 0xFF);
    }

    #[test]
    fn lockout_rejects_coins() {
        let mut input = InputPorts::new();
        input.write8(ports::COIN_CONTROL, 0x04);
        assert!(input.coin_lockout());
        input.insert_coin(1);
        assert_eq!(input.read8(ports::SYSTEM), 0xFF);
        input.write8(ports::COIN_CONTROL, 0x00);
        input.insert_coin(1);
        assert_eq!(input.read8(ports::SYSTEM) & SystemButtons::COIN2.bits(), 0);
    }

    #[test]
    fn word_read_is_big_endian_pair() {
        let mut input = InputPorts::new();
        input.press(1, PlayerButtons::START);
        let v = input.read16(ports::PLAYER1, oxide_core::Endian::Big);
        assert_eq!(v, 0xFF7F);
    }
}
