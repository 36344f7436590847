// crates/systems/oxid_arcade/src/peripherals.rs
// Periféricos propios de la placa: RAM de sonido compartida, control del Z80
// y los dos extremos del canal de mensajes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use oxide_core::{
    CpuId, CrossCpuChannel, Direction, InterruptController, InterruptRequest, RegisterHandler,
    SendOutcome,
};

use crate::map::channel;

pub(crate) fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
//  RAM DE SONIDO
// ============================================================================

/// RAM visible desde las dos CPUs. Cada bus la ve a través de su propia
/// región con handler, así que el orden de bytes lo pone el bus que accede.
#[derive(Debug, Clone)]
pub struct SharedRam {
    data: Vec<u8>,
}

impl SharedRam {
    pub fn new(size: u32) -> Self {
        Self { data: vec![0; size as usize] }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, offset: u32) -> Option<u8> {
        self.data.get(offset as usize).copied()
    }

    pub fn set(&mut self, offset: u32, value: u8) -> bool {
        match self.data.get_mut(offset as usize) {
            Some(b) => {
                *b = value;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }
}

impl RegisterHandler for SharedRam {
    fn read8(&mut self, offset: u32) -> u8 {
        self.get(offset).unwrap_or(0xFF)
    }

    fn write8(&mut self, offset: u32, value: u8) {
        self.set(offset, value);
    }
}

// ============================================================================
//  CONTROL DEL Z80 (BUSREQ / RESET)
// ============================================================================

pub const BUSREQ: u32 = 0x000;
pub const RESET: u32 = 0x100;

/// Líneas con las que la CPU principal detiene a la de sonido.
///
/// - `BUSREQ`: escribir bit 0 = 1 pide el bus (el Z80 se para), 0 lo devuelve.
///   Al leer, bit 0 = 0 significa que el bus ya está concedido.
/// - `RESET`: escribir bit 0 = 0 mantiene el Z80 en reset, 1 lo libera.
///
/// Sólo cuentan los offsets pares; el byte impar de un acceso de 16 bits se ignora.
#[derive(Debug, Clone, Default)]
pub struct AudioControl {
    bus_requested: bool,
    reset_asserted: bool,
    restart_pending: bool,
}

impl AudioControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// The audio CPU may not run while the main CPU owns its bus or holds reset.
    pub fn holds_audio(&self) -> bool {
        self.bus_requested || self.reset_asserted
    }

    pub fn bus_requested(&self) -> bool {
        self.bus_requested
    }

    pub fn reset_asserted(&self) -> bool {
        self.reset_asserted
    }

    /// True once after the reset line is released.
    pub fn take_restart(&mut self) -> bool {
        std::mem::take(&mut self.restart_pending)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

impl RegisterHandler for AudioControl {
    fn read8(&mut self, offset: u32) -> u8 {
        match offset {
            BUSREQ => u8::from(!self.bus_requested),
            _ => 0xFF,
        }
    }

    fn write8(&mut self, offset: u32, value: u8) {
        match offset {
            BUSREQ => {
                self.bus_requested = value & 1 != 0;
                log::trace!("audio busreq {}", self.bus_requested);
            }
            RESET => {
                let assert = value & 1 == 0;
                if self.reset_asserted && !assert {
                    self.restart_pending = true;
                }
                self.reset_asserted = assert;
                log::trace!("audio reset line {}", if assert { "low" } else { "high" });
            }
            _ => {}
        }
    }
}

// ============================================================================
//  CANAL DE MENSAJES
// ============================================================================

/// Uno de los dos extremos del canal, mapeado en el bus de `side`.
///
/// Escribir en `DATA` encola hacia la otra CPU y levanta su interrupción de
/// mensaje; leer `DATA` saca el byte más antiguo de la cola entrante.
pub struct ChannelPort {
    side: CpuId,
    channel: Arc<Mutex<CrossCpuChannel>>,
    irq: InterruptController,
    notify: InterruptRequest,
    overflowed: bool,
}

impl ChannelPort {
    /// `notify` is raised on the receiving CPU after every send.
    pub fn new(
        side: CpuId,
        channel: Arc<Mutex<CrossCpuChannel>>,
        irq: InterruptController,
        notify: InterruptRequest,
    ) -> Self {
        Self {
            side,
            channel,
            irq,
            notify,
            overflowed: false,
        }
    }

    fn outgoing(&self) -> Direction {
        match self.side {
            CpuId::Main => Direction::MainToAudio,
            CpuId::Audio => Direction::AudioToMain,
        }
    }

    fn incoming(&self) -> Direction {
        match self.side {
            CpuId::Main => Direction::AudioToMain,
            CpuId::Audio => Direction::MainToAudio,
        }
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    fn status(&self) -> u8 {
        let mut v = 0;
        if lock(&self.channel).has_pending(self.incoming()) {
            v |= channel::STATUS_RX_PENDING;
        }
        if self.overflowed {
            v |= channel::STATUS_OVERFLOW;
        }
        v
    }
}

impl RegisterHandler for ChannelPort {
    fn read8(&mut self, offset: u32) -> u8 {
        match offset {
            channel::DATA => lock(&self.channel)
                .try_receive(self.incoming())
                .unwrap_or(channel::EMPTY),
            channel::STATUS => self.status(),
            _ => 0xFF,
        }
    }

    fn write8(&mut self, offset: u32, value: u8) {
        if offset != channel::DATA {
            return;
        }
        let dir = self.outgoing();
        let outcome = lock(&self.channel).send(dir, value);
        self.overflowed = match outcome {
            SendOutcome::Queued => false,
            SendOutcome::Overwrote(lost) => {
                log::warn!("{dir:?} queue full, dropped {lost:#04X}");
                true
            }
        };
        self.irq.raise(self.notify);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxide_core::AudioLine;

    fn ports(capacity: usize) -> (ChannelPort, ChannelPort, InterruptController) {
        let channel = Arc::new(Mutex::new(CrossCpuChannel::new(capacity)));
        let irq = InterruptController::new();
        let main = ChannelPort::new(
            CpuId::Main,
            Arc::clone(&channel),
            irq.clone(),
            InterruptRequest::Audio(AudioLine::NonMaskable),
        );
        let audio = ChannelPort::new(
            CpuId::Audio,
            channel,
            irq.clone(),
            InterruptRequest::Main { level: 2, vector: None },
        );
        (main, audio, irq)
    }

    #[test]
    fn send_raises_receiver_and_read_drains() {
        let (mut main, mut audio, irq) = ports(4);
        main.write8(channel::DATA, 0x42);
        assert!(irq.has_pending(CpuId::Audio));
        assert!(!irq.has_pending(CpuId::Main));
        assert_eq!(audio.read8(channel::STATUS), channel::STATUS_RX_PENDING);
        assert_eq!(audio.read8(channel::DATA), 0x42);
        assert_eq!(audio.read8(channel::DATA), channel::EMPTY);
        assert_eq!(audio.read8(channel::STATUS), 0);
        // El lado principal no ve su propia cola de salida.
        assert_eq!(main.read8(channel::DATA), channel::EMPTY);
    }

    #[test]
    fn overflow_drops_oldest_and_sets_status() {
        let (mut main, mut audio, _irq) = ports(2);
        for b in [1, 2, 3] {
            main.write8(channel::DATA, b);
        }
        assert!(main.overflowed());
        assert_eq!(main.read8(channel::STATUS) & channel::STATUS_OVERFLOW, channel::STATUS_OVERFLOW);
        assert_eq!(audio.read8(channel::DATA), 2);
        assert_eq!(audio.read8(channel::DATA), 3);
        main.write8(channel::DATA, 4);
        assert!(!main.overflowed());
    }

    #[test]
    fn reset_release_requests_restart_once() {
        let mut ctl = AudioControl::new();
        assert!(!ctl.holds_audio());
        ctl.write8(RESET, 0x00);
        assert!(ctl.holds_audio());
        assert!(!ctl.take_restart());
        ctl.write8(RESET, 0x01);
        assert!(!ctl.holds_audio());
        assert!(ctl.take_restart());
        assert!(!ctl.take_restart());
    }

    #[test]
    fn busreq_word_write_uses_even_byte() {
        let mut ctl = AudioControl::new();
        assert_eq!(ctl.read8(BUSREQ), 1);
        ctl.write16(BUSREQ, 0x0100, oxide_core::Endian::Big);
        assert!(ctl.bus_requested());
        assert_eq!(ctl.read8(BUSREQ), 0);
        ctl.write16(BUSREQ, 0x0000, oxide_core::Endian::Big);
        assert!(!ctl.holds_audio());
    }

    #[test]
    fn shared_ram_out_of_range_reads_float() {
        let mut ram = SharedRam::new(4);
        ram.write8(3, 0xAB);
        ram.write8(9, 0x11);
        assert_eq!(ram.read8(3), 0xAB);
        assert_eq!(ram.read8(9), 0xFF);
        assert_eq!(ram.len(), 4);
    }
}
