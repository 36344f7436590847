// crates/oxide-core/src/irq.rs
//! Controlador de interrupciones compartido por ambas CPUs.
//!
//! Los periféricos y la otra CPU levantan peticiones con `raise`; cada motor
//! las consume en el límite de instrucción con `try_accept_*`. Se acepta
//! siempre la petición de mayor prioridad; los empates se resuelven en orden
//! de llegada (FIFO) usando un número de secuencia.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuId {
    Main,
    Audio,
}

/// Modo de interrupción del Z80 (instrucciones IM 0/1/2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptMode {
    #[default]
    Im0,
    Im1,
    Im2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioLine {
    NonMaskable,
    /// `data` is the byte the device places on the bus during acknowledge.
    Maskable { data: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptRequest {
    /// Level 1-7; level 7 cannot be masked. `vector` overrides the autovector.
    Main { level: u8, vector: Option<u8> },
    Audio(AudioLine),
}

impl InterruptRequest {
    pub fn target(&self) -> CpuId {
        match self {
            InterruptRequest::Main { .. } => CpuId::Main,
            InterruptRequest::Audio(_) => CpuId::Audio,
        }
    }

    fn priority(&self) -> u8 {
        match self {
            InterruptRequest::Main { level, .. } => *level,
            InterruptRequest::Audio(AudioLine::NonMaskable) => 2,
            InterruptRequest::Audio(AudioLine::Maskable { .. }) => 1,
        }
    }
}

/// First 68000 autovector (spurious interrupt is 24, level N is 24 + N).
pub const AUTOVECTOR_BASE: u8 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MainAccept {
    pub level: u8,
    pub vector: u8,
}

/// Lo que el Z80 necesita saber de sí mismo para aceptar una interrupción.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioContext {
    pub iff1: bool,
    pub mode: InterruptMode,
    /// Vector page register.
    pub i: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioVector {
    /// Jump directly to this address.
    Fixed(u16),
    /// Read the handler address from this table entry (IM 2).
    Indirect(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioAccept {
    pub line: AudioLine,
    pub vector: AudioVector,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    req: InterruptRequest,
    seq: u64,
}

#[derive(Default)]
struct Pending {
    entries: Vec<Entry>,
    next_seq: u64,
}

impl Pending {
    // Highest priority first, oldest first among equals.
    fn best(&self, eligible: impl Fn(&InterruptRequest) -> bool) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| eligible(&e.req))
            .max_by(|(_, a), (_, b)| {
                a.req
                    .priority()
                    .cmp(&b.req.priority())
                    .then(b.seq.cmp(&a.seq))
            })
            .map(|(idx, _)| idx)
    }
}

fn main_eligible(req: &InterruptRequest, mask: u8) -> bool {
    matches!(*req, InterruptRequest::Main { level, .. } if level == 7 || level > mask)
}

fn audio_eligible(req: &InterruptRequest, iff1: bool) -> bool {
    match req {
        InterruptRequest::Audio(AudioLine::NonMaskable) => true,
        InterruptRequest::Audio(AudioLine::Maskable { .. }) => iff1,
        InterruptRequest::Main { .. } => false,
    }
}

/// Handle clonable; todas las copias comparten la misma cola de peticiones.
#[derive(Clone, Default)]
pub struct InterruptController {
    inner: Arc<Mutex<Pending>>,
}

impl InterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a request. Returns `false` if it was ignored: level 0 or above 7,
    /// or an identical request is already pending (they coalesce).
    pub fn raise(&self, req: InterruptRequest) -> bool {
        if let InterruptRequest::Main { level, .. } = req {
            if level == 0 || level > 7 {
                log::warn!("ignoring main interrupt with invalid level {level}");
                return false;
            }
        }
        let mut pending = self.lock();
        if pending.entries.iter().any(|e| e.req == req) {
            return false;
        }
        let seq = pending.next_seq;
        pending.next_seq += 1;
        pending.entries.push(Entry { req, seq });
        log::trace!("raise {req:?}");
        true
    }

    /// Withdraws a pending request (level-triggered line released before ack).
    pub fn lower(&self, req: InterruptRequest) -> bool {
        let mut pending = self.lock();
        let before = pending.entries.len();
        pending.entries.retain(|e| e.req != req);
        pending.entries.len() != before
    }

    /// Accepts the highest main-CPU request above `mask` (level 7 always).
    pub fn try_accept_main(&self, mask: u8) -> Option<MainAccept> {
        let mut pending = self.lock();
        let idx = pending.best(|r| main_eligible(r, mask))?;
        let entry = pending.entries.remove(idx);
        let InterruptRequest::Main { level, vector } = entry.req else {
            return None;
        };
        let vector = vector.unwrap_or(AUTOVECTOR_BASE + level);
        log::debug!("main accepts level {level} -> vector {vector}");
        Some(MainAccept { level, vector })
    }

    /// Accepts the highest audio-CPU request the context allows.
    pub fn try_accept_audio(&self, ctx: AudioContext) -> Option<AudioAccept> {
        let mut pending = self.lock();
        let idx = pending.best(|r| audio_eligible(r, ctx.iff1))?;
        let entry = pending.entries.remove(idx);
        let InterruptRequest::Audio(line) = entry.req else {
            return None;
        };
        let vector = match line {
            AudioLine::NonMaskable => AudioVector::Fixed(0x0066),
            AudioLine::Maskable { data } => match ctx.mode {
                // IM 0 executes the byte on the bus; only RST n is modelled.
                InterruptMode::Im0 if data & 0xC7 == 0xC7 => AudioVector::Fixed((data & 0x38) as u16),
                InterruptMode::Im0 | InterruptMode::Im1 => AudioVector::Fixed(0x0038),
                InterruptMode::Im2 => AudioVector::Indirect(((ctx.i as u16) << 8) | data as u16),
            },
        };
        log::debug!("audio accepts {line:?} ({:?}) -> {vector:?}", ctx.mode);
        Some(AudioAccept { line, vector })
    }

    /// True if `try_accept_main(mask)` would return a request.
    pub fn can_accept_main(&self, mask: u8) -> bool {
        self.lock().best(|r| main_eligible(r, mask)).is_some()
    }

    pub fn can_accept_audio(&self, iff1: bool) -> bool {
        self.lock().best(|r| audio_eligible(r, iff1)).is_some()
    }

    pub fn has_pending(&self, target: CpuId) -> bool {
        self.lock().entries.iter().any(|e| e.req.target() == target)
    }

    /// Pending requests for `target` in acceptance order.
    pub fn pending(&self, target: CpuId) -> Vec<InterruptRequest> {
        let pending = self.lock();
        let mut entries: Vec<Entry> = pending
            .entries
            .iter()
            .copied()
            .filter(|e| e.req.target() == target)
            .collect();
        entries.sort_by(|a, b| {
            b.req
                .priority()
                .cmp(&a.req.priority())
                .then(a.seq.cmp(&b.seq))
        });
        entries.into_iter().map(|e| e.req).collect()
    }

    pub fn clear(&self, target: CpuId) {
        self.lock().entries.retain(|e| e.req.target() != target);
    }

    pub fn clear_all(&self) {
        let mut pending = self.lock();
        pending.entries.clear();
        pending.next_seq = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(level: u8) -> InterruptRequest {
        InterruptRequest::Main { level, vector: None }
    }

    #[test]
    fn higher_level_wins_then_lower_follows() {
        let irq = InterruptController::new();
        irq.raise(level(2));
        irq.raise(level(5));
        assert_eq!(irq.try_accept_main(0), Some(MainAccept { level: 5, vector: 29 }));
        // The CPU now runs with mask 5: level 2 waits.
        assert_eq!(irq.try_accept_main(5), None);
        assert_eq!(irq.try_accept_main(0), Some(MainAccept { level: 2, vector: 26 }));
        assert!(!irq.has_pending(CpuId::Main));
    }

    #[test]
    fn equal_levels_resolve_in_raise_order() {
        let irq = InterruptController::new();
        irq.raise(InterruptRequest::Main { level: 4, vector: Some(0x40) });
        irq.raise(InterruptRequest::Main { level: 4, vector: Some(0x41) });
        irq.raise(InterruptRequest::Main { level: 4, vector: Some(0x42) });
        let order: Vec<u8> = std::iter::from_fn(|| irq.try_accept_main(0))
            .map(|a| a.vector)
            .collect();
        assert_eq!(order, vec![0x40, 0x41, 0x42]);
    }

    #[test]
    fn mask_blocks_equal_level_but_not_level_seven() {
        let irq = InterruptController::new();
        irq.raise(level(3));
        assert_eq!(irq.try_accept_main(3), None);
        assert!(irq.has_pending(CpuId::Main));
        irq.raise(level(7));
        assert_eq!(irq.try_accept_main(7).map(|a| a.level), Some(7));
        assert!(irq.can_accept_main(2));
        assert!(!irq.can_accept_main(3));
    }

    #[test]
    fn duplicates_coalesce_and_invalid_levels_are_ignored() {
        let irq = InterruptController::new();
        assert!(irq.raise(level(6)));
        assert!(!irq.raise(level(6)));
        assert!(!irq.raise(level(0)));
        assert!(!irq.raise(level(8)));
        assert_eq!(irq.pending(CpuId::Main), vec![level(6)]);
        assert!(irq.lower(level(6)));
        assert!(!irq.has_pending(CpuId::Main));
    }

    #[test]
    fn audio_vectors_follow_interrupt_mode() {
        let irq = InterruptController::new();
        let ctx = |mode| AudioContext { iff1: true, mode, i: 0x12 };
        let line = InterruptRequest::Audio(AudioLine::Maskable { data: 0x34 });

        irq.raise(line);
        assert_eq!(irq.try_accept_audio(ctx(InterruptMode::Im1)).unwrap().vector, AudioVector::Fixed(0x38));
        irq.raise(line);
        assert_eq!(irq.try_accept_audio(ctx(InterruptMode::Im2)).unwrap().vector, AudioVector::Indirect(0x1234));
        irq.raise(InterruptRequest::Audio(AudioLine::Maskable { data: 0xD7 }));
        assert_eq!(irq.try_accept_audio(ctx(InterruptMode::Im0)).unwrap().vector, AudioVector::Fixed(0x10));
    }

    #[test]
    fn nmi_ignores_iff1_and_outranks_maskable() {
        let irq = InterruptController::new();
        irq.raise(InterruptRequest::Audio(AudioLine::Maskable { data: 0xFF }));
        let disabled = AudioContext { iff1: false, mode: InterruptMode::Im1, i: 0 };
        assert_eq!(irq.try_accept_audio(disabled), None);
        irq.raise(InterruptRequest::Audio(AudioLine::NonMaskable));
        let accepted = irq.try_accept_audio(disabled).unwrap();
        assert_eq!(accepted.line, AudioLine::NonMaskable);
        assert_eq!(accepted.vector, AudioVector::Fixed(0x66));
        assert!(irq.has_pending(CpuId::Audio));
        irq.clear(CpuId::Audio);
        assert!(!irq.has_pending(CpuId::Audio));
    }

    #[test]
    fn clones_share_state() {
        let irq = InterruptController::new();
        let peripheral = irq.clone();
        peripheral.raise(level(1));
        assert!(irq.has_pending(CpuId::Main));
        irq.clear_all();
        assert!(!peripheral.has_pending(CpuId::Main));
    }
}
