// crates/oxide-core/src/channel.rs
use std::collections::VecDeque;

/// Sentido de un mensaje entre las dos CPUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    MainToAudio,
    AudioToMain,
}

impl Direction {
    /// CPU that reads from this queue.
    pub fn receiver(self) -> crate::CpuId {
        match self {
            Direction::MainToAudio => crate::CpuId::Audio,
            Direction::AudioToMain => crate::CpuId::Main,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// The queue was full; the returned oldest byte was discarded.
    Overwrote(u8),
}

#[derive(Debug)]
struct Queue {
    bytes: VecDeque<u8>,
    overflows: u64,
}

impl Queue {
    fn new(capacity: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(capacity),
            overflows: 0,
        }
    }
}

/// Dos colas de bytes acotadas, una por sentido. Nunca bloquean: leer una cola
/// vacía devuelve `None`, y escribir en una llena descarta el byte más antiguo.
#[derive(Debug)]
pub struct CrossCpuChannel {
    capacity: usize,
    to_audio: Queue,
    to_main: Queue,
}

impl CrossCpuChannel {
    /// `capacity` is clamped to at least one byte.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            to_audio: Queue::new(capacity),
            to_main: Queue::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn queue(&self, dir: Direction) -> &Queue {
        match dir {
            Direction::MainToAudio => &self.to_audio,
            Direction::AudioToMain => &self.to_main,
        }
    }

    fn queue_mut(&mut self, dir: Direction) -> &mut Queue {
        match dir {
            Direction::MainToAudio => &mut self.to_audio,
            Direction::AudioToMain => &mut self.to_main,
        }
    }

    pub fn send(&mut self, dir: Direction, byte: u8) -> SendOutcome {
        let capacity = self.capacity;
        let queue = self.queue_mut(dir);
        let outcome = if queue.bytes.len() >= capacity {
            queue.overflows += 1;
            match queue.bytes.pop_front() {
                Some(old) => SendOutcome::Overwrote(old),
                None => SendOutcome::Queued,
            }
        } else {
            SendOutcome::Queued
        };
        queue.bytes.push_back(byte);
        if let SendOutcome::Overwrote(old) = outcome {
            log::warn!("{dir:?} queue full, dropped {old:#04X}");
        }
        outcome
    }

    pub fn try_receive(&mut self, dir: Direction) -> Option<u8> {
        self.queue_mut(dir).bytes.pop_front()
    }

    pub fn has_pending(&self, dir: Direction) -> bool {
        !self.queue(dir).bytes.is_empty()
    }

    pub fn len(&self, dir: Direction) -> usize {
        self.queue(dir).bytes.len()
    }

    pub fn is_empty(&self, dir: Direction) -> bool {
        self.queue(dir).bytes.is_empty()
    }

    pub fn overflows(&self, dir: Direction) -> u64 {
        self.queue(dir).overflows
    }

    /// Empties both queues and resets the overflow counters.
    pub fn clear(&mut self) {
        for dir in [Direction::MainToAudio, Direction::AudioToMain] {
            let queue = self.queue_mut(dir);
            queue.bytes.clear();
            queue.overflows = 0;
        }
    }
}
