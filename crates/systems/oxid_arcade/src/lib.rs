// crates/systems/oxid_arcade/src/lib.rs
//! Placa arcade de dos CPUs: 68000 para la lógica del juego y Z80 para el
//! sonido, con RAM de sonido compartida y un canal de mensajes entre ambas.

pub mod board;
pub mod config;
pub mod map;
pub mod peripherals;

pub use board::{Board, FrameReport, SchedulerError, SchedulerState};
pub use config::{AudioMessageLine, BoardConfig, HardwareVariant};
pub use peripherals::{AudioControl, ChannelPort, SharedRam};
