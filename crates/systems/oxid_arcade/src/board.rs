// crates/systems/oxid_arcade/src/board.rs
//! La placa completa y su planificador de frames.
//!
//! `Board::run_cycle` es el único punto que avanza el estado: convierte un
//! intervalo de tiempo en presupuestos de ciclos para cada CPU y los reparte
//! en rebanadas de una línea de vídeo (68k, después Z80, después audio y
//! vídeo), de modo que un mensaje o interrupción que una CPU levanta para la
//! otra se ve como mucho una rebanada más tarde.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use oxid68k::Oxid68k;
use oxid_input::{ports, InputPorts};
use oxide_core::{
    Access, AddressLayout, AddressSpace, AudioLine, AudioSink, ConfigError, Cpu, CpuId,
    CrossCpuChannel, ExecState, HookError, HookFn, InterruptController, InterruptRequest,
    MemoryBus, MemoryRegion, NullAudio, NullVideo, RegionClass, RegisterHandler, SharedHandler,
    VideoSink,
};
use oxidz80::OxidZ80;
use thiserror::Error;

use crate::config::{AudioMessageLine, BoardConfig};
use crate::map;
use crate::peripherals::{lock, AudioControl, ChannelPort, SharedRam};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("run_cycle called before power_on")]
    NotInitialized,
    #[error("invalid delta time {0} ms")]
    InvalidDelta(f64),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("self-test failed on `{space}` ({failures} mismatches)")]
    SelfTest { space: String, failures: usize },
    #[error("cannot start refresh thread: {0}")]
    Refresh(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Paused,
    Resetting,
}

/// Lo que hizo una llamada a `run_cycle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Cycles granted by the elapsed time, before paying previous overshoot.
    pub main_budget: u64,
    pub audio_budget: u64,
    /// Cycles consumed. Idle time of a halted or held CPU counts as consumed.
    pub main_cycles: u64,
    pub audio_cycles: u64,
    pub slices: u32,
    pub frames_completed: u32,
    /// Scanline reached at the end of the call.
    pub scanline: u32,
}

#[derive(Debug, Default)]
struct Timing {
    main_carry: f64,
    audio_carry: f64,
    main_debt: u64,
    audio_debt: u64,
    /// Main CPU cycles into the current scanline.
    line_progress: f64,
    scanline: u32,
    frames: u64,
}

pub struct Board {
    config: BoardConfig,
    state: SchedulerState,
    powered: bool,
    throttle: f64,
    timing: Timing,

    main_cpu: Oxid68k,
    audio_cpu: OxidZ80,
    main_bus: AddressSpace,
    audio_bus: AddressSpace,
    irq: InterruptController,

    channel: Arc<Mutex<CrossCpuChannel>>,
    sound_ram: Arc<Mutex<SharedRam>>,
    audio_control: Arc<Mutex<AudioControl>>,
    input: Arc<Mutex<InputPorts>>,
    video: Arc<Mutex<dyn VideoSink>>,
    audio_chip: Arc<Mutex<dyn AudioSink>>,
}

impl Board {
    /// Placa con vídeo y audio nulos.
    pub fn new(config: BoardConfig, rom: &[u8]) -> Result<Self, SchedulerError> {
        Self::with_collaborators(
            config,
            rom,
            Arc::new(Mutex::new(NullVideo::default())),
            Arc::new(Mutex::new(NullAudio::default())),
        )
    }

    /// Builds both memory maps around the given video and audio chips.
    /// Nothing runs until [`Board::power_on`].
    pub fn with_collaborators<V, A>(
        config: BoardConfig,
        rom: &[u8],
        video: Arc<Mutex<V>>,
        audio_chip: Arc<Mutex<A>>,
    ) -> Result<Self, SchedulerError>
    where
        V: VideoSink + RegisterHandler + 'static,
        A: AudioSink + RegisterHandler + 'static,
    {
        config.validate()?;

        let irq = InterruptController::new();
        let channel = Arc::new(Mutex::new(CrossCpuChannel::new(config.channel_capacity)));
        let sound_ram = Arc::new(Mutex::new(SharedRam::new(config.sound_ram_size)));
        let audio_control = Arc::new(Mutex::new(AudioControl::new()));
        let input = Arc::new(Mutex::new(InputPorts::new()));

        let to_audio = match config.audio_message_line {
            AudioMessageLine::Nmi => InterruptRequest::Audio(AudioLine::NonMaskable),
            AudioMessageLine::Maskable => {
                InterruptRequest::Audio(AudioLine::Maskable { data: 0xFF })
            }
        };
        let to_main = InterruptRequest::Main {
            level: config.message_level,
            vector: None,
        };
        let main_port: SharedHandler = Arc::new(Mutex::new(ChannelPort::new(
            CpuId::Main,
            Arc::clone(&channel),
            irq.clone(),
            to_audio,
        )));
        let audio_port: SharedHandler = Arc::new(Mutex::new(ChannelPort::new(
            CpuId::Audio,
            Arc::clone(&channel),
            irq.clone(),
            to_main,
        )));

        let video_regs: SharedHandler = video.clone();
        let chip_regs: SharedHandler = audio_chip.clone();

        // --- Bus principal ---
        let mut main_bus = AddressSpace::new(
            "main",
            AddressLayout::primary().with_mask(map::main::ADDRESS_MASK),
        );
        main_bus.define_region(MemoryRegion::storage(
            "rom",
            map::main::ROM,
            config.rom_size,
            Access::ReadOnly,
            RegionClass::ProgramRom,
        ))?;
        main_bus.define_region(MemoryRegion::handler(
            "sound_ram",
            map::main::SOUND_RAM,
            config.sound_ram_size,
            Access::ReadWrite,
            RegionClass::SoundRam,
            sound_ram.clone(),
        ))?;
        main_bus.define_region(MemoryRegion::handler(
            "input",
            map::main::INPUT,
            ports::SIZE,
            Access::ReadWrite,
            RegionClass::DeviceRegisters,
            input.clone(),
        ))?;
        main_bus.define_region(MemoryRegion::handler(
            "audio_control",
            map::main::AUDIO_CONTROL,
            map::main::AUDIO_CONTROL_SIZE,
            Access::ReadWrite,
            RegionClass::DeviceRegisters,
            audio_control.clone(),
        ))?;
        main_bus.define_region(MemoryRegion::handler(
            "channel",
            map::main::CHANNEL,
            map::main::CHANNEL_SIZE,
            Access::ReadWrite,
            RegionClass::DeviceRegisters,
            main_port,
        ))?;
        main_bus.define_region(MemoryRegion::handler(
            "video",
            map::main::VIDEO,
            map::main::VIDEO_SIZE,
            Access::ReadWrite,
            RegionClass::DeviceRegisters,
            video_regs,
        ))?;
        main_bus.define_region(MemoryRegion::storage(
            "work_ram",
            map::main::WORK_RAM,
            config.work_ram_size,
            Access::ReadWrite,
            RegionClass::WorkRam,
        ))?;
        main_bus.load_rom(rom, map::main::ROM)?;

        // --- Bus de sonido ---
        let mut audio_bus = AddressSpace::new("audio", AddressLayout::secondary());
        audio_bus.define_region(MemoryRegion::handler(
            "sound_ram",
            map::audio::SOUND_RAM,
            config.sound_ram_size,
            Access::ReadWrite,
            RegionClass::SoundRam,
            sound_ram.clone(),
        ))?;
        audio_bus.define_region(MemoryRegion::handler(
            "audio_chip",
            map::audio::AUDIO_CHIP,
            map::audio::AUDIO_CHIP_SIZE,
            Access::ReadWrite,
            RegionClass::DeviceRegisters,
            chip_regs,
        ))?;
        audio_bus.define_region(MemoryRegion::handler(
            "channel",
            map::audio::CHANNEL,
            map::audio::CHANNEL_SIZE,
            Access::ReadWrite,
            RegionClass::DeviceRegisters,
            audio_port,
        ))?;

        log::info!(
            "board {:?}: main {} Hz, audio {} Hz, {} lines @ {} Hz",
            config.variant,
            config.main_clock_hz,
            config.audio_clock_hz,
            config.lines_per_frame,
            config.frames_per_second
        );

        Ok(Self {
            config,
            state: SchedulerState::Running,
            powered: false,
            throttle: 1.0,
            timing: Timing::default(),
            main_cpu: Oxid68k::new(),
            audio_cpu: OxidZ80::new(),
            main_bus,
            audio_bus,
            irq,
            channel,
            sound_ram,
            audio_control,
            input,
            video,
            audio_chip,
        })
    }

    // ------------------------------------------------------------------------
    //  Ciclo de vida
    // ------------------------------------------------------------------------

    /// Self-test and refresh thread (first call only), then a full reset.
    pub fn power_on(&mut self) -> Result<(), SchedulerError> {
        if !self.powered {
            if self.config.run_self_test {
                for bus in [&mut self.main_bus, &mut self.audio_bus] {
                    let report = bus.self_test()?;
                    if !report.passed() {
                        log::error!("[{}] self-test failed: {:?}", bus.name(), report.failures);
                        return Err(SchedulerError::SelfTest {
                            space: bus.name().to_string(),
                            failures: report.failures.len(),
                        });
                    }
                }
            }
            if let Some(ms) = self.config.refresh_interval_ms {
                let interval = Duration::from_millis(ms);
                self.main_bus.start_refresh(interval)?;
                self.audio_bus.start_refresh(interval)?;
            }
        }
        self.reinit();
        self.powered = true;
        self.state = SchedulerState::Running;
        log::info!("board powered on");
        Ok(())
    }

    /// Both CPUs back to their power-on registers, interrupts and queues
    /// emptied. Calling it twice leaves the same state as calling it once.
    pub fn reset(&mut self) -> Result<(), SchedulerError> {
        if !self.powered {
            return Err(SchedulerError::NotInitialized);
        }
        self.state = SchedulerState::Resetting;
        self.reinit();
        self.state = SchedulerState::Running;
        log::info!("board reset");
        Ok(())
    }

    fn reinit(&mut self) {
        self.main_cpu.reset();
        self.audio_cpu.reset();
        self.irq.clear_all();
        lock(&self.channel).clear();
        lock(&self.audio_control).clear();
        self.main_bus.take_fault();
        self.audio_bus.take_fault();
        self.timing = Timing::default();
    }

    pub fn pause(&mut self) {
        if self.state == SchedulerState::Running {
            self.state = SchedulerState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state == SchedulerState::Paused {
            self.state = SchedulerState::Running;
        }
    }

    /// Scales every budget by `factor` (clamped to 0..=1).
    /// Interrupts already pending are still delivered at throttle 0.
    pub fn set_throttle(&mut self, factor: f64) {
        if factor.is_nan() {
            log::warn!("ignoring NaN throttle");
            return;
        }
        self.throttle = factor.clamp(0.0, 1.0);
    }

    pub fn throttle(&self) -> f64 {
        self.throttle
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    //  Planificador
    // ------------------------------------------------------------------------

    /// Advances the whole board by `delta_ms` of emulated time.
    pub fn run_cycle(&mut self, delta_ms: f64) -> Result<FrameReport, SchedulerError> {
        if !self.powered {
            return Err(SchedulerError::NotInitialized);
        }
        if !delta_ms.is_finite() || delta_ms < 0.0 {
            return Err(SchedulerError::InvalidDelta(delta_ms));
        }

        // Pausa = throttle 0: el tiempo no avanza, las interrupciones sí.
        let factor = match self.state {
            SchedulerState::Paused => 0.0,
            _ => self.throttle,
        };
        let main_budget = budget(
            self.config.main_clock_hz,
            delta_ms,
            factor,
            &mut self.timing.main_carry,
        );
        let audio_budget = budget(
            self.config.audio_clock_hz,
            delta_ms,
            factor,
            &mut self.timing.audio_carry,
        );
        let mut main_target = pay_debt(main_budget, &mut self.timing.main_debt);
        let mut audio_target = pay_debt(audio_budget, &mut self.timing.audio_debt);
        if main_target == 0 && self.main_wants_service() {
            main_target = 1;
        }
        if audio_target == 0 && self.audio_wants_service() {
            audio_target = 1;
        }

        let mut report = FrameReport {
            main_budget,
            audio_budget,
            ..FrameReport::default()
        };

        let lines = self.config.lines_per_frame as f64 * self.config.frames_per_second as f64;
        let main_per_line = self.config.main_clock_hz as f64 / lines;
        let audio_line = (self.config.audio_clock_hz as f64 / lines).ceil().max(1.0) as u64;

        let mut main_done = 0u64;
        let mut audio_done = 0u64;
        while main_done < main_target || audio_done < audio_target {
            // 1. CPU principal hasta el final de la línea actual.
            let to_line = (main_per_line - self.timing.line_progress).ceil().max(1.0) as u64;
            let main_slice = to_line.min(main_target.saturating_sub(main_done));
            let main_ran = if main_slice > 0 {
                self.run_main(main_slice as u32) as u64
            } else {
                0
            };
            main_done += main_ran;

            if lock(&self.audio_control).take_restart() {
                log::debug!("audio CPU released from reset");
                self.audio_cpu.reset();
            }

            // 2. CPU de sonido, en proporción a lo que avanzó la principal.
            let audio_due = audio_share(audio_target, main_done, main_target);
            let audio_slice = audio_due.saturating_sub(audio_done).min(audio_line);
            if audio_slice > 0 {
                let audio_ran = self.run_audio(audio_slice as u32);
                audio_done += audio_ran as u64;
                // 3. Muestras de audio por los ciclos que consumió el Z80.
                lock(&self.audio_chip).generate_samples(audio_ran);
            }

            // 4. Vídeo.
            report.frames_completed += self.advance_video(main_ran, main_per_line);
            report.slices += 1;
        }

        self.timing.main_debt += main_done.saturating_sub(main_target);
        self.timing.audio_debt += audio_done.saturating_sub(audio_target);
        report.main_cycles = main_done;
        report.audio_cycles = audio_done;
        report.scanline = self.timing.scanline;
        log::trace!("{report:?}");
        Ok(report)
    }

    fn main_wants_service(&self) -> bool {
        !self.main_cpu.is_double_faulted()
            && self
                .irq
                .can_accept_main(self.main_cpu.registers().status().int_mask)
    }

    fn audio_wants_service(&self) -> bool {
        !lock(&self.audio_control).holds_audio()
            && self.irq.can_accept_audio(self.audio_cpu.registers().iff1)
    }

    /// Runs the main CPU for `slice` cycles. A halted CPU idles out the slice.
    fn run_main(&mut self, slice: u32) -> u32 {
        let mut used = 0u32;
        while used < slice {
            let ran = self
                .main_cpu
                .execute(&mut self.main_bus, &self.irq, slice - used);
            used = used.saturating_add(ran);
            if ran == 0
                || (self.main_cpu.state() == ExecState::Halted && !self.main_wants_service())
            {
                return used.max(slice);
            }
        }
        used
    }

    fn run_audio(&mut self, slice: u32) -> u32 {
        if lock(&self.audio_control).holds_audio() {
            return slice;
        }
        let mut used = 0u32;
        while used < slice {
            let ran = self
                .audio_cpu
                .execute(&mut self.audio_bus, &self.irq, slice - used);
            used = used.saturating_add(ran);
            if ran == 0
                || (self.audio_cpu.state() == ExecState::Halted && !self.audio_wants_service())
            {
                return used.max(slice);
            }
        }
        used
    }

    /// Returns the number of frames completed.
    fn advance_video(&mut self, cycles: u64, main_per_line: f64) -> u32 {
        let mut frames = 0;
        self.timing.line_progress += cycles as f64;
        while self.timing.line_progress >= main_per_line {
            self.timing.line_progress -= main_per_line;
            self.timing.scanline += 1;
            if self.timing.scanline >= self.config.lines_per_frame {
                self.timing.scanline = 0;
                self.end_frame();
                frames += 1;
            }
            lock(&self.video).notify_scanline(self.timing.scanline);
        }
        frames
    }

    fn end_frame(&mut self) {
        lock(&self.video).notify_frame_complete();
        self.irq.raise(InterruptRequest::Main {
            level: self.config.vblank_level,
            vector: None,
        });
        self.irq
            .raise(InterruptRequest::Audio(AudioLine::Maskable { data: 0xFF }));
        self.timing.frames += 1;
        log::trace!("frame {} complete", self.timing.frames);
    }

    pub fn frames(&self) -> u64 {
        self.timing.frames
    }

    pub fn scanline(&self) -> u32 {
        self.timing.scanline
    }

    // ------------------------------------------------------------------------
    //  Depuración
    // ------------------------------------------------------------------------

    pub fn main_registers(&self) -> &oxid68k::Registers {
        self.main_cpu.registers()
    }

    pub fn main_registers_mut(&mut self) -> &mut oxid68k::Registers {
        self.main_cpu.registers_mut()
    }

    pub fn audio_registers(&self) -> &oxidz80::Registers {
        self.audio_cpu.registers()
    }

    pub fn audio_registers_mut(&mut self) -> &mut oxidz80::Registers {
        self.audio_cpu.registers_mut()
    }

    pub fn main_state(&self) -> ExecState {
        self.main_cpu.state()
    }

    pub fn audio_state(&self) -> ExecState {
        self.audio_cpu.state()
    }

    pub fn register_main_hook(
        &mut self,
        addr: u32,
        hook: HookFn<oxid68k::Registers>,
    ) -> Result<(), HookError> {
        self.main_cpu.register_hook(addr, hook)
    }

    pub fn register_audio_hook(
        &mut self,
        addr: u32,
        hook: HookFn<oxidz80::Registers>,
    ) -> Result<(), HookError> {
        self.audio_cpu.register_hook(addr, hook)
    }

    /// Lectura sin efectos laterales. La RAM de sonido se lee directamente.
    pub fn peek_main(&self, addr: u32) -> Option<u8> {
        let addr = addr & map::main::ADDRESS_MASK;
        match self.sound_ram_offset(addr, map::main::SOUND_RAM) {
            Some(offset) => lock(&self.sound_ram).get(offset),
            None => self.main_bus.peek(addr),
        }
    }

    /// Escritura de depuración; ignora el modo de acceso (parches en ROM).
    pub fn poke_main(&mut self, addr: u32, value: u8) -> bool {
        let addr = addr & map::main::ADDRESS_MASK;
        match self.sound_ram_offset(addr, map::main::SOUND_RAM) {
            Some(offset) => lock(&self.sound_ram).set(offset, value),
            None => self.main_bus.poke(addr, value),
        }
    }

    pub fn peek_audio(&self, addr: u16) -> Option<u8> {
        match self.sound_ram_offset(addr as u32, map::audio::SOUND_RAM) {
            Some(offset) => lock(&self.sound_ram).get(offset),
            None => self.audio_bus.peek(addr as u32),
        }
    }

    pub fn poke_audio(&mut self, addr: u16, value: u8) -> bool {
        match self.sound_ram_offset(addr as u32, map::audio::SOUND_RAM) {
            Some(offset) => lock(&self.sound_ram).set(offset, value),
            None => self.audio_bus.poke(addr as u32, value),
        }
    }

    /// Copies a sound program into the shared RAM, as the main CPU would.
    pub fn load_sound_program(&mut self, offset: u32, bytes: &[u8]) -> Result<(), ConfigError> {
        let mut ram = lock(&self.sound_ram);
        let end = offset as usize + bytes.len();
        if end > ram.len() {
            return Err(ConfigError::Invalid(format!(
                "sound program of {} bytes at {offset:#X} exceeds {:#X} bytes of sound RAM",
                bytes.len(),
                ram.len()
            )));
        }
        for (i, &b) in bytes.iter().enumerate() {
            ram.set(offset + i as u32, b);
        }
        Ok(())
    }

    fn sound_ram_offset(&self, addr: u32, base: u32) -> Option<u32> {
        let offset = addr.wrapping_sub(base);
        (offset < self.config.sound_ram_size).then_some(offset)
    }

    pub fn main_bus(&self) -> &AddressSpace {
        &self.main_bus
    }

    pub fn audio_bus(&self) -> &AddressSpace {
        &self.audio_bus
    }

    pub fn interrupts(&self) -> &InterruptController {
        &self.irq
    }

    pub fn channel(&self) -> Arc<Mutex<CrossCpuChannel>> {
        Arc::clone(&self.channel)
    }

    pub fn input(&self) -> Arc<Mutex<InputPorts>> {
        Arc::clone(&self.input)
    }

    pub fn audio_held(&self) -> bool {
        lock(&self.audio_control).holds_audio()
    }
}

/// Cycles for `delta_ms` at `clock_hz`, carrying the fractional part.
fn budget(clock_hz: u32, delta_ms: f64, factor: f64, carry: &mut f64) -> u64 {
    let exact = clock_hz as f64 * delta_ms / 1000.0 * factor + *carry;
    let whole = exact.floor();
    *carry = exact - whole;
    whole as u64
}

/// Overshoot from the previous call is paid out of this call's budget.
fn pay_debt(budget: u64, debt: &mut u64) -> u64 {
    let paid = budget.min(*debt);
    *debt -= paid;
    budget - paid
}

/// Share of `audio_target` owed once the main CPU has run `main_done` of
/// `main_target`. El producto no cabe en u64 con deltas largos.
fn audio_share(audio_target: u64, main_done: u64, main_target: u64) -> u64 {
    if main_done >= main_target {
        return audio_target;
    }
    (audio_target as u128 * main_done as u128 / main_target as u128) as u64
}
