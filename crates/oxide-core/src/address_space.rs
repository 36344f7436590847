// crates/oxide-core/src/address_space.rs
//! Mapa de regiones de un espacio de direcciones.
//!
//! Cada dirección (tras aplicar la máscara del bus) resuelve a exactamente una
//! región o a "sin mapear". La tabla de regiones vive detrás de un `RwLock`
//! compartido con el hilo de refresco: las lecturas del bus y el refresco toman
//! el candado compartido, las escrituras y la definición de regiones el
//! exclusivo. Así un acceso multi-byte nunca se observa a medias.

use crate::region::{Access, Backing, Endian, MemoryRegion, RegionClass, RegionInfo, SharedHandler};
use crate::{AccessKind, BusFault, ConfigError, FaultKind, MemoryBus, RegisterHandler};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Bytes covered by one DRAM refresh row.
const REFRESH_ROW: usize = 128;

const SELF_TEST_PATTERNS: [u8; 4] = [0x00, 0xFF, 0x55, 0xAA];

/// Geometría del bus: ancho, orden de bytes y reglas de alineación.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressLayout {
    pub mask: u32,
    pub endian: Endian,
    /// Multi-byte accesses must start at an even address.
    pub aligned: bool,
    /// Value returned by reads that fault.
    pub fill: u8,
}

impl AddressLayout {
    /// 32-bit big-endian bus with word alignment (Motorola 68k).
    pub const fn primary() -> Self {
        Self {
            mask: u32::MAX,
            endian: Endian::Big,
            aligned: true,
            fill: 0xFF,
        }
    }

    /// 16-bit little-endian bus without alignment rules (Zilog Z80).
    pub const fn secondary() -> Self {
        Self {
            mask: 0xFFFF,
            endian: Endian::Little,
            aligned: false,
            fill: 0xFF,
        }
    }

    pub const fn with_mask(mut self, mask: u32) -> Self {
        self.mask = mask;
        self
    }
}

#[derive(Default)]
struct RegionTable {
    // Ordenadas por dirección de inicio, sin solapamientos.
    regions: Vec<MemoryRegion>,
}

impl RegionTable {
    fn find(&self, addr: u32) -> Option<usize> {
        let idx = self.regions.partition_point(|r| r.start <= addr);
        if idx == 0 {
            return None;
        }
        self.regions[idx - 1].contains(addr).then_some(idx - 1)
    }

    // Touches one byte per row of every RAM-backed region; never writes.
    fn refresh_pass(&self) -> usize {
        let mut rows = 0;
        for region in &self.regions {
            if let Backing::Storage(mem) = &region.backing {
                if region.class.is_ram() {
                    for row in mem.chunks(REFRESH_ROW) {
                        std::hint::black_box(row[0]);
                        rows += 1;
                    }
                }
            }
        }
        rows
    }
}

struct RefreshWorker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfTestFailure {
    pub region: String,
    pub offset: u32,
    pub expected: u8,
    pub found: u8,
}

/// Resultado del auto-test de RAM de arranque.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelfTestReport {
    pub regions_tested: usize,
    pub bytes_tested: usize,
    pub failures: Vec<SelfTestFailure>,
}

impl SelfTestReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct AddressSpace {
    name: String,
    layout: AddressLayout,
    table: Arc<RwLock<RegionTable>>,
    fault: Cell<Option<BusFault>>,
    refresh: Option<RefreshWorker>,
    refresh_passes: Arc<AtomicU64>,
    refresh_started: bool,
}

fn lock_handler(handler: &SharedHandler) -> MutexGuard<'_, dyn RegisterHandler + 'static> {
    handler.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AddressSpace {
    pub fn new(name: impl Into<String>, layout: AddressLayout) -> Self {
        Self {
            name: name.into(),
            layout,
            table: Arc::new(RwLock::new(RegionTable::default())),
            fault: Cell::new(None),
            refresh: None,
            refresh_passes: Arc::new(AtomicU64::new(0)),
            refresh_started: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> AddressLayout {
        self.layout
    }

    fn read_table(&self) -> RwLockReadGuard<'_, RegionTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_table(&self) -> RwLockWriteGuard<'_, RegionTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------------
    //  Definición de regiones
    // ------------------------------------------------------------------------

    /// Adds a region. Fails without touching the table if it is empty, falls
    /// outside the bus mask or overlaps an existing region.
    pub fn define_region(&mut self, region: MemoryRegion) -> Result<(), ConfigError> {
        if region.size == 0 {
            return Err(ConfigError::EmptyRegion { name: region.name });
        }
        let last = region.start as u64 + region.size as u64 - 1;
        if region.start & !self.layout.mask != 0 || last > self.layout.mask as u64 {
            return Err(ConfigError::OutOfRange {
                name: region.name,
                start: region.start,
                size: region.size,
                mask: self.layout.mask,
            });
        }
        let last = last as u32;
        let mut table = self.write_table();
        if let Some(existing) = table
            .regions
            .iter()
            .find(|r| r.start <= last && region.start <= r.end())
        {
            return Err(ConfigError::Overlap {
                name: region.name,
                existing: existing.name.clone(),
            });
        }
        log::info!(
            "[{}] region `{}` {:#08X}-{:#08X} {:?} {:?}",
            self.name,
            region.name,
            region.start,
            last,
            region.access,
            region.class
        );
        let idx = table.regions.partition_point(|r| r.start < region.start);
        table.regions.insert(idx, region);
        Ok(())
    }

    /// Removes a region by name. Returns its metadata if it existed.
    pub fn remove_region(&mut self, name: &str) -> Option<RegionInfo> {
        let mut table = self.write_table();
        let idx = table.regions.iter().position(|r| r.name == name)?;
        Some(table.regions.remove(idx).info())
    }

    pub fn resolve(&self, addr: u32) -> Option<RegionInfo> {
        let addr = addr & self.layout.mask;
        let table = self.read_table();
        table.find(addr).map(|idx| table.regions[idx].info())
    }

    pub fn regions(&self) -> Vec<RegionInfo> {
        self.read_table().regions.iter().map(MemoryRegion::info).collect()
    }

    /// Copies a validated ROM image into the program-ROM region at `base`.
    pub fn load_rom(&mut self, bytes: &[u8], base: u32) -> Result<(), ConfigError> {
        let base = base & self.layout.mask;
        let mut table = self.write_table();
        let idx = table.find(base).ok_or(ConfigError::NoRomRegion { base })?;
        let region = &mut table.regions[idx];
        if region.class != RegionClass::ProgramRom {
            return Err(ConfigError::NoRomRegion { base });
        }
        let offset = (base - region.start) as usize;
        if offset + bytes.len() > region.size as usize {
            return Err(ConfigError::RomTooLarge {
                len: bytes.len(),
                base,
                region: region.name.clone(),
                end: region.end(),
            });
        }
        match &mut region.backing {
            Backing::Storage(mem) => mem[offset..offset + bytes.len()].copy_from_slice(bytes),
            Backing::Handler(_) => return Err(ConfigError::NoRomRegion { base }),
        }
        log::info!(
            "[{}] loaded {} bytes of ROM at {:#08X} into `{}`",
            self.name,
            bytes.len(),
            base,
            region.name
        );
        Ok(())
    }

    // ------------------------------------------------------------------------
    //  Accesos del bus
    // ------------------------------------------------------------------------

    fn locate(
        &self,
        table: &RegionTable,
        addr: u32,
        width: u32,
        access: AccessKind,
    ) -> Result<(usize, u32), FaultKind> {
        if width > 1 && self.layout.aligned && addr & 1 != 0 {
            return Err(FaultKind::Misaligned);
        }
        let idx = table.find(addr).ok_or(FaultKind::Unmapped)?;
        let region = &table.regions[idx];
        let offset = addr - region.start;
        if offset as u64 + width as u64 > region.size as u64 {
            return Err(FaultKind::Straddle);
        }
        let allowed = match access {
            AccessKind::Read => region.access.readable(),
            AccessKind::Write => region.access.writable(),
        };
        if !allowed {
            return Err(match (region.access, access) {
                (Access::None, _) => FaultKind::NoAccess,
                (_, AccessKind::Read) => FaultKind::WriteOnly,
                (_, AccessKind::Write) => FaultKind::ReadOnly,
            });
        }
        Ok((idx, offset))
    }

    fn latch(&self, addr: u32, kind: FaultKind, access: AccessKind) {
        log::trace!("[{}] bus fault {:?} {:?} at {:#08X}", self.name, kind, access, addr);
        if self.fault.get().is_none() {
            self.fault.set(Some(BusFault { addr, kind, access }));
        }
    }

    pub fn read8(&self, addr: u32) -> u8 {
        let addr = addr & self.layout.mask;
        let table = self.read_table();
        match self.locate(&table, addr, 1, AccessKind::Read) {
            Ok((idx, offset)) => match &table.regions[idx].backing {
                Backing::Storage(mem) => mem[offset as usize],
                Backing::Handler(h) => lock_handler(h).read8(offset),
            },
            Err(kind) => {
                self.latch(addr, kind, AccessKind::Read);
                self.layout.fill
            }
        }
    }

    pub fn read16(&self, addr: u32) -> u16 {
        let addr = addr & self.layout.mask;
        let order = self.layout.endian;
        let table = self.read_table();
        match self.locate(&table, addr, 2, AccessKind::Read) {
            Ok((idx, offset)) => match &table.regions[idx].backing {
                Backing::Storage(mem) => {
                    let o = offset as usize;
                    order.join16(mem[o], mem[o + 1])
                }
                Backing::Handler(h) => lock_handler(h).read16(offset, order),
            },
            Err(kind) => {
                self.latch(addr, kind, AccessKind::Read);
                u16::from_ne_bytes([self.layout.fill; 2])
            }
        }
    }

    pub fn read32(&self, addr: u32) -> u32 {
        let addr = addr & self.layout.mask;
        let order = self.layout.endian;
        let table = self.read_table();
        match self.locate(&table, addr, 4, AccessKind::Read) {
            Ok((idx, offset)) => match &table.regions[idx].backing {
                Backing::Storage(mem) => {
                    let o = offset as usize;
                    let first = order.join16(mem[o], mem[o + 1]);
                    let second = order.join16(mem[o + 2], mem[o + 3]);
                    order.join32(first, second)
                }
                Backing::Handler(h) => {
                    let mut dev = lock_handler(h);
                    let first = dev.read16(offset, order);
                    let second = dev.read16(offset + 2, order);
                    order.join32(first, second)
                }
            },
            Err(kind) => {
                self.latch(addr, kind, AccessKind::Read);
                u32::from_ne_bytes([self.layout.fill; 4])
            }
        }
    }

    pub fn write8(&mut self, addr: u32, value: u8) {
        let addr = addr & self.layout.mask;
        let mut table = self.write_table();
        match self.locate(&table, addr, 1, AccessKind::Write) {
            Ok((idx, offset)) => match &mut table.regions[idx].backing {
                Backing::Storage(mem) => mem[offset as usize] = value,
                Backing::Handler(h) => lock_handler(h).write8(offset, value),
            },
            Err(kind) => self.latch(addr, kind, AccessKind::Write),
        }
    }

    pub fn write16(&mut self, addr: u32, value: u16) {
        let addr = addr & self.layout.mask;
        let order = self.layout.endian;
        let mut table = self.write_table();
        match self.locate(&table, addr, 2, AccessKind::Write) {
            Ok((idx, offset)) => match &mut table.regions[idx].backing {
                Backing::Storage(mem) => {
                    let o = offset as usize;
                    mem[o..o + 2].copy_from_slice(&order.split16(value));
                }
                Backing::Handler(h) => lock_handler(h).write16(offset, value, order),
            },
            Err(kind) => self.latch(addr, kind, AccessKind::Write),
        }
    }

    pub fn write32(&mut self, addr: u32, value: u32) {
        let addr = addr & self.layout.mask;
        let order = self.layout.endian;
        let [first, second] = order.split32(value);
        let mut table = self.write_table();
        match self.locate(&table, addr, 4, AccessKind::Write) {
            Ok((idx, offset)) => match &mut table.regions[idx].backing {
                Backing::Storage(mem) => {
                    let o = offset as usize;
                    mem[o..o + 2].copy_from_slice(&order.split16(first));
                    mem[o + 2..o + 4].copy_from_slice(&order.split16(second));
                }
                Backing::Handler(h) => {
                    let mut dev = lock_handler(h);
                    dev.write16(offset, first, order);
                    dev.write16(offset + 2, second, order);
                }
            },
            Err(kind) => self.latch(addr, kind, AccessKind::Write),
        }
    }

    /// Fault latched since the last `take_fault`, without clearing it.
    pub fn pending_fault(&self) -> Option<BusFault> {
        self.fault.get()
    }

    // ------------------------------------------------------------------------
    //  Depuración
    // ------------------------------------------------------------------------

    /// Reads raw storage without access checks, faults or peripheral side effects.
    /// Returns `None` for handler regions and unmapped addresses.
    pub fn peek(&self, addr: u32) -> Option<u8> {
        let addr = addr & self.layout.mask;
        let table = self.read_table();
        let idx = table.find(addr)?;
        let region = &table.regions[idx];
        match &region.backing {
            Backing::Storage(mem) => Some(mem[(addr - region.start) as usize]),
            Backing::Handler(_) => None,
        }
    }

    /// Writes raw storage ignoring the access mode (debugger patching of ROM).
    pub fn poke(&mut self, addr: u32, value: u8) -> bool {
        let addr = addr & self.layout.mask;
        let mut table = self.write_table();
        let Some(idx) = table.find(addr) else {
            return false;
        };
        let region = &mut table.regions[idx];
        let offset = (addr - region.start) as usize;
        match &mut region.backing {
            Backing::Storage(mem) => {
                mem[offset] = value;
                true
            }
            Backing::Handler(_) => false,
        }
    }

    // ------------------------------------------------------------------------
    //  Auto-test y refresco
    // ------------------------------------------------------------------------

    /// Pattern test of every writable RAM region, leaving them zero-filled.
    /// Only legal before the refresh thread has been started.
    pub fn self_test(&mut self) -> Result<SelfTestReport, ConfigError> {
        if self.refresh_started {
            return Err(ConfigError::SelfTestAfterStart);
        }
        let mut report = SelfTestReport::default();
        let mut table = self.write_table();
        for region in table.regions.iter_mut() {
            if !region.class.is_ram() || region.access != Access::ReadWrite {
                continue;
            }
            let Backing::Storage(mem) = &mut region.backing else {
                continue;
            };
            report.regions_tested += 1;
            report.bytes_tested += mem.len();
            for pattern in SELF_TEST_PATTERNS {
                mem.fill(pattern);
                verify(&region.name, mem, |_| pattern, &mut report.failures);
            }
            let address_pattern = |i: usize| (i as u8) ^ ((i >> 8) as u8);
            for (i, b) in mem.iter_mut().enumerate() {
                *b = address_pattern(i);
            }
            verify(&region.name, mem, address_pattern, &mut report.failures);
            mem.fill(0);
        }
        log::info!(
            "[{}] self-test: {} regions, {} bytes, {}",
            self.name,
            report.regions_tested,
            report.bytes_tested,
            if report.passed() { "PASS" } else { "FAIL" }
        );
        Ok(report)
    }

    /// Starts the background refresh thread. A no-op if it is already running.
    pub fn start_refresh(&mut self, interval: Duration) -> std::io::Result<()> {
        if self.refresh.is_some() {
            return Ok(());
        }
        let table = Arc::clone(&self.table);
        let passes = Arc::clone(&self.refresh_passes);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(format!("{}-refresh", self.name))
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    thread::park_timeout(interval);
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    let rows = table
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .refresh_pass();
                    passes.fetch_add(1, Ordering::Relaxed);
                    log::trace!("refresh pass over {rows} rows");
                }
            })?;
        self.refresh_started = true;
        self.refresh = Some(RefreshWorker { stop, handle });
        log::debug!("[{}] refresh thread started ({:?})", self.name, interval);
        Ok(())
    }

    pub fn stop_refresh(&mut self) {
        if let Some(worker) = self.refresh.take() {
            worker.stop.store(true, Ordering::Release);
            worker.handle.thread().unpark();
            if worker.handle.join().is_err() {
                log::warn!("[{}] refresh thread panicked", self.name);
            }
        }
    }

    pub fn refresh_running(&self) -> bool {
        self.refresh.is_some()
    }

    pub fn refresh_passes(&self) -> u64 {
        self.refresh_passes.load(Ordering::Relaxed)
    }
}

fn verify(
    region: &str,
    mem: &[u8],
    expected: impl Fn(usize) -> u8,
    failures: &mut Vec<SelfTestFailure>,
) {
    for (i, &found) in mem.iter().enumerate() {
        let want = expected(i);
        if found != want {
            failures.push(SelfTestFailure {
                region: region.to_string(),
                offset: i as u32,
                expected: want,
                found,
            });
        }
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.stop_refresh();
    }
}

impl MemoryBus for AddressSpace {
    fn read(&self, addr: u32) -> u8 {
        self.read8(addr)
    }

    fn write(&mut self, addr: u32, val: u8) {
        self.write8(addr, val)
    }

    fn read_u16(&self, addr: u32) -> u16 {
        self.read16(addr)
    }

    fn read_u32(&self, addr: u32) -> u32 {
        self.read32(addr)
    }

    fn write_u16(&mut self, addr: u32, val: u16) {
        self.write16(addr, val)
    }

    fn write_u32(&mut self, addr: u32, val: u32) {
        self.write32(addr, val)
    }

    fn take_fault(&mut self) -> Option<BusFault> {
        self.fault.take()
    }
}
