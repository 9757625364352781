//! The PC-hook stub fabric: every guest library entry point the firmware
//! calls without the real implementation underneath (ROM helpers, FreeRTOS,
//! `esp_timer`, display/touch/SD drivers, crypto) gets a Rust closure
//! installed at its symbol's address via [`hooks::HookTable`]. Grounded in
//! `examples/original_source/src/emu_freertos.c` and friends, which play the
//! same role for the C interpreter: host code standing in for an entry point
//! the firmware expects to find in flash.
//!
//! [`StubContext`] bundles every shared handle a pack might need; packs
//! themselves live one file per subsystem under this module and each expose
//! a `register` function that resolves symbol names through
//! [`crate::symbols::SymbolTable`] and installs a [`crate::hooks::Hook`] at
//! the resolved PC, matching `SPEC_FULL.md` §4.4's "missing symbol is a
//! warning, not an error" rule (a firmware image that never calls a given
//! entry point shouldn't fail to boot just because that symbol isn't in its
//! table).

pub mod crypto_pack;
pub mod display_pack;
pub mod freertos_pack;
pub mod rom;
pub mod sdcard_pack;
pub mod timer_pack;
pub mod touch_pack;
pub mod wifi_pack;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::BoardProfile;
use crate::display::Display;
use crate::esp_timer::EspTimerDaemon;
use crate::hooks::HookTable;
use crate::memory::{AddressSpace, MmioDevice, OperandSize};
use crate::nvs::Nvs;
use crate::rtos::{EventGroup, Queue, Runtime, Semaphore, TimerDaemon};
use crate::sdcard::SdCard;
use crate::symbols::SymbolTable;
use crate::touch::TouchCallback;

/// A queued `xTaskCreate` record. The FreeRTOS pack spawns a genuine host
/// thread for each one (`Runtime::spawn_task`, running its own interpreter
/// against the shared address space/hook table), but also queues the record
/// here: `take_deferred_task_by_id`/`pop_deferred_task` race to claim it
/// exactly once, so whichever gets there first — the spawned thread itself,
/// or a core stuck in its own boot self-branch looking for something to run
/// — the task body runs on exactly one of them, generalizing the boot-task
/// dispatch in `examples/original_source/src/emu_flexe.c`'s `emu_flexe_run`.
#[derive(Debug, Clone, Copy)]
pub struct DeferredTask {
    pub id: u32,
    pub entry_pc: u32,
    pub param: u32,
}

/// Dense integer handle table for guest-opaque objects (semaphores, queues,
/// event groups) that, unlike `esp_timer`/FreeRTOS-timer handles, have no
/// natural dense id of their own. Handle `0` is reserved as "never valid"
/// so a zeroed guest pointer never aliases a live slot.
pub struct HandleTable<T> {
    slots: Mutex<Vec<Option<Arc<T>>>>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self { slots: Mutex::new(Vec::new()) }
    }
}

impl<T> HandleTable<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, value: T) -> u32 {
        let mut guard = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some((i, slot)) = guard.iter_mut().enumerate().find(|(_, s)| s.is_none()) {
            *slot = Some(Arc::new(value));
            return (i + 1) as u32;
        }
        guard.push(Some(Arc::new(value)));
        guard.len() as u32
    }

    #[must_use]
    pub fn get(&self, handle: u32) -> Option<Arc<T>> {
        if handle == 0 {
            return None;
        }
        self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(handle as usize - 1)?.clone()
    }

    pub fn remove(&self, handle: u32) {
        if handle == 0 {
            return;
        }
        if let Some(slot) = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get_mut(handle as usize - 1) {
            *slot = None;
        }
    }
}

/// Fire-once AppCPU release latch backing the APPCPU_CTRL_A/B MMIO pair
/// (`SPEC_FULL.md` §8 scenario 3). Real silicon exposes a pair of DPORT
/// registers whose bit layout encodes a reset-vector override; this models
/// only the one behavior the spec tests — write the boot address, then
/// release — rather than the full register semantics.
pub struct AppCpuBoot {
    released: AtomicBool,
    boot_addr: AtomicU32,
}

impl AppCpuBoot {
    #[must_use]
    pub fn new() -> Self {
        Self { released: AtomicBool::new(false), boot_addr: AtomicU32::new(0) }
    }

    /// Swaps `released` to `false` and returns the boot address if this is
    /// the first observation since the last release — so the session's
    /// post-batch poll starts core 1 exactly once per release.
    pub fn take_release(&self) -> Option<u32> {
        if self.released.swap(false, Ordering::SeqCst) {
            Some(self.boot_addr.load(Ordering::SeqCst))
        } else {
            None
        }
    }
}

impl Default for AppCpuBoot {
    fn default() -> Self {
        Self::new()
    }
}

/// The MMIO device backing APPCPU_CTRL_A (boot address, offset 0) and
/// APPCPU_CTRL_B (release strobe, offset 4): writing any nonzero value to
/// APPCPU_CTRL_B latches a release.
struct AppCpuMmio(Arc<AppCpuBoot>);

impl MmioDevice for AppCpuMmio {
    fn read(&mut self, offset: u32, _size: OperandSize) -> u32 {
        if offset == 0 {
            self.0.boot_addr.load(Ordering::SeqCst)
        } else {
            u32::from(self.0.released.load(Ordering::SeqCst))
        }
    }

    fn write(&mut self, offset: u32, value: u32, _size: OperandSize) {
        if offset == 0 {
            self.0.boot_addr.store(value, Ordering::SeqCst);
        } else if value != 0 {
            self.0.released.store(true, Ordering::SeqCst);
        }
    }
}

pub const APPCPU_CTRL_BASE: u32 = crate::memory::DPORT_BASE + 0x1000;
pub const APPCPU_CTRL_SIZE: u32 = 8;

/// Every handle a stub pack might need, shared across both CPU cores and
/// every background daemon thread. Constructed once by the session and
/// handed to each pack's `register` call as an `Arc`.
pub struct StubContext {
    pub runtime: Runtime,
    pub rtos_timers: TimerDaemon,
    pub esp_timers: EspTimerDaemon,
    /// Shared with the session's own CPU-thread batch loop: a task thread
    /// spawned off `xTaskCreate` runs its own `Cpu` against the same
    /// address space and hook table, under the same lock a batch holds
    /// while it runs.
    pub mem: Arc<Mutex<AddressSpace>>,
    pub hooks: Arc<Mutex<HookTable>>,
    pub display: Arc<Display>,
    pub touch: Mutex<TouchCallback>,
    pub sdcard: Mutex<Option<SdCard>>,
    pub nvs: Mutex<Nvs>,
    pub board: BoardProfile,
    pub appcpu: Arc<AppCpuBoot>,
    pub deferred_tasks: Mutex<VecDeque<DeferredTask>>,
    /// Virtual time in microseconds, synced post-batch by the session from
    /// the running core's `Cpu::virtual_time_us` — the only view of CPU
    /// state a `Hook`, which only sees `RegisterFile`/`AddressSpace`, can
    /// get at (`SPEC_FULL.md` §4.2, §4.4).
    pub virtual_time_us: AtomicU64,
    next_task_id: AtomicU32,
    pub semaphores: HandleTable<Semaphore>,
    pub queues: HandleTable<Queue>,
    pub event_groups: HandleTable<EventGroup>,
    pub sockets: HandleTable<Mutex<wifi_pack::Socket>>,
    /// Guest-visible `esp_timer_handle_t` → current `EspTimerDaemon` index.
    /// `esp_timer_start_once`/`_periodic` only learn the real period at
    /// start time, after `EspTimerDaemon::create` already fixed one in —
    /// starting re-creates the daemon entry, which can land at a different
    /// index, so the guest handle stays stable through this indirection
    /// rather than through the daemon's own id.
    esp_timer_ids: Mutex<HashMap<u32, u32>>,
    next_esp_timer_handle: AtomicU32,
}

impl StubContext {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runtime: Runtime,
        rtos_timers: TimerDaemon,
        esp_timers: EspTimerDaemon,
        mem: Arc<Mutex<AddressSpace>>,
        hooks: Arc<Mutex<HookTable>>,
        display: Arc<Display>,
        touch: TouchCallback,
        sdcard: Option<SdCard>,
        nvs: Nvs,
        board: BoardProfile,
    ) -> Self {
        Self {
            runtime,
            rtos_timers,
            esp_timers,
            mem,
            hooks,
            display,
            touch: Mutex::new(touch),
            sdcard: Mutex::new(sdcard),
            nvs: Mutex::new(nvs),
            board,
            appcpu: Arc::new(AppCpuBoot::new()),
            deferred_tasks: Mutex::new(VecDeque::new()),
            virtual_time_us: AtomicU64::new(0),
            next_task_id: AtomicU32::new(1),
            semaphores: HandleTable::new(),
            queues: HandleTable::new(),
            event_groups: HandleTable::new(),
            sockets: HandleTable::new(),
            esp_timer_ids: Mutex::new(HashMap::new()),
            next_esp_timer_handle: AtomicU32::new(1),
        }
    }

    /// Issues the next opaque `TaskHandle_t` value. Kept dense and nonzero
    /// so it reads as a real pointer-ish value if a firmware logs it; no
    /// slot table backs it since nothing looks a task back up by handle
    /// today (`vTaskDelete` only special-cases `NULL`).
    pub fn next_task_handle(&self) -> u32 {
        self.next_task_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Registers a fresh `esp_timer_create` call under a new guest-visible
    /// handle, returning it.
    pub fn register_esp_timer(&self, daemon_id: u32) -> u32 {
        let handle = self.next_esp_timer_handle.fetch_add(1, Ordering::SeqCst);
        self.esp_timer_ids.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(handle, daemon_id);
        handle
    }

    pub fn esp_timer_daemon_id(&self, handle: u32) -> Option<u32> {
        self.esp_timer_ids.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(&handle).copied()
    }

    /// Updates the daemon index a guest handle maps to, after a
    /// delete-then-recreate lands at a different slot.
    pub fn rebind_esp_timer(&self, handle: u32, daemon_id: u32) {
        self.esp_timer_ids.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(handle, daemon_id);
    }

    pub fn forget_esp_timer(&self, handle: u32) {
        self.esp_timer_ids.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&handle);
    }

    pub fn push_deferred_task(&self, task: DeferredTask) {
        self.deferred_tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push_back(task);
    }

    pub fn pop_deferred_task(&self) -> Option<DeferredTask> {
        self.deferred_tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner).pop_front()
    }

    /// Claims the queued record for `id`, if nothing else has already taken
    /// it. Lets a just-spawned task thread race the session's self-branch
    /// dispatch for the same record without ever running it twice.
    pub fn take_deferred_task_by_id(&self, id: u32) -> Option<DeferredTask> {
        let mut tasks = self.deferred_tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let pos = tasks.iter().position(|t| t.id == id)?;
        tasks.remove(pos)
    }
}

/// Resolves `name` and installs `handler` at its address, warning instead
/// of failing when the symbol table has no entry for it — a firmware image
/// that doesn't call a given entry point shouldn't be refused for lacking
/// the symbol (`SPEC_FULL.md` §4.4).
pub fn install(hooks: &mut HookTable, syms: Option<&SymbolTable>, name: &str, handler: Box<dyn crate::hooks::Hook>) {
    match syms.and_then(|s| s.resolve(name)) {
        Some(pc) => hooks.install(pc, handler),
        None => tracing::warn!(tag = "stubs", symbol = name, "symbol not found, stub not installed"),
    }
}

/// Registers every stub pack, resolving symbols against `syms` (absent when
/// the firmware image was loaded without an ELF) and wiring the AppCPU boot
/// MMIO device into `mem`.
pub fn register_all(ctx: &Arc<StubContext>, mem: &mut crate::memory::AddressSpace, syms: Option<&SymbolTable>, hooks: &mut HookTable) {
    mem.register_mmio(APPCPU_CTRL_BASE, APPCPU_CTRL_SIZE, Box::new(AppCpuMmio(Arc::clone(&ctx.appcpu))));

    rom::register(ctx, syms, hooks);
    freertos_pack::register(ctx, syms, hooks);
    timer_pack::register(ctx, syms, hooks);
    display_pack::register(ctx, syms, hooks);
    touch_pack::register(ctx, syms, hooks);
    sdcard_pack::register(ctx, syms, hooks);
    crypto_pack::register(ctx, syms, hooks);
    wifi_pack::register(ctx, syms, hooks);
}
