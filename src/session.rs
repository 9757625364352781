//! Session assembly and the CPU-thread batch loop, bridging `Config` into a
//! running emulator the way `examples/original_source/src/emu_flexe.c`
//! bridges `flexe_session` into the GUI: construct memory+cores+stubs once,
//! then drive an interpreter loop with cross-thread debug pause/continue.
//!
//! Unlike the original, there is no separate GUI-facing UART accumulator —
//! the ROM pack's `printf`-family stubs already emit complete lines through
//! `tracing`, and `logging::RingLayer` mirrors every `tracing` event
//! (including those) into the shared ring, so guest output and host
//! diagnostics land in the same place without a second byte-accumulator.

use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::cpu::{Cpu, StopReason};
use crate::display::Display;
use crate::error::SessionError;
use crate::esp_timer::EspTimerDaemon;
use crate::hooks::HookTable;
use crate::loader::{self, LoadResult};
use crate::memory::AddressSpace;
use crate::nvs::Nvs;
use crate::registers::ProcessorState;
use crate::rtos::{Runtime, TimerDaemon};
use crate::sdcard::SdCard;
use crate::stubs::{self, StubContext};
use crate::symbols::SymbolTable;
use crate::touch::{no_touch, TouchCallback};

/// Core 0's reset stack pointer, matching `emu_flexe.c`'s `initial_sp`.
const INITIAL_SP: u32 = 0x3FFF_8000;
/// Stack top handed to a deferred task dispatched onto core 0, distinct
/// from `INITIAL_SP` so a task body never aliases boot code's own frame.
const DEFERRED_TASK_SP: u32 = 0x3FFE_0000;
/// `PS` value a freshly dispatched task starts with: `INTLEVEL=0`, `WOE=1`,
/// matching the literal `emu_flexe.c` writes before jumping to a deferred
/// task's entry point.
const DEFERRED_TASK_PS: u32 = 0x0004_0020;
/// Instructions (or hook dispatches) executed per batch before the session
/// checks in on breakpoints, debug requests, and core 1 bring-up.
const BATCH_SIZE: u32 = 10_000;

/// Cross-thread debug pause/continue state, one mutex/condvar pair per
/// `SPEC_FULL.md` §4.6 ("all pause state is protected by one mutex with one
/// condvar").
#[derive(Default)]
struct DebugState {
    pause_requested: bool,
    paused: bool,
    /// Cleared once the CPU thread's loop exits, so `is_paused`/`wait_paused`
    /// observe a stopped session the same way they'd observe a pause.
    alive: bool,
}

/// Shared handle to the debug pause/continue state; cheaply cloned and
/// handed to whatever owns the debug command channel (out of scope here).
#[derive(Clone)]
pub struct DebugHandle {
    inner: Arc<(Mutex<DebugState>, Condvar)>,
}

impl DebugHandle {
    fn new() -> Self {
        let state = DebugState { alive: true, ..DebugState::default() };
        Self { inner: Arc::new((Mutex::new(state), Condvar::new())) }
    }

    /// Requests a pause at the next batch boundary (or immediately, if a
    /// breakpoint is already latched).
    pub fn request_break(&self) {
        let (lock, cond) = &*self.inner;
        lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner).pause_requested = true;
        cond.notify_all();
    }

    /// Clears any pause and wakes the CPU thread if it's waiting.
    pub fn request_continue(&self) {
        let (lock, cond) = &*self.inner;
        let mut state = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.pause_requested = false;
        state.paused = false;
        cond.notify_all();
    }

    /// True once the CPU thread has latched a pause, or has exited entirely.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        let (lock, _) = &*self.inner;
        let state = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.paused || !state.alive
    }

    /// Waits up to `timeout` for a pause to take effect.
    pub fn wait_paused(&self, timeout: Duration) -> bool {
        let (lock, cond) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut state = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        while !state.paused && state.alive {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else { break };
            let (guard, result) = cond.wait_timeout(state, remaining).unwrap_or_else(std::sync::PoisonError::into_inner);
            state = guard;
            if result.timed_out() {
                break;
            }
        }
        state.paused || !state.alive
    }
}

/// An assembled emulator instance: memory, both CPU cores, the stub fabric,
/// and everything they were built from. Owns the CPU-thread batch loop;
/// callers that want cross-thread pause/continue clone `debug_handle()`
/// before moving the session onto its own thread.
pub struct Session {
    mem: Arc<Mutex<AddressSpace>>,
    cores: [Cpu; 2],
    hooks: Arc<Mutex<HookTable>>,
    syms: Option<SymbolTable>,
    ctx: Arc<StubContext>,
    config: Config,
    debug: DebugHandle,
    load_result: LoadResult,
}

impl Session {
    /// Assembles a session from `config`: loads the firmware image, loads
    /// the optional ELF symbol table, constructs the host runtime/daemons,
    /// and registers every stub pack. On failure, anything already started
    /// (daemon threads, opened files) is torn down before returning.
    pub fn new(config: Config) -> Result<Self, SessionError> {
        let mut mem = AddressSpace::new();
        let load_result = loader::load_firmware(&config.firmware_path, &mut mem)?;

        let syms = match &config.elf_path {
            Some(path) => Some(SymbolTable::load(path)?),
            None => {
                tracing::warn!(tag = "session", "no ELF symbol table configured, stub fabric will run uninstrumented");
                None
            }
        };

        let nvs_dir = config.nvs_dir.clone().unwrap_or_else(crate::nvs::default_nvs_dir);
        let nvs = match Nvs::new(nvs_dir) {
            Ok(nvs) => nvs,
            Err(err) => return Err(err),
        };

        let sdcard = match Self::open_sdcard(&config) {
            Ok(sdcard) => sdcard,
            Err(err) => return Err(err),
        };

        let display = Arc::new(Display::new(config.framebuffer_width, config.framebuffer_height));
        let runtime = Runtime::new();
        let rtos_timers = TimerDaemon::new(runtime.shutdown_flag());
        let esp_timers = EspTimerDaemon::new(runtime.shutdown_flag());
        let touch: TouchCallback = Box::new(no_touch);

        let mem = Arc::new(Mutex::new(mem));
        let hooks = Arc::new(Mutex::new(HookTable::new()));

        let ctx = Arc::new(StubContext::new(
            runtime,
            rtos_timers,
            esp_timers,
            Arc::clone(&mem),
            Arc::clone(&hooks),
            display,
            touch,
            sdcard,
            nvs,
            config.board,
        ));

        {
            let mut mem_guard = mem.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let mut hooks_guard = hooks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            stubs::register_all(&ctx, &mut mem_guard, syms.as_ref(), &mut hooks_guard);
        }

        let mut core0 = Cpu::new(0);
        core0.registers.pc = load_result.entry_point;
        core0.registers.ar_write(1, INITIAL_SP);
        let mut core1 = Cpu::new(1);
        core1.running = false;

        Ok(Self {
            mem,
            cores: [core0, core1],
            hooks,
            syms,
            ctx,
            config,
            debug: DebugHandle::new(),
            load_result,
        })
    }

    fn open_sdcard(config: &Config) -> Result<Option<SdCard>, SessionError> {
        let Some(path) = config.sdcard_path.clone() else {
            return Ok(None);
        };
        SdCard::open(&path, config.sdcard_size_bytes, config.turbo).map(Some)
    }

    #[must_use]
    pub fn debug_handle(&self) -> DebugHandle {
        self.debug.clone()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn load_result(&self) -> &LoadResult {
        &self.load_result
    }

    #[must_use]
    pub fn display(&self) -> &Display {
        &self.ctx.display
    }

    #[must_use]
    pub fn set_touch_callback(&self, callback: TouchCallback) {
        *self.ctx.touch.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = callback;
    }

    #[must_use]
    pub fn core(&self, index: usize) -> &Cpu {
        &self.cores[index]
    }

    /// Reads raw guest memory without taking any lock beyond the session's
    /// own borrow — callers that need this from another thread while the
    /// CPU thread is running must accept best-effort staleness
    /// (`SPEC_FULL.md` §5).
    #[must_use]
    pub fn read_memory(&mut self, addr: u32, len: usize) -> Vec<u8> {
        self.mem.lock().unwrap_or_else(std::sync::PoisonError::into_inner).read_buf(addr, len)
    }

    /// Runs the interpreter loop on the calling thread until either the
    /// session's `Config::max_batches` is reached (if set) or both cores
    /// stop running (fault or shutdown). Intended to be the body of a
    /// dedicated "CPU thread"; `debug_handle()` is the cross-thread control
    /// surface while this runs.
    pub fn run(&mut self) {
        let mut batches: u64 = 0;
        loop {
            if let Some(max) = self.config.max_batches {
                if batches >= max {
                    break;
                }
            }
            if !self.cores[0].running {
                break;
            }

            if self.service_debug_pause() {
                continue;
            }

            if self.cores[0].halted {
                std::thread::sleep(Duration::from_millis(1));
                {
                    let mut mem = self.mem.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                    let mut hooks = self.hooks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                    self.cores[0].wake_for_poll(&mut mem, &mut hooks);
                }
                self.service_preemption_tick();
                continue;
            }

            let pc_before = self.cores[0].registers.pc;
            {
                let mut mem = self.mem.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                let mut hooks = self.hooks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                self.cores[0].run(&mut mem, &mut hooks, BATCH_SIZE);
            }
            batches += 1;

            self.service_preemption_tick();
            self.dispatch_deferred_task_if_self_branch(pc_before);
            self.service_appcpu_boot();
            self.run_core1_batch();
            self.sync_virtual_time();
        }

        let (lock, cond) = &*self.debug.inner;
        let mut state = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.alive = false;
        state.paused = true;
        cond.notify_all();
    }

    /// Handles a latched breakpoint or an externally requested pause: waits
    /// on the debug condvar until resumed, then (if we stopped at a
    /// breakpoint) executes exactly one step with breakpoint checking
    /// bypassed, so the next `run` call doesn't immediately re-trigger it.
    /// Returns `true` if a pause was serviced (caller should re-poll rather
    /// than assume a batch ran).
    fn service_debug_pause(&mut self) -> bool {
        let stopped_at_breakpoint = self.cores[0].breakpoints().contains(&self.cores[0].registers.pc);
        let (lock, cond) = &*self.debug.inner;
        let mut state = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !state.pause_requested && !stopped_at_breakpoint {
            return false;
        }
        state.paused = true;
        state.pause_requested = false;
        cond.notify_all();
        while state.paused && state.alive {
            state = cond.wait(state).unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        drop(state);

        if stopped_at_breakpoint {
            let mut mem = self.mem.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let mut hooks = self.hooks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            self.cores[0].step(&mut mem, &mut hooks);
        }
        true
    }

    /// Core 0's side of cooperative preemption: `Runtime::advance_ticks`
    /// (driven by `vTaskDelay` in every spawned task thread) marks a tick
    /// available, and whenever core 0 is parked (`WAITI`) and there's a
    /// queued task, this hands it the core the same way a boot self-branch
    /// would — so a parked core doesn't sit idle while work is queued, and
    /// multiple guest tasks make progress without all of them needing their
    /// own free core.
    fn service_preemption_tick(&mut self) {
        if !self.ctx.runtime.take_preemption_tick() {
            return;
        }
        if !self.cores[0].halted {
            return;
        }
        let Some(task) = self.ctx.pop_deferred_task() else { return };
        let regs = &mut self.cores[0].registers;
        regs.ar_write(1, DEFERRED_TASK_SP);
        regs.ar_write(2, task.param);
        regs.pc = task.entry_pc;
        regs.ps = ProcessorState::from_bits(DEFERRED_TASK_PS);
        self.cores[0].wake();
    }

    /// A guest boot sequence that reaches its own infinite self-branch has
    /// nothing left to run on this core; pop the next queued task (if any)
    /// and redirect the core to it, matching `emu_flexe.c`'s
    /// deferred-dispatch convention.
    fn dispatch_deferred_task_if_self_branch(&mut self, pc_before: u32) {
        if self.cores[0].registers.pc != pc_before {
            return;
        }
        let Some(task) = self.ctx.pop_deferred_task() else { return };
        let regs = &mut self.cores[0].registers;
        regs.ar_write(1, DEFERRED_TASK_SP);
        regs.ar_write(2, task.param);
        regs.pc = task.entry_pc;
        regs.ps = ProcessorState::from_bits(DEFERRED_TASK_PS);
        self.cores[0].wake();
    }

    /// Brings core 1 up once the ROM pack's app-CPU boot MMIO reports a
    /// release with a nonzero boot address (`SPEC_FULL.md` §8 scenario 3).
    fn service_appcpu_boot(&mut self) {
        if self.cores[1].running {
            return;
        }
        if let Some(boot_addr) = self.ctx.appcpu.take_release() {
            self.cores[1].registers.pc = boot_addr;
            self.cores[1].registers.ar_write(1, INITIAL_SP);
            self.cores[1].running = true;
            self.cores[1].halted = false;
        }
    }

    fn run_core1_batch(&mut self) {
        if !self.cores[1].running {
            return;
        }
        let mut mem = self.mem.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut hooks = self.hooks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if self.cores[1].halted {
            self.cores[1].wake_for_poll(&mut mem, &mut hooks);
            return;
        }
        self.cores[1].run(&mut mem, &mut hooks, BATCH_SIZE);
    }

    /// Synchronizes virtual time from the core with the larger cycle count
    /// (guest code typically reads time from core 0, but either core's
    /// progress should be reflected — `SPEC_FULL.md` §4.6).
    fn sync_virtual_time(&mut self) {
        let max_cycles = self.cores[0].cycle_count.max(self.cores[1].cycle_count);
        let divisor = self.config.clock_divisor.max(1);
        self.ctx.virtual_time_us.store(max_cycles / u64::from(divisor), std::sync::atomic::Ordering::SeqCst);
    }

    /// Signals the debug condvar so a paused CPU thread observes shutdown,
    /// and shuts down every background daemon. Idempotent.
    pub fn shutdown(&mut self) {
        self.cores[0].running = false;
        let (lock, cond) = &*self.debug.inner;
        {
            let mut state = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            state.alive = false;
            state.paused = true;
        }
        cond.notify_all();
        self.ctx.runtime.shutdown();
        self.ctx.rtos_timers.shutdown();
        self.ctx.esp_timers.shutdown();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Cpu {
    /// A single step attempted purely to notice a newly delivered interrupt
    /// or hook dispatch while parked in `WAITI`; mirrors `emu_flexe.c`'s
    /// "sleep briefly, try one step" halted-core poll.
    fn wake_for_poll(&mut self, mem: &mut AddressSpace, hooks: &mut HookTable) {
        self.step(mem, hooks);
    }
}

/// Resolves the SD card image path to use when `Config::sdcard_path` is
/// unset but a turbo-mode or headless run still wants a backing file —
/// unused today (the session treats an absent path as "no SD card"), kept
/// as a named helper so a future CLI flag (`--sd-image auto`) has
/// somewhere to call.
#[must_use]
pub fn default_sdcard_path(nvs_dir: &PathBuf) -> PathBuf {
    crate::sdcard::default_image_path(nvs_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `WAITI 0` encoded the way `instructions.rs`'s own `wide_word` test
    /// helper would: `op0=0x5, op1=0x1, r=s=t=0`.
    const WAITI: [u8; 3] = [0x15, 0x00, 0x00];

    fn write_container_image(path: &std::path::Path, entry: u32, payload: &[u8]) {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"SURV");
        bytes.extend_from_slice(&entry.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(payload);
        std::fs::write(path, bytes).unwrap();
    }

    fn test_config(dir: &tempfile::TempDir, payload: &[u8]) -> Config {
        let fw_path = dir.path().join("fw.bin");
        write_container_image(&fw_path, crate::memory::IRAM_BASE, payload);
        let mut config = Config::for_board(fw_path, "2432S028R");
        config.nvs_dir = Some(dir.path().join("nvs"));
        config.max_batches = Some(1);
        config
    }

    #[test]
    fn test_session_construction_loads_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        // WAITI at the entry point so the batch halts immediately rather
        // than faulting on whatever garbage bytes follow.
        let config = test_config(&dir, &WAITI);
        let session = Session::new(config).unwrap();
        assert_eq!(session.core(0).registers.pc, crate::memory::IRAM_BASE);
        assert_eq!(session.core(0).registers.ar_read(1), INITIAL_SP);
    }

    #[test]
    fn test_run_respects_max_batches() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir, &WAITI);
        config.max_batches = Some(3);
        let mut session = Session::new(config).unwrap();
        session.run();
        assert!(session.core(0).halted);
    }

    #[test]
    fn test_debug_break_pauses_cpu_thread() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir, &WAITI);
        config.max_batches = None;
        let mut session = Session::new(config).unwrap();
        let handle = session.debug_handle();
        handle.request_break();
        let thread = std::thread::spawn(move || {
            session.run();
            session
        });
        assert!(handle.wait_paused(Duration::from_secs(2)));
        handle.request_continue();
        let mut session = thread.join().unwrap();
        session.shutdown();
    }

    #[test]
    fn test_appcpu_boot_releases_core_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir, &WAITI);
        config.max_batches = Some(2);
        let mut session = Session::new(config).unwrap();
        // Drives the release the same way guest code would: write the boot
        // address then strobe the release register through real MMIO.
        {
            let mut mem = session.mem.lock().unwrap();
            mem.write32(stubs::APPCPU_CTRL_BASE, crate::memory::IRAM_BASE + 0x1000);
            mem.write32(stubs::APPCPU_CTRL_BASE + 4, 1);
        }
        session.run();
        assert!(session.core(1).running);
        assert_eq!(session.core(1).registers.pc, crate::memory::IRAM_BASE + 0x1000);
    }
}
