//! FreeRTOS entry points: task creation (a real host thread per task, see
//! [`super::DeferredTask`] and [`run_task_thread`]), delay/tick bookkeeping,
//! queues, semaphores, and event groups, grounded symbol-for-symbol in
//! `examples/original_source/src/emu_freertos.c`.
//!
//! Software timers (`xTimerCreate` and friends) forward to `rtos::TimerDaemon`
//! for lifecycle bookkeeping, but — unlike the original, whose timer thread
//! calls straight back into guest code — the fired callback only logs and
//! does not re-enter the interpreter: only the CPU thread may execute guest
//! Xtensa instructions (`SPEC_FULL.md` §4.2, §5), and the daemon callback
//! runs on its own background thread. Re-entering guest code from there
//! would need a second deferred-dispatch channel with a return trampoline;
//! scenario coverage for software timers (`SPEC_FULL.md` §8 scenario 5)
//! exercises `TimerDaemon` directly rather than through a firmware image, so
//! this is deliberately out of scope for now — see `DESIGN.md`.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::cpu::{Cpu, StopReason};
use crate::hooks::HookTable;
use crate::memory::AddressSpace;
use crate::registers::{ProcessorState, RegisterFile};
use crate::rtos::{Deadline, EventGroup, Queue, Semaphore, SemaphoreKind, WaitMode};
use crate::symbols::SymbolTable;

use super::{install, DeferredTask, StubContext};

const PD_PASS: u32 = 1;
const PD_FAIL: u32 = 0;

/// `PS` a spawned task thread starts with: `INTLEVEL=0`, `WOE=1`, the same
/// bit pattern `session.rs` hands a deferred task dispatched onto core 0.
const TASK_THREAD_PS: u32 = 0x0004_0020;
/// Instructions executed per batch before a task thread re-checks shutdown.
const TASK_BATCH_SIZE: u32 = 10_000;
/// Per-task stack region, distinct from `session.rs`'s `INITIAL_SP`/
/// `DEFERRED_TASK_SP` so no two task threads (or the boot core) ever alias a
/// frame. `Runtime::spawn_task`'s 32-task table fits comfortably below it.
const TASK_STACK_BASE: u32 = 0x3FFD_0000;
const TASK_STACK_STRIDE: u32 = 0x1000;

fn task_stack_top(task_id: u32) -> u32 {
    TASK_STACK_BASE.wrapping_sub(task_id.wrapping_mul(TASK_STACK_STRIDE))
}

/// Real per-task host thread: claims its own queued record — unless the
/// session's self-branch fallback already claimed it first, in which case
/// there's nothing left to do — then runs it against the shared address
/// space/hook table until it halts, faults, or the runtime shuts down.
fn run_task_thread(ctx: Arc<StubContext>, task_id: u32) {
    let Some(task) = ctx.take_deferred_task_by_id(task_id) else { return };

    let mut cpu = Cpu::new(0);
    cpu.registers.pc = task.entry_pc;
    cpu.registers.ar_write(1, task_stack_top(task_id));
    cpu.registers.ar_write(2, task.param);
    cpu.registers.ps = ProcessorState::from_bits(TASK_THREAD_PS);

    let shutdown = ctx.runtime.shutdown_flag();
    while cpu.running && !shutdown.load(Ordering::SeqCst) {
        let reason = {
            let mut mem = ctx.mem.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let mut hooks = ctx.hooks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            cpu.run(&mut mem, &mut hooks, TASK_BATCH_SIZE)
        };
        match reason {
            StopReason::Waiti => {
                crate::rtos::delay_real_briefly();
                cpu.wake();
            }
            StopReason::Fault => break,
            StopReason::BudgetExhausted | StopReason::Breakpoint => {}
        }
    }
}

pub fn register(ctx: &Arc<StubContext>, syms: Option<&SymbolTable>, hooks: &mut HookTable) {
    register_tasks(ctx, syms, hooks);
    register_queues(ctx, syms, hooks);
    register_semaphores(ctx, syms, hooks);
    register_event_groups(ctx, syms, hooks);
    register_timers(ctx, syms, hooks);
}

fn register_tasks(ctx: &Arc<StubContext>, syms: Option<&SymbolTable>, hooks: &mut HookTable) {
    for name in ["xTaskCreate", "xTaskCreatePinnedToCore"] {
        let ctx = Arc::clone(ctx);
        install(hooks, syms, name, Box::new(move |regs: &mut RegisterFile, mem: &mut AddressSpace| {
            let entry_pc = regs.ar_read(2);
            let param = regs.ar_read(5);
            let out_handle_ptr = regs.ar_read(7);
            let task_id = ctx.next_task_handle();
            ctx.push_deferred_task(DeferredTask { id: task_id, entry_pc, param });
            if out_handle_ptr != 0 {
                mem.write32(out_handle_ptr, task_id);
            }
            regs.ar_write(2, PD_PASS);

            let spawn_ctx = Arc::clone(&ctx);
            if ctx.runtime.spawn_task(move || run_task_thread(spawn_ctx, task_id)).is_err() {
                tracing::warn!(tag = "freertos", task_id, "task table full, task stays queued for self-branch dispatch only");
            }
        }));
    }

    install(hooks, syms, "vTaskDelay", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let ticks = regs.ar_read(2);
            ctx.runtime.advance_ticks(ticks);
            crate::rtos::delay_real_briefly();
        }
    }));

    install(hooks, syms, "vTaskDelayUntil", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, mem: &mut AddressSpace| {
            let prev_wake_ptr = regs.ar_read(2);
            let increment = regs.ar_read(3);
            ctx.runtime.advance_ticks(increment);
            crate::rtos::delay_real_briefly();
            mem.write32(prev_wake_ptr, ctx.runtime.tick_count());
        }
    }));

    install(hooks, syms, "xTaskGetTickCount", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            regs.ar_write(2, ctx.runtime.tick_count());
        }
    }));

    // `vTaskDelete(NULL)` is almost always immediately followed by the
    // caller's own `for (;;) {}` in real firmware; letting the call return
    // normally and relying on that loop to trigger the self-branch deferred
    // dispatch is simpler than inventing a "park this core" mechanism for a
    // case guest code already handles itself.
    install(hooks, syms, "vTaskDelete", Box::new(|_regs: &mut RegisterFile, _mem: &mut AddressSpace| {
        tracing::debug!(tag = "freertos", "vTaskDelete stub (no-op)");
    }));

    install(hooks, syms, "vTaskStartScheduler", Box::new(|_regs: &mut RegisterFile, _mem: &mut AddressSpace| {
        tracing::debug!(tag = "freertos", "vTaskStartScheduler stub (no-op, every task already has its own thread)");
    }));

    install(hooks, syms, "xTaskGetCurrentTaskHandle", Box::new(|regs: &mut RegisterFile, _mem: &mut AddressSpace| {
        regs.ar_write(2, 1);
    }));
}

fn register_queues(ctx: &Arc<StubContext>, syms: Option<&SymbolTable>, hooks: &mut HookTable) {
    install(hooks, syms, "xQueueCreate", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let (length, item_size) = (regs.ar_read(2), regs.ar_read(3));
            let queue = Queue::new(item_size as usize, length as usize, ctx.runtime.shutdown_flag());
            regs.ar_write(2, ctx.queues.insert(queue));
        }
    }));

    for (name, front) in [("xQueueSendToBack", false), ("xQueueSend", false), ("xQueueSendToFront", true)] {
        let ctx = Arc::clone(ctx);
        install(hooks, syms, name, Box::new(move |regs: &mut RegisterFile, mem: &mut AddressSpace| {
            let (handle, item_ptr, ticks) = (regs.ar_read(2), regs.ar_read(3), regs.ar_read(4));
            let Some(queue) = ctx.queues.get(handle) else {
                regs.ar_write(2, PD_FAIL);
                return;
            };
            let item = mem.read_buf(item_ptr, queue.item_size());
            let result = if front { queue.send_front(item, Deadline::from_ticks(ticks)) } else { queue.send_back(item, Deadline::from_ticks(ticks)) };
            regs.ar_write(2, u32::from(result.is_ok()));
        }));
    }

    install(hooks, syms, "xQueueOverwrite", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, mem: &mut AddressSpace| {
            let (handle, item_ptr) = (regs.ar_read(2), regs.ar_read(3));
            if let Some(queue) = ctx.queues.get(handle) {
                let item = mem.read_buf(item_ptr, queue.item_size());
                queue.overwrite(item);
            }
            regs.ar_write(2, PD_PASS);
        }
    }));

    for (name, peek) in [("xQueueReceive", false), ("xQueuePeek", true)] {
        let ctx = Arc::clone(ctx);
        install(hooks, syms, name, Box::new(move |regs: &mut RegisterFile, mem: &mut AddressSpace| {
            let (handle, buf_ptr, ticks) = (regs.ar_read(2), regs.ar_read(3), regs.ar_read(4));
            let Some(queue) = ctx.queues.get(handle) else {
                regs.ar_write(2, PD_FAIL);
                return;
            };
            let result = if peek { queue.peek(Deadline::from_ticks(ticks)) } else { queue.receive(Deadline::from_ticks(ticks)) };
            match result {
                Ok(item) => {
                    mem.write_buf(buf_ptr, &item);
                    regs.ar_write(2, PD_PASS);
                }
                Err(_) => regs.ar_write(2, PD_FAIL),
            }
        }));
    }

    install(hooks, syms, "uxQueueMessagesWaiting", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let handle = regs.ar_read(2);
            let len = ctx.queues.get(handle).map_or(0, |q| q.len() as u32);
            regs.ar_write(2, len);
        }
    }));

    install(hooks, syms, "xQueueReset", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let handle = regs.ar_read(2);
            if let Some(queue) = ctx.queues.get(handle) {
                queue.reset();
            }
            regs.ar_write(2, PD_PASS);
        }
    }));

    install(hooks, syms, "vQueueDelete", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            ctx.queues.remove(regs.ar_read(2));
        }
    }));
}

fn register_semaphores(ctx: &Arc<StubContext>, syms: Option<&SymbolTable>, hooks: &mut HookTable) {
    for (name, kind, initial, max) in [
        ("xSemaphoreCreateMutex", SemaphoreKind::Mutex, 1, 1),
        ("xSemaphoreCreateRecursiveMutex", SemaphoreKind::Recursive, 1, 1),
        ("xSemaphoreCreateBinary", SemaphoreKind::Binary, 0, 1),
    ] {
        let ctx = Arc::clone(ctx);
        install(hooks, syms, name, Box::new(move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let sem = Semaphore::new(kind, initial, max, ctx.runtime.shutdown_flag());
            regs.ar_write(2, ctx.semaphores.insert(sem));
        }));
    }

    install(hooks, syms, "xSemaphoreCreateCounting", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let (max_count, initial) = (regs.ar_read(2), regs.ar_read(3));
            let sem = Semaphore::new(SemaphoreKind::Counting, initial, max_count, ctx.runtime.shutdown_flag());
            regs.ar_write(2, ctx.semaphores.insert(sem));
        }
    }));

    for name in ["xSemaphoreTake", "xSemaphoreTakeRecursive"] {
        let ctx = Arc::clone(ctx);
        install(hooks, syms, name, Box::new(move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let (handle, ticks) = (regs.ar_read(2), regs.ar_read(3));
            let ok = ctx.semaphores.get(handle).is_some_and(|s| s.take(Deadline::from_ticks(ticks)).is_ok());
            regs.ar_write(2, u32::from(ok));
        }));
    }

    for name in ["xSemaphoreGive", "xSemaphoreGiveRecursive", "xSemaphoreGiveFromISR"] {
        let ctx = Arc::clone(ctx);
        install(hooks, syms, name, Box::new(move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let handle = regs.ar_read(2);
            let ok = ctx.semaphores.get(handle).is_some_and(|s| s.give().is_ok());
            regs.ar_write(2, u32::from(ok));
        }));
    }

    install(hooks, syms, "vSemaphoreDelete", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            ctx.semaphores.remove(regs.ar_read(2));
        }
    }));
}

fn register_event_groups(ctx: &Arc<StubContext>, syms: Option<&SymbolTable>, hooks: &mut HookTable) {
    install(hooks, syms, "xEventGroupCreate", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let group = EventGroup::new(ctx.runtime.shutdown_flag());
            regs.ar_write(2, ctx.event_groups.insert(group));
        }
    }));

    install(hooks, syms, "xEventGroupSetBits", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let (handle, bits) = (regs.ar_read(2), regs.ar_read(3));
            let result = ctx.event_groups.get(handle).map_or(0, |g| g.set_bits(bits));
            regs.ar_write(2, result);
        }
    }));

    install(hooks, syms, "xEventGroupClearBits", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let (handle, bits) = (regs.ar_read(2), regs.ar_read(3));
            let result = ctx.event_groups.get(handle).map_or(0, |g| g.clear_bits(bits));
            regs.ar_write(2, result);
        }
    }));

    install(hooks, syms, "xEventGroupGetBits", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let handle = regs.ar_read(2);
            let result = ctx.event_groups.get(handle).map_or(0, |g| g.get_bits());
            regs.ar_write(2, result);
        }
    }));

    install(hooks, syms, "xEventGroupWaitBits", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let handle = regs.ar_read(2);
            let mask = regs.ar_read(3);
            let clear_on_exit = regs.ar_read(4) != 0;
            let wait_for_all = regs.ar_read(5) != 0;
            let ticks = regs.ar_read(6);
            let mode = if wait_for_all { WaitMode::All } else { WaitMode::Any };
            let result = ctx
                .event_groups
                .get(handle)
                .map_or(0, |g| g.wait_bits(mask, mode, clear_on_exit, Deadline::from_ticks(ticks)));
            regs.ar_write(2, result);
        }
    }));

    install(hooks, syms, "vEventGroupDelete", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            ctx.event_groups.remove(regs.ar_read(2));
        }
    }));
}

fn register_timers(ctx: &Arc<StubContext>, syms: Option<&SymbolTable>, hooks: &mut HookTable) {
    install(hooks, syms, "xTimerCreate", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let period_ticks = regs.ar_read(3);
            let auto_reload = regs.ar_read(4) != 0;
            let period_ms = u64::from(period_ticks) * u64::from(crate::rtos::TICK_PERIOD_MS);
            match ctx.rtos_timers.create(period_ms, auto_reload, Box::new(|| {
                tracing::debug!(tag = "freertos", "software timer fired");
            })) {
                Ok(id) => regs.ar_write(2, id + 1),
                Err(_) => regs.ar_write(2, 0),
            }
        }
    }));

    for (name, op) in [
        ("xTimerStart", TimerOp::Start),
        ("xTimerReset", TimerOp::Start),
        ("xTimerStop", TimerOp::Stop),
        ("xTimerDelete", TimerOp::Delete),
    ] {
        let ctx = Arc::clone(ctx);
        install(hooks, syms, name, Box::new(move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let handle = regs.ar_read(2);
            let ok = handle != 0
                && match op {
                    TimerOp::Start => ctx.rtos_timers.start(handle - 1).is_ok(),
                    TimerOp::Stop => ctx.rtos_timers.stop(handle - 1).is_ok(),
                    TimerOp::Delete => ctx.rtos_timers.delete(handle - 1).is_ok(),
                };
            regs.ar_write(2, u32::from(ok));
        }));
    }

    install(hooks, syms, "xTimerIsTimerActive", Box::new(|regs: &mut RegisterFile, _mem: &mut AddressSpace| {
        // Active/inactive bookkeeping isn't exposed by `TimerDaemon` today;
        // firmware that only starts-then-checks immediately observes "active".
        regs.ar_write(2, u32::from(regs.ar_read(2) != 0));
    }));
}

#[derive(Clone, Copy)]
enum TimerOp {
    Start,
    Stop,
    Delete,
}
