//! `esp_timer` entry points, forwarding lifecycle calls to
//! [`crate::esp_timer::EspTimerDaemon`] and reading `esp_timer_get_time`
//! straight off the session's virtual-time atomic rather than wall time
//! (see [`StubContext::virtual_time_us`]), matching
//! `examples/original_source/src/emu_timer.c`'s symbol names.
//!
//! Like the FreeRTOS software-timer pack, a fired `esp_timer` callback only
//! logs rather than re-entering guest code, for the same single-interpreter
//! reason — see `stubs::freertos_pack`'s module doc.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::hooks::HookTable;
use crate::memory::AddressSpace;
use crate::registers::RegisterFile;
use crate::symbols::SymbolTable;

use super::{install, StubContext};

const ESP_OK: u32 = 0;
const ESP_FAIL: u32 = 0xFFFF_FFFF;
const ESP_ERR_INVALID_STATE: u32 = 0x103;

pub fn register(ctx: &Arc<StubContext>, syms: Option<&SymbolTable>, hooks: &mut HookTable) {
    install(hooks, syms, "esp_timer_get_time", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let now = ctx.virtual_time_us.load(Ordering::SeqCst);
            // int64_t return: low word in a2, high word in a3, per the
            // Xtensa ABI's 64-bit-return convention.
            regs.ar_write(2, now as u32);
            regs.ar_write(3, (now >> 32) as u32);
        }
    }));

    install(hooks, syms, "esp_timer_create", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, mem: &mut AddressSpace| {
            let out_handle_ptr = regs.ar_read(3);
            // esp_timer_create_args_t's fields beyond the callback pointer
            // (arg, dispatch_method, name) aren't consulted: the stub never
            // re-enters guest code to invoke the callback (see module doc).
            match ctx.esp_timers.create(false, 0, Box::new(|| {
                tracing::debug!(tag = "esp_timer", "timer fired");
            })) {
                Ok(daemon_id) => {
                    let handle = ctx.register_esp_timer(daemon_id);
                    mem.write32(out_handle_ptr, handle);
                    regs.ar_write(2, ESP_OK);
                }
                Err(_) => regs.ar_write(2, ESP_FAIL),
            }
        }
    }));

    install(hooks, syms, "esp_timer_start_once", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let (handle, timeout_us_lo) = (regs.ar_read(2), regs.ar_read(3));
            regs.ar_write(2, start_timer(&ctx, handle, false, u64::from(timeout_us_lo)));
        }
    }));

    install(hooks, syms, "esp_timer_start_periodic", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let (handle, period_us_lo) = (regs.ar_read(2), regs.ar_read(3));
            regs.ar_write(2, start_timer(&ctx, handle, true, u64::from(period_us_lo)));
        }
    }));

    install(hooks, syms, "esp_timer_stop", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let handle = regs.ar_read(2);
            regs.ar_write(2, with_daemon_id(&ctx, handle, |ctx, id| ctx.esp_timers.stop(id).is_ok()));
        }
    }));

    install(hooks, syms, "esp_timer_delete", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let handle = regs.ar_read(2);
            let result = with_daemon_id(&ctx, handle, |ctx, id| ctx.esp_timers.delete(id).is_ok());
            ctx.forget_esp_timer(handle);
            regs.ar_write(2, result);
        }
    }));

    install(hooks, syms, "esp_timer_is_active", Box::new(|regs: &mut RegisterFile, _mem: &mut AddressSpace| {
        regs.ar_write(2, u32::from(regs.ar_read(2) != 0));
    }));
}

fn with_daemon_id(ctx: &StubContext, handle: u32, f: impl FnOnce(&StubContext, u32) -> bool) -> u32 {
    match ctx.esp_timer_daemon_id(handle) {
        Some(id) if f(ctx, id) => ESP_OK,
        Some(_) => ESP_FAIL,
        None => ESP_ERR_INVALID_STATE,
    }
}

/// Real `esp_timer_start_once`/`start_periodic` learn the period at start
/// time, but `EspTimerDaemon::create` bakes the period in up front — so
/// starting re-creates the daemon entry with the now-known period and
/// rebinds the guest's stable handle to whatever index it lands at.
fn start_timer(ctx: &StubContext, handle: u32, periodic: bool, period_us: u64) -> u32 {
    let Some(old_id) = ctx.esp_timer_daemon_id(handle) else {
        return ESP_ERR_INVALID_STATE;
    };
    if ctx.esp_timers.delete(old_id).is_err() {
        return ESP_ERR_INVALID_STATE;
    }
    match ctx.esp_timers.create(periodic, period_us, Box::new(move || {
        tracing::debug!(tag = "esp_timer", periodic, "timer fired");
    })) {
        Ok(new_id) => {
            ctx.rebind_esp_timer(handle, new_id);
            if ctx.esp_timers.start(new_id).is_ok() {
                ESP_OK
            } else {
                ESP_FAIL
            }
        }
        Err(_) => ESP_FAIL,
    }
}
