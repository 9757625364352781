//! Touch controller poll entry points bound to [`crate::touch`]'s host
//! callback, matching `examples/original_source/src/emu_touch.c`'s
//! `xpt2046_*`/`gt911_*` symbol names. Only the controller named by the
//! board profile's `touch_kind` is installed — real firmware only ever
//! calls the driver matching the hardware it was built for, and installing
//! both would risk a coincidental symbol collision across two unrelated
//! ELF images.

use std::sync::Arc;

use crate::config::TouchKind;
use crate::hooks::HookTable;
use crate::memory::AddressSpace;
use crate::registers::RegisterFile;
use crate::symbols::SymbolTable;
use crate::touch::TouchSample;

use super::{install, StubContext};

fn poll(ctx: &StubContext) -> TouchSample {
    (ctx.touch.lock().unwrap_or_else(std::sync::PoisonError::into_inner))()
}

pub fn register(ctx: &Arc<StubContext>, syms: Option<&SymbolTable>, hooks: &mut HookTable) {
    match ctx.board.touch_kind {
        TouchKind::ResistiveXpt2046 => register_xpt2046(ctx, syms, hooks),
        TouchKind::CapacitiveGt911 => register_gt911(ctx, syms, hooks),
    }
}

fn register_xpt2046(ctx: &Arc<StubContext>, syms: Option<&SymbolTable>, hooks: &mut HookTable) {
    install(hooks, syms, "xpt2046_read", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let sample = poll(&ctx);
            regs.ar_write(2, u32::from(sample.pressed));
        }
    }));

    install(hooks, syms, "xpt2046_get_xy", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, mem: &mut AddressSpace| {
            let sample = poll(&ctx);
            let (x_ptr, y_ptr) = (regs.ar_read(2), regs.ar_read(3));
            mem.write32(x_ptr, sample.x as u32);
            mem.write32(y_ptr, sample.y as u32);
            regs.ar_write(2, u32::from(sample.pressed));
        }
    }));
}

fn register_gt911(ctx: &Arc<StubContext>, syms: Option<&SymbolTable>, hooks: &mut HookTable) {
    install(hooks, syms, "gt911_read", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let sample = poll(&ctx);
            regs.ar_write(2, u32::from(sample.pressed));
        }
    }));

    install(hooks, syms, "gt911_get_point", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, mem: &mut AddressSpace| {
            let sample = poll(&ctx);
            let (x_ptr, y_ptr) = (regs.ar_read(2), regs.ar_read(3));
            mem.write32(x_ptr, sample.x as u32);
            mem.write32(y_ptr, sample.y as u32);
            regs.ar_write(2, u32::from(sample.pressed));
        }
    }));
}
