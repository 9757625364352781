//! SD card block I/O entry points bound to [`crate::sdcard::SdCard`],
//! matching `examples/original_source/src/emu_sdcard.c`'s `sdcard_*` symbol
//! names. A firmware image that never configured a card (`ctx.sdcard` is
//! `None`) sees every call fail rather than panic — the board profile's
//! `has_sd_slot` flag only affects UI chrome out of scope here, not whether
//! these entry points exist.

use std::sync::Arc;

use crate::hooks::HookTable;
use crate::memory::AddressSpace;
use crate::registers::RegisterFile;
use crate::sdcard::SECTOR_SIZE;
use crate::symbols::SymbolTable;

use super::{install, StubContext};

const SD_OK: u32 = 0;
const SD_ERR: u32 = 1;

pub fn register(ctx: &Arc<StubContext>, syms: Option<&SymbolTable>, hooks: &mut HookTable) {
    install(hooks, syms, "sdcard_is_present", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let present = ctx.sdcard.lock().unwrap_or_else(std::sync::PoisonError::into_inner).is_some();
            regs.ar_write(2, u32::from(present));
        }
    }));

    install(hooks, syms, "sdcard_sector_count", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let guard = ctx.sdcard.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let count = guard.as_ref().map_or(0, |card| (card.size_bytes() / u64::from(SECTOR_SIZE)) as u32);
            regs.ar_write(2, count);
        }
    }));

    install(hooks, syms, "sdcard_read_sectors", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, mem: &mut AddressSpace| {
            let (lba, count, buf_ptr) = (regs.ar_read(2), regs.ar_read(3), regs.ar_read(4));
            let mut guard = ctx.sdcard.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let result = match guard.as_mut() {
                Some(card) => card.read_sectors(lba, count),
                None => {
                    regs.ar_write(2, SD_ERR);
                    return;
                }
            };
            match result {
                Ok(data) => {
                    mem.write_buf(buf_ptr, &data);
                    regs.ar_write(2, SD_OK);
                }
                Err(_) => regs.ar_write(2, SD_ERR),
            }
        }
    }));

    install(hooks, syms, "sdcard_write_sectors", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, mem: &mut AddressSpace| {
            let (lba, count, buf_ptr) = (regs.ar_read(2), regs.ar_read(3), regs.ar_read(4));
            let data = mem.read_buf(buf_ptr, count as usize * SECTOR_SIZE as usize);
            let mut guard = ctx.sdcard.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let result = match guard.as_mut() {
                Some(card) => card.write_sectors(lba, count, &data),
                None => {
                    regs.ar_write(2, SD_ERR);
                    return;
                }
            };
            regs.ar_write(2, if result.is_ok() { SD_OK } else { SD_ERR });
        }
    }));
}
