//! PC-indexed hook table: the mechanism that lets the stub fabric intercept
//! a guest call to a known ESP-IDF/FreeRTOS/TFT_eSPI entry point and service
//! it on the host instead of interpreting the library body (`SPEC_FULL.md`
//! §3, §4.2, §4.4).
//!
//! A hook handler runs synchronously on the CPU thread. It reads its
//! "arguments" out of `a2..a7` (the Xtensa calling convention), performs
//! whatever host-side effect the stubbed routine implies, writes a return
//! value into `a2`, and returns — `Cpu::step` then redirects `pc` to
//! `ar_read(0) & ~0x3`, exactly as a real `ret` would.

use std::collections::HashMap;

use crate::memory::AddressSpace;
use crate::registers::RegisterFile;

/// A host handler bound to one guest PC.
pub trait Hook: Send {
    /// Services the call. `regs`/`mem` are the calling core's state; the
    /// handler is expected to read `a2..a7`, perform its effect, and write
    /// a return value into `a2` via `regs.ar_write(2, ...)`. It must not
    /// advance `pc` itself — `HookTable::dispatch` does that.
    fn call(&mut self, regs: &mut RegisterFile, mem: &mut AddressSpace);
}

/// Wraps a plain closure as a `Hook`, for stub packs that don't need a
/// struct of their own.
impl<F: FnMut(&mut RegisterFile, &mut AddressSpace) + Send> Hook for F {
    fn call(&mut self, regs: &mut RegisterFile, mem: &mut AddressSpace) {
        self(regs, mem);
    }
}

/// Dense PC→handler map. Lookup is a hash-map probe; at this table's
/// expected size (tens to low hundreds of stubbed symbols) that beats the
/// complexity of a bitmap-plus-table for a negligible difference in guest
/// fetch overhead.
#[derive(Default)]
pub struct HookTable {
    handlers: HashMap<u32, Box<dyn Hook>>,
}

impl HookTable {
    #[must_use]
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    /// Installs a handler at `pc`. Replacing an existing handler is allowed
    /// and logged as a warning rather than rejected (`SPEC_FULL.md` §3).
    pub fn install(&mut self, pc: u32, handler: Box<dyn Hook>) {
        if self.handlers.insert(pc, handler).is_some() {
            tracing::warn!(tag = "hooks", pc = format!("0x{pc:08X}"), "replacing existing hook");
        }
    }

    #[must_use]
    pub fn is_hooked(&self, pc: u32) -> bool {
        self.handlers.contains_key(&pc)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// If a hook is installed at `regs.pc`, runs it and redirects `pc` to
    /// the return address in `a0`, matching a real `ret`. Returns whether a
    /// hook fired.
    pub fn dispatch(&mut self, regs: &mut RegisterFile, mem: &mut AddressSpace) -> bool {
        let Some(handler) = self.handlers.get_mut(&regs.pc) else { return false };
        handler.call(regs, mem);
        regs.pc = regs.ar_read(0) & !0x3;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_and_dispatch_redirects_pc_via_a0() {
        let mut table = HookTable::new();
        table.install(
            0x400D_1234,
            Box::new(|regs: &mut RegisterFile, _mem: &mut AddressSpace| {
                regs.ar_write(2, 0x2A);
            }),
        );

        let mut regs = RegisterFile::new();
        regs.pc = 0x400D_1234;
        regs.ar_write(0, 0x400D_2000);
        let mut mem = AddressSpace::new();

        assert!(table.dispatch(&mut regs, &mut mem));
        assert_eq!(regs.pc, 0x400D_2000);
        assert_eq!(regs.ar_read(2), 0x2A);
    }

    #[test]
    fn test_dispatch_at_unhooked_pc_is_noop() {
        let mut table = HookTable::new();
        let mut regs = RegisterFile::new();
        regs.pc = 0x1000;
        let mut mem = AddressSpace::new();
        assert!(!table.dispatch(&mut regs, &mut mem));
        assert_eq!(regs.pc, 0x1000);
    }

    #[test]
    fn test_reinstalling_a_hook_replaces_it() {
        let mut table = HookTable::new();
        table.install(0x1000, Box::new(|regs: &mut RegisterFile, _: &mut AddressSpace| regs.ar_write(2, 1)));
        table.install(0x1000, Box::new(|regs: &mut RegisterFile, _: &mut AddressSpace| regs.ar_write(2, 2)));
        assert_eq!(table.len(), 1);

        let mut regs = RegisterFile::new();
        regs.pc = 0x1000;
        let mut mem = AddressSpace::new();
        table.dispatch(&mut regs, &mut mem);
        assert_eq!(regs.ar_read(2), 2);
    }

    #[test]
    fn test_return_address_is_masked_to_even() {
        let mut table = HookTable::new();
        table.install(0x1000, Box::new(|_: &mut RegisterFile, _: &mut AddressSpace| {}));
        let mut regs = RegisterFile::new();
        regs.pc = 0x1000;
        regs.ar_write(0, 0x2003);
        let mut mem = AddressSpace::new();
        table.dispatch(&mut regs, &mut mem);
        assert_eq!(regs.pc, 0x2000);
    }
}
