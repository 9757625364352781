//! Xtensa LX6 CPU core.
//!
//! One `Cpu` models one of the two LX6 cores: register file, address space
//! handle, cycle counter, and run-control state (breakpoints, the `WAITI`
//! halt, and the batch/breakpoint-aware `run` loop). Instruction fetch/decode
//! is split out into `instructions`, matching the fetch-decode-execute split
//! a classic interpreter core uses; this module owns the step/run control
//! flow and exposes it the same way.

use std::collections::HashSet;

use crate::error::CpuFault;
use crate::hooks::HookTable;
use crate::instructions;
use crate::memory::AddressSpace;
use crate::registers::RegisterFile;

/// Maximum number of simultaneously armed breakpoints (`SPEC_FULL.md` §4.2).
pub const MAX_BREAKPOINTS: usize = 16;

/// Why a `run` call returned control to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The requested instruction budget was exhausted.
    BudgetExhausted,
    /// Execution hit an armed breakpoint.
    Breakpoint,
    /// The core executed `WAITI` and is halted awaiting an interrupt.
    Waiti,
    /// The interpreter hit an unimplemented opcode or other fault.
    Fault,
}

/// One Xtensa core.
pub struct Cpu {
    pub registers: RegisterFile,
    /// `PRID` value this core reports (0 = PRO_CPU, 1 = APP_CPU).
    pub core_id: u8,
    /// Total instructions retired.
    pub cycle_count: u64,
    /// Cleared once `running = false` permanently (a fault occurred).
    pub running: bool,
    /// Set while parked in `WAITI` with no pending interrupt.
    pub halted: bool,
    /// The last fault raised by the interpreter, if any.
    pub last_fault: Option<CpuFault>,
    breakpoints: Vec<u32>,
    /// PCs already reported as unimplemented, to avoid log spam.
    reported_faults: HashSet<u32>,
}

impl Cpu {
    #[must_use]
    pub fn new(core_id: u8) -> Self {
        Self {
            registers: RegisterFile::new(),
            core_id,
            cycle_count: 0,
            running: true,
            halted: false,
            last_fault: None,
            breakpoints: Vec::new(),
            reported_faults: HashSet::new(),
        }
    }

    /// Derives elapsed virtual microseconds from the retired-instruction
    /// count and the configured clock divisor (MHz). One retired instruction
    /// is treated as one cycle, matching the interpreter's non-pipelined model.
    #[must_use]
    pub fn virtual_time_us(&self, clock_mhz: u32) -> u64 {
        if clock_mhz == 0 {
            return 0;
        }
        self.cycle_count / u64::from(clock_mhz)
    }

    /// Arms a breakpoint at `pc`. Returns `Err` if the table is already full.
    pub fn set_breakpoint(&mut self, pc: u32) -> Result<(), CpuFault> {
        if self.breakpoints.contains(&pc) {
            return Ok(());
        }
        if self.breakpoints.len() >= MAX_BREAKPOINTS {
            return Err(CpuFault::BreakpointTableFull { max: MAX_BREAKPOINTS });
        }
        self.breakpoints.push(pc);
        Ok(())
    }

    pub fn clear_breakpoint(&mut self, pc: u32) {
        self.breakpoints.retain(|&bp| bp != pc);
    }

    #[must_use]
    pub fn breakpoints(&self) -> &[u32] {
        &self.breakpoints
    }

    /// Executes exactly one instruction (or, if `pc` is hooked, exactly one
    /// stub call), advancing `pc` and `cycle_count`. Does not consult
    /// breakpoints; callers that want breakpoint-aware stepping should check
    /// `breakpoints()` themselves (this is what lets a single step land *on*
    /// a breakpoint without re-triggering it).
    pub fn step(&mut self, mem: &mut AddressSpace, hooks: &mut HookTable) {
        if !self.running || self.halted {
            return;
        }
        if hooks.dispatch(&mut self.registers, mem) {
            self.cycle_count += 1;
            return;
        }
        match instructions::execute_one(&mut self.registers, mem) {
            Ok(()) => {
                self.cycle_count += 1;
            }
            Err(instructions::StepOutcome::Waiti) => {
                self.halted = true;
            }
            Err(instructions::StepOutcome::Fault(fault)) => {
                let pc = self.registers.pc;
                if self.reported_faults.insert(pc) {
                    tracing::warn!(tag = "cpu", core = self.core_id, %fault, "cpu fault, halting core");
                }
                self.last_fault = Some(fault);
                self.running = false;
            }
        }
    }

    /// Clears the `WAITI` halt, as an interrupt delivery would.
    pub fn wake(&mut self) {
        self.halted = false;
    }

    /// Runs up to `budget` steps, stopping early on a breakpoint, `WAITI`,
    /// or a fault. A hooked PC is serviced by `step` itself (`SPEC_FULL.md`
    /// §4.2 step contract: breakpoint check, then hook check, then
    /// fetch/decode/execute), so a hot loop that re-enters a stubbed symbol
    /// every iteration is intercepted every time, not just once per batch.
    pub fn run(&mut self, mem: &mut AddressSpace, hooks: &mut HookTable, budget: u32) -> StopReason {
        for _ in 0..budget {
            if !self.running {
                return StopReason::Fault;
            }
            if self.halted {
                return StopReason::Waiti;
            }
            if self.breakpoints.contains(&self.registers.pc) {
                return StopReason::Breakpoint;
            }
            self.step(mem, hooks);
        }
        if !self.running {
            StopReason::Fault
        } else if self.halted {
            StopReason::Waiti
        } else {
            StopReason::BudgetExhausted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookTable;
    use crate::memory::AddressSpace;

    #[test]
    fn test_new_core_is_running_and_not_halted() {
        let cpu = Cpu::new(0);
        assert!(cpu.running);
        assert!(!cpu.halted);
        assert_eq!(cpu.cycle_count, 0);
    }

    #[test]
    fn test_breakpoint_table_enforces_max() {
        let mut cpu = Cpu::new(0);
        for pc in 0..MAX_BREAKPOINTS as u32 {
            cpu.set_breakpoint(pc * 4).unwrap();
        }
        assert!(cpu.set_breakpoint(0xFFFF_0000).is_err());
    }

    #[test]
    fn test_set_breakpoint_is_idempotent() {
        let mut cpu = Cpu::new(0);
        for _ in 0..MAX_BREAKPOINTS + 4 {
            cpu.set_breakpoint(0x1000).unwrap();
        }
        assert_eq!(cpu.breakpoints().len(), 1);
    }

    #[test]
    fn test_clear_breakpoint_removes_entry() {
        let mut cpu = Cpu::new(0);
        cpu.set_breakpoint(0x1000).unwrap();
        cpu.clear_breakpoint(0x1000);
        assert!(cpu.breakpoints().is_empty());
    }

    #[test]
    fn test_run_stops_at_breakpoint_before_executing() {
        let mut cpu = Cpu::new(0);
        let mut mem = AddressSpace::new();
        let mut hooks = HookTable::new();
        cpu.registers.pc = crate::memory::IRAM_BASE;
        cpu.set_breakpoint(crate::memory::IRAM_BASE).unwrap();
        let reason = cpu.run(&mut mem, &mut hooks, 10);
        assert_eq!(reason, StopReason::Breakpoint);
        assert_eq!(cpu.cycle_count, 0);
    }

    #[test]
    fn test_step_dispatches_hook_before_fetch_and_consumes_one_cycle() {
        let mut cpu = Cpu::new(0);
        let mut mem = AddressSpace::new();
        let mut hooks = HookTable::new();
        hooks.install(
            crate::memory::IRAM_BASE,
            Box::new(|regs: &mut RegisterFile, _mem: &mut AddressSpace| regs.ar_write(2, 0x2A)),
        );
        cpu.registers.pc = crate::memory::IRAM_BASE;
        cpu.registers.ar_write(0, crate::memory::IRAM_BASE + 0x10);
        cpu.step(&mut mem, &mut hooks);
        assert_eq!(cpu.registers.pc, crate::memory::IRAM_BASE + 0x10);
        assert_eq!(cpu.registers.ar_read(2), 0x2A);
        assert_eq!(cpu.cycle_count, 1);
    }

    #[test]
    fn test_virtual_time_scales_with_divisor() {
        let mut cpu = Cpu::new(0);
        cpu.cycle_count = 320;
        assert_eq!(cpu.virtual_time_us(160), 2);
        assert_eq!(cpu.virtual_time_us(0), 0);
    }
}
