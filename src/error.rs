//! Error types for the emulator, one enum per subsystem.
//!
//! Configuration-time failures (`SessionError`) are distinct from steady-state
//! interpreter faults (`CpuFault`) and host-runtime resource exhaustion
//! (`RtosError`): see `SPEC_FULL.md` §7 for the three-category split this
//! module implements.

use std::path::PathBuf;
use thiserror::Error;

/// Failures that can occur while assembling a `Session` from a `Config`.
///
/// All of these are reported before the CPU thread starts; the session
/// releases any resources it had already acquired (open files, started
/// daemon threads) in reverse order before returning one of these.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to read firmware image {path}: {source}")]
    FirmwareIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("firmware image too short to contain a header")]
    ImageTruncated,

    #[error("unrecognized firmware image magic (expected 'SURV' or ESP32 flash magic 0xE9)")]
    BadImageMagic,

    #[error("firmware segment {index} (load_addr=0x{load_addr:08X}, size={size}) does not fit any executable region")]
    SegmentUnmapped {
        index: usize,
        load_addr: u32,
        size: usize,
    },

    #[error("failed to read ELF symbol file {path}: {source}")]
    ElfIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed ELF32 file: {0}")]
    ElfMalformed(String),

    #[error("failed to open SD card image {path}: {source}")]
    SdCardIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to prepare NVS directory {path}: {source}")]
    NvsDirIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A fault raised by the interpreter while executing guest code.
///
/// Unlike `SessionError`, these occur after the session is fully up and
/// running. The CPU logs the fault once per unique PC and sets
/// `running = false`; it is not retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CpuFault {
    #[error("unimplemented opcode 0x{opcode:06X} at pc=0x{pc:08X}")]
    UnimplementedOpcode { pc: u32, opcode: u32 },

    #[error("windowed register rotation overflow at pc=0x{pc:08X} (windowbase={windowbase})")]
    WindowOverflow { pc: u32, windowbase: u8 },

    #[error("breakpoint table full (max {max} entries)")]
    BreakpointTableFull { max: usize },
}

/// Resource-exhaustion errors returned by the host FreeRTOS runtime to stub
/// code, mirroring the `pdFALSE`/`errQUEUE_FULL`-style failure codes the
/// guest already knows how to handle. These never propagate past a stub;
/// the stub encodes them into whatever return value the guest firmware
/// expects.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum RtosError {
    #[error("task table full")]
    TaskTableFull,

    #[error("timer table full")]
    TimerTableFull,

    #[error("invalid handle")]
    InvalidHandle,

    #[error("operation timed out")]
    TimedOut,

    #[error("queue full")]
    QueueFull,

    #[error("queue empty")]
    QueueEmpty,

    #[error("semaphore at maximum count")]
    SemaphoreSaturated,

    #[error("runtime is shutting down")]
    ShuttingDown,
}
