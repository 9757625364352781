//! Board profiles and session configuration.
//!
//! `Config` is what a `Session` is built from, whether that config came from
//! the CLI (`Args::parse().into_config()`) or was constructed programmatically
//! by an embedder. `BoardProfile` is a small static catalog of known CYD
//! board variants, modeled on the board table in the original project
//! (`emu_board.h`) — it only changes defaults, never CPU or memory semantics.

use std::path::PathBuf;

use clap::Parser;

/// Which touch controller a board profile wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchKind {
    /// XPT2046 resistive touch controller (SPI).
    ResistiveXpt2046,
    /// GT911 capacitive touch controller (I2C).
    CapacitiveGt911,
}

/// A named board configuration preset.
#[derive(Debug, Clone, Copy)]
pub struct BoardProfile {
    pub name: &'static str,
    pub chip_cores: u8,
    pub display_width: u16,
    pub display_height: u16,
    pub touch_kind: TouchKind,
    pub has_sd_slot: bool,
}

/// Known board profiles, index 0 is the default ("classic CYD").
const BOARD_PROFILES: &[BoardProfile] = &[
    BoardProfile {
        name: "2432S028R",
        chip_cores: 2,
        display_width: 320,
        display_height: 240,
        touch_kind: TouchKind::ResistiveXpt2046,
        has_sd_slot: true,
    },
    BoardProfile {
        name: "2432S028C",
        chip_cores: 2,
        display_width: 320,
        display_height: 240,
        touch_kind: TouchKind::CapacitiveGt911,
        has_sd_slot: true,
    },
    BoardProfile {
        name: "2432S024R",
        chip_cores: 2,
        display_width: 320,
        display_height: 240,
        touch_kind: TouchKind::ResistiveXpt2046,
        has_sd_slot: true,
    },
    BoardProfile {
        name: "3248S035R",
        chip_cores: 2,
        display_width: 480,
        display_height: 320,
        touch_kind: TouchKind::ResistiveXpt2046,
        has_sd_slot: true,
    },
    BoardProfile {
        name: "4827S043C",
        chip_cores: 2,
        display_width: 480,
        display_height: 272,
        touch_kind: TouchKind::CapacitiveGt911,
        has_sd_slot: false,
    },
    BoardProfile {
        name: "8048S043R",
        chip_cores: 2,
        display_width: 800,
        display_height: 480,
        touch_kind: TouchKind::ResistiveXpt2046,
        has_sd_slot: false,
    },
];

const DEFAULT_BOARD_INDEX: usize = 0;

/// Default clock divisor: 160 MHz, per `SPEC_FULL.md` Open Question 3.
pub const DEFAULT_CLOCK_DIVISOR: u32 = 160;

/// Default SD card image size when one is created fresh (64 MiB).
pub const DEFAULT_SDCARD_SIZE_BYTES: u64 = 64 * 1024 * 1024;

impl BoardProfile {
    /// Looks up a board profile by name, falling back to the default and
    /// logging a warning if the name is not recognized.
    #[must_use]
    pub fn find(name: &str) -> Self {
        BOARD_PROFILES
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .copied()
            .unwrap_or_else(|| {
                tracing::warn!(tag = "config", requested = name, "unknown board profile, using default");
                Self::default()
            })
    }

    /// Lists all known board profile names.
    #[must_use]
    pub fn list() -> Vec<&'static str> {
        BOARD_PROFILES.iter().map(|p| p.name).collect()
    }
}

impl Default for BoardProfile {
    fn default() -> Self {
        BOARD_PROFILES[DEFAULT_BOARD_INDEX]
    }
}

/// Fully resolved session configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub board: BoardProfile,
    pub firmware_path: PathBuf,
    pub elf_path: Option<PathBuf>,
    pub sdcard_path: Option<PathBuf>,
    pub sdcard_size_bytes: u64,
    pub nvs_dir: Option<PathBuf>,
    pub turbo: bool,
    pub clock_divisor: u32,
    pub framebuffer_width: u16,
    pub framebuffer_height: u16,
    /// When set, the session stops after this many CPU batches instead of
    /// running until the firmware halts. Used by headless/scripted runs and
    /// integration tests; `None` means run indefinitely.
    pub max_batches: Option<u64>,
}

impl Config {
    /// Builds a `Config` for the named board, defaulting framebuffer
    /// dimensions from the board profile.
    #[must_use]
    pub fn for_board(firmware_path: PathBuf, board_name: &str) -> Self {
        let board = BoardProfile::find(board_name);
        Self {
            framebuffer_width: board.display_width,
            framebuffer_height: board.display_height,
            board,
            firmware_path,
            elf_path: None,
            sdcard_path: None,
            sdcard_size_bytes: DEFAULT_SDCARD_SIZE_BYTES,
            nvs_dir: None,
            turbo: false,
            clock_divisor: DEFAULT_CLOCK_DIVISOR,
            max_batches: None,
        }
    }
}

/// Command-line arguments for the `cyd-emu` binary.
#[derive(Debug, Parser)]
#[command(name = "cyd-emu", about = "Host-side emulator for Cheap Yellow Display (ESP32) hardware")]
pub struct Args {
    /// Path to the firmware image to load.
    pub firmware: PathBuf,

    /// Optional ELF file carrying `.symtab`/`.strtab` for symbol-hooked stubs.
    #[arg(long)]
    pub elf: Option<PathBuf>,

    /// Board profile name (see `--list-boards`).
    #[arg(long, default_value = "2432S028R")]
    pub board: String,

    /// Backing file for the emulated SD card.
    #[arg(long = "sd-image")]
    pub sdcard_path: Option<PathBuf>,

    /// Size in bytes to create the SD image at if it doesn't exist.
    #[arg(long = "sd-size", default_value_t = DEFAULT_SDCARD_SIZE_BYTES)]
    pub sdcard_size: u64,

    /// Directory to store NVS namespace files in.
    #[arg(long)]
    pub nvs_dir: Option<PathBuf>,

    /// Disable SD access throttling.
    #[arg(long)]
    pub turbo: bool,

    /// CPU clock frequency in MHz, used to derive virtual time from cycle count.
    #[arg(long = "clock-mhz", default_value_t = DEFAULT_CLOCK_DIVISOR)]
    pub clock_mhz: u32,

    /// Stop after this many CPU batches (10,000 instructions each); omit to run until halt.
    #[arg(long)]
    pub max_batches: Option<u64>,

    /// Increase log verbosity (repeatable).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Decrease log verbosity (repeatable).
    #[arg(short = 'q', long, action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Args {
    /// Converts parsed CLI arguments into a `Config`.
    #[must_use]
    pub fn into_config(self) -> Config {
        let mut config = Config::for_board(self.firmware, &self.board);
        config.elf_path = self.elf;
        config.sdcard_path = self.sdcard_path;
        config.sdcard_size_bytes = self.sdcard_size;
        config.nvs_dir = self.nvs_dir;
        config.turbo = self.turbo;
        config.clock_divisor = self.clock_mhz;
        config.max_batches = self.max_batches;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_board_is_classic_cyd() {
        let board = BoardProfile::default();
        assert_eq!(board.name, "2432S028R");
        assert_eq!(board.display_width, 320);
        assert_eq!(board.display_height, 240);
    }

    #[test]
    fn test_find_unknown_board_falls_back_to_default() {
        let board = BoardProfile::find("not-a-real-board");
        assert_eq!(board.name, BoardProfile::default().name);
    }

    #[test]
    fn test_find_is_case_insensitive() {
        let board = BoardProfile::find("2432s028r");
        assert_eq!(board.name, "2432S028R");
    }

    #[test]
    fn test_config_for_board_seeds_framebuffer_from_profile() {
        let config = Config::for_board(PathBuf::from("fw.bin"), "3248S035R");
        assert_eq!(config.framebuffer_width, 480);
        assert_eq!(config.framebuffer_height, 320);
        assert_eq!(config.clock_divisor, DEFAULT_CLOCK_DIVISOR);
    }

    #[test]
    fn test_list_boards_nonempty() {
        assert!(!BoardProfile::list().is_empty());
    }
}
