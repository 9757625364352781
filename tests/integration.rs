//! Cross-module integration tests: firmware image on disk -> loader ->
//! memory -> a running `Session`, and the ELF symbol side-channel feeding
//! the stub fabric's PC lookup. Per-module unit tests already cover each
//! piece in isolation; these exercise the seams between them.

use std::path::Path;

use cyd_emu::config::Config;
use cyd_emu::memory::IRAM_BASE;
use cyd_emu::session::Session;

/// `WAITI 0`, same narrow encoding `session.rs`'s own tests use.
const WAITI: [u8; 3] = [0x15, 0x00, 0x00];

fn write_container_image(path: &Path, entry: u32, payload: &[u8]) {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"SURV");
    bytes.extend_from_slice(&entry.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(payload);
    std::fs::write(path, bytes).unwrap();
}

fn base_config(dir: &tempfile::TempDir, payload: &[u8]) -> Config {
    let fw_path = dir.path().join("fw.bin");
    write_container_image(&fw_path, IRAM_BASE, payload);
    let mut config = Config::for_board(fw_path, "2432S028R");
    config.nvs_dir = Some(dir.path().join("nvs"));
    config.max_batches = Some(5);
    config
}

#[test]
fn firmware_loads_and_runs_to_first_waiti() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(&dir, &WAITI);

    let mut session = Session::new(config).unwrap();
    assert_eq!(session.load_result().segment_count, 1);
    assert_eq!(session.load_result().entry_point, IRAM_BASE);
    assert_eq!(session.core(0).registers.pc, IRAM_BASE);

    session.run();

    assert!(session.core(0).halted, "core 0 should latch WAITI and stop advancing pc");
    assert_eq!(session.core(0).registers.pc, IRAM_BASE);
    session.shutdown();
}

#[test]
fn session_construction_fails_cleanly_on_missing_firmware() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::for_board(dir.path().join("does-not-exist.bin"), "2432S028R");
    let err = Session::new(config).unwrap_err();
    assert!(err.to_string().to_lowercase().contains("firmware") || err.to_string().contains("does-not-exist"));
}

#[test]
fn board_profile_seeds_framebuffer_and_session_exposes_it() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(&dir, &WAITI);
    config.board = cyd_emu::config::BoardProfile::find("3248S035R");
    config.framebuffer_width = config.board.display_width;
    config.framebuffer_height = config.board.display_height;

    let mut session = Session::new(config).unwrap();
    assert_eq!(session.display().width(), 480);
    assert_eq!(session.display().height(), 320);
    session.shutdown();
}
