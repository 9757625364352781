//! Headless CLI front-end for the CYD emulator: parses board/firmware
//! configuration, assembles a `Session`, and drives it to completion on the
//! calling thread. The debug/pause surface and the control-socket protocol
//! that would drive it are out of scope (`SPEC_FULL.md` §1); this binary is
//! the minimal harness that proves the hard layer runs firmware end to end.

use clap::Parser;
use cyd_emu::config::{Args, BoardProfile};
use cyd_emu::logging::{self, LogRing};
use cyd_emu::session::Session;

fn main() {
    let args = Args::parse();

    if std::env::args().any(|a| a == "--list-boards") {
        for name in BoardProfile::list() {
            println!("{name}");
        }
        return;
    }

    let verbose = args.verbose;
    let quiet = args.quiet;
    let ring = LogRing::new();
    logging::init(ring, verbose, quiet);

    let config = args.into_config();
    let firmware = config.firmware_path.clone();

    let mut session = match Session::new(config) {
        Ok(session) => session,
        Err(err) => {
            tracing::error!(tag = "cyd-emu", firmware = %firmware.display(), error = %err, "failed to start session");
            std::process::exit(1);
        }
    };

    tracing::info!(
        tag = "cyd-emu",
        firmware = %firmware.display(),
        entry = format_args!("0x{:08X}", session.load_result().entry_point),
        segments = session.load_result().segment_count,
        "firmware loaded"
    );

    session.run();

    tracing::info!(tag = "cyd-emu", "core 0 halted, shutting down");
    session.shutdown();
}
