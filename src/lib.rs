#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Common patterns that make code more readable
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
// Legacy Codebase Exemptions (Strict Mode)
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::similar_names)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::significant_drop_in_scrutinee)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::fn_params_excessive_bools)]
#![allow(clippy::needless_pass_by_ref_mut)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::non_send_fields_in_send_ty)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::match_bool)]
// Style allowances - keep code readable
#![allow(clippy::too_many_lines)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::let_underscore_untyped)]
#![allow(clippy::unnecessary_literal_unwrap)]
#![allow(clippy::ref_patterns)]
#![allow(clippy::inconsistent_struct_constructor)]
#![allow(clippy::bool_to_int_with_if)]
#![allow(clippy::useless_let_if_seq)]
#![allow(clippy::if_not_else)]
#![allow(clippy::single_match)]
#![allow(clippy::single_match_else)]
#![allow(clippy::ignored_unit_patterns)]
#![allow(clippy::trait_duplication_in_bounds)]
#![allow(clippy::type_repetition_in_bounds)]
// Performance style - prefer explicitness over micro-optimizations
#![allow(clippy::ptr_arg)]
#![allow(clippy::used_underscore_binding)]
#![allow(clippy::assigning_clones)]
#![allow(clippy::collapsible_else_if)]
#![allow(clippy::inline_always)]
#![allow(clippy::default_numeric_fallback)]
#![allow(clippy::or_fun_call)]
#![allow(clippy::if_same_then_else)]
#![allow(clippy::let_and_return)]
#![allow(clippy::map_flatten)]
#![allow(clippy::map_identity)]
#![allow(clippy::needless_late_init)]
#![allow(clippy::redundant_else)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::wildcard_in_or_patterns)]
// Additional style allowances
#![allow(clippy::items_after_statements)]
#![allow(clippy::no_effect_underscore_binding)]
#![allow(clippy::branches_sharing_code)]
#![allow(clippy::trivially_copy_pass_by_ref)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::unused_self)]
// Nursery Exemptions
#![allow(clippy::redundant_pub_crate)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::use_self)]
#![allow(clippy::cognitive_complexity)]
// Allow for error handling in emulator code
#![allow(clippy::verbose_bit_mask)]

//! `cyd-emu`: a host-side emulator for "Cheap Yellow Display" ESP32 boards.
//!
//! Loads an unmodified Xtensa LX6 firmware image and runs it against a
//! simulated board — two CPU cores, a region-routed address space, a
//! PC-hooked stub fabric standing in for ESP-IDF/FreeRTOS/TFT_eSPI library
//! bodies, and a host FreeRTOS runtime backing the primitives those stubs
//! call into — so firmware can be iterated on without flashing real
//! hardware. [`Session`] is the crate's single entry point: construct one
//! from a [`Config`], then drive [`Session::run`] on a dedicated thread and
//! use [`Session::debug_handle`] to pause/continue/inspect it from another.

pub mod config;
pub mod cpu;
pub mod crypto;
pub mod display;
pub mod error;
pub mod esp_timer;
pub mod hooks;
pub mod instructions;
pub mod loader;
pub mod logging;
pub mod memory;
pub mod nvs;
pub mod registers;
pub mod rtos;
pub mod sdcard;
pub mod session;
pub mod stubs;
pub mod symbols;
pub mod touch;

pub use config::{Args, BoardProfile, Config};
pub use cpu::{Cpu, StopReason};
pub use error::{CpuFault, RtosError, SessionError};
pub use session::{DebugHandle, Session};
