//! Core subsystems of the BadgeVMS multi-process operating environment:
//! path parsing, the device table, the application registry, process
//! management, the compositor, Wi-Fi control ("Hermes"), the OTA updater and
//! the small HTTP client that feeds it.
//!
//! This crate is host-buildable: an "RTOS task" is an OS thread, a "PSRAM
//! region" is a heap-backed buffer tracked per process, and collaborators
//! that are normally separate chips (the LCD panel, the radio) are trait
//! objects so tests and host tools can substitute fakes for them.

#![warn(
    anonymous_parameters,
    missing_copy_implementations,
    missing_debug_implementations,
    nonstandard_style,
    rust_2018_idioms,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_extern_crates,
    unused_qualifications,
    variant_size_differences
)]

pub mod compositor;
pub mod device;
pub mod error;
pub mod event;
pub mod http;
pub mod ota;
pub mod path;
pub mod process;
pub mod registry;
pub mod wifi;

pub use error::BadgeError;
