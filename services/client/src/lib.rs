//! Tandem Client Library Crate
//!
//! Everything the terminal client needs around the coordination logic in
//! `tandem-core`: configuration, the native audio backends, WAV/PCM helpers,
//! terminal presentation and the session event loop. The `tandem` binary is a
//! thin wrapper around this library.

pub mod audio;
pub mod audio_utils;
pub mod config;
pub mod console;
pub mod session;
