//! Native audio backends for the capture and playback seams.

pub mod capture;
pub mod playback;

pub use capture::{NativeCaptureDevice, list_input_devices};
pub use playback::NativePlaybackBackend;
