//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod format;
pub mod playback;
pub mod silence;
pub mod wav;

pub use buffer::SampleRing;
pub use capture::{CaptureSource, MicCapture};
pub use device::{list_devices, print_devices, DeviceInfo};
pub use format::{AudioBuffer, AudioFormat, SampleFormat};
pub use playback::{DevicePlayback, PcmSink, WavFileSink};
pub use silence::make_silence;
pub use wav::read_wav;
