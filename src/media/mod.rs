pub mod convert;
pub mod debounce;
pub mod device;
pub mod file;
pub mod manager;
pub mod platform;
pub mod stream;

pub use debounce::Debouncer;
pub use device::{MediaConstraints, MediaDevice, MediaKind};
pub use file::{FileDevice, FilePlatform};
pub use manager::{DeviceConfig, DeviceManager};
pub use platform::MediaPlatform;
pub use stream::{AudioFrame, MediaStream, MediaTrack};
