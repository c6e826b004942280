pub mod call;
pub mod config;
pub mod error;
pub mod http;
pub mod media;
pub mod providers;
pub mod recording;
pub mod vad;

pub use call::{
    CallBackend, CallController, CallHandle, CallSnapshot, CallStatus, CallSummary,
    ControllerConfig, CredentialSource, HttpCredentialClient, SessionCredential, SessionEvent,
    VoiceSession,
};
pub use config::Config;
pub use error::{CallError, MediaError, RecorderFault};
pub use http::{create_router, AppState, HttpVendorApi, VendorApi};
pub use media::{
    DeviceConfig, DeviceManager, FilePlatform, MediaConstraints, MediaDevice, MediaKind,
    MediaPlatform, MediaStream, MediaTrack,
};
pub use providers::Provider;
pub use recording::{LocalRecorder, RecorderConfig, WavEncoderFactory};
pub use vad::VoiceActivityDetector;
