//! Call session orchestration
//!
//! `CallController` owns one call: it fetches a credential, starts the
//! provider session, couples recording and voice activity to the call's
//! lifetime and tears everything down exactly once.

pub mod backend;
pub mod controller;
pub mod credentials;
pub mod eleven;
pub mod retell;
mod socket;
pub mod state;
pub mod timer;

pub use backend::{CallBackend, VoiceSession};
pub use controller::{CallController, CallHandle, ControllerConfig};
pub use credentials::{
    CallRecord, CreateCallResponse, CredentialSource, HttpCredentialClient, SignedUrlResponse,
};
pub use eleven::ElevenLabsSession;
pub use retell::RetellSession;
pub use socket::UPLINK_SAMPLE_RATE;
pub use state::{CallSnapshot, CallStatus, CallSummary, SessionCredential, SessionEvent};
pub use timer::ElapsedTimer;
