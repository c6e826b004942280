use async_trait::async_trait;
use tokio::sync::mpsc;

use super::eleven::ElevenLabsSession;
use super::retell::RetellSession;
use super::state::{SessionCredential, SessionEvent};
use crate::config::Config;
use crate::error::CallError;
use crate::media::MediaStream;
use crate::providers::Provider;

/// Remote half of a call
///
/// `start` resolves once the provider has accepted the call and returns the
/// event stream for its lifetime.
#[async_trait]
pub trait VoiceSession: Send + Sync {
    fn name(&self) -> &'static str;

    async fn start(
        &mut self,
        credential: &SessionCredential,
        stream: &MediaStream,
    ) -> Result<mpsc::Receiver<SessionEvent>, CallError>;

    async fn stop(&mut self) -> Result<(), CallError>;

    async fn set_muted(&mut self, muted: bool) -> Result<(), CallError>;

    fn is_muted(&self) -> bool;

    /// Move the uplink onto a replacement stream mid-call
    async fn switch_stream(&mut self, _stream: &MediaStream) -> Result<(), CallError> {
        Ok(())
    }

    /// Call id assigned by the provider once connected
    fn call_id(&self) -> Option<String> {
        None
    }
}

/// The session for whichever provider the user picked
pub enum CallBackend {
    Retell(RetellSession),
    ElevenLabs(ElevenLabsSession),
}

impl CallBackend {
    pub fn for_provider(provider: Provider, config: &Config) -> Self {
        match provider {
            Provider::Retell => CallBackend::Retell(RetellSession::new(config.retell.relay_url.clone())),
            Provider::Eleven => CallBackend::ElevenLabs(ElevenLabsSession::new()),
        }
    }

    pub fn provider(&self) -> Provider {
        match self {
            CallBackend::Retell(_) => Provider::Retell,
            CallBackend::ElevenLabs(_) => Provider::Eleven,
        }
    }

    fn session(&self) -> &dyn VoiceSession {
        match self {
            CallBackend::Retell(session) => session,
            CallBackend::ElevenLabs(session) => session,
        }
    }

    fn session_mut(&mut self) -> &mut dyn VoiceSession {
        match self {
            CallBackend::Retell(session) => session,
            CallBackend::ElevenLabs(session) => session,
        }
    }
}

#[async_trait]
impl VoiceSession for CallBackend {
    fn name(&self) -> &'static str {
        self.session().name()
    }

    async fn start(
        &mut self,
        credential: &SessionCredential,
        stream: &MediaStream,
    ) -> Result<mpsc::Receiver<SessionEvent>, CallError> {
        self.session_mut().start(credential, stream).await
    }

    async fn stop(&mut self) -> Result<(), CallError> {
        self.session_mut().stop().await
    }

    async fn set_muted(&mut self, muted: bool) -> Result<(), CallError> {
        self.session_mut().set_muted(muted).await
    }

    fn is_muted(&self) -> bool {
        self.session().is_muted()
    }

    async fn switch_stream(&mut self, stream: &MediaStream) -> Result<(), CallError> {
        self.session_mut().switch_stream(stream).await
    }

    fn call_id(&self) -> Option<String> {
        self.session().call_id()
    }
}
