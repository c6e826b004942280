use tokio::sync::broadcast;

use super::device::{MediaConstraints, MediaDevice};
use super::stream::MediaStream;
use crate::error::MediaError;

/// Capture platform trait
///
/// Implementations:
/// - File: configured audio files presented as microphones (`FilePlatform`)
/// - Tests: in-memory platforms that hand out silent tracks
#[async_trait::async_trait]
pub trait MediaPlatform: Send + Sync {
    /// List every capture device currently present
    async fn enumerate_devices(&self) -> Result<Vec<MediaDevice>, MediaError>;

    /// Acquire a stream matching the constraints
    ///
    /// The caller owns the returned stream and must stop its tracks.
    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError>;

    /// Fires whenever devices are plugged or unplugged
    fn device_changes(&self) -> broadcast::Receiver<()>;

    /// Get platform name for logging
    fn name(&self) -> &str;
}
