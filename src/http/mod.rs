//! Credential routes for the interview client
//!
//! Thin wrappers around the provider REST APIs so API keys never leave the
//! server:
//! - POST /api/create-retell-call - Create a Retell web call
//! - GET /api/get-elevenlabs-signed-url - Signed ElevenLabs conversation url
//! - GET /api/get-call-data - Retell call record, transcript or recording
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;
mod vendor;

pub use handlers::ErrorResponse;
pub use routes::create_router;
pub use state::AppState;
pub use vendor::{HttpVendorApi, VendorApi};
