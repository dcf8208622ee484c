//! HTTP API handlers for reboot-intake

pub mod drafts;
pub mod health;
pub mod shoes;
pub mod sse;
pub mod submissions;

pub use drafts::draft_routes;
pub use health::health_routes;
pub use shoes::shoe_routes;
pub use sse::event_routes;
pub use submissions::submission_routes;
