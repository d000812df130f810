//! HTTP route handlers grouped by resource.
//!
//! Handlers are annotated with `#[openapi]` so `rocket_okapi` can derive the
//! OpenAPI document served under `/api/docs`.

pub mod deliveries;
pub mod health;
pub(crate) mod helpers;
pub mod messages;
pub mod params;
pub mod threads;
