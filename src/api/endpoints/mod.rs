//! API endpoint handlers.
//!
//! Handlers translate HTTP into pipeline calls and back; all verification
//! logic lives in `crate::pipeline`.

pub mod analyze;
pub mod citation;
pub mod health;
pub mod review;
