//! API middleware stack.
//!
//! Execution order (outermost → innermost):
//! 1. Audit logger: sees every request, including rejected ones
//! 2. Rate limiter: reject early, before any upstream work

pub mod audit;
pub mod rate;
