//! Platform seams: where programs and files live on the host.
//!
//! Plumbing only. Nothing in here makes an authorization decision.

pub mod paths;
pub mod shell;
pub mod tools;
