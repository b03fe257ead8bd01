//! Inline request authorization gate.
//!
//! Requests are matched against an ordered list of path [`rule::Rule`]s. The
//! first rule that governs a request extracts the credentials it names and
//! delegates the decision to an external endpoint; the answer decides whether
//! the request is forwarded (possibly with extra headers), rejected or
//! redirected.

pub mod config;
pub mod gate;
pub mod logs;
pub mod middleware;
pub mod proxy;
pub mod response;
pub mod rule;
pub mod server;
