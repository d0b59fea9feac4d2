//! End-to-end tests that exercise the binary's plumbing against real
//! processes: a scripted shell stand-in for the vendor helper, real
//! files, and the cross-process upload lock.

pub mod helpers;
pub mod upload_flow;
pub mod watch_flow;
