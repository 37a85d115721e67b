//! EAP-AKA/AKA' conformance tester for RADIUS authentication servers.
//!
//! The tester acts as a synthetic supplicant: it drives a single EAP
//! session over RADIUS, computes Milenage authentication vectors from the
//! configured USIM material, tracks SQN freshness per subscriber, and
//! verifies that the server's verdict matches a declared expectation.
//!
//! Modules:
//!
//! - [`config`] / [`testcase`]: YAML tool configuration and testcase files
//! - [`sqnstore`]: per-IMSI SQN freshness state with memory and file backends
//! - [`peer`] / [`aka_method`]: the EAP peer dispatcher and the AKA/AKA' method
//! - [`client`]: the RADIUS Access-Request/Access-Challenge transport
//! - [`runner`]: the session loop and verdict evaluation
//! - [`trace`]: session trace output with credential masking

pub mod aka_method;
pub mod client;
pub mod config;
pub mod peer;
pub mod runner;
pub mod sqnstore;
pub mod testcase;
pub mod trace;

pub use config::Config;
pub use runner::{run_case, RunError, EXIT_EXPECTATION, EXIT_INFRASTRUCTURE, EXIT_PASS};
pub use testcase::Case;
