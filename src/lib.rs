//! Command-line utilities for driving an already-running Chrome instance
//! over the Chrome DevTools Protocol.
//!
//! Every tool follows the same shape: connect to the remote-debugging port,
//! locate the active page, perform one browser operation through
//! [`chromiumoxide`], print the result, and exit. The heavy lifting (CDP
//! session handling, retries inside the protocol layer, DOM queries) lives in
//! the automation library; this crate only provides the glue, the CLI
//! surface, and consistent output.

pub mod actions;
pub mod capture;
pub mod config;
pub mod connection;
pub mod inspect;
pub mod launch;
pub mod picker;
pub mod scripts;
pub mod state;
