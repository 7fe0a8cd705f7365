//! # CLI Module
//!
//! Command-line entry points for the `genai-api` binary.
//!
//! ## Commands
//!
//! ### `serve`
//!
//! Start the HTTP server. Flags override the matching environment variables
//! (see [`crate::config`]):
//!
//! ```bash
//! genai-api serve --addr 127.0.0.1:8000 --env production --workers 8
//! ```
//!
//! The process exits cleanly on SIGINT or SIGTERM once in-flight requests
//! have been answered.
//!
//! ### `routes`
//!
//! Print the route table together with each handler's dependency
//! evaluation order:
//!
//! ```bash
//! genai-api routes
//! ```

mod commands;

#[cfg(test)]
mod tests;

pub use commands::{route_table, run_cli, Cli, Commands};
