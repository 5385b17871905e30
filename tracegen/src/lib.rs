//! The tracegen synthetic trace load generator.
//!
//! This library supports the tracegen binary found elsewhere in this project.
//! Each scenario builds chains and trees of spans, hands finished spans to an
//! exporter that batches them onto the wire, and paces itself against a
//! spans-per-minute target.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod common;
pub mod config;
pub mod exporter;
pub mod scenario;
pub mod signals;
