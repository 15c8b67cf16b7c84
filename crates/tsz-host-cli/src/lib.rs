//! Command-line driver for a tsz-host server group.
//!
//! - `args`: flags and their merge over the JSON host config
//! - `session`: the stdin/stdout request loop

pub mod args;
pub use args::HostArgs;

pub mod session;
