pub mod config;
pub mod engine;
pub mod error;
pub mod io;
pub mod paths;
pub mod publish;
pub mod render;
pub mod retention;
pub mod slack;
pub mod state;
pub mod store;
pub mod types;

pub use error::{BeaconError, Result};
