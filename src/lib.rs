pub mod analytics;
pub mod config;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod ml;
pub mod record;
pub mod registry;
pub mod server;
pub mod store;

pub use error::{Error, Result};
