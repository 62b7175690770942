pub mod challenge;
pub mod config;
pub mod project;

pub use challenge::{Challenge, RegistryError, TestCase, TestInput};
// config is accessed as crate::models::config::{load_config, save_config, ...}
pub use project::AttemptMetadata;
