pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notifier;
pub mod registry;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use registry::Registry;
