pub mod config;
pub mod db;
pub mod types;

pub use config::Config;
pub use types::*;
