pub mod network;
pub mod config;
pub mod error;
pub mod events;
pub mod service;
pub mod utils;

pub use error::{NetsiftError, DecodeError, Result};
pub use config::Config;
pub use service::AnalysisService;
