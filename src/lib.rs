pub mod config;
pub mod models;
pub mod image;
pub mod classify;
pub mod web;
pub mod utils;

// 重新导出主要类型
pub use config::Config;
pub use classify::{ClassificationResult, TerrainClass};
pub use utils::error::ClassifierError;

pub type Result<T> = std::result::Result<T, ClassifierError>;
