pub mod classifier;
pub mod manager;

pub use classifier::{OnnxTerrainModel, TerrainModel};
pub use manager::{ModelManager, ModelStats};
