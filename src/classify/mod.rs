pub mod pipeline;
pub mod report;
pub mod types;

pub use pipeline::ClassificationPipeline;
pub use types::{
    ClassProbability, ClassificationResult, ClassifyOptions, ClassifyStage, ClassifyStatus,
    Prediction, TerrainClass, Verdict,
};
