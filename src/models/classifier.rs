use crate::utils::error::ClassifierError;
use crate::{Config, Result};
use ndarray::Array4;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
    inputs,
};
use parking_lot::Mutex;
use std::path::PathBuf;

/// 推理模型抽象：输入 `[1, H, W, 3]`，输出每个类别的分数
pub trait TerrainModel: Send + Sync {
    fn predict(&self, input: Array4<f32>) -> Result<Vec<f32>>;

    /// 模型描述，用于服务信息接口
    fn describe(&self) -> String {
        "terrain-classifier".to_string()
    }
}

pub struct OnnxTerrainModel {
    session: Mutex<Session>,
    input_name: String,
    output_name: String, // 动态发现的输出名称
    model_path: PathBuf,
}

impl OnnxTerrainModel {
    pub fn new(config: &Config) -> Result<Self> {
        let model_path = config.terrain_model_path();

        if !model_path.exists() {
            return Err(ClassifierError::ModelLoad(format!(
                "Terrain model not found: {}",
                model_path.display()
            )));
        }

        tracing::info!("Loading terrain model from: {}", model_path.display());

        let session = Session::builder()?
            .with_optimization_level(optimization_level(config.onnx_config.optimization_level))?
            .with_intra_threads(config.onnx_config.intra_threads)?
            .commit_from_file(&model_path)?;

        let input_name = match session.inputs.first() {
            Some(input) => input.name.clone(),
            None => {
                return Err(ClassifierError::ModelLoad(
                    "Terrain model has no inputs".to_string(),
                ))
            }
        };

        let output_name = match session.outputs.first() {
            Some(output) => output.name.clone(),
            None => {
                return Err(ClassifierError::ModelLoad(
                    "Terrain model has no outputs".to_string(),
                ))
            }
        };

        for (i, output) in session.outputs.iter().enumerate() {
            tracing::debug!("Terrain model output[{}]: '{}'", i, output.name);
        }
        tracing::info!(
            "Terrain model ready: input='{}', output='{}'",
            input_name,
            output_name
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            model_path,
        })
    }
}

impl TerrainModel for OnnxTerrainModel {
    fn predict(&self, input: Array4<f32>) -> Result<Vec<f32>> {
        let input_tensor = Tensor::from_array(input)?;

        let mut session = self.session.lock();
        let outputs = session.run(inputs![self.input_name.as_str() => input_tensor])?;

        let predictions = match outputs.get(&self.output_name) {
            Some(output) => output.try_extract_array::<f32>()?.into_owned(),
            None => {
                let available_outputs: Vec<String> =
                    outputs.keys().map(|s| s.to_string()).collect();
                return Err(ClassifierError::Inference(format!(
                    "Output '{}' not found. Available outputs: {:?}",
                    self.output_name, available_outputs
                )));
            }
        };

        // 期望 [1, num_classes]
        let shape = predictions.shape();
        if shape.len() != 2 || shape[0] != 1 {
            return Err(ClassifierError::Inference(format!(
                "Expected output shape [1, N], got {:?}",
                shape
            )));
        }

        Ok(predictions.iter().copied().collect())
    }

    fn describe(&self) -> String {
        format!("onnx:{}", self.model_path.display())
    }
}

fn optimization_level(level: i32) -> GraphOptimizationLevel {
    match level {
        i32::MIN..=0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    }
}
