use crate::classify::TerrainClass;
use crate::models::{OnnxTerrainModel, TerrainModel};
use crate::utils::error::ClassifierError;
use crate::{Config, Result};
use ndarray::Array4;
use std::sync::Arc;

/// 模型管理器：启动时加载一次，所有请求共享
pub struct ModelManager {
    model: Arc<dyn TerrainModel>,
    config: Config,
}

impl ModelManager {
    /// 从配置加载ONNX模型
    pub fn load(config: Config) -> Result<Self> {
        tracing::info!("Initializing model manager...");

        let model = OnnxTerrainModel::new(&config)?;
        let manager = Self::with_model(Arc::new(model), config);

        tracing::info!("Model manager initialized successfully");
        Ok(manager)
    }

    /// 使用已有模型构造
    pub fn with_model(model: Arc<dyn TerrainModel>, config: Config) -> Self {
        Self { model, config }
    }

    pub fn model(&self) -> Arc<dyn TerrainModel> {
        Arc::clone(&self.model)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 模型健康检查：对全零输入做一次推理
    pub fn health_check(&self) -> Result<()> {
        tracing::debug!("Performing model health check...");

        let size = self.config.classifier_config.input_size as usize;
        let blank = Array4::<f32>::zeros((1, size, size, 3));
        let scores = self.model.predict(blank)?;

        if scores.len() != TerrainClass::ALL.len() {
            return Err(ClassifierError::Inference(format!(
                "Health check expected {} scores, got {}",
                TerrainClass::ALL.len(),
                scores.len()
            )));
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(ClassifierError::Inference(
                "Health check produced non-finite scores".to_string(),
            ));
        }

        tracing::debug!("Model health check passed");
        Ok(())
    }

    /// 获取模型统计信息
    pub fn get_stats(&self) -> ModelStats {
        ModelStats {
            model: self.model.describe(),
            input_size: self.config.classifier_config.input_size,
            confidence_threshold: self.config.classifier_config.confidence_threshold,
            classes: TerrainClass::ALL.iter().map(|c| c.name()).collect(),
            intra_threads: self.config.onnx_config.intra_threads,
            optimization_level: self.config.onnx_config.optimization_level,
        }
    }
}

/// 模型统计信息
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelStats {
    pub model: String,
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub classes: Vec<&'static str>,
    pub intra_threads: usize,
    pub optimization_level: i32,
}
