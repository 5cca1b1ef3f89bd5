use serde::{Deserialize, Serialize};
use std::fmt;

/// 地形类别，顺序与模型输出一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerrainClass {
    Desert,
    Forest,
    Mountain,
    Plains,
}

impl TerrainClass {
    pub const ALL: [TerrainClass; 4] = [
        TerrainClass::Desert,
        TerrainClass::Forest,
        TerrainClass::Mountain,
        TerrainClass::Plains,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            TerrainClass::Desert => "Desert",
            TerrainClass::Forest => "Forest",
            TerrainClass::Mountain => "Mountain",
            TerrainClass::Plains => "Plains",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            TerrainClass::Desert => "🏜️",
            TerrainClass::Forest => "🌳",
            TerrainClass::Mountain => "⛰️",
            TerrainClass::Plains => "🌾",
        }
    }

    /// 展示用标签，例如 "Forest 🌳"
    pub fn display_label(self) -> String {
        format!("{} {}", self.name(), self.emoji())
    }
}

impl fmt::Display for TerrainClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 单个类别的概率
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassProbability {
    pub class: TerrainClass,
    pub probability: f32,
}

/// 模型预测
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub class: TerrainClass,
    pub label: String,
    /// 最大概率 (0.0 - 1.0)
    pub confidence: f32,
    pub probabilities: Vec<ClassProbability>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Confident,
    Uncertain,
}

/// 完整的分类结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub prediction: Prediction,
    pub verdict: Verdict,
    pub threshold: f32,
    /// 面向用户的结论文本
    pub message: String,
    /// 可下载的结果文本，仅在预测可信时提供
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    /// 处理耗时（秒）
    pub processing_time: f32,
}

impl ClassificationResult {
    pub fn is_confident(&self) -> bool {
        self.verdict == Verdict::Confident
    }
}

/// 分类选项
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassifyOptions {
    /// 覆盖默认置信度阈值
    #[serde(default)]
    pub threshold: Option<f32>,
}

impl ClassifyOptions {
    pub fn effective_threshold(&self, default: f32) -> f32 {
        self.threshold.unwrap_or(default)
    }
}

/// 分类处理阶段
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClassifyStage {
    Decoding,
    Preprocessing,
    Inference,
    Thresholding,
    Completed,
}

/// 分类处理状态
#[derive(Debug, Clone)]
pub struct ClassifyStatus {
    pub stage: ClassifyStage,
    /// 进度 (0.0 - 1.0)
    pub progress: f32,
    pub message: String,
}

impl ClassifyStatus {
    pub fn new(stage: ClassifyStage, progress: f32, message: &str) -> Self {
        Self {
            stage,
            progress,
            message: message.to_string(),
        }
    }
}
