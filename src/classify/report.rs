use crate::classify::Prediction;

/// 下载文件名
pub const REPORT_FILE_NAME: &str = "terrain_result.txt";

/// 百分比，保留两位小数
pub fn format_percentage(confidence: f32) -> String {
    format!("{:.2}%", confidence * 100.0)
}

/// 两行文本：预测标签与置信度
pub fn report_text(prediction: &Prediction) -> String {
    format!(
        "Prediction: {}\nConfidence: {}",
        prediction.label,
        format_percentage(prediction.confidence)
    )
}

pub fn confident_message(prediction: &Prediction) -> String {
    format!("Predicted Terrain: {}", prediction.label)
}

pub fn uncertain_message(confidence: f32) -> String {
    format!(
        "Model is unsure about this image.\nConfidence: {}",
        format_percentage(confidence)
    )
}
