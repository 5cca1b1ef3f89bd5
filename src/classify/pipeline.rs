use crate::{
    classify::{
        report, ClassProbability, ClassificationResult, ClassifyOptions, ClassifyStage,
        ClassifyStatus, Prediction, TerrainClass, Verdict,
    },
    image::{ImageLoader, ImagePreprocessor},
    models::ModelManager,
    utils::error::ClassifierError,
    Result,
};
use image::DynamicImage;
use std::path::Path;
use std::time::Instant;
use tokio::sync::mpsc;

/// 概率和允许的误差
const DISTRIBUTION_TOLERANCE: f32 = 1e-3;

/// 分类处理流水线：预处理 → 推理 → 阈值判断
pub struct ClassificationPipeline;

impl ClassificationPipeline {
    /// 处理base64图像
    pub async fn process_base64(
        manager: &ModelManager,
        base64_data: String,
        options: ClassifyOptions,
        status_tx: Option<mpsc::UnboundedSender<ClassifyStatus>>,
    ) -> Result<ClassificationResult> {
        let start_time = Instant::now();
        send_status(&status_tx, ClassifyStage::Decoding, 0.1, "Loading image from base64");

        let max_bytes = manager.config().server_config.max_image_bytes;
        let image =
            run_blocking(move || ImageLoader::from_base64(&base64_data, max_bytes)).await?;

        Self::process_image(manager, image, options, status_tx, start_time).await
    }

    /// 处理字节流图像
    pub async fn process_bytes<B>(
        manager: &ModelManager,
        bytes: B,
        options: ClassifyOptions,
        status_tx: Option<mpsc::UnboundedSender<ClassifyStatus>>,
    ) -> Result<ClassificationResult>
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        let start_time = Instant::now();
        send_status(&status_tx, ClassifyStage::Decoding, 0.1, "Loading image from upload");

        let max_bytes = manager.config().server_config.max_image_bytes;
        let image = run_blocking(move || ImageLoader::from_bytes(bytes.as_ref(), max_bytes)).await?;

        Self::process_image(manager, image, options, status_tx, start_time).await
    }

    /// 处理本地文件
    pub async fn process_path(
        manager: &ModelManager,
        path: &Path,
        options: ClassifyOptions,
    ) -> Result<ClassificationResult> {
        let start_time = Instant::now();
        let bytes = tokio::fs::read(path).await?;
        let max_bytes = manager.config().server_config.max_image_bytes;
        let image = run_blocking(move || ImageLoader::from_bytes(&bytes, max_bytes)).await?;

        Self::process_image(manager, image, options, None, start_time).await
    }

    /// 核心处理流程
    pub async fn process_image(
        manager: &ModelManager,
        image: DynamicImage,
        options: ClassifyOptions,
        status_tx: Option<mpsc::UnboundedSender<ClassifyStatus>>,
        start_time: Instant,
    ) -> Result<ClassificationResult> {
        let threshold =
            options.effective_threshold(manager.config().classifier_config.confidence_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ClassifierError::InvalidInput(format!(
                "Threshold must be between 0.0 and 1.0, got {}",
                threshold
            )));
        }

        send_status(&status_tx, ClassifyStage::Preprocessing, 0.3, "Resizing and normalizing image");
        let input_size = manager.config().classifier_config.input_size;
        let model = manager.model();

        let tx = status_tx.clone();
        let scores = run_blocking(move || {
            let input = ImagePreprocessor::to_input_tensor(&image, input_size)?;
            send_status(&tx, ClassifyStage::Inference, 0.6, "Running terrain model");
            model.predict(input)
        })
        .await?;

        send_status(&status_tx, ClassifyStage::Thresholding, 0.9, "Evaluating confidence");
        let probabilities = Self::to_distribution(scores)?;
        let prediction = Self::select(&probabilities)?;
        let verdict = Self::judge(prediction.confidence, threshold);

        let (message, report) = match verdict {
            Verdict::Confident => (
                report::confident_message(&prediction),
                Some(report::report_text(&prediction)),
            ),
            Verdict::Uncertain => (report::uncertain_message(prediction.confidence), None),
        };

        let total_time = start_time.elapsed();
        send_status(&status_tx, ClassifyStage::Completed, 1.0, &message);

        tracing::info!(
            "Classification completed: class={}, confidence={:.4}, verdict={:?}, time={:.3}s",
            prediction.class,
            prediction.confidence,
            verdict,
            total_time.as_secs_f32()
        );

        Ok(ClassificationResult {
            prediction,
            verdict,
            threshold,
            message,
            report,
            processing_time: total_time.as_secs_f32(),
        })
    }

    /// 将模型输出整理为概率分布；非分布输出视为logits并做softmax
    pub fn to_distribution(scores: Vec<f32>) -> Result<Vec<f32>> {
        if scores.len() != TerrainClass::ALL.len() {
            return Err(ClassifierError::Inference(format!(
                "Expected {} class scores, got {}",
                TerrainClass::ALL.len(),
                scores.len()
            )));
        }

        if scores.iter().any(|s| !s.is_finite()) {
            return Err(ClassifierError::Inference(format!(
                "Model produced non-finite scores: {:?}",
                scores
            )));
        }

        let sum: f32 = scores.iter().sum();
        let is_distribution =
            scores.iter().all(|s| *s >= 0.0) && (sum - 1.0).abs() <= DISTRIBUTION_TOLERANCE;

        if is_distribution {
            // 按和重新归一，使概率和严格为1
            return Ok(scores.into_iter().map(|s| s / sum).collect());
        }

        tracing::debug!("Scores do not form a distribution (sum={}), applying softmax", sum);
        Ok(softmax(&scores))
    }

    /// 取最大概率类别，平局取索引较小者
    pub fn select(probabilities: &[f32]) -> Result<Prediction> {
        let (index, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
                Some((_, best_p)) if best_p >= p => best,
                _ => Some((i, p)),
            })
            .ok_or_else(|| ClassifierError::Inference("Empty probability vector".to_string()))?;

        let class = TerrainClass::from_index(index).ok_or_else(|| {
            ClassifierError::Inference(format!("Class index {} out of range", index))
        })?;

        let probabilities = TerrainClass::ALL
            .iter()
            .zip(probabilities)
            .map(|(class, probability)| ClassProbability {
                class: *class,
                probability: *probability,
            })
            .collect();

        Ok(Prediction {
            class,
            label: class.display_label(),
            confidence: confidence.clamp(0.0, 1.0),
            probabilities,
        })
    }

    /// 低于阈值即视为不可靠
    pub fn judge(confidence: f32, threshold: f32) -> Verdict {
        if confidence < threshold {
            Verdict::Uncertain
        } else {
            Verdict::Confident
        }
    }
}

fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// 解码、预处理和推理都是CPU密集型，放到阻塞线程池执行
async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ClassifierError::Internal(format!("Blocking task failed: {}", e)))?
}

fn send_status(
    status_tx: &Option<mpsc::UnboundedSender<ClassifyStatus>>,
    stage: ClassifyStage,
    progress: f32,
    message: &str,
) {
    if let Some(tx) = status_tx {
        let _ = tx.send(ClassifyStatus::new(stage, progress, message));
    }
}
