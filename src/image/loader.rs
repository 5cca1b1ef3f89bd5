use crate::utils::error::ClassifierError;
use crate::Result;
use base64::Engine;
use image::{DynamicImage, GenericImageView, ImageFormat};

/// 单边最大像素数
const MAX_DIMENSION: u32 = 8192;

pub struct ImageLoader;

impl ImageLoader {
    /// 从base64字符串加载图像
    pub fn from_base64(base64_data: &str, max_bytes: usize) -> Result<DynamicImage> {
        // 移除可能的数据URL前缀 (data:image/xxx;base64,)
        let base64_clean = match base64_data.trim().strip_prefix("data:") {
            Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(rest),
            None => base64_data.trim(),
        };

        let image_bytes = base64::engine::general_purpose::STANDARD.decode(base64_clean)?;

        Self::from_bytes(&image_bytes, max_bytes)
    }

    /// 从字节流加载图像
    pub fn from_bytes(bytes: &[u8], max_bytes: usize) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(ClassifierError::InvalidInput("Empty image data".to_string()));
        }

        if bytes.len() > max_bytes {
            return Err(ClassifierError::FileTooLarge(bytes.len(), max_bytes));
        }

        let format = Self::detect_format(bytes).ok_or_else(|| {
            ClassifierError::UnsupportedFormat("unrecognized image data".to_string())
        })?;

        if !Self::is_supported_format(format) {
            return Err(ClassifierError::UnsupportedFormat(format!("{:?}", format)));
        }

        let image = image::load_from_memory_with_format(bytes, format)?;
        Self::validate_dimensions(&image)?;

        tracing::debug!(
            "Decoded {:?} image: {}x{}",
            format,
            image.width(),
            image.height()
        );

        Ok(image)
    }

    /// 检测图像格式
    pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
        image::guess_format(bytes).ok()
    }

    /// 仅支持 JPEG 和 PNG
    pub fn is_supported_format(format: ImageFormat) -> bool {
        matches!(format, ImageFormat::Png | ImageFormat::Jpeg)
    }

    /// 验证图像尺寸
    pub fn validate_dimensions(image: &DynamicImage) -> Result<()> {
        let (width, height) = image.dimensions();

        if width == 0 || height == 0 {
            return Err(ClassifierError::InvalidInput(format!(
                "Image has no pixels: {}x{}",
                width, height
            )));
        }

        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(ClassifierError::InvalidInput(format!(
                "Image too large: {}x{}, maximum {}x{}",
                width, height, MAX_DIMENSION, MAX_DIMENSION
            )));
        }

        Ok(())
    }
}
