use crate::utils::error::ClassifierError;
use crate::Result;
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::{Array3, Array4, Axis};

pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// 生成模型输入张量 `[1, size, size, 3]`（NHWC，取值 0..=1）
    pub fn to_input_tensor(image: &DynamicImage, size: u32) -> Result<Array4<f32>> {
        if size == 0 {
            return Err(ClassifierError::ImageProcessing(
                "Target size must be greater than zero".to_string(),
            ));
        }

        // 直接拉伸到目标尺寸，不保持宽高比
        let resized = image.resize_exact(size, size, FilterType::CatmullRom);
        let normalized = Self::normalize(&resized);

        Ok(normalized.insert_axis(Axis(0)))
    }

    /// 转换为RGB并缩放到 [0, 1]，HWC格式
    pub fn normalize(image: &DynamicImage) -> Array3<f32> {
        let rgb_image = image.to_rgb8();
        let (width, height) = rgb_image.dimensions();

        Array3::from_shape_fn((height as usize, width as usize, 3), |(h, w, c)| {
            rgb_image.get_pixel(w as u32, h as u32)[c] as f32 / 255.0
        })
    }
}
