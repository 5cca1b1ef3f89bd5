use crate::utils::error::ClassifierError;
use crate::Result;
use std::net::SocketAddr;
use std::path::PathBuf;

/// 默认置信度阈值，低于该值的预测视为不可靠
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.8;

/// 模型输入边长（像素）
pub const DEFAULT_INPUT_SIZE: u32 = 150;

/// 默认模型文件名
pub const DEFAULT_MODEL_FILE: &str = "terrain_classifier.onnx";

#[derive(Debug, Clone)]
pub struct Config {
    /// 服务器绑定地址
    pub bind_addr: String,

    /// 模型文件目录
    pub models_dir: PathBuf,

    /// 显式指定的模型路径（优先于 models_dir）
    pub model_path: Option<PathBuf>,

    /// 工作线程数量
    pub workers: usize,

    /// 开发模式
    pub dev_mode: bool,

    /// ONNX Runtime配置
    pub onnx_config: OnnxConfig,

    /// 服务器配置
    pub server_config: ServerConfig,

    /// 分类器配置
    pub classifier_config: ClassifierConfig,
}

#[derive(Debug, Clone)]
pub struct OnnxConfig {
    /// CPU线程数
    pub intra_threads: usize,

    /// 优化级别 (0-3)
    pub optimization_level: i32,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 请求超时时间（秒）
    pub request_timeout: u64,

    /// 最大请求体大小（字节）
    pub max_request_size: usize,

    /// 单张图片最大字节数
    pub max_image_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub confidence_threshold: f32,
    pub input_size: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            input_size: DEFAULT_INPUT_SIZE,
        }
    }
}

/// 构造配置所需的命令行参数
#[derive(Debug, Clone)]
pub struct ConfigArgs {
    pub bind_addr: String,
    pub models_dir: String,
    pub model_path: Option<String>,
    pub workers: Option<usize>,
    pub threshold: f32,
    pub input_size: u32,
    pub dev_mode: bool,
}

impl Default for ConfigArgs {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5005".to_string(),
            models_dir: "models".to_string(),
            model_path: None,
            workers: None,
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            input_size: DEFAULT_INPUT_SIZE,
            dev_mode: false,
        }
    }
}

impl Config {
    pub fn new(args: ConfigArgs) -> Result<Self> {
        let cpu_cores = num_cpus::get();
        let workers = args.workers.unwrap_or(cpu_cores).max(1);

        if !(0.0..=1.0).contains(&args.threshold) {
            return Err(ClassifierError::Config(format!(
                "Confidence threshold must be between 0.0 and 1.0, got {}",
                args.threshold
            )));
        }

        if args.input_size == 0 {
            return Err(ClassifierError::Config(
                "Input size must be greater than zero".to_string(),
            ));
        }

        args.bind_addr.parse::<SocketAddr>().map_err(|e| {
            ClassifierError::Config(format!("Invalid bind address {}: {}", args.bind_addr, e))
        })?;

        let onnx_config = OnnxConfig {
            intra_threads: (cpu_cores * 3 / 4).max(1), // 使用75%的CPU核心
            optimization_level: 3,
        };

        let server_config = ServerConfig {
            request_timeout: if args.dev_mode { 300 } else { 60 },
            max_request_size: 25 * 1024 * 1024,
            max_image_bytes: 20 * 1024 * 1024,
        };

        Ok(Self {
            bind_addr: args.bind_addr,
            models_dir: PathBuf::from(args.models_dir),
            model_path: args.model_path.map(PathBuf::from),
            workers,
            dev_mode: args.dev_mode,
            onnx_config,
            server_config,
            classifier_config: ClassifierConfig {
                confidence_threshold: args.threshold,
                input_size: args.input_size,
            },
        })
    }

    /// 获取分类模型路径
    pub fn terrain_model_path(&self) -> PathBuf {
        match &self.model_path {
            Some(path) => path.clone(),
            None => self.models_dir.join(DEFAULT_MODEL_FILE),
        }
    }
}
