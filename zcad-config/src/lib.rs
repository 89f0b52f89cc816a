use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub import: ImportConfig,
}

impl AppConfig {
    /// 从显式路径加载配置，并校验取值范围。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AppConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.import.validate()?;
        Ok(config)
    }

    /// 自动发现配置文件：优先读取环境变量 `ZCAD_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os("ZCAD_CONFIG") {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 矢量流导入选项。
#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
    /// 为 false 时跳过 Gouraud 三角形（不生成渐变填充）。
    #[serde(default = "ImportConfig::default_gradient_triangles")]
    pub gradient_triangles: bool,
    /// 图纸尺寸英寸/毫米判定的相对容差。
    #[serde(default = "ImportConfig::default_paper_tolerance")]
    pub paper_tolerance: f64,
    /// 单位矩阵求逆失败后重试使用的几何容差。
    #[serde(default = "ImportConfig::default_coarse_inversion_tolerance")]
    pub coarse_inversion_tolerance: f64,
    #[serde(default = "ImportConfig::default_viewport_block_prefix")]
    pub viewport_block_prefix: String,
    /// 来源文件扩展名（不含点），仅图像宽高交换标记的例外判定使用。
    #[serde(default)]
    pub source_extension: Option<String>,
}

impl ImportConfig {
    fn default_gradient_triangles() -> bool {
        true
    }

    fn default_paper_tolerance() -> f64 {
        0.1
    }

    fn default_coarse_inversion_tolerance() -> f64 {
        1e-10
    }

    fn default_viewport_block_prefix() -> String {
        "*VP".to_string()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.paper_tolerance > 0.0 && self.paper_tolerance < 1.0) {
            return Err(ConfigError::Invalid {
                key: "import.paper_tolerance",
                message: format!("应位于 (0, 1) 区间，实际为 {}", self.paper_tolerance),
            });
        }
        if !(self.coarse_inversion_tolerance > 0.0 && self.coarse_inversion_tolerance.is_finite())
        {
            return Err(ConfigError::Invalid {
                key: "import.coarse_inversion_tolerance",
                message: format!("应为正数，实际为 {}", self.coarse_inversion_tolerance),
            });
        }
        if self.viewport_block_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                key: "import.viewport_block_prefix",
                message: "不能为空".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            gradient_triangles: Self::default_gradient_triangles(),
            paper_tolerance: Self::default_paper_tolerance(),
            coarse_inversion_tolerance: Self::default_coarse_inversion_tolerance(),
            viewport_block_prefix: Self::default_viewport_block_prefix(),
            source_extension: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
    #[error("配置项 {key} 无效: {message}")]
    Invalid { key: &'static str, message: String },
}
