//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `MediaConfig`，保证运行时行为可观测、可调整、可测试。
//! 配置可从 JSON 文件加载，缺省字段回落到生产默认值。
//!
//! ## 实现思路
//!
//! - `Default` 提供生产可用的默认配置（主色调参数沿用线上取值 0.5 / 0.5 / 60）。
//! - `validate` 在任何 I/O 之前拒绝越界参数。
//! - `load_from_path`：文件不存在时回退默认值，内容损坏时报错而不是静默忽略。

use std::fs;
use std::path::{Path, PathBuf};

use fast_image_resize as fr;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use super::MediaError;

/// 降采样滤镜策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl ResizeFilter {
    pub(crate) fn to_image_filter(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Gaussian => FilterType::Gaussian,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }

    pub(crate) fn to_fast_filter(self) -> fr::FilterType {
        match self {
            Self::Nearest => fr::FilterType::Box,
            Self::Triangle => fr::FilterType::Bilinear,
            Self::CatmullRom => fr::FilterType::CatmullRom,
            Self::Gaussian => fr::FilterType::Mitchell,
            Self::Lanczos3 => fr::FilterType::Lanczos3,
        }
    }
}

/// 媒体流水线配置。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// 解码后的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 解码阶段允许的预计内存上限（按 RGBA 估算，字节）。
    pub max_decoded_bytes: u64,
    /// 单个上传文件（拼接后）允许的最大体积（字节）。
    pub max_upload_bytes: u64,
    /// 有损预览的 JPEG 质量（1~100）。
    pub jpeg_quality: u8,
    /// 预览降采样滤镜。
    pub resize_filter: ResizeFilter,
    /// 主色调统计的饱和度阈值（严格大于才计入）。
    pub saturation_threshold: f64,
    /// 主色调统计的亮度阈值（严格大于才计入）。
    pub brightness_threshold: f64,
    /// 色相直方图平滑半径（度，0~360）。
    pub hue_smoothing_radius: u32,
    /// 分块上传暂存所在容器。
    pub upload_container: String,
    /// 预览图写入的容器。
    pub image_container: String,
    /// 预览生成的最大并行度。
    pub max_parallel_previews: usize,
    /// 解码后是否按 EXIF 方向自动旋转。
    pub auto_orient: bool,
    /// CLI 使用的本地对象存储根目录。
    pub storage_root: PathBuf,
    /// CLI 使用的 SQLite 数据库路径。
    pub database_path: PathBuf,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_decoded_pixels: 40_000_000,
            max_decoded_bytes: 160 * 1024 * 1024,
            max_upload_bytes: 50 * 1024 * 1024,
            jpeg_quality: 90,
            resize_filter: ResizeFilter::Lanczos3,
            saturation_threshold: 0.5,
            brightness_threshold: 0.5,
            hue_smoothing_radius: 60,
            upload_container: "image-upload".to_string(),
            image_container: "images".to_string(),
            max_parallel_previews: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            auto_orient: true,
            storage_root: PathBuf::from("gallery_storage/blobs"),
            database_path: PathBuf::from("gallery_storage/metadata.db"),
        }
    }
}

impl MediaConfig {
    /// 校验参数范围。
    pub fn validate(&self) -> Result<(), MediaError> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(MediaError::InvalidArgument(format!(
                "jpeg_quality 必须在 1~100 之间：{}",
                self.jpeg_quality
            )));
        }
        if self.hue_smoothing_radius > 360 {
            return Err(MediaError::InvalidArgument(format!(
                "hue_smoothing_radius 必须在 0~360 之间：{}",
                self.hue_smoothing_radius
            )));
        }
        if !self.saturation_threshold.is_finite() || !self.brightness_threshold.is_finite() {
            return Err(MediaError::InvalidArgument("主色调阈值必须是有限数值".to_string()));
        }
        if self.max_parallel_previews == 0 {
            return Err(MediaError::InvalidArgument("max_parallel_previews 不能为 0".to_string()));
        }
        if self.max_decoded_pixels == 0 || self.max_decoded_bytes == 0 || self.max_upload_bytes == 0 {
            return Err(MediaError::InvalidArgument("资源上限不能为 0".to_string()));
        }
        if self.upload_container.trim().is_empty() || self.image_container.trim().is_empty() {
            return Err(MediaError::InvalidArgument("容器名不能为空".to_string()));
        }
        Ok(())
    }

    /// 从 JSON 文件加载配置。
    ///
    /// 文件不存在时返回默认配置；存在但无法解析时返回错误。
    pub fn load_from_path(path: &Path) -> Result<Self, MediaError> {
        if !path.exists() {
            log::info!("配置文件不存在，使用默认配置: {}", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            MediaError::InvalidArgument(format!("读取配置文件失败 '{}': {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            MediaError::InvalidArgument(format!("解析配置文件失败 '{}': {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }
}
