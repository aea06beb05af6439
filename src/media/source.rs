//! # 数据源与中间模型
//!
//! ## 设计思路
//!
//! 将“外部输入类型”和“流水线中间结果”解耦：
//! - `FileChunk` / `FileChunkList` 表示分块上传的外部输入
//! - `DecodedBitmap` 表示已解码、由单次请求独占的像素网格
//! - `PreviewSpec` / `PreviewResult` 表示预览阶梯的目标与产物
//! - `Quadrilateral` / `ProjectedImage` 表示透视校正的输入与输出

use bytes::Bytes;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 已解码的位图，由处理它的请求独占。
#[derive(Debug, Clone)]
pub struct DecodedBitmap {
    image: DynamicImage,
}

impl DecodedBitmap {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }
}

impl From<DynamicImage> for DecodedBitmap {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}

/// 预览编码方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewEncoding {
    /// 有损 JPEG，质量取自配置。
    Jpeg,
    /// 无损 PNG，用于保留原图。
    Png,
}

impl PreviewEncoding {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }
}

/// 预览阶梯中的一个目标。
///
/// `target_height` 为 `None` 表示不缩放（原尺寸直通）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewSpec {
    pub name: String,
    pub target_height: Option<u32>,
    pub encoding: PreviewEncoding,
}

impl PreviewSpec {
    pub fn lossy(name: &str, target_height: Option<u32>) -> Self {
        Self {
            name: name.to_string(),
            target_height,
            encoding: PreviewEncoding::Jpeg,
        }
    }

    pub fn lossless(name: &str) -> Self {
        Self {
            name: name.to_string(),
            target_height: None,
            encoding: PreviewEncoding::Png,
        }
    }

    /// 有损预览阶梯：small / medium / large / raw。
    pub fn lossy_ladder() -> Vec<PreviewSpec> {
        vec![
            Self::lossy("small", Some(375)),
            Self::lossy("medium", Some(768)),
            Self::lossy("large", Some(1080)),
            Self::lossy("raw", None),
        ]
    }

    /// 完整预览阶梯：有损四档 + 无损 original。
    pub fn ladder() -> Vec<PreviewSpec> {
        let mut ladder = Self::lossy_ladder();
        ladder.push(Self::lossless("original"));
        ladder
    }

    /// 由稳定对象 id 与预览名确定性地计算存储路径（全部小写）。
    ///
    /// 编辑后重新生成时写到同一路径，实现原地覆盖。
    pub fn destination_path(&self, object_id: &str) -> String {
        let path = match self.encoding {
            PreviewEncoding::Jpeg => format!(
                "files/{id}/preview-{name}-{id}.{ext}",
                id = object_id,
                name = self.name,
                ext = self.encoding.extension()
            ),
            PreviewEncoding::Png => format!(
                "files/{id}/{name}-{id}.{ext}",
                id = object_id,
                name = self.name,
                ext = self.encoding.extension()
            ),
        };
        path.to_lowercase()
    }
}

/// 单个预览的生成结果，写入一次后交给存储协作者。
#[derive(Debug, Clone)]
pub struct PreviewResult {
    pub name: String,
    pub bytes: Bytes,
    pub width: u32,
    pub height: u32,
    pub path: String,
}

/// 源图像素坐标系中的二维点。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// 调用方标注的四边形角点，除有限性外不做顺序校验。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quadrilateral {
    pub top_left: Point,
    pub top_right: Point,
    pub bottom_right: Point,
    pub bottom_left: Point,
}

impl Quadrilateral {
    pub fn new(top_left: Point, top_right: Point, bottom_right: Point, bottom_left: Point) -> Self {
        Self {
            top_left,
            top_right,
            bottom_right,
            bottom_left,
        }
    }

    /// 按 左上、右上、右下、左下 顺序返回角点。
    pub fn corners(&self) -> [Point; 4] {
        [self.top_left, self.top_right, self.bottom_right, self.bottom_left]
    }
}

/// 透视校正后的位图，通道布局与源图一致。
#[derive(Debug, Clone)]
pub struct ProjectedImage {
    pub bitmap: DecodedBitmap,
    pub width: u32,
    pub height: u32,
}

/// 透视校正的编码产物。
#[derive(Debug, Clone)]
pub struct ProjectionOutput {
    pub bytes: Bytes,
    pub width: u32,
    pub height: u32,
}

/// 8 位 RGB 颜色。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RgbColor {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// `#RRGGBB`，大写十六进制。
    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// 单个上传块。
#[derive(Debug, Clone)]
pub struct FileChunk {
    pub file_id: Uuid,
    pub block_id: String,
    pub name: String,
    pub parent_id: String,
    pub data: Bytes,
}

/// 完成上传时提交的块清单，`block_ids` 即客户端切块的原始顺序。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChunkList {
    pub file_id: Uuid,
    pub name: String,
    pub parent_id: String,
    #[serde(default)]
    pub description: String,
    pub block_ids: Vec<String>,
}

/// 直接摄取原始字节时附带的描述信息。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestRequest {
    pub parent_id: String,
    #[serde(default)]
    pub description: String,
}
