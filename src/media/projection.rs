//! # 透视校正模块
//!
//! ## 设计思路
//!
//! 把调用方标注的任意四边形“拉正”为轴对齐矩形：
//! 1. 输出宽 = 上下边长均值向上取整，输出高 = 左右边长均值向上取整
//! 2. 求四边形 → 矩形的单应矩阵（8 元线性方程组，部分主元高斯消元）
//! 3. 对每个输出像素，用逆矩阵映射回源图并做双线性采样，越界按 0 处理
//!
//! 输出沿用源图的通道布局（Luma / LumaA / RGB / RGBA，8/16 位或浮点），不做通道重排。

use image::{DynamicImage, ImageBuffer, Pixel};

use super::decode::validate_pixel_limits;
use super::preview::encode_jpeg;
use super::source::{DecodedBitmap, Point, ProjectedImage, ProjectionOutput, Quadrilateral};
use super::{MediaConfig, MediaError};

const PIVOT_EPSILON: f64 = 1e-10;
const DETERMINANT_EPSILON: f64 = 1e-12;
const SNAP_EPSILON: f64 = 1e-9;

/// 3x3 单应矩阵，行优先存储。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    m: [f64; 9],
}

impl Homography {
    /// 求把 `from` 四点依次映射到 `to` 四点的单应矩阵。
    pub fn from_correspondences(from: [Point; 4], to: [Point; 4]) -> Result<Self, MediaError> {
        let mut a = [[0.0f64; 9]; 8];
        for (i, (src, dst)) in from.iter().zip(to.iter()).enumerate() {
            let (x, y, u, v) = (src.x, src.y, dst.x, dst.y);
            a[2 * i] = [x, y, 1.0, 0.0, 0.0, 0.0, -x * u, -y * u, u];
            a[2 * i + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -x * v, -y * v, v];
        }

        let h = solve_linear_system(a)?;
        Ok(Self {
            m: [h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0],
        })
    }

    /// 伴随矩阵法求逆。
    pub fn inverse(&self) -> Result<Self, MediaError> {
        let [a, b, c, d, e, f, g, h, i] = self.m;
        let det = a * (e * i - f * h) - b * (d * i - f * g) + c * (d * h - e * g);
        if !det.is_finite() || det.abs() < DETERMINANT_EPSILON {
            return Err(MediaError::DegenerateGeometry("单应矩阵不可逆".to_string()));
        }

        let inv_det = 1.0 / det;
        Ok(Self {
            m: [
                (e * i - f * h) * inv_det,
                (c * h - b * i) * inv_det,
                (b * f - c * e) * inv_det,
                (f * g - d * i) * inv_det,
                (a * i - c * g) * inv_det,
                (c * d - a * f) * inv_det,
                (d * h - e * g) * inv_det,
                (b * g - a * h) * inv_det,
                (a * e - b * d) * inv_det,
            ],
        })
    }

    /// 映射一个点；落在无穷远处（齐次分量为 0）时返回 `None`。
    pub fn apply(&self, point: Point) -> Option<Point> {
        let [a, b, c, d, e, f, g, h, i] = self.m;
        let w = g * point.x + h * point.y + i;
        if w.abs() < f64::EPSILON {
            return None;
        }
        Some(Point::new(
            (a * point.x + b * point.y + c) / w,
            (d * point.x + e * point.y + f) / w,
        ))
    }
}

/// 部分主元高斯消元，解 8x8 增广矩阵。
fn solve_linear_system(mut a: [[f64; 9]; 8]) -> Result<[f64; 8], MediaError> {
    let scale = a
        .iter()
        .flat_map(|row| row[..8].iter())
        .fold(0.0f64, |acc, v| acc.max(v.abs()));
    let threshold = PIVOT_EPSILON * scale.max(1.0);

    for col in 0..8 {
        let mut pivot_row = col;
        for row in (col + 1)..8 {
            if a[row][col].abs() > a[pivot_row][col].abs() {
                pivot_row = row;
            }
        }
        if a[pivot_row][col].abs() < threshold {
            return Err(MediaError::DegenerateGeometry(
                "四边形退化，无法求解透视变换".to_string(),
            ));
        }
        a.swap(col, pivot_row);

        for row in (col + 1)..8 {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..9 {
                a[row][k] -= factor * a[col][k];
            }
        }
    }

    let mut x = [0.0f64; 8];
    for row in (0..8).rev() {
        let mut sum = a[row][8];
        for k in (row + 1)..8 {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }

    if x.iter().any(|v| !v.is_finite()) {
        return Err(MediaError::DegenerateGeometry("透视变换求解结果非有限值".to_string()));
    }
    Ok(x)
}

/// 计算输出尺寸：(上下边均值, 左右边均值) 向上取整。
pub fn output_dimensions(quad: &Quadrilateral) -> Result<(u32, u32), MediaError> {
    if quad
        .corners()
        .iter()
        .any(|p| !p.x.is_finite() || !p.y.is_finite())
    {
        return Err(MediaError::InvalidArgument("四边形角点必须是有限数值".to_string()));
    }

    let top = quad.top_left.distance(quad.top_right);
    let bottom = quad.bottom_left.distance(quad.bottom_right);
    let left = quad.top_left.distance(quad.bottom_left);
    let right = quad.top_right.distance(quad.bottom_right);

    let width = ((top + bottom) / 2.0).ceil();
    let height = ((left + right) / 2.0).ceil();

    if width < 1.0 || height < 1.0 {
        return Err(MediaError::DegenerateGeometry(format!(
            "校正输出尺寸过小：{}x{}",
            width, height
        )));
    }
    if width > u32::MAX as f64 || height > u32::MAX as f64 {
        return Err(MediaError::ResourceLimit(format!(
            "校正输出尺寸过大：{}x{}",
            width, height
        )));
    }

    Ok((width as u32, height as u32))
}

/// 将位图中的四边形区域校正为矩形。
pub fn project(
    bitmap: &DecodedBitmap,
    quad: &Quadrilateral,
    config: &MediaConfig,
) -> Result<ProjectedImage, MediaError> {
    let (width, height) = output_dimensions(quad)?;
    validate_pixel_limits(config, width, height)?;

    let rect = [
        Point::new(0.0, 0.0),
        Point::new(width as f64, 0.0),
        Point::new(width as f64, height as f64),
        Point::new(0.0, height as f64),
    ];
    let forward = Homography::from_correspondences(quad.corners(), rect)?;
    let inverse = forward.inverse()?;

    let image = match bitmap.as_image() {
        DynamicImage::ImageLuma8(src) => DynamicImage::ImageLuma8(warp(src, &inverse, width, height)),
        DynamicImage::ImageLumaA8(src) => {
            DynamicImage::ImageLumaA8(warp(src, &inverse, width, height))
        }
        DynamicImage::ImageRgb8(src) => DynamicImage::ImageRgb8(warp(src, &inverse, width, height)),
        DynamicImage::ImageRgba8(src) => DynamicImage::ImageRgba8(warp(src, &inverse, width, height)),
        DynamicImage::ImageLuma16(src) => {
            DynamicImage::ImageLuma16(warp(src, &inverse, width, height))
        }
        DynamicImage::ImageLumaA16(src) => {
            DynamicImage::ImageLumaA16(warp(src, &inverse, width, height))
        }
        DynamicImage::ImageRgb16(src) => DynamicImage::ImageRgb16(warp(src, &inverse, width, height)),
        DynamicImage::ImageRgba16(src) => {
            DynamicImage::ImageRgba16(warp(src, &inverse, width, height))
        }
        DynamicImage::ImageRgb32F(src) => {
            DynamicImage::ImageRgb32F(warp(src, &inverse, width, height))
        }
        DynamicImage::ImageRgba32F(src) => {
            DynamicImage::ImageRgba32F(warp(src, &inverse, width, height))
        }
        other => DynamicImage::ImageRgba8(warp(&other.to_rgba8(), &inverse, width, height)),
    };

    log::debug!(
        "📐 透视校正 - 源: {}x{} 输出: {}x{}",
        bitmap.width(),
        bitmap.height(),
        width,
        height
    );

    Ok(ProjectedImage {
        bitmap: DecodedBitmap::new(image),
        width,
        height,
    })
}

/// 校正并编码为 JPEG。
pub fn project_to_jpeg(
    bitmap: &DecodedBitmap,
    quad: &Quadrilateral,
    config: &MediaConfig,
) -> Result<ProjectionOutput, MediaError> {
    let projected = project(bitmap, quad, config)?;
    let bytes = encode_jpeg(projected.bitmap.as_image(), config.jpeg_quality)?;
    Ok(ProjectionOutput {
        bytes: bytes.into(),
        width: projected.width,
        height: projected.height,
    })
}

/// 通道值与 `f64` 之间的换算。
trait Sample: Copy {
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

impl Sample for u8 {
    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value.round().clamp(0.0, u8::MAX as f64) as u8
    }
}

impl Sample for u16 {
    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value.round().clamp(0.0, u16::MAX as f64) as u16
    }
}

impl Sample for f32 {
    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

fn snap(value: f64) -> f64 {
    let rounded = value.round();
    if (value - rounded).abs() < SNAP_EPSILON {
        rounded
    } else {
        value
    }
}

fn warp<P>(
    src: &ImageBuffer<P, Vec<P::Subpixel>>,
    inverse: &Homography,
    width: u32,
    height: u32,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel,
    P::Subpixel: Sample,
{
    let channels = P::CHANNEL_COUNT as usize;
    let (src_width, src_height) = src.dimensions();
    let mut out: ImageBuffer<P, Vec<P::Subpixel>> = ImageBuffer::new(width, height);

    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let Some(source) = inverse.apply(Point::new(x as f64, y as f64)) else {
            continue;
        };
        let sx = snap(source.x);
        let sy = snap(source.y);
        if !sx.is_finite() || !sy.is_finite() {
            continue;
        }

        let x0 = sx.floor();
        let y0 = sy.floor();
        let fx = sx - x0;
        let fy = sy - y0;

        let mut acc = [0.0f64; 4];
        let taps = [
            (x0, y0, (1.0 - fx) * (1.0 - fy)),
            (x0 + 1.0, y0, fx * (1.0 - fy)),
            (x0, y0 + 1.0, (1.0 - fx) * fy),
            (x0 + 1.0, y0 + 1.0, fx * fy),
        ];
        for (tx, ty, weight) in taps {
            if weight == 0.0
                || tx < 0.0
                || ty < 0.0
                || tx >= src_width as f64
                || ty >= src_height as f64
            {
                continue;
            }
            let texel = src.get_pixel(tx as u32, ty as u32).channels();
            for (c, value) in texel.iter().take(channels).enumerate() {
                acc[c] += weight * Sample::to_f64(*value);
            }
        }

        for (c, slot) in pixel.channels_mut().iter_mut().enumerate().take(channels) {
            *slot = <P::Subpixel as Sample>::from_f64(acc[c]);
        }
    }

    out
}
