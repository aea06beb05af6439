//! # 主色调计算模块
//!
//! ## 设计思路
//!
//! 基于色相直方图求“主色相”，再以满饱和、满明度重建颜色：
//! 1. 逐像素 RGB → HLS，饱和度与亮度都严格大于阈值时计入四舍五入后的色相桶
//! 2. 对 361 个桶做环形滑动平均（色相按 360 取模回绕）
//! 3. 取平滑后计数最大的桶（按色相升序，首个最大值胜出）
//! 4. HSV(hue, 1, 1) → RGB
//!
//! 直方图随每次调用创建、用完即弃，不存在跨位图共享的可变状态。
//!
//! ## 已知行为
//!
//! 没有任何像素达到阈值时直方图全为 0，主色相落在 0 号桶，结果是确定的纯红色。
//! 这是保留下来的既有行为，调用方需自行判断是否有意义。

use image::DynamicImage;

use super::MediaError;
use super::source::{DecodedBitmap, RgbColor};

/// 色相桶数量：0..=360。
pub const HUE_BUCKETS: usize = 361;

/// 平滑半径上限（度）。
pub const MAX_SMOOTHING_RADIUS: u32 = 360;

/// 色相直方图，键为取整后的色相（0..=360）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HueHistogram {
    buckets: Vec<u64>,
}

impl Default for HueHistogram {
    fn default() -> Self {
        Self {
            buckets: vec![0; HUE_BUCKETS],
        }
    }
}

impl HueHistogram {
    /// 由给定桶计数构造；长度必须为 361。
    pub fn from_buckets(buckets: Vec<u64>) -> Result<Self, MediaError> {
        if buckets.len() != HUE_BUCKETS {
            return Err(MediaError::InvalidArgument(format!(
                "色相直方图必须有 {} 个桶，实际 {}",
                HUE_BUCKETS,
                buckets.len()
            )));
        }
        Ok(Self { buckets })
    }

    /// 统计位图中满足阈值的像素的色相分布。
    pub fn from_bitmap(
        bitmap: &DecodedBitmap,
        saturation_threshold: f64,
        brightness_threshold: f64,
    ) -> Self {
        let mut histogram = Self::default();
        for_each_rgb(bitmap.as_image(), |r, g, b| {
            let (h, l, s) = rgb_to_hls(r, g, b);
            if s > saturation_threshold && l > brightness_threshold {
                let bucket = (h.round_ties_even() as usize).min(HUE_BUCKETS - 1);
                histogram.buckets[bucket] += 1;
            }
        });
        histogram
    }

    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    pub fn get(&self, hue: usize) -> u64 {
        self.buckets.get(hue).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.buckets.iter().sum()
    }

    /// 环形滑动平均。
    ///
    /// 窗口宽 `2 * radius + 1`，下标按 360 取模回绕：0° 与 360° 是同一色相，
    /// 因此两个桶的计数在环上合并，输出的 360 号桶与 0 号桶相同。
    /// 每个输出桶为窗口内计数之和整除窗口宽度。`radius == 0` 原样复制。
    pub fn smoothed(&self, radius: u32) -> Result<Self, MediaError> {
        if radius > MAX_SMOOTHING_RADIUS {
            return Err(MediaError::InvalidArgument(format!(
                "平滑半径必须在 0~{} 之间：{}",
                MAX_SMOOTHING_RADIUS, radius
            )));
        }
        if radius == 0 {
            return Ok(self.clone());
        }

        let circle_len = (HUE_BUCKETS - 1) as i64;
        let mut circle = self.buckets[..HUE_BUCKETS - 1].to_vec();
        circle[0] += self.buckets[HUE_BUCKETS - 1];

        let radius = radius as i64;
        let window = (2 * radius + 1) as u64;
        let mut buckets = vec![0u64; HUE_BUCKETS];
        for (hue, slot) in buckets.iter_mut().take(HUE_BUCKETS - 1).enumerate() {
            let hue = hue as i64;
            let sum: u64 = (hue - radius..=hue + radius)
                .map(|x| circle[x.rem_euclid(circle_len) as usize])
                .sum();
            *slot = sum / window;
        }
        buckets[HUE_BUCKETS - 1] = buckets[0];

        Ok(Self { buckets })
    }

    /// 计数最大的色相；并列时取色相最小者。
    pub fn dominant_hue(&self) -> u32 {
        let mut best_hue = 0usize;
        let mut best_count = 0u64;
        for (hue, &count) in self.buckets.iter().enumerate() {
            if count > best_count {
                best_hue = hue;
                best_count = count;
            }
        }
        best_hue as u32
    }
}

/// 计算位图主色调。
///
/// `smoothing_radius` 超出 0~360 时返回 `InvalidArgument`。
pub fn calculate_dominant_color(
    bitmap: &DecodedBitmap,
    saturation_threshold: f64,
    brightness_threshold: f64,
    smoothing_radius: u32,
) -> Result<RgbColor, MediaError> {
    if smoothing_radius > MAX_SMOOTHING_RADIUS {
        return Err(MediaError::InvalidArgument(format!(
            "平滑半径必须在 0~{} 之间：{}",
            MAX_SMOOTHING_RADIUS, smoothing_radius
        )));
    }

    let histogram = HueHistogram::from_bitmap(bitmap, saturation_threshold, brightness_threshold);
    if histogram.total() == 0 {
        log::warn!("⚠️ 没有像素达到主色调阈值，主色相回落为 0°");
    }

    let smoothed = histogram.smoothed(smoothing_radius)?;
    let hue = smoothed.dominant_hue();
    let color = color_from_hsv(hue as f64, 1.0, 1.0);
    log::debug!(
        "🎨 主色调 - 色相: {}° 计入像素: {} 颜色: {}",
        hue,
        histogram.total(),
        color.to_hex()
    );
    Ok(color)
}

/// 位图的平均 RGB 颜色（各通道整除像素数）。
pub fn average_color(bitmap: &DecodedBitmap) -> RgbColor {
    let (mut red, mut green, mut blue, mut count) = (0u64, 0u64, 0u64, 0u64);
    for_each_rgb(bitmap.as_image(), |r, g, b| {
        red += r as u64;
        green += g as u64;
        blue += b as u64;
        count += 1;
    });

    if count == 0 {
        return RgbColor::new(0, 0, 0);
    }
    RgbColor::new(
        (red / count) as u8,
        (green / count) as u8,
        (blue / count) as u8,
    )
}

/// RGB → (色相, 亮度, 饱和度)。
///
/// 色相取值 [0, 360)，亮度与饱和度取值 [0, 1]。灰色（max == min）的色相与饱和度为 0。
pub fn rgb_to_hls(r: u8, g: u8, b: u8) -> (f64, f64, f64) {
    let r = r as f64 / 255.0;
    let g = g as f64 / 255.0;
    let b = b as f64 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = max - min;
    let l = (max + min) / 2.0;

    if diff.abs() < 0.00001 {
        return (0.0, l, 0.0);
    }

    let s = if l <= 0.5 {
        diff / (max + min)
    } else {
        diff / (2.0 - max - min)
    };

    let r_dist = (max - r) / diff;
    let g_dist = (max - g) / diff;
    let b_dist = (max - b) / diff;

    let mut h = if r == max {
        b_dist - g_dist
    } else if g == max {
        2.0 + r_dist - b_dist
    } else {
        4.0 + g_dist - r_dist
    };
    h *= 60.0;
    if h < 0.0 {
        h += 360.0;
    }

    (h, l, s)
}

/// 标准 HSV → RGB。`hue` 以度为单位，`saturation` / `value` 取值 [0, 1]。
pub fn color_from_hsv(hue: f64, saturation: f64, value: f64) -> RgbColor {
    let sector = (hue / 60.0).floor();
    let hi = (sector as i64).rem_euclid(6);
    let f = hue / 60.0 - sector;

    let value = value * 255.0;
    let v = to_channel(value);
    let p = to_channel(value * (1.0 - saturation));
    let q = to_channel(value * (1.0 - f * saturation));
    let t = to_channel(value * (1.0 - (1.0 - f) * saturation));

    match hi {
        0 => RgbColor::new(v, t, p),
        1 => RgbColor::new(q, v, p),
        2 => RgbColor::new(p, v, t),
        3 => RgbColor::new(p, q, v),
        4 => RgbColor::new(t, p, v),
        _ => RgbColor::new(v, p, q),
    }
}

fn to_channel(value: f64) -> u8 {
    value.round_ties_even().clamp(0.0, 255.0) as u8
}

/// 逐像素访问 8 位 RGB 值；非 8 位 RGB/RGBA 布局先转换为 RGB8。
fn for_each_rgb(image: &DynamicImage, mut visit: impl FnMut(u8, u8, u8)) {
    match image {
        DynamicImage::ImageRgb8(buffer) => {
            for pixel in buffer.pixels() {
                visit(pixel[0], pixel[1], pixel[2]);
            }
        }
        DynamicImage::ImageRgba8(buffer) => {
            for pixel in buffer.pixels() {
                visit(pixel[0], pixel[1], pixel[2]);
            }
        }
        other => {
            let buffer = other.to_rgb8();
            for pixel in buffer.pixels() {
                visit(pixel[0], pixel[1], pixel[2]);
            }
        }
    }
}
