//! # 预览生成模块
//!
//! ## 设计思路
//!
//! 每个 `PreviewSpec` 独立生成，互不依赖，由编排层并行调度。
//! - 目标高度为空：保持源尺寸（raw / original）
//! - 目标高度不小于源高度：不放大，保持源尺寸
//! - 否则按 `target / source_height` 等比缩小
//!
//! ## 实现思路
//!
//! 缩放优先走 `fast_image_resize`（SIMD 卷积），失败时回退 `image::resize_exact`。
//! 有损预览统一重编码为 JPEG（质量取自配置），无损 original 编码为 PNG。

use std::time::Instant;

use bytes::Bytes;
use fast_image_resize as fr;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageBuffer, Rgba};

use super::config::ResizeFilter;
use super::source::{DecodedBitmap, PreviewEncoding, PreviewResult, PreviewSpec};
use super::{MediaConfig, MediaError};

/// 计算预览输出尺寸，从不放大。
pub fn preview_dimensions(source_width: u32, source_height: u32, target_height: Option<u32>) -> (u32, u32) {
    let Some(target_height) = target_height else {
        return (source_width, source_height);
    };
    if source_height == 0 {
        return (source_width, source_height);
    }

    let ratio = target_height as f64 / source_height as f64;
    if ratio >= 1.0 {
        return (source_width, source_height);
    }

    let width = ((source_width as f64 * ratio).round() as u32).max(1);
    let height = ((source_height as f64 * ratio).round() as u32).max(1);
    (width, height)
}

/// 由一张已解码位图生成单个预览。
pub fn generate_preview(
    bitmap: &DecodedBitmap,
    spec: &PreviewSpec,
    object_id: &str,
    config: &MediaConfig,
) -> Result<PreviewResult, MediaError> {
    let started = Instant::now();
    let image = bitmap.as_image();
    let (width, height) = preview_dimensions(image.width(), image.height(), spec.target_height);

    let resized;
    let output = if (width, height) == (image.width(), image.height()) {
        image
    } else {
        resized = resize_image(image, width, height, config.resize_filter);
        &resized
    };

    let bytes = match spec.encoding {
        PreviewEncoding::Jpeg => encode_jpeg(output, config.jpeg_quality)?,
        PreviewEncoding::Png => encode_png(output)?,
    };

    log::debug!(
        "🖼️ 预览 {} - {}x{} -> {}x{} {} 字节 耗时: {}ms",
        spec.name,
        image.width(),
        image.height(),
        width,
        height,
        bytes.len(),
        started.elapsed().as_millis()
    );

    Ok(PreviewResult {
        name: spec.name.clone(),
        bytes: Bytes::from(bytes),
        width,
        height,
        path: spec.destination_path(object_id),
    })
}

/// 缩放到精确尺寸；`fast_image_resize` 失败时回退到 `image` 自带实现。
pub(crate) fn resize_image(
    image: &DynamicImage,
    target_width: u32,
    target_height: u32,
    filter: ResizeFilter,
) -> DynamicImage {
    match resize_with_fast_image_resize(image, target_width, target_height, filter) {
        Ok(resized) => resized,
        Err(err) => {
            log::warn!(
                "⚠️ fast_image_resize 缩放失败，回退 image::resize_exact：{}",
                err
            );
            image.resize_exact(target_width, target_height, filter.to_image_filter())
        }
    }
}

fn resize_with_fast_image_resize(
    image: &DynamicImage,
    target_width: u32,
    target_height: u32,
    filter: ResizeFilter,
) -> Result<DynamicImage, MediaError> {
    let src = image.to_rgba8();
    let (src_width, src_height) = src.dimensions();

    let src_image =
        fr::images::Image::from_vec_u8(src_width, src_height, src.into_raw(), fr::PixelType::U8x4)
            .map_err(|e| MediaError::Encode(format!("构建源图像缓冲失败：{}", e)))?;

    let mut dst_image = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x4);

    let mut resizer = fr::Resizer::new();
    let options =
        fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(filter.to_fast_filter()));

    resizer
        .resize(&src_image, &mut dst_image, Some(&options))
        .map_err(|e| MediaError::Encode(format!("fast_image_resize 执行失败：{}", e)))?;

    let rgba = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(
        target_width,
        target_height,
        dst_image.into_vec(),
    )
    .ok_or_else(|| MediaError::Encode("fast_image_resize 输出缓冲长度异常".to_string()))?;

    Ok(DynamicImage::ImageRgba8(rgba))
}

/// 编码为 JPEG。JPEG 不支持透明通道，统一转为 RGB8。
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, MediaError> {
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    DynamicImage::ImageRgb8(image.to_rgb8())
        .write_with_encoder(encoder)
        .map_err(|e| MediaError::Encode(format!("JPEG 编码失败：{}", e)))?;
    Ok(buffer)
}

/// 编码为 PNG。浮点通道转为 16 位，其余布局原样保留。
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, MediaError> {
    let mut buffer = Vec::new();
    let encoder = PngEncoder::new(&mut buffer);
    let result = match image {
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            DynamicImage::ImageRgba16(image.to_rgba16()).write_with_encoder(encoder)
        }
        other => other.write_with_encoder(encoder),
    };
    result.map_err(|e| MediaError::Encode(format!("PNG 编码失败：{}", e)))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb};
    use proptest::prelude::*;

    fn gradient(width: u32, height: u32) -> DecodedBitmap {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128u8])
        });
        DecodedBitmap::new(DynamicImage::ImageRgb8(img))
    }

    #[test]
    fn downscales_to_target_height() {
        let bitmap = gradient(1000, 750);
        let spec = PreviewSpec::lossy("small", Some(375));
        let preview = generate_preview(&bitmap, &spec, "abc", &MediaConfig::default())
            .expect("generate preview");

        assert_eq!((preview.width, preview.height), (500, 375));
        assert_eq!(preview.path, "files/abc/preview-small-abc.jpg");

        let decoded = image::load_from_memory(&preview.bytes).expect("decode jpeg");
        assert_eq!(decoded.dimensions(), (500, 375));
    }

    #[test]
    fn never_upscales() {
        let bitmap = gradient(300, 200);
        let spec = PreviewSpec::lossy("large", Some(1080));
        let preview = generate_preview(&bitmap, &spec, "id", &MediaConfig::default())
            .expect("generate preview");
        assert_eq!((preview.width, preview.height), (300, 200));
    }

    #[test]
    fn original_is_lossless_png() {
        let bitmap = gradient(64, 48);
        let spec = PreviewSpec::lossless("original");
        let preview = generate_preview(&bitmap, &spec, "id", &MediaConfig::default())
            .expect("generate preview");
        assert_eq!(preview.path, "files/id/original-id.png");

        let decoded = image::load_from_memory(&preview.bytes).expect("decode png");
        assert_eq!(decoded.to_rgb8(), bitmap.as_image().to_rgb8());
    }

    #[test]
    fn jpeg_drops_alpha_and_png_handles_float_images() {
        let rgba = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(8, 8, Rgba([10u8, 20, 30, 0])));
        let jpeg = encode_jpeg(&rgba, 90).expect("jpeg");
        assert_eq!(image::guess_format(&jpeg).expect("format"), image::ImageFormat::Jpeg);

        let float = DynamicImage::ImageRgb32F(ImageBuffer::from_pixel(4, 4, Rgb([0.5f32, 0.25, 1.0])));
        let png = encode_png(&float).expect("png");
        assert_eq!(image::load_from_memory(&png).expect("decode").dimensions(), (4, 4));
    }

    #[test]
    fn fallback_resize_matches_requested_size() {
        let bitmap = gradient(40, 20);
        let resized = resize_image(bitmap.as_image(), 10, 5, ResizeFilter::Triangle);
        assert_eq!(resized.dimensions(), (10, 5));
    }

    proptest! {
        #[test]
        fn target_at_or_above_source_keeps_dimensions(
            width in 1u32..5000,
            height in 1u32..5000,
            extra in 0u32..5000,
        ) {
            prop_assert_eq!(preview_dimensions(width, height, Some(height + extra)), (width, height));
            prop_assert_eq!(preview_dimensions(width, height, None), (width, height));
        }

        #[test]
        fn downscale_preserves_aspect_ratio(
            width in 1u32..8000,
            height in 2u32..8000,
            target_fraction in 0.01f64..0.999,
        ) {
            let target = ((height as f64 * target_fraction) as u32).clamp(1, height - 1);
            let (w, h) = preview_dimensions(width, height, Some(target));
            prop_assert_eq!(h, target);

            let expected = (width as f64 * target as f64 / height as f64).round() as i64;
            prop_assert!((w as i64 - expected.max(1)).abs() <= 1);
        }
    }
}
