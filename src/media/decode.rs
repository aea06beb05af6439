//! # 解码模块
//!
//! ## 设计思路
//!
//! 将“字节 → 位图”的过程集中管理，并在关键节点增加资源上限控制。
//! 优先做签名与尺寸检查，再进行完整解码，降低恶意输入触发高内存开销的风险。
//!
//! ## 实现思路
//!
//! 1. 体积上限 + 文件签名（magic bytes）校验
//! 2. 猜测格式并读取 header 尺寸
//! 3. 按像素 / 内存上限快速拒绝
//! 4. 完整解码
//! 5. 按 EXIF 方向自动旋转（可配置）

use std::io::Cursor;

use image::{DynamicImage, ImageDecoder, ImageReader};

use super::source::DecodedBitmap;
use super::{MediaConfig, MediaError};

/// 将任意常见栅格格式（JPEG/PNG/...）的字节解码为位图。
pub fn decode_image(bytes: &[u8], config: &MediaConfig) -> Result<DecodedBitmap, MediaError> {
    validate_input_size(bytes, config)?;
    validate_image_signature(bytes)?;

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| MediaError::DecodeFailure(format!("无法识别图片格式：{}", e)))?;
    let mut decoder = reader
        .into_decoder()
        .map_err(|e| MediaError::DecodeFailure(format!("无法创建解码器：{}", e)))?;

    let (header_width, header_height) = decoder.dimensions();
    validate_pixel_limits(config, header_width, header_height)?;
    validate_decoded_memory_limits(config, header_width, header_height)?;

    let orientation = if config.auto_orient {
        decoder.orientation().ok()
    } else {
        None
    };

    let mut image = DynamicImage::from_decoder(decoder)
        .map_err(|e| MediaError::DecodeFailure(format!("图片解码失败：{}", e)))?;

    if let Some(orientation) = orientation {
        image.apply_orientation(orientation);
    }

    if image.width() == 0 || image.height() == 0 {
        return Err(MediaError::DecodeFailure("图片尺寸为 0".to_string()));
    }

    log::debug!(
        "🖼️ 解码完成 - 尺寸: {}x{} 颜色: {:?}",
        image.width(),
        image.height(),
        image.color()
    );

    Ok(DecodedBitmap::new(image))
}

fn validate_input_size(bytes: &[u8], config: &MediaConfig) -> Result<(), MediaError> {
    if bytes.len() as u64 > config.max_upload_bytes {
        return Err(MediaError::ResourceLimit(format!(
            "图片体积过大：{:.2} MB（限制：{:.2} MB）",
            bytes.len() as f64 / 1024.0 / 1024.0,
            config.max_upload_bytes as f64 / 1024.0 / 1024.0
        )));
    }
    Ok(())
}

/// 通过文件签名（magic bytes）校验输入是否为图片。
fn validate_image_signature(bytes: &[u8]) -> Result<(), MediaError> {
    if bytes.is_empty() {
        return Err(MediaError::DecodeFailure("图片内容为空".to_string()));
    }

    let kind = infer::get(bytes)
        .ok_or_else(|| MediaError::DecodeFailure("无法识别图片类型".to_string()))?;

    if kind.matcher_type() != infer::MatcherType::Image {
        return Err(MediaError::DecodeFailure(format!(
            "文件签名不是图片类型：{}",
            kind.mime_type()
        )));
    }

    Ok(())
}

/// 校验像素数量是否超过配置上限。
pub(crate) fn validate_pixel_limits(
    config: &MediaConfig,
    width: u32,
    height: u32,
) -> Result<(), MediaError> {
    let pixels = (width as u64)
        .checked_mul(height as u64)
        .ok_or_else(|| MediaError::ResourceLimit("图片像素数溢出".to_string()))?;

    if pixels > config.max_decoded_pixels {
        return Err(MediaError::ResourceLimit(format!(
            "图片像素过大：{} 像素（限制：{} 像素）",
            pixels, config.max_decoded_pixels
        )));
    }

    Ok(())
}

fn validate_decoded_memory_limits(
    config: &MediaConfig,
    width: u32,
    height: u32,
) -> Result<(), MediaError> {
    let estimated = (width as u64)
        .checked_mul(height as u64)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or_else(|| MediaError::ResourceLimit("图片解码内存估算溢出".to_string()))?;

    if estimated > config.max_decoded_bytes {
        return Err(MediaError::ResourceLimit(format!(
            "图片解码预计内存过大：{:.2} MB（限制：{:.2} MB）",
            estimated as f64 / 1024.0 / 1024.0,
            config.max_decoded_bytes as f64 / 1024.0 / 1024.0
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgb, Rgba};

    fn create_png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgba([(x % 255) as u8, (y % 255) as u8, ((x + y) % 255) as u8, 255])
        });
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("failed to encode test image");
        cursor.into_inner()
    }

    #[test]
    fn decodes_png_and_jpeg() {
        let config = MediaConfig::default();
        let bitmap = decode_image(&create_png_bytes(64, 32), &config).expect("png decode");
        assert_eq!((bitmap.width(), bitmap.height()), (64, 32));

        let rgb = ImageBuffer::from_pixel(40, 20, Rgb([10u8, 200, 30]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(rgb)
            .write_to(&mut cursor, ImageFormat::Jpeg)
            .expect("encode jpeg");
        let bitmap = decode_image(cursor.get_ref(), &config).expect("jpeg decode");
        assert_eq!((bitmap.width(), bitmap.height()), (40, 20));
    }

    #[test]
    fn rejects_non_image_bytes() {
        let config = MediaConfig::default();
        assert!(matches!(
            decode_image(b"", &config),
            Err(MediaError::DecodeFailure(_))
        ));
        assert!(matches!(
            decode_image(b"definitely not an image, just text", &config),
            Err(MediaError::DecodeFailure(_))
        ));
    }

    #[test]
    fn rejects_truncated_png() {
        let config = MediaConfig::default();
        let png = create_png_bytes(128, 128);
        let truncated = &png[..png.len() / 2];
        assert!(matches!(
            decode_image(truncated, &config),
            Err(MediaError::DecodeFailure(_))
        ));
    }

    #[test]
    fn rejects_too_many_pixels_before_decoding() {
        let mut config = MediaConfig::default();
        config.max_decoded_pixels = 1_000;
        let result = decode_image(&create_png_bytes(100, 100), &config);
        assert!(matches!(result, Err(MediaError::ResourceLimit(_))));
    }

    #[test]
    fn rejects_oversized_upload() {
        let mut config = MediaConfig::default();
        config.max_upload_bytes = 16;
        let result = decode_image(&create_png_bytes(10, 10), &config);
        assert!(matches!(result, Err(MediaError::ResourceLimit(_))));
    }
}
