// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input/pixel.rs - 摄像头像素格式转换
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::{ImageFormat, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PixelError {
  #[error("不支持的像素格式: {0}")]
  Unsupported(String),
  #[error("JPEG 解码失败: {0}")]
  Jpeg(#[from] image::ImageError),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
  Mjpg,
  Yuyv,
  Rgb3,
}

impl PixelFormat {
  /// 按优先顺序排列的可选格式
  pub const PREFERRED: [PixelFormat; 3] = [PixelFormat::Mjpg, PixelFormat::Yuyv, PixelFormat::Rgb3];

  pub fn from_fourcc(code: &[u8; 4]) -> Result<Self, PixelError> {
    match code {
      b"MJPG" => Ok(PixelFormat::Mjpg),
      b"YUYV" => Ok(PixelFormat::Yuyv),
      b"RGB3" => Ok(PixelFormat::Rgb3),
      other => Err(PixelError::Unsupported(
        String::from_utf8_lossy(other).into_owned(),
      )),
    }
  }

  pub fn fourcc(&self) -> &'static [u8; 4] {
    match self {
      PixelFormat::Mjpg => b"MJPG",
      PixelFormat::Yuyv => b"YUYV",
      PixelFormat::Rgb3 => b"RGB3",
    }
  }

  pub fn decode(&self, data: &[u8], width: u32, height: u32) -> Result<RgbImage, PixelError> {
    match self {
      PixelFormat::Mjpg => {
        let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?;
        Ok(image.to_rgb8())
      }
      PixelFormat::Yuyv => yuyv_to_rgb(data, width, height),
      PixelFormat::Rgb3 => {
        let expected = width as usize * height as usize * 3;
        if data.len() < expected {
          return Err(PixelError::BufferSizeMismatch {
            expected,
            actual: data.len(),
          });
        }
        RgbImage::from_raw(width, height, data[..expected].to_vec()).ok_or(
          PixelError::BufferSizeMismatch {
            expected,
            actual: data.len(),
          },
        )
      }
    }
  }
}

/// YUYV (YUV 4:2:2) 转 RGB，每 4 字节 `[Y0, U, Y1, V]` 描述两个像素，系数取 BT.601
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, PixelError> {
  let pixels = width as usize * height as usize;
  let expected = pixels * 2;
  if yuyv.len() < expected {
    return Err(PixelError::BufferSizeMismatch {
      expected,
      actual: yuyv.len(),
    });
  }

  let mut out = vec![0u8; pixels * 3];
  for (chunk, rgb) in yuyv[..expected]
    .chunks_exact(4)
    .zip(out.chunks_exact_mut(6))
  {
    let u = chunk[1] as f32 - 128.0;
    let v = chunk[3] as f32 - 128.0;
    rgb[..3].copy_from_slice(&yuv_pixel(chunk[0] as f32, u, v));
    rgb[3..].copy_from_slice(&yuv_pixel(chunk[2] as f32, u, v));
  }

  RgbImage::from_raw(width, height, out).ok_or(PixelError::BufferSizeMismatch {
    expected,
    actual: yuyv.len(),
  })
}

fn yuv_pixel(y: f32, u: f32, v: f32) -> [u8; 3] {
  let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
  let g = (y - 0.344136 * u - 0.714136 * v).clamp(0.0, 255.0) as u8;
  let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
  [r, g, b]
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fourcc_round_trip_and_rejects_unknown() {
    for format in PixelFormat::PREFERRED {
      assert_eq!(PixelFormat::from_fourcc(format.fourcc()).unwrap(), format);
    }
    assert!(matches!(
      PixelFormat::from_fourcc(b"NV12"),
      Err(PixelError::Unsupported(code)) if code == "NV12"
    ));
  }

  #[test]
  fn yuyv_grey_stays_grey() {
    // U = V = 128 时没有色度
    let data = [100u8, 128, 200, 128];
    let image = yuyv_to_rgb(&data, 2, 1).unwrap();
    assert_eq!(image.get_pixel(0, 0).0, [100, 100, 100]);
    assert_eq!(image.get_pixel(1, 0).0, [200, 200, 200]);
  }

  #[test]
  fn yuyv_saturates_instead_of_wrapping() {
    let data = [255u8, 255, 255, 255];
    let image = yuyv_to_rgb(&data, 2, 1).unwrap();
    let [r, _, b] = image.get_pixel(0, 0).0;
    assert_eq!(r, 255);
    assert_eq!(b, 255);
  }

  #[test]
  fn short_buffers_are_rejected() {
    assert!(matches!(
      yuyv_to_rgb(&[0u8; 6], 2, 2),
      Err(PixelError::BufferSizeMismatch {
        expected: 8,
        actual: 6
      })
    ));
    assert!(PixelFormat::Rgb3.decode(&[0u8; 5], 1, 2).is_err());
  }

  #[test]
  fn mjpg_decodes_through_image() {
    let mut jpeg = Vec::new();
    let source = RgbImage::from_pixel(8, 8, image::Rgb([10, 200, 30]));
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 95)
      .encode(source.as_raw(), 8, 8, image::ExtendedColorType::Rgb8)
      .unwrap();

    let decoded = PixelFormat::Mjpg.decode(&jpeg, 8, 8).unwrap();
    assert_eq!(decoded.dimensions(), (8, 8));
    let [r, g, b] = decoded.get_pixel(4, 4).0;
    assert!(r < 40 && g > 170 && b < 60);
  }
}
