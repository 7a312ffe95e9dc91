// 该文件是 Qianli （千里眼） 项目的一部分。
// src/frame.rs - NHWC 帧定义
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

use image::RgbImage;

/// 摄像头采集到的一帧 RGB 图像，按 NHWC 排列。
///
/// `index` 为采集序号，从 0 开始单调递增。
#[derive(Debug, Clone)]
pub struct RgbFrame {
  index: u64,
  image: RgbImage,
}

impl RgbFrame {
  pub fn new(index: u64, image: RgbImage) -> Self {
    Self { index, image }
  }

  pub fn index(&self) -> u64 {
    self.index
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn keeps_index_and_pixels() {
    let mut image = RgbImage::new(2, 3);
    image.put_pixel(1, 0, image::Rgb([3, 4, 5]));
    let frame = RgbFrame::new(7, image);

    assert_eq!(frame.index(), 7);
    assert_eq!(frame.width(), 2);
    assert_eq!(frame.height(), 3);
    assert_eq!(frame.image().get_pixel(1, 0).0, [3, 4, 5]);
    assert_eq!(&frame.into_image().as_raw()[3..6], &[3, 4, 5]);
  }
}
