// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/model/service.rs - 检测器服务
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
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl,
  model::{DetectResult, DynModel, ModelError, YoloOnnxBuilder},
};

/// 主检测器（车辆 + 头盔）与副检测器（车牌）
///
/// 进程启动时加载一次，之后只读，可以通过 `Arc` 在并发任务间共享。
pub struct DetectorService {
  primary: DynModel,
  secondary: DynModel,
}

impl DetectorService {
  pub fn new(primary: DynModel, secondary: DynModel) -> Self {
    Self { primary, secondary }
  }

  /// 从两个 `onnx://` 地址加载模型，任何一个失败都视为启动失败
  pub fn load(primary: &Url, secondary: &Url) -> Result<Self, ModelError> {
    info!("加载主检测模型: {}", primary);
    let primary = YoloOnnxBuilder::from_url(primary)?.build()?;
    info!("加载车牌检测模型: {}", secondary);
    let secondary = YoloOnnxBuilder::from_url(secondary)?.build()?;
    Ok(Self::new(Box::new(primary), Box::new(secondary)))
  }

  pub fn detect_primary(&self, image: &RgbImage) -> Result<DetectResult, ModelError> {
    Self::detect(&self.primary, image)
  }

  pub fn detect_secondary(&self, image: &RgbImage) -> Result<DetectResult, ModelError> {
    Self::detect(&self.secondary, image)
  }

  fn detect(model: &DynModel, image: &RgbImage) -> Result<DetectResult, ModelError> {
    if image.width() == 0 || image.height() == 0 {
      debug!("空图像区域, 跳过推理");
      return Ok(DetectResult::default());
    }
    model.infer(image)
  }
}

impl Drop for DetectorService {
  fn drop(&mut self) {
    info!("释放检测模型");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Model;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  struct Counting(Arc<AtomicUsize>);

  impl Model for Counting {
    type Input = RgbImage;
    type Output = DetectResult;
    type Error = ModelError;

    fn infer(&self, _input: &RgbImage) -> Result<DetectResult, ModelError> {
      self.0.fetch_add(1, Ordering::SeqCst);
      Ok(DetectResult::default())
    }
  }

  #[test]
  fn degenerate_images_never_reach_the_model() {
    let calls = Arc::new(AtomicUsize::new(0));
    let service = DetectorService::new(
      Box::new(Counting(calls.clone())),
      Box::new(Counting(calls.clone())),
    );

    let result = service.detect_primary(&RgbImage::new(0, 12)).unwrap();
    assert!(result.is_empty());
    let result = service.detect_secondary(&RgbImage::new(12, 0)).unwrap();
    assert!(result.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    service.detect_primary(&RgbImage::new(4, 4)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
