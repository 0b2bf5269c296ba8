// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/cascade.rs - 两级级联检测
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

//! 每帧的处理流程：
//!
//! 1. 主检测器在整帧上推理；
//! 2. 对每个车辆检测框：复制出 ROI，在 ROI 上再次运行主检测器，标注头盔 / 未戴头盔，
//!    若出现未戴头盔则在同一 ROI 上运行车牌检测器并标注车牌，最后把 ROI 写回原位置；
//! 3. 其余类别直接标注在整帧上。
//!
//! 车辆框本身不绘制。检测结果按检测器给出的顺序处理，级联不做额外的排序或抑制。

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  frame::{PixelRect, Roi},
  model::{DetectItem, DetectorService, Label, ModelError, WithLabel},
  output::draw::{Draw, color_for},
};

#[derive(Error, Debug)]
pub enum CascadeError {
  #[error("整帧检测失败: {0}")]
  PrimaryError(#[source] ModelError),
  #[error("车辆区域 {roi:?} 检测失败: {source}")]
  RoiError {
    roi: PixelRect,
    #[source]
    source: ModelError,
  },
  #[error("车辆区域 {roi:?} 车牌检测失败: {source}")]
  PlateError {
    roi: PixelRect,
    #[source]
    source: ModelError,
  },
}

impl CascadeError {
  /// 出错的阶段，写入任务报告
  pub fn stage(&self) -> &'static str {
    match self {
      CascadeError::PrimaryError(_) => "primary",
      CascadeError::RoiError { .. } => "vehicle-roi",
      CascadeError::PlateError { .. } => "plate",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnnotationScope {
  Frame,
  VehicleRoi,
}

/// 一次绘制，`rect` 为整帧坐标
#[derive(Debug, Clone, Serialize)]
pub struct Annotation {
  pub label: Label,
  pub rect: PixelRect,
  pub color: [u8; 3],
  pub scope: AnnotationScope,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlateRecord {
  pub score: f32,
  /// 车辆 ROI 内的坐标（绘制使用）
  pub local: PixelRect,
  /// 整帧坐标
  pub global: PixelRect,
  pub vehicle: PixelRect,
}

/// 单帧处理结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameReport {
  pub vehicles: usize,
  pub violations: usize,
  pub annotations: Vec<Annotation>,
  pub plates: Vec<PlateRecord>,
  pub primary_calls: usize,
  pub secondary_calls: usize,
}

pub struct Cascade<'a> {
  detectors: &'a DetectorService,
  draw: &'a Draw,
}

impl<'a> Cascade<'a> {
  pub fn new(detectors: &'a DetectorService, draw: &'a Draw) -> Self {
    Self { detectors, draw }
  }

  /// 原地处理一帧
  ///
  /// 任何一次检测失败都会中止当前帧；已写回的车辆 ROI 不会回滚。
  pub fn process_frame(&self, image: &mut RgbImage) -> Result<FrameReport, CascadeError> {
    let mut report = FrameReport::default();

    report.primary_calls += 1;
    let detections = self
      .detectors
      .detect_primary(image)
      .map_err(CascadeError::PrimaryError)?;
    debug!("整帧检测到 {} 个目标", detections.len());

    for item in detections.items.iter() {
      let rect = PixelRect::from_bbox(&item.bbox, image.width(), image.height());
      debug!("检测到 {} 于 {:?}", item.kind, rect);

      if item.kind == Label::Vehicle {
        report.vehicles += 1;
        self.process_vehicle(image, rect, &mut report)?;
      } else {
        self.annotate(image, item, rect, &mut report, AnnotationScope::Frame, None);
      }
    }

    Ok(report)
  }

  fn process_vehicle(
    &self,
    image: &mut RgbImage,
    rect: PixelRect,
    report: &mut FrameReport,
  ) -> Result<(), CascadeError> {
    let mut roi = Roi::copy_out(image, rect);
    let origin = roi.rect();

    report.primary_calls += 1;
    let sub_detections = self
      .detectors
      .detect_primary(roi.image())
      .map_err(|source| CascadeError::RoiError { roi: origin, source })?;

    let mut violation = false;
    for item in sub_detections.items.iter() {
      if !item.kind.is_helmet_class() {
        continue;
      }
      let local = PixelRect::from_bbox(&item.bbox, origin.width, origin.height);
      self.annotate(
        roi.image_mut(),
        item,
        local,
        report,
        AnnotationScope::VehicleRoi,
        Some(&origin),
      );
      violation |= item.kind == Label::NoHelmet;
    }

    if violation {
      report.violations += 1;
      info!("车辆 {:?} 存在未戴头盔的情况, 检测车牌", origin);

      report.secondary_calls += 1;
      let plates = self
        .detectors
        .detect_secondary(roi.image())
        .map_err(|source| CascadeError::PlateError { roi: origin, source })?;

      for item in plates.items.iter() {
        if item.kind != Label::LicensePlate {
          continue;
        }
        let local = PixelRect::from_bbox(&item.bbox, origin.width, origin.height);
        info!("检测到车牌 {:?}", local.translate(&origin));
        self.annotate(
          roi.image_mut(),
          item,
          local,
          report,
          AnnotationScope::VehicleRoi,
          Some(&origin),
        );
        report.plates.push(PlateRecord {
          score: item.score,
          local,
          global: local.translate(&origin),
          vehicle: origin,
        });
      }
    }

    roi.write_back(image);
    Ok(())
  }

  fn annotate(
    &self,
    image: &mut RgbImage,
    item: &DetectItem,
    rect: PixelRect,
    report: &mut FrameReport,
    scope: AnnotationScope,
    origin: Option<&PixelRect>,
  ) {
    if rect.is_empty() {
      return;
    }
    let color = color_for(&item.kind);
    self.draw.draw(image, rect, &item.kind.to_label_str(), color);
    report.annotations.push(Annotation {
      label: item.kind.clone(),
      rect: origin.map_or(rect, |origin| rect.translate(origin)),
      color,
      scope,
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{DetectResult, Model};
  use image::Rgb;

  /// 按调用次序返回固定结果
  struct Scripted(std::sync::Mutex<Vec<Vec<DetectItem>>>);

  impl Scripted {
    fn new(mut script: Vec<Vec<DetectItem>>) -> Self {
      script.reverse();
      Self(std::sync::Mutex::new(script))
    }
  }

  impl Model for Scripted {
    type Input = RgbImage;
    type Output = DetectResult;
    type Error = ModelError;

    fn infer(&self, _input: &RgbImage) -> Result<DetectResult, ModelError> {
      let next = self.0.lock().unwrap().pop().unwrap_or_default();
      Ok(next.into())
    }
  }

  fn item(kind: Label, bbox: [f32; 4]) -> DetectItem {
    DetectItem {
      kind,
      class_id: 0,
      score: 0.9,
      bbox,
    }
  }

  #[test]
  fn non_vehicle_detections_are_drawn_on_frame() {
    let primary = Scripted::new(vec![vec![
      item(Label::Helmet, [10.0, 30.0, 20.0, 40.0]),
      item(Label::Other("person".into()), [40.0, 30.0, 60.0, 50.0]),
    ]]);
    let service = DetectorService::new(Box::new(primary), Box::new(Scripted::new(vec![])));
    let draw = Draw::default();
    let mut image = RgbImage::new(80, 80);

    let report = Cascade::new(&service, &draw).process_frame(&mut image).unwrap();

    assert_eq!(report.annotations.len(), 2);
    assert_eq!(report.primary_calls, 1);
    assert_eq!(report.secondary_calls, 0);
    assert_eq!(image.get_pixel(10, 30), &Rgb(crate::output::draw::HELMET_COLOR));
    assert_eq!(image.get_pixel(40, 30), &Rgb(crate::output::draw::FALLBACK_COLOR));
    assert!(report.annotations.iter().all(|a| a.scope == AnnotationScope::Frame));
  }

  #[test]
  fn plate_is_reported_in_both_coordinate_systems() {
    let primary = Scripted::new(vec![
      vec![item(Label::Vehicle, [20.0, 10.0, 70.0, 60.0])],
      vec![item(Label::NoHelmet, [5.0, 5.0, 15.0, 15.0])],
    ]);
    let secondary = Scripted::new(vec![vec![item(Label::LicensePlate, [10.0, 30.0, 30.0, 40.0])]]);
    let service = DetectorService::new(Box::new(primary), Box::new(secondary));
    let draw = Draw::default();
    let mut image = RgbImage::new(100, 100);

    let report = Cascade::new(&service, &draw).process_frame(&mut image).unwrap();

    assert_eq!(report.plates.len(), 1);
    let plate = &report.plates[0];
    assert_eq!(plate.local, PixelRect::new(10, 30, 20, 10));
    assert_eq!(plate.global, PixelRect::new(30, 40, 20, 10));
    assert_eq!(plate.vehicle, PixelRect::new(20, 10, 50, 50));
    assert_eq!(image.get_pixel(30, 40), &Rgb(crate::output::draw::LICENSE_PLATE_COLOR));
  }

  #[test]
  fn cascade_error_carries_stage() {
    let err = CascadeError::PlateError {
      roi: PixelRect::default(),
      source: ModelError::InferenceError("boom".into()),
    };
    assert_eq!(err.stage(), "plate");
    assert_eq!(
      CascadeError::PrimaryError(ModelError::InferenceError("x".into())).stage(),
      "primary"
    );
  }
}
