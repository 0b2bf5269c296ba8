// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/model/yolo_onnx.rs - YOLOv8 ONNX 检测模型
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

use std::path::PathBuf;

use image::{Rgb, RgbImage, imageops};
use tracing::{debug, info};
use tract_onnx::prelude::*;
use tract_onnx::prelude::tract_ndarray::{ArrayView2, Axis, Ix2};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectItem, DetectResult, LabelSet, Model, ModelError},
};

const YOLO_DEFAULT_INPUT_SIZE: u32 = 640;
const YOLO_DEFAULT_CONF_THRESH: f32 = 0.25;
const YOLO_DEFAULT_IOU_THRESH: f32 = 0.7;
const YOLO_MAX_DETECTIONS: usize = 300;
const YOLO_PAD_VALUE: u8 = 114;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// 基于 tract 的 YOLOv8 ONNX 检测器
///
/// 输出张量为 `[1, 4 + 类别数, 锚点数]`（或转置），框为中心点格式，
/// 后处理包含置信度过滤与按类别的非极大值抑制。
pub struct YoloOnnx {
  plan: Plan,
  labels: LabelSet,
  input_size: u32,
  conf_threshold: f32,
  iou_threshold: f32,
}

pub struct YoloOnnxBuilder {
  model_path: PathBuf,
  labels_path: Option<PathBuf>,
  input_size: u32,
  conf_threshold: f32,
  iou_threshold: f32,
}

impl FromUrlWithScheme for YoloOnnxBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for YoloOnnxBuilder {
  type Error = ModelError;

  /// `onnx:///path/model.onnx?labels=/path/labels.toml&size=640&conf=0.25&iou=0.7`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案, 实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let mut builder = YoloOnnxBuilder::new(url.path());
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "labels" => builder = builder.labels(value.as_ref()),
        "size" => builder = builder.input_size(parse_query(&key, &value)?),
        "conf" => builder = builder.confidence(parse_query(&key, &value)?),
        "iou" => builder = builder.iou(parse_query(&key, &value)?),
        _ => debug!("忽略未知模型参数: {}={}", key, value),
      }
    }

    Ok(builder)
  }
}

fn parse_query<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ModelError> {
  value
    .parse()
    .map_err(|_| ModelError::ModelPathError(format!("无效的模型参数 {}={}", key, value)))
}

impl YoloOnnxBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      labels_path: None,
      input_size: YOLO_DEFAULT_INPUT_SIZE,
      conf_threshold: YOLO_DEFAULT_CONF_THRESH,
      iou_threshold: YOLO_DEFAULT_IOU_THRESH,
    }
  }

  pub fn labels(mut self, path: impl Into<PathBuf>) -> Self {
    self.labels_path = Some(path.into());
    self
  }

  pub fn input_size(mut self, size: u32) -> Self {
    self.input_size = size;
    self
  }

  pub fn confidence(mut self, threshold: f32) -> Self {
    self.conf_threshold = threshold;
    self
  }

  pub fn iou(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn build(self) -> Result<YoloOnnx, ModelError> {
    let labels_path = self.labels_path.ok_or_else(|| {
      ModelError::ModelPathError(format!(
        "模型 {} 缺少类别文件参数 labels",
        self.model_path.display()
      ))
    })?;
    let labels = LabelSet::load(&labels_path)?;

    if self.input_size == 0 || self.input_size % 32 != 0 {
      return Err(ModelError::ModelInvalid(format!(
        "输入尺寸 {} 必须是 32 的正整数倍",
        self.input_size
      )));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let size = self.input_size as usize;
    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .map_err(|e| ModelError::ModelLoadError(format!("{}: {:#}", self.model_path.display(), e)))?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
      )
      .map_err(|e| ModelError::ModelInvalid(format!("无法设置输入形状: {:#}", e)))?
      .into_optimized()
      .map_err(|e| ModelError::ModelInvalid(format!("无法优化模型: {:#}", e)))?
      .into_runnable()
      .map_err(|e| ModelError::ModelInvalid(format!("无法构建可执行模型: {:#}", e)))?;

    let model = YoloOnnx {
      plan,
      labels,
      input_size: self.input_size,
      conf_threshold: self.conf_threshold,
      iou_threshold: self.iou_threshold,
    };

    // 预热一次，同时校验输出形状与类别数一致
    let warmup = RgbImage::from_pixel(self.input_size, self.input_size, Rgb([0, 0, 0]));
    model.infer(&warmup)?;
    info!(
      "模型加载完成: {} 个类别, 输入 {}x{}",
      model.labels.len(),
      model.input_size,
      model.input_size
    );

    Ok(model)
  }
}

/// 等比缩放并居中填充的参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Letterbox {
  pub scale: f32,
  pub pad_x: f32,
  pub pad_y: f32,
  pub resized_w: u32,
  pub resized_h: u32,
}

impl Letterbox {
  pub(crate) fn fit(width: u32, height: u32, size: u32) -> Self {
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let resized_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let resized_h = ((height as f32 * scale).round() as u32).clamp(1, size);
    Self {
      scale,
      pad_x: ((size - resized_w) / 2) as f32,
      pad_y: ((size - resized_h) / 2) as f32,
      resized_w,
      resized_h,
    }
  }

  /// 模型坐标映射回原图像素坐标
  pub(crate) fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
    ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
  }
}

impl YoloOnnx {
  fn preprocess(&self, image: &RgbImage) -> (Tensor, Letterbox) {
    let size = self.input_size;
    let letterbox = Letterbox::fit(image.width(), image.height(), size);
    let resized = imageops::resize(
      image,
      letterbox.resized_w,
      letterbox.resized_h,
      imageops::FilterType::Triangle,
    );

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([YOLO_PAD_VALUE; 3]));
    imageops::replace(
      &mut canvas,
      &resized,
      letterbox.pad_x as i64,
      letterbox.pad_y as i64,
    );

    let side = size as usize;
    let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
      canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    });

    (input.into_tensor(), letterbox)
  }
}

impl Model for YoloOnnx {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    if input.width() == 0 || input.height() == 0 {
      return Ok(DetectResult::default());
    }

    let (tensor, letterbox) = self.preprocess(input);

    debug!("执行模型推理");
    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(|e| ModelError::InferenceError(format!("{:#}", e)))?;

    let output = outputs
      .first()
      .ok_or_else(|| ModelError::InferenceError("模型没有输出".to_string()))?;
    let view = output
      .to_array_view::<f32>()
      .map_err(|e| ModelError::InferenceError(format!("输出张量不是 f32: {:#}", e)))?;

    let shape = view.shape().to_vec();
    let features = 4 + self.labels.len();
    if shape.len() != 3 || shape[0] != 1 {
      return Err(ModelError::ModelInvalid(format!(
        "期望输出形状 [1, {}, N], 实际为 {:?}",
        features, shape
      )));
    }

    let batch = view.index_axis(Axis(0), 0);
    let batch = batch
      .into_dimensionality::<Ix2>()
      .map_err(|e| ModelError::InferenceError(e.to_string()))?;
    // 统一为 [锚点, 特征]
    let rows = if shape[1] == features {
      batch.reversed_axes()
    } else if shape[2] == features {
      batch
    } else {
      return Err(ModelError::ModelInvalid(format!(
        "输出特征维度与类别数 {} 不匹配: {:?}",
        self.labels.len(),
        shape
      )));
    };

    let candidates = decode_rows(
      rows,
      &self.labels,
      self.conf_threshold,
      &letterbox,
      input.width(),
      input.height(),
    );
    let candidates_len = candidates.len();
    let items = nms(candidates, self.iou_threshold, YOLO_MAX_DETECTIONS);
    debug!("候选框 {} 个, NMS 后 {} 个", candidates_len, items.len());

    Ok(items.into())
  }
}

/// 解码 `[锚点, 4 + 类别数]` 形式的预测
pub(crate) fn decode_rows(
  rows: ArrayView2<f32>,
  labels: &LabelSet,
  conf_threshold: f32,
  letterbox: &Letterbox,
  orig_w: u32,
  orig_h: u32,
) -> Vec<DetectItem> {
  let mut items = Vec::new();
  let (max_x, max_y) = (orig_w as f32, orig_h as f32);

  for row in rows.outer_iter() {
    let (class_id, score) = row.iter().skip(4).enumerate().fold(
      (0usize, f32::NEG_INFINITY),
      |(best_idx, best), (idx, &s)| if s > best { (idx, s) } else { (best_idx, best) },
    );

    if !score.is_finite() || score < conf_threshold {
      continue;
    }

    let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
    if !(cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite()) || w <= 0.0 || h <= 0.0
    {
      continue;
    }

    let (x1, y1) = letterbox.unmap(cx - w / 2.0, cy - h / 2.0);
    let (x2, y2) = letterbox.unmap(cx + w / 2.0, cy + h / 2.0);
    let bbox = [
      x1.clamp(0.0, max_x),
      y1.clamp(0.0, max_y),
      x2.clamp(0.0, max_x),
      y2.clamp(0.0, max_y),
    ];
    if bbox[2] <= bbox[0] || bbox[3] <= bbox[1] {
      continue;
    }

    items.push(DetectItem {
      kind: labels.label(class_id as u32),
      class_id: class_id as u32,
      score,
      bbox,
    });
  }

  items
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = inter_w * inter_h;
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - inter;
  if union > f32::EPSILON { inter / union } else { 0.0 }
}

/// 按类别的非极大值抑制，结果按置信度降序
pub(crate) fn nms(mut items: Vec<DetectItem>, iou_threshold: f32, max_det: usize) -> Vec<DetectItem> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut keep: Vec<DetectItem> = Vec::with_capacity(items.len().min(max_det));
  for item in items {
    if keep.len() >= max_det {
      break;
    }
    let suppressed = keep
      .iter()
      .any(|k| k.class_id == item.class_id && iou(&k.bbox, &item.bbox) > iou_threshold);
    if !suppressed {
      keep.push(item);
    }
  }
  keep
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Label;
  use tract_onnx::prelude::tract_ndarray::arr2;

  fn labels() -> LabelSet {
    LabelSet::parse(r#"names = ["bike", "helmet", "No-helmet"]"#).unwrap()
  }

  fn item(class_id: u32, score: f32, bbox: [f32; 4]) -> DetectItem {
    DetectItem {
      kind: labels().label(class_id),
      class_id,
      score,
      bbox,
    }
  }

  #[test]
  fn letterbox_keeps_aspect_ratio() {
    let lb = Letterbox::fit(1280, 640, 640);
    assert_eq!((lb.resized_w, lb.resized_h), (640, 320));
    assert_eq!((lb.pad_x, lb.pad_y), (0.0, 160.0));
    let (x, y) = lb.unmap(320.0, 320.0);
    assert!((x - 640.0).abs() < 1e-3);
    assert!((y - 320.0).abs() < 1e-3);
  }

  #[test]
  fn rows_below_threshold_are_dropped() {
    let lb = Letterbox::fit(640, 640, 640);
    let rows = arr2(&[
      [100.0, 100.0, 40.0, 40.0, 0.9, 0.05, 0.0],
      [300.0, 300.0, 20.0, 20.0, 0.1, 0.2, 0.1],
    ]);
    let items = decode_rows(rows.view(), &labels(), 0.25, &lb, 640, 640);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].kind, Label::Vehicle);
    assert_eq!(items[0].bbox, [80.0, 80.0, 120.0, 120.0]);
  }

  #[test]
  fn boxes_map_back_through_padding() {
    // 1280x640 原图，上下各填充 160 像素，缩放 0.5
    let lb = Letterbox::fit(1280, 640, 640);
    let rows = arr2(&[[320.0, 320.0, 100.0, 50.0, 0.0, 0.0, 0.8]]);
    let items = decode_rows(rows.view(), &labels(), 0.25, &lb, 1280, 640);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].kind, Label::NoHelmet);
    assert_eq!(items[0].bbox, [540.0, 270.0, 740.0, 370.0]);
  }

  #[test]
  fn nms_suppresses_same_class_overlap_only() {
    let items = vec![
      item(1, 0.6, [0.0, 0.0, 10.0, 10.0]),
      item(1, 0.9, [1.0, 1.0, 11.0, 11.0]),
      item(2, 0.8, [1.0, 1.0, 11.0, 11.0]),
      item(1, 0.5, [50.0, 50.0, 60.0, 60.0]),
    ];
    let kept = nms(items, 0.5, 300);
    let scores: Vec<f32> = kept.iter().map(|i| i.score).collect();
    assert_eq!(scores, vec![0.9, 0.8, 0.5]);
  }

  #[test]
  fn nms_respects_max_detections() {
    let items = (0..10)
      .map(|i| item(0, 0.5, [i as f32 * 20.0, 0.0, i as f32 * 20.0 + 10.0, 10.0]))
      .collect();
    assert_eq!(nms(items, 0.5, 4).len(), 4);
  }

  #[test]
  fn builder_reads_url_parameters() {
    let url = Url::parse("onnx:///models/helmet.onnx?labels=/labels/primary.toml&size=320&conf=0.4")
      .unwrap();
    let builder = YoloOnnxBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, PathBuf::from("/models/helmet.onnx"));
    assert_eq!(builder.labels_path, Some(PathBuf::from("/labels/primary.toml")));
    assert_eq!(builder.input_size, 320);
    assert_eq!(builder.conf_threshold, 0.4);
    assert_eq!(builder.iou_threshold, YOLO_DEFAULT_IOU_THRESH);
  }

  #[test]
  fn builder_rejects_other_schemes() {
    let url = Url::parse("tflite:///models/helmet.tflite").unwrap();
    assert!(matches!(
      YoloOnnxBuilder::from_url(&url),
      Err(ModelError::ModelPathError(_))
    ));
  }

  #[test]
  fn builder_methods_override_defaults() {
    let builder = YoloOnnxBuilder::new("/models/plate.onnx")
      .labels("/labels/plate.toml")
      .input_size(416)
      .confidence(0.5)
      .iou(0.45);
    assert_eq!(builder.labels_path, Some(PathBuf::from("/labels/plate.toml")));
    assert_eq!(builder.input_size, 416);
    assert_eq!(builder.conf_threshold, 0.5);
    assert_eq!(builder.iou_threshold, 0.45);
  }

  #[test]
  fn input_size_must_be_a_multiple_of_32() {
    let dir = tempfile::tempdir().unwrap();
    let labels_path = dir.path().join("labels.toml");
    std::fs::write(&labels_path, r#"names = ["License Plate"]"#).unwrap();

    let result = YoloOnnxBuilder::new(dir.path().join("missing.onnx"))
      .labels(&labels_path)
      .input_size(100)
      .build();
    assert!(matches!(result, Err(ModelError::ModelInvalid(_))));
  }

  #[test]
  fn missing_labels_fail_before_loading() {
    let result = YoloOnnxBuilder::new("/nonexistent/model.onnx").build();
    assert!(matches!(result, Err(ModelError::ModelPathError(_))));
  }
}
