// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/model.rs - 模型
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

use std::path::Path;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 级联流水线使用的检测器对象
pub type DynModel =
  Box<dyn Model<Input = RgbImage, Output = DetectResult, Error = ModelError> + Send + Sync>;

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("推理错误: {0}")]
  InferenceError(String),
  #[error("标签文件错误: {0}")]
  LabelError(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

/// 级联流水线关心的类别
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Label {
  Vehicle,
  Helmet,
  NoHelmet,
  LicensePlate,
  Other(String),
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn from_label_name(name: &str) -> Self;
}

impl WithLabel for Label {
  fn to_label_str(&self) -> String {
    match self {
      Label::Vehicle => "vehicle".to_string(),
      Label::Helmet => "helmet".to_string(),
      Label::NoHelmet => "no-helmet".to_string(),
      Label::LicensePlate => "license-plate".to_string(),
      Label::Other(name) => name.clone(),
    }
  }

  fn from_label_name(name: &str) -> Self {
    let normalized: String = name
      .trim()
      .to_lowercase()
      .chars()
      .map(|c| if c == '_' || c == ' ' { '-' } else { c })
      .collect();

    match normalized.as_str() {
      "vehicle" | "bike" | "motorbike" | "motorcycle" | "motor" => Label::Vehicle,
      "helmet" | "with-helmet" => Label::Helmet,
      "no-helmet" | "nohelmet" | "without-helmet" => Label::NoHelmet,
      "license-plate" | "licence-plate" | "plate" | "number-plate" | "license" => {
        Label::LicensePlate
      }
      _ => Label::Other(name.trim().to_string()),
    }
  }
}

impl Label {
  /// 是否属于头盔类（需要在车辆 ROI 内标注）
  pub fn is_helmet_class(&self) -> bool {
    matches!(self, Label::Helmet | Label::NoHelmet)
  }
}

impl std::fmt::Display for Label {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.to_label_str())
  }
}

#[derive(Debug, Clone)]
pub struct DetectItem {
  pub kind: Label,
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，输入图像的像素坐标
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 类别名称表，类别 id 即下标
///
/// ```toml
/// names = ["bike", "helmet", "No-helmet"]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct LabelSet {
  pub names: Vec<String>,
}

impl LabelSet {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
      .map_err(|e| ModelError::LabelError(format!("{}: {}", path.display(), e)))?;
    Self::parse(&text).map_err(|e| ModelError::LabelError(format!("{}: {}", path.display(), e)))
  }

  pub fn parse(text: &str) -> Result<Self, ModelError> {
    let set: LabelSet = toml::from_str(text).map_err(|e| ModelError::LabelError(e.to_string()))?;
    if set.names.is_empty() {
      return Err(ModelError::LabelError("类别列表为空".to_string()));
    }
    Ok(set)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn label(&self, class_id: u32) -> Label {
    match self.names.get(class_id as usize) {
      Some(name) => Label::from_label_name(name),
      None => Label::Other(format!("class-{}", class_id)),
    }
  }
}

mod service;
mod yolo_onnx;
pub use self::service::DetectorService;
pub use self::yolo_onnx::{YoloOnnx, YoloOnnxBuilder};
