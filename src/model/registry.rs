// 该文件是 Shanan Snap （山南快照） 项目的一部分。
// src/model/registry.rs - 模型注册表
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

use serde::Serialize;
use tracing::warn;

use crate::model::ModelTask;

pub const DEFAULT_MODEL_ID: &str = "detr-resnet";
const DEFAULT_INDEX: usize = 1;
const MAX_RATING: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
  pub id: &'static str,
  pub display_name: &'static str,
  pub task: ModelTask,
  /// 传给流水线的权重名称，由 [`crate::model::PipelineEnv`] 解析为远程地址
  pub weights_locator: &'static str,
  pub speed_rating: u8,
  pub accuracy_rating: u8,
  pub description: &'static str,
}

// 显示名称与权重并不总是一致 (detr-mobilenet, fasterrcnn-resnet)，按上游数据原样保留
static MODELS: [ModelDescriptor; 5] = [
  ModelDescriptor {
    id: "yolos-tiny",
    display_name: "YOLOS Tiny",
    task: ModelTask::ObjectDetection,
    weights_locator: "Xenova/yolos-tiny",
    speed_rating: 5,
    accuracy_rating: 4,
    description: "Real-time video",
  },
  ModelDescriptor {
    id: "detr-resnet",
    display_name: "DETR ResNet-50",
    task: ModelTask::ObjectDetection,
    weights_locator: "Xenova/detr-resnet-50",
    speed_rating: 5,
    accuracy_rating: 4,
    description: "Fast & Accurate",
  },
  ModelDescriptor {
    id: "detr-mobilenet",
    display_name: "DETR MobileNet",
    task: ModelTask::ObjectDetection,
    weights_locator: "Xenova/detr-resnet-50-panoptic",
    speed_rating: 5,
    accuracy_rating: 4,
    description: "Lightweight",
  },
  ModelDescriptor {
    id: "owlvit-base",
    display_name: "OWL-ViT Base",
    task: ModelTask::ZeroShotObjectDetection,
    weights_locator: "Xenova/owlvit-base-patch32",
    speed_rating: 4,
    accuracy_rating: 5,
    description: "Custom prompts",
  },
  ModelDescriptor {
    id: "fasterrcnn-resnet",
    display_name: "Faster R-CNN ResNet",
    task: ModelTask::ObjectDetection,
    weights_locator: "Xenova/detr-resnet-101",
    speed_rating: 4,
    accuracy_rating: 5,
    description: "Advanced detection",
  },
];

/// 按显示顺序列出所有模型
pub fn all() -> &'static [ModelDescriptor] {
  &MODELS
}

pub fn get(id: &str) -> Option<&'static ModelDescriptor> {
  MODELS.iter().find(|m| m.id == id)
}

/// 查找模型，未知 id 回退到默认模型
pub fn lookup(id: &str) -> &'static ModelDescriptor {
  get(id).unwrap_or_else(|| {
    warn!("未知模型 {}, 使用默认模型 {}", id, DEFAULT_MODEL_ID);
    default_model()
  })
}

pub fn default_model() -> &'static ModelDescriptor {
  &MODELS[DEFAULT_INDEX]
}

/// 把 1-5 的评分渲染为星号
pub fn stars(rating: u8) -> String {
  "★".repeat(rating.min(MAX_RATING) as usize)
}

impl ModelDescriptor {
  pub fn speed(&self) -> String {
    stars(self.speed_rating)
  }

  pub fn accuracy(&self) -> String {
    stars(self.accuracy_rating)
  }
}
