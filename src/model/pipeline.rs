// 该文件是 Shanan Snap （山南快照） 项目的一部分。
// src/model/pipeline.rs - 流水线环境与权重定位
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

use tracing::debug;
use url::Url;

use crate::model::{ModelDescriptor, ModelLoadError};

pub const DEFAULT_REMOTE_PATH_TEMPLATE: &str = "https://huggingface.co/{model}/resolve/main/onnx";
pub const DEFAULT_CACHE_DIR: &str = ".cache";
const MODEL_PLACEHOLDER: &str = "{model}";

/// 权重名称及其解析后的位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightsLocator {
  pub name: String,
  pub url: Url,
}

/// 流水线运行环境：远程优先，禁止本地解析，缓存层对本 crate 不透明
#[derive(Debug, Clone)]
pub struct PipelineEnv {
  pub allow_remote_models: bool,
  pub allow_local_models: bool,
  pub remote_path_template: String,
  pub cache_dir: PathBuf,
}

impl Default for PipelineEnv {
  fn default() -> Self {
    Self {
      allow_remote_models: true,
      allow_local_models: false,
      remote_path_template: DEFAULT_REMOTE_PATH_TEMPLATE.to_string(),
      cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
    }
  }
}

impl PipelineEnv {
  pub fn resolve(&self, descriptor: &ModelDescriptor) -> Result<WeightsLocator, ModelLoadError> {
    let name = descriptor.weights_locator;

    let url = if self.allow_remote_models {
      let raw = self.remote_path_template.replace(MODEL_PLACEHOLDER, name);
      Url::parse(&raw).map_err(|e| ModelLoadError::new(format!("{}: {}", raw, e)))?
    } else if self.allow_local_models {
      let path = std::path::absolute(self.cache_dir.join(name))
        .map_err(|e| ModelLoadError::new(format!("{}: {}", name, e)))?;
      Url::from_file_path(&path)
        .map_err(|_| ModelLoadError::new(format!("{}: invalid local path", name)))?
    } else {
      return Err(ModelLoadError::new(format!(
        "{}: remote and local models are both disabled",
        name
      )));
    };

    debug!("权重位置: {} -> {}", name, url);
    Ok(WeightsLocator {
      name: name.to_string(),
      url,
    })
  }
}
