// 该文件是 Shanan Snap （山南快照） 项目的一部分。
// src/screen/detection.rs - 目标检测页面
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

//! # 检测页面
//!
//! 模型状态机为 `Idle → Loading → Ready | Error`。模型加载与推理都在后台线程执行，
//! 结果通过通道回到页面，由 [`DetectionScreen::poll`] 在页面所在线程应用。
//!
//! 推理不可取消。每个后台任务都带着发起时的模型纪元与图像代数，
//! 完成时若与当前不一致则直接丢弃，不会覆盖新模型或新图像的结果。
//! 切换模型或图像后，旧推理结束之前检测仍保持禁用。
//!
//! 后台任务中的 panic 被捕获并转换为普通的失败事件。

use std::any::Any;
use std::fmt::{self, Write as _};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  frame::CapturedImage,
  model::{
    DETECTION_THRESHOLD, DetectOptions, Detection, LabelPrompt, ModelDescriptor, ModelLoadError,
    Pipeline, PipelineEnv, PipelineError, PipelineLoader, filter_by_score, registry,
  },
  output::{
    aggregate::{AggregatedCounts, aggregate},
    annotate::Annotator,
  },
};

pub const DEFAULT_PROMPT: &str =
  "a person, a cell phone, a book, a bottle, a bag, a laptop, a watch, headphones, glasses";

// 进度里程碑，仅用于界面反馈
const PROGRESS_LABELS: u8 = 30;
const PROGRESS_INVOKE: u8 = 50;
const PROGRESS_PREDICTED: u8 = 80;
const PROGRESS_RESULTS: u8 = 95;
const PROGRESS_DONE: u8 = 100;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreconditionError {
  #[error("No image available")]
  NoImage,
  #[error("Model loading...")]
  ModelNotReady,
  #[error("Detection is already running")]
  RunInFlight,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Detection failed: {reason}")]
pub struct DetectionRunError {
  reason: String,
}

impl DetectionRunError {
  pub fn new(reason: impl Into<String>) -> Self {
    Self {
      reason: reason.into(),
    }
  }

  pub fn reason(&self) -> &str {
    &self.reason
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectionError {
  #[error(transparent)]
  Precondition(#[from] PreconditionError),
  #[error(transparent)]
  Run(#[from] DetectionRunError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelState {
  Idle,
  Loading,
  Ready,
  Error(ModelLoadError),
}

/// 页面向外报告的事件，界面据此弹出提示或刷新
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenEvent {
  ModelReady(&'static str),
  ModelFailed(ModelLoadError),
  Progress(u8),
  RunCompleted { objects: usize },
  RunFailed(DetectionRunError),
  /// 过期的后台结果被丢弃
  StaleDiscarded,
}

/// 一次成功检测的结果快照
#[derive(Debug, Clone)]
pub struct RunOutcome {
  pub model: &'static ModelDescriptor,
  pub image_uri: Url,
  pub detections: Vec<Detection>,
  /// 源图像原始尺寸的标注画布
  pub canvas: RgbImage,
}

impl RunOutcome {
  pub fn aggregate(&self) -> AggregatedCounts {
    aggregate(&self.detections)
  }
}

#[derive(Clone)]
pub struct DetectionConfig {
  pub env: PipelineEnv,
  pub annotator: Arc<Annotator>,
  pub model_id: String,
  pub prompt: String,
  pub options: DetectOptions,
}

impl Default for DetectionConfig {
  fn default() -> Self {
    Self {
      env: PipelineEnv::default(),
      annotator: Arc::new(Annotator::default()),
      model_id: registry::DEFAULT_MODEL_ID.to_string(),
      prompt: DEFAULT_PROMPT.to_string(),
      options: DetectOptions::default(),
    }
  }
}

impl fmt::Debug for DetectionConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DetectionConfig")
      .field("model_id", &self.model_id)
      .field("prompt", &self.prompt)
      .field("options", &self.options)
      .finish()
  }
}

enum Event<P> {
  Loaded {
    epoch: u64,
    result: Result<P, ModelLoadError>,
  },
  Progress {
    run: u64,
    epoch: u64,
    generation: u64,
    percent: u8,
  },
  Finished {
    run: u64,
    epoch: u64,
    generation: u64,
    result: Result<Vec<Detection>, PipelineError>,
  },
}

pub struct DetectionScreen<L: PipelineLoader> {
  loader: Arc<L>,
  env: PipelineEnv,
  annotator: Arc<Annotator>,
  options: DetectOptions,

  image: Option<CapturedImage>,
  image_generation: u64,

  model: &'static ModelDescriptor,
  model_state: ModelState,
  model_epoch: u64,
  pipeline: Option<Arc<L::Pipeline>>,

  prompt: String,
  outcome: Option<RunOutcome>,
  // 仍在运行的推理，模型或图像切换后也保留到其结束
  running: Option<u64>,
  next_run: u64,
  progress: u8,

  tx: Sender<Event<L::Pipeline>>,
  rx: Receiver<Event<L::Pipeline>>,
}

impl<L: PipelineLoader> DetectionScreen<L> {
  /// 挂载页面并开始加载配置中的模型
  pub fn mount(loader: Arc<L>, config: DetectionConfig, image: Option<CapturedImage>) -> Self {
    let (tx, rx) = mpsc::channel();
    let mut screen = Self {
      loader,
      env: config.env,
      annotator: config.annotator,
      options: config.options,
      image,
      image_generation: 0,
      model: registry::lookup(&config.model_id),
      model_state: ModelState::Idle,
      model_epoch: 0,
      pipeline: None,
      prompt: config.prompt,
      outcome: None,
      running: None,
      next_run: 0,
      progress: 0,
      tx,
      rx,
    };
    screen.start_loading();
    screen
  }

  pub fn model(&self) -> &'static ModelDescriptor {
    self.model
  }

  pub fn model_state(&self) -> &ModelState {
    &self.model_state
  }

  pub fn image(&self) -> Option<&CapturedImage> {
    self.image.as_ref()
  }

  pub fn prompt(&self) -> &str {
    &self.prompt
  }

  pub fn set_prompt(&mut self, prompt: impl Into<String>) {
    self.prompt = prompt.into();
  }

  pub fn is_running(&self) -> bool {
    self.running.is_some()
  }

  pub fn progress(&self) -> u8 {
    self.progress
  }

  /// 检测按钮是否可用
  pub fn can_run(&self) -> bool {
    self.running.is_none() && self.image.is_some() && self.model_state == ModelState::Ready
  }

  pub fn outcome(&self) -> Option<&RunOutcome> {
    self.outcome.as_ref()
  }

  pub fn detections(&self) -> &[Detection] {
    self
      .outcome
      .as_ref()
      .map(|o| o.detections.as_slice())
      .unwrap_or_default()
  }

  /// 每次调用都从当前结果重新统计
  pub fn aggregate(&self) -> AggregatedCounts {
    aggregate(self.detections())
  }

  /// 切换模型；未知 id 回退到默认模型
  pub fn select_model(&mut self, id: &str) -> &'static ModelDescriptor {
    let descriptor = registry::lookup(id);
    let unchanged = descriptor.id == self.model.id
      && matches!(self.model_state, ModelState::Loading | ModelState::Ready);
    if unchanged {
      debug!("模型未变化: {}", descriptor.id);
      return descriptor;
    }

    info!("切换模型: {} -> {}", self.model.id, descriptor.id);
    self.model = descriptor;
    self.start_loading();
    descriptor
  }

  /// 替换图像（文件输入），旧图像被释放，旧结果失效
  pub fn set_image(&mut self, image: CapturedImage) {
    if let Some(old) = self.image.replace(image) {
      old.release();
    }
    self.image_generation += 1;
    self.invalidate_results();
  }

  fn invalidate_results(&mut self) {
    self.outcome = None;
    self.progress = 0;
  }

  fn is_current(&self, epoch: u64, generation: u64) -> bool {
    epoch == self.model_epoch && generation == self.image_generation
  }

  fn start_loading(&mut self) {
    self.model_epoch += 1;
    // 旧流水线句柄在此释放，仍在运行的推理持有自己的引用
    self.pipeline = None;
    self.model_state = ModelState::Loading;
    self.invalidate_results();

    let epoch = self.model_epoch;
    let task = self.model.task;
    let tx = self.tx.clone();

    let locator = match self.env.resolve(self.model) {
      Ok(locator) => locator,
      Err(e) => {
        let _ = tx.send(Event::Loaded {
          epoch,
          result: Err(e),
        });
        return;
      }
    };

    info!("加载模型 {} ({}): {}", self.model.id, task, locator.url);
    let loader = Arc::clone(&self.loader);
    let spawned = thread::Builder::new()
      .name(format!("model-loader-{}", epoch))
      .spawn(move || {
        let load = AssertUnwindSafe(|| loader.init_pipeline(task, &locator));
        let result = panic::catch_unwind(load)
          .unwrap_or_else(|payload| Err(ModelLoadError::new(panic_reason(payload))));
        let _ = tx.send(Event::Loaded { epoch, result });
      });

    if let Err(e) = spawned {
      error!("无法启动模型加载线程: {}", e);
      self.model_state = ModelState::Error(ModelLoadError::new(e.to_string()));
    }
  }

  /// 发起一次检测，返回运行编号
  pub fn run(&mut self) -> Result<u64, DetectionError> {
    if self.running.is_some() {
      return Err(PreconditionError::RunInFlight.into());
    }
    let image = match &self.image {
      Some(image) => image.image().clone(),
      None => return Err(PreconditionError::NoImage.into()),
    };
    let pipeline = match (&self.model_state, &self.pipeline) {
      (ModelState::Ready, Some(pipeline)) => Arc::clone(pipeline),
      _ => return Err(PreconditionError::ModelNotReady.into()),
    };

    self.next_run += 1;
    let run = self.next_run;
    let epoch = self.model_epoch;
    let generation = self.image_generation;
    let zero_shot = self.model.task.accepts_labels();
    let prompt = self.prompt.clone();
    let options = self.options;
    let tx = self.tx.clone();

    info!("开始检测 #{} (模型 {})", run, self.model.id);
    let spawned = thread::Builder::new()
      .name(format!("detect-{}", run))
      .spawn(move || {
        let progress = |percent| Event::Progress {
          run,
          epoch,
          generation,
          percent,
        };
        let _ = tx.send(progress(PROGRESS_LABELS));
        let labels = zero_shot.then(|| LabelPrompt::parse(&prompt));
        let _ = tx.send(progress(PROGRESS_INVOKE));

        let now = Instant::now();
        let detect = AssertUnwindSafe(|| pipeline.detect(&image, labels.as_ref(), &options));
        let result = panic::catch_unwind(detect)
          .unwrap_or_else(|payload| Err(PipelineError::Inference(panic_reason(payload))));
        debug!("推理完成 #{}，耗时: {:.2?}", run, now.elapsed());

        let _ = tx.send(Event::Finished {
          run,
          epoch,
          generation,
          result,
        });
      });

    match spawned {
      Ok(_) => {
        self.running = Some(run);
        self.progress = 0;
        Ok(run)
      }
      Err(e) => {
        error!("无法启动检测线程: {}", e);
        Err(DetectionRunError::new(e.to_string()).into())
      }
    }
  }

  /// 应用所有已到达的后台事件，不阻塞
  pub fn poll(&mut self) -> Vec<ScreenEvent> {
    let mut events = Vec::new();
    while let Ok(event) = self.rx.try_recv() {
      self.apply(event, &mut events);
    }
    events
  }

  /// 阻塞直到模型加载和检测都结束，或超时
  pub fn wait_settled(&mut self, timeout: Duration) -> Vec<ScreenEvent> {
    let deadline = Instant::now() + timeout;
    let mut events = self.poll();
    while self.model_state == ModelState::Loading || self.running.is_some() {
      let remaining = deadline.saturating_duration_since(Instant::now());
      match self.rx.recv_timeout(remaining) {
        Ok(event) => self.apply(event, &mut events),
        Err(RecvTimeoutError::Timeout) => {
          warn!("等待超时: {:.2?}", timeout);
          break;
        }
        Err(RecvTimeoutError::Disconnected) => break,
      }
    }
    events
  }

  fn apply(&mut self, event: Event<L::Pipeline>, events: &mut Vec<ScreenEvent>) {
    match event {
      Event::Loaded { epoch, result } => {
        if epoch != self.model_epoch {
          debug!("丢弃过期的模型加载结果: 纪元 {} (当前 {})", epoch, self.model_epoch);
          events.push(ScreenEvent::StaleDiscarded);
          return;
        }
        match result {
          Ok(pipeline) => {
            info!("模型就绪: {}", self.model.id);
            self.pipeline = Some(Arc::new(pipeline));
            self.model_state = ModelState::Ready;
            events.push(ScreenEvent::ModelReady(self.model.id));
          }
          Err(e) => {
            error!("{}", e);
            self.pipeline = None;
            self.model_state = ModelState::Error(e.clone());
            events.push(ScreenEvent::ModelFailed(e));
          }
        }
      }
      Event::Progress {
        run,
        epoch,
        generation,
        percent,
      } => {
        if self.running == Some(run) && self.is_current(epoch, generation) {
          self.progress = percent;
          events.push(ScreenEvent::Progress(percent));
        }
      }
      Event::Finished {
        run,
        epoch,
        generation,
        result,
      } => {
        if self.running == Some(run) {
          self.running = None;
        }
        if !self.is_current(epoch, generation) {
          warn!("丢弃过期的检测结果 #{}", run);
          events.push(ScreenEvent::StaleDiscarded);
          return;
        }

        match result {
          Ok(raw) => self.finish_run(raw, events),
          Err(e) => {
            let e = DetectionRunError::new(e.to_string());
            error!("{}", e);
            self.progress = 0;
            events.push(ScreenEvent::RunFailed(e));
          }
        }
      }
    }
  }

  fn finish_run(&mut self, raw: Vec<Detection>, events: &mut Vec<ScreenEvent>) {
    let Some(image) = &self.image else {
      return;
    };

    self.progress = PROGRESS_PREDICTED;
    events.push(ScreenEvent::Progress(PROGRESS_PREDICTED));
    let detections = filter_by_score(raw, DETECTION_THRESHOLD);

    self.progress = PROGRESS_RESULTS;
    events.push(ScreenEvent::Progress(PROGRESS_RESULTS));
    let canvas = self.annotator.annotate(image.image(), &detections);

    let objects = detections.len();
    self.outcome = Some(RunOutcome {
      model: self.model,
      image_uri: image.uri().clone(),
      detections,
      canvas,
    });
    self.progress = PROGRESS_DONE;
    events.push(ScreenEvent::Progress(PROGRESS_DONE));
    info!("检测完成: {} 个对象", objects);
    events.push(ScreenEvent::RunCompleted { objects });
  }

  /// 页面的文本视图
  pub fn report(&self) -> String {
    let mut out = String::new();
    let model = self.model;
    let status = match &self.model_state {
      ModelState::Idle => "Idle".to_string(),
      ModelState::Loading => "Loading...".to_string(),
      ModelState::Ready => "Ready".to_string(),
      ModelState::Error(e) => e.to_string(),
    };

    let _ = writeln!(out, "Model: {} ({})", model.display_name, model.task);
    let _ = writeln!(out, "Status: {}", status);
    let _ = writeln!(out, "Speed: {}  Accuracy: {}", model.speed(), model.accuracy());
    if let Some(image) = &self.image {
      let (w, h) = image.dimensions();
      let _ = writeln!(out, "Image: {} ({}x{})", image.uri(), w, h);
    }
    if self.running.is_some() {
      let _ = writeln!(out, "Running: {}%", self.progress);
    }

    let counts = self.aggregate();
    let _ = writeln!(out, "Total Objects: {}", counts.total_objects);
    if counts.is_empty() {
      let _ = writeln!(out, "No objects detected. Select a model and press Detect.");
      return out;
    }
    let _ = writeln!(out, "Breakdown:");
    for summary in &counts.labels {
      let _ = writeln!(
        out,
        "  {:<20} {:>3}  {:.1}%",
        summary.label, summary.count, summary.avg_confidence
      );
    }
    let _ = writeln!(
      out,
      "Unique: {}  Total: {}  Model: {}",
      counts.unique_labels(),
      counts.total_objects,
      model.display_name
    );
    out
  }

  /// 离开页面，释放图像资源与流水线句柄
  pub fn unmount(mut self) {
    self.release();
  }

  fn release(&mut self) {
    if let Some(image) = self.image.take() {
      image.release();
    }
    if self.pipeline.take().is_some() {
      debug!("释放流水线句柄: {}", self.model.id);
    }
  }
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
  if let Some(reason) = payload.downcast_ref::<&str>() {
    reason.to_string()
  } else if let Some(reason) = payload.downcast_ref::<String>() {
    reason.clone()
  } else {
    "worker panicked".to_string()
  }
}

impl<L: PipelineLoader> Drop for DetectionScreen<L> {
  fn drop(&mut self) {
    self.release();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::mpsc::SyncSender;

  use crate::model::{BoundingBox, ModelTask, WeightsLocator};

  const WAIT: Duration = Duration::from_secs(5);

  fn det(label: &str, score: f32) -> Detection {
    Detection {
      label: label.to_string(),
      score,
      bbox: BoundingBox {
        xmin: 2.0,
        ymin: 2.0,
        xmax: 20.0,
        ymax: 20.0,
      },
    }
  }

  /// 按权重名称返回固定结果；可选地让推理阻塞到测试放行
  #[derive(Default)]
  struct FakeLoader {
    fail: Vec<&'static str>,
    panic_on: Vec<&'static str>,
    gate: Mutex<Option<Arc<Mutex<Receiver<()>>>>>,
    seen_labels: Arc<Mutex<Vec<Option<Vec<String>>>>>,
    inference: Arc<Concurrency>,
  }

  /// 同时进行中的推理数量及其峰值
  #[derive(Default)]
  struct Concurrency {
    active: AtomicUsize,
    peak: AtomicUsize,
  }

  struct FakePipeline {
    name: String,
    gate: Option<Arc<Mutex<Receiver<()>>>>,
    seen_labels: Arc<Mutex<Vec<Option<Vec<String>>>>>,
    inference: Arc<Concurrency>,
  }

  impl FakeLoader {
    fn gated(&self) -> SyncSender<()> {
      let (tx, rx) = mpsc::sync_channel(8);
      *self.gate.lock().unwrap() = Some(Arc::new(Mutex::new(rx)));
      tx
    }
  }

  impl PipelineLoader for FakeLoader {
    type Pipeline = FakePipeline;

    fn init_pipeline(
      &self,
      _task: ModelTask,
      locator: &WeightsLocator,
    ) -> Result<FakePipeline, ModelLoadError> {
      if self.fail.contains(&locator.name.as_str()) {
        return Err(ModelLoadError::new("weights not found"));
      }
      if self.panic_on.contains(&locator.name.as_str()) {
        panic!("corrupt weights");
      }
      Ok(FakePipeline {
        name: locator.name.clone(),
        gate: self.gate.lock().unwrap().clone(),
        seen_labels: Arc::clone(&self.seen_labels),
        inference: Arc::clone(&self.inference),
      })
    }
  }

  impl Pipeline for FakePipeline {
    fn detect(
      &self,
      _image: &RgbImage,
      labels: Option<&LabelPrompt>,
      options: &DetectOptions,
    ) -> Result<Vec<Detection>, PipelineError> {
      assert_eq!(options.topk, 50);
      self
        .seen_labels
        .lock()
        .unwrap()
        .push(labels.map(|l| l.labels().to_vec()));
      let active = self.inference.active.fetch_add(1, Ordering::SeqCst) + 1;
      self.inference.peak.fetch_max(active, Ordering::SeqCst);
      if let Some(gate) = &self.gate {
        let _ = gate.lock().unwrap().recv();
      }
      self.inference.active.fetch_sub(1, Ordering::SeqCst);
      match self.name.as_str() {
        "Xenova/detr-resnet-50-panoptic" => panic!("tensor shape mismatch"),
        "Xenova/detr-resnet-50" => Ok(vec![det("person", 0.9), det("person", 0.7)]),
        "Xenova/yolos-tiny" => Ok(vec![det("dog", 0.05), det("cup", 0.15), det("car", 0.5)]),
        "Xenova/detr-resnet-101" => Err(PipelineError::Inference("out of memory".to_string())),
        _ => Ok(vec![det("a person", 0.6)]),
      }
    }
  }

  fn image() -> CapturedImage {
    CapturedImage::from_capture(RgbImage::new(64, 48)).unwrap()
  }

  fn mount(loader: FakeLoader, image: Option<CapturedImage>) -> DetectionScreen<FakeLoader> {
    DetectionScreen::mount(Arc::new(loader), DetectionConfig::default(), image)
  }

  #[test]
  fn mount_loads_default_model() {
    let mut screen = mount(FakeLoader::default(), Some(image()));
    assert_eq!(screen.model().id, "detr-resnet");
    assert_eq!(*screen.model_state(), ModelState::Loading);
    assert!(!screen.can_run());

    let events = screen.wait_settled(WAIT);
    assert!(events.contains(&ScreenEvent::ModelReady("detr-resnet")));
    assert_eq!(*screen.model_state(), ModelState::Ready);
    assert!(screen.can_run());
  }

  #[test]
  fn two_people_aggregate() {
    let mut screen = mount(FakeLoader::default(), Some(image()));
    screen.wait_settled(WAIT);
    screen.run().unwrap();
    assert!(screen.is_running());
    assert!(!screen.can_run());

    let events = screen.wait_settled(WAIT);
    assert!(events.contains(&ScreenEvent::RunCompleted { objects: 2 }));
    assert_eq!(screen.progress(), 100);
    assert!(!screen.is_running());

    let counts = screen.aggregate();
    assert_eq!(counts.total_objects, 2);
    let person = counts.get("person").unwrap();
    assert_eq!((person.count, person.avg_confidence), (2, 80.0));

    let outcome = screen.outcome().unwrap();
    assert_eq!(outcome.canvas.dimensions(), (64, 48));
    assert_eq!(outcome.model.id, "detr-resnet");
  }

  #[test]
  fn progress_milestones_are_ordered() {
    let mut screen = mount(FakeLoader::default(), Some(image()));
    screen.wait_settled(WAIT);
    screen.run().unwrap();
    let events = screen.wait_settled(WAIT);
    let progress: Vec<u8> = events
      .iter()
      .filter_map(|e| match e {
        ScreenEvent::Progress(p) => Some(*p),
        _ => None,
      })
      .collect();
    assert_eq!(progress, vec![30, 50, 80, 95, 100]);
  }

  #[test]
  fn low_scores_are_filtered() {
    let mut screen = mount(FakeLoader::default(), Some(image()));
    screen.select_model("yolos-tiny");
    screen.wait_settled(WAIT);
    screen.run().unwrap();
    screen.wait_settled(WAIT);
    let scores: Vec<f32> = screen.detections().iter().map(|d| d.score).collect();
    assert_eq!(scores, vec![0.15, 0.5]);
  }

  #[test]
  fn labels_only_passed_to_zero_shot() {
    let loader = FakeLoader::default();
    let seen = Arc::clone(&loader.seen_labels);
    let mut screen = mount(loader, Some(image()));
    screen.wait_settled(WAIT);
    screen.run().unwrap();
    screen.wait_settled(WAIT);

    screen.select_model("owlvit-base");
    screen.set_prompt("a person,  a dog ,,bag");
    screen.wait_settled(WAIT);
    screen.run().unwrap();
    screen.wait_settled(WAIT);

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0], None);
    assert_eq!(
      seen[1],
      Some(vec![
        "a person".to_string(),
        "a dog".to_string(),
        "bag".to_string()
      ])
    );
  }

  #[test]
  fn preconditions_leave_state_untouched() {
    let mut screen = mount(FakeLoader::default(), None);
    assert_eq!(
      screen.run(),
      Err(DetectionError::Precondition(PreconditionError::NoImage))
    );

    screen.set_image(image());
    // 模型仍在加载
    assert_eq!(
      screen.run(),
      Err(DetectionError::Precondition(PreconditionError::ModelNotReady))
    );
    assert!(!screen.is_running());
    assert_eq!(
      PreconditionError::ModelNotReady.to_string(),
      "Model loading..."
    );
  }

  #[test]
  fn second_run_rejected_while_in_flight() {
    let loader = FakeLoader::default();
    let release = loader.gated();
    let mut screen = mount(loader, Some(image()));
    screen.wait_settled(WAIT);
    screen.run().unwrap();
    assert_eq!(
      screen.run(),
      Err(DetectionError::Precondition(PreconditionError::RunInFlight))
    );
    release.send(()).unwrap();
    screen.wait_settled(WAIT);
    assert!(screen.can_run());
  }

  #[test]
  fn load_failure_disables_run_until_another_model() {
    let loader = FakeLoader {
      fail: vec!["Xenova/detr-resnet-50"],
      ..FakeLoader::default()
    };
    let mut screen = mount(loader, Some(image()));
    let events = screen.wait_settled(WAIT);
    assert!(matches!(events.last(), Some(ScreenEvent::ModelFailed(_))));
    assert!(matches!(screen.model_state(), ModelState::Error(e) if e.to_string() == "Failed to load: weights not found"));
    assert_eq!(
      screen.run(),
      Err(DetectionError::Precondition(PreconditionError::ModelNotReady))
    );

    screen.select_model("yolos-tiny");
    screen.wait_settled(WAIT);
    assert!(screen.can_run());
  }

  #[test]
  fn run_failure_keeps_previous_results() {
    let mut screen = mount(FakeLoader::default(), Some(image()));
    screen.wait_settled(WAIT);
    screen.run().unwrap();
    screen.wait_settled(WAIT);
    assert_eq!(screen.detections().len(), 2);

    // 失败路径：直接注入失败的完成事件，模型与图像不变
    screen.running = Some(99);
    let (epoch, generation) = (screen.model_epoch, screen.image_generation);
    let mut events = Vec::new();
    screen.apply(
      Event::Finished {
        run: 99,
        epoch,
        generation,
        result: Err(PipelineError::Inference("boom".to_string())),
      },
      &mut events,
    );
    assert_eq!(
      events,
      vec![ScreenEvent::RunFailed(DetectionRunError::new("boom"))]
    );
    assert_eq!(screen.detections().len(), 2);
    assert!(!screen.is_running());
    assert!(screen.can_run());
  }

  #[test]
  fn pipeline_error_surfaces_as_run_failure() {
    let mut screen = mount(FakeLoader::default(), Some(image()));
    screen.select_model("fasterrcnn-resnet");
    screen.wait_settled(WAIT);
    screen.run().unwrap();
    let events = screen.wait_settled(WAIT);
    let failure = events
      .iter()
      .find_map(|e| match e {
        ScreenEvent::RunFailed(e) => Some(e.to_string()),
        _ => None,
      })
      .unwrap();
    assert_eq!(failure, "Detection failed: out of memory");
    assert!(!screen.is_running());
  }

  #[test]
  fn model_switch_discards_stale_run() {
    let loader = FakeLoader::default();
    let release = loader.gated();
    let mut screen = mount(loader, Some(image()));
    screen.wait_settled(WAIT);
    screen.run().unwrap();

    // 推理仍被阻塞时切换模型
    screen.select_model("owlvit-base");
    assert!(screen.detections().is_empty());

    release.send(()).unwrap();
    let events = screen.wait_settled(WAIT);
    assert!(events.contains(&ScreenEvent::StaleDiscarded));
    assert!(events.contains(&ScreenEvent::ModelReady("owlvit-base")));
    assert!(!events.iter().any(|e| matches!(e, ScreenEvent::RunCompleted { .. })));
    assert!(screen.outcome().is_none());

    // 新模型的检测正常写入
    screen.run().unwrap();
    release.send(()).unwrap();
    screen.wait_settled(WAIT);
    let outcome = screen.outcome().unwrap();
    assert_eq!(outcome.model.id, "owlvit-base");
    assert_eq!(outcome.detections[0].label, "a person");
  }

  fn poll_until(screen: &mut DetectionScreen<FakeLoader>, done: impl Fn(&ScreenEvent) -> bool) {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
      if screen.poll().iter().any(&done) {
        return;
      }
      thread::sleep(Duration::from_millis(5));
    }
    panic!("event did not arrive in time");
  }

  #[test]
  fn run_stays_disabled_until_superseded_inference_ends() {
    let loader = FakeLoader::default();
    let inference = Arc::clone(&loader.inference);
    let release = loader.gated();
    let mut screen = mount(loader, Some(image()));
    screen.wait_settled(WAIT);
    screen.run().unwrap();

    screen.select_model("yolos-tiny");
    poll_until(&mut screen, |e| *e == ScreenEvent::ModelReady("yolos-tiny"));
    assert_eq!(*screen.model_state(), ModelState::Ready);
    assert!(screen.is_running());
    assert!(!screen.can_run());
    assert_eq!(
      screen.run(),
      Err(DetectionError::Precondition(PreconditionError::RunInFlight))
    );

    screen.set_image(image());
    assert!(!screen.can_run());
    assert_eq!(
      screen.run(),
      Err(DetectionError::Precondition(PreconditionError::RunInFlight))
    );

    release.send(()).unwrap();
    poll_until(&mut screen, |e| *e == ScreenEvent::StaleDiscarded);
    assert!(!screen.is_running());
    assert!(screen.can_run());

    screen.run().unwrap();
    release.send(()).unwrap();
    screen.wait_settled(WAIT);
    assert_eq!(inference.peak.load(Ordering::SeqCst), 1);
    assert_eq!(screen.outcome().unwrap().model.id, "yolos-tiny");
  }

  #[test]
  fn panicking_pipeline_leaves_screen_retriable() {
    let mut screen = mount(FakeLoader::default(), Some(image()));
    screen.select_model("detr-mobilenet");
    screen.wait_settled(WAIT);
    screen.run().unwrap();
    let events = screen.wait_settled(WAIT);
    assert!(events.contains(&ScreenEvent::RunFailed(DetectionRunError::new(
      "tensor shape mismatch"
    ))));
    assert!(!screen.is_running());
    assert_eq!(screen.progress(), 0);
    assert!(screen.can_run());

    screen.select_model("detr-resnet");
    screen.wait_settled(WAIT);
    screen.run().unwrap();
    screen.wait_settled(WAIT);
    assert_eq!(screen.detections().len(), 2);
  }

  #[test]
  fn panicking_loader_reports_load_failure() {
    let loader = FakeLoader {
      panic_on: vec!["Xenova/detr-resnet-50"],
      ..FakeLoader::default()
    };
    let mut screen = mount(loader, Some(image()));
    let events = screen.wait_settled(WAIT);
    assert!(events.contains(&ScreenEvent::ModelFailed(ModelLoadError::new(
      "corrupt weights"
    ))));
    assert!(!screen.can_run());

    screen.select_model("yolos-tiny");
    screen.wait_settled(WAIT);
    assert!(screen.can_run());
  }

  #[test]
  fn new_image_invalidates_results() {
    let mut screen = mount(FakeLoader::default(), Some(image()));
    screen.wait_settled(WAIT);
    screen.run().unwrap();
    screen.wait_settled(WAIT);
    assert!(screen.outcome().is_some());

    let replacement = image();
    let uri = replacement.uri().clone();
    screen.set_image(replacement);
    assert!(screen.outcome().is_none());
    assert_eq!(screen.image().unwrap().uri(), &uri);
  }

  #[test]
  fn report_lists_breakdown() {
    let mut screen = mount(FakeLoader::default(), Some(image()));
    assert!(screen.report().contains("Status: Loading..."));
    screen.wait_settled(WAIT);
    assert!(screen.report().contains("No objects detected"));
    screen.run().unwrap();
    screen.wait_settled(WAIT);
    let report = screen.report();
    assert!(report.contains("Model: DETR ResNet-50 (object-detection)"));
    assert!(report.contains("Total Objects: 2"));
    assert!(report.contains("80.0%"));
    assert!(report.contains("Unique: 1  Total: 2  Model: DETR ResNet-50"));
  }

  #[test]
  fn unknown_model_falls_back_to_default() {
    let mut screen = mount(FakeLoader::default(), Some(image()));
    screen.select_model("yolos-tiny");
    assert_eq!(screen.select_model("missing").id, "detr-resnet");
  }
}
