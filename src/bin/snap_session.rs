// 该文件是 Shanan Snap （山南快照） 项目的一部分。
// src/bin/snap_session.rs - 交互式截取与检测会话
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use shanan_snap::{
  FromUrl,
  app::{App, Page},
  input::{CameraRequest, CameraWrapper},
  model::{DEFAULT_MODEL_ID, ReplayLoader, registry},
  output::{OutputWrapper, Render, annotate::Annotator},
  screen::{DEFAULT_PROMPT, DetectionConfig, ScreenEvent},
};

const HELP: &str = "\
commands:
  capture          截取当前帧并进入检测页面
  retry            重新申请摄像头
  models           列出可用模型
  model <id>       切换模型
  labels <text>    设置零样本标签（逗号分隔）
  run              开始检测
  wait             等待模型加载与检测结束
  open <path>      用本地图像替换当前图像
  save <url>       输出当前结果，例如 image:///tmp/out.png
  report           显示检测页面
  back             返回截取页面
  quit             退出";

/// Shanan Snap 交互会话参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 摄像头地址
  #[arg(long, value_name = "CAMERA", default_value = "v4l:///dev/video0")]
  pub camera: Url,
  /// 流水线地址
  #[arg(long, value_name = "PIPELINE")]
  pub pipeline: Url,
  /// 初始模型 id
  #[arg(long, value_name = "MODEL", default_value = DEFAULT_MODEL_ID)]
  pub model: String,
  /// 初始零样本标签
  #[arg(long, value_name = "LABELS", default_value = DEFAULT_PROMPT)]
  pub labels: String,
  /// 标签字体文件，默认使用内嵌的 DejaVu Sans
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,
  /// wait 命令的超时秒数
  #[arg(long, value_name = "SECONDS", default_value_t = 120)]
  pub timeout: u64,
}

type Session = App<CameraWrapper, ReplayLoader>;

fn print_events(events: Vec<ScreenEvent>) {
  for event in events {
    match event {
      ScreenEvent::ModelReady(id) => println!("模型就绪: {}", id),
      ScreenEvent::ModelFailed(e) => println!("{}", e),
      ScreenEvent::Progress(p) => println!("进度: {}%", p),
      ScreenEvent::RunCompleted { objects } => println!("检测完成: {} 个对象", objects),
      ScreenEvent::RunFailed(e) => println!("{}", e),
      ScreenEvent::StaleDiscarded => {}
    }
  }
}

fn handle(session: &mut Session, command: &str, argument: &str, timeout: Duration) -> Result<()> {
  match command {
    "capture" => session.capture()?,
    "retry" => match session.capture_screen_mut() {
      Some(screen) => screen.retry()?,
      None => warn!("不在截取页面"),
    },
    "models" => {
      for model in registry::all() {
        println!(
          "{:<18} {:<22} {:<28} speed {} accuracy {}  {}",
          model.id,
          model.display_name,
          model.task,
          model.speed(),
          model.accuracy(),
          model.description
        );
      }
    }
    "back" => session.back()?,
    "open" => session.open_image(argument)?,
    "model" | "labels" | "run" | "wait" | "save" | "report" => {
      let Some(screen) = session.detection_screen_mut() else {
        warn!("不在检测页面");
        return Ok(());
      };
      match command {
        "model" => {
          let model = screen.select_model(argument);
          println!("当前模型: {}", model.display_name);
        }
        "labels" => screen.set_prompt(argument),
        "run" => {
          screen.run()?;
        }
        "wait" => print_events(screen.wait_settled(timeout)),
        "save" => {
          let output = OutputWrapper::from_url(&Url::parse(argument)?)?;
          match (screen.image(), screen.outcome()) {
            (Some(image), Some(outcome)) => output.render_result(image, outcome)?,
            _ => warn!("没有可输出的检测结果"),
          }
        }
        _ => print!("{}", screen.report()),
      }
    }
    "help" => println!("{}", HELP),
    other => warn!("未知命令: {}", other),
  }
  Ok(())
}

fn prompt(session: &Session) -> String {
  match session.page() {
    Page::Capture(screen) => match screen.error() {
      Some(e) => format!("[capture: {}]> ", e),
      None => "[capture]> ".to_string(),
    },
    Page::Detection(screen) => format!("[{}]> ", screen.model().id),
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("摄像头: {}", args.camera);
  info!("流水线: {}", args.pipeline);

  let camera = CameraWrapper::from_url(&args.camera)?;
  let request = CameraRequest::from_url_query(&args.camera)?;
  let loader = ReplayLoader::from_url(&args.pipeline)?;
  let annotator = match &args.font {
    Some(path) => Annotator::with_font_file(path)?,
    None => Annotator::default(),
  };
  let config = DetectionConfig {
    annotator: Arc::new(annotator),
    model_id: args.model,
    prompt: args.labels,
    ..DetectionConfig::default()
  };
  let timeout = Duration::from_secs(args.timeout);

  let mut session = App::new(camera, request, loader, config);
  println!("{}", HELP);

  let stdin = io::stdin();
  let mut stdout = io::stdout();
  loop {
    if let Some(screen) = session.detection_screen_mut() {
      print_events(screen.poll());
    }
    print!("{}", prompt(&session));
    stdout.flush()?;

    let mut line = String::new();
    if stdin.lock().read_line(&mut line)? == 0 {
      break;
    }
    let line = line.trim();
    let (command, argument) = line.split_once(' ').unwrap_or((line, ""));
    if command.is_empty() {
      continue;
    }
    if command == "quit" || command == "exit" {
      break;
    }
    if let Err(e) = handle(&mut session, command, argument.trim(), timeout) {
      println!("{}", e);
    }
  }

  info!("会话结束");
  Ok(())
}
