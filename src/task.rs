// 该文件是 Qianli （千里眼） 项目的一部分。
// src/task.rs - 实时检测任务
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

use std::{
  sync::mpsc::{self, Receiver},
  thread,
  time::Duration,
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  QUIT_KEY,
  fps::FpsEstimator,
  frame::RgbFrame,
  input::FrameSource,
  model::Model,
  output::{Display, DisplayEvent, FpsOverlay, Render},
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("显示失败: {0}")]
  Display(String),
  #[error("无法设置中断信号处理: {0}")]
  SignalHandler(String),
}

/// 循环结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
  QuitKey,
  WindowClosed,
  StreamEnded,
  Interrupted,
  FrameLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
  pub frames: u64,
  pub failed_frames: u64,
  pub exit: ExitReason,
}

/// 渲染器和显示窗口
pub struct Viewer<R, D> {
  pub render: R,
  pub display: D,
}

/// 安装 Ctrl-C 处理，收到信号时向返回的通道发送一次
///
/// 30 秒内没有退出则强制结束进程。
pub fn install_interrupt_handler() -> Result<Receiver<()>, TaskError> {
  let (tx, rx) = mpsc::channel();

  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .map_err(|e| TaskError::SignalHandler(e.to_string()))?;

  Ok(rx)
}

// 每帧等待按键的时间
const KEY_WAIT: Duration = Duration::from_millis(1);

/// 逐帧读取、推理、绘制并显示，直到按下退出键、窗口关闭或视频流结束
#[derive(Debug, Default)]
pub struct LiveDetectionTask {
  max_frames: Option<u64>,
  stop: Option<Receiver<()>>,
}

impl LiveDetectionTask {
  pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
    self.max_frames = max_frames;
    self
  }

  pub fn with_stop_signal(mut self, stop: Receiver<()>) -> Self {
    self.stop = Some(stop);
    self
  }
}

// 无论以何种方式离开循环（包括 panic），都释放摄像头并关闭窗口
struct Cleanup<S: FrameSource, D: Display> {
  source: S,
  display: D,
}

impl<S: FrameSource, D: Display> Drop for Cleanup<S, D> {
  fn drop(&mut self) {
    self.source.release();
    self.display.close();
    info!("摄像头与显示窗口已释放");
  }
}

fn annotate<M, R>(model: &mut M, render: &R, frame: &RgbFrame) -> anyhow::Result<RgbImage>
where
  M: Model<Input = RgbFrame>,
  M::Error: std::error::Error + Send + Sync + 'static,
  R: Render<RgbFrame, M::Output>,
  R::Error: std::error::Error + Send + Sync + 'static,
{
  let result = model.infer(frame)?;
  Ok(render.render_result(frame, &result)?)
}

impl<S, M, R, D> Task<S, M, Viewer<R, D>> for LiveDetectionTask
where
  S: FrameSource,
  M: Model<Input = RgbFrame>,
  M::Error: std::error::Error + Send + Sync + 'static,
  R: Render<RgbFrame, M::Output> + FpsOverlay,
  R::Error: std::error::Error + Send + Sync + 'static,
  D: Display,
{
  type Output = RunSummary;
  type Error = TaskError;

  fn run_task(self, source: S, mut model: M, output: Viewer<R, D>) -> Result<RunSummary, TaskError> {
    let Viewer { render, display } = output;
    let mut guard = Cleanup { source, display };
    let mut fps = FpsEstimator::default();
    let mut frames = 0u64;
    let mut failed_frames = 0u64;

    info!("开始实时检测，按 '{}' 退出", QUIT_KEY);
    let exit = loop {
      let frame = match guard.source.read_frame() {
        Ok(frame) => frame,
        Err(e) => {
          warn!("读取帧失败，视频流结束: {}", e);
          break ExitReason::StreamEnded;
        }
      };
      frames += 1;
      let current_fps = fps.tick();
      debug!("处理第 {} 帧图像", frame.index());

      let mut image = match annotate(&mut model, &render, &frame) {
        Ok(image) => image,
        Err(e) => {
          warn!("第 {} 帧检测失败，显示原始画面: {:#}", frame.index(), e);
          failed_frames += 1;
          frame.into_image()
        }
      };
      render.overlay_fps(&mut image, current_fps);

      guard
        .display
        .show(&image)
        .map_err(|e| TaskError::Display(e.to_string()))?;

      match guard
        .display
        .poll_event(KEY_WAIT)
        .map_err(|e| TaskError::Display(e.to_string()))?
      {
        Some(DisplayEvent::Key(key)) if key == QUIT_KEY => {
          info!("按下退出键 '{}'", key);
          break ExitReason::QuitKey;
        }
        Some(DisplayEvent::Closed) => {
          info!("显示窗口已关闭，退出任务循环");
          break ExitReason::WindowClosed;
        }
        _ => {}
      }

      if let Some(stop) = &self.stop
        && stop.try_recv().is_ok()
      {
        warn!("中断信号接收，退出任务循环");
        break ExitReason::Interrupted;
      }

      if let Some(limit) = self.max_frames
        && frames >= limit
      {
        info!("达到指定帧数 {}, 退出任务循环", limit);
        break ExitReason::FrameLimit;
      }
    };
    drop(guard);

    info!("任务完成，共 {} 帧，失败 {} 帧", frames, failed_frames);
    Ok(RunSummary {
      frames,
      failed_frames,
      exit,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    panic::{AssertUnwindSafe, catch_unwind},
    rc::Rc,
  };

  #[derive(Error, Debug)]
  #[error("mock: {0}")]
  struct MockError(&'static str);

  struct MockSource {
    next: u64,
    total: u64,
    released: Rc<Cell<bool>>,
    read_order: Rc<RefCell<Vec<u64>>>,
  }

  impl MockSource {
    fn new(total: u64) -> Self {
      Self {
        next: 0,
        total,
        released: Rc::new(Cell::new(false)),
        read_order: Rc::new(RefCell::new(Vec::new())),
      }
    }
  }

  impl FrameSource for MockSource {
    type Error = MockError;

    fn read_frame(&mut self) -> Result<RgbFrame, MockError> {
      if self.released.get() {
        return Err(MockError("released"));
      }
      if self.next >= self.total {
        return Err(MockError("end of stream"));
      }
      let index = self.next;
      self.next += 1;
      self.read_order.borrow_mut().push(index);
      // 第一个像素编码帧序号，便于检查显示内容
      let mut image = RgbImage::new(4, 4);
      image.put_pixel(0, 0, image::Rgb([index as u8, 0, 0]));
      Ok(RgbFrame::new(index, image))
    }

    fn release(&mut self) {
      self.released.set(true);
    }

    fn is_released(&self) -> bool {
      self.released.get()
    }
  }

  /// 在指定帧上推理失败
  struct MockModel {
    fail_on: Vec<u64>,
  }

  impl Model for MockModel {
    type Input = RgbFrame;
    type Output = u64;
    type Error = MockError;

    fn infer(&mut self, input: &RgbFrame) -> Result<u64, MockError> {
      if self.fail_on.contains(&input.index()) {
        Err(MockError("inference"))
      } else {
        Ok(input.index())
      }
    }
  }

  const ANNOTATED: [u8; 3] = [255, 255, 255];
  const FPS_MARK: [u8; 3] = [0, 255, 0];

  /// 成功渲染时把第二个像素设为白色，帧率叠加时把第三个像素设为绿色
  struct MockRender {
    fail_on: Vec<u64>,
    fps_calls: Rc<Cell<usize>>,
  }

  impl Render<RgbFrame, u64> for MockRender {
    type Error = MockError;

    fn render_result(&self, frame: &RgbFrame, _result: &u64) -> Result<RgbImage, MockError> {
      if self.fail_on.contains(&frame.index()) {
        return Err(MockError("render"));
      }
      let mut image = frame.image().clone();
      image.put_pixel(1, 0, image::Rgb(ANNOTATED));
      Ok(image)
    }
  }

  impl FpsOverlay for MockRender {
    fn overlay_fps(&self, image: &mut RgbImage, _fps: f64) {
      image.put_pixel(2, 0, image::Rgb(FPS_MARK));
      self.fps_calls.set(self.fps_calls.get() + 1);
    }
  }

  #[derive(Default)]
  struct MockDisplay {
    // 按显示次数（从 1 开始）返回的事件
    events: VecDeque<(usize, DisplayEvent)>,
    panic_on_show: Option<usize>,
    fail_show_on: Option<usize>,
    fail_poll_on: Option<usize>,
    shown: Rc<RefCell<Vec<RgbImage>>>,
    closed: Rc<Cell<bool>>,
  }

  impl Display for MockDisplay {
    type Error = MockError;

    fn show(&mut self, image: &RgbImage) -> Result<(), MockError> {
      let count = self.shown.borrow().len() + 1;
      if self.panic_on_show == Some(count) {
        panic!("display exploded");
      }
      if self.fail_show_on == Some(count) {
        return Err(MockError("show"));
      }
      self.shown.borrow_mut().push(image.clone());
      Ok(())
    }

    fn poll_event(&mut self, _timeout: Duration) -> Result<Option<DisplayEvent>, MockError> {
      let count = self.shown.borrow().len();
      if self.fail_poll_on == Some(count) {
        return Err(MockError("poll"));
      }
      match self.events.front() {
        Some((at, event)) if *at == count => {
          let event = *event;
          self.events.pop_front();
          Ok(Some(event))
        }
        _ => Ok(None),
      }
    }

    fn close(&mut self) {
      self.closed.set(true);
    }
  }

  fn viewer(display: MockDisplay) -> (Viewer<MockRender, MockDisplay>, Rc<Cell<usize>>) {
    viewer_failing_render(display, vec![])
  }

  fn viewer_failing_render(
    display: MockDisplay,
    fail_on: Vec<u64>,
  ) -> (Viewer<MockRender, MockDisplay>, Rc<Cell<usize>>) {
    let fps_calls = Rc::new(Cell::new(0));
    let render = MockRender {
      fail_on,
      fps_calls: fps_calls.clone(),
    };
    (Viewer { render, display }, fps_calls)
  }

  #[test]
  fn quit_key_stops_and_releases() {
    let source = MockSource::new(100);
    let released = source.released.clone();
    let display = MockDisplay {
      events: VecDeque::from([(2, DisplayEvent::Key('x')), (3, DisplayEvent::Key('q'))]),
      ..Default::default()
    };
    let closed = display.closed.clone();
    let shown = display.shown.clone();
    let (viewer, _) = viewer(display);

    let summary = LiveDetectionTask::default()
      .run_task(source, MockModel { fail_on: vec![] }, viewer)
      .unwrap();

    assert_eq!(summary.exit, ExitReason::QuitKey);
    assert_eq!(summary.frames, 3);
    assert_eq!(shown.borrow().len(), 3);
    assert!(released.get());
    assert!(closed.get());
  }

  #[test]
  fn read_failure_ends_stream_cleanly() {
    let source = MockSource::new(5);
    let released = source.released.clone();
    let display = MockDisplay::default();
    let closed = display.closed.clone();
    let (viewer, _) = viewer(display);

    let summary = LiveDetectionTask::default()
      .run_task(source, MockModel { fail_on: vec![] }, viewer)
      .unwrap();

    assert_eq!(
      summary,
      RunSummary {
        frames: 5,
        failed_frames: 0,
        exit: ExitReason::StreamEnded,
      }
    );
    assert!(released.get());
    assert!(closed.get());
  }

  #[test]
  fn inference_failure_falls_back_to_raw_frame() {
    let source = MockSource::new(3);
    let display = MockDisplay::default();
    let shown = display.shown.clone();
    let (viewer, fps_calls) = viewer(display);

    let summary = LiveDetectionTask::default()
      .run_task(source, MockModel { fail_on: vec![1] }, viewer)
      .unwrap();

    assert_eq!(summary.frames, 3);
    assert_eq!(summary.failed_frames, 1);
    let shown = shown.borrow();
    assert_eq!(shown[0].get_pixel(1, 0).0, ANNOTATED);
    // 失败的帧显示原始画面
    assert_eq!(shown[1].get_pixel(0, 0).0, [1, 0, 0]);
    assert_eq!(shown[1].get_pixel(1, 0).0, [0, 0, 0]);
    assert_eq!(shown[1].get_pixel(2, 0).0, FPS_MARK);
    // 下一帧不受影响
    assert_eq!(shown[2].get_pixel(1, 0).0, ANNOTATED);
    // 两条路径都叠加帧率
    assert_eq!(fps_calls.get(), 3);
  }

  #[test]
  fn render_failure_falls_back_to_raw_frame() {
    let source = MockSource::new(4);
    let display = MockDisplay::default();
    let shown = display.shown.clone();
    let (viewer, fps_calls) = viewer_failing_render(display, vec![2]);

    let summary = LiveDetectionTask::default()
      .run_task(source, MockModel { fail_on: vec![] }, viewer)
      .unwrap();

    assert_eq!(summary.frames, 4);
    assert_eq!(summary.failed_frames, 1);
    assert_eq!(summary.exit, ExitReason::StreamEnded);
    let shown = shown.borrow();
    assert_eq!(shown.len(), 4);
    assert_eq!(shown[2].get_pixel(0, 0).0, [2, 0, 0]);
    assert_eq!(shown[2].get_pixel(1, 0).0, [0, 0, 0]);
    assert_eq!(shown[2].get_pixel(2, 0).0, FPS_MARK);
    assert_eq!(shown[3].get_pixel(1, 0).0, ANNOTATED);
    assert_eq!(shown[3].get_pixel(2, 0).0, FPS_MARK);
    assert_eq!(fps_calls.get(), 4);
  }

  #[test]
  fn show_error_is_returned_after_cleanup() {
    let source = MockSource::new(10);
    let released = source.released.clone();
    let display = MockDisplay {
      fail_show_on: Some(3),
      ..Default::default()
    };
    let closed = display.closed.clone();
    let shown = display.shown.clone();
    let (viewer, _) = viewer(display);

    let result = LiveDetectionTask::default().run_task(source, MockModel { fail_on: vec![] }, viewer);

    assert!(matches!(result, Err(TaskError::Display(_))));
    assert_eq!(shown.borrow().len(), 2);
    assert!(released.get());
    assert!(closed.get());
  }

  #[test]
  fn poll_error_is_returned_after_cleanup() {
    let source = MockSource::new(10);
    let released = source.released.clone();
    let display = MockDisplay {
      fail_poll_on: Some(1),
      ..Default::default()
    };
    let closed = display.closed.clone();
    let (viewer, _) = viewer(display);

    let result = LiveDetectionTask::default().run_task(source, MockModel { fail_on: vec![] }, viewer);

    assert!(matches!(result, Err(TaskError::Display(_))));
    assert!(released.get());
    assert!(closed.get());
  }

  #[test]
  fn frames_are_processed_in_capture_order() {
    let source = MockSource::new(6);
    let order = source.read_order.clone();
    let display = MockDisplay::default();
    let shown = display.shown.clone();
    let (viewer, _) = viewer(display);

    LiveDetectionTask::default()
      .run_task(source, MockModel { fail_on: vec![2, 4] }, viewer)
      .unwrap();

    assert_eq!(*order.borrow(), vec![0, 1, 2, 3, 4, 5]);
    let indices: Vec<u8> = shown.borrow().iter().map(|img| img.get_pixel(0, 0).0[0]).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
  }

  #[test]
  fn window_close_stops_loop() {
    let source = MockSource::new(10);
    let display = MockDisplay {
      events: VecDeque::from([(1, DisplayEvent::Closed)]),
      ..Default::default()
    };
    let (viewer, _) = viewer(display);

    let summary = LiveDetectionTask::default()
      .run_task(source, MockModel { fail_on: vec![] }, viewer)
      .unwrap();
    assert_eq!(summary.exit, ExitReason::WindowClosed);
    assert_eq!(summary.frames, 1);
  }

  #[test]
  fn frame_limit_and_interrupt() {
    let (viewer_a, _) = viewer(MockDisplay::default());
    let summary = LiveDetectionTask::default()
      .with_max_frames(Some(4))
      .run_task(MockSource::new(10), MockModel { fail_on: vec![] }, viewer_a)
      .unwrap();
    assert_eq!(summary.exit, ExitReason::FrameLimit);
    assert_eq!(summary.frames, 4);

    let (tx, rx) = mpsc::channel();
    tx.send(()).unwrap();
    let source = MockSource::new(10);
    let released = source.released.clone();
    let (viewer_b, _) = viewer(MockDisplay::default());
    let summary = LiveDetectionTask::default()
      .with_stop_signal(rx)
      .run_task(source, MockModel { fail_on: vec![] }, viewer_b)
      .unwrap();
    assert_eq!(summary.exit, ExitReason::Interrupted);
    assert_eq!(summary.frames, 1);
    assert!(released.get());
  }

  #[test]
  fn panic_in_loop_still_releases_camera() {
    let source = MockSource::new(10);
    let released = source.released.clone();
    let display = MockDisplay {
      panic_on_show: Some(2),
      ..Default::default()
    };
    let closed = display.closed.clone();
    let (viewer, _) = viewer(display);

    let outcome = catch_unwind(AssertUnwindSafe(|| {
      LiveDetectionTask::default().run_task(source, MockModel { fail_on: vec![] }, viewer)
    }));

    assert!(outcome.is_err());
    assert!(released.get());
    assert!(closed.get());
  }
}
