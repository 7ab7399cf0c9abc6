// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/camera_loop.rs - 摄像头管线调度测试
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

mod common;

use std::{sync::atomic::Ordering, time::Duration};

use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use shanan_uav::{
  input::FacingMode,
  pipeline::{self, CameraCommand, CameraLoop, PipelineEvent, PipelineState},
};

use common::*;

#[tokio::test(start_paused = true)]
async fn slow_inference_drops_refreshes() {
  let (core, stats) = core_with(ScriptedSession::new(&[130], 5, &[CAR]));
  let (camera, _) = MockCamera::new();
  let ticks = pipeline::ticks_every(Duration::from_millis(16)).take(10);

  let handle = pipeline::spawn(CameraLoop::new(core, camera), ticks, CancellationToken::new());
  let mut events = handle.subscribe();
  handle.start().await.unwrap();

  let summary = handle.join().await.unwrap();
  assert_eq!(summary.cycles_started, 2);
  assert_eq!(summary.cycles_completed, 2);
  assert_eq!(summary.ticks_dropped, 8);
  assert_eq!(stats.max(), 1);
  assert_eq!(stats.calls(), 2);

  let events = drain(&mut events);
  assert_eq!(completed(&events), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn inference_calls_never_overlap() {
  let (core, stats) = core_with(ScriptedSession::new(&[], 40, &[CAR]));
  let (camera, _) = MockCamera::new();
  let ticks = pipeline::ticks_every(Duration::from_millis(7)).take(60);

  let handle = pipeline::spawn(CameraLoop::new(core, camera), ticks, CancellationToken::new());
  handle.start().await.unwrap();
  let summary = handle.join().await.unwrap();

  assert_eq!(stats.max(), 1);
  assert!(summary.cycles_started >= 2);
  assert_eq!(summary.cycles_started, summary.cycles_completed);
}

#[tokio::test(start_paused = true)]
async fn restart_waits_for_stale_call() {
  let (core, stats) = core_with(ScriptedSession::new(&[100], 5, &[CAR]));
  let (camera, _) = MockCamera::new();
  let (tick, ticks) = manual_ticks();

  let handle = pipeline::spawn(CameraLoop::new(core, camera), ticks, CancellationToken::new());
  let mut events = handle.subscribe();
  handle.start().await.unwrap();
  tick.send(()).await.unwrap();
  tokio::time::sleep(Duration::from_millis(10)).await;

  handle.stop().await.unwrap();
  settle().await;
  handle.start().await.unwrap();
  settle().await;
  // 旧调用仍占用槽位
  tick.send(()).await.unwrap();
  settle().await;
  assert_eq!(stats.calls(), 1);

  tokio::time::sleep(Duration::from_millis(120)).await;
  tick.send(()).await.unwrap();
  tokio::time::sleep(Duration::from_millis(20)).await;
  drop(tick);

  let summary = handle.join().await.unwrap();
  assert_eq!(summary.cycles_started, 2);
  assert_eq!(summary.cycles_completed, 1);
  assert_eq!(summary.stale_results, 1);
  assert_eq!(summary.ticks_dropped, 1);
  assert_eq!(stats.max(), 1);

  // 过期结果没有计入新一轮统计
  assert_eq!(completed(&drain(&mut events)), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn switching_facing_stops_detection() {
  let (core, _) = core_with(ScriptedSession::new(&[], 5, &[CAR]));
  let (camera, camera_state) = MockCamera::new();
  let (tick, ticks) = manual_ticks();

  let handle = pipeline::spawn(CameraLoop::new(core, camera), ticks, CancellationToken::new());
  let mut events = handle.subscribe();
  handle.start().await.unwrap();
  tick.send(()).await.unwrap();
  tokio::time::sleep(Duration::from_millis(10)).await;
  assert_eq!(completed(&drain(&mut events)), vec![1]);

  handle.command(CameraCommand::SwitchFacing).await.unwrap();
  settle().await;
  assert_eq!(*camera_state.facing.lock().unwrap(), FacingMode::User);
  assert_eq!(
    camera_state.switches.load(Ordering::SeqCst),
    1
  );
  let events_after = drain(&mut events);
  assert!(
    events_after
      .iter()
      .any(|e| matches!(e, PipelineEvent::StateChanged(PipelineState::Idle)))
  );

  // 未开始前刷新不触发检测
  tick.send(()).await.unwrap();
  settle().await;
  assert!(completed(&drain(&mut events)).is_empty());

  // 重新开始后统计从零计数
  handle.start().await.unwrap();
  tick.send(()).await.unwrap();
  tokio::time::sleep(Duration::from_millis(10)).await;
  assert_eq!(completed(&drain(&mut events)), vec![1]);

  handle.cancel();
  handle.join().await.unwrap();
}

fn errors(events: &[PipelineEvent]) -> Vec<String> {
  events
    .iter()
    .filter_map(|e| match e {
      PipelineEvent::Error { message, .. } => Some(message.clone()),
      _ => None,
    })
    .collect()
}

#[tokio::test(start_paused = true)]
async fn missing_frames_are_retried_silently() {
  let (core, stats) = core_with(ScriptedSession::new(&[], 5, &[CAR]));
  let (camera, camera_state) = MockCamera::new();
  let (tick, ticks) = manual_ticks();

  let handle = pipeline::spawn(
    CameraLoop::new(core, camera.with_gaps(2)),
    ticks,
    CancellationToken::new(),
  );
  let mut events = handle.subscribe();
  handle.start().await.unwrap();
  for _ in 0..6 {
    tick.send(()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  drop(tick);

  let summary = handle.join().await.unwrap();
  assert_eq!(camera_state.grabs.load(Ordering::SeqCst), 6);
  assert_eq!(summary.cycles_started, 3);
  assert_eq!(summary.cycles_completed, 3);
  assert_eq!(stats.calls(), 3);

  let events = drain(&mut events);
  assert_eq!(completed(&events), vec![1, 2, 3]);
  assert!(errors(&events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn inference_failure_halts_without_retry() {
  let (core, stats) = core_with(ScriptedSession::new(&[], 5, &[CAR]).failing_on(2));
  let (camera, _) = MockCamera::new();
  let (tick, ticks) = manual_ticks();

  let handle = pipeline::spawn(CameraLoop::new(core, camera), ticks, CancellationToken::new());
  let mut events = handle.subscribe();
  handle.start().await.unwrap();
  tick.send(()).await.unwrap();
  tokio::time::sleep(Duration::from_millis(10)).await;
  tick.send(()).await.unwrap();
  tokio::time::sleep(Duration::from_millis(10)).await;

  // 出错后刷新不再触发推理
  for _ in 0..3 {
    tick.send(()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  drop(tick);

  let summary = handle.join().await.unwrap();
  assert_eq!(summary.cycles_started, 2);
  assert_eq!(summary.cycles_completed, 1);
  assert_eq!(stats.calls(), 2);

  let events = drain(&mut events);
  assert_eq!(completed(&events), vec![1]);
  assert_eq!(
    errors(&events),
    vec!["Error processing video frames. Please try again.".to_string()]
  );
  assert!(
    events
      .iter()
      .any(|e| matches!(e, PipelineEvent::StateChanged(PipelineState::Idle)))
  );
}

#[tokio::test(start_paused = true)]
async fn repeated_start_is_ignored() {
  let (core, stats) = core_with(ScriptedSession::new(&[], 5, &[]));
  let (camera, _) = MockCamera::new();
  let (tick, ticks) = manual_ticks();

  let handle = pipeline::spawn(CameraLoop::new(core, camera), ticks, CancellationToken::new());
  handle.start().await.unwrap();
  handle.start().await.unwrap();
  tick.send(()).await.unwrap();
  tokio::time::sleep(Duration::from_millis(10)).await;
  drop(tick);

  let summary = handle.join().await.unwrap();
  assert_eq!(summary.cycles_started, 1);
  assert_eq!(stats.calls(), 1);
}
