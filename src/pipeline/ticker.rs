// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline/ticker.rs - 显示刷新信号
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

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;

pub fn refresh_period(hz: u32) -> Duration {
  Duration::from_secs_f64(1.0 / hz.max(1) as f64)
}

/// 固定周期的刷新信号，错过的刷新直接跳过，不排队
///
/// 需在 tokio 运行时内调用。
pub fn ticks_every(period: Duration) -> IntervalStream {
  let mut interval = tokio::time::interval(period);
  interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
  IntervalStream::new(interval)
}

pub fn refresh_ticks(hz: u32) -> IntervalStream {
  ticks_every(refresh_period(hz))
}

#[cfg(test)]
mod tests {
  use tokio_stream::StreamExt;

  use super::*;

  #[test]
  fn period_from_rate() {
    assert_eq!(refresh_period(50), Duration::from_millis(20));
    assert_eq!(refresh_period(0), Duration::from_secs(1));
  }

  #[tokio::test(start_paused = true)]
  async fn missed_ticks_are_skipped() {
    let mut ticks = ticks_every(Duration::from_millis(10));
    ticks.next().await;
    tokio::time::sleep(Duration::from_millis(35)).await;

    ticks.next().await;
    let late = tokio::time::Instant::now();
    ticks.next().await;
    let next = tokio::time::Instant::now();
    // 积压的刷新不会连续补发
    assert!(next - late >= Duration::from_millis(5));
  }
}
