// 该文件是 Shanan （山南西风） 项目的一部分。
// src/shutdown.rs - 中断信号处理
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

use std::{thread, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 中断后等待管线退出的最长时间
pub const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

/// Ctrl-C 触发取消，超时未退出则强制结束进程
pub fn cancel_on_interrupt(cancel: CancellationToken) -> Result<(), ctrlc::Error> {
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    cancel.cancel();
    thread::spawn(|| {
      thread::sleep(FORCE_EXIT_AFTER);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
}
