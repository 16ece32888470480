//! 失联作业清扫模块
//! Stalled-job sweeper module
//!
//! 定期收回已认领但在租约时限内未完成的作业。持有认领的 worker
//! 可能已经崩溃；被收回的作业按可恢复失败处理并重新排队。
//! Periodically reclaims jobs that were claimed but not finished within
//! the lease timeout. The claiming worker may have crashed; reclaimed
//! jobs are treated as a recoverable failure and requeued.

use crate::components::ComponentLifecycle;
use crate::config::SweeperConfig;
use crate::error::Result;
use crate::store::JobStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// 失联作业清扫器
/// Stalled-job sweeper
///
/// 防止崩溃的 worker 将作业永久滞留在 Processing 状态
/// Protects against crashed workers leaving jobs stuck in Processing
pub struct StalledSweeper {
  store: Arc<dyn JobStore>,
  config: SweeperConfig,
  done: Arc<AtomicBool>,
}

impl StalledSweeper {
  /// 创建新的清扫器
  /// Create a new sweeper
  pub fn new(store: Arc<dyn JobStore>, config: SweeperConfig) -> Self {
    Self {
      store,
      config,
      done: Arc::new(AtomicBool::new(false)),
    }
  }

  /// 启动清扫器
  /// Start the sweeper
  pub fn start(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(self.config.interval);
      loop {
        interval.tick().await;

        if self.done.load(Ordering::Relaxed) {
          tracing::debug!("stalled sweeper: shutting down");
          break;
        }

        if let Err(e) = self.sweep().await {
          tracing::error!("stalled sweeper error: {}", e);
        }
      }
    })
  }

  /// 执行一次清扫
  /// Run one sweep
  async fn sweep(&self) -> Result<()> {
    let reaped = self.store.reap_stalled().await?;
    if !reaped.is_empty() {
      tracing::warn!("reclaimed {} stalled job(s): {:?}", reaped.len(), reaped);
    }
    Ok(())
  }

  /// 停止清扫器
  /// Stop the sweeper
  pub fn shutdown(&self) {
    self.done.store(true, Ordering::Relaxed);
  }

  /// 检查是否已结束
  /// Check if done
  pub fn is_done(&self) -> bool {
    self.done.load(Ordering::Relaxed)
  }
}

impl ComponentLifecycle for StalledSweeper {
  fn start(self: Arc<Self>) -> JoinHandle<()> {
    StalledSweeper::start(self)
  }

  fn shutdown(&self) {
    StalledSweeper::shutdown(self)
  }

  fn is_done(&self) -> bool {
    StalledSweeper::is_done(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::registry::JobTypeRegistry;
  use crate::store::MemoryStore;
  use std::time::Duration;

  #[test]
  fn test_sweeper_config_default() {
    let config = SweeperConfig::default();
    assert_eq!(config.interval, Duration::from_secs(8));
  }

  #[tokio::test]
  async fn test_sweeper_shutdown() {
    let store = Arc::new(MemoryStore::with_defaults(Arc::new(JobTypeRegistry::new())));
    let sweeper = StalledSweeper::new(store, SweeperConfig::default());

    assert!(!sweeper.is_done());
    sweeper.shutdown();
    assert!(sweeper.is_done());
  }
}
