//! 幂等记录回收模块
//! Idempotency record sweep module
//!
//! 定期删除过期的幂等记录以限制内存占用。回收只是内存边界手段，
//! 不承担正确性职责：过期记录在查询时已按缺失处理。
//! Periodically removes expired idempotency records to bound memory.
//! The sweep is a memory bound only, with no correctness role: expired
//! records already read as missing at lookup time.

use crate::components::ComponentLifecycle;
use crate::idempotency::IdempotencyCache;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// 幂等记录回收器
/// Idempotency record collector
pub struct IdempotencyGc {
  cache: Arc<dyn IdempotencyCache>,
  interval: Duration,
  done: Arc<AtomicBool>,
}

impl IdempotencyGc {
  /// 创建新的回收器
  /// Create a new collector
  pub fn new(cache: Arc<dyn IdempotencyCache>, interval: Duration) -> Self {
    Self {
      cache,
      interval,
      done: Arc::new(AtomicBool::new(false)),
    }
  }

  /// 启动回收器
  /// Start the collector
  pub fn start(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(self.interval);
      loop {
        interval.tick().await;

        if self.done.load(Ordering::Relaxed) {
          tracing::debug!("idempotency gc: shutting down");
          break;
        }

        match self.cache.gc().await {
          Ok(0) => {}
          Ok(removed) => tracing::debug!("idempotency gc removed {} expired record(s)", removed),
          // 缓存后端故障不致命，下一轮重试
          // A cache backend failure is non-fatal; retried next round
          Err(e) => tracing::warn!("idempotency gc failed: {}", e),
        }
      }
    })
  }

  /// 停止回收器
  /// Stop the collector
  pub fn shutdown(&self) {
    self.done.store(true, Ordering::Relaxed);
  }

  /// 检查是否已结束
  /// Check if done
  pub fn is_done(&self) -> bool {
    self.done.load(Ordering::Relaxed)
  }
}

impl ComponentLifecycle for IdempotencyGc {
  fn start(self: Arc<Self>) -> JoinHandle<()> {
    IdempotencyGc::start(self)
  }

  fn shutdown(&self) {
    IdempotencyGc::shutdown(self)
  }

  fn is_done(&self) -> bool {
    IdempotencyGc::is_done(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::idempotency::MemoryIdempotencyCache;

  #[tokio::test]
  async fn test_gc_shutdown() {
    let cache = Arc::new(MemoryIdempotencyCache::new());
    let gc = IdempotencyGc::new(cache, Duration::from_secs(300));

    assert!(!gc.is_done());
    gc.shutdown();
    assert!(gc.is_done());
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_gc_loop_removes_expired() {
    let cache = Arc::new(MemoryIdempotencyCache::new());
    cache
      .record("acme", "k", 201, serde_json::json!({}), Duration::from_millis(0))
      .await
      .unwrap();

    let gc = Arc::new(IdempotencyGc::new(
      cache.clone() as Arc<dyn IdempotencyCache>,
      Duration::from_millis(20),
    ));
    let handle = gc.clone().start();

    tokio::time::sleep(Duration::from_millis(100)).await;
    gc.shutdown();
    let _ = handle.await;

    assert!(cache.is_empty().await);
  }
}
