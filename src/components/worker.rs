//! 工作池模块
//! Worker pool module
//!
//! ## 概述 / Overview
//!
//! 工作池是作业执行的核心组件，负责从作业存储认领作业并分派给
//! 注册的执行处理器。
//! The worker pool is the core component for job execution, responsible
//! for claiming jobs from the job store and dispatching them to the
//! registered execution handlers.
//!
//! ## 主要特性 / Key Features
//!
//! - **信号量并发控制**: 使用 Tokio Semaphore 限制并发工作者数量
//!   - **Semaphore-based concurrency**: Uses Tokio Semaphore to limit concurrent workers
//!
//! - **作业级隔离**: 每个作业在独立任务中执行，单个处理器失败不影响
//!   其他在途作业
//!   - **Per-job isolation**: each job runs in its own task; one handler
//!     failure never affects other in-flight jobs
//!
//! - **作业超时**: 超过配置时限的执行按失败处理，进入常规重试路径
//!   - **Job timeout**: executions over the configured limit are failed
//!     into the normal retry path
//!
//! - **优雅关闭**: 等待所有活跃工作者完成后再关闭
//!   - **Graceful shutdown**: waits for all active workers to finish before
//!     shutting down

use crate::config::WorkerConfig;
use crate::registry::HandlerRegistry;
use crate::store::JobStore;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// 工作池 - 负责认领并执行作业
/// Worker pool - responsible for claiming and executing jobs
pub struct WorkerPool {
  store: Arc<dyn JobStore>,
  handlers: Arc<HandlerRegistry>,
  config: WorkerConfig,

  // 池标识，组成每次认领的 worker id
  // Pool identifier, part of each claim's worker id
  pool_id: String,

  // 信号量用于限制并发工作者数量
  // Semaphore to limit the number of concurrent workers
  sema: Arc<Semaphore>,

  // 运行状态标志
  // Running state flag
  running: Arc<AtomicBool>,

  // 退出信号通道
  // Quit signal channel
  quit_tx: Option<mpsc::Sender<()>>,
  quit_rx: Option<mpsc::Receiver<()>>,

  // 主循环句柄
  // Main loop handle
  handle: Option<JoinHandle<()>>,

  // 活跃工作者计数
  // Active worker count
  active_workers: Arc<AtomicUsize>,
}

impl WorkerPool {
  /// 创建新的工作池
  /// Create a new worker pool
  pub fn new(store: Arc<dyn JobStore>, handlers: Arc<HandlerRegistry>, config: WorkerConfig) -> Self {
    let (quit_tx, quit_rx) = mpsc::channel(1);
    let pool_id = format!(
      "{}:{}:{}",
      hostname::get().unwrap_or_default().to_string_lossy(),
      std::process::id(),
      Uuid::new_v4()
    );
    Self {
      sema: Arc::new(Semaphore::new(config.concurrency)),
      store,
      handlers,
      config,
      pool_id,
      running: Arc::new(AtomicBool::new(false)),
      quit_tx: Some(quit_tx),
      quit_rx: Some(quit_rx),
      handle: None,
      active_workers: Arc::new(AtomicUsize::new(0)),
    }
  }

  /// 当前活跃工作者数量
  /// Current number of active workers
  pub fn active_workers(&self) -> usize {
    self.active_workers.load(Ordering::Relaxed)
  }

  /// 启动工作池
  /// Start the worker pool
  pub fn start(&mut self) {
    if self.running.swap(true, Ordering::SeqCst) {
      return;
    }

    let store = Arc::clone(&self.store);
    let handlers = Arc::clone(&self.handlers);
    let sema = Arc::clone(&self.sema);
    let running = Arc::clone(&self.running);
    let active_workers = Arc::clone(&self.active_workers);
    let pool_id = self.pool_id.clone();
    let poll_interval = self.config.poll_interval;
    let job_timeout = self.config.job_timeout;
    let mut quit_rx = match self.quit_rx.take() {
      Some(rx) => rx,
      None => return,
    };

    let handle = tokio::spawn(async move {
      let mut slot: u64 = 0;
      loop {
        // 检查是否收到退出信号
        // Check if a quit signal was received
        if quit_rx.try_recv().is_ok() {
          tracing::debug!("worker pool received quit signal");
          break;
        }
        if !running.load(Ordering::SeqCst) {
          break;
        }

        // 尝试获取信号量令牌
        // Try to acquire a semaphore permit
        let permit = match sema.clone().try_acquire_owned() {
          Ok(permit) => permit,
          Err(_) => {
            // 没有可用的工作者槽位，短暂等待
            // No available worker slots, wait briefly
            tokio::time::sleep(Duration::from_millis(100)).await;
            continue;
          }
        };

        slot += 1;
        let worker_id = format!("{pool_id}/{slot}");

        match store.claim(&worker_id).await {
          Ok(Some(job)) => {
            active_workers.fetch_add(1, Ordering::Relaxed);

            let store = Arc::clone(&store);
            let handlers = Arc::clone(&handlers);
            let active_workers = Arc::clone(&active_workers);

            // 在新的任务中处理
            // Process in a new task
            tokio::spawn(async move {
              let _permit = permit; // 持有许可直到作业完成 / held until the job finishes
              let job_id = job.id.clone();
              let job_type = job.job_type.clone();

              let outcome = match handlers.get(&job_type) {
                Some(handler) => {
                  tokio::select! {
                    result = handler.execute(job) => result,
                    _ = tokio::time::sleep(job_timeout) => {
                      tracing::warn!("job {} timed out after {:?}", job_id, job_timeout);
                      Err(crate::error::Error::Timeout)
                    }
                  }
                }
                None => {
                  // 提交时经过类型注册表校验，缺少处理器属于部署配置
                  // 缺口，走常规失败路径直至终态可见
                  // Submission passed the type registry, so a missing
                  // handler is a deployment gap; it takes the normal
                  // failure path until terminally visible
                  Err(crate::error::Error::other(format!(
                    "no handler registered for job type {job_type}"
                  )))
                }
              };

              match outcome {
                Ok(result) => {
                  if let Err(e) = store.complete(&job_id, result).await {
                    tracing::error!("failed to mark job {} as completed: {}", job_id, e);
                  }
                }
                Err(e) => {
                  if let Err(e) = store.fail(&job_id, &e.to_string()).await {
                    tracing::error!("failed to record failure for job {}: {}", job_id, e);
                  }
                }
              }

              active_workers.fetch_sub(1, Ordering::Relaxed);
            });
          }
          Ok(None) => {
            // 没有作业，等待后重试
            // No jobs, wait and retry
            drop(permit);
            tokio::time::sleep(poll_interval).await;
          }
          Err(e) => {
            tracing::error!("claim error: {}", e);
            drop(permit);
            tokio::time::sleep(Duration::from_secs(1)).await;
          }
        }
      }

      tracing::debug!("worker pool loop exited");
    });

    self.handle = Some(handle);
  }

  /// 停止工作池（不等待工作者完成）
  /// Stop the worker pool (without waiting for workers)
  pub fn stop(&mut self) {
    self.running.store(false, Ordering::SeqCst);
    if let Some(tx) = self.quit_tx.take() {
      let _ = tx.try_send(());
    }
  }

  /// 关闭工作池并等待所有工作者完成
  /// Shut down the worker pool and wait for all workers to finish
  pub async fn shutdown(&mut self) {
    self.stop();

    // 等待主循环退出
    // Wait for the main loop to exit
    if let Some(handle) = self.handle.take() {
      let _ = handle.await;
    }

    tracing::info!("waiting for all workers to finish...");

    // 在关闭时限内等待所有信号量令牌被释放（即所有工作者完成）
    // Wait within the shutdown timeout for all semaphore permits to be
    // released (i.e. all workers finished)
    let sema = Arc::clone(&self.sema);
    let concurrency = self.config.concurrency as u32;
    let drained = tokio::time::timeout(self.config.shutdown_timeout, async move {
      let _ = sema.acquire_many(concurrency).await;
    })
    .await;

    match drained {
      Ok(_) => tracing::info!("all workers have finished"),
      Err(_) => tracing::warn!(
        "shutdown timeout elapsed with {} workers still active",
        self.active_workers()
      ),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::QueueConfig;
  use crate::events::EventSink;
  use crate::job::NewJob;
  use crate::registry::JobTypeRegistry;
  use crate::store::MemoryStore;
  use serde_json::json;

  fn fast_worker_config(concurrency: usize) -> WorkerConfig {
    WorkerConfig::new()
      .concurrency(concurrency)
      .poll_interval(Duration::from_millis(20))
      .job_timeout(Duration::from_secs(5))
      .shutdown_timeout(Duration::from_secs(2))
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_pool_processes_submitted_job() {
    let mut registry = JobTypeRegistry::new();
    registry.register_any("echo");
    let registry = Arc::new(registry);
    let store = Arc::new(MemoryStore::new(
      registry,
      QueueConfig::default(),
      EventSink::disabled(),
    ));

    let mut handlers = HandlerRegistry::new();
    handlers.register_fn("echo", |job| async move { Ok(job.payload) });

    let mut pool = WorkerPool::new(store.clone(), Arc::new(handlers), fast_worker_config(2));
    pool.start();

    let job = store
      .submit(NewJob::new("acme", "echo", json!({ "n": 1 })).unwrap())
      .await
      .unwrap();

    // 轮询直到完成
    // Poll until completed
    let mut completed = false;
    for _ in 0..100 {
      tokio::time::sleep(Duration::from_millis(20)).await;
      let job = store.get(&job.id).await.unwrap().unwrap();
      if job.status == crate::job::JobStatus::Completed {
        assert_eq!(job.result, Some(json!({ "n": 1 })));
        completed = true;
        break;
      }
    }
    pool.shutdown().await;
    assert!(completed, "job was not completed in time");
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_pool_missing_handler_fails_job() {
    let mut registry = JobTypeRegistry::new();
    registry.register_any("orphan");
    let config = QueueConfig::new().retry_policy(crate::backoff::RetryPolicy::Fixed(
      Duration::from_millis(0),
    ));
    let store = Arc::new(MemoryStore::new(
      Arc::new(registry),
      config,
      EventSink::disabled(),
    ));

    let mut pool = WorkerPool::new(
      store.clone(),
      Arc::new(HandlerRegistry::new()),
      fast_worker_config(1),
    );
    pool.start();

    let job = store
      .submit(NewJob::new("acme", "orphan", json!({})).unwrap().with_max_retries(1))
      .await
      .unwrap();

    let mut failed = false;
    for _ in 0..100 {
      tokio::time::sleep(Duration::from_millis(20)).await;
      let job = store.get(&job.id).await.unwrap().unwrap();
      if job.status == crate::job::JobStatus::Failed {
        assert!(job.error.as_deref().unwrap_or_default().contains("no handler"));
        failed = true;
        break;
      }
    }
    pool.shutdown().await;
    assert!(failed, "job without handler was not failed in time");
  }
}
