//! 配置模块
//! Configuration module
//!
//! 定义了队列、工作池、调度器和幂等缓存的配置选项
//! Defines configuration options for the queue, worker pool, scheduler
//! and idempotency cache

use crate::backoff::RetryPolicy;
use std::time::Duration;

/// 默认认领租约时长
/// Default claim lease duration
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(30);

/// 默认作业执行超时时间
/// Default job execution timeout
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// 默认幂等记录保存时长
/// Default idempotency record retention
pub const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(48 * 3600);

/// 队列（作业存储）配置
/// Queue (job store) configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
  /// 认领租约时长，超过后 Processing 作业被收回
  /// Claim lease duration; Processing jobs past it are reclaimed
  pub lease_timeout: Duration,
  /// 失败作业的重试延迟策略
  /// Retry delay policy for failed jobs
  pub retry_policy: RetryPolicy,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      lease_timeout: DEFAULT_LEASE_TIMEOUT,
      retry_policy: RetryPolicy::default_exponential(),
    }
  }
}

impl QueueConfig {
  /// 创建新的队列配置
  /// Create a new queue configuration
  pub fn new() -> Self {
    Self::default()
  }

  /// 设置认领租约时长
  /// Set the claim lease duration
  pub fn lease_timeout(mut self, lease_timeout: Duration) -> Self {
    self.lease_timeout = lease_timeout;
    self
  }

  /// 设置重试策略
  /// Set the retry policy
  pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
    self.retry_policy = retry_policy;
    self
  }
}

/// 工作池配置
/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  /// 并发工作者数量
  /// Number of concurrent workers
  pub concurrency: usize,
  /// 队列空闲时的轮询间隔
  /// Poll interval while the queue is idle
  pub poll_interval: Duration,
  /// 单个作业的执行超时
  /// Per-job execution timeout
  pub job_timeout: Duration,
  /// 关闭超时时间
  /// Shutdown timeout
  pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      concurrency: num_cpus::get(),
      poll_interval: Duration::from_secs(1),
      job_timeout: DEFAULT_JOB_TIMEOUT,
      shutdown_timeout: Duration::from_secs(8),
    }
  }
}

impl WorkerConfig {
  /// 创建新的工作池配置
  /// Create a new worker pool configuration
  pub fn new() -> Self {
    Self::default()
  }

  /// 设置并发数
  /// Set the number of concurrent workers
  pub fn concurrency(mut self, concurrency: usize) -> Self {
    self.concurrency = concurrency.max(1);
    self
  }

  /// 设置轮询间隔
  /// Set the poll interval
  pub fn poll_interval(mut self, interval: Duration) -> Self {
    self.poll_interval = interval;
    self
  }

  /// 设置单作业执行超时
  /// Set the per-job execution timeout
  pub fn job_timeout(mut self, timeout: Duration) -> Self {
    self.job_timeout = timeout;
    self
  }

  /// 设置关闭超时时间
  /// Set the shutdown timeout
  pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
    self.shutdown_timeout = timeout;
    self
  }
}

/// 失联作业清扫器配置
/// Stalled-job sweeper configuration
#[derive(Debug, Clone)]
pub struct SweeperConfig {
  /// 清扫间隔
  /// Sweep interval
  pub interval: Duration,
}

impl Default for SweeperConfig {
  fn default() -> Self {
    Self {
      interval: Duration::from_secs(8),
    }
  }
}

/// 幂等缓存配置
/// Idempotency cache configuration
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
  /// 记录保存时长
  /// Record retention duration
  pub ttl: Duration,
  /// 过期记录的回收间隔
  /// Sweep interval for expired records
  pub gc_interval: Duration,
}

impl Default for IdempotencyConfig {
  fn default() -> Self {
    Self {
      ttl: DEFAULT_IDEMPOTENCY_TTL,
      gc_interval: Duration::from_secs(5 * 60),
    }
  }
}

impl IdempotencyConfig {
  /// 创建新的幂等缓存配置
  /// Create a new idempotency cache configuration
  pub fn new() -> Self {
    Self::default()
  }

  /// 设置记录保存时长
  /// Set the record retention duration
  pub fn ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// 设置回收间隔
  /// Set the sweep interval
  pub fn gc_interval(mut self, interval: Duration) -> Self {
    self.gc_interval = interval;
    self
  }
}
