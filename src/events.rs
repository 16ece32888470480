//! 队列事件模块
//! Queue event module
//!
//! 核心组件在每次状态迁移时向一个通道推送类型化事件，
//! 由外部的指标订阅者自行消费；核心不依赖任何指标库。
//! Core components push typed events onto a channel on every state
//! transition; an external metrics subscriber drains them. The core
//! never depends on a specific metrics library.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// 队列事件
/// Queue event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueueEvent {
  /// 作业已提交
  /// Job submitted
  JobSubmitted {
    job_id: String,
    job_type: String,
    tenant: String,
    timestamp: DateTime<Utc>,
  },
  /// 作业成功完成
  /// Job completed successfully
  JobCompleted {
    job_id: String,
    job_type: String,
    tenant: String,
    timestamp: DateTime<Utc>,
  },
  /// 作业失败；`terminal` 表示重试是否已耗尽
  /// Job failed; `terminal` indicates whether retries are exhausted
  JobFailed {
    job_id: String,
    job_type: String,
    tenant: String,
    error: String,
    terminal: bool,
    timestamp: DateTime<Utc>,
  },
  /// 作业租约过期，被收回重新排队
  /// Job lease expired and the job was reclaimed for requeue
  JobStalled {
    job_id: String,
    worker_id: String,
    timestamp: DateTime<Utc>,
  },
  /// 作业已取消
  /// Job cancelled
  JobCancelled {
    job_id: String,
    timestamp: DateTime<Utc>,
  },
  /// 调度触发并提交了一个作业
  /// A schedule fired and submitted a job
  ScheduleFired {
    schedule_id: String,
    job_id: String,
    timestamp: DateTime<Utc>,
  },
  /// 幂等缓存命中
  /// Idempotency cache hit
  IdempotencyHit {
    tenant: String,
    timestamp: DateTime<Utc>,
  },
  /// 幂等缓存未命中
  /// Idempotency cache miss
  IdempotencyMiss {
    tenant: String,
    timestamp: DateTime<Utc>,
  },
}

impl QueueEvent {
  /// 事件类型名称
  /// Event type name
  pub fn event_type(&self) -> &'static str {
    match self {
      Self::JobSubmitted { .. } => "job.submitted",
      Self::JobCompleted { .. } => "job.completed",
      Self::JobFailed { .. } => "job.failed",
      Self::JobStalled { .. } => "job.stalled",
      Self::JobCancelled { .. } => "job.cancelled",
      Self::ScheduleFired { .. } => "schedule.fired",
      Self::IdempotencyHit { .. } => "idempotency.hit",
      Self::IdempotencyMiss { .. } => "idempotency.miss",
    }
  }
}

/// 事件发送端
/// Event sending half
///
/// 订阅者缺席或落后时事件被丢弃而不是阻塞队列操作
/// Events are dropped rather than blocking queue operations when the
/// subscriber is absent or lagging
#[derive(Debug, Clone, Default)]
pub struct EventSink {
  tx: Option<mpsc::UnboundedSender<QueueEvent>>,
}

impl EventSink {
  /// 创建带订阅通道的事件发送端
  /// Create an event sink with a subscriber channel
  pub fn new(tx: mpsc::UnboundedSender<QueueEvent>) -> Self {
    Self { tx: Some(tx) }
  }

  /// 创建不投递任何事件的发送端
  /// Create a sink that delivers no events
  pub fn disabled() -> Self {
    Self { tx: None }
  }

  /// 推送一个事件；订阅端已关闭时静默丢弃
  /// Push an event; silently dropped when the receiving side is gone
  pub fn emit(&self, event: QueueEvent) {
    if let Some(tx) = &self.tx {
      let _ = tx.send(event);
    }
  }
}

/// 创建事件通道，返回发送端与接收端
/// Create an event channel, returning the sink and the receiver
pub fn event_channel() -> (EventSink, mpsc::UnboundedReceiver<QueueEvent>) {
  let (tx, rx) = mpsc::unbounded_channel();
  (EventSink::new(tx), rx)
}
