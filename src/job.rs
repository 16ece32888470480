//! 作业模块
//! Job module
//!
//! 定义了作业相关的数据结构和功能
//! Defines data structures and functions related to jobs

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 最小优先级
/// Minimum priority
pub const MIN_PRIORITY: i32 = 1;

/// 最大优先级
/// Maximum priority
pub const MAX_PRIORITY: i32 = 20;

/// 默认优先级（区间中点）
/// Default priority (midpoint of the range)
pub const DEFAULT_PRIORITY: i32 = 10;

/// 默认最大重试次数
/// Default maximum retry attempts
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// 作业状态
/// Job status
///
/// 状态机：`Pending → Processing → {Completed | Failed}`，
/// 可恢复失败时 `Processing → Retrying → Pending`，
/// 显式取消时 `Pending | Retrying | Processing → Cancelled`。
/// State machine: `Pending → Processing → {Completed | Failed}`,
/// `Processing → Retrying → Pending` on a recoverable failure, and
/// `Pending | Retrying | Processing → Cancelled` on explicit cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
  /// 等待分派
  /// Waiting for dispatch
  Pending,
  /// 已被某个 worker 认领，正在执行
  /// Claimed by a worker and executing
  Processing,
  /// 失败后等待退避期结束
  /// Failed, waiting out the backoff delay
  Retrying,
  /// 成功结束（终态）
  /// Finished successfully (terminal)
  Completed,
  /// 重试耗尽后失败（终态）
  /// Failed after retries were exhausted (terminal)
  Failed,
  /// 已取消（终态）
  /// Cancelled (terminal)
  Cancelled,
}

impl JobStatus {
  /// 转换为字符串
  /// Convert to string
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Processing => "processing",
      Self::Retrying => "retrying",
      Self::Completed => "completed",
      Self::Failed => "failed",
      Self::Cancelled => "cancelled",
    }
  }

  /// 是否为终态
  /// Whether the status is terminal
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
  }
}

impl fmt::Display for JobStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for JobStatus {
  type Err = ();

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s {
      "pending" => Ok(Self::Pending),
      "processing" => Ok(Self::Processing),
      "retrying" => Ok(Self::Retrying),
      "completed" => Ok(Self::Completed),
      "failed" => Ok(Self::Failed),
      "cancelled" => Ok(Self::Cancelled),
      _ => Err(()),
    }
  }
}

/// 表示一个异步工作单元的作业记录
/// A job record representing one unit of asynchronous work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
  /// 作业唯一标识符，创建后不可变
  /// Unique job identifier, immutable once created
  pub id: String,
  /// 作业类型名称（作业类型注册表中的键）
  /// Job type name (a key into the job type registry)
  pub job_type: String,
  /// 租户标识
  /// Tenant identifier
  pub tenant: String,
  /// 作业载荷，已通过类型对应的模式校验
  /// Job payload, validated against the schema registered for the type
  pub payload: serde_json::Value,
  /// 优先级，越大越紧急
  /// Priority, higher is more urgent
  pub priority: i32,
  /// 作业状态
  /// Job status
  pub status: JobStatus,
  /// 已执行次数
  /// Number of execution attempts so far
  pub attempts: i32,
  /// 最大执行次数
  /// Maximum number of execution attempts
  pub max_retries: i32,
  /// 创建时间
  /// Creation time
  pub created_at: DateTime<Utc>,
  /// 最早可分派时间
  /// Earliest eligible dispatch time
  pub scheduled_for: DateTime<Utc>,
  /// 最后更新时间
  /// Last update time
  pub updated_at: DateTime<Utc>,
  /// 完成时间
  /// Completion time
  pub completed_at: Option<DateTime<Utc>>,
  /// 终态失败时间
  /// Terminal failure time
  pub failed_at: Option<DateTime<Utc>>,
  /// 执行结果
  /// Execution result
  pub result: Option<serde_json::Value>,
  /// 最后一次失败的错误信息
  /// Error message from the last failure
  pub error: Option<String>,
  /// 产生此作业的调度 id（由调度器提交时设置）
  /// Id of the schedule that produced this job (set on scheduler submissions)
  pub schedule_id: Option<String>,
  /// 手动重试谱系：此作业重新提交自哪个失败作业
  /// Manual retry lineage: the failed job this one was resubmitted from
  pub retry_of: Option<String>,
  /// 认领该作业的 worker 标识（Processing 期间有效）
  /// Identifier of the claiming worker (valid while Processing)
  pub worker_id: Option<String>,
  /// 认领租约的过期时间（Processing 期间有效）
  /// Claim lease expiration time (valid while Processing)
  pub lease_expires_at: Option<DateTime<Utc>>,
}

/// 新作业的提交参数
/// Submission parameters for a new job
#[derive(Debug, Clone)]
pub struct NewJob {
  /// 租户标识
  /// Tenant identifier
  pub tenant: String,
  /// 作业类型名称
  /// Job type name
  pub job_type: String,
  /// 作业载荷
  /// Job payload
  pub payload: serde_json::Value,
  /// 优先级，缺省为区间中点
  /// Priority, defaults to the midpoint of the range
  pub priority: i32,
  /// 最早可分派时间，缺省为立即
  /// Earliest eligible dispatch time, defaults to immediately
  pub scheduled_for: Option<DateTime<Utc>>,
  /// 最大执行次数
  /// Maximum number of execution attempts
  pub max_retries: i32,
  /// 产生此作业的调度 id
  /// Id of the schedule producing this job
  pub schedule_id: Option<String>,
  /// 手动重试谱系
  /// Manual retry lineage
  pub retry_of: Option<String>,
}

impl NewJob {
  /// 创建新的提交参数
  /// Create new submission parameters
  pub fn new<T: AsRef<str>, J: AsRef<str>>(
    tenant: T,
    job_type: J,
    payload: serde_json::Value,
  ) -> Result<Self> {
    let job_type = job_type.as_ref();
    if job_type.trim().is_empty() {
      return Err(Error::UnknownJobType {
        job_type: job_type.to_string(),
      });
    }
    Ok(Self {
      tenant: tenant.as_ref().to_string(),
      job_type: job_type.to_string(),
      payload,
      priority: DEFAULT_PRIORITY,
      scheduled_for: None,
      max_retries: DEFAULT_MAX_RETRIES,
      schedule_id: None,
      retry_of: None,
    })
  }

  /// 设置优先级
  /// Set the priority
  pub fn with_priority(mut self, priority: i32) -> Self {
    self.priority = priority;
    self
  }

  /// 设置最早可分派时间
  /// Set the earliest eligible dispatch time
  pub fn with_scheduled_for(mut self, when: DateTime<Utc>) -> Self {
    self.scheduled_for = Some(when);
    self
  }

  /// 设置相对延迟
  /// Set a relative delay
  pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
    self.scheduled_for =
      Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero()));
    self
  }

  /// 设置最大执行次数
  /// Set the maximum number of execution attempts
  pub fn with_max_retries(mut self, max_retries: i32) -> Self {
    self.max_retries = max_retries.max(1);
    self
  }

  /// 设置调度来源
  /// Set the schedule provenance
  pub fn with_schedule_id<S: AsRef<str>>(mut self, schedule_id: S) -> Self {
    self.schedule_id = Some(schedule_id.as_ref().to_string());
    self
  }

  /// 校验并钳制优先级到允许区间
  /// Validate and clamp the priority into the allowed range
  pub fn validated_priority(&self) -> Result<i32> {
    if self.priority < MIN_PRIORITY || self.priority > MAX_PRIORITY {
      return Err(Error::InvalidPriority {
        priority: self.priority,
      });
    }
    Ok(self.priority)
  }
}

/// 生成作业 ID
/// Generate a job ID
pub fn generate_job_id() -> String {
  Uuid::new_v4().to_string()
}
