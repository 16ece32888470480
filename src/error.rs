//! 错误处理模块
//! Error handling module
//!
//! 定义了 Jobq 库中使用的各种错误类型
//! Defines various error types used in the Jobq library

use thiserror::Error;

/// Jobq 库的结果类型
/// Result type for the Jobq library
pub type Result<T> = std::result::Result<T, Error>;

/// Jobq 错误类型
/// Jobq error type
#[derive(Error, Debug)]
pub enum Error {
  /// 未注册的作业类型
  /// Unknown job type
  #[error("Unknown job type: {job_type}")]
  UnknownJobType { job_type: String },

  /// 载荷未通过注册表的模式校验
  /// Payload failed the registered schema validation
  #[error("Invalid payload for job type {job_type}: {reason}")]
  InvalidPayload { job_type: String, reason: String },

  /// 无效的 cron 表达式
  /// Invalid cron expression
  #[error("Invalid cron expression {expression:?}: {reason}")]
  InvalidCronExpression { expression: String, reason: String },

  /// 无效的时区名称
  /// Invalid timezone name
  #[error("Invalid timezone: {timezone}")]
  InvalidTimezone { timezone: String },

  /// 无效的优先级
  /// Invalid priority
  #[error("Invalid priority: {priority} (expected 1..=20)")]
  InvalidPriority { priority: i32 },

  /// 作业未找到错误
  /// Job not found error
  #[error("Job not found: {id}")]
  JobNotFound { id: String },

  /// 调度未找到错误
  /// Schedule not found error
  #[error("Schedule not found: {id}")]
  ScheduleNotFound { id: String },

  /// 队列错误
  /// Queue error
  #[error("Queue error: {message}")]
  Queue { message: String },

  /// 幂等缓存后端错误
  /// Idempotency cache backend error
  #[error("Idempotency cache error: {message}")]
  Cache { message: String },

  /// 序列化错误
  /// Serialization error
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// 配置错误
  /// Configuration error
  #[error("Configuration error: {message}")]
  Config { message: String },

  /// 组件已关闭
  /// Component shut down
  #[error("Component shut down")]
  Shutdown,

  /// 超时错误
  /// Timeout error
  #[error("Operation timeout")]
  Timeout,

  /// 其他错误
  /// Other error
  #[error("Other error: {message}")]
  Other { message: String },
}

impl Error {
  /// 创建队列错误
  /// Create a queue error
  pub fn queue<S: Into<String>>(message: S) -> Self {
    Self::Queue {
      message: message.into(),
    }
  }

  /// 创建幂等缓存错误
  /// Create an idempotency cache error
  pub fn cache<S: Into<String>>(message: S) -> Self {
    Self::Cache {
      message: message.into(),
    }
  }

  /// 创建配置错误
  /// Create a configuration error
  pub fn config<S: Into<String>>(message: S) -> Self {
    Self::Config {
      message: message.into(),
    }
  }

  /// 创建其他错误
  /// Create another type of error
  pub fn other<S: Into<String>>(message: S) -> Self {
    Self::Other {
      message: message.into(),
    }
  }

  /// 创建无效载荷错误
  /// Create an invalid payload error
  pub fn invalid_payload<T: Into<String>, R: Into<String>>(job_type: T, reason: R) -> Self {
    Self::InvalidPayload {
      job_type: job_type.into(),
      reason: reason.into(),
    }
  }

  /// 检查是否为校验错误（提交时同步拒绝，不持久化、不重试）
  /// Check whether the error is a validation error (rejected synchronously
  /// at submission time, never persisted, never retried)
  pub fn is_validation(&self) -> bool {
    matches!(
      self,
      Error::UnknownJobType { .. }
        | Error::InvalidPayload { .. }
        | Error::InvalidCronExpression { .. }
        | Error::InvalidTimezone { .. }
        | Error::InvalidPriority { .. }
    )
  }
}
