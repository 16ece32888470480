//! 作业类型注册表模块
//! Job type registry module
//!
//! 提供两张按作业类型名称索引的查找表：
//! Provides two lookup tables keyed by job type name:
//!
//! - [`JobTypeRegistry`]：类型名称 → 载荷校验模式，提交时消费
//!   - [`JobTypeRegistry`]: type name → payload validation schema, consumed at submission time
//! - [`HandlerRegistry`]：类型名称 → 执行处理器，由工作池消费
//!   - [`HandlerRegistry`]: type name → execution handler, consumed by the worker pool
//!
//! 处理器本身（通知发送、支付处理等）是外部协作者，核心只负责分派。
//! The handlers themselves (notification senders, payment processors, ...)
//! are external collaborators; the core only dispatches to them.
//!
//! ## 示例 / Example
//!
//! ```rust,no_run
//! use jobq::registry::{HandlerRegistry, JobTypeRegistry};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct SendEmail {
//!     to: String,
//!     subject: String,
//! }
//!
//! let mut types = JobTypeRegistry::new();
//! types.register::<SendEmail>("email:send");
//!
//! let mut handlers = HandlerRegistry::new();
//! handlers.register_fn("email:send", |job| async move {
//!     println!("sending email for job {}", job.id);
//!     Ok(serde_json::json!({ "delivered": true }))
//! });
//! ```

use crate::error::{Error, Result};
use crate::job::Job;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type ValidateFn = Box<dyn Fn(&serde_json::Value) -> std::result::Result<(), String> + Send + Sync>;

/// 已注册作业类型的载荷模式
/// Payload schema of a registered job type
struct PayloadSchema {
  validate: ValidateFn,
}

/// 作业类型注册表
/// Job type registry
///
/// 将作业类型名称映射到载荷校验模式。每次提交都会查询此表；
/// 未注册的类型和未通过校验的载荷在持久化之前即被拒绝。
/// Maps a job type name to a payload validation schema. Every submission
/// consults this table; unregistered types and payloads failing validation
/// are rejected before anything is persisted.
#[derive(Default)]
pub struct JobTypeRegistry {
  schemas: HashMap<String, PayloadSchema>,
}

impl JobTypeRegistry {
  /// 创建空注册表
  /// Create an empty registry
  pub fn new() -> Self {
    Self::default()
  }

  /// 注册一个作业类型，载荷必须能反序列化为 `P`
  /// Register a job type whose payload must deserialize into `P`
  pub fn register<P: DeserializeOwned + 'static>(&mut self, job_type: &str) -> &mut Self {
    let validate: ValidateFn = Box::new(|payload: &serde_json::Value| {
      serde_json::from_value::<P>(payload.clone())
        .map(|_| ())
        .map_err(|e| e.to_string())
    });
    self
      .schemas
      .insert(job_type.to_string(), PayloadSchema { validate });
    self
  }

  /// 注册一个使用自定义校验函数的作业类型
  /// Register a job type with a custom validation function
  pub fn register_with<F>(&mut self, job_type: &str, validate: F) -> &mut Self
  where
    F: Fn(&serde_json::Value) -> std::result::Result<(), String> + Send + Sync + 'static,
  {
    self.schemas.insert(
      job_type.to_string(),
      PayloadSchema {
        validate: Box::new(validate),
      },
    );
    self
  }

  /// 注册一个接受任意 JSON 载荷的作业类型
  /// Register a job type accepting any JSON payload
  pub fn register_any(&mut self, job_type: &str) -> &mut Self {
    self.register_with(job_type, |_| Ok(()))
  }

  /// 校验载荷
  /// Validate a payload
  ///
  /// 失败时返回 [`Error::UnknownJobType`] 或 [`Error::InvalidPayload`]
  /// Fails with [`Error::UnknownJobType`] or [`Error::InvalidPayload`]
  pub fn validate(&self, job_type: &str, payload: &serde_json::Value) -> Result<()> {
    let schema = self.schemas.get(job_type).ok_or_else(|| Error::UnknownJobType {
      job_type: job_type.to_string(),
    })?;
    (schema.validate)(payload).map_err(|reason| Error::invalid_payload(job_type, reason))
  }

  /// 检查作业类型是否已注册
  /// Check whether a job type is registered
  pub fn contains(&self, job_type: &str) -> bool {
    self.schemas.contains_key(job_type)
  }

  /// 已注册的类型数量
  /// Number of registered types
  pub fn len(&self) -> usize {
    self.schemas.len()
  }

  /// 检查是否为空
  /// Check if empty
  pub fn is_empty(&self) -> bool {
    self.schemas.is_empty()
  }

  /// 所有已注册的类型名称
  /// All registered type names
  pub fn job_types(&self) -> Vec<&str> {
    self.schemas.keys().map(String::as_str).collect()
  }
}

impl fmt::Debug for JobTypeRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("JobTypeRegistry")
      .field("job_types", &self.schemas.keys().collect::<Vec<_>>())
      .finish()
  }
}

/// 作业执行处理器特性
/// Job execution handler trait
#[async_trait]
pub trait JobHandler: Send + Sync {
  /// 执行作业，返回记录到作业记录中的结果
  /// Execute the job, returning the result recorded on the job record
  async fn execute(&self, job: Job) -> Result<serde_json::Value>;
}

/// 异步函数式处理器适配器
/// Asynchronous functional handler adapter
struct HandlerFn<F> {
  func: F,
}

#[async_trait]
impl<F, Fut> JobHandler for HandlerFn<F>
where
  F: Fn(Job) -> Fut + Send + Sync,
  Fut: Future<Output = Result<serde_json::Value>> + Send,
{
  async fn execute(&self, job: Job) -> Result<serde_json::Value> {
    (self.func)(job).await
  }
}

/// 执行处理器注册表
/// Execution handler registry
///
/// 工作池据此将已认领的作业分派到对应处理器
/// The worker pool uses this to dispatch claimed jobs to their handlers
#[derive(Default)]
pub struct HandlerRegistry {
  handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
  /// 创建空注册表
  /// Create an empty registry
  pub fn new() -> Self {
    Self::default()
  }

  /// 注册处理器实例
  /// Register a handler instance
  pub fn register<H>(&mut self, job_type: &str, handler: H) -> &mut Self
  where
    H: JobHandler + 'static,
  {
    self.handlers.insert(job_type.to_string(), Arc::new(handler));
    self
  }

  /// 注册异步处理函数
  /// Register an asynchronous handler function
  pub fn register_fn<F, Fut>(&mut self, job_type: &str, func: F) -> &mut Self
  where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
  {
    self.register(job_type, HandlerFn { func })
  }

  /// 查找作业类型对应的处理器
  /// Look up the handler for a job type
  pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
    self.handlers.get(job_type).cloned()
  }

  /// 检查作业类型是否有处理器
  /// Check whether a job type has a handler
  pub fn contains(&self, job_type: &str) -> bool {
    self.handlers.contains_key(job_type)
  }

  /// 已注册的处理器数量
  /// Number of registered handlers
  pub fn len(&self) -> usize {
    self.handlers.len()
  }

  /// 检查是否为空
  /// Check if empty
  pub fn is_empty(&self) -> bool {
    self.handlers.is_empty()
  }
}

impl fmt::Debug for HandlerRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HandlerRegistry")
      .field("job_types", &self.handlers.keys().collect::<Vec<_>>())
      .finish()
  }
}
