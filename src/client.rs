//! 客户端模块
//! Client module
//!
//! 面向调用方的门面：变更请求先经过幂等缓存去重，再进入作业存储。
//! 传输层（REST、gRPC 等）在此之上自行搭建；本模块只依赖已认证的
//! 调用方身份（租户）。
//! The caller-facing facade: mutating requests pass through the
//! idempotency cache before reaching the job store. Transport layers
//! (REST, gRPC, ...) are built on top of this; the module only assumes
//! an already-authenticated caller identity (the tenant).

use crate::config::IdempotencyConfig;
use crate::error::Result;
use crate::events::{EventSink, QueueEvent};
use crate::idempotency::IdempotencyCache;
use crate::job::{Job, NewJob, DEFAULT_MAX_RETRIES, DEFAULT_PRIORITY};
use crate::store::{JobFilter, JobPage, JobStore};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;

/// 创建成功的等效状态码
/// Status code equivalent of a successful creation
const STATUS_CREATED: u16 = 201;

/// 作业提交请求
/// Job submission request
#[derive(Debug, Clone)]
pub struct SubmitRequest {
  /// 租户标识
  /// Tenant identifier
  pub tenant: String,
  /// 作业类型
  /// Job type
  pub job_type: String,
  /// 作业载荷
  /// Job payload
  pub payload: serde_json::Value,
  /// 优先级
  /// Priority
  pub priority: Option<i32>,
  /// 最早可分派时间
  /// Earliest eligible dispatch time
  pub scheduled_for: Option<DateTime<Utc>>,
  /// 最大执行次数
  /// Maximum number of execution attempts
  pub max_retries: Option<i32>,
  /// 调用方提供的幂等键，作用域为租户
  /// Caller-supplied idempotency key, scoped to the tenant
  pub idempotency_key: Option<String>,
}

impl SubmitRequest {
  /// 创建新的提交请求
  /// Create a new submission request
  pub fn new<T: AsRef<str>, J: AsRef<str>>(
    tenant: T,
    job_type: J,
    payload: serde_json::Value,
  ) -> Self {
    Self {
      tenant: tenant.as_ref().to_string(),
      job_type: job_type.as_ref().to_string(),
      payload,
      priority: None,
      scheduled_for: None,
      max_retries: None,
      idempotency_key: None,
    }
  }

  /// 设置优先级
  /// Set the priority
  pub fn with_priority(mut self, priority: i32) -> Self {
    self.priority = Some(priority);
    self
  }

  /// 设置最早可分派时间
  /// Set the earliest eligible dispatch time
  pub fn with_scheduled_for(mut self, when: DateTime<Utc>) -> Self {
    self.scheduled_for = Some(when);
    self
  }

  /// 设置最大执行次数
  /// Set the maximum number of execution attempts
  pub fn with_max_retries(mut self, max_retries: i32) -> Self {
    self.max_retries = Some(max_retries);
    self
  }

  /// 设置幂等键
  /// Set the idempotency key
  pub fn with_idempotency_key<S: AsRef<str>>(mut self, key: S) -> Self {
    self.idempotency_key = Some(key.as_ref().to_string());
    self
  }
}

/// 提交响应
/// Submission response
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitResponse {
  /// 等效状态码
  /// Status code equivalent
  pub status_code: u16,
  /// 响应体；重放时与首次响应逐字节一致
  /// Response body; byte-identical to the first response on replay
  pub body: serde_json::Value,
  /// 是否来自幂等缓存重放
  /// Whether this was replayed from the idempotency cache
  pub replayed: bool,
}

/// Jobq 客户端，负责提交与查询作业
/// Jobq client, responsible for submitting and querying jobs
pub struct Client {
  store: Arc<dyn JobStore>,
  cache: Arc<dyn IdempotencyCache>,
  events: EventSink,
  config: IdempotencyConfig,
}

impl Client {
  /// 创建新的客户端实例
  /// Create a new client instance
  pub fn new(
    store: Arc<dyn JobStore>,
    cache: Arc<dyn IdempotencyCache>,
    events: EventSink,
    config: IdempotencyConfig,
  ) -> Self {
    Self {
      store,
      cache,
      events,
      config,
    }
  }

  /// 提交作业
  /// Submit a job
  ///
  /// 携带幂等键的请求在 TTL 窗口内重复提交时，返回首次提交的响应
  /// 而不重复执行副作用。缓存后端故障按放行处理并记录警告。
  /// A request carrying an idempotency key that repeats within the TTL
  /// window returns the first submission's response without re-running
  /// side effects. Cache backend failures fail open with a warning.
  pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse> {
    if let Some(key) = &request.idempotency_key {
      match self.cache.check(&request.tenant, key).await {
        Ok(Some(cached)) => {
          self.events.emit(QueueEvent::IdempotencyHit {
            tenant: request.tenant.clone(),
            timestamp: Utc::now(),
          });
          return Ok(SubmitResponse {
            status_code: cached.status_code,
            body: cached.body,
            replayed: true,
          });
        }
        Ok(None) => {
          self.events.emit(QueueEvent::IdempotencyMiss {
            tenant: request.tenant.clone(),
            timestamp: Utc::now(),
          });
        }
        Err(e) => {
          // 放行：幂等性是尽力而为的安全网，不阻塞业务流程
          // Fail open: idempotency is a best-effort safety net and
          // never blocks the business flow
          tracing::warn!("idempotency check failed, proceeding without dedupe: {}", e);
        }
      }
    }

    let mut new_job = NewJob::new(&request.tenant, &request.job_type, request.payload.clone())?
      .with_priority(request.priority.unwrap_or(DEFAULT_PRIORITY))
      .with_max_retries(request.max_retries.unwrap_or(DEFAULT_MAX_RETRIES));
    if let Some(when) = request.scheduled_for {
      new_job = new_job.with_scheduled_for(when);
    }

    let job = self.store.submit(new_job).await?;
    let body = submission_body(&job);

    if let Some(key) = &request.idempotency_key {
      if let Err(e) = self
        .cache
        .record(
          &request.tenant,
          key,
          STATUS_CREATED,
          body.clone(),
          self.config.ttl,
        )
        .await
      {
        tracing::warn!("failed to record idempotency outcome: {}", e);
      }
    }

    Ok(SubmitResponse {
      status_code: STATUS_CREATED,
      body,
      replayed: false,
    })
  }

  /// 查询单个作业的完整记录
  /// Look up the full record of a single job
  pub async fn job(&self, id: &str) -> Result<Option<Job>> {
    self.store.get(id).await
  }

  /// 按条件分页查询作业
  /// Query jobs by filter, paged
  pub async fn jobs(&self, filter: &JobFilter) -> Result<JobPage> {
    self.store.list(filter).await
  }

  /// 取消作业
  /// Cancel a job
  pub async fn cancel(&self, id: &str) -> Result<bool> {
    self.store.cancel(id).await
  }

  /// 以新作业形式重试一个失败作业
  /// Retry a failed job as a new job
  pub async fn resubmit(&self, id: &str) -> Result<Job> {
    self.store.resubmit(id).await
  }
}

/// 提交成功的响应体
/// Response body of a successful submission
fn submission_body(job: &Job) -> serde_json::Value {
  json!({
    "id": job.id,
    "type": job.job_type,
    "status": job.status,
    "priority": job.priority,
    "scheduledFor": job.scheduled_for,
    "createdAt": job.created_at,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::idempotency::{MemoryIdempotencyCache, NoopIdempotencyCache};
  use crate::registry::JobTypeRegistry;
  use crate::store::MemoryStore;
  use serde_json::json;

  fn test_client(cache: Arc<dyn IdempotencyCache>) -> (Client, Arc<MemoryStore>) {
    let mut registry = JobTypeRegistry::new();
    registry.register_any("notification.send");
    let store = Arc::new(MemoryStore::with_defaults(Arc::new(registry)));
    let client = Client::new(
      store.clone(),
      cache,
      EventSink::disabled(),
      IdempotencyConfig::default(),
    );
    (client, store)
  }

  #[tokio::test]
  async fn test_submit_returns_created_body() {
    let (client, _) = test_client(Arc::new(NoopIdempotencyCache::new()));
    let response = client
      .submit(SubmitRequest::new("acme", "notification.send", json!({ "to": "x" })).with_priority(12))
      .await
      .unwrap();

    assert_eq!(response.status_code, 201);
    assert!(!response.replayed);
    assert_eq!(response.body["type"], "notification.send");
    assert_eq!(response.body["status"], "pending");
    assert_eq!(response.body["priority"], 12);
  }

  #[tokio::test]
  async fn test_duplicate_submission_replays_first_response() {
    let (client, store) = test_client(Arc::new(MemoryIdempotencyCache::new()));
    let request = SubmitRequest::new("acme", "notification.send", json!({ "n": 1 }))
      .with_idempotency_key("req-1");

    let first = client.submit(request.clone()).await.unwrap();
    let second = client.submit(request).await.unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.body, second.body);
    assert_eq!(first.status_code, second.status_code);

    // 只产生一个作业
    // Exactly one job was produced
    let page = store.list(&JobFilter::new()).await.unwrap();
    assert_eq!(page.total, 1);
  }

  #[tokio::test]
  async fn test_different_keys_produce_distinct_jobs() {
    let (client, store) = test_client(Arc::new(MemoryIdempotencyCache::new()));
    for key in ["k1", "k2"] {
      client
        .submit(
          SubmitRequest::new("acme", "notification.send", json!({}))
            .with_idempotency_key(key),
        )
        .await
        .unwrap();
    }
    assert_eq!(store.list(&JobFilter::new()).await.unwrap().total, 2);
  }

  #[tokio::test]
  async fn test_validation_error_not_cached() {
    let (client, store) = test_client(Arc::new(MemoryIdempotencyCache::new()));
    let bad = SubmitRequest::new("acme", "unknown.type", json!({})).with_idempotency_key("req-9");
    assert!(client.submit(bad.clone()).await.is_err());
    // 失败的请求不写缓存，也不持久化作业
    // A failed request caches nothing and persists no job
    assert!(client.submit(bad).await.is_err());
    assert_eq!(store.list(&JobFilter::new()).await.unwrap().total, 0);
  }
}
