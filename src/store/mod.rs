//! 作业存储模块
//! Job store module
//!
//! 定义了与作业存储后端交互的抽象层。存储独占地拥有作业记录：
//! 认领、完成、失败、取消全部经由此接口，其他组件不直接写入。
//! Defines the abstraction layer for interacting with the job storage
//! backend. The store exclusively owns job records: claim, complete,
//! fail and cancel all funnel through this interface; no other
//! component writes into its storage directly.

use crate::error::Result;
use crate::job::{Job, JobStatus, NewJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

mod memory;

pub use memory::MemoryStore;

/// 默认查询分页大小
/// Default query page size
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// 作业存储特性，定义了队列的全部操作
/// Job store trait, defines all queue operations
#[async_trait]
pub trait JobStore: Send + Sync {
  /// 提交新作业
  /// Submit a new job
  ///
  /// 先根据作业类型注册表校验载荷，校验失败的作业不会被持久化。
  /// 成功后状态为 Pending，`scheduled_for = max(now, requested)`。
  /// Validates the payload against the job type registry first; jobs
  /// failing validation are never persisted. On success the job is
  /// Pending with `scheduled_for = max(now, requested)`.
  async fn submit(&self, new_job: NewJob) -> Result<Job>;

  /// 为调用的 worker 原子地认领一个可分派的作业
  /// Atomically claim one dispatchable job for the calling worker
  ///
  /// 选择顺序：优先级降序，然后 `scheduled_for` 升序，最后创建顺序
  /// （FIFO 决胜）。同一作业绝不会同时交给两个认领者。
  /// Selection order: priority descending, then `scheduled_for`
  /// ascending, then creation order (FIFO tie-break). The same job is
  /// never handed to two concurrent claimants.
  async fn claim(&self, worker_id: &str) -> Result<Option<Job>>;

  /// 标记作业成功完成
  /// Mark a job as completed successfully
  ///
  /// 作业不存在或已处于终态时返回 `false`（信号而非错误）
  /// Returns `false` (a signal, not an error) if the job is missing or
  /// already terminal
  async fn complete(&self, job_id: &str, result: serde_json::Value) -> Result<bool>;

  /// 报告一次执行失败
  /// Report one execution failure
  ///
  /// 递增 attempts。未达 `max_retries` 时按退避策略计算延迟并转入
  /// Retrying；否则转入终态 Failed 并记录错误。
  /// Increments attempts. Below `max_retries` the retry delay is
  /// computed from the backoff policy and the job moves to Retrying;
  /// otherwise it moves to the terminal Failed state with the error
  /// recorded.
  async fn fail(&self, job_id: &str, error: &str) -> Result<bool>;

  /// 取消作业
  /// Cancel a job
  ///
  /// 仅当状态为 Pending、Retrying 或 Processing 时成功；
  /// 已处于终态时返回 `false` 且记录保持不变。
  /// Succeeds only from Pending, Retrying or Processing; returns
  /// `false` and leaves the record unchanged when already terminal.
  async fn cancel(&self, job_id: &str) -> Result<bool>;

  /// 以新作业形式重新提交一个失败作业
  /// Resubmit a failed job as a new job
  ///
  /// 终态记录保持不变；新作业通过 `retry_of` 指向原作业。
  /// The terminal record is untouched; the new job references the
  /// original via `retry_of`.
  async fn resubmit(&self, job_id: &str) -> Result<Job>;

  /// 收回租约过期的 Processing 作业
  /// Reclaim Processing jobs whose lease has expired
  ///
  /// 按可恢复失败处理（消耗一次 attempt），返回被收回的作业 id。
  /// Treated as a recoverable failure (consumes one attempt); returns
  /// the ids of the reclaimed jobs.
  async fn reap_stalled(&self) -> Result<Vec<String>>;

  /// 查询单个作业
  /// Look up a single job
  async fn get(&self, job_id: &str) -> Result<Option<Job>>;

  /// 按条件分页查询作业
  /// Query jobs by filter, paged
  async fn list(&self, filter: &JobFilter) -> Result<JobPage>;
}

/// 作业查询条件
/// Job query filter
#[derive(Debug, Clone)]
pub struct JobFilter {
  /// 按状态过滤，空表示全部
  /// Filter by status, empty means all
  pub statuses: Vec<JobStatus>,
  /// 按作业类型过滤，空表示全部
  /// Filter by job type, empty means all
  pub job_types: Vec<String>,
  /// 按租户过滤
  /// Filter by tenant
  pub tenant: Option<String>,
  /// 按来源调度过滤（调度历史查询）
  /// Filter by originating schedule (schedule history queries)
  pub schedule_id: Option<String>,
  /// 创建时间下界
  /// Lower bound on creation time
  pub from: Option<DateTime<Utc>>,
  /// 创建时间上界
  /// Upper bound on creation time
  pub to: Option<DateTime<Utc>>,
  /// 分页大小
  /// Page size
  pub limit: usize,
  /// 分页偏移
  /// Page offset
  pub offset: usize,
}

impl Default for JobFilter {
  fn default() -> Self {
    Self {
      statuses: Vec::new(),
      job_types: Vec::new(),
      tenant: None,
      schedule_id: None,
      from: None,
      to: None,
      limit: DEFAULT_PAGE_LIMIT,
      offset: 0,
    }
  }
}

impl JobFilter {
  /// 创建空过滤条件
  /// Create an empty filter
  pub fn new() -> Self {
    Self::default()
  }

  /// 按状态过滤
  /// Filter by status
  pub fn status(mut self, status: JobStatus) -> Self {
    self.statuses.push(status);
    self
  }

  /// 按作业类型过滤
  /// Filter by job type
  pub fn job_type<S: AsRef<str>>(mut self, job_type: S) -> Self {
    self.job_types.push(job_type.as_ref().to_string());
    self
  }

  /// 按租户过滤
  /// Filter by tenant
  pub fn tenant<S: AsRef<str>>(mut self, tenant: S) -> Self {
    self.tenant = Some(tenant.as_ref().to_string());
    self
  }

  /// 按来源调度过滤
  /// Filter by originating schedule
  pub fn schedule_id<S: AsRef<str>>(mut self, schedule_id: S) -> Self {
    self.schedule_id = Some(schedule_id.as_ref().to_string());
    self
  }

  /// 设置分页
  /// Set the page window
  pub fn page(mut self, limit: usize, offset: usize) -> Self {
    self.limit = limit;
    self.offset = offset;
    self
  }

  /// 检查作业是否匹配此过滤条件（不含分页）
  /// Check whether a job matches this filter (pagination aside)
  pub fn matches(&self, job: &Job) -> bool {
    if !self.statuses.is_empty() && !self.statuses.contains(&job.status) {
      return false;
    }
    if !self.job_types.is_empty() && !self.job_types.iter().any(|t| t == &job.job_type) {
      return false;
    }
    if let Some(tenant) = &self.tenant {
      if &job.tenant != tenant {
        return false;
      }
    }
    if let Some(schedule_id) = &self.schedule_id {
      if job.schedule_id.as_ref() != Some(schedule_id) {
        return false;
      }
    }
    if let Some(from) = self.from {
      if job.created_at < from {
        return false;
      }
    }
    if let Some(to) = self.to {
      if job.created_at > to {
        return false;
      }
    }
    true
  }
}

/// 一页作业查询结果
/// One page of job query results
#[derive(Debug, Clone)]
pub struct JobPage {
  /// 本页作业，按创建时间从新到旧
  /// Jobs on this page, newest first by creation time
  pub jobs: Vec<Job>,
  /// 匹配条件的总数（不受分页影响）
  /// Total number of matches (pagination aside)
  pub total: usize,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::job::{generate_job_id, DEFAULT_MAX_RETRIES, DEFAULT_PRIORITY};
  use serde_json::json;

  fn sample_job(job_type: &str, tenant: &str, status: JobStatus) -> Job {
    let now = Utc::now();
    Job {
      id: generate_job_id(),
      job_type: job_type.to_string(),
      tenant: tenant.to_string(),
      payload: json!({}),
      priority: DEFAULT_PRIORITY,
      status,
      attempts: 0,
      max_retries: DEFAULT_MAX_RETRIES,
      created_at: now,
      scheduled_for: now,
      updated_at: now,
      completed_at: None,
      failed_at: None,
      result: None,
      error: None,
      schedule_id: None,
      retry_of: None,
      worker_id: None,
      lease_expires_at: None,
    }
  }

  #[test]
  fn test_filter_matches_status_and_type() {
    let job = sample_job("email:send", "acme", JobStatus::Pending);

    assert!(JobFilter::new().matches(&job));
    assert!(JobFilter::new().status(JobStatus::Pending).matches(&job));
    assert!(!JobFilter::new().status(JobStatus::Failed).matches(&job));
    assert!(JobFilter::new().job_type("email:send").matches(&job));
    assert!(!JobFilter::new().job_type("sms:send").matches(&job));
  }

  #[test]
  fn test_filter_matches_tenant_and_schedule() {
    let mut job = sample_job("email:send", "acme", JobStatus::Pending);
    job.schedule_id = Some("sched-9".to_string());

    assert!(JobFilter::new().tenant("acme").matches(&job));
    assert!(!JobFilter::new().tenant("other").matches(&job));
    assert!(JobFilter::new().schedule_id("sched-9").matches(&job));
    assert!(!JobFilter::new().schedule_id("sched-1").matches(&job));
  }

  #[test]
  fn test_filter_date_window() {
    let job = sample_job("email:send", "acme", JobStatus::Pending);

    let mut filter = JobFilter::new();
    filter.from = Some(job.created_at - chrono::Duration::minutes(1));
    filter.to = Some(job.created_at + chrono::Duration::minutes(1));
    assert!(filter.matches(&job));

    filter.from = Some(job.created_at + chrono::Duration::minutes(1));
    assert!(!filter.matches(&job));
  }
}
