//! 内存作业存储实现
//! In-memory job store implementation
//!
//! 使用内存数据结构实现 [`JobStore`]，不依赖任何外部服务。
//! 所有可分派作业保存在一个按（优先级降序、可分派时间升序、创建
//! 顺序升序）排序的索引中，认领在一次写锁区间内完成，保证同一作业
//! 绝不会交给两个并发认领者。
//! Implements [`JobStore`] using in-memory data structures without any
//! external service dependencies. All dispatchable jobs live in an
//! index ordered by (priority descending, dispatch time ascending,
//! creation order ascending); a claim happens inside one write-lock
//! section, so the same job is never handed to two concurrent
//! claimants.

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::events::{EventSink, QueueEvent};
use crate::job::{generate_job_id, Job, JobStatus, NewJob};
use crate::registry::JobTypeRegistry;
use crate::store::{JobFilter, JobPage, JobStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// 可分派索引的排序键
/// Ordering key of the dispatchable index
///
/// 字段顺序即排序顺序：`neg_priority` 升序等价于优先级降序，
/// 其后按可分派时间和创建序号升序。
/// Field order is sort order: ascending `neg_priority` equals
/// descending priority, followed by dispatch time and creation
/// sequence ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey {
  neg_priority: i32,
  scheduled_for_micros: i64,
  seq: u64,
}

impl ReadyKey {
  fn new(priority: i32, scheduled_for: DateTime<Utc>, seq: u64) -> Self {
    Self {
      neg_priority: -priority,
      scheduled_for_micros: scheduled_for.timestamp_micros(),
      seq,
    }
  }
}

/// 一次失败记录的结果
/// Outcome of recording one failure
enum FailOutcome {
  Retrying,
  Failed,
}

/// 内存存储
/// Memory storage
#[derive(Default)]
struct Storage {
  /// 全部作业记录
  /// All job records
  jobs: HashMap<String, Job>,
  /// 可分派作业索引（Pending 与 Retrying）
  /// Dispatchable job index (Pending and Retrying)
  ready: BTreeMap<ReadyKey, String>,
  /// 作业 id → 可分派索引键，用于取消时摘除
  /// Job id → dispatchable index key, for removal on cancel
  ready_index: HashMap<String, ReadyKey>,
  /// Processing 作业的租约过期时间
  /// Lease expiration times of Processing jobs
  leases: HashMap<String, DateTime<Utc>>,
  /// 作业 id → 创建序号（重入队时保留 FIFO 决胜）
  /// Job id → creation sequence (preserves the FIFO tie-break on requeue)
  seqs: HashMap<String, u64>,
}

impl Storage {
  /// 将作业加入可分派索引
  /// Insert a job into the dispatchable index
  fn push_ready(&mut self, job_id: &str, priority: i32, scheduled_for: DateTime<Utc>, seq: u64) {
    let key = ReadyKey::new(priority, scheduled_for, seq);
    self.ready.insert(key, job_id.to_string());
    self.ready_index.insert(job_id.to_string(), key);
  }

  /// 从可分派索引中摘除作业
  /// Remove a job from the dispatchable index
  fn remove_ready(&mut self, job_id: &str) {
    if let Some(key) = self.ready_index.remove(job_id) {
      self.ready.remove(&key);
    }
  }
}

/// 内存作业存储
/// In-memory job store
pub struct MemoryStore {
  registry: Arc<JobTypeRegistry>,
  config: QueueConfig,
  events: EventSink,
  storage: Arc<RwLock<Storage>>,
  seq: AtomicU64,
}

impl MemoryStore {
  /// 创建新的内存作业存储
  /// Create a new in-memory job store
  pub fn new(registry: Arc<JobTypeRegistry>, config: QueueConfig, events: EventSink) -> Self {
    Self {
      registry,
      config,
      events,
      storage: Arc::new(RwLock::new(Storage::default())),
      seq: AtomicU64::new(0),
    }
  }

  /// 使用默认配置并关闭事件投递
  /// Use the default configuration with event delivery disabled
  pub fn with_defaults(registry: Arc<JobTypeRegistry>) -> Self {
    Self::new(registry, QueueConfig::default(), EventSink::disabled())
  }

  /// 在持锁状态下记录一次失败
  /// Record one failure while the lock is held
  ///
  /// 调用者负责先移除租约并保证作业处于 Processing
  /// The caller removes the lease first and guarantees the job is Processing
  fn fail_locked(
    &self,
    storage: &mut Storage,
    job_id: &str,
    error: &str,
    now: DateTime<Utc>,
  ) -> Option<FailOutcome> {
    let seq = storage.seqs.get(job_id).copied().unwrap_or_default();
    let job = storage.jobs.get_mut(job_id)?;
    job.attempts += 1;
    job.error = Some(error.to_string());
    job.worker_id = None;
    job.lease_expires_at = None;
    job.updated_at = now;

    if job.attempts < job.max_retries {
      let delay = self.config.retry_policy.calculate_delay(job.attempts);
      let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(1));
      job.status = JobStatus::Retrying;
      job.scheduled_for = now + delay;
      let (priority, scheduled_for) = (job.priority, job.scheduled_for);
      storage.push_ready(job_id, priority, scheduled_for, seq);
      Some(FailOutcome::Retrying)
    } else {
      job.status = JobStatus::Failed;
      job.failed_at = Some(now);
      Some(FailOutcome::Failed)
    }
  }
}

#[async_trait]
impl JobStore for MemoryStore {
  /// 提交新作业
  /// Submit a new job
  async fn submit(&self, new_job: NewJob) -> Result<Job> {
    let priority = new_job.validated_priority()?;
    self.registry.validate(&new_job.job_type, &new_job.payload)?;

    let now = Utc::now();
    let scheduled_for = match new_job.scheduled_for {
      Some(when) if when > now => when,
      _ => now,
    };
    let job = Job {
      id: generate_job_id(),
      job_type: new_job.job_type,
      tenant: new_job.tenant,
      payload: new_job.payload,
      priority,
      status: JobStatus::Pending,
      attempts: 0,
      max_retries: new_job.max_retries.max(1),
      created_at: now,
      scheduled_for,
      updated_at: now,
      completed_at: None,
      failed_at: None,
      result: None,
      error: None,
      schedule_id: new_job.schedule_id,
      retry_of: new_job.retry_of,
      worker_id: None,
      lease_expires_at: None,
    };

    let seq = self.seq.fetch_add(1, Ordering::Relaxed);
    let mut storage = self.storage.write().await;
    storage.seqs.insert(job.id.clone(), seq);
    storage.push_ready(&job.id, job.priority, job.scheduled_for, seq);
    storage.jobs.insert(job.id.clone(), job.clone());
    drop(storage);

    self.events.emit(QueueEvent::JobSubmitted {
      job_id: job.id.clone(),
      job_type: job.job_type.clone(),
      tenant: job.tenant.clone(),
      timestamp: now,
    });
    Ok(job)
  }

  /// 原子地认领一个可分派作业
  /// Atomically claim one dispatchable job
  async fn claim(&self, worker_id: &str) -> Result<Option<Job>> {
    let now = Utc::now();
    let now_micros = now.timestamp_micros();
    let mut storage = self.storage.write().await;

    // 索引按优先级为主排序，高优先级的未来作业会排在低优先级的
    // 到期作业之前，因此需要跳过未到期条目继续扫描
    // The index is priority-major, so a high-priority future job sorts
    // before a low-priority due one; not-yet-due entries are skipped
    let selected = storage
      .ready
      .iter()
      .find(|(key, _)| key.scheduled_for_micros <= now_micros)
      .map(|(key, job_id)| (*key, job_id.clone()));

    let (key, job_id) = match selected {
      Some(entry) => entry,
      None => return Ok(None),
    };

    storage.ready.remove(&key);
    storage.ready_index.remove(&job_id);
    let lease_expires_at =
      now + chrono::Duration::from_std(self.config.lease_timeout).unwrap_or_else(|_| chrono::Duration::seconds(30));
    storage.leases.insert(job_id.clone(), lease_expires_at);

    let job = storage
      .jobs
      .get_mut(&job_id)
      .ok_or_else(|| Error::queue(format!("dispatchable index references missing job {job_id}")))?;
    job.status = JobStatus::Processing;
    job.worker_id = Some(worker_id.to_string());
    job.lease_expires_at = Some(lease_expires_at);
    job.updated_at = now;
    Ok(Some(job.clone()))
  }

  /// 标记作业成功完成
  /// Mark a job as completed successfully
  async fn complete(&self, job_id: &str, result: serde_json::Value) -> Result<bool> {
    let now = Utc::now();
    let mut storage = self.storage.write().await;
    let job = match storage.jobs.get_mut(job_id) {
      Some(job) if job.status == JobStatus::Processing => job,
      // 不存在、已终态或尚未认领：信号而非错误
      // Missing, already terminal or never claimed: a signal, not an error
      _ => return Ok(false),
    };
    job.status = JobStatus::Completed;
    job.result = Some(result);
    job.completed_at = Some(now);
    job.worker_id = None;
    job.lease_expires_at = None;
    job.updated_at = now;
    let (job_type, tenant) = (job.job_type.clone(), job.tenant.clone());
    storage.leases.remove(job_id);
    drop(storage);

    self.events.emit(QueueEvent::JobCompleted {
      job_id: job_id.to_string(),
      job_type,
      tenant,
      timestamp: now,
    });
    Ok(true)
  }

  /// 报告一次执行失败
  /// Report one execution failure
  async fn fail(&self, job_id: &str, error: &str) -> Result<bool> {
    let now = Utc::now();
    let mut storage = self.storage.write().await;
    match storage.jobs.get(job_id) {
      Some(job) if job.status == JobStatus::Processing => {}
      _ => return Ok(false),
    }
    storage.leases.remove(job_id);
    let outcome = match self.fail_locked(&mut storage, job_id, error, now) {
      Some(outcome) => outcome,
      None => return Ok(false),
    };
    let event = storage.jobs.get(job_id).map(|job| QueueEvent::JobFailed {
      job_id: job_id.to_string(),
      job_type: job.job_type.clone(),
      tenant: job.tenant.clone(),
      error: error.to_string(),
      terminal: matches!(outcome, FailOutcome::Failed),
      timestamp: now,
    });
    drop(storage);

    if let Some(event) = event {
      self.events.emit(event);
    }
    Ok(true)
  }

  /// 取消作业
  /// Cancel a job
  async fn cancel(&self, job_id: &str) -> Result<bool> {
    let now = Utc::now();
    let mut storage = self.storage.write().await;
    let status = match storage.jobs.get(job_id) {
      Some(job) => job.status,
      None => return Ok(false),
    };
    match status {
      JobStatus::Pending | JobStatus::Retrying => storage.remove_ready(job_id),
      JobStatus::Processing => {
        storage.leases.remove(job_id);
      }
      // 终态记录保持不变
      // Terminal records are left unchanged
      JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => return Ok(false),
    }
    if let Some(job) = storage.jobs.get_mut(job_id) {
      job.status = JobStatus::Cancelled;
      job.worker_id = None;
      job.lease_expires_at = None;
      job.updated_at = now;
    }
    drop(storage);

    self.events.emit(QueueEvent::JobCancelled {
      job_id: job_id.to_string(),
      timestamp: now,
    });
    Ok(true)
  }

  /// 以新作业形式重新提交一个失败作业
  /// Resubmit a failed job as a new job
  async fn resubmit(&self, job_id: &str) -> Result<Job> {
    let original = {
      let storage = self.storage.read().await;
      match storage.jobs.get(job_id) {
        Some(job) => job.clone(),
        None => {
          return Err(Error::JobNotFound {
            id: job_id.to_string(),
          })
        }
      }
    };
    if original.status != JobStatus::Failed {
      return Err(Error::queue(format!(
        "job {job_id} is {} and only failed jobs can be resubmitted",
        original.status
      )));
    }

    // 载荷在首次提交时已通过校验；直接沿用原参数构建新记录
    // The payload was validated on first submission; the new record is
    // built from the original parameters directly
    let mut new_job = NewJob::new(&original.tenant, &original.job_type, original.payload.clone())?
      .with_priority(original.priority)
      .with_max_retries(original.max_retries);
    new_job.schedule_id = original.schedule_id.clone();
    new_job.retry_of = Some(original.id.clone());
    self.submit(new_job).await
  }

  /// 收回租约过期的 Processing 作业
  /// Reclaim Processing jobs whose lease has expired
  async fn reap_stalled(&self) -> Result<Vec<String>> {
    let now = Utc::now();
    let mut storage = self.storage.write().await;
    let expired: Vec<String> = storage
      .leases
      .iter()
      .filter(|(_, lease)| **lease <= now)
      .map(|(job_id, _)| job_id.clone())
      .collect();

    let mut events = Vec::with_capacity(expired.len());
    for job_id in &expired {
      storage.leases.remove(job_id);
      let worker_id = storage
        .jobs
        .get(job_id)
        .and_then(|job| job.worker_id.clone())
        .unwrap_or_default();
      let outcome = self.fail_locked(&mut storage, job_id, "claim lease expired", now);
      events.push(QueueEvent::JobStalled {
        job_id: job_id.clone(),
        worker_id,
        timestamp: now,
      });
      if let Some(FailOutcome::Failed) = outcome {
        if let Some(job) = storage.jobs.get(job_id) {
          events.push(QueueEvent::JobFailed {
            job_id: job_id.clone(),
            job_type: job.job_type.clone(),
            tenant: job.tenant.clone(),
            error: "claim lease expired".to_string(),
            terminal: true,
            timestamp: now,
          });
        }
      }
    }
    drop(storage);

    for event in events {
      self.events.emit(event);
    }
    Ok(expired)
  }

  /// 查询单个作业
  /// Look up a single job
  async fn get(&self, job_id: &str) -> Result<Option<Job>> {
    let storage = self.storage.read().await;
    Ok(storage.jobs.get(job_id).cloned())
  }

  /// 按条件分页查询作业
  /// Query jobs by filter, paged
  async fn list(&self, filter: &JobFilter) -> Result<JobPage> {
    let storage = self.storage.read().await;
    let mut matched: Vec<&Job> = storage.jobs.values().filter(|job| filter.matches(job)).collect();
    // 从新到旧，创建序号决胜保证稳定
    // Newest first; the creation sequence keeps the order stable
    matched.sort_by(|a, b| {
      b.created_at.cmp(&a.created_at).then_with(|| {
        let sa = storage.seqs.get(&a.id).copied().unwrap_or_default();
        let sb = storage.seqs.get(&b.id).copied().unwrap_or_default();
        sb.cmp(&sa)
      })
    });
    let total = matched.len();
    let jobs = matched
      .into_iter()
      .skip(filter.offset)
      .take(filter.limit)
      .cloned()
      .collect();
    Ok(JobPage { jobs, total })
  }
}
