//! # 周期性作业调度器（Scheduler）
//! # Periodic Job Scheduler (Scheduler)
//!
//! 该模块实现了基于 cron 表达式的周期性作业提交。每个启用的调度
//! 对应一个独占的定时器任务；所有定时器的启动与停止都经由调度器
//! 完成，保证同一调度 id 永远不会有两个定时器同时运行。
//! This module implements cron-based periodic job submission. Every
//! enabled schedule owns exactly one timer task; all timer starts and
//! stops go through the scheduler, guaranteeing that two timers never
//! run concurrently for the same schedule id.
//!
//! 调度触发与临时提交共用同一条入队路径，工作池与重试退避对两者
//! 一视同仁。
//! Scheduled and ad-hoc submissions share one enqueue path, so the
//! worker pool and retry/backoff logic apply uniformly to both.

use crate::error::{Error, Result};
use crate::events::{EventSink, QueueEvent};
use crate::job::{Job, NewJob};
use crate::store::{JobFilter, JobPage, JobStore};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// 默认时区
/// Default timezone
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// 周期性调度定义
/// Periodic schedule definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
  /// 调度唯一标识
  /// Unique schedule identifier
  pub id: String,
  /// 调度名称
  /// Schedule name
  pub name: String,
  /// 产生的作业类型
  /// Job type produced
  pub job_type: String,
  /// cron 表达式（5 至 7 字段）
  /// cron expression (5 to 7 fields)
  pub cron_expression: String,
  /// IANA 时区名称
  /// IANA timezone name
  pub timezone: String,
  /// 作业载荷模板
  /// Job payload template
  pub payload: serde_json::Value,
  /// 租户标识
  /// Tenant identifier
  pub tenant: String,
  /// 是否启用
  /// Whether enabled
  pub enabled: bool,
  /// 最大触发次数，达到后自动停用
  /// Maximum number of runs; auto-disabled once reached
  pub max_runs: Option<u32>,
  /// 已触发次数
  /// Number of runs so far
  pub current_runs: u32,
  /// 下次触发时间
  /// Next fire time
  pub next_run_at: Option<DateTime<Utc>>,
  /// 上次触发时间
  /// Last fire time
  pub last_run_at: Option<DateTime<Utc>>,
  /// 标签
  /// Tags
  pub tags: Vec<String>,
  /// 创建时间
  /// Creation time
  pub created_at: DateTime<Utc>,
  /// 最后更新时间
  /// Last update time
  pub updated_at: DateTime<Utc>,
}

/// 新调度的创建参数
/// Creation parameters for a new schedule
#[derive(Debug, Clone)]
pub struct NewSchedule {
  /// 租户标识
  /// Tenant identifier
  pub tenant: String,
  /// 调度名称
  /// Schedule name
  pub name: String,
  /// 产生的作业类型
  /// Job type produced
  pub job_type: String,
  /// cron 表达式
  /// cron expression
  pub cron_expression: String,
  /// IANA 时区名称
  /// IANA timezone name
  pub timezone: String,
  /// 作业载荷模板
  /// Job payload template
  pub payload: serde_json::Value,
  /// 是否启用
  /// Whether enabled
  pub enabled: bool,
  /// 最大触发次数
  /// Maximum number of runs
  pub max_runs: Option<u32>,
  /// 标签
  /// Tags
  pub tags: Vec<String>,
}

impl NewSchedule {
  /// 创建新的调度参数
  /// Create new schedule parameters
  pub fn new<T: AsRef<str>, N: AsRef<str>, J: AsRef<str>, C: AsRef<str>>(
    tenant: T,
    name: N,
    job_type: J,
    cron_expression: C,
    payload: serde_json::Value,
  ) -> Self {
    Self {
      tenant: tenant.as_ref().to_string(),
      name: name.as_ref().to_string(),
      job_type: job_type.as_ref().to_string(),
      cron_expression: cron_expression.as_ref().to_string(),
      timezone: DEFAULT_TIMEZONE.to_string(),
      payload,
      enabled: true,
      max_runs: None,
      tags: Vec::new(),
    }
  }

  /// 设置时区
  /// Set the timezone
  pub fn with_timezone<S: AsRef<str>>(mut self, timezone: S) -> Self {
    self.timezone = timezone.as_ref().to_string();
    self
  }

  /// 设置最大触发次数
  /// Set the maximum number of runs
  pub fn with_max_runs(mut self, max_runs: u32) -> Self {
    self.max_runs = Some(max_runs);
    self
  }

  /// 设置标签
  /// Set the tags
  pub fn with_tags(mut self, tags: Vec<String>) -> Self {
    self.tags = tags;
    self
  }

  /// 创建为停用状态
  /// Create in the disabled state
  pub fn disabled(mut self) -> Self {
    self.enabled = false;
    self
  }
}

/// 调度更新补丁；`None` 字段保持原值
/// Schedule update patch; `None` fields keep their current value
#[derive(Debug, Clone, Default)]
pub struct SchedulePatch {
  /// 新名称
  /// New name
  pub name: Option<String>,
  /// 新作业类型
  /// New job type
  pub job_type: Option<String>,
  /// 新 cron 表达式
  /// New cron expression
  pub cron_expression: Option<String>,
  /// 新时区
  /// New timezone
  pub timezone: Option<String>,
  /// 新载荷模板
  /// New payload template
  pub payload: Option<serde_json::Value>,
  /// 新启用状态
  /// New enabled state
  pub enabled: Option<bool>,
  /// 新最大触发次数
  /// New maximum number of runs
  pub max_runs: Option<u32>,
  /// 新标签
  /// New tags
  pub tags: Option<Vec<String>>,
}

/// cron 表达式校验结果与预览
/// cron expression validation result and preview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronPreview {
  /// 表达式是否有效
  /// Whether the expression is valid
  pub valid: bool,
  /// 无效时的原因
  /// Reason when invalid
  pub error: Option<String>,
  /// 接下来的 K 个触发时间
  /// Next K fire times
  pub next_fire_times: Vec<DateTime<Utc>>,
}

/// 归一化 cron 表达式
/// Normalize a cron expression
///
/// 标准的 5 字段表达式通过前置秒字段归一化；6/7 字段原样接受
/// Standard 5-field expressions are normalized by prepending a seconds
/// field; 6/7-field forms are accepted as-is
fn normalize_cron(expression: &str) -> Result<String> {
  let trimmed = expression.trim();
  match trimmed.split_whitespace().count() {
    5 => Ok(format!("0 {trimmed}")),
    6 | 7 => Ok(trimmed.to_string()),
    n => Err(Error::InvalidCronExpression {
      expression: expression.to_string(),
      reason: format!("expected 5 to 7 fields, got {n}"),
    }),
  }
}

/// 解析 cron 表达式
/// Parse a cron expression
fn parse_cron(expression: &str) -> Result<cron::Schedule> {
  let normalized = normalize_cron(expression)?;
  cron::Schedule::from_str(&normalized).map_err(|e| Error::InvalidCronExpression {
    expression: expression.to_string(),
    reason: e.to_string(),
  })
}

/// 解析 IANA 时区名称
/// Parse an IANA timezone name
fn parse_timezone(timezone: &str) -> Result<Tz> {
  timezone.parse::<Tz>().map_err(|_| Error::InvalidTimezone {
    timezone: timezone.to_string(),
  })
}

/// 计算 `after` 之后的下一次触发时间
/// Compute the next fire time after `after`
fn next_fire(schedule: &cron::Schedule, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
  schedule
    .after(&after.with_timezone(&tz))
    .next()
    .map(|dt| dt.with_timezone(&Utc))
}

/// 校验 cron 表达式并预览接下来的 K 个触发时间
/// Validate a cron expression and preview its next K fire times
///
/// 纯函数，无副作用，供界面预览使用
/// A pure function with no side effects, intended for UI previews
pub fn validate_cron_expression(expression: &str, timezone: Option<&str>, k: usize) -> CronPreview {
  let tz = match parse_timezone(timezone.unwrap_or(DEFAULT_TIMEZONE)) {
    Ok(tz) => tz,
    Err(e) => {
      return CronPreview {
        valid: false,
        error: Some(e.to_string()),
        next_fire_times: Vec::new(),
      }
    }
  };
  match parse_cron(expression) {
    Ok(schedule) => CronPreview {
      valid: true,
      error: None,
      next_fire_times: schedule
        .after(&Utc::now().with_timezone(&tz))
        .take(k)
        .map(|dt| dt.with_timezone(&Utc))
        .collect(),
    },
    Err(e) => CronPreview {
      valid: false,
      error: Some(e.to_string()),
      next_fire_times: Vec::new(),
    },
  }
}

/// 周期性作业调度器
/// Periodic job scheduler
pub struct Scheduler {
  store: Arc<dyn JobStore>,
  events: EventSink,
  /// 调度记录（id → Schedule），调度器是唯一写入者
  /// Schedule records (id → Schedule); the scheduler is the sole writer
  entries: Arc<RwLock<HashMap<String, Schedule>>>,
  /// 活跃定时器句柄（id → 任务句柄）
  /// Active timer handles (id → task handle)
  timers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl Scheduler {
  /// 创建新的调度器
  /// Create a new scheduler
  pub fn new(store: Arc<dyn JobStore>, events: EventSink) -> Self {
    Self {
      store,
      events,
      entries: Arc::new(RwLock::new(HashMap::new())),
      timers: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// 从持久化记录重建调度器状态
  /// Rebuild scheduler state from persisted records
  ///
  /// 为每个启用的记录重新计算 `next_run_at` 并启动定时器
  /// Recomputes `next_run_at` and starts a timer for every enabled record
  pub async fn restore(&self, schedules: Vec<Schedule>) -> Result<()> {
    for mut schedule in schedules {
      let cron = parse_cron(&schedule.cron_expression)?;
      let tz = parse_timezone(&schedule.timezone)?;
      schedule.next_run_at = if schedule.enabled {
        next_fire(&cron, tz, Utc::now())
      } else {
        None
      };
      let id = schedule.id.clone();
      let enabled = schedule.enabled;
      self.entries.write().await.insert(id.clone(), schedule);
      if enabled {
        self.start_timer(&id).await;
      }
    }
    Ok(())
  }

  /// 创建调度
  /// Create a schedule
  ///
  /// cron 表达式或时区无效时失败，记录不会被保存
  /// Fails on an invalid cron expression or timezone; nothing is persisted
  pub async fn create_schedule(&self, new_schedule: NewSchedule) -> Result<Schedule> {
    let cron = parse_cron(&new_schedule.cron_expression)?;
    let tz = parse_timezone(&new_schedule.timezone)?;
    let now = Utc::now();
    let schedule = Schedule {
      id: Uuid::new_v4().to_string(),
      name: new_schedule.name,
      job_type: new_schedule.job_type,
      cron_expression: new_schedule.cron_expression,
      timezone: new_schedule.timezone,
      payload: new_schedule.payload,
      tenant: new_schedule.tenant,
      enabled: new_schedule.enabled,
      max_runs: new_schedule.max_runs,
      current_runs: 0,
      next_run_at: if new_schedule.enabled {
        next_fire(&cron, tz, now)
      } else {
        None
      },
      last_run_at: None,
      tags: new_schedule.tags,
      created_at: now,
      updated_at: now,
    };

    self
      .entries
      .write()
      .await
      .insert(schedule.id.clone(), schedule.clone());
    if schedule.enabled {
      self.start_timer(&schedule.id).await;
    }
    Ok(schedule)
  }

  /// 更新调度
  /// Update a schedule
  ///
  /// 应用变更前先停止现有定时器，更新后仍启用则重启，
  /// 同一调度 id 永远不会有两个定时器并行
  /// Stops the existing timer before applying changes, restarting it if
  /// still enabled afterwards. Two timers never run concurrently for
  /// one schedule id.
  pub async fn update_schedule(&self, id: &str, patch: SchedulePatch) -> Result<Option<Schedule>> {
    // 先校验再停定时器，无效补丁不应中断运行中的调度
    // Validate before stopping the timer; an invalid patch must not
    // interrupt a running schedule
    if let Some(expression) = &patch.cron_expression {
      parse_cron(expression)?;
    }
    if let Some(timezone) = &patch.timezone {
      parse_timezone(timezone)?;
    }

    self.stop_timer(id).await;

    let updated = {
      let mut entries = self.entries.write().await;
      let Some(entry) = entries.get_mut(id) else {
        return Ok(None);
      };
      if let Some(name) = patch.name {
        entry.name = name;
      }
      if let Some(job_type) = patch.job_type {
        entry.job_type = job_type;
      }
      if let Some(cron_expression) = patch.cron_expression {
        entry.cron_expression = cron_expression;
      }
      if let Some(timezone) = patch.timezone {
        entry.timezone = timezone;
      }
      if let Some(payload) = patch.payload {
        entry.payload = payload;
      }
      if let Some(enabled) = patch.enabled {
        entry.enabled = enabled;
      }
      if let Some(max_runs) = patch.max_runs {
        entry.max_runs = Some(max_runs);
      }
      if let Some(tags) = patch.tags {
        entry.tags = tags;
      }
      entry.updated_at = Utc::now();
      entry.next_run_at = if entry.enabled {
        let cron = parse_cron(&entry.cron_expression)?;
        let tz = parse_timezone(&entry.timezone)?;
        next_fire(&cron, tz, Utc::now())
      } else {
        None
      };
      entry.clone()
    };

    if updated.enabled {
      self.start_timer(id).await;
    }
    Ok(Some(updated))
  }

  /// 启用或停用调度
  /// Enable or disable a schedule
  ///
  /// 只影响定时器，不改动 `current_runs`
  /// Affects the timer only; `current_runs` is untouched
  pub async fn toggle_schedule(&self, id: &str, enabled: bool) -> Result<bool> {
    let next_run = {
      let mut entries = self.entries.write().await;
      let Some(entry) = entries.get_mut(id) else {
        return Ok(false);
      };
      entry.enabled = enabled;
      entry.updated_at = Utc::now();
      if enabled {
        let cron = parse_cron(&entry.cron_expression)?;
        let tz = parse_timezone(&entry.timezone)?;
        entry.next_run_at = next_fire(&cron, tz, Utc::now());
      } else {
        entry.next_run_at = None;
      }
      entry.next_run_at
    };

    if enabled {
      self.start_timer(id).await;
      tracing::debug!("schedule {} enabled, next run at {:?}", id, next_run);
    } else {
      self.stop_timer(id).await;
      tracing::debug!("schedule {} disabled", id);
    }
    Ok(true)
  }

  /// 删除调度
  /// Delete a schedule
  pub async fn delete_schedule(&self, id: &str) -> Result<bool> {
    self.stop_timer(id).await;
    Ok(self.entries.write().await.remove(id).is_some())
  }

  /// 手动触发调度
  /// Trigger a schedule manually
  ///
  /// 立即提交一个作业，独立于定时器，同样计入 `current_runs`
  /// Submits a job immediately, independent of the timer, and still
  /// counts toward `current_runs`
  pub async fn trigger(&self, id: &str) -> Result<Option<Job>> {
    let entry = {
      let entries = self.entries.read().await;
      match entries.get(id) {
        Some(entry) => entry.clone(),
        None => return Ok(None),
      }
    };

    let job = self
      .store
      .submit(
        NewJob::new(&entry.tenant, &entry.job_type, entry.payload.clone())?.with_schedule_id(id),
      )
      .await?;

    let now = Utc::now();
    {
      let mut entries = self.entries.write().await;
      if let Some(entry) = entries.get_mut(id) {
        entry.current_runs += 1;
        entry.last_run_at = Some(now);
        entry.updated_at = now;
      }
    }

    self.events.emit(QueueEvent::ScheduleFired {
      schedule_id: id.to_string(),
      job_id: job.id.clone(),
      timestamp: now,
    });
    Ok(Some(job))
  }

  /// 查询单个调度
  /// Look up a single schedule
  pub async fn get_schedule(&self, id: &str) -> Option<Schedule> {
    self.entries.read().await.get(id).cloned()
  }

  /// 列出全部调度，按创建时间排序
  /// List all schedules, ordered by creation time
  pub async fn list_schedules(&self) -> Vec<Schedule> {
    let entries = self.entries.read().await;
    let mut schedules: Vec<Schedule> = entries.values().cloned().collect();
    schedules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    schedules
  }

  /// 查询调度产生的作业历史
  /// Query the history of jobs produced by a schedule
  pub async fn history(&self, id: &str, limit: usize, offset: usize) -> Result<JobPage> {
    self
      .store
      .list(&JobFilter::new().schedule_id(id).page(limit, offset))
      .await
  }

  /// 关闭调度器，停止所有定时器
  /// Shut the scheduler down, stopping all timers
  pub async fn shutdown(&self) {
    let mut timers = self.timers.lock().await;
    for (_, handle) in timers.drain() {
      handle.abort();
    }
  }

  /// 当前活跃定时器数量
  /// Current number of active timers
  pub async fn active_timers(&self) -> usize {
    let mut timers = self.timers.lock().await;
    timers.retain(|_, handle| !handle.is_finished());
    timers.len()
  }

  /// 启动调度的定时器，先停止可能存在的旧定时器
  /// Start the timer for a schedule, stopping any previous one first
  async fn start_timer(&self, id: &str) {
    let mut timers = self.timers.lock().await;
    if let Some(handle) = timers.remove(id) {
      handle.abort();
    }
    timers.insert(id.to_string(), self.spawn_timer(id.to_string()));
  }

  /// 停止调度的定时器
  /// Stop the timer for a schedule
  async fn stop_timer(&self, id: &str) {
    let mut timers = self.timers.lock().await;
    if let Some(handle) = timers.remove(id) {
      handle.abort();
    }
  }

  /// 定时器任务主循环
  /// Timer task main loop
  fn spawn_timer(&self, id: String) -> JoinHandle<()> {
    let entries = Arc::clone(&self.entries);
    let store = Arc::clone(&self.store);
    let events = self.events.clone();

    tokio::spawn(async move {
      loop {
        // 计算下一次触发时间并写回
        // Compute the next fire time and write it back
        let next = {
          let mut guard = entries.write().await;
          let Some(entry) = guard.get_mut(&id) else { break };
          if !entry.enabled {
            break;
          }
          let parsed = parse_cron(&entry.cron_expression)
            .and_then(|cron| Ok((cron, parse_timezone(&entry.timezone)?)));
          let (cron, tz) = match parsed {
            Ok(pair) => pair,
            Err(e) => {
              // 存量记录在创建/更新时已校验，这里只可能是数据损坏
              // Stored records were validated at create/update time, so
              // this can only be data corruption
              tracing::error!("schedule {}: stored definition no longer parses: {}", id, e);
              break;
            }
          };
          match next_fire(&cron, tz, Utc::now()) {
            Some(next) => {
              entry.next_run_at = Some(next);
              next
            }
            None => {
              // cron 不再产生触发时间（如指定年份已过）
              // The cron yields no further fire times (e.g. a past year)
              tracing::warn!("schedule {}: no upcoming fire times, disabling", id);
              entry.enabled = false;
              entry.next_run_at = None;
              break;
            }
          }
        };

        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        // 触发：重新检查启用状态与 max_runs
        // Fire: re-check the enabled state and max_runs
        let due = {
          let mut guard = entries.write().await;
          let Some(entry) = guard.get_mut(&id) else { break };
          if !entry.enabled {
            break;
          }
          if let Some(max_runs) = entry.max_runs {
            if entry.current_runs >= max_runs {
              entry.enabled = false;
              entry.next_run_at = None;
              entry.updated_at = Utc::now();
              tracing::info!(
                "schedule {} reached max_runs ({}), auto-disabled",
                id,
                max_runs
              );
              break;
            }
          }
          (entry.tenant.clone(), entry.job_type.clone(), entry.payload.clone())
        };

        let (tenant, job_type, payload) = due;
        let submitted = match NewJob::new(&tenant, &job_type, payload) {
          Ok(new_job) => store.submit(new_job.with_schedule_id(&id)).await,
          Err(e) => Err(e),
        };

        let now = Utc::now();
        match submitted {
          Ok(job) => {
            let mut guard = entries.write().await;
            let reached_max = if let Some(entry) = guard.get_mut(&id) {
              entry.current_runs += 1;
              entry.last_run_at = Some(now);
              entry.updated_at = now;
              entry
                .max_runs
                .map(|max_runs| entry.current_runs >= max_runs)
                .unwrap_or(false)
            } else {
              true
            };
            drop(guard);

            events.emit(QueueEvent::ScheduleFired {
              schedule_id: id.clone(),
              job_id: job.id,
              timestamp: now,
            });

            if reached_max {
              let mut guard = entries.write().await;
              if let Some(entry) = guard.get_mut(&id) {
                entry.enabled = false;
                entry.next_run_at = None;
                entry.updated_at = now;
                tracing::info!("schedule {} reached max_runs, auto-disabled", id);
              }
              break;
            }
          }
          Err(e) => {
            // 提交失败不终止定时器，下个周期重试
            // A failed submission does not kill the timer; retried next period
            tracing::error!("schedule {}: submission failed: {}", id, e);
          }
        }
      }
    })
  }
}
