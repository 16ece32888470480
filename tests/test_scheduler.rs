//! 调度器行为测试
//! Scheduler behavior tests

use chrono::Utc;
use jobq::events::EventSink;
use jobq::registry::JobTypeRegistry;
use jobq::scheduler::{validate_cron_expression, NewSchedule, SchedulePatch, Scheduler};
use jobq::store::{JobFilter, JobStore, MemoryStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn scheduler_with_store() -> (Arc<Scheduler>, Arc<MemoryStore>) {
  let mut registry = JobTypeRegistry::new();
  registry.register_any("report.build");
  let store = Arc::new(MemoryStore::with_defaults(Arc::new(registry)));
  let scheduler = Arc::new(Scheduler::new(store.clone(), EventSink::disabled()));
  (scheduler, store)
}

/// 每秒触发一次的 cron（6 字段）
/// A cron firing every second (6 fields)
const EVERY_SECOND: &str = "* * * * * *";

#[tokio::test]
async fn test_create_schedule_computes_next_run() {
  let (scheduler, _) = scheduler_with_store();
  let schedule = scheduler
    .create_schedule(NewSchedule::new(
      "acme",
      "nightly-report",
      "report.build",
      "*/5 * * * *",
      json!({ "kind": "nightly" }),
    ))
    .await
    .unwrap();

  assert!(schedule.enabled);
  assert_eq!(schedule.current_runs, 0);
  // */5 的下一次触发必须落在接下来 5 分钟内
  // The next fire of */5 must land within the coming 5 minutes
  let next = schedule.next_run_at.unwrap();
  assert!(next > Utc::now());
  assert!(next <= Utc::now() + chrono::Duration::minutes(5));

  scheduler.shutdown().await;
}

#[tokio::test]
async fn test_create_schedule_invalid_cron_rejected() {
  let (scheduler, _) = scheduler_with_store();

  let bad_cron = scheduler
    .create_schedule(NewSchedule::new("acme", "s", "report.build", "banana", json!({})))
    .await;
  assert!(matches!(bad_cron, Err(jobq::Error::InvalidCronExpression { .. })));

  let bad_tz = scheduler
    .create_schedule(
      NewSchedule::new("acme", "s", "report.build", "*/5 * * * *", json!({}))
        .with_timezone("Pluto/Elsewhere"),
    )
    .await;
  assert!(matches!(bad_tz, Err(jobq::Error::InvalidTimezone { .. })));

  assert!(scheduler.list_schedules().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_schedule_fires_and_toggle_stops_it() {
  let (scheduler, store) = scheduler_with_store();
  let schedule = scheduler
    .create_schedule(NewSchedule::new(
      "acme",
      "ticker",
      "report.build",
      EVERY_SECOND,
      json!({}),
    ))
    .await
    .unwrap();

  // 等待至少两次触发
  // Wait for at least two fires
  sleep(Duration::from_millis(2600)).await;
  let fired = store
    .list(&JobFilter::new().schedule_id(&schedule.id))
    .await
    .unwrap()
    .total;
  assert!(fired >= 2, "expected at least 2 fires, got {fired}");

  // 停用后不再提交
  // No further submissions once disabled
  assert!(scheduler.toggle_schedule(&schedule.id, false).await.unwrap());
  sleep(Duration::from_millis(300)).await;
  let frozen = store
    .list(&JobFilter::new().schedule_id(&schedule.id))
    .await
    .unwrap()
    .total;
  let runs_after_toggle = scheduler.get_schedule(&schedule.id).await.unwrap().current_runs;
  sleep(Duration::from_millis(1500)).await;
  let still = store
    .list(&JobFilter::new().schedule_id(&schedule.id))
    .await
    .unwrap()
    .total;
  assert_eq!(frozen, still, "disabled schedule kept submitting");

  // current_runs 不受 toggle 影响
  // toggle leaves current_runs untouched
  let entry = scheduler.get_schedule(&schedule.id).await.unwrap();
  assert_eq!(entry.current_runs, runs_after_toggle);
  assert!(!entry.enabled);

  scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_max_runs_auto_disables() {
  let (scheduler, store) = scheduler_with_store();
  let schedule = scheduler
    .create_schedule(
      NewSchedule::new("acme", "bounded", "report.build", EVERY_SECOND, json!({}))
        .with_max_runs(3),
    )
    .await
    .unwrap();

  // 3 次触发加余量；之后必须自动停用且不再有第 4 个作业
  // 3 fires plus slack; afterwards it must be auto-disabled with no 4th job
  sleep(Duration::from_millis(5500)).await;

  let entry = scheduler.get_schedule(&schedule.id).await.unwrap();
  assert!(!entry.enabled, "schedule was not auto-disabled");
  assert_eq!(entry.current_runs, 3);

  let produced = store
    .list(&JobFilter::new().schedule_id(&schedule.id))
    .await
    .unwrap()
    .total;
  assert_eq!(produced, 3, "expected exactly 3 jobs, got {produced}");

  scheduler.shutdown().await;
}

#[tokio::test]
async fn test_trigger_is_independent_of_timer() {
  let (scheduler, _store) = scheduler_with_store();
  let schedule = scheduler
    .create_schedule(
      // 禁用状态下创建，定时器不运行
      // Created disabled, so no timer is running
      NewSchedule::new("acme", "manual", "report.build", "0 0 1 1 *", json!({ "via": "hand" }))
        .disabled(),
    )
    .await
    .unwrap();
  assert_eq!(scheduler.active_timers().await, 0);

  let job = scheduler.trigger(&schedule.id).await.unwrap().unwrap();
  assert_eq!(job.schedule_id.as_deref(), Some(schedule.id.as_str()));
  assert_eq!(job.payload, json!({ "via": "hand" }));

  scheduler.trigger(&schedule.id).await.unwrap().unwrap();

  let entry = scheduler.get_schedule(&schedule.id).await.unwrap();
  assert_eq!(entry.current_runs, 2);
  assert!(entry.last_run_at.is_some());

  let history = scheduler.history(&schedule.id, 10, 0).await.unwrap();
  assert_eq!(history.total, 2);

  // 不存在的调度返回空结果
  // A missing schedule yields an empty result
  assert!(scheduler.trigger("missing").await.unwrap().is_none());

  scheduler.shutdown().await;
}

#[tokio::test]
async fn test_update_restarts_timer_and_delete_stops_it() {
  let (scheduler, _) = scheduler_with_store();
  let schedule = scheduler
    .create_schedule(NewSchedule::new(
      "acme",
      "mutable",
      "report.build",
      "*/10 * * * *",
      json!({}),
    ))
    .await
    .unwrap();
  assert_eq!(scheduler.active_timers().await, 1);

  let updated = scheduler
    .update_schedule(
      &schedule.id,
      SchedulePatch {
        cron_expression: Some("*/20 * * * *".to_string()),
        name: Some("renamed".to_string()),
        ..Default::default()
      },
    )
    .await
    .unwrap()
    .unwrap();
  assert_eq!(updated.cron_expression, "*/20 * * * *");
  assert_eq!(updated.name, "renamed");
  assert_eq!(scheduler.active_timers().await, 1);

  // 无效补丁被拒绝且调度保持运行
  // An invalid patch is rejected and the schedule keeps running
  let invalid = scheduler
    .update_schedule(
      &schedule.id,
      SchedulePatch {
        cron_expression: Some("nope".to_string()),
        ..Default::default()
      },
    )
    .await;
  assert!(invalid.is_err());
  assert_eq!(scheduler.active_timers().await, 1);

  // 更新为禁用即停表
  // Updating to disabled stops the timer
  scheduler
    .update_schedule(
      &schedule.id,
      SchedulePatch {
        enabled: Some(false),
        ..Default::default()
      },
    )
    .await
    .unwrap()
    .unwrap();
  assert_eq!(scheduler.active_timers().await, 0);

  assert!(scheduler.delete_schedule(&schedule.id).await.unwrap());
  assert!(scheduler.get_schedule(&schedule.id).await.is_none());
  assert!(!scheduler.delete_schedule(&schedule.id).await.unwrap());

  // 更新不存在的调度返回空
  // Updating a missing schedule yields nothing
  let missing = scheduler
    .update_schedule("missing", SchedulePatch::default())
    .await
    .unwrap();
  assert!(missing.is_none());

  scheduler.shutdown().await;
}

#[tokio::test]
async fn test_restore_rebuilds_enabled_timers() {
  let (scheduler, _) = scheduler_with_store();
  let enabled = scheduler
    .create_schedule(NewSchedule::new("acme", "a", "report.build", "*/5 * * * *", json!({})))
    .await
    .unwrap();
  let disabled = scheduler
    .create_schedule(
      NewSchedule::new("acme", "b", "report.build", "*/5 * * * *", json!({})).disabled(),
    )
    .await
    .unwrap();
  scheduler.shutdown().await;

  // 以持久化记录重建一个新的调度器实例
  // Rebuild a fresh scheduler instance from the persisted records
  let (restored, _) = scheduler_with_store();
  restored
    .restore(vec![enabled.clone(), disabled.clone()])
    .await
    .unwrap();

  assert_eq!(restored.active_timers().await, 1);
  let entry = restored.get_schedule(&enabled.id).await.unwrap();
  assert!(entry.next_run_at.unwrap() > Utc::now() - chrono::Duration::seconds(1));
  assert!(restored.get_schedule(&disabled.id).await.unwrap().next_run_at.is_none());

  restored.shutdown().await;
}

#[tokio::test]
async fn test_validate_cron_preview_is_pure() {
  let preview = validate_cron_expression("*/5 * * * *", Some("UTC"), 4);
  assert!(preview.valid);
  assert_eq!(preview.next_fire_times.len(), 4);

  let first = preview.next_fire_times[0];
  assert!(first <= Utc::now() + chrono::Duration::minutes(5));

  let invalid = validate_cron_expression("61 * * * *", None, 4);
  assert!(!invalid.valid);
  assert!(invalid.error.is_some());
}
