//! 作业存储的队列语义测试
//! Queue semantics tests for the job store

use jobq::backoff::RetryPolicy;
use jobq::config::QueueConfig;
use jobq::events::EventSink;
use jobq::job::{JobStatus, NewJob};
use jobq::registry::JobTypeRegistry;
use jobq::store::{JobFilter, JobStore, MemoryStore};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn store_with_policy(policy: RetryPolicy) -> Arc<MemoryStore> {
  let mut registry = JobTypeRegistry::new();
  registry.register_any("test:job");
  Arc::new(MemoryStore::new(
    Arc::new(registry),
    QueueConfig::new().retry_policy(policy),
    EventSink::disabled(),
  ))
}

fn test_store() -> Arc<MemoryStore> {
  store_with_policy(RetryPolicy::default_exponential())
}

#[tokio::test]
async fn test_submitted_job_is_pending() {
  let store = test_store();
  let job = store
    .submit(NewJob::new("acme", "test:job", json!({ "k": "v" })).unwrap())
    .await
    .unwrap();
  assert_eq!(job.status, JobStatus::Pending);
  assert_eq!(job.attempts, 0);
  assert!(job.result.is_none());
  assert!(job.error.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_claim_no_double_delivery() {
  const JOBS: usize = 50;
  const CLAIMERS: usize = 8;

  let store = test_store();
  for _ in 0..JOBS {
    store
      .submit(NewJob::new("acme", "test:job", json!({})).unwrap())
      .await
      .unwrap();
  }

  // N 个并发认领者把队列认领到空，总认领数必须等于作业数且无重复
  // N concurrent claimers drain the queue; the total number of claims
  // must equal the number of jobs, with no duplicates
  let mut handles = Vec::new();
  for claimer in 0..CLAIMERS {
    let store = store.clone();
    handles.push(tokio::spawn(async move {
      let worker_id = format!("worker-{claimer}");
      let mut claimed = Vec::new();
      loop {
        match store.claim(&worker_id).await.unwrap() {
          Some(job) => claimed.push(job.id),
          None => break,
        }
      }
      claimed
    }));
  }

  let mut all = Vec::new();
  for handle in handles {
    all.extend(handle.await.unwrap());
  }

  assert_eq!(all.len(), JOBS, "sum of claims must equal number of jobs");
  let unique: HashSet<&String> = all.iter().collect();
  assert_eq!(unique.len(), JOBS, "a job id was delivered twice");
}

#[tokio::test]
async fn test_attempts_increase_and_fail_exactly_at_max() {
  let store = store_with_policy(RetryPolicy::Fixed(Duration::from_millis(0)));
  let job = store
    .submit(NewJob::new("acme", "test:job", json!({})).unwrap().with_max_retries(5))
    .await
    .unwrap();

  for expected_attempts in 1..=5 {
    let claimed = store.claim("w1").await.unwrap().unwrap();
    assert_eq!(claimed.id, job.id);
    assert!(store.fail(&job.id, "transient failure").await.unwrap());

    let current = store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(current.attempts, expected_attempts);
    if expected_attempts < 5 {
      // 未到上限前不是终态
      // Not terminal before the limit
      assert_eq!(current.status, JobStatus::Retrying);
    } else {
      // 恰好在 attempts == max_retries 时转入 Failed
      // Moves to Failed exactly when attempts == max_retries
      assert_eq!(current.status, JobStatus::Failed);
    }
  }
}

#[tokio::test]
async fn test_retry_delay_pushes_scheduled_for_forward() {
  let store = store_with_policy(RetryPolicy::Fixed(Duration::from_secs(60)));
  let job = store
    .submit(NewJob::new("acme", "test:job", json!({})).unwrap().with_max_retries(3))
    .await
    .unwrap();

  store.claim("w1").await.unwrap().unwrap();
  store.fail(&job.id, "boom").await.unwrap();

  let retrying = store.get(&job.id).await.unwrap().unwrap();
  assert_eq!(retrying.status, JobStatus::Retrying);
  assert!(retrying.scheduled_for > retrying.created_at);

  // 退避期内不可认领
  // Not claimable during the backoff window
  assert!(store.claim("w1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancel_pending_and_terminal() {
  let store = test_store();

  let pending = store
    .submit(NewJob::new("acme", "test:job", json!({})).unwrap())
    .await
    .unwrap();
  assert!(store.cancel(&pending.id).await.unwrap());
  let cancelled = store.get(&pending.id).await.unwrap().unwrap();
  assert_eq!(cancelled.status, JobStatus::Cancelled);

  let done = store
    .submit(NewJob::new("acme", "test:job", json!({})).unwrap())
    .await
    .unwrap();
  store.claim("w1").await.unwrap().unwrap();
  store.complete(&done.id, json!({ "ok": true })).await.unwrap();

  let before = store.get(&done.id).await.unwrap().unwrap();
  assert!(!store.cancel(&done.id).await.unwrap());
  let after = store.get(&done.id).await.unwrap().unwrap();
  assert_eq!(before, after, "cancel on a terminal job must leave it unchanged");
}

#[tokio::test]
async fn test_double_complete_signals_already_terminal() {
  let store = test_store();
  let job = store
    .submit(NewJob::new("acme", "test:job", json!({})).unwrap())
    .await
    .unwrap();
  store.claim("w1").await.unwrap().unwrap();

  assert!(store.complete(&job.id, json!(1)).await.unwrap());
  assert!(!store.complete(&job.id, json!(2)).await.unwrap());
  assert!(!store.fail(&job.id, "late failure").await.unwrap());

  let record = store.get(&job.id).await.unwrap().unwrap();
  assert_eq!(record.result, Some(json!(1)));
  assert!(record.error.is_none());
}

#[tokio::test]
async fn test_dispatch_order_priority_then_time_then_fifo() {
  let store = test_store();

  let low_first = store
    .submit(NewJob::new("acme", "test:job", json!({})).unwrap().with_priority(3))
    .await
    .unwrap();
  let low_second = store
    .submit(NewJob::new("acme", "test:job", json!({})).unwrap().with_priority(3))
    .await
    .unwrap();
  let high = store
    .submit(NewJob::new("acme", "test:job", json!({})).unwrap().with_priority(18))
    .await
    .unwrap();

  // 优先级优先，同优先级按提交顺序
  // Priority first, then submission order within a priority
  assert_eq!(store.claim("w").await.unwrap().unwrap().id, high.id);
  assert_eq!(store.claim("w").await.unwrap().unwrap().id, low_first.id);
  assert_eq!(store.claim("w").await.unwrap().unwrap().id, low_second.id);
}

#[tokio::test]
async fn test_invalid_submissions_rejected() {
  let mut registry = JobTypeRegistry::new();
  registry.register_with("strict:job", |payload| {
    payload
      .get("must_have")
      .map(|_| ())
      .ok_or_else(|| "missing field `must_have`".to_string())
  });
  let store = MemoryStore::with_defaults(Arc::new(registry));

  let unknown = store
    .submit(NewJob::new("acme", "no:such:type", json!({})).unwrap())
    .await;
  assert!(matches!(unknown, Err(jobq::Error::UnknownJobType { .. })));

  let invalid = store
    .submit(NewJob::new("acme", "strict:job", json!({ "other": 1 })).unwrap())
    .await;
  assert!(matches!(invalid, Err(jobq::Error::InvalidPayload { .. })));

  let out_of_range = store
    .submit(NewJob::new("acme", "strict:job", json!({ "must_have": 1 })).unwrap().with_priority(99))
    .await;
  assert!(matches!(out_of_range, Err(jobq::Error::InvalidPriority { .. })));

  // 被拒绝的提交不会留下任何记录
  // Rejected submissions leave no record behind
  let page = store.list(&JobFilter::new()).await.unwrap();
  assert_eq!(page.total, 0);
}

#[tokio::test]
async fn test_list_by_tenant_and_status() {
  let store = test_store();
  for tenant in ["acme", "acme", "globex"] {
    store
      .submit(NewJob::new(tenant, "test:job", json!({})).unwrap())
      .await
      .unwrap();
  }
  store.claim("w1").await.unwrap().unwrap();

  let acme = store.list(&JobFilter::new().tenant("acme")).await.unwrap();
  assert_eq!(acme.total, 2);

  let processing = store
    .list(&JobFilter::new().status(JobStatus::Processing))
    .await
    .unwrap();
  assert_eq!(processing.total, 1);

  let pending = store
    .list(&JobFilter::new().status(JobStatus::Pending))
    .await
    .unwrap();
  assert_eq!(pending.total, 2);
}
