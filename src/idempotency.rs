//! 幂等缓存模块
//! Idempotency cache module
//!
//! 按（租户、调用方幂等键）对变更请求去重。首次请求的结果被缓存，
//! TTL 内相同键的重复请求原样返回缓存结果，不再触发业务副作用，
//! 即重试客户端请求的"至多一次副作用"保证。
//! Deduplicates mutating requests by (tenant, caller idempotency key).
//! The outcome of the first request is cached; a repeated request with
//! the same key within the TTL returns the stored outcome verbatim
//! without re-invoking business logic. This is the at-most-one-side-
//! effect guarantee for retried client requests.
//!
//! 缓存后端不可用时按"放行"处理：调用流程视同无缓存记录继续，
//! 并记录一条警告。幂等是尽力而为的安全网，不是系统其余部分依赖
//! 的正确性条件。
//! When the cache backend is unavailable the flow fails open: callers
//! proceed as though no record existed, and a warning is logged.
//! Idempotency is a best-effort safety net, not a correctness
//! requirement the rest of the system depends on.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// 缓存的请求结果
/// Cached request outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
  /// 首次请求的状态码
  /// Status code of the first request
  pub status_code: u16,
  /// 首次请求的响应体，原样返回
  /// Response body of the first request, returned verbatim
  pub body: serde_json::Value,
  /// 记录创建时间
  /// Record creation time
  pub created_at: DateTime<Utc>,
  /// 记录过期时间
  /// Record expiration time
  pub expires_at: DateTime<Utc>,
}

/// 幂等缓存特性
/// Idempotency cache trait
///
/// 两个实现：真实缓存 [`MemoryIdempotencyCache`] 与空实现
/// [`NoopIdempotencyCache`]，在构造时选择其一，调用点不再做可用性
/// 分支判断。
/// Two implementations: the real [`MemoryIdempotencyCache`] and the
/// [`NoopIdempotencyCache`], selected at construction time so call
/// sites never branch on availability.
#[async_trait]
pub trait IdempotencyCache: Send + Sync {
  /// 查询 (tenant, key) 对应的缓存结果
  /// Look up the cached outcome for (tenant, key)
  async fn check(&self, tenant: &str, key: &str) -> Result<Option<CachedResponse>>;

  /// 记录首次请求的结果
  /// Record the outcome of a first request
  ///
  /// 已有未过期记录时保持原记录不变
  /// An existing unexpired record is left unchanged
  async fn record(
    &self,
    tenant: &str,
    key: &str,
    status_code: u16,
    body: serde_json::Value,
    ttl: Duration,
  ) -> Result<()>;

  /// 回收过期记录，返回删除数量
  /// Sweep expired records, returning the number removed
  ///
  /// 与 check/record 并发运行是安全的；只用于限制内存占用，
  /// 不承担正确性职责
  /// Safe to run concurrently with check/record; bounds memory only
  /// and carries no correctness responsibility
  async fn gc(&self) -> Result<usize>;
}

/// 组合租户与调用方键
/// Compose the tenant and caller key
fn composite_key(tenant: &str, key: &str) -> String {
  format!("{tenant}:{key}")
}

/// 内存幂等缓存实现
/// In-memory idempotency cache implementation
#[derive(Default)]
pub struct MemoryIdempotencyCache {
  records: Arc<RwLock<HashMap<String, CachedResponse>>>,
}

impl MemoryIdempotencyCache {
  /// 创建新的内存缓存
  /// Create a new in-memory cache
  pub fn new() -> Self {
    Self::default()
  }

  /// 当前记录数量（含未回收的过期记录）
  /// Current record count (including unswept expired records)
  pub async fn len(&self) -> usize {
    self.records.read().await.len()
  }

  /// 检查是否为空
  /// Check if empty
  pub async fn is_empty(&self) -> bool {
    self.records.read().await.is_empty()
  }
}

#[async_trait]
impl IdempotencyCache for MemoryIdempotencyCache {
  async fn check(&self, tenant: &str, key: &str) -> Result<Option<CachedResponse>> {
    let records = self.records.read().await;
    let response = records
      .get(&composite_key(tenant, key))
      // 过期记录等同缺失，由 gc 负责物理删除
      // An expired record counts as missing; gc removes it physically
      .filter(|cached| cached.expires_at > Utc::now())
      .cloned();
    Ok(response)
  }

  async fn record(
    &self,
    tenant: &str,
    key: &str,
    status_code: u16,
    body: serde_json::Value,
    ttl: Duration,
  ) -> Result<()> {
    let now = Utc::now();
    let expires_at =
      now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(48));
    let mut records = self.records.write().await;
    let entry = records.entry(composite_key(tenant, key));
    match entry {
      std::collections::hash_map::Entry::Occupied(mut occupied) => {
        // 已写入的记录在过期前不可变
        // A written record is immutable until expiry
        if occupied.get().expires_at > now {
          return Ok(());
        }
        occupied.insert(CachedResponse {
          status_code,
          body,
          created_at: now,
          expires_at,
        });
      }
      std::collections::hash_map::Entry::Vacant(vacant) => {
        vacant.insert(CachedResponse {
          status_code,
          body,
          created_at: now,
          expires_at,
        });
      }
    }
    Ok(())
  }

  async fn gc(&self) -> Result<usize> {
    let now = Utc::now();
    let mut records = self.records.write().await;
    let before = records.len();
    records.retain(|_, cached| cached.expires_at > now);
    Ok(before - records.len())
  }
}

/// 空幂等缓存实现
/// No-op idempotency cache implementation
///
/// 永远未命中，记录与回收均为空操作
/// Never hits; record and gc are no-ops
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIdempotencyCache;

impl NoopIdempotencyCache {
  /// 创建空实现
  /// Create the no-op implementation
  pub fn new() -> Self {
    Self
  }
}

#[async_trait]
impl IdempotencyCache for NoopIdempotencyCache {
  async fn check(&self, _tenant: &str, _key: &str) -> Result<Option<CachedResponse>> {
    Ok(None)
  }

  async fn record(
    &self,
    _tenant: &str,
    _key: &str,
    _status_code: u16,
    _body: serde_json::Value,
    _ttl: Duration,
  ) -> Result<()> {
    Ok(())
  }

  async fn gc(&self) -> Result<usize> {
    Ok(0)
  }
}
