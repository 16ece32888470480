//! # Jobq
//!
//! Simple, reliable & efficient asynchronous job orchestration core in Rust
//!
//! Jobq 是一个异步作业编排核心库，提供持久化的作业提交、按优先级与
//! 延迟感知的分派、幂等请求处理、失败重试退避，以及周期性重新提交
//! 作业的 cron 式调度器。
//! Jobq is an asynchronous job orchestration core providing durable job
//! submission, priority/delay-aware dispatch, idempotent request
//! handling, retry/backoff on failure, and a cron-style scheduler that
//! periodically re-submits jobs.
//!
//! ## 特性
//! ## Features
//!
//! - 原子认领：同一作业绝不交给两个并发认领者
//!   - Atomic claim: the same job is never handed to two concurrent claimants
//! - 优先级降序、可分派时间升序、创建顺序决胜的分派次序
//!   - Dispatch ordered by priority desc, dispatch time asc, creation order tie-break
//! - 指数退避加抖动的失败重试
//!   - Failure retry with exponential backoff and jitter
//! - 租约超时回收崩溃 worker 持有的作业
//!   - Lease-timeout reclamation of jobs held by crashed workers
//! - 按（租户、幂等键）对变更请求去重，后端故障时放行
//!   - Mutating-request dedupe by (tenant, idempotency key), failing open on backend outages
//! - 每个调度一个独占定时器，支持时区与 max_runs 自动停用
//!   - One owned timer per schedule, with timezone support and max_runs auto-disable
//! - 类型化事件通道供外部指标订阅者消费
//!   - Typed event channel for an external metrics subscriber
//!
//! ## 快速开始
//! ## Quick Start
//!
//! ```rust,no_run
//! use jobq::client::{Client, SubmitRequest};
//! use jobq::components::worker::WorkerPool;
//! use jobq::config::{IdempotencyConfig, QueueConfig, WorkerConfig};
//! use jobq::events::EventSink;
//! use jobq::idempotency::MemoryIdempotencyCache;
//! use jobq::registry::{HandlerRegistry, JobTypeRegistry};
//! use jobq::store::MemoryStore;
//! use serde::Deserialize;
//! use std::sync::Arc;
//!
//! #[derive(Deserialize)]
//! struct SendNotification {
//!     recipient: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 注册作业类型及其载荷模式
//!     // Register job types and their payload schemas
//!     let mut types = JobTypeRegistry::new();
//!     types.register::<SendNotification>("notification.send");
//!
//!     // 注册执行处理器
//!     // Register execution handlers
//!     let mut handlers = HandlerRegistry::new();
//!     handlers.register_fn("notification.send", |job| async move {
//!         println!("delivering notification for job {}", job.id);
//!         Ok(serde_json::json!({ "delivered": true }))
//!     });
//!
//!     // 创建存储、客户端与工作池
//!     // Create the store, client and worker pool
//!     let store = Arc::new(MemoryStore::new(
//!         Arc::new(types),
//!         QueueConfig::default(),
//!         EventSink::disabled(),
//!     ));
//!     let client = Client::new(
//!         store.clone(),
//!         Arc::new(MemoryIdempotencyCache::new()),
//!         EventSink::disabled(),
//!         IdempotencyConfig::default(),
//!     );
//!     let mut pool = WorkerPool::new(store, Arc::new(handlers), WorkerConfig::default());
//!     pool.start();
//!
//!     // 提交作业
//!     // Submit a job
//!     let request = SubmitRequest::new(
//!         "acme",
//!         "notification.send",
//!         serde_json::json!({ "recipient": "a@b.c" }),
//!     )
//!     .with_idempotency_key("req-42");
//!     let response = client.submit(request).await?;
//!     println!("submitted: {}", response.body);
//!
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod client;
pub mod components;
pub mod config;
pub mod error;
pub mod events;
pub mod idempotency;
pub mod job;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use backoff::RetryPolicy;
pub use client::{Client, SubmitRequest, SubmitResponse};
pub use error::{Error, Result};
pub use events::{event_channel, EventSink, QueueEvent};
pub use job::{Job, JobStatus, NewJob};
pub use registry::{HandlerRegistry, JobHandler, JobTypeRegistry};
pub use scheduler::{validate_cron_expression, NewSchedule, Schedule, SchedulePatch, Scheduler};
pub use store::{JobFilter, JobPage, JobStore, MemoryStore};
