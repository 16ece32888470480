//! 后台组件模块
//! Background component module
//!
//! 提供通用的组件生命周期管理 trait
//! Provides a common trait for background component lifecycle management
//!
//! 此模块定义了统一的生命周期接口，用于管理各种后台组件
//! This module defines a unified lifecycle interface for managing the
//! various background components
//!
//! # 实现者 / Implementors
//!
//! - [`StalledSweeper`](sweeper::StalledSweeper) - 收回租约过期的作业
//!   - [`StalledSweeper`](sweeper::StalledSweeper) - reclaims lease-expired jobs
//! - [`IdempotencyGc`](gc::IdempotencyGc) - 回收过期的幂等记录
//!   - [`IdempotencyGc`](gc::IdempotencyGc) - sweeps expired idempotency records
//!
//! # 注意 / Note
//!
//! [`WorkerPool`](worker::WorkerPool) 没有实现此 trait，因为它具有不同的接口：
//! [`WorkerPool`](worker::WorkerPool) does not implement this trait because it
//! has a different interface:
//! - `start()` 方法接受 `&mut self` / `start()` takes `&mut self`
//! - `shutdown()` 是异步的 / `shutdown()` is async

use std::sync::Arc;
use tokio::task::JoinHandle;

pub mod gc;
pub mod sweeper;
pub mod worker;

/// 组件生命周期管理接口
/// Component lifecycle management interface
pub trait ComponentLifecycle {
  /// 启动组件
  /// Start the component
  fn start(self: Arc<Self>) -> JoinHandle<()>;

  /// 关闭组件
  /// Shut the component down
  fn shutdown(&self);

  /// 检查组件是否已结束
  /// Check whether the component has finished
  fn is_done(&self) -> bool;
}
