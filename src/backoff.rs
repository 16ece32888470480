//! 重试退避模块
//! Retry backoff module
//!
//! 定义了失败作业重试前的延迟计算策略
//! Defines the delay calculation policies applied before a failed job is retried

use std::time::Duration;

/// 默认指数退避基础延迟
/// Default base delay for exponential backoff
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// 默认退避上限
/// Default backoff cap
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(15 * 60);

/// 默认抖动比例（±20%）
/// Default jitter ratio (±20%)
pub const DEFAULT_JITTER_RATIO: f64 = 0.2;

/// 重试策略
/// Retry policy
#[derive(Debug, Clone)]
pub enum RetryPolicy {
  /// 固定延迟
  /// Fixed delay
  Fixed(Duration),
  /// 指数退避
  /// Exponential backoff
  Exponential {
    /// 基础延迟
    /// Base delay
    base_delay: Duration,
    /// 最大延迟
    /// Maximum delay
    max_delay: Duration,
    /// 乘数
    /// Multiplier
    multiplier: f64,
    /// 是否添加随机抖动
    /// Whether to add random jitter
    jitter: bool,
  },
  /// 线性退避
  /// Linear backoff
  Linear {
    /// 基础延迟
    /// Base delay
    base_delay: Duration,
    /// 最大延迟
    /// Maximum delay
    max_delay: Duration,
    /// 步进值
    /// Step size
    step: Duration,
  },
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::default_exponential()
  }
}

impl RetryPolicy {
  /// 默认指数退避策略
  /// Default exponential backoff policy
  pub fn default_exponential() -> Self {
    Self::Exponential {
      base_delay: DEFAULT_BASE_DELAY,
      max_delay: DEFAULT_MAX_DELAY,
      multiplier: 2.0,
      jitter: true,
    }
  }

  /// 计算第 `attempts` 次失败后的重试延迟
  /// Calculate the retry delay after the `attempts`-th failure
  ///
  /// `attempts` 从 1 开始计数（第一次失败后为 1）
  /// `attempts` is 1-based (1 after the first failure)
  pub fn calculate_delay(&self, attempts: i32) -> Duration {
    let attempts = attempts.max(1);
    match self {
      Self::Fixed(delay) => *delay,
      Self::Exponential {
        base_delay,
        max_delay,
        multiplier,
        jitter,
      } => {
        let factor = multiplier.powi(attempts - 1);
        let raw = base_delay.as_secs_f64() * factor;
        let capped = raw.min(max_delay.as_secs_f64());
        let delay = Duration::from_secs_f64(capped);
        if *jitter {
          apply_jitter(delay, DEFAULT_JITTER_RATIO)
        } else {
          delay
        }
      }
      Self::Linear {
        base_delay,
        max_delay,
        step,
      } => {
        let raw = *base_delay + *step * (attempts as u32 - 1);
        raw.min(*max_delay)
      }
    }
  }
}

/// 对延迟施加 ± ratio 的随机抖动
/// Apply a random ± ratio jitter to a delay
fn apply_jitter(delay: Duration, ratio: f64) -> Duration {
  let secs = delay.as_secs_f64();
  let spread = secs * ratio;
  // 随机值落在 [-spread, +spread]
  // Random value in [-spread, +spread]
  let offset = (rand::random::<f64>() * 2.0 - 1.0) * spread;
  Duration::from_secs_f64((secs + offset).max(0.0))
}
