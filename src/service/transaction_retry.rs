// 交易重试策略
//
// 提供：
// - 有界重试（最大尝试次数）
// - 线性退避：delay = base_delay × attempt
// - 单次尝试超时（超时计为一次失败）

use std::{future::Future, time::Duration};

use tokio::time::{sleep, timeout};

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 基础退避时间
    pub base_delay: Duration,
    /// 单次尝试的等待上限
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// 单次尝试失败的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError<E> {
    Failed(E),
    TimedOut(Duration),
}

impl<E: std::fmt::Display> std::fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Failed(e) => write!(f, "{}", e),
            AttemptError::TimedOut(limit) => {
                write!(f, "attempt timed out after {}ms", limit.as_millis())
            }
        }
    }
}

#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, AttemptError<E>>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            attempt_timeout,
        }
    }

    /// 第 `attempt` 次失败后的等待时间
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// 执行 `op` 直到成功或用尽尝试次数；`op` 接收当前尝试序号（从 1 开始）
    ///
    /// 最后一次失败之后不再等待。
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            let result = match timeout(self.attempt_timeout, op(attempt)).await {
                Ok(Ok(value)) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Ok(Err(e)) => AttemptError::Failed(e),
                Err(_) => AttemptError::TimedOut(self.attempt_timeout),
            };

            if attempt >= self.max_attempts {
                return RetryOutcome {
                    result: Err(result),
                    attempts: attempt,
                };
            }

            sleep(self.backoff(attempt)).await;
            attempt += 1;
        }
    }
}
