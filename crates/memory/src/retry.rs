use anyhow::{anyhow, Result};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Максимальное количество попыток
    pub max_attempts: usize,
    /// Базовая задержка между попытками
    pub base_delay: Duration,
    /// Максимальная задержка
    pub max_delay: Duration,
    /// Мультипликатор для exponential backoff
    pub backoff_multiplier: f64,
    /// Включить jitter для предотвращения thundering herd
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Retry manager с exponential backoff и jitter
pub struct RetryManager {
    config: RetryConfig,
}

impl RetryManager {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Выполнить операцию с retry logic
    pub async fn retry<T, E, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut last_error = None;

        for attempt in 1..=self.config.max_attempts {
            debug!(
                "Attempting {} (attempt {}/{})",
                operation_name, attempt, self.config.max_attempts
            );

            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    warn!(
                        "Operation {} failed on attempt {}: {}",
                        operation_name, attempt, err
                    );
                    last_error = Some(err.to_string());

                    if attempt < self.config.max_attempts {
                        sleep(self.calculate_delay(attempt)).await;
                    }
                }
            }
        }

        Err(anyhow!(
            "Operation {} failed after {} attempts. Last error: {}",
            operation_name,
            self.config.max_attempts,
            last_error.unwrap_or_else(|| "Unknown error".to_string())
        ))
    }

    /// Вычислить задержку с exponential backoff и jitter
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let exponential_delay = self.config.base_delay.as_millis() as f64
            * self
                .config
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);

        let capped_delay = exponential_delay.min(self.config.max_delay.as_millis() as f64);

        let final_delay = if self.config.jitter {
            // jitter ±25%
            let jitter_range = capped_delay * 0.25;
            let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
            (capped_delay + jitter).max(0.0)
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Удалённый кэш: одна быстрая повторная попытка
    pub fn for_cache_store() -> Self {
        Self::new(RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            jitter: true,
        })
    }

    /// Зеркалирование корпуса в vector store
    pub fn for_vector_store() -> Self {
        Self::new(RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: true,
        })
    }
}

/// Итог ожидания зависимости
#[derive(Debug, Clone, Serialize)]
pub struct PollOutcome {
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub last_error: Option<String>,
    pub succeeded: bool,
}

/// Повторять `op` с фиксированным интервалом до успеха или дедлайна.
///
/// Каждая попытка ограничена `min(interval, остаток до дедлайна)`, но не меньше
/// `attempt_floor`, чтобы медленный ответ не съедал весь бюджет.
pub async fn poll_until<F, Fut>(
    name: &str,
    interval: Duration,
    deadline: Duration,
    attempt_floor: Duration,
    mut op: F,
) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let start = Instant::now();
    let give_up_at = start + deadline;
    let mut attempts = 0u32;
    let mut last_error = None;

    loop {
        attempts += 1;
        let remaining = give_up_at.saturating_duration_since(Instant::now());
        let attempt_budget = interval.max(attempt_floor).min(remaining.max(attempt_floor));

        match tokio::time::timeout(attempt_budget, op()).await {
            Ok(Ok(())) => {
                debug!(dependency = name, attempts, "Dependency responded");
                return PollOutcome {
                    attempts,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    last_error: None,
                    succeeded: true,
                };
            }
            Ok(Err(e)) => last_error = Some(e.to_string()),
            Err(_) => last_error = Some(format!("attempt timed out after {attempt_budget:?}")),
        }

        let now = Instant::now();
        if now >= give_up_at || now + interval > give_up_at {
            warn!(
                dependency = name,
                attempts,
                last_error = last_error.as_deref().unwrap_or(""),
                "Dependency did not respond before deadline"
            );
            return PollOutcome {
                attempts,
                elapsed_ms: start.elapsed().as_millis() as u64,
                last_error,
                succeeded: false,
            };
        }

        debug!(
            dependency = name,
            attempts,
            error = last_error.as_deref().unwrap_or(""),
            "Dependency not ready, waiting {:?}",
            interval
        );
        sleep(interval).await;
    }
}
