use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

type InflightMap<V> = Arc<Mutex<HashMap<String, watch::Receiver<Option<V>>>>>;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("in-flight computation for '{key}' ended without a result")]
pub struct FlightAborted {
    pub key: String,
}

/// Роль вызова в single-flight группе
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    /// Запустил вычисление
    Leader,
    /// Дождался чужого вычисления
    Follower,
}

/// Реестр вычислений в полёте: одно вычисление на ключ.
///
/// Вычисление запускается отдельной задачей, поэтому отмена ожидающего
/// (таймаут вызывающего слоя) не отменяет само вычисление.
pub struct SingleFlight<V> {
    inflight: InflightMap<V>,
    leaders: AtomicU64,
    followers: AtomicU64,
}

/// Убирает ключ из реестра по завершении задачи (в том числе при панике)
struct InflightGuard<V> {
    inflight: InflightMap<V>,
    key: String,
}

impl<V> Drop for InflightGuard<V> {
    fn drop(&mut self) {
        self.inflight.lock().remove(&self.key);
    }
}

impl<V> Default for SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            leaders: AtomicU64::new(0),
            followers: AtomicU64::new(0),
        }
    }

    /// Выполнить `compute` для `key` или дождаться уже идущего вычисления.
    ///
    /// `compute` вызывается только если вызывающий стал лидером.
    pub async fn run<F, Fut>(&self, key: &str, compute: F) -> Result<(V, FlightRole), FlightAborted>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (mut rx, role) = {
            let mut inflight = self.inflight.lock();
            match inflight.get(key) {
                Some(rx) => (rx.clone(), FlightRole::Follower),
                None => {
                    let (tx, rx) = watch::channel(None);
                    inflight.insert(key.to_string(), rx.clone());

                    let guard = InflightGuard {
                        inflight: Arc::clone(&self.inflight),
                        key: key.to_string(),
                    };
                    let fut = compute();
                    tokio::spawn(async move {
                        let value = fut.await;
                        // Сначала публикуем результат, потом guard убирает ключ
                        let _ = tx.send(Some(value));
                        drop(guard);
                    });
                    (rx, FlightRole::Leader)
                }
            }
        };

        match role {
            FlightRole::Leader => self.leaders.fetch_add(1, Ordering::Relaxed),
            FlightRole::Follower => {
                debug!(key, "Joining in-flight computation");
                self.followers.fetch_add(1, Ordering::Relaxed)
            }
        };

        let result = rx.wait_for(|value| value.is_some()).await;
        match result {
            Ok(value) => match &*value {
                Some(v) => Ok((v.clone(), role)),
                None => Err(FlightAborted {
                    key: key.to_string(),
                }),
            },
            Err(_) => {
                warn!(key, "In-flight computation dropped without result");
                Err(FlightAborted {
                    key: key.to_string(),
                })
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }

    pub fn leader_count(&self) -> u64 {
        self.leaders.load(Ordering::Relaxed)
    }

    pub fn follower_count(&self) -> u64 {
        self.followers.load(Ordering::Relaxed)
    }
}
