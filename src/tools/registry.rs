//! 能力注册表
//!
//! 持有 name -> CapabilityDescriptor 的快照、最近刷新时间与「刷新进行中」标记：
//! - 同一实例同时最多一次发现；并发调用者共享同一次刷新的结果（single-flight）
//! - 刷新在独立任务中执行，发起者被取消不影响刷新完成
//! - 读者只会看到完整的旧快照或完整的新快照
//! - 刷新失败保留旧快照（stale-but-available）

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{Mutex, RwLock};

use crate::core::DiscoveryError;
use crate::tools::{CapabilityDescriptor, DiscoverySource};

type Descriptors = Arc<Vec<CapabilityDescriptor>>;
type RefreshFuture = Shared<BoxFuture<'static, Result<Descriptors, DiscoveryError>>>;

/// 注册表配置
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// 是否启用发现；关闭时 get() 只返回当前快照
    pub enabled: bool,
    /// 快照有效期
    pub ttl: Duration,
    /// 单次发现的超时
    pub fetch_timeout: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Default)]
struct Snapshot {
    descriptors: Descriptors,
    by_name: HashMap<String, usize>,
    last_refreshed: Option<Instant>,
    /// 成功刷新次数，用于识别「等锁期间别人已刷新完」
    generation: u64,
}

struct RegistryInner {
    source: Arc<dyn DiscoverySource>,
    options: RegistryOptions,
    snapshot: RwLock<Snapshot>,
    in_flight: Mutex<Option<RefreshFuture>>,
}

/// 能力注册表：可注入、可克隆（共享同一内部状态）
#[derive(Clone)]
pub struct CapabilityRegistry {
    inner: Arc<RegistryInner>,
}

impl CapabilityRegistry {
    pub fn new(source: Arc<dyn DiscoverySource>, options: RegistryOptions) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                source,
                options,
                snapshot: RwLock::new(Snapshot::default()),
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// 返回当前快照；为空或过期且启用发现时先同步刷新。
    /// 刷新失败但已有旧快照时返回旧快照，只有无快照可用时才返回错误。
    pub async fn get(&self) -> Result<Descriptors, DiscoveryError> {
        if !self.inner.options.enabled {
            return Ok(self.current().await);
        }

        let (current, generation, needs_refresh) = {
            let snap = self.inner.snapshot.read().await;
            let stale = snap
                .last_refreshed
                .map(|t| t.elapsed() > self.inner.options.ttl)
                .unwrap_or(true);
            (
                snap.descriptors.clone(),
                snap.generation,
                snap.descriptors.is_empty() || stale,
            )
        };
        if !needs_refresh {
            tracing::debug!(count = current.len(), "using cached capability registry");
            return Ok(current);
        }

        match self.join_or_start(Some(generation)).await {
            Ok(fresh) => Ok(fresh),
            Err(e) if !current.is_empty() => {
                tracing::warn!(
                    error = %e,
                    count = current.len(),
                    "capability discovery failed, serving stale snapshot"
                );
                Ok(current)
            }
            Err(e) => Err(e),
        }
    }

    /// 执行（或加入进行中的）一次发现；成功后原子替换快照
    pub async fn refresh(&self) -> Result<Descriptors, DiscoveryError> {
        self.join_or_start(None).await
    }

    /// seen_generation 为调用者观察到的快照代数；等锁期间若已有新快照则直接返回它
    async fn join_or_start(
        &self,
        seen_generation: Option<u64>,
    ) -> Result<Descriptors, DiscoveryError> {
        let refresh = {
            let mut in_flight = self.inner.in_flight.lock().await;
            match in_flight.as_ref() {
                Some(shared) => {
                    tracing::debug!("joining in-flight capability discovery");
                    shared.clone()
                }
                None => {
                    if let Some(seen) = seen_generation {
                        let snap = self.inner.snapshot.read().await;
                        if snap.generation > seen {
                            return Ok(snap.descriptors.clone());
                        }
                    }
                    let inner = Arc::clone(&self.inner);
                    let handle = tokio::spawn(async move { inner.run_discovery().await });
                    let shared = async move {
                        handle
                            .await
                            .unwrap_or_else(|e| Err(DiscoveryError::Aborted(e.to_string())))
                    }
                    .boxed()
                    .shared();
                    *in_flight = Some(shared.clone());
                    shared
                }
            }
        };
        refresh.await
    }

    /// 标记快照过期：下次 get() 触发刷新，旧快照在刷新成功前仍可用
    pub async fn invalidate(&self) {
        self.inner.snapshot.write().await.last_refreshed = None;
    }

    /// 当前快照（不触发刷新）
    pub async fn current(&self) -> Descriptors {
        self.inner.snapshot.read().await.descriptors.clone()
    }

    /// 按名称查找
    pub async fn lookup(&self, name: &str) -> Option<CapabilityDescriptor> {
        let snap = self.inner.snapshot.read().await;
        snap.by_name
            .get(name)
            .and_then(|&i| snap.descriptors.get(i))
            .cloned()
    }

    pub async fn last_refreshed(&self) -> Option<Instant> {
        self.inner.snapshot.read().await.last_refreshed
    }
}

impl RegistryInner {
    async fn run_discovery(self: Arc<Self>) -> Result<Descriptors, DiscoveryError> {
        let timeout = self.options.fetch_timeout;
        let fetched = match tokio::time::timeout(timeout, self.source.fetch()).await {
            Ok(result) => result.and_then(normalize),
            Err(_) => Err(DiscoveryError::Timeout(timeout.as_secs())),
        };

        let outcome = match fetched {
            Ok(list) => {
                let descriptors: Descriptors = Arc::new(list);
                let by_name = descriptors
                    .iter()
                    .enumerate()
                    .map(|(i, d)| (d.name.clone(), i))
                    .collect();
                let mut snap = self.snapshot.write().await;
                let generation = snap.generation + 1;
                *snap = Snapshot {
                    descriptors: Arc::clone(&descriptors),
                    by_name,
                    last_refreshed: Some(Instant::now()),
                    generation,
                };
                drop(snap);
                tracing::info!(
                    source = %self.source.name(),
                    count = descriptors.len(),
                    "capability registry refreshed"
                );
                Ok(descriptors)
            }
            Err(e) => {
                tracing::error!(source = %self.source.name(), error = %e, "capability discovery failed");
                Err(e)
            }
        };

        *self.in_flight.lock().await = None;
        outcome
    }
}

/// 校验每个描述符并拒绝重名；任何问题都使整批作废
fn normalize(list: Vec<CapabilityDescriptor>) -> Result<Vec<CapabilityDescriptor>, DiscoveryError> {
    let mut seen = std::collections::HashSet::new();
    for d in &list {
        d.validate().map_err(DiscoveryError::Malformed)?;
        if !seen.insert(d.name.as_str()) {
            return Err(DiscoveryError::Malformed(format!(
                "duplicate capability name '{}'",
                d.name
            )));
        }
    }
    Ok(list)
}
