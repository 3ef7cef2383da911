//! Concurrent per-host execution
//!
//! Every host gets its own tokio task. All tasks run to completion; a failure
//! on one host never cancels its siblings. The caller gets back the first
//! error in completion order, attributed to its host.

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

use kf_core::KfError;

/// Runs one task per host, optionally capped
#[derive(Debug, Clone, Copy, Default)]
pub struct FanOut {
    limit: Option<usize>,
}

impl FanOut {
    /// Unbounded fan-out
    pub fn new() -> Self {
        Self::default()
    }

    /// At most `limit` hosts in flight, unbounded when `None`
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            limit: limit.map(|n| n.max(1)),
        }
    }

    /// Run `f` for every host and wait for all of them
    ///
    /// Returns the first failure observed, wrapped as [`KfError::Host`].
    pub async fn run<F, Fut>(&self, hosts: &[IpAddr], f: F) -> Result<(), KfError>
    where
        F: Fn(IpAddr) -> Fut,
        Fut: Future<Output = Result<(), KfError>> + Send + 'static,
    {
        let mut first = None;
        for (_, host, result) in self.drive(hosts, f).await {
            if let Err(e) = result {
                first.get_or_insert_with(|| KfError::host(host, e));
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run `f` for every host and return each result, in host order
    pub async fn collect<T, F, Fut>(&self, hosts: &[IpAddr], f: F) -> Vec<(IpAddr, Result<T, KfError>)>
    where
        T: Send + 'static,
        F: Fn(IpAddr) -> Fut,
        Fut: Future<Output = Result<T, KfError>> + Send + 'static,
    {
        let mut results = self.drive(hosts, f).await;
        results.sort_by_key(|(index, _, _)| *index);
        results
            .into_iter()
            .map(|(_, host, result)| (host, result))
            .collect()
    }

    /// Spawn every task, then drain them in completion order
    async fn drive<T, F, Fut>(&self, hosts: &[IpAddr], f: F) -> Vec<(usize, IpAddr, Result<T, KfError>)>
    where
        T: Send + 'static,
        F: Fn(IpAddr) -> Fut,
        Fut: Future<Output = Result<T, KfError>> + Send + 'static,
    {
        let semaphore = self.limit.map(|n| Arc::new(Semaphore::new(n)));

        let mut pending: FuturesUnordered<_> = hosts
            .iter()
            .enumerate()
            .map(|(index, &host)| {
                let task = f(host);
                let semaphore = semaphore.clone();
                let handle = tokio::spawn(async move {
                    let _permit = match semaphore {
                        Some(semaphore) => Some(semaphore.acquire_owned().await.map_err(|e| {
                            KfError::Internal(format!("fan-out semaphore closed: {}", e))
                        })?),
                        None => None,
                    };
                    task.await
                });
                async move { (index, host, handle.await) }
            })
            .collect();

        let mut results = Vec::with_capacity(hosts.len());
        while let Some((index, host, joined)) = pending.next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(KfError::Internal(format!("task for {} failed: {}", host, e)))
            });
            if let Err(e) = &result {
                tracing::error!("[{}] {}", host, e);
            }
            results.push((index, host, result));
        }
        results
    }
}
