//! Wait until hosts accept SSH connections

use std::net::IpAddr;
use std::sync::Arc;

use kf_core::config::RetryPolicy;
use kf_core::error::RemoteError;
use kf_core::traits::RemoteExecutor;
use kf_core::KfError;
use kf_ssh::RetrySchedule;

use crate::fanout::FanOut;

/// Poll every host with `ping` until it answers or the budget is spent
///
/// Hosts are polled concurrently. A host that never answers fails with
/// [`RemoteError::SshNotReady`].
pub async fn wait_ssh_ready(
    executor: &Arc<dyn RemoteExecutor>,
    policy: &RetryPolicy,
    fanout: FanOut,
    hosts: &[IpAddr],
) -> Result<(), KfError> {
    fanout
        .run(hosts, |host| {
            let executor = Arc::clone(executor);
            let policy = policy.clone();
            async move { poll(executor.as_ref(), &policy, host).await.map_err(KfError::from) }
        })
        .await
}

async fn poll(
    executor: &dyn RemoteExecutor,
    policy: &RetryPolicy,
    host: IpAddr,
) -> Result<(), RemoteError> {
    let mut pauses = RetrySchedule::new(policy);
    let mut attempts = 0;

    loop {
        attempts += 1;
        let err = match executor.ping(host).await {
            Ok(()) => {
                tracing::debug!("{} answered on attempt {}", host, attempts);
                return Ok(());
            }
            Err(e @ RemoteError::UnknownHost(_)) => return Err(e),
            Err(e) => e,
        };

        match pauses.next() {
            Some(delay) => {
                tracing::debug!("{} not ready ({}), retrying in {:?}", host, err, delay);
                tokio::time::sleep(delay).await;
            }
            None => {
                tracing::warn!("{} not ready: {}", host, err);
                return Err(RemoteError::SshNotReady { host, attempts });
            }
        }
    }
}
