//! In-memory [`RemoteExecutor`] test double
//!
//! `MockExecutor` records every call and answers from preset rules. A rule
//! matches when its pattern is a substring of the command (or, for fetches,
//! of the remote path). Host-specific rules take precedence over global ones;
//! among equals the most recently added wins. Commands without a rule succeed
//! with empty output.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::RemoteError;
use crate::traits::RemoteExecutor;

/// One recorded executor call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Run { host: IpAddr, command: String },
    Copy { host: IpAddr, local: PathBuf, remote: String },
    Fetch { host: IpAddr, remote: String, local: PathBuf },
    Ping { host: IpAddr },
}

impl Call {
    pub fn host(&self) -> IpAddr {
        match self {
            Call::Run { host, .. }
            | Call::Copy { host, .. }
            | Call::Fetch { host, .. }
            | Call::Ping { host } => *host,
        }
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Output(String),
    Fail(String),
}

#[derive(Debug, Clone)]
struct Rule {
    host: Option<IpAddr>,
    pattern: String,
    outcome: Outcome,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<Call>,
    rules: Vec<Rule>,
    failing_hosts: HashSet<IpAddr>,
    unreachable: HashMap<IpAddr, u32>,
    delays: HashMap<IpAddr, Duration>,
    known: Option<HashSet<IpAddr>>,
}

impl State {
    fn outcome(&self, host: IpAddr, subject: &str) -> Option<Outcome> {
        let matching = |rule: &&Rule| subject.contains(rule.pattern.as_str());
        self.rules
            .iter()
            .rev()
            .filter(|r| r.host == Some(host))
            .find(matching)
            .or_else(|| {
                self.rules
                    .iter()
                    .rev()
                    .filter(|r| r.host.is_none())
                    .find(matching)
            })
            .map(|r| r.outcome.clone())
    }

    /// Connection-level checks shared by every call
    fn connect(&mut self, host: IpAddr, command: &str) -> Result<(), RemoteError> {
        if let Some(known) = &self.known {
            if !known.contains(&host) {
                return Err(RemoteError::UnknownHost(host));
            }
        }
        let refused = || RemoteError::ExecutionFailed {
            host,
            command: command.to_string(),
            reason: "connection refused".to_string(),
        };
        if self.failing_hosts.contains(&host) {
            return Err(refused());
        }
        if let Some(remaining) = self.unreachable.get_mut(&host) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(refused());
            }
        }
        Ok(())
    }

    fn answer(&self, host: IpAddr, command: &str) -> Result<String, RemoteError> {
        match self.outcome(host, command) {
            Some(Outcome::Output(output)) => Ok(output),
            Some(Outcome::Fail(reason)) => Err(RemoteError::ExecutionFailed {
                host,
                command: command.to_string(),
                reason,
            }),
            None => Ok(String::new()),
        }
    }
}

/// Scriptable executor that never touches the network
#[derive(Debug, Default)]
pub struct MockExecutor {
    state: Mutex<State>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept calls for `hosts`, rejecting others with `UnknownHost`
    pub fn with_hosts(hosts: impl IntoIterator<Item = IpAddr>) -> Self {
        let mock = Self::default();
        mock.lock().known = Some(hosts.into_iter().collect());
        mock
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push_rule(&self, host: Option<IpAddr>, pattern: &str, outcome: Outcome) -> &Self {
        self.lock().rules.push(Rule {
            host,
            pattern: pattern.to_string(),
            outcome,
        });
        self
    }

    /// Answer commands containing `pattern` with `output` on every host
    pub fn respond(&self, pattern: &str, output: impl Into<String>) -> &Self {
        self.push_rule(None, pattern, Outcome::Output(output.into()))
    }

    /// Answer commands containing `pattern` with `output` on `host`
    pub fn respond_on(&self, host: IpAddr, pattern: &str, output: impl Into<String>) -> &Self {
        self.push_rule(Some(host), pattern, Outcome::Output(output.into()))
    }

    /// Fail commands containing `pattern` on `host`
    pub fn fail_on(&self, host: IpAddr, pattern: &str) -> &Self {
        self.push_rule(Some(host), pattern, Outcome::Fail("exit status 1".to_string()))
    }

    /// Fail commands containing `pattern` on every host
    pub fn fail_everywhere(&self, pattern: &str) -> &Self {
        self.push_rule(None, pattern, Outcome::Fail("exit status 1".to_string()))
    }

    /// Refuse every connection to `host`
    pub fn fail_host(&self, host: IpAddr) -> &Self {
        self.lock().failing_hosts.insert(host);
        self
    }

    /// Refuse the next `times` connections to `host`
    pub fn unreachable_for(&self, host: IpAddr, times: u32) -> &Self {
        self.lock().unreachable.insert(host, times);
        self
    }

    /// Delay every call to `host`
    pub fn delay(&self, host: IpAddr, delay: Duration) -> &Self {
        self.lock().delays.insert(host, delay);
        self
    }

    /// Every call, in the order it was made
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Commands run on `host`, in order
    pub fn commands_for(&self, host: IpAddr) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Run { host: h, command } if *h == host => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether a command containing `pattern` ran on `host`
    pub fn ran(&self, host: IpAddr, pattern: &str) -> bool {
        self.commands_for(host).iter().any(|c| c.contains(pattern))
    }

    /// Hosts that received at least one call
    pub fn touched_hosts(&self) -> HashSet<IpAddr> {
        self.lock().calls.iter().map(Call::host).collect()
    }

    async fn pause(&self, host: IpAddr) {
        let delay = self.lock().delays.get(&host).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn run(&self, host: IpAddr, command: &str) -> Result<String, RemoteError> {
        self.pause(host).await;
        let mut state = self.lock();
        state.connect(host, command)?;
        state.calls.push(Call::Run {
            host,
            command: command.to_string(),
        });
        state.answer(host, command)
    }

    async fn run_all(&self, host: IpAddr, commands: &[String]) -> Result<(), RemoteError> {
        self.pause(host).await;
        let mut state = self.lock();
        let first = commands.first().map(String::as_str).unwrap_or_default();
        state.connect(host, first)?;
        for command in commands {
            state.calls.push(Call::Run {
                host,
                command: command.clone(),
            });
            state.answer(host, command)?;
        }
        Ok(())
    }

    async fn copy(&self, host: IpAddr, local: &Path, remote: &str) -> Result<(), RemoteError> {
        self.pause(host).await;
        let mut state = self.lock();
        state.connect(host, remote)?;
        state.calls.push(Call::Copy {
            host,
            local: local.to_path_buf(),
            remote: remote.to_string(),
        });
        state.answer(host, remote).map(|_| ())
    }

    async fn fetch(&self, host: IpAddr, remote: &str, local: &Path) -> Result<(), RemoteError> {
        self.pause(host).await;
        let content = {
            let mut state = self.lock();
            state.connect(host, remote)?;
            state.calls.push(Call::Fetch {
                host,
                remote: remote.to_string(),
                local: local.to_path_buf(),
            });
            match state.outcome(host, remote) {
                Some(Outcome::Output(content)) => Some(content),
                Some(Outcome::Fail(reason)) => {
                    return Err(RemoteError::ExecutionFailed {
                        host,
                        command: format!("cat {}", remote),
                        reason,
                    })
                }
                None => None,
            }
        };
        if let Some(content) = content {
            if let Some(parent) = local.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(local, content).await?;
        }
        Ok(())
    }

    async fn ping(&self, host: IpAddr) -> Result<(), RemoteError> {
        self.pause(host).await;
        let mut state = self.lock();
        state.connect(host, "true")?;
        state.calls.push(Call::Ping { host });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_records_commands_in_order() {
        let mock = MockExecutor::new();
        mock.run(ip("10.0.0.1"), "hostname").await.unwrap();
        mock.run_all(ip("10.0.0.1"), &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(mock.commands_for(ip("10.0.0.1")), vec!["hostname", "a", "b"]);
    }

    #[tokio::test]
    async fn test_host_rule_beats_global_rule() {
        let mock = MockExecutor::new();
        mock.respond("hostname", "any")
            .respond_on(ip("10.0.0.2"), "hostname", "node-2");
        assert_eq!(mock.run(ip("10.0.0.1"), "hostname").await.unwrap(), "any");
        assert_eq!(mock.run(ip("10.0.0.2"), "hostname").await.unwrap(), "node-2");
    }

    #[tokio::test]
    async fn test_run_all_stops_at_first_failure() {
        let host = ip("10.0.0.3");
        let mock = MockExecutor::new();
        mock.fail_on(host, "kubeadm join");
        let commands = vec![
            "echo prep".to_string(),
            "kubeadm join x".to_string(),
            "echo never".to_string(),
        ];
        let err = mock.run_all(host, &commands).await.unwrap_err();
        assert!(matches!(err, RemoteError::ExecutionFailed { .. }));
        assert!(!mock.ran(host, "never"));
    }

    #[tokio::test]
    async fn test_unreachable_then_ready() {
        let host = ip("10.0.0.4");
        let mock = MockExecutor::new();
        mock.unreachable_for(host, 2);
        assert!(mock.ping(host).await.is_err());
        assert!(mock.ping(host).await.is_err());
        assert!(mock.ping(host).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_host_rejected() {
        let mock = MockExecutor::with_hosts([ip("10.0.0.1")]);
        let err = mock.run(ip("10.0.0.9"), "true").await.unwrap_err();
        assert!(matches!(err, RemoteError::UnknownHost(_)));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_writes_matching_content() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("kube/config");
        let mock = MockExecutor::new();
        mock.respond("/etc/kubernetes/admin.conf", "apiVersion: v1");

        mock.fetch(ip("10.0.0.1"), "/etc/kubernetes/admin.conf", &local)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&local).unwrap(), "apiVersion: v1");
    }
}
