//! Edits to the hosts file of the machine running kforge

use std::io::ErrorKind;
use std::net::IpAddr;
use std::path::Path;

use kf_core::KfError;

async fn read_or_empty(path: &Path) -> Result<String, KfError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

/// Append `ip domain` unless that exact mapping is present
pub async fn ensure_hosts_entry(path: &Path, ip: IpAddr, domain: &str) -> Result<(), KfError> {
    let mut text = read_or_empty(path).await?;
    let address = ip.to_string();
    let entry = format!("{} {}", address, domain);
    let present = text.lines().any(|line| {
        let mut fields = line.split_whitespace();
        fields.next() == Some(address.as_str()) && fields.any(|name| name == domain)
    });
    if present {
        return Ok(());
    }
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(&entry);
    text.push('\n');
    tokio::fs::write(path, text).await?;
    tracing::debug!("Added '{}' to {}", entry, path.display());
    Ok(())
}

/// Drop every line mapping an address to `domain`
pub async fn remove_hosts_entries(path: &Path, domain: &str) -> Result<(), KfError> {
    let text = read_or_empty(path).await?;
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| !line.split_whitespace().skip(1).any(|name| name == domain))
        .collect();
    if kept.len() == text.lines().count() {
        return Ok(());
    }
    let mut out = kept.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    tokio::fs::write(path, out).await?;
    tracing::debug!("Removed {} from {}", domain, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entry_added_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(&path, "127.0.0.1 localhost").unwrap();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        ensure_hosts_entry(&path, ip, "apiserver.cluster.local").await.unwrap();
        ensure_hosts_entry(&path, ip, "apiserver.cluster.local").await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "127.0.0.1 localhost\n10.0.0.1 apiserver.cluster.local\n"
        );
    }

    #[tokio::test]
    async fn test_remove_only_matching_domain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(
            &path,
            "127.0.0.1 localhost\n10.0.0.1 apiserver.cluster.local\n10.0.0.9 apiserver.cluster.local.bak\n",
        )
        .unwrap();

        remove_hosts_entries(&path, "apiserver.cluster.local").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "127.0.0.1 localhost\n10.0.0.9 apiserver.cluster.local.bak\n"
        );

        let missing = dir.path().join("absent");
        remove_hosts_entries(&missing, "x").await.unwrap();
        assert!(!missing.exists());
    }
}
