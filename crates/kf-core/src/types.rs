//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Role label carried by a host group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Control-plane member
    Master,
    /// Worker
    Node,
}

impl Role {
    /// Label used in Clusterfiles and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Node => "node",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "master" | "control-plane" => Ok(Role::Master),
            "node" | "worker" => Ok(Role::Node),
            other => Err(ConfigError::Invalid(format!("unknown role: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_display() {
        assert_eq!(format!("{}", Role::Master), "master");
        assert_eq!(format!("{}", Role::Node), "node");
    }

    #[test]
    fn test_role_from_str_aliases() {
        assert_eq!("Worker".parse::<Role>().unwrap(), Role::Node);
        assert_eq!("control-plane".parse::<Role>().unwrap(), Role::Master);
        assert!("etcd".parse::<Role>().is_err());
    }
}
