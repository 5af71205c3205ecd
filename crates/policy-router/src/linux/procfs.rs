//! sysctl through `/proc/sys`

use crate::error::{RouterError, RouterResult};
use crate::ops::SysctlOps;
use std::path::PathBuf;

/// sysctl tree rooted at `/proc/sys`
#[derive(Debug, Clone)]
pub struct ProcSys {
    root: PathBuf,
}

impl Default for ProcSys {
    fn default() -> Self {
        Self { root: PathBuf::from("/proc/sys") }
    }
}

impl ProcSys {
    /// sysctl tree rooted elsewhere (a mounted host `/proc/sys` in a container)
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait::async_trait]
impl SysctlOps for ProcSys {
    async fn get(&self, key: &str) -> RouterResult<String> {
        tokio::fs::read_to_string(self.root.join(key))
            .await
            .map_err(|source| RouterError::Sysctl { key: key.to_string(), source })
    }

    async fn set(&self, key: &str, value: &str) -> RouterResult<()> {
        tokio::fs::write(self.root.join(key), value)
            .await
            .map_err(|source| RouterError::Sysctl { key: key.to_string(), source })
    }
}
