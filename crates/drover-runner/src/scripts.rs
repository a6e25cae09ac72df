//! Script sync: materialize coordinator-managed scripts on this runner.
//!
//! Failures are logged and never fatal; the next sync command retries.

use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use crate::api_client::CoordinatorClient;

pub struct ScriptSync {
    client: Arc<CoordinatorClient>,
    dir: PathBuf,
}

impl ScriptSync {
    pub fn new(client: Arc<CoordinatorClient>, dir: PathBuf) -> Self {
        Self { client, dir }
    }

    /// Apply one drained batch of sync and remove commands.
    pub async fn apply(&self, sync: &[String], remove: &[String]) {
        for name in sync {
            if let Err(e) = self.sync_one(name).await {
                warn!("script sync '{name}' failed: {e}");
            }
        }
        for name in remove {
            if let Err(e) = self.remove_one(name) {
                warn!("script removal '{name}' failed: {e}");
            }
        }
    }

    async fn sync_one(&self, name: &str) -> anyhow::Result<()> {
        check_name(name)?;
        let contents = self.client.fetch_script(name).await?;

        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        std::fs::write(&path, contents)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        }

        info!("synced script '{name}' to {}", path.display());
        Ok(())
    }

    fn remove_one(&self, name: &str) -> anyhow::Result<()> {
        check_name(name)?;
        let path = self.dir.join(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("removed script '{name}'");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn check_name(name: &str) -> anyhow::Result<()> {
    if name.is_empty() || name.contains('/') || name.contains("..") {
        anyhow::bail!("unsafe script name: {name}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_check() {
        assert!(check_name("deploy.sh").is_ok());
        assert!(check_name("").is_err());
        assert!(check_name("../evil").is_err());
        assert!(check_name("a/b").is_err());
    }
}
