use crate::remote::AutotagOption;
use crate::{Error, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub trait PersistentConfig: Serialize + for<'de> Deserialize<'de> + Default {
    fn read_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let data = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&data)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Ok(config)
    }

    fn write_to_file(&self, path: &Path) -> Result<()> {
        let data = toml::to_string(self)?;
        fs::write(path, data)?;
        debug!("config saved to {}", path.display());
        Ok(())
    }
}

/// Repository configuration stored as TOML in `<repo>/config`.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct RepoConfig {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub remote: Vec<RemoteConfig>,
}

impl PersistentConfig for RepoConfig {}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct CoreConfig {
    #[serde(default)]
    pub bare: bool,
}

/// A `[[remote]]` table.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub fetch: Vec<String>,
    #[serde(default)]
    pub push: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagopt: Option<AutotagOption>,
}

impl RepoConfig {
    pub fn remotes(&self) -> &[RemoteConfig] {
        &self.remote
    }

    pub fn find_remote(&self, name: &str) -> Option<&RemoteConfig> {
        self.remote.iter().find(|remote| remote.name == name)
    }

    pub fn add_remote(&mut self, remote: RemoteConfig) -> Result<()> {
        if self.find_remote(&remote.name).is_some() {
            return Err(Error::Config(format!(
                "remote `{}` already exists",
                remote.name
            )));
        }
        self.remote.push(remote);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn origin() -> RemoteConfig {
        RemoteConfig {
            name: "origin".to_string(),
            url: "file:///srv/repo".to_string(),
            fetch: vec!["+refs/heads/*:refs/remotes/origin/*".to_string()],
            push: vec![],
            tagopt: Some(AutotagOption::All),
        }
    }

    #[test]
    fn test_add_remote_rejects_duplicates() {
        let mut config = RepoConfig::default();
        config.add_remote(origin()).unwrap();
        assert!(config.add_remote(origin()).is_err());
        assert_eq!(config.remotes().len(), 1);
    }

    #[test]
    fn test_toml_layout() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config");
        fs::write(
            &path,
            r#"
[core]
bare = true

[[remote]]
name = "origin"
url = "file:///srv/repo"
fetch = ["+refs/heads/*:refs/remotes/origin/*"]
tagopt = "all"
"#,
        )
        .unwrap();

        let config = RepoConfig::read_from_file(&path).unwrap();
        assert!(config.core.bare);
        assert_eq!(config.find_remote("origin"), Some(&origin()));

        config.write_to_file(&path).unwrap();
        assert_eq!(RepoConfig::read_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_default() {
        let tmp = tempdir().unwrap();
        let config = RepoConfig::read_from_file(&tmp.path().join("absent")).unwrap();
        assert_eq!(config, RepoConfig::default());
    }
}
