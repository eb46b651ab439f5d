//! Configuration file parsing for `cogvm.toml`.
//!
//! Searches the current directory then its ancestors. Relative paths in the
//! file are taken relative to the directory holding it. A missing file
//! means defaults: a file store under `.cogvm`, no file access, no
//! instruction limit.

use cogvm_vm::EngineOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "cogvm.toml";

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct CogvmConfig {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub sandbox: SandboxSection,
    #[serde(default)]
    pub engine: EngineSection,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StoreSection {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
    /// Gzip stored records.
    #[serde(default)]
    pub compress: bool,
}

impl Default for StoreSection {
    fn default() -> Self {
        StoreSection {
            backend: StoreBackend::File,
            dir: default_store_dir(),
            compress: false,
        }
    }
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".cogvm")
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct SandboxSection {
    /// Directories programs may touch through the `FS_*` opcodes. Empty
    /// denies all file access.
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    #[serde(default)]
    pub allow_write: bool,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct EngineSection {
    #[serde(default)]
    pub instruction_limit: Option<u64>,
}

impl CogvmConfig {
    /// Load the nearest config, or defaults if there is none.
    pub fn load() -> Result<Self, String> {
        Ok(Self::load_with_path()?
            .map(|(_path, cfg)| cfg)
            .unwrap_or_default())
    }

    /// Load the nearest config and return the path it came from.
    pub fn load_with_path() -> Result<Option<(PathBuf, Self)>, String> {
        let Ok(mut dir) = std::env::current_dir() else {
            return Ok(None);
        };
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                let cfg = Self::load_from(&config_path)?;
                return Ok(Some((config_path, cfg)));
            }
            if !dir.pop() {
                return Ok(None);
            }
        }
    }

    /// Load config from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read '{}': {}", path.display(), e))?;
        let cfg = Self::from_toml(&content)
            .map_err(|e| format!("invalid toml in '{}': {}", path.display(), e))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(cfg.relative_to(base))
    }

    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Anchor relative store and sandbox paths at `base`.
    pub fn relative_to(mut self, base: &Path) -> Self {
        if self.store.dir.is_relative() {
            self.store.dir = base.join(&self.store.dir);
        }
        for root in &mut self.sandbox.roots {
            if root.is_relative() {
                *root = base.join(&*root);
            }
        }
        self
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            instruction_limit: self.engine.instruction_limit,
        }
    }

    pub fn default_template() -> &'static str {
        r#"# cogvm configuration

[store]
# "file" keeps executions between invocations; "memory" forgets them.
backend = "file"
dir = ".cogvm"
compress = false

[sandbox]
# Directories reachable through FS_LIST_FILES / FS_READ_FILE / FS_WRITE_FILE.
roots = []
allow_write = false

[engine]
# instruction_limit = 1000000
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_default() {
        let cfg = CogvmConfig::from_toml("").unwrap();
        assert_eq!(cfg, CogvmConfig::default());
        assert_eq!(cfg.store.backend, StoreBackend::File);
        assert_eq!(cfg.store.dir, PathBuf::from(".cogvm"));
        assert!(cfg.sandbox.roots.is_empty());
        assert_eq!(cfg.engine_options(), EngineOptions::default());
    }

    #[test]
    fn parse_all_sections() {
        let cfg = CogvmConfig::from_toml(
            r#"
            [store]
            backend = "memory"
            compress = true

            [sandbox]
            roots = ["docs", "/srv/data"]
            allow_write = true

            [engine]
            instruction_limit = 5000
            "#,
        )
        .unwrap();
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
        assert!(cfg.store.compress);
        assert_eq!(cfg.store.dir, PathBuf::from(".cogvm"));
        assert!(cfg.sandbox.allow_write);
        assert_eq!(cfg.engine_options().instruction_limit, Some(5000));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(CogvmConfig::from_toml("[store]\nbackend = \"redis\"").is_err());
    }

    #[test]
    fn relative_paths_are_anchored() {
        let cfg = CogvmConfig::from_toml("[sandbox]\nroots = [\"docs\", \"/abs\"]")
            .unwrap()
            .relative_to(Path::new("/project"));
        assert_eq!(cfg.store.dir, PathBuf::from("/project/.cogvm"));
        assert_eq!(
            cfg.sandbox.roots,
            vec![PathBuf::from("/project/docs"), PathBuf::from("/abs")]
        );
    }

    #[test]
    fn template_parses() {
        let cfg = CogvmConfig::from_toml(CogvmConfig::default_template()).unwrap();
        assert_eq!(cfg, CogvmConfig::default());
    }

    #[test]
    fn load_from_file() {
        let dir = std::env::temp_dir().join(format!("cogvm_config_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE);
        std::fs::write(&path, "[engine]\ninstruction_limit = 7\n").unwrap();

        let cfg = CogvmConfig::load_from(&path).unwrap();
        assert_eq!(cfg.engine.instruction_limit, Some(7));
        assert_eq!(cfg.store.dir, dir.join(".cogvm"));

        std::fs::write(&path, "[engine\n").unwrap();
        assert!(CogvmConfig::load_from(&path)
            .unwrap_err()
            .contains("invalid toml"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
