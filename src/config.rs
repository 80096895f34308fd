use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{Entity, PromotionMode};
use crate::error::{PipelineError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "finlayer.toml";

pub const ENV_DB_PATH: &str = "FINLAYER_DB_PATH";
pub const ENV_BATCH_ROOT: &str = "FINLAYER_BATCH_ROOT";
pub const ENV_LOG_DIR: &str = "FINLAYER_LOG_DIR";

/// Engine settings. Passed explicitly to every stage; there is no global copy.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub store: StoreSettings,
    pub batches: BatchSettings,
    pub entities: BTreeMap<String, EntitySettings>,
    pub facts: FactSettings,
    pub logging: LoggingSettings,
    pub metrics: MetricsSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSettings {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/finlayer.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchSettings {
    /// Directory holding one sub-directory per entity.
    pub root: PathBuf,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("landing"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EntitySettings {
    pub enabled: bool,
    /// Overrides the entity's default promotion mode.
    pub mode: Option<PromotionMode>,
    /// Overrides `<batches.root>/<entity>`.
    pub root: Option<PathBuf>,
}

impl Default for EntitySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: None,
            root: None,
        }
    }
}

/// Window lengths, in rows, for the rolling stock statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FactSettings {
    pub volatility_window: usize,
    pub average_window: usize,
}

impl Default for FactSettings {
    fn default() -> Self {
        Self {
            volatility_window: 30,
            average_window: 90,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    pub dir: PathBuf,
    pub file_prefix: String,
    /// `EnvFilter` directives; `RUST_LOG` wins when set.
    pub filter: String,
    pub console: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            file_prefix: "finlayer.log".to_string(),
            filter: "finlayer=info".to_string(),
            console: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsSettings {
    /// Prometheus listener, e.g. `127.0.0.1:9898`. Unset disables the exporter.
    pub listen_addr: Option<String>,
}

impl Settings {
    /// Load settings from `path`, or from `finlayer.toml` when no path is
    /// given. A missing default file yields defaults; a missing explicit file
    /// is an error. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        Ok(settings)
    }

    /// Apply `FINLAYER_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty(ENV_DB_PATH) {
            self.store.path = PathBuf::from(v);
        }
        if let Some(v) = non_empty(ENV_BATCH_ROOT) {
            self.batches.root = PathBuf::from(v);
        }
        if let Some(v) = non_empty(ENV_LOG_DIR) {
            self.logging.dir = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.facts.volatility_window < 1 {
            return Err(PipelineError::Config(
                "facts.volatility_window must be at least 1".to_string(),
            ));
        }
        if self.facts.average_window < 1 {
            return Err(PipelineError::Config(
                "facts.average_window must be at least 1".to_string(),
            ));
        }
        for name in self.entities.keys() {
            name.parse::<Entity>().map_err(PipelineError::Config)?;
        }
        if let Some(addr) = &self.metrics.listen_addr {
            addr.parse::<std::net::SocketAddr>().map_err(|e| {
                PipelineError::Config(format!("metrics.listen_addr '{addr}': {e}"))
            })?;
        }
        Ok(())
    }

    pub fn entity(&self, entity: Entity) -> EntitySettings {
        self.entities
            .iter()
            .find(|(name, _)| name.parse::<Entity>().ok() == Some(entity))
            .map(|(_, s)| s.clone())
            .unwrap_or_default()
    }

    pub fn is_enabled(&self, entity: Entity) -> bool {
        self.entity(entity).enabled
    }

    pub fn mode_for(&self, entity: Entity) -> PromotionMode {
        self.entity(entity)
            .mode
            .unwrap_or_else(|| entity.default_mode())
    }

    pub fn entity_root(&self, entity: Entity) -> PathBuf {
        self.entity(entity)
            .root
            .unwrap_or_else(|| self.batches.root.join(entity.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.facts.volatility_window, 30);
        assert_eq!(settings.facts.average_window, 90);
        assert_eq!(
            settings.entity_root(Entity::Macro),
            PathBuf::from("landing/macro")
        );
        assert_eq!(
            settings.mode_for(Entity::CompanyMeta),
            PromotionMode::FullReplace
        );
    }

    #[test]
    fn entity_sections_override_mode_and_root() {
        let settings = Settings::from_toml_str(
            r#"
            [batches]
            root = "/srv/landing"

            [entities.exchange_rate]
            mode = "full_replace"
            root = "/srv/fx"

            [entities.macro]
            enabled = false
            "#,
        )
        .unwrap();
        settings.validate().unwrap();
        assert_eq!(
            settings.mode_for(Entity::ExchangeRate),
            PromotionMode::FullReplace
        );
        assert_eq!(settings.entity_root(Entity::ExchangeRate), PathBuf::from("/srv/fx"));
        assert_eq!(
            settings.entity_root(Entity::Ohlcv),
            PathBuf::from("/srv/landing/ohlcv")
        );
        assert!(!settings.is_enabled(Entity::Macro));
        assert!(settings.is_enabled(Entity::Ohlcv));
    }

    #[test]
    fn unknown_entity_is_rejected() {
        let settings = Settings::from_toml_str("[entities.bonds]\nenabled = true\n").unwrap();
        assert!(matches!(settings.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Settings::from_toml_str("[store]\npth = \"x.db\"\n").is_err());
    }

    #[test]
    fn zero_window_is_rejected() {
        let settings = Settings::from_toml_str("[facts]\naverage_window = 0\n").unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn environment_overrides_paths() {
        let mut settings = Settings::default();
        settings.apply_overrides(|key| match key {
            ENV_DB_PATH => Some("/tmp/x.db".to_string()),
            ENV_BATCH_ROOT => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(settings.store.path, PathBuf::from("/tmp/x.db"));
        assert_eq!(settings.batches.root, PathBuf::from("landing"));
    }
}
