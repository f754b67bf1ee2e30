use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::app::BuildOptions;
use crate::domain::{DateRange, FilterMode, SourceId};
use crate::error::TrendsError;
use crate::input::normalize_name;
use crate::openalex::{HttpSettings, OPENALEX_BASE};
use crate::resolver::{DEFAULT_PER_PAGE, Pick};

pub const LOCAL_CONFIG: &str = "preprint-trends.json";
const APP_DIR: &str = "preprint-trends";
const GLOBAL_CONFIG: &str = "config.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub mailto: Option<String>,
    #[serde(default)]
    pub per_page: Option<u32>,
    #[serde(default)]
    pub polite_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub filter: Option<FilterMode>,
    #[serde(default)]
    pub monthly: Option<bool>,
    #[serde(default)]
    pub date_from: Option<String>,
    #[serde(default)]
    pub date_to: Option<String>,
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ServerEntry {
    Shorthand(String),
    Detailed(ServerEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerEntryObject {
    pub name: String,
    #[serde(default)]
    pub ids: Option<Vec<String>>,
    #[serde(default)]
    pub pick: Option<Pick>,
}

/// One configured server. Non-empty `ids` skip name resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerRequest {
    pub name: String,
    pub ids: Vec<SourceId>,
    pub pick: Option<Pick>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub path: Option<PathBuf>,
    pub http: HttpSettings,
    pub per_page: u32,
    pub build: BuildOptions,
    pub servers: Vec<ServerRequest>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            path: None,
            http: HttpSettings::default(),
            per_page: DEFAULT_PER_PAGE,
            build: BuildOptions::default(),
            servers: Vec::new(),
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub mailto: Option<String>,
    pub per_page: Option<u32>,
    pub filter: Option<FilterMode>,
    pub monthly: Option<bool>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

impl ResolvedConfig {
    pub fn apply(mut self, overrides: ConfigOverrides) -> Result<Self, TrendsError> {
        if let Some(base_url) = overrides.base_url {
            self.http.base_url = base_url;
        }
        if let Some(mailto) = overrides.mailto {
            self.http.mailto = Some(mailto).filter(|value| !value.trim().is_empty());
        }
        if let Some(per_page) = overrides.per_page {
            self.per_page = per_page;
        }
        if let Some(filter) = overrides.filter {
            self.build.filter = filter;
        }
        if let Some(monthly) = overrides.monthly {
            self.build.monthly = monthly;
        }
        if overrides.date_from.is_some() || overrides.date_to.is_some() {
            let parsed =
                DateRange::parse(overrides.date_from.as_deref(), overrides.date_to.as_deref())?;
            let from = parsed.from.or(self.build.range.from);
            let to = parsed.to.or(self.build.range.to);
            self.build.range = DateRange::new(from, to)?;
        }
        Ok(self)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist. Without one, `./preprint-trends.json`
    /// and then the per-user config are tried; no file means defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, TrendsError> {
        let config_path = match path {
            Some(path) => {
                let path = PathBuf::from(path);
                if !path.exists() {
                    return Err(TrendsError::MissingConfig(path));
                }
                Some(path)
            }
            None => Self::candidates().into_iter().find(|path| path.exists()),
        };

        let Some(config_path) = config_path else {
            debug!("no config file found, using defaults");
            return Ok(ResolvedConfig::default());
        };
        let mut resolved = Self::load(&config_path)?;
        resolved.path = Some(config_path);
        Ok(resolved)
    }

    pub fn load(path: &Path) -> Result<ResolvedConfig, TrendsError> {
        let content =
            fs::read_to_string(path).map_err(|_| TrendsError::ConfigRead(path.to_path_buf()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| TrendsError::ConfigParse(err.to_string()))?;
        debug!(path = %path.display(), "loaded config");
        Self::resolve_config(config)
    }

    pub fn candidates() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(dirs) = BaseDirs::new() {
            paths.push(dirs.config_dir().join(APP_DIR).join(GLOBAL_CONFIG));
        }
        paths
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, TrendsError> {
        let defaults = HttpSettings::default();
        let http = HttpSettings {
            base_url: config
                .base_url
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(|| OPENALEX_BASE.to_string()),
            mailto: config.mailto.filter(|value| !value.trim().is_empty()),
            polite_delay: config
                .polite_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.polite_delay),
            max_retries: config.max_retries.unwrap_or(defaults.max_retries),
            timeout: defaults.timeout,
        };

        let build = BuildOptions {
            range: DateRange::parse(config.date_from.as_deref(), config.date_to.as_deref())?,
            filter: config.filter.unwrap_or_default(),
            monthly: config.monthly.unwrap_or(false),
        };

        let servers = config
            .servers
            .into_iter()
            .map(|entry| match entry {
                ServerEntry::Shorthand(name) => Ok(ServerRequest {
                    name: normalize_name(&name),
                    ids: Vec::new(),
                    pick: None,
                }),
                ServerEntry::Detailed(obj) => Ok(ServerRequest {
                    name: normalize_name(&obj.name),
                    ids: obj
                        .ids
                        .unwrap_or_default()
                        .iter()
                        .map(|id| id.parse())
                        .collect::<Result<Vec<SourceId>, TrendsError>>()?,
                    pick: obj.pick,
                }),
            })
            .filter(|request: &Result<ServerRequest, TrendsError>| {
                request.as_ref().map_or(true, |request| !request.name.is_empty())
            })
            .collect::<Result<Vec<_>, TrendsError>>()?;

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            path: None,
            http,
            per_page: config.per_page.unwrap_or(DEFAULT_PER_PAGE),
            build,
            servers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_shorthand() {
        let config = Config {
            servers: vec![
                ServerEntry::Shorthand("bioRxiv".to_string()),
                ServerEntry::Shorthand("  ".to_string()),
            ],
            ..Config::default()
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.servers.len(), 1);
        assert_eq!(resolved.per_page, DEFAULT_PER_PAGE);
        assert_eq!(resolved.http.base_url, OPENALEX_BASE);
        assert!(!resolved.build.monthly);
    }
}
