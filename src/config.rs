//! Persistent sort-tab preferences and defaults.

use std::path::{Path, PathBuf};

use log::info;

use crate::category::{Category, GROUPING_CATEGORIES};
use crate::query::{Combine, QueryRules, TimeCondition};
use crate::sort_key::{default_ignore_prefixes, SortOrder};

/// Upper bound on the number of stages, one per grouping category.
pub const MAX_STAGES: usize = 6;
/// Valid bits of a rating mask, zero to five stars.
pub const RATING_MASK_ALL: u32 = 0b11_1111;

const CONFIG_FILE_NAME: &str = "podtabs.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no user config directory available")]
    NoConfigDir,
    #[error("config i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("config could not be parsed: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config could not be written: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Root configuration persisted to `podtabs.toml`.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    pub sort_tabs: SortTabConfig,
    /// Per-stage settings, indexed by stage position.
    #[serde(default = "default_stages")]
    pub stages: Vec<StageConfig>,
}

/// Chain-wide preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SortTabConfig {
    #[serde(default = "default_sort_tab_num")]
    pub sort_tab_num: usize,
    #[serde(default = "default_true")]
    pub group_compilations: bool,
    #[serde(default)]
    pub st_sort: SortOrder,
    #[serde(default)]
    pub st_case_sensitive: bool,
    /// Categories whose entries sort without their leading article.
    #[serde(default = "default_sort_ign_fields")]
    pub sort_ign_fields: Vec<Category>,
    #[serde(default = "default_ignore_prefixes")]
    pub sort_ign_strings: Vec<String>,
}

/// Category and query defaults of one stage.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StageConfig {
    pub category: Category,
    #[serde(default)]
    pub sp_or: bool,
    #[serde(default)]
    pub sp_autodisplay: bool,
    #[serde(default)]
    pub sp_rating_cond: bool,
    #[serde(default)]
    pub sp_rating_state: u32,
    #[serde(default)]
    pub sp_playcount_cond: bool,
    #[serde(default)]
    pub sp_playcount_low: u32,
    #[serde(default = "default_playcount_high")]
    pub sp_playcount_high: i64,
    #[serde(default)]
    pub sp_played_cond: bool,
    #[serde(default)]
    pub sp_played_state: String,
    #[serde(default)]
    pub sp_modified_cond: bool,
    #[serde(default)]
    pub sp_modified_state: String,
    #[serde(default)]
    pub sp_added_cond: bool,
    #[serde(default)]
    pub sp_added_state: String,
}

/// A single preference edit pushed to a running pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PreferenceChange {
    StageCount(usize),
    GroupCompilations(bool),
    SortOrder(SortOrder),
    CaseSensitive(bool),
    IgnoreFields(Vec<Category>),
    IgnorePrefixes(Vec<String>),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sort_tabs: SortTabConfig::default(),
            stages: default_stages(),
        }
    }
}

impl Default for SortTabConfig {
    fn default() -> Self {
        Self {
            sort_tab_num: default_sort_tab_num(),
            group_compilations: true,
            st_sort: SortOrder::Ascending,
            st_case_sensitive: false,
            sort_ign_fields: default_sort_ign_fields(),
            sort_ign_strings: default_ignore_prefixes(),
        }
    }
}

impl StageConfig {
    pub fn for_category(category: Category) -> Self {
        Self {
            category,
            sp_or: false,
            sp_autodisplay: false,
            sp_rating_cond: false,
            sp_rating_state: 0,
            sp_playcount_cond: false,
            sp_playcount_low: 0,
            sp_playcount_high: default_playcount_high(),
            sp_played_cond: false,
            sp_played_state: String::new(),
            sp_modified_cond: false,
            sp_modified_state: String::new(),
            sp_added_cond: false,
            sp_added_state: String::new(),
        }
    }

    pub fn query_rules(&self) -> QueryRules {
        QueryRules {
            combine: if self.sp_or { Combine::Or } else { Combine::And },
            autodisplay: self.sp_autodisplay,
            rating_enabled: self.sp_rating_cond,
            rating_mask: self.sp_rating_state & RATING_MASK_ALL,
            playcount_enabled: self.sp_playcount_cond,
            playcount_low: self.sp_playcount_low,
            playcount_high: self.sp_playcount_high,
            played: TimeCondition {
                enabled: self.sp_played_cond,
                interval: self.sp_played_state.clone(),
            },
            modified: TimeCondition {
                enabled: self.sp_modified_cond,
                interval: self.sp_modified_state.clone(),
            },
            added: TimeCondition {
                enabled: self.sp_added_cond,
                interval: self.sp_added_state.clone(),
            },
        }
    }
}

impl Config {
    /// Settings of stage `index`, falling back to the default category order.
    pub fn stage(&self, index: usize) -> StageConfig {
        self.stages
            .get(index)
            .cloned()
            .unwrap_or_else(|| StageConfig::for_category(default_category(index)))
    }

    pub fn ignores_prefix(&self, category: Category) -> bool {
        self.sort_tabs.sort_ign_fields.contains(&category)
    }
}

pub fn default_category(index: usize) -> Category {
    GROUPING_CATEGORIES[index % GROUPING_CATEGORIES.len()]
}

fn default_true() -> bool {
    true
}

fn default_sort_tab_num() -> usize {
    2
}

fn default_playcount_high() -> i64 {
    -1
}

fn default_sort_ign_fields() -> Vec<Category> {
    vec![
        Category::Artist,
        Category::Album,
        Category::Composer,
        Category::Title,
    ]
}

fn default_stages() -> Vec<StageConfig> {
    GROUPING_CATEGORIES
        .iter()
        .map(|category| StageConfig::for_category(*category))
        .collect()
}

/// Clamps values that would break the chain.
pub fn sanitize_config(config: Config) -> Config {
    let stages = config
        .stages
        .into_iter()
        .map(|stage| StageConfig {
            sp_rating_state: stage.sp_rating_state & RATING_MASK_ALL,
            sp_playcount_high: stage.sp_playcount_high.max(-1),
            ..stage
        })
        .collect();

    Config {
        sort_tabs: SortTabConfig {
            sort_tab_num: config.sort_tabs.sort_tab_num.clamp(1, MAX_STAGES),
            ..config.sort_tabs
        },
        stages,
    }
}

pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

/// Reads `path`, writing the defaults first when it does not exist yet.
pub fn load_or_create(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string(&Config::default())?)?;
    }

    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str::<Config>(&content)?;
    Ok(sanitize_config(config))
}
