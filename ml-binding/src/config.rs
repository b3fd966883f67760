//! Configuration for the recommendation engine
//!
//! Loaded from a YAML file with a top-level `recommender` key:
//!
//! ```yaml
//! recommender:
//!   model_root: ./models
//!   tie_break: first_role      # or: lexicographic
//!   parallel: true
//!   crop:
//!     target_vocabulary: crop_recommendation/label_dictionary.json
//!     roles:
//!       - { role: xgb, path: crop_recommendation/xgb_pipeline.json }
//!       - { role: rf,  path: crop_recommendation/rf_pipeline.json }
//!       - { role: knn, path: crop_recommendation/knn_pipeline.json }
//!   fertilizer:
//!     enabled: false
//! ```
//!
//! Defaults mirror the layout the training scripts write to. A domain section
//! is an overlay on its domain's defaults: fields it leaves out keep their
//! default values, so `crop: { target_vocabulary: v2.json }` still loads the
//! three default crop roles.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::unified_error::ConfigError;
use crate::encoder::Domain;
use crate::ensemble::TieBreak;
use crate::labels::VocabularyKind;

/// Environment variable pointing at the YAML config file
pub const CONFIG_ENV_VAR: &str = "AGRI_RECOMMENDER_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawRecommenderConfig")]
pub struct RecommenderConfig {
    /// Base directory for relative artifact paths
    pub model_root: PathBuf,
    pub tie_break: TieBreak,
    /// Run ensemble roles concurrently
    pub parallel: bool,
    pub crop: DomainConfig,
    pub fertilizer: DomainConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub enabled: bool,
    /// Vocabulary the predicted class codes decode through
    pub target_vocabulary: PathBuf,
    /// Vocabularies for categorical input columns
    pub feature_vocabularies: HashMap<VocabularyKind, PathBuf>,
    /// Ensemble members in canonical order
    pub roles: Vec<RoleConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub role: String,
    pub path: PathBuf,
}

impl DomainConfig {
    fn defaults_for(domain: Domain) -> Self {
        let dir = match domain {
            Domain::Crop => "crop_recommendation",
            Domain::Fertilizer => "fertilizer_recommendation",
        };
        let roles = domain
            .default_roles()
            .iter()
            .map(|role| RoleConfig {
                role: role.to_string(),
                path: PathBuf::from(format!("{}/{}_pipeline.json", dir, role)),
            })
            .collect();

        match domain {
            Domain::Crop => Self {
                enabled: true,
                target_vocabulary: PathBuf::from(format!("{}/label_dictionary.json", dir)),
                feature_vocabularies: HashMap::new(),
                roles,
            },
            Domain::Fertilizer => Self {
                enabled: true,
                target_vocabulary: PathBuf::from(format!("{}/fertname_dict.json", dir)),
                feature_vocabularies: HashMap::from([
                    (
                        VocabularyKind::SoilType,
                        PathBuf::from(format!("{}/soiltype_dict.json", dir)),
                    ),
                    (
                        VocabularyKind::CropType,
                        PathBuf::from(format!("{}/croptype_dict.json", dir)),
                    ),
                ]),
                roles,
            },
        }
    }
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            model_root: PathBuf::from("./models"),
            tie_break: TieBreak::FirstRole,
            parallel: true,
            crop: DomainConfig::defaults_for(Domain::Crop),
            fertilizer: DomainConfig::defaults_for(Domain::Fertilizer),
        }
    }
}

/// Domain section as written in YAML; unset fields keep the domain default
#[derive(Debug, Default, Deserialize)]
struct DomainOverlay {
    enabled: Option<bool>,
    target_vocabulary: Option<PathBuf>,
    feature_vocabularies: Option<HashMap<VocabularyKind, PathBuf>>,
    roles: Option<Vec<RoleConfig>>,
}

impl DomainOverlay {
    fn apply(self, domain: Domain) -> DomainConfig {
        let defaults = DomainConfig::defaults_for(domain);
        DomainConfig {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            target_vocabulary: self.target_vocabulary.unwrap_or(defaults.target_vocabulary),
            feature_vocabularies: self
                .feature_vocabularies
                .unwrap_or(defaults.feature_vocabularies),
            roles: self.roles.unwrap_or(defaults.roles),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawRecommenderConfig {
    model_root: PathBuf,
    tie_break: TieBreak,
    parallel: bool,
    crop: Option<DomainOverlay>,
    fertilizer: Option<DomainOverlay>,
}

impl Default for RawRecommenderConfig {
    fn default() -> Self {
        let defaults = RecommenderConfig::default();
        Self {
            model_root: defaults.model_root,
            tie_break: defaults.tie_break,
            parallel: defaults.parallel,
            crop: None,
            fertilizer: None,
        }
    }
}

impl From<RawRecommenderConfig> for RecommenderConfig {
    fn from(raw: RawRecommenderConfig) -> Self {
        Self {
            model_root: raw.model_root,
            tie_break: raw.tie_break,
            parallel: raw.parallel,
            crop: raw.crop.unwrap_or_default().apply(Domain::Crop),
            fertilizer: raw.fertilizer.unwrap_or_default().apply(Domain::Fertilizer),
        }
    }
}

#[derive(Deserialize)]
struct ConfigWrapper {
    #[serde(default)]
    recommender: RecommenderConfig,
}

impl RecommenderConfig {
    pub fn domain(&self, domain: Domain) -> &DomainConfig {
        match domain {
            Domain::Crop => &self.crop,
            Domain::Fertilizer => &self.fertilizer,
        }
    }

    /// Resolve an artifact path against `model_root`
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.model_root.join(path)
        }
    }

    /// Load config from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let wrapper: ConfigWrapper =
            serde_yaml::from_str(&yaml_str).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(wrapper.recommender)
    }

    /// Load from the file named by `AGRI_RECOMMENDER_CONFIG`, or use defaults
    pub fn load_from_env_and_defaults() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(config_path) => {
                tracing::info!("Loading recommender config from: {}", config_path);
                Self::from_file(config_path)
            }
            Err(_) => {
                tracing::debug!("{} not set, using default config", CONFIG_ENV_VAR);
                Ok(Self::default())
            }
        }
    }
}
