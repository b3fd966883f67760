//! Model store: loads vocabularies and classifier artifacts at startup
//!
//! Everything is read once into an immutable [`ModelContext`]. Any failure
//! while loading an enabled domain aborts startup.

use std::collections::HashMap;
use std::path::Path;

use crate::classifier::ClassifierHandle;
use crate::config::RecommenderConfig;
use crate::core::unified_error::ModelLoadError;
use crate::encoder::{Domain, FieldSpec};
use crate::ensemble::{check_role_names, Ensemble};
use crate::labels::{LabelRegistry, Vocabulary};

fn read_artifact(path: &Path) -> Result<String, ModelLoadError> {
    if !path.exists() {
        return Err(ModelLoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    std::fs::read_to_string(path).map_err(|source| ModelLoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a vocabulary (JSON array of strings, index = code)
pub fn load_vocabulary(path: &Path) -> Result<Vocabulary, ModelLoadError> {
    let json = read_artifact(path)?;
    Vocabulary::from_json(&json).map_err(|source| ModelLoadError::Artifact {
        path: path.to_path_buf(),
        source,
    })
}

/// Load one classifier artifact and bind it to `role`
pub fn load_classifier(
    path: &Path,
    role: &str,
    domain: Domain,
) -> Result<ClassifierHandle, ModelLoadError> {
    let json = read_artifact(path)?;
    ClassifierHandle::from_json(role, domain, &json).map_err(|source| ModelLoadError::Artifact {
        path: path.to_path_buf(),
        source,
    })
}

/// Process-wide, read-only model state shared by every request
#[derive(Debug, Default)]
pub struct ModelContext {
    registry: LabelRegistry,
    ensembles: HashMap<Domain, Ensemble>,
}

impl ModelContext {
    pub fn new(registry: LabelRegistry, ensembles: Vec<Ensemble>) -> Self {
        let ensembles = ensembles.into_iter().map(|e| (e.domain(), e)).collect();
        Self {
            registry,
            ensembles,
        }
    }

    /// Load every enabled domain described by `config`
    pub fn load(config: &RecommenderConfig) -> Result<Self, ModelLoadError> {
        let mut registry = LabelRegistry::new();
        let mut ensembles = Vec::new();

        for domain in Domain::ALL {
            let domain_cfg = config.domain(domain);
            if !domain_cfg.enabled {
                tracing::warn!(%domain, "domain disabled, requests will report it unavailable");
                continue;
            }

            check_role_names(domain, domain_cfg.roles.iter().map(|r| r.role.as_str()))?;

            let target_kind = domain.target_vocabulary();
            let target = load_vocabulary(&config.resolve(&domain_cfg.target_vocabulary))?;
            tracing::info!(%domain, kind = %target_kind, entries = target.len(), "loaded vocabulary");

            for spec in domain.schema() {
                if let FieldSpec::Categorical(_, kind) = spec {
                    let path = domain_cfg.feature_vocabularies.get(kind).ok_or(
                        ModelLoadError::MissingVocabulary {
                            domain,
                            kind: *kind,
                        },
                    )?;
                    let vocabulary = load_vocabulary(&config.resolve(path))?;
                    tracing::info!(%domain, %kind, entries = vocabulary.len(), "loaded vocabulary");
                    registry = registry.with(*kind, vocabulary);
                }
            }

            let mut members = Vec::with_capacity(domain_cfg.roles.len());
            for role_cfg in &domain_cfg.roles {
                let path = config.resolve(&role_cfg.path);
                let handle = load_classifier(&path, &role_cfg.role, domain)?;

                if handle.num_features() != domain.num_features() {
                    return Err(ModelLoadError::SchemaMismatch {
                        role: role_cfg.role.clone(),
                        domain,
                        expected: domain.num_features(),
                        actual: handle.num_features(),
                    });
                }
                if let Some(code) = handle.max_label_code().filter(|c| *c >= target.len()) {
                    return Err(ModelLoadError::LabelCodeOutOfRange {
                        role: role_cfg.role.clone(),
                        code,
                        vocabulary_size: target.len(),
                    });
                }

                tracing::info!(
                    %domain,
                    role = %role_cfg.role,
                    kind = %handle.kind(),
                    path = %path.display(),
                    "loaded classifier"
                );
                members.push(handle);
            }

            registry = registry.with(target_kind, target);
            let ensemble = Ensemble::new(domain, members)?
                .with_tie_break(config.tie_break)
                .with_parallel(config.parallel);
            ensembles.push(ensemble);
        }

        Ok(Self::new(registry, ensembles))
    }

    pub fn registry(&self) -> &LabelRegistry {
        &self.registry
    }

    pub fn ensemble(&self, domain: Domain) -> Option<&Ensemble> {
        self.ensembles.get(&domain)
    }

    pub fn is_available(&self, domain: Domain) -> bool {
        self.ensembles.contains_key(&domain)
    }
}
