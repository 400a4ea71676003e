//! The Filter Mapper (C4): validates and rewrites per-model photometric
//! filter names against a catalog fetched once from a remote YAML document
//! and cached to a local file, the way this service's other remote-backed
//! components keep a local fallback copy.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::FilterError;

/// Models whose filter names pass through unchanged: the central-wavelength
/// family doesn't key off named photometric filters the way trained models
/// do.
const CENTRAL_WAVELENGTH_MODELS: &[&str] =
    &["Me2017", "Piro2021", "nugent-hyper", "TrPi2018"];

/// Suffix appended to trained-model names that lack it already, mirroring
/// the original service's model-name normalization.
const TRAINED_MODEL_SUFFIX: &str = "_tf";

/// Static alias table for filters whose SDSS-style name differs from the
/// Pan-STARRS-style name a trained model actually expects.
fn static_aliases() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("sdssg", "ps1__g"),
        ("sdssr", "ps1__r"),
        ("sdssi", "ps1__i"),
        ("sdssz", "ps1__z"),
        ("sdssu", "ps1__u"),
    ])
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelCatalog {
    pub models: HashMap<String, Vec<String>>,
}

/// Holds the model/filter catalog fetched once at process start.
pub struct FilterMapper {
    catalog: ModelCatalog,
}

impl FilterMapper {
    /// Builds a mapper directly from an in-memory catalog. Used by tests
    /// and by callers who already hold a parsed document.
    pub fn from_catalog(catalog: ModelCatalog) -> Self {
        Self { catalog }
    }

    /// Fetches the catalog from `url`, writing a copy to `cache_path` on
    /// success so a later process start can fall back to it if the remote
    /// is unreachable.
    pub async fn fetch(url: &str, cache_path: &Path) -> Result<Self, FilterError> {
        match Self::fetch_remote(url).await {
            Ok(catalog) => {
                if let Ok(yaml) = serde_yaml::to_string(&catalog) {
                    let _ = tokio::fs::write(cache_path, yaml).await;
                }
                Ok(Self { catalog })
            }
            Err(remote_err) => match Self::load_cached(cache_path).await {
                Ok(catalog) => Ok(Self { catalog }),
                Err(_) => Err(remote_err),
            },
        }
    }

    async fn fetch_remote(url: &str) -> Result<ModelCatalog, FilterError> {
        let body = reqwest::get(url).await?.text().await?;
        let catalog: ModelCatalog = serde_yaml::from_str(&body)?;
        Ok(catalog)
    }

    async fn load_cached(cache_path: &Path) -> Result<ModelCatalog, FilterError> {
        let bytes = tokio::fs::read(cache_path).await?;
        let catalog: ModelCatalog = serde_yaml::from_slice(&bytes)?;
        Ok(catalog)
    }

    pub fn cache_path(base_dir: &Path) -> PathBuf {
        base_dir.join("filter_catalog.yaml")
    }

    /// Normalizes `model` and validates that `filter` is acceptable for it,
    /// returning the filter name that should be persisted. Central
    /// wavelength models pass the filter through unchanged.
    pub fn map_filter(&self, model: &str, filter: &str) -> Result<String, FilterError> {
        if CENTRAL_WAVELENGTH_MODELS.contains(&model) {
            return Ok(filter.to_owned());
        }

        let normalized_model = normalize_model_name(model);
        let allowed = self
            .catalog
            .models
            .get(&normalized_model)
            .ok_or_else(|| FilterError::UnknownModel(model.to_owned()))?;

        if allowed.iter().any(|f| f == filter) {
            return Ok(filter.to_owned());
        }

        if let Some(alias) = static_aliases().get(filter) {
            if allowed.iter().any(|f| f == alias) {
                return Ok((*alias).to_owned());
            }
        }

        Err(FilterError::UnknownFilter {
            model: model.to_owned(),
            filter: filter.to_owned(),
        })
    }

    pub fn is_allowed_model(&self, model: &str) -> bool {
        CENTRAL_WAVELENGTH_MODELS.contains(&model)
            || self.catalog.models.contains_key(&normalize_model_name(model))
    }
}

fn normalize_model_name(model: &str) -> String {
    if model.ends_with(TRAINED_MODEL_SUFFIX) {
        model.to_owned()
    } else {
        format!("{model}{TRAINED_MODEL_SUFFIX}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> FilterMapper {
        FilterMapper::from_catalog(ModelCatalog {
            models: HashMap::from([(
                "Bu2022Ye_tf".to_owned(),
                vec!["ps1__g".to_owned(), "ps1__r".to_owned()],
            )]),
        })
    }

    #[test]
    fn central_wavelength_models_pass_through() {
        let m = mapper();
        assert_eq!(m.map_filter("Me2017", "anything").unwrap(), "anything");
    }

    #[test]
    fn known_filter_is_returned_unchanged() {
        let m = mapper();
        assert_eq!(m.map_filter("Bu2022Ye", "ps1__g").unwrap(), "ps1__g");
    }

    #[test]
    fn sdss_alias_is_rewritten() {
        let m = mapper();
        assert_eq!(m.map_filter("Bu2022Ye", "sdssg").unwrap(), "ps1__g");
    }

    #[test]
    fn mapping_a_mapped_filter_again_is_a_no_op() {
        let m = mapper();
        for (model, filter) in [("Me2017", "johnson__v"), ("Bu2022Ye", "sdssg")] {
            let mapped = m.map_filter(model, filter).unwrap();
            assert_eq!(m.map_filter(model, &mapped).unwrap(), mapped);
        }
    }

    #[test]
    fn unknown_filter_is_rejected() {
        let m = mapper();
        assert!(matches!(
            m.map_filter("Bu2022Ye", "johnson__v"),
            Err(FilterError::UnknownFilter { .. })
        ));
    }

    #[test]
    fn unknown_model_is_rejected() {
        let m = mapper();
        assert!(matches!(
            m.map_filter("not-a-model", "ps1__g"),
            Err(FilterError::UnknownModel(_))
        ));
    }
}
