use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::bundle::TrainedModelBundle;
use crate::config::EngineConfig;
use crate::error::{ForecastError, Result};

/// Bumped whenever the encoded layout of [`TrainedModelBundle`] changes.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    format_version: u32,
    bundle: &'a TrainedModelBundle,
}

/// Directory of saved model artifacts, created on first save.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.models_dir.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolves an artifact name to a path, leaving paths with a directory
    /// component untouched.
    pub fn resolve(&self, name: &str) -> PathBuf {
        let candidate = Path::new(name);
        if candidate.components().count() > 1 || candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.dir.join(candidate)
        }
    }

    /// Writes `bundle` under `name` (or a timestamped name) and returns the
    /// artifact path. The file is written beside its final location and
    /// renamed into place, so readers never observe a partial artifact.
    pub fn save(&self, bundle: &TrainedModelBundle, name: Option<&str>) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let name = name.map(str::to_string).unwrap_or_else(default_artifact_name);
        let path = self.dir.join(&name);
        let staging = self.dir.join(format!(".{name}.tmp"));

        let envelope = EnvelopeRef {
            format_version: ARTIFACT_FORMAT_VERSION,
            bundle,
        };
        {
            let mut writer = BufWriter::new(fs::File::create(&staging)?);
            bincode::serialize_into(&mut writer, &envelope).map_err(ForecastError::Encode)?;
            writer.flush()?;
        }
        fs::rename(&staging, &path)?;

        log::info!("saved {} model to {}", bundle.algorithm(), path.display());
        Ok(path)
    }

    /// Reads an artifact back, checking its format version and schema.
    pub fn load(&self, path: &Path) -> Result<TrainedModelBundle> {
        load(path)
    }
}

/// `model_<YYYYmmdd_HHMMSS>.bin` for the current UTC time.
pub fn default_artifact_name() -> String {
    format!("model_{}.bin", Utc::now().format("%Y%m%d_%H%M%S"))
}

pub fn load(path: &Path) -> Result<TrainedModelBundle> {
    if !path.exists() {
        return Err(ForecastError::MissingArtifact(path.to_path_buf()));
    }
    let bytes = fs::read(path)?;
    let corrupt = |source| ForecastError::CorruptArtifact {
        path: path.to_path_buf(),
        source,
    };

    // The version is the leading field, so it can be checked before the body.
    let format_version: u32 = bincode::deserialize(&bytes).map_err(corrupt)?;
    if format_version != ARTIFACT_FORMAT_VERSION {
        return Err(ForecastError::UnsupportedArtifactVersion {
            found: format_version,
            supported: ARTIFACT_FORMAT_VERSION,
        });
    }

    let (_, bundle): (u32, TrainedModelBundle) = bincode::deserialize(&bytes).map_err(corrupt)?;
    bundle.validate_schema()?;
    log::info!(
        "loaded {} model from {} (trained {})",
        bundle.algorithm(),
        path.display(),
        bundle.trained_at().format("%Y-%m-%d %H:%M:%S")
    );
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Algorithm, FitParams};
    use crate::config::CrossValidationConfig;
    use crate::models::{StudentRecord, StudentTable};
    use crate::trainer::fit_bundle;

    fn bundle() -> TrainedModelBundle {
        let records = [92.0, 88.0, 74.0, 71.0, 55.0, 52.0, 40.0, 20.0]
            .iter()
            .map(|score| StudentRecord {
                attendance: Some(*score),
                assignment_score: Some(*score),
                quiz_score: Some(*score),
                ..StudentRecord::default()
            })
            .collect();
        let cv = CrossValidationConfig {
            enabled: false,
            ..CrossValidationConfig::default()
        };
        fit_bundle(
            &StudentTable::new(records),
            Algorithm::LogisticRegression,
            &FitParams::default(),
            &cv,
        )
        .unwrap()
        .0
    }

    #[test]
    fn save_creates_directory_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("nested").join("models"));
        let original = bundle();

        let path = store.save(&original, Some("current.bin")).unwrap();
        assert!(path.ends_with("current.bin"));
        let loaded = store.load(&path).unwrap();
        assert_eq!(loaded, original);
        assert_eq!(loaded.scaler(), original.scaler());
    }

    #[test]
    fn default_names_are_timestamped() {
        let name = default_artifact_name();
        assert!(name.starts_with("model_"));
        assert!(name.ends_with(".bin"));
        assert_eq!(name.len(), "model_20250101_120000.bin".len());
    }

    #[test]
    fn missing_artifact_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("absent.bin")).unwrap_err();
        assert!(matches!(err, ForecastError::MissingArtifact(_)));
    }

    #[test]
    fn garbage_is_a_corrupt_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.bin");
        fs::write(&path, b"\x01\x00").unwrap();
        assert!(matches!(
            load(&path).unwrap_err(),
            ForecastError::CorruptArtifact { .. }
        ));
    }

    #[test]
    fn future_format_versions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.bin");
        fs::write(&path, bincode::serialize(&99u32).unwrap()).unwrap();
        assert!(matches!(
            load(&path).unwrap_err(),
            ForecastError::UnsupportedArtifactVersion { found: 99, .. }
        ));
    }

    #[test]
    fn mismatched_schema_fails_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let tampered = bundle().with_feature_names(vec!["attendance".to_string()]);
        let path = store.save(&tampered, Some("tampered.bin")).unwrap();

        assert!(matches!(
            store.load(&path).unwrap_err(),
            ForecastError::SchemaMismatch { .. }
        ));
    }

    #[test]
    fn bare_names_resolve_inside_the_store() {
        let store = ModelStore::new("models");
        assert_eq!(store.resolve("a.bin"), PathBuf::from("models/a.bin"));
        assert_eq!(store.resolve("other/a.bin"), PathBuf::from("other/a.bin"));
    }
}
