//! In-process cache of trained model artifacts.
//!
//! Artifacts are keyed by `(kind, algorithm)` and shared as `Arc`s, so a
//! publish swaps the slot while in-flight predictions keep the artifact they
//! already hold. Each kind also has a live algorithm: the most recently
//! published one, used when a request does not name a variant.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ml::artifact::{ModelArtifact, ModelInfo};
use crate::ml::{Algorithm, ModelKind};

type Slot = (ModelKind, Algorithm);

pub struct ModelRegistry {
    model_dir: PathBuf,
    artifacts: RwLock<HashMap<Slot, Arc<ModelArtifact>>>,
    live: RwLock<HashMap<ModelKind, Algorithm>>,
    publishing: Mutex<HashMap<Slot, Arc<Mutex<()>>>>,
}

impl ModelRegistry {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            artifacts: RwLock::new(HashMap::new()),
            live: RwLock::new(HashMap::new()),
            publishing: Mutex::new(HashMap::new()),
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Picks the variant to serve: the requested one, else the live one,
    /// else the first supported variant with a file on disk (default first).
    pub fn resolve(&self, kind: ModelKind, requested: Option<Algorithm>) -> Result<Algorithm> {
        if let Some(algorithm) = requested {
            kind.check(algorithm)?;
            return Ok(algorithm);
        }
        if let Some(algorithm) = self.live.read().get(&kind).copied() {
            return Ok(algorithm);
        }
        let default = kind.default_algorithm();
        let on_disk = std::iter::once(default)
            .chain(kind.algorithms().iter().copied().filter(|a| *a != default))
            .find(|a| ModelArtifact::path_for(&self.model_dir, kind, *a).exists());
        Ok(on_disk.unwrap_or(default))
    }

    /// Returns the artifact for `kind`, loading it from disk on first use.
    pub fn get(&self, kind: ModelKind, requested: Option<Algorithm>) -> Result<Arc<ModelArtifact>> {
        let algorithm = self.resolve(kind, requested)?;
        if let Some(artifact) = self.artifacts.read().get(&(kind, algorithm)) {
            return Ok(Arc::clone(artifact));
        }

        let artifact = Arc::new(ModelArtifact::load(&self.model_dir, kind, algorithm)?);
        let mut slots = self.artifacts.write();
        // Another caller may have loaded or published meanwhile; keep theirs.
        let artifact = slots
            .entry((kind, algorithm))
            .or_insert(artifact)
            .clone();
        drop(slots);
        self.live.write().entry(kind).or_insert(algorithm);
        debug!(%kind, %algorithm, "Model artifact cached");
        Ok(artifact)
    }

    /// Persists a freshly trained artifact and makes it live for its kind.
    ///
    /// Publishes of one slot are serialized, so the file on disk and the
    /// cached artifact always come from the same publish.
    pub fn publish(&self, artifact: ModelArtifact) -> Result<Arc<ModelArtifact>> {
        artifact.ensure_trained()?;
        let (kind, algorithm) = (artifact.kind, artifact.model_type);
        let slot_lock = Arc::clone(
            self.publishing
                .lock()
                .entry((kind, algorithm))
                .or_default(),
        );
        let _publishing = slot_lock.lock();

        artifact.save(&self.model_dir)?;
        let artifact = Arc::new(artifact);
        self.artifacts
            .write()
            .insert((kind, algorithm), Arc::clone(&artifact));
        self.live.write().insert(kind, algorithm);
        info!(%kind, %algorithm, "Published model");
        Ok(artifact)
    }

    /// Info for every artifact in memory or on disk. Unreadable files are
    /// skipped with a warning.
    pub fn info(&self) -> Vec<ModelInfo> {
        let mut out = Vec::new();
        for kind in ModelKind::ALL {
            for &algorithm in kind.algorithms() {
                let cached = self.artifacts.read().get(&(kind, algorithm)).cloned();
                let artifact = match cached {
                    Some(a) => a,
                    None if ModelArtifact::path_for(&self.model_dir, kind, algorithm).exists() => {
                        match self.get(kind, Some(algorithm)) {
                            Ok(a) => a,
                            Err(e) => {
                                warn!(%kind, %algorithm, error = %e, "Skipping unreadable model");
                                continue;
                            }
                        }
                    }
                    None => continue,
                };
                out.push(artifact.info());
            }
        }
        out
    }

    pub fn live_algorithm(&self, kind: ModelKind) -> Option<Algorithm> {
        self.live.read().get(&kind).copied()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("model_dir", &self.model_dir)
            .field("cached", &self.artifacts.read().len())
            .finish()
    }
}
