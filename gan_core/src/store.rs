//! Parameter store.
//!
//! [`ParamStore`] is the explicit context passed to every layer
//! constructor. It maps a stable key (`"{scope}/kernel"`, `"{scope}/bias"`,
//! ...) to the parameter's value and owns the spectral-normalisation state
//! of each normalised weight. Layers call [`ParamStore::get_or_create`], so
//! the first forward pass creates parameters and later passes reuse them.
//!
//! Concurrency: the parameter map sits behind a `RwLock`; each spectral
//! state has its own `Mutex`, held for the whole read-iterate-assign cycle
//! in [`crate::spectral::SpectralNorm::apply`].
//!
//! The starting `u` of a spectral state depends only on the store seed and
//! the key, so it does not change with creation order or across a
//! checkpoint restore.

use std::collections::BTreeMap;
use std::sync::Arc;

use ndarray::{Array2, ArrayD};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checkpoint::Checkpointable;
use crate::error::{CheckpointError, OpsError, OpsResult};
use crate::init::{Initializer, DEFAULT_SEED};
use crate::regularizer::{Regularizer, RegularizerKind};
use crate::spectral::{vector_norm, SpectralState};

/// Layout version of [`StoreSnapshot`], written into the checkpoint header.
pub const SNAPSHOT_VERSION: u32 = 2;

/// A stored parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub value: ArrayD<f32>,
    /// Whether an optimiser should update this parameter.
    pub trainable: bool,
    /// Penalty contributed to [`ParamStore::regularization_loss`].
    pub regularizer: Option<RegularizerKind>,
}

/// Summary of one spectral state, written to the spectral journal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectralRecord {
    pub key: String,
    pub sigma: Option<f32>,
    pub updates: u64,
    pub u_norm: f32,
}

/// Serializable copy of a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub seed: u64,
    pub params: BTreeMap<String, Parameter>,
    pub spectral: BTreeMap<String, SpectralState>,
}

/// Get-or-create parameter store.
pub struct ParamStore {
    seed: u64,
    params: RwLock<BTreeMap<String, Parameter>>,
    spectral: RwLock<BTreeMap<String, Arc<Mutex<SpectralState>>>>,
}

/// 64-bit FNV-1a of `key`. Fixed constants, so the value never depends on
/// the platform or the toolchain.
fn key_hash(key: &str) -> u64 {
    key.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

impl Default for ParamStore {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl std::fmt::Debug for ParamStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamStore")
            .field("seed", &self.seed)
            .field("params", &self.params.read().len())
            .field("spectral", &self.spectral.read().len())
            .finish()
    }
}

impl ParamStore {
    /// Creates an empty store. `seed`, mixed with each spectral key, seeds
    /// the standard-normal draw of that key's starting `u`.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            params: RwLock::new(BTreeMap::new()),
            spectral: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns the parameter stored under `name`, creating it with `init` if
    /// absent.
    ///
    /// # Errors
    ///
    /// [`OpsError::ShapeMismatch`] if `name` exists with a different shape,
    /// or whatever `init` fails with.
    pub fn get_or_create(
        &self,
        name: &str,
        shape: &[usize],
        init: &dyn Initializer,
        regularizer: Option<RegularizerKind>,
        trainable: bool,
    ) -> OpsResult<ArrayD<f32>> {
        if let Some(existing) = self.params.read().get(name) {
            return Self::checked_value(name, existing, shape);
        }

        let mut params = self.params.write();
        // Another thread may have created it between the two locks.
        if let Some(existing) = params.get(name) {
            return Self::checked_value(name, existing, shape);
        }

        let value = init.sample(shape)?;
        debug!(name, ?shape, trainable, regularized = regularizer.is_some(), "created parameter");
        params.insert(
            name.to_string(),
            Parameter {
                value: value.clone(),
                trainable,
                regularizer,
            },
        );
        Ok(value)
    }

    fn checked_value(name: &str, existing: &Parameter, shape: &[usize]) -> OpsResult<ArrayD<f32>> {
        if existing.value.shape() != shape {
            return Err(OpsError::shape_mismatch(
                format!("parameter '{name}'"),
                existing.value.shape(),
                shape,
            ));
        }
        Ok(existing.value.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.read().contains_key(name)
    }

    pub fn get(&self, name: &str) -> OpsResult<ArrayD<f32>> {
        self.params
            .read()
            .get(name)
            .map(|p| p.value.clone())
            .ok_or_else(|| OpsError::UnknownParameter(name.to_string()))
    }

    pub fn parameter(&self, name: &str) -> Option<Parameter> {
        self.params.read().get(name).cloned()
    }

    /// Overwrites a parameter's value, e.g. after an optimiser step.
    pub fn assign(&self, name: &str, value: ArrayD<f32>) -> OpsResult<()> {
        self.update(name, |_| value)
    }

    /// Replaces a parameter's value with `f(current)`. The write lock is
    /// held across the read and the write, so concurrent updates of the
    /// same parameter all land.
    ///
    /// # Errors
    ///
    /// [`OpsError::UnknownParameter`], or [`OpsError::ShapeMismatch`] if `f`
    /// changes the shape (the old value is kept).
    pub fn update<F>(&self, name: &str, f: F) -> OpsResult<()>
    where
        F: FnOnce(&ArrayD<f32>) -> ArrayD<f32>,
    {
        let mut params = self.params.write();
        let param = params
            .get_mut(name)
            .ok_or_else(|| OpsError::UnknownParameter(name.to_string()))?;
        let value = f(&param.value);
        if param.value.shape() != value.shape() {
            return Err(OpsError::shape_mismatch(
                format!("update '{name}'"),
                param.value.shape(),
                value.shape(),
            ));
        }
        param.value = value;
        Ok(())
    }

    /// Names of the parameters an optimiser should update, sorted.
    pub fn trainable_names(&self) -> Vec<String> {
        self.params
            .read()
            .iter()
            .filter(|(_, p)| p.trainable)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Names of non-trainable parameters followed by every spectral state.
    pub fn non_trainable_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .params
            .read()
            .iter()
            .filter(|(_, p)| !p.trainable)
            .map(|(name, _)| name.clone())
            .collect();
        names.extend(self.spectral.read().keys().cloned());
        names
    }

    /// Sum of every registered regulariser's penalty on its parameter's
    /// current value.
    pub fn regularization_loss(&self) -> OpsResult<f32> {
        let params = self.params.read();
        let mut total = 0.0;
        for param in params.values() {
            if let Some(reg) = &param.regularizer {
                total += reg.penalty(&param.value)?;
            }
        }
        Ok(total)
    }

    /// Gradient of [`ParamStore::regularization_loss`] for every regularised
    /// parameter, keyed by name.
    pub fn regularization_gradients(&self) -> OpsResult<BTreeMap<String, ArrayD<f32>>> {
        let params = self.params.read();
        let mut grads = BTreeMap::new();
        for (name, param) in params.iter() {
            if let Some(reg) = &param.regularizer {
                grads.insert(name.clone(), reg.gradient(&param.value)?);
            }
        }
        Ok(grads)
    }

    /// Returns the spectral state for `key`, creating it with a
    /// standard-normal `u` of shape `[1, cols]` if absent.
    pub(crate) fn spectral_entry(&self, key: &str, cols: usize) -> OpsResult<Arc<Mutex<SpectralState>>> {
        if let Some(entry) = self.spectral.read().get(key) {
            return Self::checked_entry(key, entry, cols);
        }

        let mut spectral = self.spectral.write();
        if let Some(entry) = spectral.get(key) {
            return Self::checked_entry(key, entry, cols);
        }

        let mut rng = StdRng::seed_from_u64(self.seed ^ key_hash(key));
        let u = Array2::from_shape_fn((1, cols), |_| StandardNormal.sample(&mut rng));
        debug!(key, cols, "created spectral state");
        let entry = Arc::new(Mutex::new(SpectralState::new(u)));
        spectral.insert(key.to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    fn checked_entry(
        key: &str,
        entry: &Arc<Mutex<SpectralState>>,
        cols: usize,
    ) -> OpsResult<Arc<Mutex<SpectralState>>> {
        let width = entry.lock().u.ncols();
        if width != cols {
            return Err(OpsError::shape_mismatch(
                format!("spectral state '{key}'"),
                &[1, width],
                &[1, cols],
            ));
        }
        Ok(Arc::clone(entry))
    }

    /// Copy of the spectral state stored under `key`.
    pub fn spectral_state(&self, key: &str) -> Option<SpectralState> {
        self.spectral.read().get(key).map(|entry| entry.lock().clone())
    }

    /// One record per spectral state, sorted by key.
    pub fn spectral_report(&self) -> Vec<SpectralRecord> {
        self.spectral
            .read()
            .iter()
            .map(|(key, entry)| {
                let state = entry.lock();
                SpectralRecord {
                    key: key.clone(),
                    sigma: state.last_sigma,
                    updates: state.updates,
                    u_norm: vector_norm(&state.u),
                }
            })
            .collect()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            seed: self.seed,
            params: self.params.read().clone(),
            spectral: self
                .spectral
                .read()
                .iter()
                .map(|(key, entry)| (key.clone(), entry.lock().clone()))
                .collect(),
        }
    }
}

impl Checkpointable for ParamStore {
    type Snapshot = StoreSnapshot;
    const VERSION: u32 = SNAPSHOT_VERSION;

    fn to_snapshot(&self) -> StoreSnapshot {
        self.snapshot()
    }

    /// Rebuilds a store from a snapshot. Spectral states are restored
    /// verbatim; each must hold a row vector.
    fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self, CheckpointError> {
        for (key, state) in &snapshot.spectral {
            if state.u.nrows() != 1 {
                return Err(CheckpointError::InvalidFormat(format!(
                    "spectral state '{key}' must be a row vector, got {:?}",
                    state.u.dim()
                )));
            }
        }

        let store = Self::new(snapshot.seed);
        *store.params.write() = snapshot.params;
        *store.spectral.write() = snapshot
            .spectral
            .into_iter()
            .map(|(key, state)| (key, Arc::new(Mutex::new(state))))
            .collect();
        Ok(store)
    }
}
