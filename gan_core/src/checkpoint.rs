//! Checkpoint trait for deterministic state persistence.
//!
//! A checkpoint file is a [`CheckpointHeader`] followed by the
//! implementor's snapshot, both encoded with one fixint little-endian
//! bincode codec. [`Checkpointable::load_checkpoint`] checks the magic and
//! the snapshot version before decoding the payload, then hands it to
//! [`Checkpointable::from_snapshot`] for structural validation.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CheckpointError;

/// First four bytes of every checkpoint file.
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"GANC";

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_little_endian()
}

/// Fixed-size prefix identifying the file and its snapshot layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointHeader {
    pub magic: [u8; 4],
    pub version: u32,
}

impl CheckpointHeader {
    pub fn new(version: u32) -> Self {
        Self {
            magic: CHECKPOINT_MAGIC,
            version,
        }
    }

    fn validate(&self, expected: u32) -> Result<(), CheckpointError> {
        if self.magic != CHECKPOINT_MAGIC {
            return Err(CheckpointError::InvalidFormat(format!(
                "bad magic {:?}, expected {:?}",
                self.magic, CHECKPOINT_MAGIC
            )));
        }
        if self.version != expected {
            return Err(CheckpointError::VersionMismatch {
                expected,
                found: self.version,
            });
        }
        Ok(())
    }
}

/// State that round-trips through a versioned snapshot.
///
/// Implementors describe the snapshot type and how to convert to and from
/// it; the file layout and its checks are shared.
pub trait Checkpointable: Sized {
    type Snapshot: Serialize + DeserializeOwned;

    /// Layout version of [`Self::Snapshot`]. Files written under any other
    /// version are rejected with [`CheckpointError::VersionMismatch`].
    const VERSION: u32;

    fn to_snapshot(&self) -> Self::Snapshot;

    /// Rebuilds the state, rejecting snapshots that decode but are
    /// structurally invalid.
    fn from_snapshot(snapshot: Self::Snapshot) -> Result<Self, CheckpointError>;

    /// Writes header and snapshot to `path`, creating parent directories as
    /// needed.
    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut writer = BufWriter::new(File::create(path)?);
        codec().serialize_into(&mut writer, &CheckpointHeader::new(Self::VERSION))?;
        codec().serialize_into(&mut writer, &self.to_snapshot())?;
        writer.flush()?;
        debug!(path = %path.display(), version = Self::VERSION, "checkpoint saved");
        Ok(())
    }

    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let mut reader = BufReader::new(File::open(path)?);
        let header: CheckpointHeader = codec().deserialize_from(&mut reader)?;
        header.validate(Self::VERSION)?;
        let snapshot: Self::Snapshot = codec().deserialize_from(&mut reader)?;
        Self::from_snapshot(snapshot)
    }
}
