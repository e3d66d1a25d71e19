use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::store::{ParamStore, SpectralRecord};

fn append_json_line<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    serde_json::to_writer(&mut file, value)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    file.write_all(b"\n")
}

fn timestamp_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[derive(Debug, Serialize)]
pub struct SpectralLogEntry {
    pub step: usize,
    pub key: String,
    pub sigma: Option<f32>,
    pub updates: u64,
    pub u_norm: f32,
    pub timestamp_ms: u128,
}

impl SpectralLogEntry {
    pub fn from_record(step: usize, record: &SpectralRecord) -> Self {
        Self {
            step,
            key: record.key.clone(),
            sigma: record.sigma,
            updates: record.updates,
            u_norm: record.u_norm,
            timestamp_ms: timestamp_ms(),
        }
    }
}

/// Appends one JSON line per spectral state in `store` to `path`, creating
/// parent directories as needed. Returns the number of lines written.
pub fn append_spectral_journal<P: AsRef<Path>>(
    path: P,
    step: usize,
    store: &ParamStore,
) -> io::Result<usize> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let records = store.spectral_report();
    for record in &records {
        append_json_line(path, &SpectralLogEntry::from_record(step, record))?;
    }
    Ok(records.len())
}
