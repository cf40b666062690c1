use std::fmt;

use crate::error::{BenchError, Result};
use crate::naming::variant_name;
use crate::workload::{row_count, MAX_SCALE_EXPONENT};

/// Where a case keeps its database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, clap::ValueEnum)]
pub enum StorageMode {
    InMemory,
    OnDisk,
}

impl StorageMode {
    pub const ALL: [StorageMode; 2] = [StorageMode::InMemory, StorageMode::OnDisk];

    pub fn suffix(self) -> &'static str {
        match self {
            StorageMode::InMemory => "InMemory",
            StorageMode::OnDisk => "OnDisk",
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// One cell of the scenario matrix. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkCase {
    storage_mode: StorageMode,
    backend_id: String,
    scale_exponent: u32,
    row_count: u64,
}

impl BenchmarkCase {
    pub fn new(
        storage_mode: StorageMode,
        backend_id: impl Into<String>,
        scale_exponent: u32,
    ) -> Result<Self> {
        let backend_id = backend_id.into();
        if backend_id.is_empty() {
            return Err(BenchError::InvalidCase("empty backend id".into()));
        }
        if !(1..=MAX_SCALE_EXPONENT).contains(&scale_exponent) {
            return Err(BenchError::InvalidCase(format!(
                "scale exponent {scale_exponent} is outside 1..={MAX_SCALE_EXPONENT}"
            )));
        }
        Ok(Self {
            storage_mode,
            backend_id,
            scale_exponent,
            row_count: row_count(scale_exponent),
        })
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.storage_mode
    }

    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    pub fn scale_exponent(&self) -> u32 {
        self.scale_exponent
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn name(&self) -> String {
        variant_name(self.storage_mode, &self.backend_id, self.scale_exponent)
    }
}
