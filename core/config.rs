//! Configuration for the accessor and the two recovery engines.
//!
//! Every limit the engines apply lives here and is handed to each component
//! at construction, so two analyses never share hidden state.

use std::path::PathBuf;

use crate::storage::text::TextEncoding;

/// Top-level configuration.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ForensicConfig {
    pub accessor: AccessorConfig,
    pub recovery: RecoveryConfig,
    pub wal: WalConfig,
}

/// Query and schema access settings.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AccessorConfig {
    /// Maximum rows returned by a single query.
    pub max_query_rows: usize,

    /// Keywords rejected as whole, case-insensitive tokens.
    pub forbidden_keywords: Vec<String>,

    /// Parent directory for scratch snapshots (system temp dir when unset).
    pub scratch_root: Option<PathBuf>,

    /// Copy `-wal`/`-shm`/`-journal` siblings alongside the database.
    pub copy_sidecars: bool,
}

fn default_forbidden_keywords() -> Vec<String> {
    [
        "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "ATTACH", "DETACH", "PRAGMA",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}

impl Default for AccessorConfig {
    fn default() -> Self {
        Self {
            max_query_rows: 1000,
            forbidden_keywords: default_forbidden_keywords(),
            scratch_root: None,
            copy_sidecars: true,
        }
    }
}

/// Freelist and carving settings.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RecoveryConfig {
    /// Encodings tried, in order, after the database's own text encoding.
    pub encodings: Vec<TextEncoding>,

    /// Shortest printable run reported as a fragment.
    pub min_run_len: usize,

    /// Maximum fragments returned from one scan.
    pub fragment_cap: usize,

    /// Upper bound on pages visited while walking the freelist chain. The
    /// header's freelist page count is used when this is unset or larger.
    pub freelist_depth_bound: Option<u32>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            encodings: vec![
                TextEncoding::Utf8,
                TextEncoding::Utf16Le,
                TextEncoding::Utf16Be,
                TextEncoding::Ascii,
                TextEncoding::Latin1,
            ],
            min_run_len: 4,
            fragment_cap: 100,
            freelist_depth_bound: None,
        }
    }
}

/// WAL analysis settings.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct WalConfig {
    /// Verify salts and the cumulative frame checksum chain.
    pub verify_checksums: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            verify_checksums: true,
        }
    }
}
