//! Workspace backups.
//!
//! A bundle is a zip holding `manifest.json`, the database as
//! `db/gradebook.sqlite3` and `meta/workspace.json`. The manifest records the
//! SHA-256 of the database entry and restores refuse bundles whose checksum is
//! missing or wrong. A bare SQLite file is also accepted as a restore source.
//! Nothing replaces the live database until the incoming bytes have been
//! checked; the new file is staged next to it and renamed into place.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const BUNDLE_FORMAT_V1: &str = "gradebook-workspace-v1";
pub const RAW_SQLITE_FORMAT: &str = "raw-sqlite3";

const WORKSPACE_DB_FILE: &str = "gradebook.sqlite3";
const STAGED_DB_FILE: &str = "gradebook.sqlite3.importing";
const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/gradebook.sqlite3";
const META_ENTRY: &str = "meta/workspace.json";

const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";
const SQLITE_MAGIC: [u8; 16] = *b"SQLite format 3\0";

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("workspace database not found: {}", .0.display())]
    MissingDatabase(PathBuf),

    #[error("{} is neither a workspace bundle nor a SQLite database", .0.display())]
    UnrecognizedInput(PathBuf),

    #[error("unsupported bundle format: {0}")]
    UnsupportedFormat(String),

    #[error("bundle is missing {0}")]
    MissingEntry(&'static str),

    #[error("bundle manifest has no dbSha256")]
    MissingChecksum,

    #[error("database checksum mismatch: manifest {expected}, bundle {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("bundled database is not a SQLite file")]
    NotSqlite,

    #[error("invalid manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl BackupError {
    /// Wire error code: rejected input is the caller's problem, the rest is I/O.
    pub fn code(&self) -> &'static str {
        match self {
            BackupError::MissingDatabase(_) => "not_found",
            BackupError::Io { .. } => "io_failed",
            _ => "bad_bundle",
        }
    }
}

pub type BackupResult<T> = Result<T, BackupError>;

fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> BackupError + '_ {
    move |source| BackupError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    format: String,
    #[serde(default)]
    app_version: Option<String>,
    #[serde(default)]
    exported_at: Option<String>,
    #[serde(default)]
    db_sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn is_sqlite(bytes: &[u8]) -> bool {
    bytes.starts_with(&SQLITE_MAGIC)
}

fn put_entry<W: Write + std::io::Seek>(
    zip: &mut ZipWriter<W>,
    name: &str,
    bytes: &[u8],
    out_path: &Path,
) -> BackupResult<()> {
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(name, opts)?;
    zip.write_all(bytes).map_err(io_at(out_path))
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> BackupResult<ExportSummary> {
    let db_path = workspace_path.join(WORKSPACE_DB_FILE);
    if !db_path.is_file() {
        return Err(BackupError::MissingDatabase(db_path));
    }
    let db_bytes = std::fs::read(&db_path).map_err(io_at(&db_path))?;
    let db_sha256 = sha256_hex(&db_bytes);

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent).map_err(io_at(parent))?;
    }
    let out_file = File::create(out_path).map_err(io_at(out_path))?;
    let mut zip = ZipWriter::new(out_file);

    let manifest = Manifest {
        format: BUNDLE_FORMAT_V1.to_string(),
        app_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        exported_at: Some(chrono::Utc::now().to_rfc3339()),
        db_sha256: Some(db_sha256.clone()),
    };
    let meta = serde_json::json!({ "sourceWorkspace": workspace_path.to_string_lossy() });

    put_entry(
        &mut zip,
        MANIFEST_ENTRY,
        &serde_json::to_vec_pretty(&manifest)?,
        out_path,
    )?;
    put_entry(&mut zip, DB_ENTRY, &db_bytes, out_path)?;
    put_entry(&mut zip, META_ENTRY, &serde_json::to_vec_pretty(&meta)?, out_path)?;
    zip.finish()?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 3,
        db_sha256,
    })
}

/// Database bytes from a bundle, after the format and checksum checks.
fn read_bundle_db(in_path: &Path) -> BackupResult<Vec<u8>> {
    let file = File::open(in_path).map_err(io_at(in_path))?;
    let mut archive = ZipArchive::new(file)?;

    let manifest: Manifest = {
        let entry = archive
            .by_name(MANIFEST_ENTRY)
            .map_err(|_| BackupError::MissingEntry(MANIFEST_ENTRY))?;
        serde_json::from_reader(entry)?
    };
    if manifest.format != BUNDLE_FORMAT_V1 {
        return Err(BackupError::UnsupportedFormat(manifest.format));
    }
    let expected = manifest
        .db_sha256
        .map(|s| s.to_ascii_lowercase())
        .ok_or(BackupError::MissingChecksum)?;

    let mut db_bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .map_err(|_| BackupError::MissingEntry(DB_ENTRY))?
        .read_to_end(&mut db_bytes)
        .map_err(io_at(in_path))?;

    let actual = sha256_hex(&db_bytes);
    if actual != expected {
        return Err(BackupError::ChecksumMismatch { expected, actual });
    }
    Ok(db_bytes)
}

/// Stages `db_bytes` beside the live database and renames it over it.
fn install_db(workspace_path: &Path, db_bytes: &[u8]) -> BackupResult<()> {
    if !is_sqlite(db_bytes) {
        return Err(BackupError::NotSqlite);
    }
    std::fs::create_dir_all(workspace_path).map_err(io_at(workspace_path))?;
    let staged = workspace_path.join(STAGED_DB_FILE);
    let dst = workspace_path.join(WORKSPACE_DB_FILE);

    let written = File::create(&staged)
        .and_then(|mut f| {
            f.write_all(db_bytes)?;
            f.sync_all()
        })
        .map_err(io_at(&staged));
    if let Err(e) = written {
        let _ = std::fs::remove_file(&staged);
        return Err(e);
    }
    std::fs::rename(&staged, &dst).map_err(|e| {
        let _ = std::fs::remove_file(&staged);
        io_at(&dst)(e)
    })
}

/// Restores `<workspace>/gradebook.sqlite3` from a bundle zip or from a bare
/// SQLite file. Any other input is rejected and the workspace is left as is.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> BackupResult<ImportSummary> {
    let mut head = [0u8; 16];
    let mut f = File::open(in_path).map_err(io_at(in_path))?;
    let n = f.read(&mut head).map_err(io_at(in_path))?;
    drop(f);
    let head = &head[..n];

    let (db_bytes, format) = if head.starts_with(&ZIP_MAGIC) {
        (read_bundle_db(in_path)?, BUNDLE_FORMAT_V1)
    } else if is_sqlite(head) {
        (
            std::fs::read(in_path).map_err(io_at(in_path))?,
            RAW_SQLITE_FORMAT,
        )
    } else {
        return Err(BackupError::UnrecognizedInput(in_path.to_path_buf()));
    };

    install_db(workspace_path, &db_bytes)?;
    Ok(ImportSummary {
        bundle_format_detected: format.to_string(),
    })
}
