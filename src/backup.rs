//! Workspace bundles: a zip holding `manifest.json` and the SQLite file.
//!
//! The manifest carries the sha256 of the database so a truncated or edited
//! bundle is refused before the live database is touched.

use crate::db::DB_FILE_NAME;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/sabe.sqlite3";
const MANIFEST_VERSION: u32 = 1;
const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleFormat {
    Workspace,
    LegacySqlite,
}

impl BundleFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            BundleFormat::Workspace => "sabe-workspace-v1",
            BundleFormat::LegacySqlite => "legacy-sqlite3",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    format: String,
    version: u32,
    #[serde(default)]
    app_version: Option<String>,
    #[serde(default)]
    exported_at: Option<String>,
    #[serde(default)]
    db_sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: &'static str,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: &'static str,
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn export_workspace_bundle(workspace: &Path, out_path: &Path) -> anyhow::Result<ExportSummary> {
    let db_path = workspace.join(DB_FILE_NAME);
    let db_bytes = std::fs::read(&db_path)
        .with_context(|| format!("workspace database not readable: {}", db_path.display()))?;
    let digest = sha256_hex(&db_bytes);

    let manifest = Manifest {
        format: BundleFormat::Workspace.as_str().to_string(),
        version: MANIFEST_VERSION,
        app_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        exported_at: Some(chrono::Utc::now().to_rfc3339()),
        db_sha256: Some(digest.clone()),
    };
    let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;

    if let Some(dir) = out_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create {}", dir.display()))?;
    }
    let file = File::create(out_path)
        .with_context(|| format!("cannot create bundle {}", out_path.display()))?;
    let mut zip = ZipWriter::new(file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in [(MANIFEST_ENTRY, &manifest_bytes), (DB_ENTRY, &db_bytes)] {
        zip.start_file(name, opts)
            .with_context(|| format!("cannot add {} to bundle", name))?;
        zip.write_all(bytes)
            .with_context(|| format!("cannot write {} to bundle", name))?;
    }
    zip.finish().context("cannot finalize bundle")?;

    tracing::info!(path = %out_path.display(), sha256 = %digest, "workspace bundle exported");
    Ok(ExportSummary {
        bundle_format: BundleFormat::Workspace.as_str(),
        entry_count: 2,
        db_sha256: digest,
    })
}

fn detect_format(path: &Path) -> anyhow::Result<BundleFormat> {
    let mut head = [0u8; 4];
    let mut file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let n = file.read(&mut head)?;
    Ok(if n == head.len() && head == ZIP_MAGIC {
        BundleFormat::Workspace
    } else {
        BundleFormat::LegacySqlite
    })
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> anyhow::Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("bundle has no {}", name))?;
    let mut buf = Vec::new();
    entry
        .read_to_end(&mut buf)
        .with_context(|| format!("cannot read {} from bundle", name))?;
    Ok(buf)
}

/// Database bytes from a bundle, checked against the manifest digest.
fn verified_db_bytes(path: &Path) -> anyhow::Result<Vec<u8>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut archive = ZipArchive::new(file).context("not a valid zip archive")?;

    let manifest: Manifest = serde_json::from_slice(&read_entry(&mut archive, MANIFEST_ENTRY)?)
        .context("manifest.json is malformed")?;
    if manifest.format != BundleFormat::Workspace.as_str() {
        bail!("unsupported bundle format: {}", manifest.format);
    }

    let db_bytes = read_entry(&mut archive, DB_ENTRY)?;
    if let Some(expected) = manifest.db_sha256 {
        let actual = sha256_hex(&db_bytes);
        if !actual.eq_ignore_ascii_case(&expected) {
            bail!(
                "database checksum mismatch: manifest {} actual {}",
                expected,
                actual
            );
        }
    }
    Ok(db_bytes)
}

/// Replace the workspace database with the one in `in_path`, which may be a
/// bundle or a bare SQLite file. Nothing is replaced if verification fails.
pub fn import_workspace_bundle(in_path: &Path, workspace: &Path) -> anyhow::Result<ImportSummary> {
    let format = detect_format(in_path)?;
    let db_bytes = match format {
        BundleFormat::Workspace => verified_db_bytes(in_path)?,
        BundleFormat::LegacySqlite => std::fs::read(in_path)
            .with_context(|| format!("cannot read {}", in_path.display()))?,
    };

    std::fs::create_dir_all(workspace)
        .with_context(|| format!("cannot create workspace {}", workspace.display()))?;
    let target = workspace.join(DB_FILE_NAME);
    let staging = workspace.join(format!("{}.importing", DB_FILE_NAME));
    std::fs::write(&staging, &db_bytes)
        .with_context(|| format!("cannot stage {}", staging.display()))?;
    if target.exists() {
        std::fs::remove_file(&target)
            .with_context(|| format!("cannot remove {}", target.display()))?;
    }
    std::fs::rename(&staging, &target)
        .with_context(|| format!("cannot move staged database to {}", target.display()))?;

    tracing::info!(path = %in_path.display(), format = format.as_str(), "workspace database restored");
    Ok(ImportSummary {
        bundle_format_detected: format.as_str(),
    })
}
