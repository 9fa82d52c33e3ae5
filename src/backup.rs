use anyhow::{anyhow, Context};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::AppConfig;
use crate::db::{self, DB_FILE};
use crate::schedule::{resolve_span, CellId, GridStore, ScheduleCell, SlotCatalog, TableId};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/timetable.sqlite3";
const STAGED_DB_FILE: &str = "timetable.sqlite3.incoming";
const REQUIRED_TABLES: [&str; 5] = [
    "settings",
    "schedule_tables",
    "schedule_cells",
    "student_groups",
    "cell_groups",
];
pub const BUNDLE_FORMAT_V1: &str = "timetabled-workspace-v1";
pub const LEGACY_SQLITE_FORMAT: &str = "legacy-sqlite3";

#[derive(Debug, Error)]
pub enum BundleError {
    #[error(transparent)]
    Io(#[from] anyhow::Error),

    #[error("unsupported bundle format: {0}")]
    Format(String),

    #[error("database checksum mismatch")]
    Checksum,

    #[error("{reason}")]
    Timetable { reason: String, cell_ids: Vec<CellId> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Census {
    pub tables: i64,
    pub cells: i64,
    pub links: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    format: String,
    #[serde(default)]
    version: u32,
    #[serde(default)]
    app_version: Option<String>,
    #[serde(default)]
    exported_at: Option<String>,
    #[serde(default)]
    bundle_id: Option<String>,
    #[serde(default)]
    db_sha256: Option<String>,
    #[serde(default)]
    census: Option<Census>,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_id: String,
    pub db_sha256: String,
    pub entry_count: usize,
    pub census: Census,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: &'static str,
    pub bundle_id: Option<String>,
    pub census: Census,
}

fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut f, &mut hasher)
        .with_context(|| format!("failed to hash {}", path.to_string_lossy()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn census(conn: &Connection) -> anyhow::Result<Census> {
    let count = |table: &str| -> anyhow::Result<i64> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .with_context(|| format!("failed to count {}", table))
    };
    Ok(Census {
        tables: count("schedule_tables")?,
        cells: count("schedule_cells")?,
        links: count("cell_groups")?,
    })
}

pub fn export_workspace_bundle(conn: &Connection, out_path: &Path) -> anyhow::Result<ExportSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let snapshot = out_path.with_extension("snapshot");
    if snapshot.exists() {
        std::fs::remove_file(&snapshot)
            .with_context(|| format!("failed to clear {}", snapshot.to_string_lossy()))?;
    }
    conn.execute("VACUUM INTO ?1", params![snapshot.to_string_lossy().to_string()])
        .context("failed to snapshot workspace database")?;

    let result = write_bundle(conn, &snapshot, out_path);
    let _ = std::fs::remove_file(&snapshot);
    result
}

fn write_bundle(conn: &Connection, snapshot: &Path, out_path: &Path) -> anyhow::Result<ExportSummary> {
    let census = census(conn)?;
    let db_sha256 = sha256_file(snapshot)?;
    let bundle_id = Uuid::new_v4().to_string();
    let manifest = Manifest {
        format: BUNDLE_FORMAT_V1.to_string(),
        version: 1,
        app_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        exported_at: Some(db::now_ts()),
        bundle_id: Some(bundle_id.clone()),
        db_sha256: Some(db_sha256.clone()),
        census: Some(census),
    };

    let out_file = File::create(out_path)
        .with_context(|| format!("failed to create {}", out_path.to_string_lossy()))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    serde_json::to_writer_pretty(&mut zip, &manifest).context("failed to write manifest")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db_file = File::open(snapshot)
        .with_context(|| format!("failed to open snapshot {}", snapshot.to_string_lossy()))?;
    std::io::copy(&mut db_file, &mut zip).context("failed to write database entry")?;
    zip.finish().context("failed to finalize zip bundle")?;

    tracing::info!(
        bundle_id = %bundle_id,
        tables = census.tables,
        cells = census.cells,
        path = %out_path.to_string_lossy(),
        "workspace exported"
    );
    Ok(ExportSummary {
        bundle_id,
        db_sha256,
        entry_count: 2,
        census,
    })
}

/// The caller must have dropped any open connection to the workspace.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> Result<ImportSummary, BundleError> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!("failed to create workspace {}", workspace_path.to_string_lossy())
    })?;
    let staged = workspace_path.join(STAGED_DB_FILE);

    let checked = stage(in_path, &staged).and_then(|manifest| {
        let census = audit_timetable(&staged)?;
        if let Some(declared) = manifest.as_ref().and_then(|m| m.census) {
            if declared != census {
                return Err(BundleError::Timetable {
                    reason: format!(
                        "bundle declares {} cells in {} tables but holds {} in {}",
                        declared.cells, declared.tables, census.cells, census.tables
                    ),
                    cell_ids: Vec::new(),
                });
            }
        }
        Ok((manifest, census))
    });
    let (manifest, census) = match checked {
        Ok(v) => v,
        Err(e) => {
            let _ = std::fs::remove_file(&staged);
            return Err(e);
        }
    };

    let dst = workspace_path.join(DB_FILE);
    if dst.exists() {
        std::fs::remove_file(&dst)
            .with_context(|| format!("failed to remove {}", dst.to_string_lossy()))?;
    }
    std::fs::rename(&staged, &dst)
        .with_context(|| format!("failed to move staged database to {}", dst.to_string_lossy()))?;

    let bundle_format_detected = if manifest.is_some() {
        BUNDLE_FORMAT_V1
    } else {
        LEGACY_SQLITE_FORMAT
    };
    let bundle_id = manifest.and_then(|m| m.bundle_id);
    tracing::info!(
        format = bundle_format_detected,
        bundle_id = ?bundle_id,
        cells = census.cells,
        workspace = %workspace_path.to_string_lossy(),
        "workspace imported"
    );
    Ok(ImportSummary {
        bundle_format_detected,
        bundle_id,
        census,
    })
}

fn stage(in_path: &Path, staged: &Path) -> Result<Option<Manifest>, BundleError> {
    if !is_zip_file(in_path)? {
        std::fs::copy(in_path, staged).with_context(|| {
            format!("failed to copy database from {}", in_path.to_string_lossy())
        })?;
        return Ok(None);
    }

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;
    let manifest: Manifest = {
        let entry = archive
            .by_name(MANIFEST_ENTRY)
            .context("bundle missing manifest.json")?;
        serde_json::from_reader(entry).context("manifest.json is invalid")?
    };
    if manifest.format != BUNDLE_FORMAT_V1 {
        return Err(BundleError::Format(manifest.format));
    }
    let expected = manifest
        .db_sha256
        .clone()
        .ok_or_else(|| anyhow!("manifest.json has no dbSha256"))?;

    {
        let mut entry = archive
            .by_name(DB_ENTRY)
            .context("bundle missing database entry")?;
        let mut out = File::create(staged)
            .with_context(|| format!("failed to create {}", staged.to_string_lossy()))?;
        std::io::copy(&mut entry, &mut out).context("failed to extract database entry")?;
    }
    if !sha256_file(staged)?.eq_ignore_ascii_case(&expected) {
        return Err(BundleError::Checksum);
    }
    Ok(Some(manifest))
}

/// Opens the staged database read-only and checks the timetable against its
/// own schedule settings: every cell starts on the grid and fits the day,
/// and no two cells of a table overlap on the same day.
fn audit_timetable(path: &Path) -> Result<Census, BundleError> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;

    let mut missing = Vec::new();
    for table in REQUIRED_TABLES {
        let found: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
                [table],
                |r| r.get(0),
            )
            .context("failed to read database schema")?;
        if found == 0 {
            missing.push(table);
        }
    }
    if !missing.is_empty() {
        return Err(BundleError::Timetable {
            reason: format!("not a timetable database (missing {})", missing.join(", ")),
            cell_ids: Vec::new(),
        });
    }

    let config = AppConfig::load(&conn)?;
    let cells = db::load_all_cells(&conn)?;
    let mut bad = misplaced_cells(&cells, &config.catalog);

    let mut by_table: BTreeMap<TableId, Vec<ScheduleCell>> = BTreeMap::new();
    for cell in cells {
        by_table.entry(cell.table_id).or_default().push(cell);
    }
    for (table_id, cells) in by_table {
        let store = GridStore::load(table_id, cells, config.catalog.slot_minutes());
        for (a, b) in store.overlapping() {
            bad.push(a);
            bad.push(b);
        }
    }
    bad.sort_unstable();
    bad.dedup();
    if !bad.is_empty() {
        return Err(BundleError::Timetable {
            reason: format!("{} cell(s) do not fit the timetable grid", bad.len()),
            cell_ids: bad,
        });
    }

    Ok(census(&conn)?)
}

fn misplaced_cells(cells: &[ScheduleCell], catalog: &SlotCatalog) -> Vec<CellId> {
    cells
        .iter()
        .filter(|c| {
            let on_grid = catalog.period_for_time(c.start_time) == Some(c.period);
            let fits = resolve_span(c.start_time, c.end_time, catalog.slot_minutes())
                .map(|s| c.period + s.span - 1 <= catalog.period_count())
                .unwrap_or(false);
            !(on_grid && fits)
        })
        .map(|c| c.id)
        .collect()
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    Ok(read == 4 && sig == [0x50, 0x4B, 0x03, 0x04])
}
