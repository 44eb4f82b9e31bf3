//! Sink writers: persist each aggregate under its own location.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use arrow2::array::Array;
use arrow2::compute::concatenate::concatenate;
use arrow2::io::parquet::read;
use arrow2::io::parquet::write::{
    transverse, CompressionOptions, Encoding, FileWriter, RowGroupIterator, Version,
    WriteOptions,
};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::table::Table;

pub const PART_FILE: &str = "part-00000.snappy.parquet";

static WRITE_OPTIONS: WriteOptions = WriteOptions {
    write_statistics: true,
    compression: CompressionOptions::Snappy,
    version: Version::V2,
    data_pagesize_limit: None,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fully replace whatever is at the location.
    Overwrite,
}

pub trait Sink: Send + Sync {
    fn write(&self, location: &str, table: &Table, mode: WriteMode) -> Result<(), StorageError>;
}

/// `{base}/{name}/`, tolerating one trailing slash on `base`.
pub fn output_location(base: &str, name: &str) -> String {
    format!("{}/{}/", base.strip_suffix('/').unwrap_or(base), name)
}

/// Map a location string to a local path. Accepts plain paths and `file://` URIs.
pub fn local_path(location: &str) -> Result<PathBuf, StorageError> {
    let path = match location.split_once("://") {
        None => location,
        Some(("file", rest)) => rest,
        Some((scheme, _)) => {
            return Err(StorageError::InvalidLocation(format!(
                "unsupported scheme '{scheme}' in {location}"
            )))
        }
    };
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(StorageError::InvalidLocation(location.to_string()));
    }
    Ok(PathBuf::from(trimmed))
}

/// Writes one Snappy-compressed Parquet file per aggregate directory.
///
/// Each write lands in a fresh hidden version directory next to the target,
/// and `{name}` is a symlink that is replaced by a single `rename`. The
/// location always resolves to a complete version. The version replaced by
/// the latest write is kept for readers that resolved it just before the
/// swap; anything older is pruned.
#[derive(Debug, Default, Clone)]
pub struct ParquetDirSink;

impl ParquetDirSink {
    pub fn new() -> Self {
        Self
    }

    /// Read a materialized aggregate back into a table.
    pub fn read(&self, location: &str) -> Result<Table, StorageError> {
        read_parquet(&local_path(location)?.join(PART_FILE))
    }

    /// Row count from the Parquet footer, without decoding any pages.
    pub fn row_count(&self, location: &str) -> Result<usize, StorageError> {
        let mut file = File::open(local_path(location)?.join(PART_FILE))?;
        let metadata = parquet2::read::read_metadata(&mut file).map_err(StorageError::parquet)?;
        Ok(metadata.num_rows)
    }
}

impl Sink for ParquetDirSink {
    fn write(&self, location: &str, table: &Table, mode: WriteMode) -> Result<(), StorageError> {
        let WriteMode::Overwrite = mode;
        let target = local_path(location)?;
        let parent = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StorageError::InvalidLocation(location.to_string()))?;
        fs::create_dir_all(&parent)?;

        let tag: u32 = rand::rng().random_range(100_000..=999_999);
        let version = format!(".{}.v-{}-{}", name, std::process::id(), tag);
        let version_dir = parent.join(&version);
        fs::create_dir(&version_dir)?;
        if let Err(e) = write_parquet(table, &version_dir.join(PART_FILE)) {
            let _ = fs::remove_dir_all(&version_dir);
            return Err(e);
        }

        let previous = fs::read_link(&target).ok();
        if let Err(e) = swap_in(&parent, &name, &version, &target, tag) {
            let _ = fs::remove_dir_all(&version_dir);
            return Err(e);
        }
        prune_versions(&parent, &name, &version, previous.as_deref());

        info!(
            location = %target.display(),
            version = %version,
            rows = table.num_rows(),
            "Wrote Parquet output"
        );
        Ok(())
    }
}

/// Point `target` at `version` by renaming a fresh symlink over it.
fn swap_in(
    parent: &Path,
    name: &str,
    version: &str,
    target: &Path,
    tag: u32,
) -> Result<(), StorageError> {
    let link = parent.join(format!(".{}.link-{}-{}", name, std::process::id(), tag));
    symlink(version, &link)?;

    // a plain directory cannot be replaced by rename; move it aside once
    let mut legacy = None;
    if fs::symlink_metadata(target).is_ok_and(|m| m.is_dir()) {
        let aside = parent.join(format!(".{}.v-legacy-{}", name, tag));
        if let Err(e) = fs::rename(target, &aside) {
            let _ = fs::remove_file(&link);
            return Err(e.into());
        }
        warn!(location = %target.display(), "Replacing unversioned output directory");
        legacy = Some(aside);
    }

    if let Err(e) = fs::rename(&link, target) {
        let _ = fs::remove_file(&link);
        if let Some(aside) = legacy {
            let _ = fs::rename(&aside, target);
        }
        return Err(e.into());
    }
    Ok(())
}

/// Remove versions of `name` other than the current one and the one it
/// replaced. Failures only warn: the new version is already live.
fn prune_versions(parent: &Path, name: &str, current: &str, previous: Option<&Path>) {
    let prefix = format!(".{name}.v-");
    let previous = previous
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned());
    let entries = match fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %parent.display(), error = %e, "Could not list retired output versions");
            return;
        }
    };
    for entry in entries.flatten() {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if !file_name.starts_with(&prefix)
            || file_name == current
            || previous.as_deref() == Some(file_name.as_str())
        {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => debug!(path = %entry.path().display(), "Pruned retired output version"),
            Err(e) => warn!(
                path = %entry.path().display(),
                error = %e,
                "Could not remove retired output version"
            ),
        }
    }
}

pub fn write_parquet(table: &Table, path: &Path) -> Result<(), StorageError> {
    let schema = table.schema();
    let encodings: Vec<Vec<Encoding>> = schema
        .fields
        .iter()
        .map(|f| transverse(&f.data_type, |_| Encoding::Plain))
        .collect();
    let row_groups = RowGroupIterator::try_new(
        vec![Ok(table.chunk().clone())].into_iter(),
        schema,
        WRITE_OPTIONS,
        encodings,
    )?;

    let file = File::create(path)?;
    let mut writer = FileWriter::try_new(file, schema.clone(), WRITE_OPTIONS)?;
    for group in row_groups {
        writer.write(group?)?;
    }
    writer.end(None)?;
    debug!(path = %path.display(), "Finalized Parquet file");
    Ok(())
}

pub fn read_parquet(path: &Path) -> Result<Table, StorageError> {
    let mut reader = File::open(path)?;
    let metadata = read::read_metadata(&mut reader)?;
    let schema = read::infer_schema(&metadata)?;
    let chunks = read::FileReader::new(
        reader,
        metadata.row_groups,
        schema.clone(),
        None,
        None,
        None,
    )
    .collect::<Result<Vec<_>, _>>()?;

    let fields = schema.fields.clone();
    if chunks.is_empty() {
        return Table::empty(fields).map_err(StorageError::parquet);
    }
    let mut arrays = Vec::with_capacity(fields.len());
    for column in 0..fields.len() {
        let parts: Vec<&dyn Array> = chunks.iter().map(|c| c.arrays()[column].as_ref()).collect();
        arrays.push(concatenate(&parts)?);
    }
    Table::try_new(fields, arrays).map_err(StorageError::parquet)
}

/// Keeps the last table written to each location.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: Mutex<BTreeMap<String, Table>>,
    writes: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, location: &str) -> Option<Table> {
        self.tables
            .lock()
            .ok()
            .and_then(|tables| tables.get(location).cloned())
    }

    pub fn locations(&self) -> Vec<String> {
        self.tables
            .lock()
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every location written, in write order, including repeats.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

impl Sink for MemorySink {
    fn write(&self, location: &str, table: &Table, mode: WriteMode) -> Result<(), StorageError> {
        let WriteMode::Overwrite = mode;
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| StorageError::Io(std::io::Error::other("sink lock poisoned")))?;
        tables.insert(location.to_string(), table.clone());
        if let Ok(mut writes) = self.writes.lock() {
            writes.push(location.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_location_is_base_slash_name() {
        assert_eq!(
            output_location("s3://bucket/out", "customers_by_age"),
            "s3://bucket/out/customers_by_age/"
        );
        assert_eq!(
            output_location("/data/out/", "total_item_prices"),
            "/data/out/total_item_prices/"
        );
    }

    #[test]
    fn local_path_accepts_file_uris_only() {
        assert_eq!(
            local_path("file:///tmp/out/a/").unwrap(),
            PathBuf::from("/tmp/out/a")
        );
        assert_eq!(local_path("out/a/").unwrap(), PathBuf::from("out/a"));
        assert!(matches!(
            local_path("s3://bucket/a/"),
            Err(StorageError::InvalidLocation(_))
        ));
    }
}
