use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use valuation_core::ValuationError;

/// Datasets persisted under the data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    QuotesRaw,
    FundamentalsTtm,
    CompsSnapshot,
    News,
}

impl Dataset {
    pub fn stem(&self) -> &'static str {
        match self {
            Dataset::QuotesRaw => "quotes_universe_raw",
            Dataset::FundamentalsTtm => "fundamentals_ttm_universe",
            Dataset::CompsSnapshot => "comps_snapshot",
            Dataset::News => "news_unified",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Dataset::News => "json",
            _ => "csv",
        }
    }

    fn subdir(&self) -> &'static str {
        match self {
            Dataset::QuotesRaw => "raw",
            _ => "processed",
        }
    }
}

/// On-disk dataset store with last-known-good snapshots.
///
/// Layout:
/// - `raw/quotes_universe_raw.csv`
/// - `processed/<stem>.<ext>` for the other datasets
/// - `processed/last_good/<stem>_<YYYYMMDD>.<ext>` and `<stem>_latest.<ext>`
///
/// Every write lands in a temp file first and is renamed into place, so readers
/// never see a half-written table.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, dataset: Dataset) -> PathBuf {
        self.root
            .join(dataset.subdir())
            .join(format!("{}.{}", dataset.stem(), dataset.extension()))
    }

    pub fn last_good_dir(&self) -> PathBuf {
        self.root.join("processed").join("last_good")
    }

    pub fn latest_path(&self, dataset: Dataset) -> PathBuf {
        self.last_good_dir()
            .join(format!("{}_latest.{}", dataset.stem(), dataset.extension()))
    }

    pub fn dated_path(&self, dataset: Dataset, day: NaiveDate) -> PathBuf {
        self.last_good_dir().join(format!(
            "{}_{}.{}",
            dataset.stem(),
            day.format("%Y%m%d"),
            dataset.extension()
        ))
    }

    pub fn write_csv<T: Serialize>(&self, dataset: Dataset, rows: &[T]) -> Result<(), ValuationError> {
        let bytes = to_csv_bytes(rows)?;
        write_atomic(&self.path(dataset), &bytes)
    }

    /// Rows of the current table; missing or empty files read as no rows.
    pub fn read_csv<T: DeserializeOwned>(&self, dataset: Dataset) -> Result<Vec<T>, ValuationError> {
        read_csv_file(&self.path(dataset))
    }

    pub fn write_json<T: Serialize>(&self, dataset: Dataset, value: &T) -> Result<(), ValuationError> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| ValuationError::CacheError(e.to_string()))?;
        write_atomic(&self.path(dataset), &bytes)
    }

    pub fn read_json<T: DeserializeOwned>(&self, dataset: Dataset) -> Result<Option<T>, ValuationError> {
        read_json_file(&self.path(dataset))
    }

    /// Copy the current table to a dated copy and the `latest` pointer.
    ///
    /// Returns false (and copies nothing) when the current table is missing or empty.
    pub fn snapshot_last_good(&self, dataset: Dataset, day: NaiveDate) -> Result<bool, ValuationError> {
        let source = self.path(dataset);
        let bytes = match fs::read(&source) {
            Ok(b) if b.len() > 1 => b,
            Ok(_) => return Ok(false),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        write_atomic(&self.dated_path(dataset, day), &bytes)?;
        write_atomic(&self.latest_path(dataset), &bytes)?;
        tracing::debug!("Snapshotted {} to last_good", dataset.stem());
        Ok(true)
    }

    /// Rows of the `latest` last-good copy. Restoration never looks at dated copies.
    pub fn read_latest_csv<T: DeserializeOwned>(&self, dataset: Dataset) -> Result<Vec<T>, ValuationError> {
        read_csv_file(&self.latest_path(dataset))
    }

    pub fn read_latest_json<T: DeserializeOwned>(&self, dataset: Dataset) -> Result<Option<T>, ValuationError> {
        read_json_file(&self.latest_path(dataset))
    }
}

fn to_csv_bytes<T: Serialize>(rows: &[T]) -> Result<Vec<u8>, ValuationError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| ValuationError::CacheError(e.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| ValuationError::CacheError(e.to_string()))
}

fn read_csv_file<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, ValuationError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    if bytes.len() <= 1 {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| ValuationError::CacheError(format!("{}: {}", path.display(), e)))
}

fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ValuationError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| ValuationError::CacheError(format!("{}: {}", path.display(), e)))
}

/// Write `bytes` to `path` via a sibling temp file and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ValuationError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
