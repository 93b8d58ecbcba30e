use std::{
    collections::{HashMap, HashSet},
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use chrono::NaiveDate;
use serde_json::Value;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::{
    types::Lead,
    utils::{daily_store_filename, today, GLOBAL_STORE_FILE},
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

lazy_static! {
    // one writer per file across every session of the process
    static ref FILE_LOCKS: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>> = Mutex::new(HashMap::new());
}

fn lock_for(path: &Path) -> Arc<Mutex<()>> {
    let mut locks = FILE_LOCKS.lock().unwrap_or_else(|e| e.into_inner());
    // entries only the registry still holds belong to finished writers
    locks.retain(|p, lock| p == path || Arc::strong_count(lock) > 1);
    locks
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// How many records each view gained from one append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppendOutcome {
    pub global_added: usize,
    /// `None` when the daily store was not written (no template).
    pub daily_added: Option<usize>,
}

/// Lead files under one directory: `leads_data.json` plus one
/// `{date}-{template}.json` per template and day.
#[derive(Debug, Clone)]
pub struct LeadStore {
    dir: PathBuf,
}

impl LeadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        LeadStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn global_path(&self) -> PathBuf {
        self.dir.join(GLOBAL_STORE_FILE)
    }

    pub fn daily_path(&self, date: NaiveDate, template_name: &str) -> PathBuf {
        self.dir.join(daily_store_filename(date, template_name))
    }

    pub fn append(&self, lead: &Lead, template_name: Option<&str>) -> Result<AppendOutcome, StoreError> {
        self.append_on(lead, template_name, today())
    }

    pub fn append_on(
        &self,
        lead: &Lead,
        template_name: Option<&str>,
        date: NaiveDate,
    ) -> Result<AppendOutcome, StoreError> {
        fs::create_dir_all(&self.dir)?;

        let global_added = append_to_file(&self.global_path(), lead)?;
        let daily_added = match template_name {
            Some(t) if !t.is_empty() => Some(append_to_file(&self.daily_path(date, t), lead)?),
            _ => None,
        };

        Ok(AppendOutcome {
            global_added,
            daily_added,
        })
    }

    /// Whether `profile_url` was already recorded for this template on `date`.
    pub fn daily_contains(&self, profile_url: &str, template_name: &str, date: NaiveDate) -> bool {
        let path = self.daily_path(date, template_name);
        let lock = lock_for(&path);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        match read_records(&path) {
            Ok(records) => profile_urls(&records).contains(profile_url),
            Err(e) => {
                warn!("could not read {:?} for dedup check: {}", path, e);
                false
            }
        }
    }

    /// Leads currently stored in `path`; records that do not parse as a lead
    /// are left out.
    pub fn load(path: &Path) -> Result<Vec<Lead>, StoreError> {
        let records = read_records(path)?;
        Ok(records
            .into_iter()
            .filter_map(|r| serde_json::from_value::<Lead>(r).ok())
            .collect())
    }
}

fn profile_urls(records: &[Value]) -> HashSet<&str> {
    records
        .iter()
        .filter_map(|r| r.get("profile_url").and_then(Value::as_str))
        .collect()
}

/// Missing, unparsable and non-array files all read as empty.
fn read_records(path: &Path) -> Result<Vec<Value>, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Array(records)) => Ok(records),
        Ok(_) => {
            warn!("{:?} does not hold a json array, discarding its content", path);
            Ok(vec![])
        }
        Err(e) => {
            warn!("{:?} is not valid json ({}), treating it as empty", path, e);
            Ok(vec![])
        }
    }
}

fn append_to_file(path: &Path, lead: &Lead) -> Result<usize, StoreError> {
    if lead.profile_url.is_empty() {
        return Ok(0);
    }

    let lock = lock_for(path);
    let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

    let mut records = read_records(path)?;
    if profile_urls(&records).contains(lead.profile_url.as_str()) {
        debug!("{} already in {:?}, 0 new records", lead.profile_url, path);
        return Ok(0);
    }
    records.push(serde_json::to_value(lead)?);
    write_atomic(path, &records)?;
    debug!("appended {} to {:?}", lead.profile_url, path);
    Ok(1)
}

fn write_atomic(path: &Path, records: &[Value]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(tmp.as_file_mut(), records)?;
    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}
