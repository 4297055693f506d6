//! Durable record of published artifacts and applied units, per network.
//!
//! Each network is persisted as an append-only JSON-lines file
//! `<dir>/<network>.jsonl`. Every append is a single line written under an exclusive
//! file lock and synced before the call returns, so a crash leaves either the whole
//! record or a torn trailing line. Readers take the lock too, so the only incomplete
//! tail they can see is one left by a crash; it is repaired before the next append.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, RwLock},
};

use alloy_core::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::{DeployError, NetworkId, UnitId};

/// Extension of per-network ledger files.
pub const LEDGER_FILE_EXTENSION: &str = "jsonl";

/// Where an artifact was published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRef {
    pub tx_hash: B256,
    pub block_number: u64,
}

/// A recorded artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub address: Address,
    pub template: String,
    pub args_fingerprint: String,
    /// `None` for artifacts imported rather than published by a unit.
    pub publish_ref: Option<PublishRef>,
    pub newly_published: bool,
    pub recorded_at: DateTime<Utc>,
}

/// One line of a ledger file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LedgerRecord {
    Deployment { unit: UnitId, entry: LedgerEntry },
    Completed { unit: UnitId },
}

#[derive(Debug, Default)]
struct NetworkLedger {
    entries: BTreeMap<UnitId, LedgerEntry>,
    completed: BTreeSet<UnitId>,
}

impl NetworkLedger {
    fn apply(&mut self, record: LedgerRecord) {
        match record {
            LedgerRecord::Deployment { unit, entry } => {
                self.entries.insert(unit, entry);
            }
            LedgerRecord::Completed { unit } => {
                self.completed.insert(unit);
            }
        }
    }
}

type SharedLedger = Arc<Mutex<NetworkLedger>>;

/// The deployment ledger. Owns every [`LedgerEntry`]; callers only read copies.
///
/// Each network has its own lock, so writes to one network never wait on another.
#[derive(Debug)]
pub struct Ledger {
    dir: Option<PathBuf>,
    networks: RwLock<HashMap<NetworkId, SharedLedger>>,
}

impl Ledger {
    /// A ledger that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            networks: RwLock::new(HashMap::new()),
        }
    }

    /// A ledger persisted under `dir`, created if missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, DeployError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| DeployError::LedgerIo {
            path: dir.clone(),
            source,
        })?;

        Ok(Self {
            dir: Some(dir),
            networks: RwLock::new(HashMap::new()),
        })
    }

    /// Path of the file backing `network`, for persisted ledgers.
    ///
    /// Fails for ids that are not a plain file name.
    pub fn path_for(&self, network: &NetworkId) -> Result<Option<PathBuf>, DeployError> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        if !network.is_file_name() {
            return Err(DeployError::InvalidNetworkConfig {
                network: network.clone(),
                reason: "network id must be a plain file name".to_string(),
            });
        }
        Ok(Some(dir.join(format!("{network}.{LEDGER_FILE_EXTENSION}"))))
    }

    /// Read the whole ledger of `network` from disk, replacing what is held in memory.
    ///
    /// In-memory ledgers keep their state.
    pub fn load(&self, network: &NetworkId) -> Result<(), DeployError> {
        let Some(path) = self.path_for(network)? else {
            return Ok(());
        };

        let shared = self.network(network);
        let mut ledger = lock_network(&shared);

        let loaded = read_ledger_file(&path)?;
        tracing::debug!(
            %network,
            path = %path.display(),
            entries = loaded.entries.len(),
            completed = loaded.completed.len(),
            "Loaded ledger"
        );

        *ledger = loaded;
        Ok(())
    }

    pub fn lookup(&self, network: &NetworkId, id: &UnitId) -> Option<LedgerEntry> {
        let shared = self.get(network)?;
        let ledger = lock_network(&shared);
        ledger.entries.get(id).cloned()
    }

    pub fn exists(&self, network: &NetworkId, id: &UnitId) -> bool {
        let Some(shared) = self.get(network) else {
            return false;
        };
        let ledger = lock_network(&shared);
        ledger.entries.contains_key(id)
    }

    /// All entries of `network`, sorted by id.
    pub fn entries(&self, network: &NetworkId) -> Vec<(UnitId, LedgerEntry)> {
        let Some(shared) = self.get(network) else {
            return Vec::new();
        };
        let ledger = lock_network(&shared);
        ledger
            .entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect()
    }

    /// Record an entry. Fails with [`DeployError::LedgerConflict`] if one already exists
    /// and `overwrite` is false.
    pub fn record(
        &self,
        network: &NetworkId,
        id: &UnitId,
        entry: LedgerEntry,
        overwrite: bool,
    ) -> Result<(), DeployError> {
        let shared = self.network(network);
        let mut ledger = lock_network(&shared);

        if !overwrite && ledger.entries.contains_key(id) {
            return Err(DeployError::LedgerConflict {
                network: network.clone(),
                unit: id.clone(),
            });
        }

        let record = LedgerRecord::Deployment {
            unit: id.clone(),
            entry,
        };
        self.append(network, &record)?;

        tracing::debug!(%network, unit = %id, overwrite, "Recorded ledger entry");
        ledger.apply(record);
        Ok(())
    }

    /// Mark `unit` as applied on `network`. No-op if already marked.
    pub fn mark_completed(&self, network: &NetworkId, unit: &UnitId) -> Result<(), DeployError> {
        let shared = self.network(network);
        let mut ledger = lock_network(&shared);

        if ledger.completed.contains(unit) {
            return Ok(());
        }

        let record = LedgerRecord::Completed { unit: unit.clone() };
        self.append(network, &record)?;
        ledger.apply(record);
        Ok(())
    }

    pub fn is_completed(&self, network: &NetworkId, unit: &UnitId) -> bool {
        let Some(shared) = self.get(network) else {
            return false;
        };
        let ledger = lock_network(&shared);
        ledger.completed.contains(unit)
    }

    fn append(&self, network: &NetworkId, record: &LedgerRecord) -> Result<(), DeployError> {
        let Some(path) = self.path_for(network)? else {
            return Ok(());
        };
        let io_error = ledger_io_error(&path);

        let mut line = serde_json::to_string(record)
            .map_err(|e| io_error(io::Error::other(e)))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(&io_error)?;

        FileExt::lock_exclusive(&file).map_err(&io_error)?;
        let written = ends_with_newline(&mut file)
            .map_err(&io_error)
            .and_then(|clean| {
                if clean {
                    Ok(())
                } else {
                    repair_ledger_file(&path, &mut file).map(drop)
                }
            })
            .and_then(|()| {
                file.write_all(line.as_bytes())
                    .and_then(|()| file.sync_data())
                    .map_err(&io_error)
            });
        FileExt::unlock(&file).map_err(&io_error)?;

        written
    }

    fn get(&self, network: &NetworkId) -> Option<SharedLedger> {
        self.networks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(network)
            .cloned()
    }

    fn network(&self, network: &NetworkId) -> SharedLedger {
        if let Some(shared) = self.get(network) {
            return shared;
        }
        self.networks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(network.clone())
            .or_default()
            .clone()
    }
}

fn lock_network(shared: &Mutex<NetworkLedger>) -> MutexGuard<'_, NetworkLedger> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn ledger_io_error(path: &Path) -> impl Fn(io::Error) -> DeployError + '_ {
    move |source| DeployError::LedgerIo {
        path: path.to_path_buf(),
        source,
    }
}

/// State of the bytes after the last newline of a ledger file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Clean,
    /// A whole record whose newline was lost.
    MissingNewline,
    /// Part of a record.
    Torn,
}

struct Scan {
    ledger: NetworkLedger,
    complete_len: u64,
    tail: Tail,
}

fn read_ledger_file(path: &Path) -> Result<NetworkLedger, DeployError> {
    let io_error = ledger_io_error(path);

    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(NetworkLedger::default()),
        Err(e) => return Err(io_error(e)),
    };

    FileExt::lock_shared(&file).map_err(&io_error)?;
    let scanned = scan_ledger_file(path, &mut file);
    FileExt::unlock(&file).map_err(&io_error)?;
    let scanned = scanned?;

    if scanned.tail == Tail::Clean {
        return Ok(scanned.ledger);
    }

    // Writers may have appended since the shared lock was dropped, so repair
    // rescans under the exclusive lock.
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(&io_error)?;
    FileExt::lock_exclusive(&file).map_err(&io_error)?;
    let repaired = repair_ledger_file(path, &mut file);
    FileExt::unlock(&file).map_err(&io_error)?;

    repaired
}

/// Rescan `file` and fix its tail. The caller holds the exclusive lock.
fn repair_ledger_file(path: &Path, file: &mut File) -> Result<NetworkLedger, DeployError> {
    let io_error = ledger_io_error(path);
    let scanned = scan_ledger_file(path, file)?;

    match scanned.tail {
        Tail::Clean => {}
        Tail::MissingNewline => {
            tracing::warn!(path = %path.display(), "Restoring newline after last ledger record");
            file.seek(SeekFrom::End(0))
                .and_then(|_| file.write_all(b"\n"))
                .and_then(|()| file.sync_data())
                .map_err(&io_error)?;
        }
        Tail::Torn => {
            tracing::warn!(
                path = %path.display(),
                len = scanned.complete_len,
                "Discarding torn trailing ledger record"
            );
            file.set_len(scanned.complete_len)
                .and_then(|()| file.sync_data())
                .map_err(&io_error)?;
        }
    }

    Ok(scanned.ledger)
}

fn scan_ledger_file(path: &Path, file: &mut File) -> Result<Scan, DeployError> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_string(&mut content))
        .map_err(ledger_io_error(path))?;

    let complete_len = content.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let (complete, tail) = content.split_at(complete_len);

    let mut ledger = NetworkLedger::default();
    for (index, line) in complete.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: LedgerRecord =
            serde_json::from_str(line).map_err(|e| DeployError::LedgerCorrupt {
                path: path.to_path_buf(),
                line: index + 1,
                reason: e.to_string(),
            })?;
        ledger.apply(record);
    }

    let tail = if tail.is_empty() {
        Tail::Clean
    } else {
        match serde_json::from_str::<LedgerRecord>(tail) {
            Ok(record) => {
                ledger.apply(record);
                Tail::MissingNewline
            }
            Err(_) => Tail::Torn,
        }
    };

    Ok(Scan {
        ledger,
        complete_len: complete_len as u64,
        tail,
    })
}

fn ends_with_newline(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
