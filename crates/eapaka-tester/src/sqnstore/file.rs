use super::{
    format_sqn_hex, parse_sqn_hex, SqnStore, SqnStoreError, SubscriberState, ARRAY_SIZE, IND_BITS,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

const STORE_VERSION: u32 = 1;

/// JSON-file-backed SQN store.
///
/// The file holds every subscriber the tool has seen; a missing file reads
/// as an empty store. Saves are atomic: the new document is written to a
/// temp file in the same directory, fsynced, and renamed over the target,
/// so concurrent readers always see a fully formed previous or next
/// version.
pub struct FileStore {
    path: PathBuf,
    /// Clock used for `updated_at`; overridable for deterministic tests.
    now: Box<dyn Fn() -> DateTime<Utc>>,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").field("path", &self.path).finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FileData {
    version: u32,
    ind_bits: u32,
    a: usize,
    subscribers: BTreeMap<String, SubscriberRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SubscriberRecord {
    seqms: Vec<u64>,
    sqnms_hex: String,
    #[serde(default)]
    updated_at: String,
}

impl FileData {
    fn empty() -> Self {
        FileData {
            version: STORE_VERSION,
            ind_bits: IND_BITS,
            a: ARRAY_SIZE,
            subscribers: BTreeMap::new(),
        }
    }
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore {
            path: path.into(),
            now: Box::new(Utc::now),
        }
    }

    /// Replace the clock used for `updated_at` stamps.
    pub fn with_clock(
        path: impl Into<PathBuf>,
        now: impl Fn() -> DateTime<Utc> + 'static,
    ) -> Self {
        FileStore {
            path: path.into(),
            now: Box::new(now),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_file(&self) -> Result<FileData, SqnStoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FileData::empty());
            }
            Err(err) => return Err(err.into()),
        };
        let data: FileData = serde_json::from_slice(&bytes)
            .map_err(|err| SqnStoreError::Corrupt(err.to_string()))?;
        if data.version != STORE_VERSION {
            return Err(SqnStoreError::Corrupt(format!(
                "unsupported store version: {}",
                data.version
            )));
        }
        if data.ind_bits != IND_BITS || data.a != ARRAY_SIZE {
            return Err(SqnStoreError::Corrupt(format!(
                "store shape mismatch ind_bits={} a={}",
                data.ind_bits, data.a
            )));
        }
        Ok(data)
    }

    fn save_file(&self, data: &FileData) -> Result<(), SqnStoreError> {
        let payload = serde_json::to_vec_pretty(data)
            .map_err(|err| SqnStoreError::Corrupt(err.to_string()))?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::Builder::new()
            .prefix(".sqnstore-")
            .tempfile_in(dir)?;
        tmp.write_all(&payload)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }
}

impl SqnStore for FileStore {
    fn load(&self, imsi: &str) -> Result<Option<SubscriberState>, SqnStoreError> {
        if imsi.is_empty() {
            return Err(SqnStoreError::EmptyImsi);
        }
        let data = self.load_file()?;
        match data.subscribers.get(imsi) {
            Some(record) => Ok(Some(record_to_state(record)?)),
            None => Ok(None),
        }
    }

    fn save(&mut self, imsi: &str, state: &SubscriberState) -> Result<(), SqnStoreError> {
        if imsi.is_empty() {
            return Err(SqnStoreError::EmptyImsi);
        }
        let mut data = self.load_file()?;
        let mut stamped = state.clone();
        stamped.updated_at = Some((self.now)());
        data.subscribers
            .insert(imsi.to_string(), state_to_record(&stamped)?);
        self.save_file(&data)
    }

    fn reset(&mut self, imsi: &str) -> Result<(), SqnStoreError> {
        if imsi.is_empty() {
            return Err(SqnStoreError::EmptyImsi);
        }
        let mut data = self.load_file()?;
        data.subscribers.remove(imsi);
        self.save_file(&data)
    }
}

fn record_to_state(record: &SubscriberRecord) -> Result<SubscriberState, SqnStoreError> {
    if record.seqms.len() != ARRAY_SIZE {
        return Err(SqnStoreError::Corrupt(format!(
            "seqms length must be {}",
            ARRAY_SIZE
        )));
    }
    let mut seq_ms = [0u64; ARRAY_SIZE];
    seq_ms.copy_from_slice(&record.seqms);

    let sqn_ms = parse_sqn_hex(&record.sqnms_hex)?;

    let updated_at = if record.updated_at.is_empty() {
        None
    } else {
        Some(
            DateTime::parse_from_rfc3339(&record.updated_at)
                .map_err(|err| SqnStoreError::Corrupt(format!("invalid updated_at: {}", err)))?
                .with_timezone(&Utc),
        )
    };

    Ok(SubscriberState {
        seq_ms,
        sqn_ms,
        updated_at,
    })
}

fn state_to_record(state: &SubscriberState) -> Result<SubscriberRecord, SqnStoreError> {
    Ok(SubscriberRecord {
        seqms: state.seq_ms.to_vec(),
        sqnms_hex: format_sqn_hex(state.sqn_ms)?,
        updated_at: state
            .updated_at
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default(),
    })
}
