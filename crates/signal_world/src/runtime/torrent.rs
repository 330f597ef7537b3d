//! Torrent-style content-addressed data transport and the release sink.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use signal_world_proto::{blake3_hex, EpochBody, EpochPayload};

use super::error::WorldError;

const TORRENTS_DIR: &str = "torrents";

/// Content-addressed fetch/publish seam used for epoch bodies and detached
/// state snapshots. References are blake3 hashes of the stored bytes.
pub trait TorrentStore {
    fn get_torrent_data(&self, reference: &str) -> Result<Vec<u8>, WorldError>;
    fn put_torrent_data(&self, bytes: &[u8]) -> Result<String, WorldError>;
}

/// Durable distribution target for sealed epochs. The orchestrator never
/// retries; a failed release leaves the world staged for the caller to retry.
pub trait ReleaseSink {
    fn release_epoch(&self, payload: &EpochPayload, body: &EpochBody) -> Result<(), WorldError>;
}

/// Torrent store backed by a process-local map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTorrentStore {
    data: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryTorrentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.lock().expect("lock torrents").len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().expect("lock torrents").is_empty()
    }
}

impl TorrentStore for InMemoryTorrentStore {
    fn get_torrent_data(&self, reference: &str) -> Result<Vec<u8>, WorldError> {
        self.data
            .lock()
            .expect("lock torrents")
            .get(reference)
            .cloned()
            .ok_or_else(|| WorldError::TorrentDataMissing {
                reference: reference.to_string(),
            })
    }

    fn put_torrent_data(&self, bytes: &[u8]) -> Result<String, WorldError> {
        let reference = blake3_hex(bytes);
        self.data
            .lock()
            .expect("lock torrents")
            .insert(reference.clone(), bytes.to_vec());
        Ok(reference)
    }
}

/// Filesystem-backed torrent store, one file per content hash.
#[derive(Debug, Clone)]
pub struct LocalTorrentStore {
    root: PathBuf,
    torrents_dir: PathBuf,
}

impl LocalTorrentStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let torrents_dir = root.join(TORRENTS_DIR);
        Self { root, torrents_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_dirs(&self) -> Result<(), WorldError> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(&self.torrents_dir)?;
        Ok(())
    }

    fn torrent_path(&self, reference: &str) -> Result<PathBuf, WorldError> {
        validate_reference(reference)?;
        Ok(self.torrents_dir.join(format!("{reference}.bin")))
    }
}

impl TorrentStore for LocalTorrentStore {
    fn get_torrent_data(&self, reference: &str) -> Result<Vec<u8>, WorldError> {
        let path = self.torrent_path(reference)?;
        if !path.exists() {
            return Err(WorldError::TorrentDataMissing {
                reference: reference.to_string(),
            });
        }
        let bytes = fs::read(path)?;
        let actual = blake3_hex(&bytes);
        if actual != reference {
            return Err(WorldError::TorrentHashMismatch {
                expected: reference.to_string(),
                actual,
            });
        }
        Ok(bytes)
    }

    fn put_torrent_data(&self, bytes: &[u8]) -> Result<String, WorldError> {
        self.ensure_dirs()?;
        let reference = blake3_hex(bytes);
        let path = self.torrent_path(&reference)?;
        if path.exists() {
            return Ok(reference);
        }
        write_bytes_atomic(&path, bytes)?;
        Ok(reference)
    }
}

#[derive(Debug, Default)]
struct SinkInner {
    released: Vec<EpochPayload>,
    fail_release: bool,
}

/// Release sink that records sealed epochs and publishes their bodies into a
/// torrent store so replay can fetch them back.
#[derive(Clone)]
pub struct MemoryReleaseSink {
    store: Arc<dyn TorrentStore + Send + Sync>,
    inner: Arc<Mutex<SinkInner>>,
}

impl MemoryReleaseSink {
    pub fn new(store: Arc<dyn TorrentStore + Send + Sync>) -> Self {
        Self {
            store,
            inner: Arc::new(Mutex::new(SinkInner::default())),
        }
    }

    pub fn released(&self) -> Vec<EpochPayload> {
        self.inner.lock().expect("lock sink").released.clone()
    }

    /// Make the next `release_epoch` calls fail. Test hook.
    pub fn set_fail_release(&self, fail: bool) {
        self.inner.lock().expect("lock sink").fail_release = fail;
    }
}

impl ReleaseSink for MemoryReleaseSink {
    fn release_epoch(&self, payload: &EpochPayload, body: &EpochBody) -> Result<(), WorldError> {
        if self.inner.lock().expect("lock sink").fail_release {
            return Err(WorldError::ReleaseSinkFailed {
                reason: "injected failure".to_string(),
            });
        }
        let bytes = body.encode()?;
        let reference = self.store.put_torrent_data(&bytes)?;
        if reference != payload.body_hash {
            return Err(WorldError::TorrentHashMismatch {
                expected: payload.body_hash.clone(),
                actual: reference,
            });
        }
        self.inner
            .lock()
            .expect("lock sink")
            .released
            .push(payload.clone());
        Ok(())
    }
}

fn validate_reference(reference: &str) -> Result<(), WorldError> {
    if reference.is_empty()
        || reference.contains('/')
        || reference.contains('\\')
        || reference.contains("..")
    {
        return Err(WorldError::TorrentReferenceInvalid {
            reference: reference.to_string(),
        });
    }
    Ok(())
}

fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), WorldError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("signal-world-{prefix}-{unique}"))
    }

    #[test]
    fn in_memory_store_round_trips() {
        let store = InMemoryTorrentStore::new();
        let reference = store.put_torrent_data(b"epoch-body").expect("put");
        assert_eq!(store.get_torrent_data(&reference).expect("get"), b"epoch-body");

        let err = store.get_torrent_data("missing").expect_err("missing");
        assert!(matches!(err, WorldError::TorrentDataMissing { .. }));
    }

    #[test]
    fn local_store_round_trips() {
        let dir = temp_dir("torrent");
        let store = LocalTorrentStore::new(&dir);
        let reference = store.put_torrent_data(b"epoch-body").expect("put");
        assert_eq!(store.get_torrent_data(&reference).expect("get"), b"epoch-body");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn local_store_detects_corrupted_data() {
        let dir = temp_dir("torrent-corrupt");
        let store = LocalTorrentStore::new(&dir);
        let reference = store.put_torrent_data(b"epoch-body").expect("put");

        let path = dir.join(TORRENTS_DIR).join(format!("{reference}.bin"));
        fs::write(&path, b"mangled").expect("overwrite");

        let err = store.get_torrent_data(&reference).expect_err("corrupted");
        assert!(matches!(err, WorldError::TorrentHashMismatch { .. }));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn local_store_rejects_path_traversal_references() {
        let dir = temp_dir("torrent-traversal");
        let store = LocalTorrentStore::new(&dir);
        let err = store
            .get_torrent_data("../../etc/passwd")
            .expect_err("must reject");
        assert!(matches!(err, WorldError::TorrentReferenceInvalid { .. }));

        let _ = fs::remove_dir_all(&dir);
    }
}
