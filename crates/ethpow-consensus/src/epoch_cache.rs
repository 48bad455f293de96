//! Epoch arena for ethash light caches.
//!
//! Caches are keyed by `(epoch, epoch_length)` so that pre- and post-ECIP-1099
//! epochs with the same number never alias. Each key owns a slot whose
//! `OnceCell` is the generation latch: the first caller builds the cache,
//! concurrent callers for the same epoch wait on it, and once published the
//! `Arc<LightCache>` is handed out without blocking.
//!
//! Disk dumps (when a cache directory is configured) use this layout, all
//! little-endian:
//!
//! | field          | type  |
//! |----------------|-------|
//! | magic          | 2 x u32 (`0xbaddcafe`, `0xfee1dead`) |
//! | primitive tag  | u32   |
//! | epoch          | u64   |
//! | epoch length   | u64   |
//! | word count     | u64   |
//! | cache words    | u32 * word count |

use crate::config::{EngineConfig, PowMode};
use crate::hasher::{seed_hash, CachePrimitive, Dataset, LightCache};
use crate::params;
use lru::LruCache;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Cache dump magic.
pub const DUMP_MAGIC: [u32; 2] = [0xbaddcafe, 0xfee1dead];

/// Algorithm revision in cache file names.
const ALGORITHM_REVISION: u32 = 23;

const HEADER_LEN: usize = 4 * 3 + 8 * 3;

/// Identifies one cache: the epoch number and the epoch length it was cut with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EpochKey {
    pub epoch: u64,
    pub epoch_length: u64,
}

impl EpochKey {
    /// Key for the epoch containing `height`.
    pub fn for_height(height: u64, epoch_length: u64) -> Self {
        Self {
            epoch: height / epoch_length,
            epoch_length,
        }
    }

    /// First block of the epoch.
    fn first_block(&self) -> u64 {
        self.epoch * self.epoch_length
    }

    /// Key of the epoch after this one, switching to the doubled length if
    /// the next epoch starts exactly at the ECIP-1099 block.
    pub fn next(&self, ecip1099: Option<u64>) -> Self {
        let next = self.epoch + 1;
        if let Some(at) = ecip1099 {
            if next * self.epoch_length == at && self.epoch_length == params::EPOCH_LENGTH {
                return Self {
                    epoch: next / 2,
                    epoch_length: params::ECIP1099_EPOCH_LENGTH,
                };
            }
        }
        Self {
            epoch: next,
            epoch_length: self.epoch_length,
        }
    }
}

#[derive(Error, Debug)]
enum DumpError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("bad magic")]
    BadMagic,
    #[error("{what} mismatch: have {have}, want {want}")]
    Mismatch {
        what: &'static str,
        have: u64,
        want: u64,
    },
    #[error("truncated dump: {len} bytes")]
    Truncated { len: usize },
}

/// Settings shared by the arena and its background generators.
#[derive(Debug, Clone)]
struct Settings {
    primitive: CachePrimitive,
    cache_dir: Option<PathBuf>,
    caches_on_disk: usize,
    test: bool,
}

impl Settings {
    fn dump_path(&self, dir: &Path, key: EpochKey) -> PathBuf {
        let seed = seed_hash(key.epoch, key.epoch_length);
        dir.join(format!(
            "{}R{}-{}",
            self.primitive.file_prefix(),
            ALGORITHM_REVISION,
            hex::encode(&seed[..8])
        ))
    }

    fn build(&self, key: EpochKey) -> LightCache {
        let Some(dir) = &self.cache_dir else {
            return LightCache::generate(key.epoch, key.epoch_length, self.test);
        };
        let path = self.dump_path(dir, key);

        match read_dump(&path, self.primitive, key, self.test) {
            Ok(words) => {
                debug!(epoch = key.epoch, path = %path.display(), "Loaded ethash cache from disk");
                return LightCache::from_words(key.epoch, key.epoch_length, words, self.test);
            }
            Err(e) => {
                debug!(epoch = key.epoch, error = %e, "No usable ethash cache on disk");
            }
        }

        let cache = LightCache::generate(key.epoch, key.epoch_length, self.test);
        if let Err(e) = std::fs::create_dir_all(dir)
            .and_then(|_| write_dump(&path, self.primitive, key, &cache.words))
        {
            warn!(epoch = key.epoch, error = %e, "Failed to store ethash cache");
        }

        // Drop dumps that fell out of the on-disk window.
        if let Some(oldest) = key.epoch.checked_sub(self.caches_on_disk as u64) {
            for epoch in 0..=oldest {
                let stale = self.dump_path(
                    dir,
                    EpochKey {
                        epoch,
                        epoch_length: key.epoch_length,
                    },
                );
                if std::fs::remove_file(&stale).is_ok() {
                    trace!(epoch, "Removed stale ethash cache");
                }
            }
        }
        cache
    }
}

/// Write a cache dump.
pub fn write_dump(
    path: &Path,
    primitive: CachePrimitive,
    key: EpochKey,
    words: &[u32],
) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(HEADER_LEN + words.len() * 4);
    buf.extend_from_slice(&DUMP_MAGIC[0].to_le_bytes());
    buf.extend_from_slice(&DUMP_MAGIC[1].to_le_bytes());
    buf.extend_from_slice(&primitive.tag().to_le_bytes());
    buf.extend_from_slice(&key.epoch.to_le_bytes());
    buf.extend_from_slice(&key.epoch_length.to_le_bytes());
    buf.extend_from_slice(&(words.len() as u64).to_le_bytes());
    for w in words {
        buf.extend_from_slice(&w.to_le_bytes());
    }

    // Write to a temp file and rename so readers never see a partial dump.
    let tmp = path.with_extension(format!("{}.tmp", std::process::id()));
    let mut file = std::fs::File::create(&tmp)?;
    file.write_all(&buf)?;
    file.sync_all()?;
    std::fs::rename(&tmp, path)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(b)
}

fn read_dump(
    path: &Path,
    primitive: CachePrimitive,
    key: EpochKey,
    test: bool,
) -> Result<Vec<u32>, DumpError> {
    let bytes = std::fs::read(path)?;
    if bytes.len() < HEADER_LEN {
        return Err(DumpError::Truncated { len: bytes.len() });
    }
    if read_u32(&bytes, 0) != DUMP_MAGIC[0] || read_u32(&bytes, 4) != DUMP_MAGIC[1] {
        return Err(DumpError::BadMagic);
    }

    let checks = [
        ("primitive", read_u32(&bytes, 8) as u64, primitive.tag() as u64),
        ("epoch", read_u64(&bytes, 12), key.epoch),
        ("epoch length", read_u64(&bytes, 20), key.epoch_length),
        (
            "word count",
            read_u64(&bytes, 28),
            LightCache::expected_words(key.epoch, test) as u64,
        ),
    ];
    for (what, have, want) in checks {
        if have != want {
            return Err(DumpError::Mismatch { what, have, want });
        }
    }

    let body = &bytes[HEADER_LEN..];
    let count = read_u64(&bytes, 28) as usize;
    if body.len() != count * 4 {
        return Err(DumpError::Truncated { len: bytes.len() });
    }
    Ok((0..count).map(|i| read_u32(body, i * 4)).collect())
}

struct Slot {
    cell: OnceCell<Arc<LightCache>>,
}

impl Slot {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            cell: OnceCell::new(),
        })
    }

    fn get(&self, settings: &Settings, key: EpochKey) -> Arc<LightCache> {
        self.cell
            .get_or_init(|| Arc::new(settings.build(key)))
            .clone()
    }
}

/// In-memory LRU of light caches plus one pre-generated future cache.
pub struct EpochArena {
    settings: Arc<Settings>,
    caches: Mutex<LruCache<EpochKey, Arc<Slot>>>,
    future: Mutex<Option<(EpochKey, Arc<Slot>)>>,
    datasets: Mutex<LruCache<EpochKey, Arc<Dataset>>>,
}

impl EpochArena {
    pub fn new(primitive: CachePrimitive, config: &EngineConfig) -> Self {
        let caches_in_mem = NonZeroUsize::new(config.caches_in_mem).unwrap_or(NonZeroUsize::MIN);
        let datasets_in_mem =
            NonZeroUsize::new(config.datasets_in_mem).unwrap_or(NonZeroUsize::MIN);
        if let Some(dir) = &config.cache_dir {
            if config.caches_on_disk > 0 {
                info!(dir = %dir.display(), count = config.caches_on_disk, "Disk storage enabled for ethash caches");
            }
        }
        Self {
            settings: Arc::new(Settings {
                primitive,
                cache_dir: config.cache_dir.clone(),
                caches_on_disk: config.caches_on_disk,
                test: config.pow_mode == PowMode::Test,
            }),
            caches: Mutex::new(LruCache::new(caches_in_mem)),
            future: Mutex::new(None),
            datasets: Mutex::new(LruCache::new(datasets_in_mem)),
        }
    }

    /// Get the cache for `key`, generating or loading it if needed.
    ///
    /// Also schedules generation of the next epoch's cache on a background
    /// thread the first time a later epoch is seen.
    pub fn get(&self, key: EpochKey, ecip1099: Option<u64>) -> Arc<LightCache> {
        let (slot, future) = {
            let mut caches = self.caches.lock();
            let mut future = self.future.lock();

            let slot = match caches.get(&key) {
                Some(slot) => slot.clone(),
                None => {
                    let slot = match future.as_ref() {
                        Some((fkey, fslot)) if *fkey == key => fslot.clone(),
                        _ => {
                            trace!(epoch = key.epoch, "Requiring new ethash cache");
                            Slot::new()
                        }
                    };
                    caches.put(key, slot.clone());
                    slot
                }
            };

            let next = key.next(ecip1099);
            let newer = future
                .as_ref()
                .map_or(true, |(fkey, _)| fkey.first_block() < next.first_block());
            let spawn = if newer && next.epoch < params::MAX_EPOCH - 1 {
                let fslot = Slot::new();
                *future = Some((next, fslot.clone()));
                Some((next, fslot))
            } else {
                None
            };
            (slot, spawn)
        };

        let cache = slot.get(&self.settings, key);

        if let Some((fkey, fslot)) = future {
            let settings = Arc::clone(&self.settings);
            let spawned = thread::Builder::new()
                .name(format!("ethash-cache-{}", fkey.epoch))
                .spawn(move || {
                    fslot.get(&settings, fkey);
                });
            if let Err(e) = spawned {
                warn!(epoch = fkey.epoch, error = %e, "Failed to spawn cache generator");
            }
        }
        cache
    }

    /// Dataset for `key`, if one has been generated.
    pub fn dataset(&self, key: EpochKey) -> Option<Arc<Dataset>> {
        self.datasets.lock().get(&key).cloned()
    }

    /// Expand and keep the full dataset for `key`.
    pub fn generate_dataset(&self, key: EpochKey, ecip1099: Option<u64>) -> Arc<Dataset> {
        if let Some(existing) = self.dataset(key) {
            return existing;
        }
        let cache = self.get(key, ecip1099);
        let dataset = Arc::new(Dataset::generate(&cache));
        self.datasets.lock().put(key, dataset.clone());
        dataset
    }

    /// Number of caches currently held in memory.
    pub fn len(&self) -> usize {
        self.caches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PowMode;
    use tempfile::TempDir;

    fn test_config(dir: Option<&Path>) -> EngineConfig {
        EngineConfig {
            cache_dir: dir.map(Path::to_path_buf),
            caches_on_disk: 2,
            ..EngineConfig::with_mode(PowMode::Test)
        }
    }

    fn key(epoch: u64) -> EpochKey {
        EpochKey {
            epoch,
            epoch_length: params::EPOCH_LENGTH,
        }
    }

    #[test]
    fn test_next_key_at_ecip1099() {
        let k = EpochKey::for_height(11_699_999, 30_000);
        assert_eq!(k.epoch, 389);
        let next = k.next(Some(11_700_000));
        assert_eq!(
            next,
            EpochKey {
                epoch: 195,
                epoch_length: 60_000
            }
        );
        assert_eq!(key(3).next(Some(11_700_000)), key(4));
        assert_eq!(key(3).next(None), key(4));
    }

    #[test]
    fn test_get_returns_shared_handle() {
        let arena = EpochArena::new(CachePrimitive::Ethash, &test_config(None));
        let a = arena.get(key(0), None);
        let b = arena.get(key(0), None);
        assert!(Arc::ptr_eq(&a, &b), "second lookup must reuse the published cache");
        assert_eq!(a.words.len(), 256);
    }

    #[test]
    fn test_lru_bound() {
        let config = EngineConfig {
            caches_in_mem: 1,
            ..test_config(None)
        };
        let arena = EpochArena::new(CachePrimitive::Ethash, &config);
        arena.get(key(0), None);
        arena.get(key(1), None);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_dump_round_trip() {
        let dir = TempDir::new().unwrap();
        let config = test_config(Some(dir.path()));
        let arena = EpochArena::new(CachePrimitive::Ethash, &config);
        let generated = arena.get(key(0), None);

        let reloaded = EpochArena::new(CachePrimitive::Ethash, &config).get(key(0), None);
        assert_eq!(*generated, *reloaded);
    }

    #[test]
    fn test_dump_rejects_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump");
        let cache = LightCache::generate(0, params::EPOCH_LENGTH, true);
        write_dump(&path, CachePrimitive::Ethash, key(0), &cache.words).unwrap();
        assert!(read_dump(&path, CachePrimitive::Ethash, key(0), true).is_ok());

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            read_dump(&path, CachePrimitive::Ethash, key(0), true),
            Err(DumpError::BadMagic)
        ));
    }

    #[test]
    fn test_dump_rejects_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump");
        let cache = LightCache::generate(0, params::EPOCH_LENGTH, true);
        write_dump(&path, CachePrimitive::Ethash, key(0), &cache.words).unwrap();

        assert!(matches!(
            read_dump(&path, CachePrimitive::EthashB3, key(0), true),
            Err(DumpError::Mismatch { what: "primitive", .. })
        ));
        assert!(matches!(
            read_dump(&path, CachePrimitive::Ethash, key(1), true),
            Err(DumpError::Mismatch { what: "epoch", .. })
        ));
        assert!(matches!(
            read_dump(&path, CachePrimitive::Ethash, key(0), false),
            Err(DumpError::Mismatch { what: "word count", .. })
        ));
    }

    #[test]
    fn test_corrupt_dump_is_regenerated() {
        let dir = TempDir::new().unwrap();
        let config = test_config(Some(dir.path()));
        let settings = Settings {
            primitive: CachePrimitive::Ethash,
            cache_dir: Some(dir.path().to_path_buf()),
            caches_on_disk: 2,
            test: true,
        };
        let path = settings.dump_path(dir.path(), key(0));
        std::fs::write(&path, b"garbage").unwrap();

        let cache = EpochArena::new(CachePrimitive::Ethash, &config).get(key(0), None);
        assert_eq!(*cache, LightCache::generate(0, params::EPOCH_LENGTH, true));
        assert!(read_dump(&path, CachePrimitive::Ethash, key(0), true).is_ok());
    }

    #[test]
    fn test_stale_dumps_are_removed() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            primitive: CachePrimitive::Ethash,
            cache_dir: Some(dir.path().to_path_buf()),
            caches_on_disk: 2,
            test: true,
        };
        settings.build(key(0));
        assert!(settings.dump_path(dir.path(), key(0)).exists());
        settings.build(key(2));
        assert!(
            !settings.dump_path(dir.path(), key(0)).exists(),
            "epoch 0 is outside the two-epoch window"
        );
        assert!(settings.dump_path(dir.path(), key(2)).exists());
    }

    #[test]
    fn test_file_names_differ_by_primitive() {
        let dir = Path::new("/tmp");
        let ethash = Settings {
            primitive: CachePrimitive::Ethash,
            cache_dir: None,
            caches_on_disk: 0,
            test: true,
        };
        let b3 = Settings {
            primitive: CachePrimitive::EthashB3,
            ..ethash.clone()
        };
        let name = ethash.dump_path(dir, key(0));
        assert_eq!(
            name.file_name().unwrap().to_str().unwrap(),
            "cache-R23-0000000000000000"
        );
        assert!(b3
            .dump_path(dir, key(0))
            .to_str()
            .unwrap()
            .ends_with("cache-b3-R23-0000000000000000"));
    }

    #[test]
    fn test_dataset_only_after_generation() {
        let arena = EpochArena::new(CachePrimitive::Ethash, &test_config(None));
        assert!(arena.dataset(key(0)).is_none());
        let dataset = arena.generate_dataset(key(0), None);
        assert!(Arc::ptr_eq(&dataset, &arena.dataset(key(0)).unwrap()));
    }
}
