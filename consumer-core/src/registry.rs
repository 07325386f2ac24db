use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::hotplug::WatchId;
use crate::pair::RingPair;

/// One directory being watched for newly created ring files.
#[derive(Debug)]
pub struct HotplugWatch {
    pub wd: WatchId,
    /// Absolute directory path being watched.
    pub absolute_dir: PathBuf,
    /// Same directory, relative to the trace root, with a trailing slash.
    pub relative_dir: String,
}

#[derive(Default)]
struct RegistryInner {
    pairs: Vec<Arc<RingPair>>,
    watches: Vec<HotplugWatch>,
}

/// The growable, append-only set of ring pairs and hot-plug watches shared
/// by every worker in a trace instance.
///
/// Protected by a single readers/writer lock: workers read far more often
/// (every wait-set rebuild) than the hot-plug handler writes (only on a
/// `create` event), so the common case never blocks on contention between
/// workers. A pair's [`Arc`] makes its address stable even though the
/// backing `Vec` may reallocate on append — other workers holding a clone of
/// an older snapshot keep a valid, live reference regardless.
#[derive(Default)]
pub struct ChannelRegistry {
    inner: RwLock<RegistryInner>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a cheap clone of every currently-registered pair. Callers
    /// build their wait set from this snapshot and may take each pair's
    /// drain lock without holding the registry lock any further.
    pub fn snapshot_pairs(&self) -> Vec<Arc<RingPair>> {
        self.inner.read().unwrap().pairs.clone()
    }

    pub fn pair_count(&self) -> usize {
        self.inner.read().unwrap().pairs.len()
    }

    /// Appends a newly-opened pair. Write-locked.
    pub fn append_pair(&self, pair: Arc<RingPair>) {
        self.inner.write().unwrap().pairs.push(pair);
    }

    /// Registers a hot-plug watch for a newly-visited directory. Write-locked.
    pub fn append_watch(&self, watch: HotplugWatch) {
        self.inner.write().unwrap().watches.push(watch);
    }

    /// Runs `f` with exclusive access to the registry, for the hot-plug
    /// handler's append-new-pairs-and-watches sequence (§4.E). Write-locked
    /// for the whole closure so the handler's multi-step update is atomic
    /// with respect to other workers' snapshots.
    pub fn with_write<R>(&self, f: impl FnOnce(&mut Vec<Arc<RingPair>>, &mut Vec<HotplugWatch>) -> R) -> R {
        let mut guard = self.inner.write().unwrap();
        let RegistryInner { pairs, watches } = &mut *guard;
        f(pairs, watches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn append_is_visible_to_new_snapshot() {
        let registry = ChannelRegistry::new();
        assert_eq!(registry.pair_count(), 0);

        let fd = File::open("/dev/null").unwrap();
        let pair = Arc::new(RingPair::new(fd, "cpu0".to_string()));
        registry.append_pair(pair);

        assert_eq!(registry.pair_count(), 1);
        let snapshot = registry.snapshot_pairs();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].relative_path, "cpu0");
    }

    #[test]
    fn old_snapshot_survives_further_appends() {
        let registry = ChannelRegistry::new();
        let fd = File::open("/dev/null").unwrap();
        registry.append_pair(Arc::new(RingPair::new(fd, "a".to_string())));
        let first_snapshot = registry.snapshot_pairs();

        let fd2 = File::open("/dev/null").unwrap();
        registry.append_pair(Arc::new(RingPair::new(fd2, "b".to_string())));

        assert_eq!(first_snapshot.len(), 1);
        assert_eq!(registry.snapshot_pairs().len(), 2);
    }
}
