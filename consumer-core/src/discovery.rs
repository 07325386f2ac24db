use std::fs;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;

use crate::config::ChannelMode;
use crate::error::{ConsumerError, Result};
use crate::hotplug::HotplugWatcher;
use crate::pair::RingPair;
use crate::protocol;
use crate::registry::{ChannelRegistry, HotplugWatch};
use crate::sink::Sink;

/// Recursively walks `root`, registering every ring file that passes `mode`
/// into `registry` and a hot-plug watch on every directory visited.
///
/// Fails fatally (`ConsumerError::NoEntry`) only if `root` itself cannot be
/// opened; individual entries that fail to stat are logged and skipped.
/// Returns `ConsumerError::NoChannel` if the walk completes with zero pairs
/// registered.
pub fn discover(
    root: &Path,
    mode: ChannelMode,
    registry: &ChannelRegistry,
    hotplug: &dyn HotplugWatcher,
    sink: &dyn Sink,
) -> Result<()> {
    walk_dir(root, "", mode, registry, hotplug, sink)?;

    if registry.pair_count() == 0 {
        return Err(ConsumerError::NoChannel {
            path: root.to_path_buf(),
        });
    }
    Ok(())
}

fn walk_dir(
    absolute_dir: &Path,
    relative_dir: &str,
    mode: ChannelMode,
    registry: &ChannelRegistry,
    hotplug: &dyn HotplugWatcher,
    sink: &dyn Sink,
) -> Result<()> {
    let entries = fs::read_dir(absolute_dir).map_err(|source| ConsumerError::NoEntry {
        path: absolute_dir.to_path_buf(),
        source,
    })?;

    sink.on_new_channels_folder(relative_dir)
        .map_err(|source| ConsumerError::NoEntry {
            path: absolute_dir.to_path_buf(),
            source,
        })?;

    if let Ok(wd) = hotplug.add_watch(absolute_dir) {
        registry.append_watch(HotplugWatch {
            wd,
            absolute_dir: absolute_dir.to_path_buf(),
            relative_dir: relative_dir.to_string(),
        });
    } else {
        log::warn!("could not add hot-plug watch on {}", absolute_dir.display());
    }

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("skipping unreadable entry under {}: {err}", absolute_dir.display());
                continue;
            }
        };

        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(err) => {
                log::warn!("skipping {}: {err}", entry.path().display());
                continue;
            }
        };
        if file_type.is_symlink() {
            continue;
        }

        let child_absolute = entry.path();
        let child_relative = if relative_dir.is_empty() {
            name.to_string()
        } else {
            format!("{relative_dir}/{name}")
        };

        if file_type.is_dir() {
            walk_dir(&child_absolute, &child_relative, mode, registry, hotplug, sink)?;
        } else if file_type.is_file() {
            if let Some(pair) = open_buffer_file(&child_absolute, &child_relative, name, mode, sink) {
                registry.append_pair(pair);
            }
        }
    }

    Ok(())
}

/// Opens one candidate ring file and, if it passes the mode filter and the
/// sink accepts it, returns the new pair. Any failure here is logged and the
/// file is skipped rather than aborting the whole walk. Does not touch the
/// registry itself — callers append the returned pair, since the hot-plug
/// handler needs to do so while already holding the registry's write lock.
pub fn open_buffer_file(
    absolute_path: &Path,
    relative_path: &str,
    base_name: &str,
    mode: ChannelMode,
    sink: &dyn Sink,
) -> Option<Arc<RingPair>> {
    if !mode.admits(base_name) {
        log::debug!("skipping {relative_path}: excluded by channel mode");
        return None;
    }

    let file = match fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(absolute_path)
    {
        Ok(file) => file,
        Err(err) => {
            log::warn!("failed to open {}: {err}", absolute_path.display());
            return None;
        }
    };

    let pair = Arc::new(RingPair::new(file, relative_path.to_string()));

    if let Err(err) = sink.on_open_channel(&pair, relative_path) {
        log::warn!("sink refused channel {relative_path}: {err}");
        return None;
    }

    Some(pair)
}

/// Fetches geometry for every pair in `[start, end)` of the registry's
/// current snapshot. Used both at startup (the whole registry) and by the
/// hot-plug handler (just the newly appended range).
pub fn init_geometry_range(registry: &ChannelRegistry, start: usize) -> Result<()> {
    let pairs = registry.snapshot_pairs();
    for (index, pair) in pairs.iter().enumerate().skip(start) {
        protocol::init_geometry(index, pair)?;
    }
    Ok(())
}
