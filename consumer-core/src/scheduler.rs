use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::ChannelMode;
use crate::discovery;
use crate::error::ConsumerError;
use crate::hotplug::HotplugWatcher;
use crate::pair::RingPair;
use crate::protocol::{self, DrainOutcome};
use crate::registry::ChannelRegistry;
use crate::sink::Sink;

/// Runs one worker's poll loop until `stop` is observed or every ring it
/// can see has hung up.
///
/// Implements the two-tier priority discipline of the poll scheduler: a
/// high-priority pass drains every ring whose wait signal says it is close
/// to overwriting unread data, and the normal-priority pass only runs when
/// that first pass served nothing. Both passes use a non-blocking attempt on
/// each ring's drain lock, so a ring already being drained by another worker
/// is simply skipped this iteration.
pub fn worker_loop(
    thread_num: usize,
    registry: &ChannelRegistry,
    hotplug: &dyn HotplugWatcher,
    mode: ChannelMode,
    sink: &dyn Sink,
    stop: &AtomicBool,
) -> Result<(), ConsumerError> {
    let mut pairs = registry.snapshot_pairs();

    loop {
        if stop.load(Ordering::Relaxed) {
            return Ok(());
        }

        let hotplug_fd = hotplug.raw_fd();
        let mut pollfds = build_pollfds(hotplug_fd, &pairs);

        match poll_blocking(&mut pollfds) {
            Ok(Interrupted::No) => {}
            Ok(Interrupted::Yes) => {
                // A signal (the stop handler, typically) broke the wait with
                // no fd actually ready; loop back to the top to re-check stop.
                continue;
            }
            Err(err) => {
                // Not EINTR: a genuinely bad fd in the wait set, which
                // reconciling and retrying would just hit again forever.
                // Surface it once and let the worker exit.
                log::error!("thread {thread_num}: {err}");
                return Err(ConsumerError::PollFailed { source: err });
            }
        }

        let mut cursor = 0;
        if hotplug_fd.is_some() {
            if revents_of(&pollfds[0]) & (libc::POLLIN | libc::POLLPRI) != 0 {
                registry.with_write(|reg_pairs, reg_watches| {
                    handle_hotplug_events(thread_num, hotplug, reg_pairs, reg_watches, mode, sink);
                });
            }
            cursor = 1;
        }

        let ring_events = &pollfds[cursor..];
        let mut high_prio_seen = false;
        let mut hangups = 0usize;

        for (i, pfd) in ring_events.iter().enumerate() {
            let revents = revents_of(pfd);
            if revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                hangups += 1;
                continue;
            }
            if revents & libc::POLLPRI != 0 {
                if let Some(_guard) = pairs[i].try_drain_lock() {
                    match protocol::drain_one(i, &pairs[i], sink) {
                        Ok(DrainOutcome::Drained { .. }) => high_prio_seen = true,
                        Ok(DrainOutcome::NothingAvailable) => {}
                        Err(err) if pairs[i].warn_once() => log::warn!("thread {thread_num}: {err}"),
                        Err(_) => {}
                    }
                }
            }
        }

        if !high_prio_seen {
            for (i, pfd) in ring_events.iter().enumerate() {
                let revents = revents_of(pfd);
                if revents & libc::POLLIN != 0 {
                    if let Some(_guard) = pairs[i].try_drain_lock() {
                        if let Err(err) = protocol::drain_one(i, &pairs[i], sink) {
                            if pairs[i].warn_once() {
                                log::warn!("thread {thread_num}: {err}");
                            }
                        }
                    }
                }
            }
        }

        if !ring_events.is_empty() && hangups == ring_events.len() {
            log::info!("thread {thread_num}: every ring hung up, exiting");
            return Err(ConsumerError::AllHangup);
        }

        // A pair appended since this iteration's snapshot may miss one wait
        // cycle here; that is acceptable (see poll scheduler design notes).
        if registry.pair_count() != pairs.len() {
            pairs = registry.snapshot_pairs();
        }
    }
}

fn revents_of(pfd: &libc::pollfd) -> libc::c_short {
    pfd.revents
}

fn build_pollfds(hotplug_fd: Option<RawFd>, pairs: &[Arc<RingPair>]) -> Vec<libc::pollfd> {
    let mut pollfds = Vec::with_capacity(pairs.len() + 1);
    if let Some(fd) = hotplug_fd {
        pollfds.push(libc::pollfd {
            fd,
            events: libc::POLLIN | libc::POLLPRI,
            revents: 0,
        });
    }
    for pair in pairs {
        pollfds.push(libc::pollfd {
            fd: pair.raw_fd(),
            events: libc::POLLIN | libc::POLLPRI,
            revents: 0,
        });
    }
    pollfds
}

enum Interrupted {
    No,
    Yes,
}

/// Blocks in `poll(2)` with no timeout. A signal delivered during the wait
/// (the stop handler's `SIGINT`/`SIGQUIT`/`SIGTERM`) surfaces as
/// `Interrupted::Yes` rather than being retried, so the caller gets back to
/// its `stop` check promptly instead of blocking through it.
fn poll_blocking(pollfds: &mut [libc::pollfd]) -> std::io::Result<Interrupted> {
    let ret = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, -1) };
    if ret >= 0 {
        return Ok(Interrupted::No);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::Interrupted {
        return Ok(Interrupted::Yes);
    }
    Err(err)
}

/// Drains every pending hot-plug event, appending a pair (and its geometry)
/// for each newly-created channel file. Always called with the registry's
/// write lock already held by the caller.
fn handle_hotplug_events(
    thread_num: usize,
    hotplug: &dyn HotplugWatcher,
    pairs: &mut Vec<Arc<RingPair>>,
    watches: &mut Vec<crate::registry::HotplugWatch>,
    mode: ChannelMode,
    sink: &dyn Sink,
) {
    let events = match hotplug.read_events() {
        Ok(events) => events,
        Err(err) => {
            log::warn!("thread {thread_num}: error reading hot-plug events: {err}");
            return;
        }
    };

    for event in events {
        let Some(watch) = watches.iter().find(|w| w.wd == event.watch) else {
            continue;
        };
        let absolute_path = watch.absolute_dir.join(&event.new_name);
        let relative_path = if watch.relative_dir.is_empty() {
            event.new_name.clone()
        } else {
            format!("{}/{}", watch.relative_dir, event.new_name)
        };

        let Some(pair) = discovery::open_buffer_file(
            &absolute_path,
            &relative_path,
            &event.new_name,
            mode,
            sink,
        ) else {
            continue;
        };

        let index = pairs.len();
        if let Err(err) = protocol::init_geometry(index, &pair) {
            log::warn!("thread {thread_num}: {err}");
            continue;
        }
        pairs.push(pair);
    }
}
