//! Worker-pool engine for draining per-CPU kernel ring-buffer tracing
//! channels into a pluggable [`Sink`].
//!
//! The engine discovers channel files under a trace root, reserves and
//! releases sub-buffers through the relay ioctl protocol, and schedules a
//! pool of OS threads over them with a two-tier priority `poll(2)` loop. It
//! never decides where drained bytes go — that is entirely the `Sink`'s job.
//!
//! # Key Features
//!
//! - Per-CPU ring discovery with live hot-plug (new channel files appearing
//!   after startup are picked up without a restart)
//! - Two-tier priority scheduling: near-full rings are served before
//!   ordinary-priority ones
//! - A non-blocking per-ring drain lock, so one worker never stalls behind
//!   another's slow `Sink` call
//! - A small, object-safe `Sink` trait as the only extension point
//!
//! # Example
//!
//! ```no_run
//! use consumer_core::{ChannelMode, ConsumerConfig, Sink, TraceInstance};
//! # struct NullSink;
//! # impl Sink for NullSink {
//! #     fn on_new_channels_folder(&self, _: &str) -> std::io::Result<()> { Ok(()) }
//! #     fn on_open_channel(&self, _: &consumer_core::RingPair, _: &str) -> std::io::Result<()> { Ok(()) }
//! #     fn on_read_subbuffer(&self, _: &consumer_core::RingPair, _: u32) -> std::io::Result<()> { Ok(()) }
//! #     fn on_close_channel(&self, _: &consumer_core::RingPair) {}
//! #     fn on_new_thread(&self, _: usize) {}
//! #     fn on_close_thread(&self, _: usize) {}
//! #     fn on_trace_end(&self) {}
//! # }
//!
//! let config = ConsumerConfig::builder("/sys/kernel/debug/tracing/channels")
//!     .worker_count(4)
//!     .mode(ChannelMode::All)
//!     .build()?;
//! let instance = TraceInstance::new();
//! instance.start(&config, &NullSink)?;
//! # Ok::<(), consumer_core::ConsumerError>(())
//! ```

mod config;
mod discovery;
mod error;
mod hotplug;
mod instance;
mod ioctl;
mod pair;
mod protocol;
mod registry;
mod scheduler;
mod sink;

pub use config::{ChannelMode, ConsumerConfig, ConsumerConfigBuilder};
pub use error::{ConsumerError, Result};
pub use hotplug::{HotplugEvent, HotplugWatcher, InotifyWatcher, NullHotplugWatcher, WatchId};
pub use instance::TraceInstance;
pub use pair::RingPair;
pub use sink::Sink;
