use crate::pair::RingPair;

/// The capability set the engine invokes to turn drained sub-buffer bytes
/// into a persistent trace.
///
/// This is the boundary between the engine (this crate) and everything that
/// decides *where bytes go* — a concrete implementation (a file-system
/// mirror, a network forwarder, a test double) is chosen once at
/// construction and the engine only ever depends on this trait. `Sink` is
/// object-safe so a single `Box<dyn Sink>` can be shared across the worker
/// pool.
///
/// # Thread-safety
///
/// `on_new_channels_folder` and `on_open_channel` are only ever called from
/// whichever single worker currently holds the registry write lock, so they
/// never race each other. `on_read_subbuffer` is re-entrant across distinct
/// pairs (different workers may be inside it concurrently for different
/// rings) but is serialised per pair by that pair's mutex — implementations
/// may keep pair-scoped state (through `pair.user_data`) without additional
/// synchronization. `on_new_thread`/`on_close_thread` bracket one worker's
/// lifetime and may run concurrently with every other callback.
pub trait Sink: Send + Sync {
    /// A new directory was discovered under the trace root. Failure aborts
    /// startup.
    fn on_new_channels_folder(&self, relative_path: &str) -> std::io::Result<()>;

    /// A new ring file was opened. `relative_path` is relative to the trace
    /// root. Returning an error causes the engine to close the ring's handle
    /// and skip it rather than register it.
    fn on_open_channel(&self, pair: &RingPair, relative_path: &str) -> std::io::Result<()>;

    /// Consume exactly `len` bytes from `pair`'s current read position.
    /// Implementations must advance `pair.offset` by the number of bytes
    /// actually written on success. Errors are logged by the engine; the
    /// sub-buffer is released regardless.
    fn on_read_subbuffer(&self, pair: &RingPair, len: u32) -> std::io::Result<()>;

    /// A ring is being torn down; the channel's read handle has already been
    /// closed by the engine. Errors are logged, not propagated.
    fn on_close_channel(&self, pair: &RingPair);

    /// A worker thread `thread_num` has just started.
    fn on_new_thread(&self, thread_num: usize);

    /// A worker thread `thread_num` is about to exit.
    fn on_close_thread(&self, thread_num: usize);

    /// The trace instance has finished: every worker has joined and every
    /// ring has been closed. Called exactly once, strictly after every other
    /// callback.
    fn on_trace_end(&self);
}
