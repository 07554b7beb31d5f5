// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`Spawner`] for plugging in thread-creation implementations.

use std::fmt;
use std::sync::Arc;

/// Error returned when a thread could not be created.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    /// The host does not support creating threads at all.
    #[error("thread creation is not available on this host")]
    Unavailable,

    /// The host supports threads but creation failed.
    #[error("failed to create thread: {0}")]
    Io(#[from] std::io::Error),
}

/// The body of a spawned thread, boxed for custom spawners.
pub type ThreadBody = Box<dyn FnOnce() + Send + 'static>;

/// Host-agnostic creator of detached worker threads.
///
/// `Spawner` abstracts how the coordination layer obtains threads. The
/// threads it creates are *detached* daemon-style threads: nothing joins
/// them, and they are expected to park in monitor waits for the remainder of
/// the process lifetime when idle.
///
/// Use [`Spawner::new_os`] in production, [`Spawner::new_disabled`] to model
/// a host without thread support (callers fall back to synchronous
/// execution), or [`Spawner::new_custom`] to intercept thread creation in
/// tests.
///
/// # Examples
///
/// ```
/// use sched_primitives::Spawner;
///
/// let spawner = Spawner::new_os();
/// assert!(spawner.can_spawn());
/// spawner.spawn("example-worker", || {})?;
///
/// # Ok::<(), sched_primitives::SpawnError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Spawner(SpawnerKind);

#[derive(Debug, Clone)]
enum SpawnerKind {
    Os,
    Disabled,
    Custom(CustomSpawner),
}

#[derive(Clone)]
struct CustomSpawner(Arc<dyn Fn(&str, ThreadBody) -> Result<(), SpawnError> + Send + Sync>);

impl fmt::Debug for CustomSpawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("CustomSpawner(..)")
    }
}

impl Spawner {
    /// Creates a spawner backed by OS threads.
    #[must_use]
    pub const fn new_os() -> Self {
        Self(SpawnerKind::Os)
    }

    /// Creates a spawner for a host that cannot create threads.
    ///
    /// [`Spawner::can_spawn`] reports `false` and every [`Spawner::spawn`]
    /// fails with [`SpawnError::Unavailable`].
    #[must_use]
    pub const fn new_disabled() -> Self {
        Self(SpawnerKind::Disabled)
    }

    /// Creates a spawner from a closure.
    ///
    /// The closure receives the thread name and the boxed thread body and is
    /// responsible for running the body somewhere.
    pub fn new_custom<F>(f: F) -> Self
    where
        F: Fn(&str, ThreadBody) -> Result<(), SpawnError> + Send + Sync + 'static,
    {
        Self(SpawnerKind::Custom(CustomSpawner(Arc::new(f))))
    }

    /// Whether this spawner can create threads at all.
    #[must_use]
    pub const fn can_spawn(&self) -> bool {
        !matches!(self.0, SpawnerKind::Disabled)
    }

    /// Spawns a detached named thread running `body`.
    pub fn spawn(&self, name: &str, body: impl FnOnce() + Send + 'static) -> Result<(), SpawnError> {
        match &self.0 {
            SpawnerKind::Os => {
                // The handle is dropped on purpose; workers are detached.
                let _ = std::thread::Builder::new().name(name.to_owned()).spawn(body)?;
                Ok(())
            }
            SpawnerKind::Disabled => Err(SpawnError::Unavailable),
            SpawnerKind::Custom(custom) => (custom.0)(name, Box::new(body)),
        }
    }
}
