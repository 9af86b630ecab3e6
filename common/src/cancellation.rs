use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// A shared abort flag which long running batch operations poll between units of work.
///
/// Cloning the token shares the underlying flag, so cancelling any clone cancels them all.
#[derive(Default, Debug, Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
