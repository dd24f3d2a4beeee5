//! Advisory cancellation for long-running queries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag a caller can flip to stop an in-flight nearest-neighbour
/// search.
///
/// Cancellation is advisory: the search checks the flag between node
/// expansions and returns [`GeoQueryError::Cancelled`](crate::GeoQueryError::Cancelled)
/// the next time it looks. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancellationToken::new();
        let handle = token.clone();
        assert!(!token.is_cancelled());

        std::thread::spawn(move || handle.cancel())
            .join()
            .unwrap();
        assert!(token.is_cancelled());
    }
}
