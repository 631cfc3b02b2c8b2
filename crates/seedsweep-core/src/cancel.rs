use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Error;

/// Cooperative abort flag shared between the CLI signal handler and the
/// pipeline. Stages check it at their boundaries; hashing checks it per chunk.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Error::Cancelled` if an abort was requested before `stage`.
    pub fn check(&self, stage: &'static str) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(Error::Cancelled { stage })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_flag() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(token.check("fetch").is_ok());

        other.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(
            token.check("scan"),
            Err(Error::Cancelled { stage: "scan" })
        ));
    }
}
