//! Process-wide bearer token for outbound calls.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Anything that can hand out the latest bearer token without blocking.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Arc<String>;
}

/// Lock-free cell holding the current token. Clones share the same value.
#[derive(Clone, Default)]
pub struct TokenCell {
    inner: Arc<ArcSwap<String>>,
}

impl TokenCell {
    pub fn new(initial: impl Into<String>) -> Self { Self { inner: Arc::new(ArcSwap::from_pointee(initial.into())) } }
    pub fn get(&self) -> Arc<String> { self.inner.load_full() }
    pub fn set(&self, token: impl Into<String>) { self.inner.store(Arc::new(token.into())) }
}

impl TokenSource for TokenCell {
    fn token(&self) -> Arc<String> { self.get() }
}

impl std::fmt::Debug for TokenCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCell").field("len", &self.get().len()).finish()
    }
}

/// Re-read `path` into `cell`. Returns true when the stored token changed.
pub async fn refresh_from_file(cell: &TokenCell, path: &Path) -> std::io::Result<bool> {
    let raw = tokio::fs::read_to_string(path).await?;
    let fresh = raw.trim();
    if fresh == cell.get().as_str() {
        return Ok(false);
    }
    cell.set(fresh);
    info!(path = %path.display(), "bearer token refreshed");
    Ok(true)
}

/// Poll `path` every `every` and keep `cell` current. Read errors keep the previous token.
pub fn spawn_file_refresh(cell: TokenCell, path: PathBuf, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = refresh_from_file(&cell, &path).await {
                warn!(path = %path.display(), error = %e, "token refresh failed; keeping previous token");
            }
        }
    })
}
