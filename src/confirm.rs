// src/confirm.rs

use async_trait::async_trait;

/// Yes/no decisions the manager delegates to whoever drives it.
///
/// Used for "overwrite the existing file?" and "try the mirror?".
/// The manager waits for the answer before going on.
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, title: &str, message: &str) -> bool;
}

/// Answers every question the same way. `AutoConfirm(true)` backs `--yes`.
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

#[async_trait]
impl Confirm for AutoConfirm {
    async fn confirm(&self, title: &str, _message: &str) -> bool {
        tracing::debug!("auto-answering {:?} with {}", title, self.0);
        self.0
    }
}
