//! The outbound transport seam.

use std::path::Path;

use maestro_core::{MaestroResult, UserId};

/// Raw message delivery to a chat transport.
///
/// Implementations wrap whatever actually carries messages (a bot API, a
/// websocket, a test log). `send_file` distinguishes "the file cannot be
/// sent" (`Ok(false)`, e.g. missing or oversized) from a transport
/// failure (`Err`), because the former is the caller's problem and the
/// latter is retried-or-logged infrastructure trouble.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Sends one text message. The text is already within
    /// [`max_text_len`](Transport::max_text_len).
    async fn send_text(&self, user: &UserId, text: &str) -> MaestroResult<()>;

    /// Sends one file with an optional caption. `Ok(false)` means the
    /// file could not be attached (not found, too large); that is not a
    /// transport failure.
    async fn send_file(
        &self,
        user: &UserId,
        path: &Path,
        caption: Option<&str>,
    ) -> MaestroResult<bool>;

    /// Longest text the transport accepts in one message. Longer texts
    /// are chunked before sending.
    fn max_text_len(&self) -> usize {
        4000
    }
}
