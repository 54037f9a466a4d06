//! Removal of archived content in transport-sized batches.

use std::time::Duration;

use crate::model::{ChatId, ContentPointer, ItemKind};
use crate::tokens::ActionToken;
use crate::transport::{Transport, TransportError};

/// Largest batch a single delete call accepts
pub const DELETE_CHUNK: usize = 100;
pub const DELETE_PAUSE: Duration = Duration::from_millis(500);

/// First step of a deletion: what would be removed, and the token that
///  confirms it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePrompt {
    pub display_name: String,
    pub kind: ItemKind,
    pub items: usize,
    pub confirm: ActionToken,
    pub cancel: ActionToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deleted {
    pub display_name: String,
    pub kind: ItemKind,
    /// Some archived content was already absent
    pub content_already_gone: bool,
}

/// Delete `pointers` from `chat` in chunks, pausing between chunks.
///
/// Returns whether any chunk reported its content as already gone. Any
///  other failure stops the run and is returned.
pub async fn delete_chunked<T: Transport + ?Sized>(
    transport: &T,
    chat: ChatId,
    pointers: &[ContentPointer],
    chunk: usize,
    pause: Duration,
) -> Result<bool, TransportError> {
    let mut gone = false;
    for (i, batch) in pointers.chunks(chunk.max(1)).enumerate() {
        if i > 0 && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        match transport.delete(chat, batch).await {
            Ok(()) => {}
            Err(e) if e.is_content_gone() => {
                tracing::debug!(chat, error = %e, "archived content already gone");
                gone = true;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(gone)
}
