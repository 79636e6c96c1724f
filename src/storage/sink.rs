use async_trait::async_trait;

use crate::error::Result;
use crate::upload::AssembledFile;
use super::types::StoredFile;

/// Destination for completed uploads
///
/// A transfer may be called again with the same file after a failure, so
/// implementations must read the bytes from the start on every call.
#[async_trait]
pub trait TransferSink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn transfer(&self, file: &AssembledFile) -> Result<StoredFile>;
}
