use async_trait::async_trait;

use crate::error::NetResult;
use crate::packet::UploadChunk;

/// Receives upload chunks arriving on a channel.
///
/// Each chunk is acknowledged to the sender once the handler returns; an
/// error is reported back as the chunk's failure.
#[async_trait]
pub trait UploadHandler: Send + Sync {
    async fn on_chunk(&self, chunk: UploadChunk) -> NetResult<()>;
}
