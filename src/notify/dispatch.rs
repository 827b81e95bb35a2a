// src/notify/dispatch.rs
//! In-order chunk delivery. The first failed chunk stops the batch; nothing
//! is retried here.

use std::time::Duration;

use metrics::counter;
use thiserror::Error;

use super::Transport;
use crate::error::DeliveryError;
use crate::render::RenderedChunk;

#[derive(Debug, Error)]
#[error("delivered {sent} of {total} chunks: {error}")]
pub struct PartialDelivery {
    pub sent: usize,
    pub total: usize,
    #[source]
    pub error: DeliveryError,
}

/// Send every chunk in order. Returns the number delivered, which on success
/// equals `chunks.len()`.
pub async fn dispatch(
    transport: &dyn Transport,
    chunks: &[RenderedChunk],
    per_send: Duration,
) -> Result<usize, PartialDelivery> {
    let total = chunks.len();
    for (i, chunk) in chunks.iter().enumerate() {
        let res = tokio::time::timeout(per_send, transport.send(&chunk.text))
            .await
            .unwrap_or(Err(DeliveryError::Timeout(per_send)));
        match res {
            Ok(()) => {
                counter!("digest_chunks_sent_total").increment(1);
                tracing::debug!(chunk = i + 1, total, transport = transport.name(), "chunk delivered");
            }
            Err(error) => {
                tracing::error!(chunk = i + 1, total, transport = transport.name(), error = %error, "delivery failed; aborting batch");
                return Err(PartialDelivery {
                    sent: i,
                    total,
                    error,
                });
            }
        }
    }
    Ok(total)
}
