// src/notify/mod.rs
//! Delivery side: the `Transport` seam, the Telegram client behind it, and the
//! in-order chunk dispatcher.

pub mod dispatch;
pub mod telegram;

use crate::error::DeliveryError;

pub use dispatch::{dispatch, PartialDelivery};
pub use telegram::TelegramNotifier;

/// Sends one already-rendered message. Implementations own their retries.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), DeliveryError>;

    fn name(&self) -> &'static str;
}
