//! Outbound alerts for new discoveries.
//!
//! A [`Notifier`] is told about every first sighting of a code. Delivery is
//! best effort: implementations log their own failures and never return one.

pub mod webhook;

use async_trait::async_trait;

use crate::repository::Candidate;

pub use webhook::DiscordNotifier;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, candidate: &Candidate);
}
