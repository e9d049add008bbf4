//! Text-frame routing: log, check permission, deliver.
//!
//! Every text frame is appended to the message log first, unconditionally.
//! Delivery then requires a follow edge with `follower == sender` and
//! `followed == recipient`: the sender must follow the recipient. Permitted
//! messages go to every live connection of the recipient; offline recipients
//! get nothing and nothing is queued.

use std::sync::Arc;

use parley_proto::record;

use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::store::{FollowStore, MessageLog};
use crate::transform::BodyTransform;

/// Sender name used on notices generated by the relay itself.
pub const NOTICE_SENDER: &str = "server";

/// What the relay does when the follow check denies a delivery.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DenialPolicy {
    /// Drop the message; only a server-side log entry records it.
    #[default]
    Silent,
    /// Drop the message and send the sender a notice.
    Notify,
}

/// Result of routing one text frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Written to this many of the recipient's connections.
    Delivered(usize),
    /// Permitted, but the recipient has no live connection.
    Offline,
    /// The sender does not follow the recipient.
    Denied,
    /// The body transform rejected the body for delivery.
    Dropped,
}

/// Routes text frames between identified connections.
pub struct Router {
    registry: Arc<ConnectionRegistry>,
    follows: FollowStore,
    messages: MessageLog,
    transform: Arc<dyn BodyTransform>,
    denial_policy: DenialPolicy,
}

impl Router {
    /// Creates a router.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        follows: FollowStore,
        messages: MessageLog,
        transform: Arc<dyn BodyTransform>,
        denial_policy: DenialPolicy,
    ) -> Self {
        Self {
            registry,
            follows,
            messages,
            transform,
            denial_policy,
        }
    }

    /// Routes `body` from `sender` to `recipient`.
    ///
    /// `origin` is the sender's own connection; it only receives something
    /// under [`DenialPolicy::Notify`]. Store and write failures are logged
    /// and never propagate to the caller.
    pub async fn route(
        &self,
        origin: &ConnectionHandle,
        sender: &str,
        recipient: &str,
        body: &str,
    ) -> RouteOutcome {
        let logged = self.transform.for_log(body).unwrap_or_else(|e| {
            tracing::warn!(sender = %sender, error = %e, "logging body as received");
            body.to_string()
        });
        let permitted = self.log_and_check(sender, recipient, logged).await;
        if !permitted {
            tracing::info!(
                sender = %sender,
                recipient = %recipient,
                "message blocked: sender does not follow recipient"
            );
            if self.denial_policy == DenialPolicy::Notify {
                let notice = record::delivery(
                    NOTICE_SENDER,
                    &format!("message to {recipient} was not delivered"),
                );
                if let Err(e) = origin.deliver(notice) {
                    tracing::debug!(sender = %sender, error = %e, "denial notice not sent");
                }
            }
            return RouteOutcome::Denied;
        }

        let body = match self.transform.for_delivery(body) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(
                    sender = %sender,
                    recipient = %recipient,
                    error = %e,
                    "delivery dropped"
                );
                return RouteOutcome::Dropped;
            }
        };

        let targets = self.registry.find_by_username(recipient);
        if targets.is_empty() {
            tracing::info!(recipient = %recipient, "recipient not online");
            return RouteOutcome::Offline;
        }

        let delivery = record::delivery(sender, &body);
        let mut delivered = 0;
        for target in &targets {
            match target.deliver(delivery.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(recipient = %recipient, error = %e, "delivery to session failed");
                }
            }
        }

        tracing::debug!(
            sender = %sender,
            recipient = %recipient,
            sessions = delivered,
            "message delivered"
        );
        RouteOutcome::Delivered(delivered)
    }

    /// Appends the message to the log, then checks the follow edge.
    ///
    /// Both statements run on the blocking pool. A failed check counts as
    /// denied.
    async fn log_and_check(&self, sender: &str, recipient: &str, logged: String) -> bool {
        let messages = self.messages.clone();
        let follows = self.follows.clone();
        let (from, to) = (sender.to_string(), recipient.to_string());
        let joined = tokio::task::spawn_blocking(move || {
            let appended = messages.append(&from, &to, &logged);
            (appended, follows.is_following(&from, &to))
        })
        .await;
        let (appended, permitted) = match joined {
            Ok(results) => results,
            Err(e) => {
                tracing::error!(sender = %sender, recipient = %recipient, error = %e, "spawn_blocking join error");
                return false;
            }
        };

        match appended {
            Ok(id) => tracing::debug!(id, sender = %sender, recipient = %recipient, "message logged"),
            Err(e) => tracing::error!(
                sender = %sender,
                recipient = %recipient,
                error = %e,
                "failed to log message"
            ),
        }
        permitted.unwrap_or_else(|e| {
            tracing::error!(
                sender = %sender,
                recipient = %recipient,
                error = %e,
                "follow check failed, treating as denied"
            );
            false
        })
    }
}
