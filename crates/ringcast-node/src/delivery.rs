use std::sync::Arc;

use ringcast_codec::{CodecError, Message, MessageBody, SealedBody};
use ringcast_crypto::session;
use tracing::{debug, warn};

use crate::ack::AckTracker;
use crate::error::NodeError;
use crate::ledger::SubjectLedger;
use crate::property::CacheOutcome;
use crate::stats::{bump, NodeStats};
use crate::token::LedgerToken;

/// Result of one `publish` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Sealed for a receiver capability and handed to the router.
    Delivered { destination: String },
    /// No receiver capability yet; kept in the pending cache.
    Buffered,
    /// Pending cache full and nothing could be purged.
    Rejected,
}

/// Hands a sealed message to its destination node.
pub trait MessageRoute: Send + Sync {
    fn route(&self, destination: &str, message: Message, now_ms: u64) -> Result<(), NodeError>;
}

/// Collaborators of one delivery attempt.
pub struct DeliveryParams<'a> {
    pub ledger: &'a SubjectLedger,
    pub router: &'a dyn MessageRoute,
    pub acks: &'a AckTracker,
    pub ack_timeout_ms: u64,
    pub stats: &'a NodeStats,
    pub now_ms: u64,
}

/// Delivery path for one outgoing message of `params.ledger`'s subject.
///
/// A unit of `send_property` capacity is reserved up front. If a receiver
/// capability is found the message is sealed and routed and the
/// reservation is released; otherwise the caching branch decides between
/// buffering and rejection under the property lock.
pub fn publish(
    params: &DeliveryParams<'_>,
    message: Arc<Message>,
) -> Result<PublishOutcome, NodeError> {
    let property = &params.ledger.send_property;
    let now_ms = params.now_ms;
    property.reserve(now_ms)?;
    bump(&params.stats.published);

    let found = match params.ledger.find_receiver_capability(now_ms) {
        Ok(found) => found,
        Err(err) => {
            property.release(now_ms)?;
            return Err(err);
        }
    };

    if let Some(token) = found {
        let delivered = deliver(params, &message, &token);
        property.release(now_ms)?;
        let destination = delivered?;
        return Ok(PublishOutcome::Delivered { destination });
    }

    match property.cache_or_reject(Arc::clone(&message), now_ms)? {
        CacheOutcome::Buffered { evicted } => {
            bump(&params.stats.buffered);
            if evicted.is_some() {
                bump(&params.stats.purged);
            }
            debug!(subject = %message.subject, id = %message.id, "no receiver capability, buffered");
            Ok(PublishOutcome::Buffered)
        }
        CacheOutcome::Rejected => {
            bump(&params.stats.rejected);
            Ok(PublishOutcome::Rejected)
        }
    }
}

/// Re-runs delivery for cached messages, oldest first, until the cache is
/// empty or no receiver capability is left. Returns how many went out.
///
/// A message whose routing fails goes back to the tail of the cache and
/// the error ends the drain.
pub fn drain(params: &DeliveryParams<'_>) -> Result<usize, NodeError> {
    let property = &params.ledger.send_property;
    let mut delivered = 0;
    while let Some(entry) = property.pop_oldest(params.now_ms)? {
        let found = match params.ledger.find_receiver_capability(params.now_ms) {
            Ok(found) => found,
            Err(err) => {
                property.restore_oldest(entry)?;
                return Err(err);
            }
        };
        let Some(token) = found else {
            property.restore_oldest(entry)?;
            break;
        };
        if let Err(err) = deliver(params, &entry.message, &token) {
            property.restore_oldest(entry)?;
            return Err(err);
        }
        delivered += 1;
    }
    if delivered > 0 {
        debug!(subject = params.ledger.subject(), delivered, "drained pending cache");
    }
    Ok(delivered)
}

/// Seals `message` for `token`'s holder, rewrites its destination header
/// and routes it. Returns the destination.
fn deliver(
    params: &DeliveryParams<'_>,
    message: &Message,
    token: &LedgerToken,
) -> Result<String, NodeError> {
    let MessageBody::Plain(plaintext) = &message.body else {
        return Err(CodecError::InvalidMessage("message is already sealed").into());
    };
    let capability = token.token();
    let aad = session::message_aad(&params.ledger.point(), message.id.as_bytes());
    let sealed = session::seal(&capability.public_key, &aad, plaintext)?;
    let destination = capability.destination().to_string();

    let outbound = Message {
        to: Some(destination.clone()),
        hops: message.hops.saturating_add(1),
        body: MessageBody::Sealed(SealedBody {
            ephemeral_public: sealed.ephemeral_public,
            nonce: sealed.nonce,
            ciphertext: sealed.ciphertext,
        }),
        ..message.clone()
    };
    params.acks.track(
        message.id,
        &destination,
        message.ack_mode,
        outbound.hops,
        params.now_ms,
        params.ack_timeout_ms,
    )?;
    if let Err(err) = params.router.route(&destination, outbound, params.now_ms) {
        warn!(subject = %message.subject, id = %message.id, %destination, %err, "routing failed");
        return Err(err);
    }
    bump(&params.stats.delivered);
    Ok(destination)
}
