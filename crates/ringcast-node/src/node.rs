use std::collections::HashSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use ringcast_codec::{
    decode_frame, encode_frame, AckFrame, CapabilityToken, CodecError, Frame, Message, MessageBody,
};
use ringcast_core::hash::blake3_32;
use ringcast_core::{AckMode, KeyPoint, Role};
use ringcast_crypto::session::{self, SealedPayload};
use ringcast_crypto::signing::{Ed25519Signer, Ed25519Verifier, Signer};
use ringcast_transport::{Rendezvous, Transport};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ack::{AckState, AckSweep, AckTracker};
use crate::advert::{DueAdvertisement, InboundMessage, InterestRegistry, MessageHandler};
use crate::config::NodeConfig;
use crate::delivery::{self, DeliveryParams, MessageRoute, PublishOutcome};
use crate::error::NodeError;
use crate::ledger::{InsertOutcome, LedgerTable, SubjectLedger};
use crate::link::LinkTable;
use crate::property::MessageProperty;
use crate::stats::{add, bump, NodeStats, NodeStatsSnapshot};
use crate::sync::lock_within;
use crate::token::{create_token, node_id_for, LedgerToken, TokenClaims};

/// Counts from one [`Node::tick_maintenance`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Invalid tokens dropped from all ledgers.
    pub released_tokens: usize,
    /// Pending messages discarded for outliving their ttl.
    pub expired_cached: usize,
    pub acks: AckSweep,
    pub idle_ledgers: Vec<String>,
}

/// One ringcast participant: its identity, ledgers and registered interests.
///
/// Every entry point takes `&self` and may be called from any worker
/// thread; callers pass the current time in milliseconds.
pub struct Node {
    id: String,
    point: KeyPoint,
    config: NodeConfig,
    signer: Ed25519Signer,
    public_key: [u8; 32],
    verifier: Ed25519Verifier,
    transport: Arc<dyn Transport>,
    rendezvous: Arc<dyn Rendezvous>,
    ledgers: LedgerTable,
    interests: InterestRegistry,
    acks: AckTracker,
    links: LinkTable,
    seen: Mutex<LruCache<Uuid, ()>>,
    stats: NodeStats,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Node {
    pub fn new(
        config: NodeConfig,
        secret: [u8; 32],
        transport: Arc<dyn Transport>,
        rendezvous: Arc<dyn Rendezvous>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let signer = Ed25519Signer::from_secret(secret);
        let public_key = signer.public_key();
        let lock_timeout = config.lock_timeout();
        let capacity = NonZeroUsize::new(config.seen_message_capacity).unwrap_or(NonZeroUsize::MIN);
        let node = Self {
            id: node_id_for(&public_key),
            point: KeyPoint::from_bytes(blake3_32(&public_key)),
            signer,
            public_key,
            verifier: Ed25519Verifier,
            transport,
            rendezvous,
            ledgers: LedgerTable::new(config.default_property.clone(), lock_timeout),
            interests: InterestRegistry::new(config.token_refresh_ms, lock_timeout),
            acks: AckTracker::new(lock_timeout),
            links: LinkTable::new(lock_timeout),
            seen: Mutex::new(LruCache::new(capacity)),
            stats: NodeStats::default(),
            config,
        };
        info!(node = %node.id, "node started");
        Ok(node)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Position of this node in the key space.
    pub fn point(&self) -> KeyPoint {
        self.point
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.public_key
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn stats(&self) -> NodeStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn ledger(&self, subject: &str) -> Result<Option<Arc<SubjectLedger>>, NodeError> {
        self.ledgers.get(subject)
    }

    pub fn ledgers(&self) -> &LedgerTable {
        &self.ledgers
    }

    pub fn interests(&self) -> &InterestRegistry {
        &self.interests
    }

    pub fn acks(&self) -> &AckTracker {
        &self.acks
    }

    pub fn links(&self) -> &LinkTable {
        &self.links
    }

    /// Registers local interest in `subject` and advertises it right away.
    ///
    /// `property` becomes the subject's delivery property for `role`. A
    /// receiver `handler` gets every decrypted inbound message. Later
    /// refreshes happen in [`Self::tick_advertise`].
    pub fn advertise_interest(
        &self,
        subject: &str,
        role: Role,
        property: MessageProperty,
        handler: Option<Arc<dyn MessageHandler>>,
        now_ms: u64,
    ) -> Result<(), NodeError> {
        let property = MessageProperty {
            subject: subject.to_string(),
            ..property
        };
        let ledger = self.ledgers.get_or_create(subject, now_ms)?;
        ledger.property(role).configure(property.clone(), now_ms)?;
        self.interests.register(subject, role, property, handler)?;

        // A running refresh round already carries the new settings.
        let Some(due) = self.interests.claim(subject, role)? else {
            return Ok(());
        };
        let result = self.advertise(&due, now_ms);
        self.interests.finish(subject, role, now_ms, result.is_ok())?;
        result
    }

    /// Stops re-advertising; tokens already issued run out on their own.
    pub fn withdraw_interest(&self, subject: &str, role: Role) -> Result<bool, NodeError> {
        let withdrawn = self.interests.withdraw(subject, role)?;
        if withdrawn {
            info!(node = %self.id, subject, ?role, "interest withdrawn");
        }
        Ok(withdrawn)
    }

    /// Delivery path entry point for one outgoing message.
    pub fn publish(
        &self,
        subject: &str,
        payload: &[u8],
        now_ms: u64,
    ) -> Result<PublishOutcome, NodeError> {
        let ledger = self.ledgers.get_or_create(subject, now_ms)?;
        let ack_mode = ledger.send_property.settings()?.ack_mode;
        let message = Message::new(subject, self.id.as_str(), payload.to_vec(), ack_mode);
        delivery::publish(&self.delivery_params(&ledger, now_ms), Arc::new(message))
    }

    /// Decodes one inbound frame from `from` and dispatches it.
    ///
    /// Malformed frames are rejected here, before any ledger is touched.
    pub fn on_frame(&self, from: &str, bytes: &[u8], now_ms: u64) -> Result<(), NodeError> {
        let frame = match decode_frame(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(node = %self.id, from, %err, "dropping malformed frame");
                return Err(err.into());
            }
        };
        debug!(node = %self.id, from, kind = frame.kind(), "frame received");
        match frame {
            Frame::Token(token) => self.on_token_received(token, now_ms).map(|_| ()),
            Frame::Message(message) => self.on_message_received(message, now_ms).map(|_| ()),
            Frame::Ack(ack) => {
                if ack.from != from {
                    warn!(node = %self.id, from, claimed = %ack.from, "ack source mismatch");
                    return Ok(());
                }
                self.on_ack_received(ack.message_id, &ack.from, now_ms).map(|_| ())
            }
        }
    }

    /// Stores an inbound capability token in its subject ledger.
    ///
    /// Returns `false` when the token was dropped as invalid or unusable.
    /// On the subject's rendezvous node the token is also exchanged with
    /// every counterpart holder; a new receiver capability re-checks the
    /// pending cache.
    pub fn on_token_received(
        &self,
        token: CapabilityToken,
        now_ms: u64,
    ) -> Result<bool, NodeError> {
        let role = match token.role() {
            Ok(role) => role,
            Err(err) => {
                bump(&self.stats.tokens_rejected);
                return Err(err.into());
            }
        };
        let held = Arc::new(LedgerToken::new(token, &self.verifier));
        if !held.is_valid(now_ms) {
            bump(&self.stats.tokens_rejected);
            debug!(
                node = %self.id,
                subject = %held.token().subject,
                issuer = held.issuer(),
                signature_ok = held.signature_ok(),
                "dropping invalid token"
            );
            return Ok(false);
        }

        let ledger = self.ledgers.get_or_create(&held.token().subject, now_ms)?;
        let outcome = match role {
            Role::Sender => ledger.insert_sender(Arc::clone(&held), now_ms)?,
            Role::Receiver => ledger.insert_receiver(Arc::clone(&held), now_ms)?,
        };
        match outcome {
            InsertOutcome::Stored { .. } => {}
            InsertOutcome::Duplicate => return Ok(false),
            InsertOutcome::Ignored => {
                bump(&self.stats.tokens_rejected);
                return Ok(false);
            }
        }
        bump(&self.stats.tokens_accepted);

        if self.is_rendezvous_for(&ledger.point()) {
            self.exchange(&ledger, &held, role, now_ms)?;
        }
        if role == Role::Receiver {
            self.drain_pending(&ledger, now_ms);
        }
        Ok(true)
    }

    /// Opens a sealed message addressed to this node and hands it to the
    /// subject's handler.
    ///
    /// Returns `true` when the message reached the application. Messages
    /// from publishers without a sender capability are dropped, and ids
    /// already handled are only re-acknowledged.
    pub fn on_message_received(&self, message: Message, now_ms: u64) -> Result<bool, NodeError> {
        message.validate()?;
        let MessageBody::Sealed(body) = &message.body else {
            return Err(CodecError::InvalidMessage("inbound message must be sealed").into());
        };
        if message.to.as_deref() != Some(self.id.as_str()) {
            warn!(node = %self.id, id = %message.id, to = ?message.to, "message not addressed to this node");
            return Ok(false);
        }
        if self.lock_seen()?.contains(&message.id) {
            bump(&self.stats.duplicates);
            debug!(node = %self.id, id = %message.id, "duplicate message");
            self.acknowledge(&message, now_ms);
            return Ok(false);
        }
        if !self.interests.is_registered(&message.subject, Role::Receiver)? {
            debug!(node = %self.id, subject = %message.subject, "no receiver interest for subject");
            return Ok(false);
        }

        let ledger = self.ledgers.get_or_create(&message.subject, now_ms)?;
        if ledger
            .find_sender_capability(&message.from, now_ms)?
            .is_none()
        {
            bump(&self.stats.unauthorized);
            warn!(
                node = %self.id,
                subject = %message.subject,
                from = %message.from,
                "no sender capability for publisher"
            );
            return Ok(false);
        }

        let aad = session::message_aad(&ledger.point(), message.id.as_bytes());
        let sealed = SealedPayload {
            ephemeral_public: body.ephemeral_public,
            nonce: body.nonce,
            ciphertext: body.ciphertext.clone(),
        };
        let payload = session::open(&self.signer, &sealed, &aad)?;
        if self.lock_seen()?.put(message.id, ()).is_some() {
            // lost a race with a concurrent copy
            bump(&self.stats.duplicates);
            return Ok(false);
        }

        if let Some(handler) = self.interests.handler(&message.subject)? {
            handler.on_message(&InboundMessage {
                id: message.id,
                subject: message.subject.clone(),
                from: message.from.clone(),
                payload,
            });
        }
        bump(&self.stats.inbound_delivered);
        self.acknowledge(&message, now_ms);
        Ok(true)
    }

    /// Feeds one acknowledgement into the tracker.
    pub fn on_ack_received(
        &self,
        message_id: Uuid,
        source: &str,
        now_ms: u64,
    ) -> Result<Option<AckState>, NodeError> {
        let state = self.acks.on_ack(message_id, source, now_ms)?;
        if state == Some(AckState::Acked) {
            bump(&self.stats.acks_matched);
        }
        Ok(state)
    }

    /// Periodic pruning: invalid tokens, stale cached messages, settled
    /// acknowledgements and idle ledgers.
    pub fn tick_maintenance(&self, now_ms: u64) -> Result<MaintenanceReport, NodeError> {
        let mut report = MaintenanceReport::default();
        for ledger in self.ledgers.snapshot()? {
            report.released_tokens += ledger.prune_all(now_ms)?;
            let expired = ledger.send_property.expire_cached(now_ms)?;
            add(&self.stats.purged, expired as u64);
            report.expired_cached += expired;
        }

        report.acks = self.acks.sweep(now_ms, &self.links)?;
        add(&self.stats.acks_expired, report.acks.expired as u64);

        let registered = |subject: &str| {
            [Role::Sender, Role::Receiver]
                .into_iter()
                .any(|role| self.interests.is_registered(subject, role).unwrap_or(true))
        };
        report.idle_ledgers =
            self.ledgers
                .sweep_idle(now_ms, self.config.idle_ledger_ms, &registered)?;
        if !report.idle_ledgers.is_empty() {
            debug!(node = %self.id, removed = ?report.idle_ledgers, "dropped idle ledgers");
        }
        Ok(report)
    }

    /// Re-issues tokens for every interest due for refresh, then re-checks
    /// the pending caches of refreshed sender subjects. Returns how many
    /// tokens went out.
    pub fn tick_advertise(&self, now_ms: u64) -> Result<usize, NodeError> {
        let due = self.interests.claim_due(now_ms)?;
        let mut sent = 0;
        for advert in &due {
            let result = self.advertise(advert, now_ms);
            self.interests
                .finish(&advert.subject, advert.role, now_ms, result.is_ok())?;
            match result {
                Ok(()) => sent += 1,
                Err(err) => warn!(
                    node = %self.id,
                    subject = %advert.subject,
                    role = ?advert.role,
                    %err,
                    "advertisement failed"
                ),
            }
        }

        for advert in due.iter().filter(|advert| advert.role == Role::Sender) {
            if let Some(ledger) = self.ledgers.get(&advert.subject)? {
                self.drain_pending(&ledger, now_ms);
            }
        }
        Ok(sent)
    }

    /// Drains `ledger`'s pending cache. A failed drain leaves the message
    /// cached for the next attempt.
    fn drain_pending(&self, ledger: &SubjectLedger, now_ms: u64) -> usize {
        match delivery::drain(&self.delivery_params(ledger, now_ms)) {
            Ok(delivered) => delivered,
            Err(err) => {
                warn!(node = %self.id, subject = ledger.subject(), %err, "drain stopped");
                0
            }
        }
    }

    /// Submits `token` to its subject's rendezvous node.
    pub fn send_token(&self, token: CapabilityToken, now_ms: u64) -> Result<(), NodeError> {
        let point = KeyPoint::from_string(&token.subject);
        let destination = self
            .rendezvous
            .resolve_rendezvous(&point)
            .ok_or_else(|| NodeError::NoRendezvous(token.subject.clone()))?;
        if destination == self.id {
            self.on_token_received(token, now_ms)?;
            return Ok(());
        }
        self.send_frame(&destination, &Frame::Token(token))
    }

    fn advertise(&self, advert: &DueAdvertisement, now_ms: u64) -> Result<(), NodeError> {
        let property = &advert.property;
        let claims = TokenClaims {
            realm: self.config.realm.clone(),
            subject: advert.subject.clone(),
            audience: String::new(),
            role: advert.role,
            mep_type: property.mep_type,
            ack_mode: property.ack_mode,
            max_threshold: property.max_threshold,
            ttl_ms: self.config.token_ttl_ms,
            target_node: None,
        };
        let token = create_token(&self.signer, &claims, now_ms)?;
        debug!(node = %self.id, subject = %advert.subject, role = ?advert.role, "advertising interest");
        self.send_token(token, now_ms)
    }

    fn is_rendezvous_for(&self, point: &KeyPoint) -> bool {
        self.rendezvous.resolve_rendezvous(point).as_deref() == Some(self.id.as_str())
    }

    /// Introduces `held` to each counterpart issuer and vice versa.
    fn exchange(
        &self,
        ledger: &SubjectLedger,
        held: &LedgerToken,
        role: Role,
        now_ms: u64,
    ) -> Result<usize, NodeError> {
        let counterparts = ledger.valid(role.counterpart(), now_ms)?;
        let mut introduced = HashSet::new();
        let mut forwarded = 0;
        // newest first, one token per issuer
        for other in counterparts.iter().rev() {
            if other.issuer() == held.issuer() || !introduced.insert(other.issuer().to_string()) {
                continue;
            }
            forwarded += self.forward_token(other.token().destination(), held.snapshot());
            forwarded += self.forward_token(held.token().destination(), other.snapshot());
        }
        if forwarded > 0 {
            debug!(
                node = %self.id,
                subject = ledger.subject(),
                issuer = held.issuer(),
                forwarded,
                "exchanged capability tokens"
            );
        }
        Ok(forwarded)
    }

    fn forward_token(&self, destination: &str, token: CapabilityToken) -> usize {
        if destination == self.id {
            return 0;
        }
        match self.send_frame(destination, &Frame::Token(token)) {
            Ok(()) => 1,
            Err(err) => {
                warn!(node = %self.id, destination, %err, "token forward failed");
                0
            }
        }
    }

    fn acknowledge(&self, message: &Message, now_ms: u64) {
        if message.ack_mode == AckMode::None {
            return;
        }
        let result = if message.from == self.id {
            self.on_ack_received(message.id, &self.id, now_ms).map(|_| ())
        } else {
            let ack = AckFrame {
                message_id: message.id,
                from: self.id.clone(),
            };
            self.send_frame(&message.from, &Frame::Ack(ack))
        };
        if let Err(err) = result {
            warn!(node = %self.id, id = %message.id, to = %message.from, %err, "ack not sent");
        }
    }

    fn send_frame(&self, destination: &str, frame: &Frame) -> Result<(), NodeError> {
        let bytes = encode_frame(frame)?;
        self.transport.send(destination, &bytes)?;
        Ok(())
    }

    fn lock_seen(&self) -> Result<parking_lot::MutexGuard<'_, LruCache<Uuid, ()>>, NodeError> {
        lock_within(&self.seen, self.config.lock_timeout(), "seen_messages")
    }

    fn delivery_params<'a>(&'a self, ledger: &'a SubjectLedger, now_ms: u64) -> DeliveryParams<'a> {
        DeliveryParams {
            ledger,
            router: self,
            acks: &self.acks,
            ack_timeout_ms: self.config.ack_timeout_ms,
            stats: &self.stats,
            now_ms,
        }
    }
}

impl MessageRoute for Node {
    fn route(&self, destination: &str, message: Message, now_ms: u64) -> Result<(), NodeError> {
        if destination == self.id {
            self.on_message_received(message, now_ms)?;
            return Ok(());
        }
        self.send_frame(destination, &Frame::Message(message))
    }
}
