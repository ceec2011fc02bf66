use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ringcast_core::{KeyPoint, Pattern, Role};
use tracing::debug;
use uuid::Uuid;

use crate::error::NodeError;
use crate::property::{DeliveryProperty, MessageProperty};
use crate::sync::lock_within;
use crate::token::LedgerToken;

type TokenList = Vec<Arc<LedgerToken>>;

/// (issuer, uuid, issued_at) of one token issuance.
type IssuanceKey = (String, Uuid, u64);

/// What happened to a token handed to `insert_sender`/`insert_receiver`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Stored { pruned: usize, replaced: usize },
    /// Zero capacity, or the token's mode has no pattern for the list.
    Ignored,
    /// The same issuance is already held, or was dropped from this ledger
    /// before it expired; its consumption count stands.
    Duplicate,
}

/// Capability lists and delivery properties of one subject.
#[derive(Debug)]
pub struct SubjectLedger {
    subject: String,
    point: KeyPoint,
    lock_timeout: Duration,
    send_tokens: Mutex<TokenList>,
    recv_tokens: Mutex<TokenList>,
    pub send_property: DeliveryProperty,
    pub recv_property: DeliveryProperty,
    /// Issuances dropped before expiry, kept until their expiration so a
    /// stale copy cannot come back with fresh capacity.
    retired: Mutex<HashMap<IssuanceKey, u64>>,
    last_touch_ms: AtomicU64,
}

impl SubjectLedger {
    pub fn new(subject: &str, property: MessageProperty, lock_timeout: Duration, now_ms: u64) -> Self {
        Self {
            subject: subject.to_string(),
            point: KeyPoint::from_string(subject),
            lock_timeout,
            send_tokens: Mutex::new(Vec::new()),
            recv_tokens: Mutex::new(Vec::new()),
            send_property: DeliveryProperty::new("send_property", property.clone(), lock_timeout),
            recv_property: DeliveryProperty::new("recv_property", property, lock_timeout),
            retired: Mutex::new(HashMap::new()),
            last_touch_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn point(&self) -> KeyPoint {
        self.point
    }

    pub fn property(&self, role: Role) -> &DeliveryProperty {
        match role {
            Role::Sender => &self.send_property,
            Role::Receiver => &self.recv_property,
        }
    }

    fn list(&self, role: Role) -> (&Mutex<TokenList>, &'static str) {
        match role {
            Role::Sender => (&self.send_tokens, "send_tokens"),
            Role::Receiver => (&self.recv_tokens, "recv_tokens"),
        }
    }

    fn lock_list(&self, role: Role) -> Result<parking_lot::MutexGuard<'_, TokenList>, NodeError> {
        let (list, what) = self.list(role);
        lock_within(list, self.lock_timeout, what)
    }

    fn lock_retired(&self) -> Result<parking_lot::MutexGuard<'_, HashMap<IssuanceKey, u64>>, NodeError> {
        lock_within(&self.retired, self.lock_timeout, "retired_issuances")
    }

    /// Drops tokens failing `keep` from `list`, remembering the ones that
    /// have not yet expired. Returns how many were dropped.
    fn drop_where(
        &self,
        list: &mut TokenList,
        now_ms: u64,
        keep: impl Fn(&LedgerToken) -> bool,
    ) -> Result<usize, NodeError> {
        let (kept, dropped): (TokenList, TokenList) =
            std::mem::take(list).into_iter().partition(|t| keep(t.as_ref()));
        *list = kept;
        let unexpired: Vec<_> = dropped
            .iter()
            .filter(|t| t.token().expiration > now_ms)
            .collect();
        if !unexpired.is_empty() {
            let mut retired = self.lock_retired()?;
            for token in unexpired {
                retired.insert(issuance(token), token.token().expiration);
            }
        }
        Ok(dropped.len())
    }

    /// Drops entries from `issuer` that are no longer valid.
    fn prune_invalid(
        &self,
        list: &mut TokenList,
        issuer: &str,
        now_ms: u64,
    ) -> Result<usize, NodeError> {
        self.drop_where(list, now_ms, |t| t.issuer() != issuer || t.is_valid(now_ms))
    }

    pub fn touch(&self, now_ms: u64) {
        self.last_touch_ms.fetch_max(now_ms, Ordering::AcqRel);
    }

    pub fn last_touch_ms(&self) -> u64 {
        self.last_touch_ms.load(Ordering::Acquire)
    }

    pub fn insert_sender(
        &self,
        token: Arc<LedgerToken>,
        now_ms: u64,
    ) -> Result<InsertOutcome, NodeError> {
        self.insert(Role::Sender, token, now_ms)
    }

    pub fn insert_receiver(
        &self,
        token: Arc<LedgerToken>,
        now_ms: u64,
    ) -> Result<InsertOutcome, NodeError> {
        self.insert(Role::Receiver, token, now_ms)
    }

    fn insert(
        &self,
        role: Role,
        token: Arc<LedgerToken>,
        now_ms: u64,
    ) -> Result<InsertOutcome, NodeError> {
        if token.max_threshold() == 0 {
            debug!(subject = %self.subject, issuer = token.issuer(), "ignoring zero-capacity token");
            return Ok(InsertOutcome::Ignored);
        }
        let pattern = token
            .token()
            .mep_type()
            .ok()
            .and_then(|mep| mep.pattern_for(role));
        let Some(pattern) = pattern else {
            debug!(subject = %self.subject, issuer = token.issuer(), ?role, "token mode has no pattern for list");
            return Ok(InsertOutcome::Ignored);
        };

        self.touch(now_ms);
        let mut list = self.lock_list(role)?;
        if list.iter().any(|held| same_issuance(held, &token))
            || self.lock_retired()?.contains_key(&issuance(&token))
        {
            return Ok(InsertOutcome::Duplicate);
        }
        let pruned = self.prune_invalid(&mut list, token.issuer(), now_ms)?;
        let replaced = match pattern {
            Pattern::Single => {
                let replaced = list.len();
                list.clear();
                replaced
            }
            // ANY has no bounded meaning yet and is kept like GROUP.
            Pattern::Group | Pattern::Any => 0,
        };
        list.push(token);
        debug!(
            subject = %self.subject,
            ?role,
            ?pattern,
            pruned,
            replaced,
            holders = list.len(),
            "stored capability token"
        );
        Ok(InsertOutcome::Stored { pruned, replaced })
    }

    /// First valid receiver capability, consumed by one unit.
    ///
    /// Invalid entries met during the scan are dropped. The subject's
    /// `recv_property` counter is advanced alongside the token; it counts
    /// units consumed from the receiver capabilities still held and is
    /// re-derived by [`Self::prune_all`].
    pub fn find_receiver_capability(
        &self,
        now_ms: u64,
    ) -> Result<Option<Arc<LedgerToken>>, NodeError> {
        let mut list = self.lock_list(Role::Receiver)?;
        self.drop_where(&mut list, now_ms, |t| t.is_valid(now_ms))?;
        let Some(found) = list.first().cloned() else {
            return Ok(None);
        };
        found.consume();
        self.recv_property.reserve(now_ms)?;
        self.touch(now_ms);
        Ok(Some(found))
    }

    /// First valid sender capability issued by `issuer`, consumed by one unit.
    ///
    /// Only the token's own counter moves; `send_property` belongs to this
    /// node's outgoing messages.
    pub fn find_sender_capability(
        &self,
        issuer: &str,
        now_ms: u64,
    ) -> Result<Option<Arc<LedgerToken>>, NodeError> {
        let mut list = self.lock_list(Role::Sender)?;
        self.drop_where(&mut list, now_ms, |t| t.is_valid(now_ms))?;
        let Some(found) = list.iter().find(|t| t.issuer() == issuer).cloned() else {
            return Ok(None);
        };
        found.consume();
        self.touch(now_ms);
        Ok(Some(found))
    }

    /// All receiver capabilities currently valid; invalid ones are dropped.
    pub fn valid_receivers(&self, now_ms: u64) -> Result<Vec<Arc<LedgerToken>>, NodeError> {
        let mut list = self.lock_list(Role::Receiver)?;
        self.drop_where(&mut list, now_ms, |t| t.is_valid(now_ms))?;
        Ok(list.clone())
    }

    /// All sender capabilities currently valid.
    pub fn valid_senders(&self, now_ms: u64) -> Result<Vec<Arc<LedgerToken>>, NodeError> {
        let list = self.lock_list(Role::Sender)?;
        Ok(list.iter().filter(|t| t.is_valid(now_ms)).cloned().collect())
    }

    pub fn valid(&self, role: Role, now_ms: u64) -> Result<Vec<Arc<LedgerToken>>, NodeError> {
        match role {
            Role::Sender => self.valid_senders(now_ms),
            Role::Receiver => self.valid_receivers(now_ms),
        }
    }

    /// Full sweep of both lists; returns how many tokens were released.
    ///
    /// Also forgets retired issuances past their expiration and resets the
    /// `recv_property` counter to what the held receivers have consumed.
    pub fn prune_all(&self, now_ms: u64) -> Result<usize, NodeError> {
        let mut released = 0;
        for role in [Role::Sender, Role::Receiver] {
            let mut list = self.lock_list(role)?;
            released += self.drop_where(&mut list, now_ms, |t| t.is_valid(now_ms))?;
            if role == Role::Receiver {
                let consumed = list
                    .iter()
                    .fold(0_u16, |sum, t| sum.saturating_add(t.msg_threshold()));
                self.recv_property.set_msg_threshold(consumed, now_ms)?;
            }
        }
        self.lock_retired()?.retain(|_, expiration| *expiration > now_ms);
        Ok(released)
    }

    pub fn token_count(&self, role: Role) -> Result<usize, NodeError> {
        Ok(self.lock_list(role)?.len())
    }

    /// No tokens, nothing cached and untouched for `idle_ms`.
    pub fn is_idle(&self, now_ms: u64, idle_ms: u64) -> Result<bool, NodeError> {
        if self.last_touch_ms().saturating_add(idle_ms) > now_ms {
            return Ok(false);
        }
        Ok(self.token_count(Role::Sender)? == 0
            && self.token_count(Role::Receiver)? == 0
            && self.send_property.cached_len()? == 0
            && self.recv_property.cached_len()? == 0
            && self.lock_retired()?.is_empty())
    }
}

fn same_issuance(a: &LedgerToken, b: &LedgerToken) -> bool {
    let (a, b) = (a.token(), b.token());
    a.issuer == b.issuer && a.uuid == b.uuid && a.issued_at == b.issued_at
}

fn issuance(token: &LedgerToken) -> IssuanceKey {
    let token = token.token();
    (token.issuer.clone(), token.uuid, token.issued_at)
}


/// All subject ledgers of one node, keyed by rendezvous point.
#[derive(Debug)]
pub struct LedgerTable {
    ledgers: Mutex<HashMap<KeyPoint, Arc<SubjectLedger>>>,
    lock_timeout: Duration,
    default_property: MessageProperty,
}

impl LedgerTable {
    pub fn new(default_property: MessageProperty, lock_timeout: Duration) -> Self {
        Self {
            ledgers: Mutex::new(HashMap::new()),
            lock_timeout,
            default_property,
        }
    }

    /// Returns the subject's ledger, creating it atomically on first use.
    pub fn get_or_create(
        &self,
        subject: &str,
        now_ms: u64,
    ) -> Result<Arc<SubjectLedger>, NodeError> {
        let point = KeyPoint::from_string(subject);
        let mut ledgers = lock_within(&self.ledgers, self.lock_timeout, "ledger_table")?;
        let ledger = ledgers.entry(point).or_insert_with(|| {
            debug!(subject, %point, "creating subject ledger");
            let property = MessageProperty {
                subject: subject.to_string(),
                ..self.default_property.clone()
            };
            Arc::new(SubjectLedger::new(subject, property, self.lock_timeout, now_ms))
        });
        Ok(Arc::clone(ledger))
    }

    pub fn get(&self, subject: &str) -> Result<Option<Arc<SubjectLedger>>, NodeError> {
        let point = KeyPoint::from_string(subject);
        let ledgers = lock_within(&self.ledgers, self.lock_timeout, "ledger_table")?;
        Ok(ledgers.get(&point).cloned())
    }

    /// Handles to every ledger, taken so callers never hold the table lock.
    pub fn snapshot(&self) -> Result<Vec<Arc<SubjectLedger>>, NodeError> {
        let ledgers = lock_within(&self.ledgers, self.lock_timeout, "ledger_table")?;
        Ok(ledgers.values().cloned().collect())
    }

    /// Removes idle ledgers whose subject `keep` does not claim; returns
    /// the removed subjects.
    pub fn sweep_idle(
        &self,
        now_ms: u64,
        idle_ms: u64,
        keep: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<String>, NodeError> {
        let mut idle = Vec::new();
        for ledger in self.snapshot()? {
            if !keep(ledger.subject()) && ledger.is_idle(now_ms, idle_ms)? {
                idle.push(ledger.point());
            }
        }
        let mut removed = Vec::new();
        let mut ledgers = lock_within(&self.ledgers, self.lock_timeout, "ledger_table")?;
        for point in idle {
            // a concurrent caller may have picked the ledger up again
            let still_idle = ledgers
                .get(&point)
                .map(|l| Arc::strong_count(l) == 1 && l.last_touch_ms().saturating_add(idle_ms) <= now_ms)
                .unwrap_or(false);
            if still_idle {
                if let Some(ledger) = ledgers.remove(&point) {
                    debug!(subject = ledger.subject(), "dropping idle subject ledger");
                    removed.push(ledger.subject().to_string());
                }
            }
        }
        Ok(removed)
    }

    pub fn len(&self) -> Result<usize, NodeError> {
        Ok(lock_within(&self.ledgers, self.lock_timeout, "ledger_table")?.len())
    }

    pub fn is_empty(&self) -> Result<bool, NodeError> {
        Ok(self.len()? == 0)
    }
}
