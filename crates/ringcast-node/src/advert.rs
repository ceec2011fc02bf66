use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ringcast_core::Role;
use uuid::Uuid;

use crate::error::NodeError;
use crate::property::MessageProperty;
use crate::sync::lock_within;

/// A decrypted message handed to a subject's handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: Uuid,
    pub subject: String,
    /// Node id of the publisher.
    pub from: String,
    pub payload: Vec<u8>,
}

/// Receives every inbound message of the subject it was registered for.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, message: &InboundMessage);
}

impl<F> MessageHandler for F
where
    F: Fn(&InboundMessage) + Send + Sync,
{
    fn on_message(&self, message: &InboundMessage) {
        self(message)
    }
}

struct Interest {
    property: MessageProperty,
    handler: Option<Arc<dyn MessageHandler>>,
    next_due_ms: u64,
    advertising: bool,
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interest")
            .field("property", &self.property)
            .field("has_handler", &self.handler.is_some())
            .field("next_due_ms", &self.next_due_ms)
            .field("advertising", &self.advertising)
            .finish()
    }
}

/// One advertisement round claimed by a caller.
#[derive(Debug, Clone)]
pub struct DueAdvertisement {
    pub subject: String,
    pub role: Role,
    pub property: MessageProperty,
}

/// Locally registered interests and their re-advertisement schedule.
#[derive(Debug)]
pub struct InterestRegistry {
    interests: Mutex<HashMap<(String, Role), Interest>>,
    refresh_ms: u64,
    lock_timeout: Duration,
}

impl InterestRegistry {
    pub fn new(refresh_ms: u64, lock_timeout: Duration) -> Self {
        Self {
            interests: Mutex::new(HashMap::new()),
            refresh_ms,
            lock_timeout,
        }
    }

    fn lock(
        &self,
    ) -> Result<parking_lot::MutexGuard<'_, HashMap<(String, Role), Interest>>, NodeError> {
        lock_within(&self.interests, self.lock_timeout, "interests")
    }

    /// Registers or updates an interest; it becomes due immediately.
    ///
    /// Returns `true` when the interest was not registered before.
    pub fn register(
        &self,
        subject: &str,
        role: Role,
        property: MessageProperty,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> Result<bool, NodeError> {
        let mut interests = self.lock()?;
        let key = (subject.to_string(), role);
        match interests.get_mut(&key) {
            Some(existing) => {
                existing.property = property;
                if handler.is_some() {
                    existing.handler = handler;
                }
                existing.next_due_ms = 0;
                Ok(false)
            }
            None => {
                interests.insert(
                    key,
                    Interest {
                        property,
                        handler,
                        next_due_ms: 0,
                        advertising: false,
                    },
                );
                Ok(true)
            }
        }
    }

    /// Stops re-advertising; tokens already out simply expire.
    pub fn withdraw(&self, subject: &str, role: Role) -> Result<bool, NodeError> {
        Ok(self.lock()?.remove(&(subject.to_string(), role)).is_some())
    }

    pub fn is_registered(&self, subject: &str, role: Role) -> Result<bool, NodeError> {
        Ok(self.lock()?.contains_key(&(subject.to_string(), role)))
    }

    pub fn handler(&self, subject: &str) -> Result<Option<Arc<dyn MessageHandler>>, NodeError> {
        Ok(self
            .lock()?
            .get(&(subject.to_string(), Role::Receiver))
            .and_then(|interest| interest.handler.clone()))
    }

    /// Claims every due interest not already being advertised.
    ///
    /// Each claimed entry must be handed back through [`Self::finish`].
    pub fn claim_due(&self, now_ms: u64) -> Result<Vec<DueAdvertisement>, NodeError> {
        let mut interests = self.lock()?;
        let mut due = Vec::new();
        for ((subject, role), interest) in interests.iter_mut() {
            if interest.advertising || interest.next_due_ms > now_ms {
                continue;
            }
            interest.advertising = true;
            due.push(DueAdvertisement {
                subject: subject.clone(),
                role: *role,
                property: interest.property.clone(),
            });
        }
        Ok(due)
    }

    /// Claims one interest regardless of its schedule, unless a round for it
    /// is already running.
    pub fn claim(&self, subject: &str, role: Role) -> Result<Option<DueAdvertisement>, NodeError> {
        let mut interests = self.lock()?;
        let Some(interest) = interests.get_mut(&(subject.to_string(), role)) else {
            return Ok(None);
        };
        if interest.advertising {
            return Ok(None);
        }
        interest.advertising = true;
        Ok(Some(DueAdvertisement {
            subject: subject.to_string(),
            role,
            property: interest.property.clone(),
        }))
    }

    /// Releases a claim; a successful round schedules the next refresh.
    pub fn finish(
        &self,
        subject: &str,
        role: Role,
        now_ms: u64,
        succeeded: bool,
    ) -> Result<(), NodeError> {
        let mut interests = self.lock()?;
        if let Some(interest) = interests.get_mut(&(subject.to_string(), role)) {
            interest.advertising = false;
            if succeeded {
                interest.next_due_ms = now_ms.saturating_add(self.refresh_ms);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> Result<usize, NodeError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, NodeError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use ringcast_core::Role;
    use uuid::Uuid;

    use super::{InboundMessage, InterestRegistry, MessageHandler};
    use crate::property::MessageProperty;

    fn registry() -> InterestRegistry {
        InterestRegistry::new(3_141, Duration::from_millis(50))
    }

    #[test]
    fn due_interest_is_claimed_once_until_finished() {
        let reg = registry();
        reg.register("weather", Role::Receiver, MessageProperty::for_subject("weather"), None)
            .expect("register");

        assert_eq!(reg.claim_due(0).expect("claim").len(), 1);
        // a concurrent tick sees the marker
        assert!(reg.claim_due(0).expect("claim").is_empty());

        reg.finish("weather", Role::Receiver, 0, true).expect("finish");
        assert!(reg.claim_due(3_140).expect("claim").is_empty());
        assert_eq!(reg.claim_due(3_141).expect("claim").len(), 1);
    }

    #[test]
    fn explicit_claim_respects_running_round() {
        let reg = registry();
        reg.register("weather", Role::Sender, MessageProperty::default(), None)
            .expect("register");
        let claimed = reg.claim("weather", Role::Sender).expect("claim");
        assert_eq!(claimed.map(|ad| ad.subject), Some("weather".to_string()));
        assert!(reg.claim("weather", Role::Sender).expect("claim").is_none());
        assert!(reg.claim("other", Role::Sender).expect("claim").is_none());
    }

    #[test]
    fn failed_round_stays_due() {
        let reg = registry();
        reg.register("weather", Role::Sender, MessageProperty::default(), None)
            .expect("register");
        assert_eq!(reg.claim_due(10).expect("claim").len(), 1);
        reg.finish("weather", Role::Sender, 10, false).expect("finish");
        assert_eq!(reg.claim_due(11).expect("claim").len(), 1);
    }

    #[test]
    fn withdrawn_interest_is_no_longer_due() {
        let reg = registry();
        reg.register("weather", Role::Sender, MessageProperty::default(), None)
            .expect("register");
        assert!(reg.withdraw("weather", Role::Sender).expect("withdraw"));
        assert!(!reg.withdraw("weather", Role::Sender).expect("withdraw"));
        assert!(reg.claim_due(0).expect("claim").is_empty());
    }

    #[test]
    fn closures_act_as_handlers() {
        let reg = registry();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let handler: Arc<dyn MessageHandler> = Arc::new(move |_: &InboundMessage| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(reg
            .register("weather", Role::Receiver, MessageProperty::default(), Some(handler))
            .expect("register"));
        // re-registering without a handler keeps the existing one
        assert!(!reg
            .register("weather", Role::Receiver, MessageProperty::default(), None)
            .expect("register"));

        let handler = reg.handler("weather").expect("lookup").expect("handler");
        handler.on_message(&InboundMessage {
            id: Uuid::nil(),
            subject: "weather".to_string(),
            from: "node-a".to_string(),
            payload: Vec::new(),
        });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(reg.handler("other").expect("lookup").is_none());
    }
}
