//! Subject/observer primitives.
//!
//! Subjects do not store callbacks. They store typed observer tokens
//! (`ClientId`) and return a snapshot of the tokens to notify; the owning
//! instance routes the payload to the matching component. This keeps the
//! notification graph acyclic under ownership rules while preserving the
//! three observer flavors: single-shot, masked-multi and broadcast.

use alloc::vec::Vec;

/// Identifies the component (or the application) behind a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientId {
    Starter,
    Discovery,
    DiagFdx,
    DiagHdx,
    Fallback,
    Prog,
    Atd,
    Supv,
    App,
}

/// Event mask type shared by masked subjects and scheduler services.
pub type EventMask = u32;

/// A subject with at most one observer which is removed on notification.
///
/// Used for command/response pairs: the requester subscribes before the
/// request goes out and is notified exactly once, by response or timeout.
#[derive(Debug, Default)]
pub struct SingleSubject {
    observer: Option<ClientId>,
}

impl SingleSubject {
    pub const fn new() -> Self {
        Self { observer: None }
    }

    /// Registers the observer. Fails if another observer is still pending.
    pub fn subscribe(&mut self, client: ClientId) -> Result<(), ClientId> {
        match self.observer {
            Some(existing) if existing != client => Err(existing),
            _ => {
                self.observer = Some(client);
                Ok(())
            }
        }
    }

    /// Removes the observer without notifying it.
    pub fn unsubscribe(&mut self) {
        self.observer = None;
    }

    /// Takes the registered observer; the subject is empty afterwards.
    pub fn notify(&mut self) -> Option<ClientId> {
        self.observer.take()
    }

    pub fn is_pending(&self) -> bool {
        self.observer.is_some()
    }
}

/// A subject whose observers carry a bitmask of event kinds.
///
/// `notify` returns only the observers whose mask intersects the fired
/// events. Observers may unsubscribe from within their own callback; the
/// returned snapshot tolerates concurrent removal.
#[derive(Debug, Default)]
pub struct MaskedSubject {
    observers: Vec<(ClientId, EventMask)>,
}

impl MaskedSubject {
    pub const fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    /// Adds an observer or updates the mask of an existing one.
    pub fn subscribe(&mut self, client: ClientId, mask: EventMask) {
        if let Some(entry) = self.observers.iter_mut().find(|(c, _)| *c == client) {
            entry.1 = mask;
        } else {
            self.observers.push((client, mask));
        }
    }

    pub fn unsubscribe(&mut self, client: ClientId) {
        self.observers.retain(|(c, _)| *c != client);
    }

    /// Returns the snapshot of observers interested in `events`.
    pub fn notify(&self, events: EventMask) -> Vec<ClientId> {
        self.observers
            .iter()
            .filter(|(_, mask)| (mask & events) != 0)
            .map(|(c, _)| *c)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

/// A subject that notifies every registered observer.
#[derive(Debug, Default)]
pub struct BroadcastSubject {
    observers: Vec<ClientId>,
}

impl BroadcastSubject {
    pub const fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, client: ClientId) {
        if !self.observers.contains(&client) {
            self.observers.push(client);
        }
    }

    pub fn unsubscribe(&mut self, client: ClientId) {
        self.observers.retain(|c| *c != client);
    }

    pub fn notify(&self) -> Vec<ClientId> {
        self.observers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_subject_auto_unsubscribes() {
        let mut subject = SingleSubject::new();
        assert!(subject.subscribe(ClientId::Discovery).is_ok());
        assert!(subject.is_pending());
        assert_eq!(subject.notify(), Some(ClientId::Discovery));
        assert!(!subject.is_pending());
        assert_eq!(subject.notify(), None);
    }

    #[test]
    fn test_single_subject_rejects_second_observer() {
        let mut subject = SingleSubject::new();
        assert!(subject.subscribe(ClientId::Prog).is_ok());
        // Re-subscribing the same client is a no-op, another client fails.
        assert!(subject.subscribe(ClientId::Prog).is_ok());
        assert_eq!(subject.subscribe(ClientId::Atd), Err(ClientId::Prog));
    }

    #[test]
    fn test_masked_subject_filters_by_mask() {
        let mut subject = MaskedSubject::new();
        subject.subscribe(ClientId::Starter, 0x0F);
        subject.subscribe(ClientId::Supv, 0x10);
        assert_eq!(subject.notify(0x01), alloc::vec![ClientId::Starter]);
        assert_eq!(subject.notify(0x10), alloc::vec![ClientId::Supv]);
        assert_eq!(subject.notify(0x20), alloc::vec![]);
        assert_eq!(subject.notify(0x11).len(), 2);
    }

    #[test]
    fn test_masked_subject_unsubscribe_during_iteration() {
        let mut subject = MaskedSubject::new();
        subject.subscribe(ClientId::Starter, 0x01);
        subject.subscribe(ClientId::Fallback, 0x01);
        // The snapshot stays valid even when an observer removes itself
        // while the caller walks the returned list.
        let snapshot = subject.notify(0x01);
        subject.unsubscribe(ClientId::Starter);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(subject.notify(0x01), alloc::vec![ClientId::Fallback]);
    }

    #[test]
    fn test_broadcast_subject_deduplicates() {
        let mut subject = BroadcastSubject::new();
        subject.subscribe(ClientId::App);
        subject.subscribe(ClientId::App);
        assert_eq!(subject.notify().len(), 1);
        subject.unsubscribe(ClientId::App);
        assert!(subject.notify().is_empty());
    }
}
