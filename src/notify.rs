use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Channel key: one property's rules, or the organization-wide batch rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Property(String),
    Batch,
}

impl Scope {
    pub fn of(property_id: Option<&str>) -> Self {
        match property_id {
            Some(p) => Scope::Property(p.to_string()),
            None => Scope::Batch,
        }
    }
}

/// Broadcast hub for rule changes, per scope plus one firehose for all of them.
pub struct NotifyHub {
    channels: DashMap<Scope, broadcast::Sender<Event>>,
    all: broadcast::Sender<Event>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Changes to one scope. Creates the channel if needed.
    pub fn subscribe(&self, scope: Scope) -> broadcast::Receiver<Event> {
        self.channels
            .entry(scope)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Every change in the organization.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// No-op when nobody is listening.
    pub fn send(&self, scope: &Scope, event: &Event) {
        if let Some(sender) = self.channels.get(scope) {
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn scoped_subscriber_sees_only_its_scope() {
        let hub = NotifyHub::new();
        let mut p1 = hub.subscribe(Scope::Property("p1".into()));
        let mut batch = hub.subscribe(Scope::Batch);

        let event = Event::RuleDeleted { id: Ulid::new() };
        hub.send(&Scope::Property("p1".into()), &event);

        assert_eq!(p1.recv().await.unwrap(), event);
        assert!(batch.try_recv().is_err());
    }

    #[tokio::test]
    async fn firehose_sees_everything() {
        let hub = NotifyHub::new();
        let mut all = hub.subscribe_all();
        let a = Event::RuleDeleted { id: Ulid::new() };
        let b = Event::RuleDeleted { id: Ulid::new() };
        hub.send(&Scope::Batch, &a);
        hub.send(&Scope::of(Some("p9")), &b);
        assert_eq!(all.recv().await.unwrap(), a);
        assert_eq!(all.recv().await.unwrap(), b);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(&Scope::Batch, &Event::RuleDeleted { id: Ulid::new() });
        let mut late = hub.subscribe(Scope::Batch);
        assert!(late.try_recv().is_err());
    }
}
