//! Session event notifications.

/// Events broadcast to session observers.
///
/// Events carry no payload beyond the identity of the core they concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreEvent {
    /// A reset of the core is about to be performed.
    PreReset {
        /// The core being reset.
        core: usize,
    },
    /// A reset of the core has completed.
    PostReset {
        /// The core that was reset.
        core: usize,
    },
}

/// An observer of session events.
pub trait EventObserver: Send + Sync {
    /// Called for every broadcast event.
    fn notify(&self, event: CoreEvent);
}

/// Broadcasts session events to all registered observers.
#[derive(Default)]
pub struct Notifier {
    observers: Vec<Box<dyn EventObserver>>,
}

impl Notifier {
    /// Creates a notifier without observers.
    pub fn new() -> Self {
        Notifier::default()
    }

    /// Registers an observer for all future events.
    pub fn subscribe(&mut self, observer: Box<dyn EventObserver>) {
        self.observers.push(observer);
    }

    /// Broadcasts an event to every observer, in subscription order.
    pub fn notify(&self, event: CoreEvent) {
        for observer in &self.observers {
            observer.notify(event);
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<CoreEvent>>>);

    impl EventObserver for Recorder {
        fn notify(&self, event: CoreEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn events_reach_all_observers_in_order() {
        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));

        let mut notifier = Notifier::new();
        notifier.subscribe(Box::new(Recorder(seen_a.clone())));
        notifier.subscribe(Box::new(Recorder(seen_b.clone())));

        notifier.notify(CoreEvent::PreReset { core: 0 });
        notifier.notify(CoreEvent::PostReset { core: 0 });

        let expected = vec![
            CoreEvent::PreReset { core: 0 },
            CoreEvent::PostReset { core: 0 },
        ];
        assert_eq!(*seen_a.lock().unwrap(), expected);
        assert_eq!(*seen_b.lock().unwrap(), expected);
    }
}
