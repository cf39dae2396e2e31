//! On-screen message service. Recoverable errors surface here instead of
//! aborting the run loop.

/// Message taxonomy. `Init` is reserved for startup failures the caller
/// treats as fatal after display; everything else is transient.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Init,
    Preset,
    Misc,
    Notify,
    ScanningPresets,
}

impl MessageKind {
    /// How long a message of this kind stays on screen, in seconds.
    /// `ScanningPresets` persists until cleared by the scan finishing.
    fn duration(self) -> f64 {
        match self {
            MessageKind::Init => 10.0,
            MessageKind::Preset => 6.0,
            MessageKind::Misc => 5.0,
            MessageKind::Notify => 2.5,
            MessageKind::ScanningPresets => f64::INFINITY,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Message {
    pub kind: MessageKind,
    pub text: String,
    pub born: f64,
    pub expires: f64,
}

/// Timed message queue. Each entry carries independent birth and expiry
/// stamps; `Notify` and `ScanningPresets` are single-slot kinds where a new
/// post replaces the previous one.
#[derive(Debug, Default)]
pub struct MessageQueue {
    messages: Vec<Message>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&mut self, kind: MessageKind, text: impl Into<String>, now: f64) {
        let text = text.into();
        match kind {
            MessageKind::Notify | MessageKind::ScanningPresets => {
                self.messages.retain(|m| m.kind != kind);
            }
            MessageKind::Init | MessageKind::Preset => {
                tracing::warn!(?kind, %text, "display message");
            }
            MessageKind::Misc => {}
        }
        self.messages.push(Message {
            kind,
            text,
            born: now,
            expires: now + kind.duration(),
        });
    }

    pub fn clear_kind(&mut self, kind: MessageKind) {
        self.messages.retain(|m| m.kind != kind);
    }

    /// Drops everything whose expiry stamp has passed.
    pub fn expire(&mut self, now: f64) {
        self.messages.retain(|m| m.expires > now);
    }

    pub fn active(&self) -> &[Message] {
        &self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_expire_on_schedule() {
        let mut q = MessageQueue::new();
        q.post(MessageKind::Misc, "short lived", 0.0);
        q.expire(1.0);
        assert_eq!(q.active().len(), 1);
        q.expire(100.0);
        assert!(q.active().is_empty());
    }

    #[test]
    fn notify_replaces_prior_notify() {
        let mut q = MessageQueue::new();
        q.post(MessageKind::Notify, "first", 0.0);
        q.post(MessageKind::Preset, "error", 0.0);
        q.post(MessageKind::Notify, "second", 1.0);
        let notifies: Vec<_> = q
            .active()
            .iter()
            .filter(|m| m.kind == MessageKind::Notify)
            .collect();
        assert_eq!(notifies.len(), 1);
        assert_eq!(notifies[0].text, "second");
        // Other kinds are untouched by the replacement.
        assert_eq!(q.active().len(), 2);
    }

    #[test]
    fn scanning_persists_until_cleared() {
        let mut q = MessageQueue::new();
        q.post(MessageKind::ScanningPresets, "scanning...", 0.0);
        q.expire(1e9);
        assert_eq!(q.active().len(), 1);
        q.clear_kind(MessageKind::ScanningPresets);
        assert!(q.active().is_empty());
    }

    #[test]
    fn birth_and_expiry_are_independent() {
        let mut q = MessageQueue::new();
        q.post(MessageKind::Preset, "a", 3.0);
        let m = &q.active()[0];
        assert_eq!(m.born, 3.0);
        assert!(m.expires > m.born);
    }
}
