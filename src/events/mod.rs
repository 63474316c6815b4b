use tokio::sync::broadcast;

/// Cross-component notifications. The web original broadcast these as
/// window-level DOM events; here they are a typed in-process channel so
/// collaborators subscribe explicitly.
#[derive(Debug, Clone)]
pub enum AppEvent {
    CreditsUpdated { user_id: String, remaining: u32 },
    ConversationUpdated,
    ResetChat,
    LoadConversation { conversation_id: String },
}

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Emit to whoever is listening. A bus with no subscribers is fine.
    pub fn emit(&self, event: AppEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
