use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Created,
    Deleted,
}

/// Published after the backend's character list changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharactersChanged {
    pub action: ChangeAction,
}

/// A user-facing message that is not an error, e.g. the selection cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
}

/// Typed publish/subscribe topics shared between the studio, the catalog and
/// the pipeline. Cloning shares the same channels.
#[derive(Debug, Clone)]
pub struct EventBus {
    characters: broadcast::Sender<CharactersChanged>,
    notices: broadcast::Sender<Notice>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (characters, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (notices, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            characters,
            notices,
        }
    }

    pub fn subscribe_characters(&self) -> broadcast::Receiver<CharactersChanged> {
        self.characters.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn characters_changed(&self, action: ChangeAction) {
        log::debug!("characters changed: {:?}", action);
        // No subscribers is fine.
        let _ = self.characters.send(CharactersChanged { action });
    }

    pub fn notify(&self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{}", message);
        let _ = self.notices.send(Notice { message });
    }
}
