use crate::error::FetchError;
use crate::fetcher::{ConversationPage, NotificationPage, PageRequest};
use crate::pagination::PageTicket;
use crate::realtime::SessionEvent;
use crate::state::{AppState, Conversation};
use crate::AppAction;

#[derive(uniffi::Enum, Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

/// Results flowing back into the actor. `epoch` identifies the activation that
/// spawned the work; anything from an older activation is dropped.
#[derive(Debug)]
pub enum InternalEvent {
    Session(SessionEvent),

    PageFetched {
        epoch: u64,
        // `None` for refreshes that do not move the cursor.
        ticket: Option<PageTicket>,
        request: PageRequest,
        result: Result<ConversationPage, FetchError>,
    },
    ConversationFetched {
        epoch: u64,
        conversation_id: u64,
        result: Result<Conversation, FetchError>,
    },
    NotificationsFetched {
        epoch: u64,
        result: Result<NotificationPage, FetchError>,
    },
}
