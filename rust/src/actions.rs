use crate::state::{ConversationStatus, Credential, Scope};

#[derive(uniffi::Enum, Debug, Clone)]
pub enum AppAction {
    // Session
    Activate { credential: Credential },
    Deactivate,

    // List
    SelectScope { scope: Scope },
    SetStatusFilter { status: ConversationStatus },
    SetInboxFilter { inbox_id: Option<u64> },
    ScrollBegan,
    ReachedEnd,
    Refresh,

    // Notifications
    MarkNotificationRead { notification_id: u64 },

    // UI
    ClearToast,

    // Lifecycle
    Foregrounded,
}

impl AppAction {
    /// Log-safe action tag (never includes credentials).
    pub fn tag(&self) -> &'static str {
        match self {
            // Session
            AppAction::Activate { .. } => "Activate",
            AppAction::Deactivate => "Deactivate",

            // List
            AppAction::SelectScope { .. } => "SelectScope",
            AppAction::SetStatusFilter { .. } => "SetStatusFilter",
            AppAction::SetInboxFilter { .. } => "SetInboxFilter",
            AppAction::ScrollBegan => "ScrollBegan",
            AppAction::ReachedEnd => "ReachedEnd",
            AppAction::Refresh => "Refresh",

            // Notifications
            AppAction::MarkNotificationRead { .. } => "MarkNotificationRead",

            // UI
            AppAction::ClearToast => "ClearToast",

            // Lifecycle
            AppAction::Foregrounded => "Foregrounded",
        }
    }
}
