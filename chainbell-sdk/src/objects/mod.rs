pub mod subscription;
pub mod sui;
pub mod telegram;

pub use subscription::{
    CreateSubscriptionRequest, EventKind, SubscriptionDisplayBody, SubscriptionFilterBody,
    SubscriptionResponse,
};
pub use sui::{CheckpointSummary, NodeNotification, SuiEvent, SuiEventId};
pub use telegram::{
    InlineKeyboardButton, InlineKeyboardMarkup, ParseMode, SendMessage, SendPhoto,
    TelegramResponse,
};
