pub mod broadcast;
pub mod listener;
pub mod protocol;

pub use broadcast::{Broadcaster, ChannelId, EventChannel};
pub use listener::{spawn_listener, Subscription};
pub use protocol::{ContentEvent, EventAction, ServerEvent, SseParser};
