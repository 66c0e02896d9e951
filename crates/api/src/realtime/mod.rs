mod hub;
mod protocol;
mod session;
mod validation;

pub use hub::{RealtimeHub, chat_group, user_group};
pub use protocol::{ClientFrame, ServerEvent};
pub use session::{ChannelSession, HandshakeCredentials, auth_frame_token};
