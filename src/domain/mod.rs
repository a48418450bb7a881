pub mod chat;
pub mod message;
pub mod session;
pub mod user;

pub use chat::Chat;
pub use message::Message;
pub use user::User;
