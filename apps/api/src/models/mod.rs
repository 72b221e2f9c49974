pub mod conversation;
pub mod recommendation;
pub mod user;
