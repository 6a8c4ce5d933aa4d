pub mod attachment;
pub mod chat;
pub mod event;
pub mod state;
