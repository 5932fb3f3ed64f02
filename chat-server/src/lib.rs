//! Chat server: phone/OTP auth, chatrooms, and asynchronous message dispatch
//! to a generative-text provider.
//!
//! A submitted message is stored as `pending`, handed to the
//! [`launcher::TaskLauncher`], and driven to `completed` or `failed` by the
//! [`dispatcher::Dispatcher`] off the request path. Clients poll the message
//! to see the outcome.

pub mod api;
pub mod auth;
pub mod cache;
pub mod chatroom;
pub mod completion;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod launcher;
pub mod messages;
pub mod middleware;
pub mod state;

#[cfg(test)]
mod test_support;

pub use state::AppState;
