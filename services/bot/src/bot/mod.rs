pub mod admin;
pub mod controller;
pub mod dispatcher;
pub mod generation;
pub mod ledger;
pub mod polling;
pub mod protocol;
pub mod referral;
pub mod state;
pub mod texts;
pub mod webhook;

// Re-export what the binary needs to wire the bot together.
pub use dispatcher::Dispatcher;
pub use state::AppState;
