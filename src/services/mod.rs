pub mod auth;
pub mod encryption;
pub mod generation;
pub mod images;
pub mod notifier;
pub mod pipeline;
pub mod prompts;
pub mod queue;
pub mod storage;
