//! Commentary rules: event classification and rewrite prompts.

pub mod classify;
pub mod prompt;

pub use classify::{classify, order_changed};
pub use prompt::{SYSTEM_PROMPT, interpret, user_message};
