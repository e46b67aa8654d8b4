pub mod client;
pub mod empathy_prompt;
pub mod speaker_prompt;

pub use client::*;
pub use empathy_prompt::*;
pub use speaker_prompt::*;
