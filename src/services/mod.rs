pub mod ai;
pub mod backend;
pub mod comic;
pub mod editor;
pub mod gemini;
pub mod narration;
pub mod publish;
pub mod retry;
pub mod script;
pub mod setup;
