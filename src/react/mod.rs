//! 编排层：初始提示词、主循环与过程事件

pub mod events;
pub mod loop_;
pub mod prompt;

pub use events::RunEvent;
pub use loop_::{run_document_loop, LoopReport, RunSession, DEFAULT_MAX_ITERATIONS};
pub use prompt::{build_initial_prompt, is_rejection, InitialPrompt, REJECTION_MARKER, TRUNCATION_MARKER};
