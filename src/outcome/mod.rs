//! 结果层：运行记录、记录器、摘要渲染与文件持久化

pub mod record;
pub mod recorder;
pub mod store;
pub mod summary;

pub use record::{new_run_id, InvocationRecord, ProcessingOutcome, TerminalState, Termination};
pub use recorder::{OutcomeRecorder, RunSubject};
pub use store::{FileOutcomeStore, PersistedOutcome};
pub use summary::render_summary;
