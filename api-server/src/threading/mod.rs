//! Thread reconstruction: subject normalization, participant extraction, thread
//! assembly for incoming messages and conversation ordering for display.

pub mod assembler;
pub mod config;
pub mod ordering;
pub mod participants;
pub mod subject;

pub use assembler::{Assignment, ThreadAssembler, ThreadMatch};
pub use config::ThreadingConfig;
pub use ordering::{ThreadedMessage, order_thread};
pub use participants::{ExtractError, ParticipantSet, collect_participants, thread_participants};
pub use subject::normalize_subject;
