//! Session persistence: an in-memory SessionStore, the sequence allocator,
//! the buffered step repository, and Step-log surgery (fork / truncate).

mod fork;
mod repository;
mod sequence;
mod store;

pub use fork::{fork_session, truncate_from};
pub use repository::StepRepository;
pub use sequence::SequenceManager;
pub use store::InMemorySessionStore;
