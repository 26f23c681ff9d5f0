pub mod block;
pub mod builder;
pub mod error;
pub mod file;
pub mod header;
pub mod path;
pub mod pax;
mod sys;
pub mod walk;

pub use block::{padded_size, Buffer, BLOCK_SIZE};
pub use builder::{Builder, EntryStatus, Matcher, Options, UserLookup};
pub use error::{Error, Result, Severity};
pub use header::{Header, TypeFlag};
pub use walk::{walk, Visit, Visitor, WalkFlags};
