pub mod error;
pub mod extract;
pub mod filter;
pub mod format;
pub mod io;
pub mod multi_writer;
pub mod source;
pub mod stats;
pub mod table;

pub use error::JoinError;
pub use extract::Extractor;
pub use format::{JoinOptions, LayoutMode};
pub use stats::{JoinStats, QuitFlag};
