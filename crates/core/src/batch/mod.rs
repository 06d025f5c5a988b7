//! Batch processing of many references under one topic.

mod index;
mod note;
mod runner;

pub use index::{entry_folder, topic_dir, write_index, INDEX_JSON, INDEX_MD};
pub use note::{parse_note, slugify, Note, NoteEntry, NoteError};
pub use runner::{
    BatchCoordinator, BatchEntry, BatchError, BatchItem, BatchOptions, BatchRequest, BatchResult,
};
