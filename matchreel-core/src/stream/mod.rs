pub mod error;
pub mod models;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use models::{
    CompletionRecord, NewStream, StatusTransition, StreamFilter, StreamStatus, SubmissionRecord,
    VideoStream,
};
pub use store::{SqliteStreamStore, SqliteStreamStoreBuilder, StreamRepository};
