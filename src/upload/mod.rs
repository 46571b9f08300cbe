pub mod batch;
pub mod chunking;
pub mod uploader;

pub use batch::{FileState, UploadBatch};
pub use uploader::{ChunkedUploader, UploadError, UploadFile};
