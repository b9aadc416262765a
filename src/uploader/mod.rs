// Upload pipeline - drives a session's files through the photo library upload
//
// One run per /done: authenticate once, then upload and commit each file in order

pub mod pipeline;
pub mod progress_tracker;

pub use pipeline::{FailedUpload, PipelineResult, UploadPipeline, UploadReport};
pub use progress_tracker::ProgressReporter;
