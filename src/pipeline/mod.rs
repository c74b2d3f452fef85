//! Pipeline stages: validation, batch processing, synthetic generation and
//! continuous upload.

pub mod batch;
pub mod generator;
pub mod uploader;
pub mod validate;
