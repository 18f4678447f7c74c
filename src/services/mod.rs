pub mod engine;
pub mod ffmpeg;
pub mod inference;
pub mod job_store;
pub mod media;
pub mod retention;
pub mod runner;
pub mod storage;
