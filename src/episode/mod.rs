mod download;
mod filename;

pub use download::{
    CancelHandle, CancelSignal, DownloadContext, DownloadHandle, DownloadResult, cancel_pair,
    download_episode, spawn_download,
};
pub use filename::{AUDIO_EXTENSION, audio_file_name, sanitize_file_name};
