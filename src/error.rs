// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThumbError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Playlist fetch error: {0}")]
    PlaylistFetch(String),

    #[error("Playlist is gone")]
    PlaylistGone,

    #[error("Segment fetch error: {0}")]
    SegmentFetch(String),

    #[error("Frame extraction error: {0}")]
    Extraction(String),

    #[error("Manifest write error: {0}")]
    ManifestWrite(String),

    #[error("Stream '{id}' not found")]
    StreamNotFound { id: String },

    #[error("Stream '{id}' already exists")]
    StreamExists { id: String },
}

pub type Result<T> = std::result::Result<T, ThumbError>;
