//! I/O utilities for peer-bridge
//!
//! This module provides the single-direction copy loop that every bridge
//! session runs twice, once per direction.

mod copy;

pub use copy::{
    copy_stream, CopyOutcome, ProgressFn, StreamBridge, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE,
    MIN_CHUNK_SIZE,
};
