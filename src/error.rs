// UDMA Descriptor-Ring Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Error types for the ring engine.
//!
//! Only recoverable runtime conditions are reported through [`UdmaError`].
//! Caller contract violations (contradictory transaction flags, descriptor
//! counts above the engine limit, zero source buffers) are programmer errors
//! and are handled with assertions before any hardware-visible write, never
//! through this enum.

use thiserror::Error;

/// Errors that can occur while driving a UDMA queue.
#[derive(Debug, Error)]
pub enum UdmaError {
    /// Not enough free descriptor slots on the submission and/or completion
    /// ring. Always recoverable: retry after more completions have been
    /// acknowledged.
    #[error("no ring space: need {needed} submission + {needed_comp} completion descriptors")]
    NoSpace { needed: u32, needed_comp: u32 },

    /// Queue configuration rejected at init time.
    #[error("invalid queue configuration: {0}")]
    InvalidConfig(String),

    /// An operation completed with hardware error status bits set.
    #[error("operation failed: completion status {status:#06x}")]
    OperationFailed { status: u16 },

    /// I/O error from system calls (register-window mapping).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Permission denied accessing the register window.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Memory mapping failed.
    #[error("mmap failed: {0}")]
    MmapFailed(String),
}

/// Result type alias for UDMA operations.
pub type UdmaResult<T> = Result<T, UdmaError>;
