// UDMA Descriptor-Ring Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Operation codes for the accelerator personalities.
//!
//! Each queue type speaks exactly one opcode family. The opcode value lands
//! in the metadata word of the first submission descriptor of a packet; the
//! surrounding bit layout of that word is owned by the matching transaction
//! compiler and is not shared across families.

/// Operations of the generic memory engine (copy, fill, compare, CRC and
/// checksum generation, RAID parity).
///
/// The RAID entries are opaque selectors: the coefficient math behind P/Q
/// parity lives in the accelerator, the engine only routes buffers to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MemOpcode {
    /// No operation - used for testing/synchronization.
    Noop = 0x00,

    /// Memory copy.
    Copy = 0x01,

    /// Memory fill with a 64-bit pattern.
    Fill = 0x02,

    /// Memory compare of two sources.
    Compare = 0x03,

    /// CRC32 generation.
    Crc32 = 0x10,

    /// 32-bit additive checksum generation.
    Checksum32 = 0x11,

    /// Copy with inline CRC32 generation.
    CopyCrc32 = 0x12,

    /// RAID P (XOR) parity calculation.
    ParityP = 0x20,

    /// RAID Q parity calculation.
    ParityQ = 0x21,

    /// RAID P+Q parity calculation.
    ParityPq = 0x22,

    /// RAID P parity validation.
    ValidateP = 0x23,

    /// RAID Q parity validation.
    ValidateQ = 0x24,
}

impl MemOpcode {
    /// Returns the opcode as a u8 value.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a raw opcode field value.
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Self::Noop),
            0x01 => Some(Self::Copy),
            0x02 => Some(Self::Fill),
            0x03 => Some(Self::Compare),
            0x10 => Some(Self::Crc32),
            0x11 => Some(Self::Checksum32),
            0x12 => Some(Self::CopyCrc32),
            0x20 => Some(Self::ParityP),
            0x21 => Some(Self::ParityQ),
            0x22 => Some(Self::ParityPq),
            0x23 => Some(Self::ValidateP),
            0x24 => Some(Self::ValidateQ),
            _ => None,
        }
    }

    /// True for the RAID parity selectors.
    #[inline]
    pub const fn is_raid(self) -> bool {
        matches!(
            self,
            Self::ParityP | Self::ParityQ | Self::ParityPq | Self::ValidateP | Self::ValidateQ
        )
    }

    /// True for operations that produce a CRC/checksum result.
    #[inline]
    pub const fn has_crc_result(self) -> bool {
        matches!(self, Self::Crc32 | Self::Checksum32 | Self::CopyCrc32)
    }

    /// Returns a human-readable name for the opcode.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Noop => "NOOP",
            Self::Copy => "COPY",
            Self::Fill => "FILL",
            Self::Compare => "COMPARE",
            Self::Crc32 => "CRC32",
            Self::Checksum32 => "CHECKSUM32",
            Self::CopyCrc32 => "COPY_CRC32",
            Self::ParityP => "PARITY_P",
            Self::ParityQ => "PARITY_Q",
            Self::ParityPq => "PARITY_PQ",
            Self::ValidateP => "VALIDATE_P",
            Self::ValidateQ => "VALIDATE_Q",
        }
    }
}

impl std::fmt::Display for MemOpcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:#04x})", self.name(), self.as_u8())
    }
}

/// Operations of the crypto/compression engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CryptoOpcode {
    /// Encryption or decryption only (direction selected separately).
    Cipher = 0x1,

    /// Authentication (hash/MAC) only.
    Auth = 0x2,

    /// Combined cipher + authentication in one pass.
    CipherAuth = 0x3,

    /// Compression.
    Compress = 0x4,

    /// Decompression.
    Decompress = 0x5,

    /// Compression followed by encryption.
    CompressCipher = 0x6,
}

impl CryptoOpcode {
    /// Returns the opcode as a u8 value (4 bits used on the wire).
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a raw opcode field value.
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x1 => Some(Self::Cipher),
            0x2 => Some(Self::Auth),
            0x3 => Some(Self::CipherAuth),
            0x4 => Some(Self::Compress),
            0x5 => Some(Self::Decompress),
            0x6 => Some(Self::CompressCipher),
            _ => None,
        }
    }

    /// True when the operation includes an authentication pass.
    #[inline]
    pub const fn has_auth(self) -> bool {
        matches!(self, Self::Auth | Self::CipherAuth)
    }

    /// Returns a human-readable name for the opcode.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cipher => "CIPHER",
            Self::Auth => "AUTH",
            Self::CipherAuth => "CIPHER_AUTH",
            Self::Compress => "COMPRESS",
            Self::Decompress => "DECOMPRESS",
            Self::CompressCipher => "COMPRESS_CIPHER",
        }
    }
}

impl std::fmt::Display for CryptoOpcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:#03x})", self.name(), self.as_u8())
    }
}

/// Opcode overrides for the message/redirect personality.
///
/// These reuse the common ring format to forward whole packets between
/// domains instead of feeding an accelerator pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgOpcode {
    /// Deliver the packet to the peer domain's receive queue.
    Send = 0x01,

    /// Redirect the packet to another queue on the same adapter.
    Redirect = 0x02,
}

impl MsgOpcode {
    /// Returns the opcode as a u8 value.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a raw opcode field value.
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::Send),
            0x02 => Some(Self::Redirect),
            _ => None,
        }
    }

    /// Returns a human-readable name for the opcode.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Send => "SEND",
            Self::Redirect => "REDIRECT",
        }
    }
}

impl std::fmt::Display for MsgOpcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:#04x})", self.name(), self.as_u8())
    }
}
