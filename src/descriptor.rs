// UDMA Descriptor-Ring Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Descriptor wire format and codec.
//!
//! Two shapes exist, shared by every accelerator personality:
//!
//! - Submission descriptor, 16 bytes: two 32-bit control words plus one
//!   64-bit buffer-address word. Written by software, consumed by hardware.
//! - Completion descriptor, 8 or 16 bytes (queue-configuration dependent):
//!   the first 32-bit word always carries status, ring-id and first/last
//!   bits in fixed positions. Written by hardware, consumed by software.
//!
//! All fields are little-endian on the wire; the codec applies the swap
//! uniformly in both directions. The second submission word (`meta`) is
//! opaque at this layer; its bit layout is owned by exactly one transaction
//! compiler per opcode family.

use bitflags::bitflags;

/// Maximum byte length a single descriptor can cover (16-bit length field).
pub const MAX_DESC_LEN: u32 = 0xFFFF;

/// Ring-id field position within both descriptor control words.
pub(crate) const RING_ID_SHIFT: u32 = 24;
pub(crate) const RING_ID_MASK: u32 = 0x3;

bitflags! {
    /// Control flags of a submission descriptor (first 32-bit word).
    ///
    /// Bits [25:24] hold the ring-id and bits [15:0] the length; neither is
    /// a flag. Bits [22:16] are reserved.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SubFlags: u32 {
        /// Concatenate with the previous descriptor (scatter/gather chain).
        const CONCAT = 1 << 31;
        /// Data memory barrier - complete all prior descriptors first.
        const BARRIER = 1 << 30;
        /// Do not snoop caches for this buffer.
        const NO_SNOOP = 1 << 29;
        /// Raise a completion interrupt for this descriptor.
        const INT_EN = 1 << 28;
        /// Last descriptor of a logical packet.
        const LAST = 1 << 27;
        /// First descriptor of a logical packet.
        const FIRST = 1 << 26;
        /// Metadata-only descriptor: no buffer, address word is payload.
        const META = 1 << 23;
    }
}

bitflags! {
    /// Flags of a completion descriptor's first word.
    ///
    /// Bits [25:24] hold the ring-id, bits [23:16] the error/status code.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CompFlags: u32 {
        /// The operation reported an error; see the status code.
        const ERROR = 1 << 31;
        /// The posted buffer was written by the hardware.
        const BUF_USED = 1 << 30;
        /// Last completion descriptor of a logical packet.
        const LAST = 1 << 27;
        /// First completion descriptor of a logical packet.
        const FIRST = 1 << 26;
    }
}

bitflags! {
    /// Error/status code carried in completion bits [23:16].
    ///
    /// Decoded faithfully and never masked; the surrounding driver decides
    /// what to do about each condition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CompError: u8 {
        /// Descriptor protocol violation (malformed chain, bad opcode).
        const PROTOCOL = 1 << 0;
        /// Internal memory parity error.
        const PARITY = 1 << 1;
        /// Authentication/signature mismatch (crypto engine).
        const AUTH_FAIL = 1 << 2;
        /// Engine timeout.
        const TIMEOUT = 1 << 3;
        /// Compare mismatch (memory engine compare/validate operations).
        const MISMATCH = 1 << 4;
    }
}

/// 16-byte submission descriptor as laid out in ring memory.
///
/// # Layout
///
/// | Offset | Size | Field                                         |
/// |--------|------|-----------------------------------------------|
/// | 0      | 4    | `len_ctrl`: flags [31:26]+[23], ring-id [25:24], length [15:0] |
/// | 4      | 4    | `meta`: opcode/metadata word (compiler-owned)  |
/// | 8      | 8    | `buf`: buffer address, target id in [63:48]    |
#[derive(Debug, Clone, Copy)]
#[repr(C, align(16))]
pub struct SubDescHw {
    pub len_ctrl: u32,
    pub meta: u32,
    pub buf: u64,
}

/// Completion descriptor as laid out in ring memory (16-byte form).
///
/// Queues configured for 8-byte completion elements use only the first two
/// words; the layout of those words is identical in both forms.
///
/// # Layout
///
/// | Offset | Size | Field                                                  |
/// |--------|------|--------------------------------------------------------|
/// | 0      | 4    | `ctrl`: flags [31:26], ring-id [25:24], status [23:16] |
/// | 4      | 4    | `len`: bytes written/consumed [15:0]                   |
/// | 8      | 4    | `word2`: operation-specific result (16-byte form)      |
/// | 12     | 4    | `word3`: operation-specific result (16-byte form)      |
#[derive(Debug, Clone, Copy)]
#[repr(C, align(8))]
pub struct CompDescHw {
    pub ctrl: u32,
    pub len: u32,
    pub word2: u32,
    pub word3: u32,
}

/// Logical field set of a submission descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubDesc {
    pub flags: SubFlags,
    /// 2-bit ring generation tag; must match the ring's id at allocation.
    pub ring_id: u8,
    pub len: u16,
    /// Opcode/metadata word. Owned by one transaction compiler.
    pub meta: u32,
    /// Buffer address word (with target id folded in), or metadata payload
    /// for [`SubFlags::META`] descriptors.
    pub buf: u64,
}

impl SubDesc {
    /// Encode to the wire representation (little-endian every field).
    #[inline]
    pub fn to_raw(&self) -> SubDescHw {
        debug_assert!(self.ring_id as u32 <= RING_ID_MASK);
        let len_ctrl = self.flags.bits()
            | ((self.ring_id as u32) & RING_ID_MASK) << RING_ID_SHIFT
            | self.len as u32;
        SubDescHw {
            len_ctrl: len_ctrl.to_le(),
            meta: self.meta.to_le(),
            buf: self.buf.to_le(),
        }
    }

    /// Decode from the wire representation.
    #[inline]
    pub fn from_raw(raw: &SubDescHw) -> Self {
        let len_ctrl = u32::from_le(raw.len_ctrl);
        Self {
            flags: SubFlags::from_bits_truncate(len_ctrl),
            ring_id: (len_ctrl >> RING_ID_SHIFT & RING_ID_MASK) as u8,
            len: len_ctrl as u16,
            meta: u32::from_le(raw.meta),
            buf: u64::from_le(raw.buf),
        }
    }

    /// Write this descriptor into a ring slot.
    ///
    /// # Safety
    ///
    /// `slot` must point at a valid, software-owned submission slot.
    #[inline]
    pub unsafe fn write_to(&self, slot: *mut SubDescHw) {
        core::ptr::write_volatile(slot, self.to_raw());
    }

    /// Read a descriptor back from a ring slot.
    ///
    /// # Safety
    ///
    /// `slot` must point at a valid submission slot.
    #[inline]
    pub unsafe fn read_from(slot: *const SubDescHw) -> Self {
        Self::from_raw(&core::ptr::read_volatile(slot))
    }
}

/// Logical field set of a completion descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompDesc {
    pub flags: CompFlags,
    /// 2-bit ring generation tag written by the hardware. The ring layer
    /// compares it against the expected id before any other field of the
    /// slot is interpreted; a mismatch means the slot is stale.
    pub ring_id: u8,
    pub status: CompError,
    /// Bytes written into (receive side) or consumed from (submit side) the
    /// posted buffer.
    pub len: u16,
    /// Operation-specific results; zero on 8-byte completion elements.
    pub word2: u32,
    pub word3: u32,
}

impl CompDesc {
    /// Encode to the wire representation. The hardware is the producer of
    /// completion descriptors; this direction exists for the device model
    /// and for tests.
    #[inline]
    pub fn to_raw(&self) -> CompDescHw {
        debug_assert!(self.ring_id as u32 <= RING_ID_MASK);
        let ctrl = self.flags.bits()
            | ((self.ring_id as u32) & RING_ID_MASK) << RING_ID_SHIFT
            | (self.status.bits() as u32) << 16;
        CompDescHw {
            ctrl: ctrl.to_le(),
            len: (self.len as u32).to_le(),
            word2: self.word2.to_le(),
            word3: self.word3.to_le(),
        }
    }

    /// Decode from the wire representation.
    #[inline]
    pub fn from_raw(raw: &CompDescHw) -> Self {
        let ctrl = u32::from_le(raw.ctrl);
        Self {
            flags: CompFlags::from_bits_truncate(ctrl),
            ring_id: (ctrl >> RING_ID_SHIFT & RING_ID_MASK) as u8,
            status: CompError::from_bits_truncate((ctrl >> 16) as u8),
            len: u32::from_le(raw.len) as u16,
            word2: u32::from_le(raw.word2),
            word3: u32::from_le(raw.word3),
        }
    }

    /// Read a completion descriptor from hardware-owned ring memory.
    ///
    /// The slot may be mid-write by the hardware; the caller must check
    /// `ring_id` against the expected generation before trusting any other
    /// field.
    ///
    /// # Safety
    ///
    /// `slot` must point at `elem_size` readable bytes inside a completion
    /// ring. `elem_size` must be 8 or 16.
    #[inline]
    pub unsafe fn read_from(slot: *const u8, elem_size: usize) -> Self {
        let words = slot as *const u32;
        let raw = CompDescHw {
            ctrl: core::ptr::read_volatile(words),
            len: core::ptr::read_volatile(words.add(1)),
            word2: if elem_size >= 16 {
                core::ptr::read_volatile(words.add(2))
            } else {
                0
            },
            word3: if elem_size >= 16 {
                core::ptr::read_volatile(words.add(3))
            } else {
                0
            },
        };
        Self::from_raw(&raw)
    }

    /// Write a completion descriptor into ring memory (device-model side).
    ///
    /// # Safety
    ///
    /// `slot` must point at `elem_size` writable bytes inside a completion
    /// ring. `elem_size` must be 8 or 16.
    #[inline]
    pub unsafe fn write_to(&self, slot: *mut u8, elem_size: usize) {
        let raw = self.to_raw();
        let words = slot as *mut u32;
        // Payload words first, control word last: a reader that sees the
        // fresh ring-id must also see the rest of the slot.
        core::ptr::write_volatile(words.add(1), raw.len);
        if elem_size >= 16 {
            core::ptr::write_volatile(words.add(2), raw.word2);
            core::ptr::write_volatile(words.add(3), raw.word3);
        }
        core::sync::atomic::fence(core::sync::atomic::Ordering::Release);
        core::ptr::write_volatile(words, raw.ctrl);
    }
}

// Compile-time size and alignment checks for the wire shapes.
const _: () = assert!(core::mem::size_of::<SubDescHw>() == 16);
const _: () = assert!(core::mem::align_of::<SubDescHw>() == 16);
const _: () = assert!(core::mem::size_of::<CompDescHw>() == 16);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(std::mem::size_of::<SubDescHw>(), 16);
        assert_eq!(std::mem::align_of::<SubDescHw>(), 16);
        assert_eq!(std::mem::size_of::<CompDescHw>(), 16);
    }

    #[test]
    fn test_sub_desc_round_trip_all_flags() {
        // Every flag subset, every ring id: encode then decode must yield
        // the original logical field set.
        let all = SubFlags::all().bits();
        let mut bits = 0u32;
        loop {
            let flags = SubFlags::from_bits_truncate(bits);
            for ring_id in 0..4u8 {
                let desc = SubDesc {
                    flags,
                    ring_id,
                    len: 0xABCD,
                    meta: 0x1234_5678,
                    buf: 0xDEAD_BEEF_0000_1000,
                };
                assert_eq!(SubDesc::from_raw(&desc.to_raw()), desc);
            }
            if bits == all {
                break;
            }
            // Next subset of the flag bits.
            bits = (bits.wrapping_sub(all)) & all;
        }
    }

    #[test]
    fn test_sub_desc_field_positions() {
        let desc = SubDesc {
            flags: SubFlags::FIRST | SubFlags::LAST,
            ring_id: 0b10,
            len: 0x0040,
            meta: 0,
            buf: 0,
        };
        let raw = desc.to_raw();
        let w = u32::from_le(raw.len_ctrl);
        assert_eq!(w & 0xFFFF, 0x0040);
        assert_eq!(w >> 24 & 0x3, 0b10);
        assert_ne!(w & (1 << 26), 0); // FIRST
        assert_ne!(w & (1 << 27), 0); // LAST
        assert_eq!(w & (1 << 31), 0); // no CONCAT
    }

    #[test]
    fn test_comp_desc_round_trip() {
        let desc = CompDesc {
            flags: CompFlags::FIRST | CompFlags::LAST | CompFlags::BUF_USED,
            ring_id: 3,
            status: CompError::empty(),
            len: 512,
            word2: 0xCAFE_F00D,
            word3: 0,
        };
        assert_eq!(CompDesc::from_raw(&desc.to_raw()), desc);
    }

    #[test]
    fn test_comp_desc_error_status() {
        let desc = CompDesc {
            flags: CompFlags::ERROR | CompFlags::LAST,
            ring_id: 1,
            status: CompError::AUTH_FAIL | CompError::TIMEOUT,
            len: 0,
            word2: 0,
            word3: 0,
        };
        let raw = desc.to_raw();
        let ctrl = u32::from_le(raw.ctrl);
        assert_ne!(ctrl & (1 << 31), 0); // ERROR summary bit
        assert_eq!(
            (ctrl >> 16) as u8,
            (CompError::AUTH_FAIL | CompError::TIMEOUT).bits()
        );
        let back = CompDesc::from_raw(&raw);
        assert!(back.status.contains(CompError::AUTH_FAIL));
        assert!(back.status.contains(CompError::TIMEOUT));
    }

    #[test]
    fn test_slot_write_read() {
        let mut slot = SubDescHw {
            len_ctrl: 0,
            meta: 0,
            buf: 0,
        };
        let desc = SubDesc {
            flags: SubFlags::FIRST | SubFlags::CONCAT,
            ring_id: 2,
            len: 64,
            meta: 0xA5A5_A5A5,
            buf: 0x1000,
        };
        unsafe {
            desc.write_to(&mut slot);
            assert_eq!(SubDesc::read_from(&slot), desc);
        }
    }

    #[test]
    fn test_comp_slot_8_byte_element() {
        let mut mem = [0u8; 16];
        let desc = CompDesc {
            flags: CompFlags::LAST,
            ring_id: 0,
            status: CompError::empty(),
            len: 128,
            word2: 0,
            word3: 0,
        };
        unsafe {
            desc.write_to(mem.as_mut_ptr(), 8);
            let back = CompDesc::read_from(mem.as_ptr(), 8);
            assert_eq!(back.len, 128);
            assert_eq!(back.word2, 0);
            assert!(back.flags.contains(CompFlags::LAST));
        }
    }
}
