// UDMA Descriptor-Ring Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Register-access collaborator.
//!
//! The engine core never touches hardware registers directly; it goes
//! through [`RegisterIo`], which splits accesses into a relaxed variant and
//! a barrier-ordered variant. The ring primitive requires the ordered
//! variant exactly once per commit: the doorbell write must not be observed
//! by the device before the descriptor writes it advertises.

use core::sync::atomic::{fence, Ordering};

/// 32-bit register access at byte offsets within the unit's register window.
pub trait RegisterIo {
    /// Read a register.
    fn read32(&self, off: usize) -> u32;

    /// Write a register with no ordering against surrounding memory writes.
    fn write32_relaxed(&self, off: usize, val: u32);

    /// Barrier-ordered write: every prior memory write (descriptor slots
    /// included) is visible to the device before this write lands.
    fn write32(&self, off: usize, val: u32) {
        fence(Ordering::Release);
        self.write32_relaxed(off, val);
    }
}

/// Handle to one ring's producer-position ("action add") register.
#[derive(Clone, Copy)]
pub struct Doorbell<'a> {
    regs: &'a dyn RegisterIo,
    offset: usize,
}

impl<'a> Doorbell<'a> {
    pub fn new(regs: &'a dyn RegisterIo, offset: usize) -> Self {
        Self { regs, offset }
    }

    /// Publish the ring's new producer position. This is the single
    /// synchronization point between software descriptor writes and
    /// hardware descriptor reads.
    #[inline]
    pub fn ring(&self, producer_pos: u32) {
        self.regs.write32(self.offset, producer_pos);
    }
}

/// Byte offsets within the unit's register window.
///
/// The window starts with global interrupt-mask set/clear registers (one bit
/// per queue, write-1-to-set semantics, no read-modify-write needed),
/// followed by a fixed-stride block per queue.
pub mod layout {
    /// Write-1-to-set per-queue interrupt mask bits.
    pub const INT_MASK_SET: usize = 0x08;
    /// Write-1-to-clear per-queue interrupt mask bits.
    pub const INT_MASK_CLEAR: usize = 0x0C;

    /// First per-queue register block.
    pub const QUEUE_BASE: usize = 0x100;
    /// Byte stride between per-queue blocks.
    pub const QUEUE_STRIDE: usize = 0x40;

    /// Submission-ring producer position, relative to the queue block.
    pub const SUB_DOORBELL: usize = 0x00;
    /// Completion-ring producer position, relative to the queue block.
    pub const COMP_DOORBELL: usize = 0x04;

    /// Submission-side ring bases (descriptor, then completion slots),
    /// low/high word pairs, relative to the queue block.
    pub const TX_DESC_BASE_LO: usize = 0x08;
    pub const TX_DESC_BASE_HI: usize = 0x0C;
    pub const TX_COMP_BASE_LO: usize = 0x10;
    pub const TX_COMP_BASE_HI: usize = 0x14;
    /// Completion-side ring bases, same pairing.
    pub const RX_DESC_BASE_LO: usize = 0x18;
    pub const RX_DESC_BASE_HI: usize = 0x1C;
    pub const RX_COMP_BASE_LO: usize = 0x20;
    pub const RX_COMP_BASE_HI: usize = 0x24;

    /// log2 of the descriptor count per ring.
    pub const RING_SIZE: usize = 0x28;
    /// Queue control; bit 0 enables descriptor fetch.
    pub const QUEUE_CTRL: usize = 0x2C;
    pub const QUEUE_CTRL_ENABLE: u32 = 1 << 0;
}

/// Register offsets for one queue's block.
#[derive(Debug, Clone, Copy)]
pub struct QueueRegs {
    base: usize,
}

impl QueueRegs {
    pub fn new(qid: u16) -> Self {
        Self {
            base: layout::QUEUE_BASE + qid as usize * layout::QUEUE_STRIDE,
        }
    }

    #[inline]
    pub fn sub_doorbell(&self) -> usize {
        self.base + layout::SUB_DOORBELL
    }

    #[inline]
    pub fn comp_doorbell(&self) -> usize {
        self.base + layout::COMP_DOORBELL
    }

    /// Offset of a register within this queue's block.
    #[inline]
    pub fn reg(&self, rel: usize) -> usize {
        self.base + rel
    }
}

/// Program one 64-bit ring base as a low/high register pair.
pub fn write_base(regs: &dyn RegisterIo, qr: &QueueRegs, lo: usize, addr: u64) {
    regs.write32_relaxed(qr.reg(lo), addr as u32);
    regs.write32_relaxed(qr.reg(lo + 4), (addr >> 32) as u32);
}
