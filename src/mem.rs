// UDMA Descriptor-Ring Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Transaction compiler for the generic memory engine: copy, fill, compare,
//! checksum/CRC and the RAID parity selectors.
//!
//! # Metadata word (owned by this compiler)
//!
//! | Bits    | Field                                             |
//! |---------|---------------------------------------------------|
//! | [31:26] | opcode ([`MemOpcode`])                            |
//! | [25]    | CRC/checksum result buffer posted                 |
//! | [24]    | seed buffer precedes the sources                  |
//! | [23]    | validate: compare result instead of storing it    |
//! | [22:16] | posted destination count (fill only)              |
//! | [15:0]  | reserved, zero                                    |
//!
//! Only the first descriptor of a packet carries this word; every following
//! descriptor in the chain carries a cleared one.

use crate::buffer::DmaBuf;
use crate::descriptor::{SubFlags, MAX_DESC_LEN};
use crate::error::UdmaResult;
use crate::opcode::MemOpcode;
use crate::queue::{Queue, QueueType};
use crate::regs::RegisterIo;

pub(crate) const META_OPCODE_SHIFT: u32 = 26;
pub(crate) const META_CRC_OUT: u32 = 1 << 25;
pub(crate) const META_SEED_IN: u32 = 1 << 24;
pub(crate) const META_VALIDATE: u32 = 1 << 23;
// Fill has no input to bound the transfer, so the destination count rides
// in the metadata word.
pub(crate) const META_DST_COUNT_SHIFT: u32 = 16;
pub(crate) const META_DST_COUNT_MASK: u32 = 0x7F;

/// Byte-offset overrides applied by the engine before the transfer starts.
/// Their presence forces a leading metadata-only descriptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct XferOverride {
    pub src_offset: u32,
    pub dst_offset: u32,
}

/// A memory-engine transaction. Short-lived: compiled into descriptors by
/// [`prepare`] and not retained afterwards.
#[derive(Debug)]
pub struct MemTransaction<'a> {
    pub op: MemOpcode,
    /// Source buffers, chained into one logical packet.
    pub srcs: &'a [DmaBuf],
    /// Destination buffers, posted on the completion side.
    pub dsts: &'a [DmaBuf],
    /// Where a CRC/checksum result lands (completion side).
    pub crc_out: Option<DmaBuf>,
    /// CRC seed input for chained checksums (submission side).
    pub seed_in: Option<DmaBuf>,
    /// Fill pattern, carried in a metadata descriptor.
    pub fill_pattern: Option<u64>,
    /// Compare/validate mode: report mismatch in completion status.
    pub validate: bool,
    /// Offset overrides; force a metadata descriptor.
    pub overrides: Option<XferOverride>,
    pub barrier: bool,
    pub no_snoop: bool,
    pub int_en: bool,
    /// Written back by [`prepare`]: submission descriptors consumed.
    pub descs_used: u32,
}

impl<'a> MemTransaction<'a> {
    /// A transaction with operation and buffers set, everything else off.
    pub fn new(op: MemOpcode, srcs: &'a [DmaBuf], dsts: &'a [DmaBuf]) -> Self {
        Self {
            op,
            srcs,
            dsts,
            crc_out: None,
            seed_in: None,
            fill_pattern: None,
            validate: false,
            overrides: None,
            barrier: false,
            no_snoop: false,
            int_en: false,
            descs_used: 0,
        }
    }

    /// True when a leading metadata-only descriptor is required. A noop has
    /// no buffers at all, so its packet is the metadata descriptor alone.
    fn needs_meta_desc(&self) -> bool {
        self.fill_pattern.is_some() || self.overrides.is_some() || self.op == MemOpcode::Noop
    }

    /// Payload of the metadata descriptor's address word.
    fn meta_payload(&self) -> u64 {
        if let Some(pattern) = self.fill_pattern {
            pattern
        } else if let Some(ov) = self.overrides {
            (ov.src_offset as u64) << 32 | ov.dst_offset as u64
        } else {
            0
        }
    }

    /// Submission-side descriptor count.
    pub fn tx_count(&self) -> u32 {
        self.srcs.len() as u32
            + self.seed_in.is_some() as u32
            + self.needs_meta_desc() as u32
    }

    /// Completion-side descriptor count. Never zero: a transaction with no
    /// destination and no CRC output still gets one meta-only completion.
    pub fn rx_count(&self) -> u32 {
        let n = self.dsts.len() as u32 + self.crc_out.is_some() as u32;
        n.max(1)
    }

    /// Contract checks. Violations are programmer errors and fatal.
    fn validate_contract(&self) {
        match self.op {
            MemOpcode::Fill => {
                assert!(
                    self.fill_pattern.is_some() && self.srcs.is_empty(),
                    "fill requires a pattern and takes no sources"
                );
                assert!(!self.dsts.is_empty(), "fill requires destination buffers");
            }
            MemOpcode::Noop => {
                assert!(
                    self.srcs.is_empty() && self.dsts.is_empty(),
                    "noop takes no buffers"
                );
            }
            op => {
                assert!(!self.srcs.is_empty(), "{op} requires source buffers");
            }
        }
        if self.op == MemOpcode::Compare {
            assert!(self.srcs.len() >= 2, "compare requires at least two sources");
        }
        assert!(
            self.seed_in.is_none() || self.op.has_crc_result(),
            "seed input only valid for CRC/checksum operations"
        );
        for buf in self.srcs.iter().chain(self.dsts.iter()) {
            assert!(
                buf.len > 0 && buf.len <= MAX_DESC_LEN,
                "buffer length {} outside 1..={MAX_DESC_LEN}",
                buf.len
            );
        }
    }

    /// The metadata word of the packet's first descriptor.
    fn meta_word(&self) -> u32 {
        let mut meta = (self.op.as_u8() as u32) << META_OPCODE_SHIFT;
        if self.op == MemOpcode::Fill {
            meta |= (self.dsts.len() as u32 & META_DST_COUNT_MASK) << META_DST_COUNT_SHIFT;
        }
        if self.crc_out.is_some() {
            meta |= META_CRC_OUT;
        }
        if self.seed_in.is_some() {
            meta |= META_SEED_IN;
        }
        if self.validate {
            meta |= META_VALIDATE;
        }
        meta
    }
}

enum Piece {
    Aux(DmaBuf),
    Meta(u64),
    Src(DmaBuf),
}

/// Compile a memory-engine transaction into ring descriptors.
///
/// Two-pass: descriptor counts are computed and checked against ring space
/// on both sides before anything is written (all-or-nothing). On success the
/// completion-side posts are committed immediately; the submission doorbell
/// is deferred to [`Queue::submit`] so transactions can be batched.
pub fn prepare(
    queue: &mut Queue,
    regs: &dyn RegisterIo,
    txn: &mut MemTransaction<'_>,
) -> UdmaResult<u32> {
    let expected = if txn.op.is_raid() {
        QueueType::Raid
    } else {
        QueueType::MemCrc
    };
    assert_eq!(
        queue.qtype(),
        expected,
        "memory transaction {} on a {:?} queue",
        txn.op,
        queue.qtype()
    );
    txn.validate_contract();

    let tx_count = txn.tx_count();
    let rx_count = txn.rx_count();
    queue.reserve(tx_count, rx_count)?;

    // Completion side first: the hardware must have landing space before
    // the submission doorbell can ever ring.
    for dst in txn.dsts {
        queue.push_rx(dst);
    }
    if let Some(crc) = &txn.crc_out {
        queue.push_rx(crc);
    }
    if txn.dsts.is_empty() && txn.crc_out.is_none() {
        queue.push_rx_meta();
    }
    queue.commit_rx(rx_count, regs);

    // Submission side: aux inputs, optional metadata descriptor, then the
    // sources chained first/concat/last into one logical packet.
    let meta_word = txn.meta_word();
    let meta_payload = txn.meta_payload();
    let meta_desc = txn.needs_meta_desc().then_some(meta_payload);
    let pieces = txn
        .seed_in
        .iter()
        .map(|b| Piece::Aux(*b))
        .chain(meta_desc.iter().map(|w| Piece::Meta(*w)))
        .chain(txn.srcs.iter().map(|b| Piece::Src(*b)));

    for (i, piece) in pieces.enumerate() {
        let first = i == 0;
        let last = i as u32 == tx_count - 1;
        let mut flags = SubFlags::empty();
        if first {
            flags |= SubFlags::FIRST;
            if txn.barrier {
                flags |= SubFlags::BARRIER;
            }
            if txn.no_snoop {
                flags |= SubFlags::NO_SNOOP;
            }
        } else {
            flags |= SubFlags::CONCAT;
        }
        if last {
            flags |= SubFlags::LAST;
            if txn.int_en {
                flags |= SubFlags::INT_EN;
            }
        }
        let meta = if first { meta_word } else { 0 };
        match piece {
            Piece::Aux(b) | Piece::Src(b) => {
                queue.push_tx(flags, b.len as u16, meta, b.addr_word())
            }
            Piece::Meta(w) => queue.push_tx(flags | SubFlags::META, 0, meta, w),
        }
    }

    txn.descs_used = tx_count;
    Ok(tx_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::SubDesc;
    use crate::queue::EngineRev;
    use crate::sim::{QueueMem, SimRegs};

    fn mem_queue(size: u32) -> (Queue, QueueMem, SimRegs) {
        let mem = QueueMem::alloc(size, 16);
        let cfg = mem.config(0, QueueType::MemCrc, EngineRev::Rev1, Some(0));
        let queue = Queue::new(&cfg).unwrap();
        (queue, mem, SimRegs::new())
    }

    fn bufs(n: usize, len: u32) -> Vec<DmaBuf> {
        (0..n)
            .map(|i| DmaBuf::new(0x10_000 + i as u64 * 0x1000, len))
            .collect()
    }

    #[test]
    fn test_memcpy_counts_and_chain_flags() {
        // Three 64-byte sources as one copy packet: exactly three submission
        // descriptors flagged {first}, {concat}, {concat|last}, all with
        // ring-id 0, and three destination posts on the completion side.
        let (mut queue, mem, regs) = mem_queue(32);
        let srcs = bufs(3, 64);
        let dsts = bufs(3, 64);
        let mut txn = MemTransaction::new(MemOpcode::Copy, &srcs, &dsts);
        assert_eq!(txn.tx_count(), 3);
        assert_eq!(txn.rx_count(), 3);

        let used = prepare(&mut queue, &regs, &mut txn).unwrap();
        assert_eq!(used, 3);
        assert_eq!(txn.descs_used, 3);
        assert_eq!(queue.pending(), 3);

        let descs: Vec<SubDesc> = (0..3)
            .map(|i| unsafe { SubDesc::read_from(mem.tx_desc_slot(i)) })
            .collect();
        assert_eq!(descs[0].flags, SubFlags::FIRST);
        assert_eq!(descs[1].flags, SubFlags::CONCAT);
        assert_eq!(descs[2].flags, SubFlags::CONCAT | SubFlags::LAST);
        for d in &descs {
            assert_eq!(d.ring_id, 0);
            assert_eq!(d.len, 64);
        }
        assert_eq!(descs[0].meta >> META_OPCODE_SHIFT, MemOpcode::Copy.as_u8() as u32);
        assert_eq!(descs[1].meta, 0);
        assert_eq!(descs[2].meta, 0);

        // Destination posts carry the buffer addresses in order.
        for (i, dst) in dsts.iter().enumerate() {
            let d = unsafe { SubDesc::read_from(mem.rx_desc_slot(i)) };
            assert_eq!(d.buf, dst.addr);
            assert_eq!(d.len as u32, dst.len);
        }
    }

    #[test]
    fn test_crc_without_destination_posts_one_completion() {
        let (mut queue, mem, regs) = mem_queue(32);
        let srcs = bufs(2, 512);
        let mut txn = MemTransaction::new(MemOpcode::Crc32, &srcs, &[]);
        assert_eq!(txn.rx_count(), 1); // meta-only completion, never zero
        prepare(&mut queue, &regs, &mut txn).unwrap();
        let d = unsafe { SubDesc::read_from(mem.rx_desc_slot(0)) };
        assert!(d.flags.contains(SubFlags::META));
        assert_eq!(d.len, 0);
    }

    #[test]
    fn test_crc_with_result_buffer() {
        let (mut queue, mem, regs) = mem_queue(32);
        let srcs = bufs(1, 256);
        let crc = DmaBuf::new(0x9000, 4);
        let mut txn = MemTransaction::new(MemOpcode::Crc32, &srcs, &[]);
        txn.crc_out = Some(crc);
        assert_eq!(txn.rx_count(), 1);
        prepare(&mut queue, &regs, &mut txn).unwrap();
        let first = unsafe { SubDesc::read_from(mem.tx_desc_slot(0)) };
        assert_ne!(first.meta & META_CRC_OUT, 0);
        let post = unsafe { SubDesc::read_from(mem.rx_desc_slot(0)) };
        assert_eq!(post.buf, 0x9000);
    }

    #[test]
    fn test_fill_uses_metadata_descriptor() {
        let (mut queue, mem, regs) = mem_queue(32);
        let dsts = bufs(2, 128);
        let mut txn = MemTransaction::new(MemOpcode::Fill, &[], &dsts);
        txn.fill_pattern = Some(0xDEAD_BEEF_CAFE_BABE);
        assert_eq!(txn.tx_count(), 1);
        prepare(&mut queue, &regs, &mut txn).unwrap();
        let d = unsafe { SubDesc::read_from(mem.tx_desc_slot(0)) };
        assert!(d.flags.contains(SubFlags::META));
        assert!(d.flags.contains(SubFlags::FIRST) && d.flags.contains(SubFlags::LAST));
        assert_eq!(d.buf, 0xDEAD_BEEF_CAFE_BABE);
        assert_eq!(d.meta >> META_DST_COUNT_SHIFT & META_DST_COUNT_MASK, 2);
    }

    #[test]
    fn test_noop_emits_metadata_descriptor() {
        // A noop still flows through the ring as one metadata-only
        // submission descriptor and one meta-only completion.
        let (mut queue, mem, regs) = mem_queue(32);
        let mut txn = MemTransaction::new(MemOpcode::Noop, &[], &[]);
        assert_eq!(txn.tx_count(), 1);
        assert_eq!(txn.rx_count(), 1);
        let used = prepare(&mut queue, &regs, &mut txn).unwrap();
        assert_eq!(used, 1);
        let d = unsafe { SubDesc::read_from(mem.tx_desc_slot(0)) };
        assert!(d.flags.contains(SubFlags::META | SubFlags::FIRST | SubFlags::LAST));
        assert_eq!(d.buf, 0);
        assert_eq!(d.meta >> META_OPCODE_SHIFT, MemOpcode::Noop.as_u8() as u32);
    }

    #[test]
    fn test_seed_descriptor_leads_the_chain() {
        let (mut queue, mem, regs) = mem_queue(32);
        let srcs = bufs(2, 64);
        let mut txn = MemTransaction::new(MemOpcode::Crc32, &srcs, &[]);
        txn.seed_in = Some(DmaBuf::new(0x7000, 4));
        assert_eq!(txn.tx_count(), 3);
        prepare(&mut queue, &regs, &mut txn).unwrap();
        let seed = unsafe { SubDesc::read_from(mem.tx_desc_slot(0)) };
        assert_eq!(seed.buf, 0x7000);
        assert!(seed.flags.contains(SubFlags::FIRST));
        assert_ne!(seed.meta & META_SEED_IN, 0);
    }

    #[test]
    fn test_offset_overrides_force_metadata_descriptor() {
        let (mut queue, mem, regs) = mem_queue(32);
        let srcs = bufs(1, 256);
        let dsts = bufs(1, 256);
        let mut txn = MemTransaction::new(MemOpcode::Copy, &srcs, &dsts);
        txn.overrides = Some(XferOverride {
            src_offset: 0x40,
            dst_offset: 0x80,
        });
        assert_eq!(txn.tx_count(), 2);
        prepare(&mut queue, &regs, &mut txn).unwrap();

        let meta = unsafe { SubDesc::read_from(mem.tx_desc_slot(0)) };
        assert!(meta.flags.contains(SubFlags::META | SubFlags::FIRST));
        assert_eq!(meta.buf, 0x40u64 << 32 | 0x80);
        let src = unsafe { SubDesc::read_from(mem.tx_desc_slot(1)) };
        assert!(src.flags.contains(SubFlags::CONCAT | SubFlags::LAST));
    }

    #[test]
    fn test_no_space_is_clean_and_retryable() {
        let (mut queue, _mem, regs) = mem_queue(32);
        // Fill the submission ring to the brim with 16-desc packets.
        let srcs16 = bufs(16, 64);
        for _ in 0..2 {
            let mut txn = MemTransaction::new(MemOpcode::Crc32, &srcs16, &[]);
            prepare(&mut queue, &regs, &mut txn).unwrap();
        }
        assert_eq!(queue.tx_available(), 0);

        let srcs = bufs(2, 64);
        let mut txn = MemTransaction::new(MemOpcode::Crc32, &srcs, &[]);
        let before = queue.pending();
        let err = prepare(&mut queue, &regs, &mut txn).unwrap_err();
        assert!(matches!(
            err,
            crate::error::UdmaError::NoSpace {
                needed: 2,
                needed_comp: 1
            }
        ));
        // Nothing was written: indices unchanged, retry yields the same.
        assert_eq!(queue.pending(), before);
        assert_eq!(txn.descs_used, 0);
        assert!(prepare(&mut queue, &regs, &mut txn).is_err());
    }

    #[test]
    #[should_panic(expected = "requires source buffers")]
    fn test_copy_without_sources_is_fatal() {
        let (mut queue, _mem, regs) = mem_queue(32);
        let dsts = bufs(1, 64);
        let mut txn = MemTransaction::new(MemOpcode::Copy, &[], &dsts);
        let _ = prepare(&mut queue, &regs, &mut txn);
    }

    #[test]
    #[should_panic(expected = "limit")]
    fn test_descriptor_limit_is_fatal() {
        let (mut queue, _mem, regs) = mem_queue(64);
        let srcs = bufs(17, 64); // Rev1 limit is 16 descriptors per packet
        let mut txn = MemTransaction::new(MemOpcode::Crc32, &srcs, &[]);
        let _ = prepare(&mut queue, &regs, &mut txn);
    }

    #[test]
    #[should_panic(expected = "on a")]
    fn test_raid_op_on_mem_queue_is_fatal() {
        let (mut queue, _mem, regs) = mem_queue(32);
        let srcs = bufs(2, 64);
        let dsts = bufs(1, 64);
        let mut txn = MemTransaction::new(MemOpcode::ParityP, &srcs, &dsts);
        let _ = prepare(&mut queue, &regs, &mut txn);
    }
}
