// UDMA Descriptor-Ring Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Transaction compiler for the message/redirect personality.
//!
//! Message packets forward payloads between domains instead of feeding an
//! accelerator pipeline. They ride the generic memory engine's queues and
//! reuse its ring format with an opcode override: the opcode field carries
//! the all-ones escape value, which no memory operation uses, and the real
//! message opcode sits below it. The payload lands in the peer domain, so
//! the local completion side only ever sees one meta-only descriptor.
//!
//! # Metadata word (owned by this compiler)
//!
//! | Bits    | Field                                    |
//! |---------|------------------------------------------|
//! | [31:26] | opcode override escape (all ones)        |
//! | [25:24] | message opcode ([`MsgOpcode`])           |
//! | [23:16] | reserved, zero                           |
//! | [15:0]  | destination domain/queue id              |

use crate::buffer::DmaBuf;
use crate::descriptor::{SubFlags, MAX_DESC_LEN};
use crate::error::UdmaResult;
use crate::opcode::MsgOpcode;
use crate::queue::{Queue, QueueType};
use crate::regs::RegisterIo;

/// All-ones opcode value marking a message packet on a memory queue.
pub(crate) const META_OVERRIDE_ESCAPE: u32 = 0x3F << 26;
pub(crate) const META_MSG_OP_SHIFT: u32 = 24;
pub(crate) const META_DEST_MASK: u32 = 0xFFFF;

/// A message transaction: forward the concatenated source buffers to a peer
/// domain's receive queue. Short-lived; compiled by [`prepare`].
#[derive(Debug)]
pub struct MsgTransaction<'a> {
    pub op: MsgOpcode,
    /// Destination domain (send) or queue (redirect) id.
    pub dest: u16,
    /// Payload fragments, chained into one logical packet.
    pub srcs: &'a [DmaBuf],
    pub barrier: bool,
    pub int_en: bool,
    /// Written back by [`prepare`]: submission descriptors consumed.
    pub descs_used: u32,
}

impl<'a> MsgTransaction<'a> {
    pub fn new(op: MsgOpcode, dest: u16, srcs: &'a [DmaBuf]) -> Self {
        Self {
            op,
            dest,
            srcs,
            barrier: false,
            int_en: false,
            descs_used: 0,
        }
    }

    /// Submission-side descriptor count: one per payload fragment.
    pub fn tx_count(&self) -> u32 {
        self.srcs.len() as u32
    }

    /// Completion-side descriptor count. The payload is delivered remotely,
    /// so exactly one meta-only completion is required here.
    pub fn rx_count(&self) -> u32 {
        1
    }

    fn validate_contract(&self) {
        assert!(!self.srcs.is_empty(), "message without payload fragments");
        for buf in self.srcs {
            assert!(
                buf.len > 0 && buf.len <= MAX_DESC_LEN,
                "buffer length {} outside 1..={MAX_DESC_LEN}",
                buf.len
            );
        }
    }

    fn meta_word(&self) -> u32 {
        META_OVERRIDE_ESCAPE
            | (self.op.as_u8() as u32) << META_MSG_OP_SHIFT
            | self.dest as u32 & META_DEST_MASK
    }
}

/// Compile a message transaction into ring descriptors.
///
/// Same two-pass contract as the other compilers; runs on a memory-engine
/// queue, whose opcode space it escapes out of.
pub fn prepare(
    queue: &mut Queue,
    regs: &dyn RegisterIo,
    txn: &mut MsgTransaction<'_>,
) -> UdmaResult<u32> {
    assert_eq!(
        queue.qtype(),
        QueueType::MemCrc,
        "message transaction on a {:?} queue",
        queue.qtype()
    );
    txn.validate_contract();

    let tx_count = txn.tx_count();
    let rx_count = txn.rx_count();
    queue.reserve(tx_count, rx_count)?;

    queue.push_rx_meta();
    queue.commit_rx(rx_count, regs);

    let meta_word = txn.meta_word();
    for (i, src) in txn.srcs.iter().enumerate() {
        let first = i == 0;
        let last = i as u32 == tx_count - 1;
        let mut flags = SubFlags::empty();
        if first {
            flags |= SubFlags::FIRST;
            if txn.barrier {
                flags |= SubFlags::BARRIER;
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
        queue.push_tx(flags, src.len as u16, meta, src.addr_word());
    }

    txn.descs_used = tx_count;
    Ok(tx_count)
}
