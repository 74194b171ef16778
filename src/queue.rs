// UDMA Descriptor-Ring Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Queue pairs: one submission ring plus one completion ring, statically
//! typed to a single accelerator personality.
//!
//! A queue is created over caller-supplied ring memory (already mapped for
//! DMA) and torn down only when quiesced. The transaction compilers write
//! descriptors through the helpers here; the two-phase submission contract
//! is: `prepare` encodes descriptors and immediately commits the
//! completion-side posts, while the submission-side doorbell waits for an
//! explicit `submit` so several transactions can share one hardware
//! notification.

use crate::buffer::DmaBuf;
use crate::descriptor::{SubDesc, SubFlags};
use crate::error::{UdmaError, UdmaResult};
use crate::regs::{Doorbell, QueueRegs, RegisterIo};
use crate::ring::{CompletedPacket, Ring, RingMem};

/// Default number of submission slots reserved so hardware completion
/// writes never catch up to unconsumed entries.
pub const DEFAULT_SAFETY_MARGIN: u32 = 16;

/// Accelerator personality a queue is bound to at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueType {
    /// Encryption/authentication/compression engine.
    CryptoAuth,
    /// Generic memory engine: copy, fill, compare, checksum/CRC.
    MemCrc,
    /// RAID/erasure-coding engine (opaque parity selectors).
    Raid,
}

/// Accelerator hardware revision. Selects the per-packet descriptor limit
/// and a small number of revision-gated defaults; both can be overridden
/// through [`QueueConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineRev {
    Rev1,
    Rev2,
}

impl EngineRev {
    /// Maximum descriptors one logical packet may span on this revision.
    #[inline]
    pub const fn max_descs_per_packet(self) -> u32 {
        match self {
            Self::Rev1 => 16,
            Self::Rev2 => 32,
        }
    }
}

/// Queue configuration, supplied by the external init collaborator.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub qid: u16,
    pub qtype: QueueType,
    pub rev: EngineRev,
    /// Descriptor count per ring: power of two, 32..=65536.
    pub size: u32,
    /// Submission-side descriptor slots.
    pub tx_desc: RingMem,
    /// Submission-side completion slots.
    pub tx_comp: RingMem,
    /// Completion-side (destination) descriptor slots.
    pub rx_desc: RingMem,
    /// Completion-side completion slots.
    pub rx_comp: RingMem,
    /// Completion element size in bytes: 8 or 16.
    pub comp_elem_size: usize,
    /// Override for [`DEFAULT_SAFETY_MARGIN`].
    pub safety_margin: Option<u32>,
    /// Override for the revision's per-packet descriptor limit.
    pub max_descs_per_packet: Option<u32>,
}

/// An open queue pair.
pub struct Queue {
    qid: u16,
    qtype: QueueType,
    max_descs: u32,
    regs: QueueRegs,
    tx: Ring,
    rx: Ring,
}

impl Queue {
    /// Bring up a queue over the configured ring memory.
    pub fn new(cfg: &QueueConfig) -> UdmaResult<Self> {
        if !cfg.size.is_power_of_two() || !(32..=65536).contains(&cfg.size) {
            return Err(UdmaError::InvalidConfig(format!(
                "queue size {} is not a power of two in 32..=65536",
                cfg.size
            )));
        }
        let margin = cfg.safety_margin.unwrap_or(DEFAULT_SAFETY_MARGIN);
        let max_descs = cfg
            .max_descs_per_packet
            .unwrap_or(cfg.rev.max_descs_per_packet());
        if max_descs == 0 || max_descs > cfg.size {
            return Err(UdmaError::InvalidConfig(format!(
                "descriptor-per-packet limit {max_descs} out of range for size {}",
                cfg.size
            )));
        }

        let tx = Ring::new(cfg.size, margin, cfg.tx_desc, cfg.tx_comp, cfg.comp_elem_size)?;
        let rx = Ring::new(cfg.size, margin, cfg.rx_desc, cfg.rx_comp, cfg.comp_elem_size)?;

        log::debug!(
            "queue {} up: type {:?}, size {}, margin {margin}, max {max_descs} descs/packet",
            cfg.qid,
            cfg.qtype,
            cfg.size
        );

        Ok(Self {
            qid: cfg.qid,
            qtype: cfg.qtype,
            max_descs,
            regs: QueueRegs::new(cfg.qid),
            tx,
            rx,
        })
    }

    #[inline]
    pub fn qid(&self) -> u16 {
        self.qid
    }

    #[inline]
    pub fn qtype(&self) -> QueueType {
        self.qtype
    }

    /// Per-packet descriptor limit in force for this queue.
    #[inline]
    pub fn max_descs_per_packet(&self) -> u32 {
        self.max_descs
    }

    /// Free submission-side descriptor slots.
    #[inline]
    pub fn tx_available(&self) -> u32 {
        self.tx.available()
    }

    /// Free completion-side descriptor slots.
    #[inline]
    pub fn rx_available(&self) -> u32 {
        self.rx.available()
    }

    /// Submission descriptors prepared but not yet doorbelled.
    #[inline]
    pub fn pending(&self) -> u32 {
        self.tx.pending()
    }

    /// Verify both rings can hold a transaction before anything is written.
    ///
    /// If the submission side is short, already-completed submission entries
    /// are drained and acknowledged once (non-blocking reclamation) and the
    /// check repeated before `NoSpace` is reported. Nothing is written on
    /// failure, so the caller can simply retry later.
    pub(crate) fn reserve(&mut self, tx_need: u32, rx_need: u32) -> UdmaResult<()> {
        assert!(
            tx_need <= self.max_descs && rx_need <= self.max_descs,
            "transaction spans {tx_need}/{rx_need} descriptors, limit {}",
            self.max_descs
        );
        if self.tx.available() < tx_need {
            self.reclaim_tx();
        }
        if self.tx.available() < tx_need || self.rx.available() < rx_need {
            return Err(UdmaError::NoSpace {
                needed: tx_need,
                needed_comp: rx_need,
            });
        }
        Ok(())
    }

    /// Drain and acknowledge submission-side completions. These carry no
    /// payload for the caller; their only effect is capacity recovery.
    fn reclaim_tx(&mut self) {
        let mut freed = 0;
        while let Some(pkt) = self.tx.packet_get() {
            self.tx.acknowledge(pkt.descs);
            freed += pkt.descs;
        }
        if freed > 0 {
            log::trace!("queue {}: reclaimed {freed} submission slots", self.qid);
        }
    }

    /// Write one submission descriptor into the next slot.
    pub(crate) fn push_tx(&mut self, flags: SubFlags, len: u16, meta: u32, buf: u64) {
        let slot = self.tx.allocate();
        let desc = SubDesc {
            flags,
            ring_id: slot.ring_id,
            len,
            meta,
            buf,
        };
        unsafe { desc.write_to(slot.ptr) };
    }

    /// Post one destination buffer on the completion side.
    pub(crate) fn push_rx(&mut self, buf: &DmaBuf) {
        let slot = self.rx.allocate();
        let desc = SubDesc {
            flags: SubFlags::empty(),
            ring_id: slot.ring_id,
            len: buf.len as u16,
            meta: 0,
            buf: buf.addr_word(),
        };
        unsafe { desc.write_to(slot.ptr) };
    }

    /// Post a meta-only completion request (no destination buffer). Used
    /// when a transaction produces no data but a completion is still
    /// mandatory - a zero-descriptor completion is never valid.
    pub(crate) fn push_rx_meta(&mut self) {
        let slot = self.rx.allocate();
        let desc = SubDesc {
            flags: SubFlags::META,
            ring_id: slot.ring_id,
            len: 0,
            meta: 0,
            buf: 0,
        };
        unsafe { desc.write_to(slot.ptr) };
    }

    /// Commit completion-side posts immediately so the hardware has landing
    /// space before the submission doorbell ever rings.
    pub(crate) fn commit_rx(&mut self, n: u32, regs: &dyn RegisterIo) {
        let db = Doorbell::new(regs, self.regs.comp_doorbell());
        self.rx.commit(n, &db);
    }

    /// Ring the submission doorbell for `n` prepared descriptors. Several
    /// prepared transactions may be batched under one call.
    pub fn submit(&mut self, n: u32, regs: &dyn RegisterIo) {
        let db = Doorbell::new(regs, self.regs.sub_doorbell());
        self.tx.commit(n, &db);
    }

    /// Poll for the next completed packet on the completion side.
    pub fn poll(&mut self) -> Option<CompletedPacket> {
        self.rx.packet_get()
    }

    /// Release `n` completion descriptors after the caller is done with the
    /// buffers they cover.
    pub fn acknowledge(&mut self, n: u32) {
        self.rx.acknowledge(n);
    }

    /// True when nothing is in flight in either direction; required before
    /// the queue (and its ring memory) may be torn down.
    pub fn is_quiesced(&mut self) -> bool {
        self.reclaim_tx();
        self.tx.pending() == 0 && self.tx.available() == self.tx.capacity_bound()
            && self.rx.available() == self.rx.capacity_bound()
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        log::debug!("queue {} down", self.qid);
    }
}
