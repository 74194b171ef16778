// UDMA Descriptor-Ring Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Engine facade: one handle per UDMA unit.
//!
//! The handle owns the register window, the open queues and the unit-wide
//! interrupt-mask state; nothing here is process-global. Queues are brought
//! up masked, programmed (ring bases, size, enable) and only then unmasked;
//! a failure mid-bring-up disables the queue block again before the error
//! propagates.
//!
//! The per-transaction surface is the two-phase contract shared by all
//! compilers: `prepare_*` encodes descriptors (completion side committed
//! immediately), an explicit [`UdmaEngine::submit`] rings the submission
//! doorbell for one or many prepared transactions, and
//! [`UdmaEngine::poll`]/[`UdmaEngine::acknowledge`] drain the results.

use crate::crypto::{self, CryptoTransaction};
use crate::error::{UdmaError, UdmaResult};
use crate::mem::{self, MemTransaction};
use crate::msg::{self, MsgTransaction};
use crate::queue::{Queue, QueueConfig};
use crate::regs::{layout, write_base, QueueRegs, RegisterIo};
use crate::ring::CompletedPacket;

/// Width of the per-queue interrupt mask registers.
pub const MAX_QUEUES: u16 = 32;

/// Handle to one UDMA unit.
pub struct UdmaEngine<R: RegisterIo> {
    regs: R,
    queues: Vec<Queue>,
    int_mask: u32,
}

impl<R: RegisterIo> UdmaEngine<R> {
    /// Take ownership of a unit's register window. All queue interrupts
    /// start masked.
    pub fn new(regs: R) -> Self {
        regs.write32_relaxed(layout::INT_MASK_SET, !0);
        Self {
            regs,
            queues: Vec::new(),
            int_mask: !0,
        }
    }

    /// The register window (for drivers layering interrupt plumbing on top).
    pub fn regs(&self) -> &R {
        &self.regs
    }

    /// Interrupt mask bits currently in force, one per queue id.
    pub fn int_mask(&self) -> u32 {
        self.int_mask
    }

    /// Mask completion interrupts for one queue.
    pub fn mask_queue(&mut self, qid: u16) {
        self.regs.write32_relaxed(layout::INT_MASK_SET, 1 << qid);
        self.int_mask |= 1 << qid;
    }

    /// Unmask completion interrupts for one queue.
    pub fn unmask_queue(&mut self, qid: u16) {
        self.regs.write32_relaxed(layout::INT_MASK_CLEAR, 1 << qid);
        self.int_mask &= !(1 << qid);
    }

    /// Bring up a queue: program its ring bases and size, enable descriptor
    /// fetch, unmask its interrupt. If anything fails the queue block is
    /// disabled again and the interrupt stays masked.
    pub fn add_queue(&mut self, cfg: &QueueConfig) -> UdmaResult<()> {
        if cfg.qid >= MAX_QUEUES {
            return Err(UdmaError::InvalidConfig(format!(
                "queue id {} out of range 0..{MAX_QUEUES}",
                cfg.qid
            )));
        }
        if self.queues.iter().any(|q| q.qid() == cfg.qid) {
            return Err(UdmaError::InvalidConfig(format!(
                "queue id {} already open",
                cfg.qid
            )));
        }

        self.mask_queue(cfg.qid);
        let qr = QueueRegs::new(cfg.qid);
        let cleanup = scopeguard::guard(&self.regs, |regs| {
            regs.write32_relaxed(qr.reg(layout::QUEUE_CTRL), 0);
            log::debug!("queue {} bring-up aborted", cfg.qid);
        });

        let queue = Queue::new(cfg)?;

        write_base(&self.regs, &qr, layout::TX_DESC_BASE_LO, cfg.tx_desc.phys);
        write_base(&self.regs, &qr, layout::TX_COMP_BASE_LO, cfg.tx_comp.phys);
        write_base(&self.regs, &qr, layout::RX_DESC_BASE_LO, cfg.rx_desc.phys);
        write_base(&self.regs, &qr, layout::RX_COMP_BASE_LO, cfg.rx_comp.phys);
        self.regs
            .write32_relaxed(qr.reg(layout::RING_SIZE), cfg.size.trailing_zeros());
        // Ordered: the device must not fetch before the bases are visible.
        self.regs
            .write32(qr.reg(layout::QUEUE_CTRL), layout::QUEUE_CTRL_ENABLE);

        scopeguard::ScopeGuard::into_inner(cleanup);
        self.queues.push(queue);
        self.unmask_queue(cfg.qid);
        Ok(())
    }

    /// Tear down a queue. The queue must be quiesced: no prepared-but-unsent
    /// descriptors and no in-flight work in either direction.
    pub fn remove_queue(&mut self, qid: u16) -> UdmaResult<()> {
        let idx = self
            .queues
            .iter()
            .position(|q| q.qid() == qid)
            .ok_or_else(|| UdmaError::InvalidConfig(format!("queue id {qid} not open")))?;
        assert!(
            self.queues[idx].is_quiesced(),
            "tearing down queue {qid} with work in flight"
        );
        self.mask_queue(qid);
        let qr = QueueRegs::new(qid);
        self.regs.write32(qr.reg(layout::QUEUE_CTRL), 0);
        self.queues.swap_remove(idx);
        Ok(())
    }

    /// Direct access to an open queue.
    pub fn queue_mut(&mut self, qid: u16) -> Option<&mut Queue> {
        self.queues.iter_mut().find(|q| q.qid() == qid)
    }

    fn find(queues: &mut [Queue], qid: u16) -> &mut Queue {
        queues
            .iter_mut()
            .find(|q| q.qid() == qid)
            .unwrap_or_else(|| panic!("queue id {qid} not open"))
    }

    /// Compile a memory-engine transaction onto queue `qid`.
    pub fn prepare_mem(&mut self, qid: u16, txn: &mut MemTransaction<'_>) -> UdmaResult<u32> {
        mem::prepare(Self::find(&mut self.queues, qid), &self.regs, txn)
    }

    /// Compile a crypto-engine transaction onto queue `qid`.
    pub fn prepare_crypto(
        &mut self,
        qid: u16,
        txn: &mut CryptoTransaction<'_>,
    ) -> UdmaResult<u32> {
        crypto::prepare(Self::find(&mut self.queues, qid), &self.regs, txn)
    }

    /// Compile a message transaction onto queue `qid`.
    pub fn prepare_msg(&mut self, qid: u16, txn: &mut MsgTransaction<'_>) -> UdmaResult<u32> {
        msg::prepare(Self::find(&mut self.queues, qid), &self.regs, txn)
    }

    /// Ring the submission doorbell for `n` prepared descriptors; several
    /// prepared transactions may be batched under one call.
    pub fn submit(&mut self, qid: u16, n: u32) {
        Self::find(&mut self.queues, qid).submit(n, &self.regs);
    }

    /// Poll for the next completed packet on queue `qid`.
    pub fn poll(&mut self, qid: u16) -> Option<CompletedPacket> {
        Self::find(&mut self.queues, qid).poll()
    }

    /// Release `n` completion descriptors on queue `qid`.
    pub fn acknowledge(&mut self, qid: u16, n: u32) {
        Self::find(&mut self.queues, qid).acknowledge(n);
    }
}

impl<R: RegisterIo> Drop for UdmaEngine<R> {
    fn drop(&mut self) {
        self.regs.write32_relaxed(layout::INT_MASK_SET, !0);
        log::debug!("engine down, {} queue(s) dropped", self.queues.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DmaBuf;
    use crate::opcode::MemOpcode;
    use crate::queue::{EngineRev, QueueType};
    use crate::sim::{QueueMem, SimDevice, SimRegs};

    #[test]
    fn test_interrupts_start_masked_and_track_queues() {
        let mem = QueueMem::alloc(32, 16);
        let mut engine = UdmaEngine::new(SimRegs::new());
        assert_eq!(engine.int_mask(), !0);

        let cfg = mem.config(3, QueueType::MemCrc, EngineRev::Rev1, None);
        engine.add_queue(&cfg).unwrap();
        assert_eq!(engine.int_mask() & 1 << 3, 0);

        engine.mask_queue(3);
        assert_ne!(engine.int_mask() & 1 << 3, 0);
    }

    #[test]
    fn test_add_queue_programs_and_enables_block() {
        let mem = QueueMem::alloc(64, 16);
        let mut engine = UdmaEngine::new(SimRegs::new());
        let cfg = mem.config(1, QueueType::MemCrc, EngineRev::Rev2, None);
        engine.add_queue(&cfg).unwrap();

        let qr = QueueRegs::new(1);
        assert_eq!(engine.regs().read32(qr.reg(layout::RING_SIZE)), 6);
        assert_eq!(
            engine.regs().read32(qr.reg(layout::QUEUE_CTRL)),
            layout::QUEUE_CTRL_ENABLE
        );
        assert_eq!(
            engine.regs().read32(qr.reg(layout::TX_DESC_BASE_LO)),
            cfg.tx_desc.phys as u32
        );
    }

    #[test]
    fn test_duplicate_queue_id_rejected() {
        let mem = QueueMem::alloc(32, 16);
        let mut engine = UdmaEngine::new(SimRegs::new());
        let cfg = mem.config(2, QueueType::MemCrc, EngineRev::Rev1, None);
        engine.add_queue(&cfg).unwrap();
        assert!(engine.add_queue(&cfg).is_err());
    }

    #[test]
    fn test_failed_bring_up_leaves_block_disabled() {
        let mem = QueueMem::alloc(32, 16);
        let mut engine = UdmaEngine::new(SimRegs::new());
        let mut cfg = mem.config(5, QueueType::MemCrc, EngineRev::Rev1, None);
        cfg.comp_elem_size = 12; // rejected by the ring layer
        assert!(engine.add_queue(&cfg).is_err());

        let qr = QueueRegs::new(5);
        assert_eq!(engine.regs().read32(qr.reg(layout::QUEUE_CTRL)), 0);
        assert_ne!(engine.int_mask() & 1 << 5, 0);
        assert!(engine.queue_mut(5).is_none());
    }

    #[test]
    fn test_four_call_flow_through_facade() {
        let mem = QueueMem::alloc(32, 16);
        let mut engine = UdmaEngine::new(SimRegs::new());
        let cfg = mem.config(0, QueueType::MemCrc, EngineRev::Rev1, Some(0));
        engine.add_queue(&cfg).unwrap();
        let mut dev = SimDevice::new(&mem, 0, QueueType::MemCrc);

        let src = vec![0x5Au8; 128];
        let dst = vec![0u8; 128];
        let srcs = [DmaBuf::new(src.as_ptr() as u64, 128)];
        let dsts = [DmaBuf::new(dst.as_ptr() as u64, 128)];

        let mut txn = MemTransaction::new(MemOpcode::Copy, &srcs, &dsts);
        let used = engine.prepare_mem(0, &mut txn).unwrap();
        engine.submit(0, used);
        dev.process(engine.regs());

        let pkt = engine.poll(0).expect("completion");
        assert!(pkt.is_ok());
        assert_eq!(dst, src);
        engine.acknowledge(0, pkt.descs);

        engine.remove_queue(0).unwrap();
        assert!(engine.queue_mut(0).is_none());
    }

    #[test]
    #[should_panic(expected = "not open")]
    fn test_unknown_queue_id_is_fatal() {
        let mut engine = UdmaEngine::new(SimRegs::new());
        engine.submit(9, 1);
    }
}
