// UDMA Descriptor-Ring Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Software model of the accelerator.
//!
//! [`SimDevice`] plays the hardware side of the ring contract: it observes
//! doorbell writes through a [`RegisterIo`], consumes submission descriptors
//! (checking their ring-id against its own generation counter), lands
//! results in the posted completion-side buffers and writes completion
//! descriptors with rotating ring-id and first/last flags, payload words
//! before the control word, exactly as the device would.
//!
//! The memory engine is executed for real (copy, fill, compare, CRC32 via
//! `crc32fast`, P parity). The crypto and message engines are modeled at the
//! protocol level: descriptor chains are parsed and answered faithfully, the
//! cipher transform is identity and the digest is a CRC32 stand-in.
//!
//! Buffer addresses are interpreted as host pointers (the model is
//! identity-mapped), with the target-id bits stripped first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::crypto as crypto_meta;
use crate::descriptor::{CompDesc, CompError, CompFlags, SubDesc, SubDescHw, SubFlags};
use crate::mem as mem_meta;
use crate::msg as msg_meta;
use crate::opcode::{CryptoOpcode, MemOpcode, MsgOpcode};
use crate::queue::{EngineRev, QueueConfig, QueueType};
use crate::regs::{QueueRegs, RegisterIo};
use crate::ring::{RingIndex, RingMem};

/// Low 48 bits of a descriptor address word; the rest is the target id.
const ADDR_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// Register window backed by plain memory, for driving queues without
/// hardware. Implements the same relaxed/ordered split as a real window.
pub struct SimRegs {
    cells: Vec<AtomicU32>,
}

impl SimRegs {
    pub fn new() -> Self {
        // Window covers the global registers plus all 32 queue blocks.
        Self {
            cells: (0..0x1000 / 4).map(|_| AtomicU32::new(0)).collect(),
        }
    }
}

impl Default for SimRegs {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterIo for SimRegs {
    fn read32(&self, off: usize) -> u32 {
        self.cells[off / 4].load(Ordering::Acquire)
    }

    fn write32_relaxed(&self, off: usize, val: u32) {
        self.cells[off / 4].store(val, Ordering::Release);
    }
}

/// Owned, identity-mapped ring memory for one queue pair: submission and
/// completion descriptor arrays for both directions.
pub struct QueueMem {
    _tx_desc: Vec<SubDescHw>,
    _tx_comp: Vec<u64>,
    _rx_desc: Vec<SubDescHw>,
    _rx_comp: Vec<u64>,
    tx_desc: *mut SubDescHw,
    tx_comp: *mut u8,
    rx_desc: *mut SubDescHw,
    rx_comp: *mut u8,
    size: u32,
    elem: usize,
}

// SAFETY: the raw pointers alias the owned Vecs above, which never
// reallocate after construction.
unsafe impl Send for QueueMem {}

impl QueueMem {
    /// Allocate ring memory for `size` descriptors per ring with
    /// `elem`-byte completion elements.
    pub fn alloc(size: u32, elem: usize) -> Self {
        let zero = SubDescHw {
            len_ctrl: 0,
            meta: 0,
            buf: 0,
        };
        let mut tx_desc = vec![zero; size as usize];
        // Completion memory is u64-backed so the 32-bit element accesses in
        // the codec stay aligned.
        let mut tx_comp = vec![0u64; size as usize * elem / 8];
        let mut rx_desc = vec![zero; size as usize];
        let mut rx_comp = vec![0u64; size as usize * elem / 8];
        let tx_desc_ptr = tx_desc.as_mut_ptr();
        let tx_comp_ptr = tx_comp.as_mut_ptr() as *mut u8;
        let rx_desc_ptr = rx_desc.as_mut_ptr();
        let rx_comp_ptr = rx_comp.as_mut_ptr() as *mut u8;
        Self {
            _tx_desc: tx_desc,
            _tx_comp: tx_comp,
            _rx_desc: rx_desc,
            _rx_comp: rx_comp,
            tx_desc: tx_desc_ptr,
            tx_comp: tx_comp_ptr,
            rx_desc: rx_desc_ptr,
            rx_comp: rx_comp_ptr,
            size,
            elem,
        }
    }

    /// Queue configuration over this memory. Physical addresses equal the
    /// virtual ones in the model.
    pub fn config(
        &self,
        qid: u16,
        qtype: QueueType,
        rev: EngineRev,
        safety_margin: Option<u32>,
    ) -> QueueConfig {
        let ring = |virt: *mut u8| RingMem {
            virt,
            phys: virt as u64,
        };
        QueueConfig {
            qid,
            qtype,
            rev,
            size: self.size,
            tx_desc: ring(self.tx_desc as *mut u8),
            tx_comp: ring(self.tx_comp),
            rx_desc: ring(self.rx_desc as *mut u8),
            rx_comp: ring(self.rx_comp),
            comp_elem_size: self.elem,
            safety_margin,
            max_descs_per_packet: None,
        }
    }

    /// Raw view of submission slot `i` (test inspection).
    pub fn tx_desc_slot(&self, i: usize) -> *const SubDescHw {
        assert!(i < self.size as usize);
        unsafe { self.tx_desc.add(i) }
    }

    /// Raw view of completion-side posted slot `i` (test inspection).
    pub fn rx_desc_slot(&self, i: usize) -> *const SubDescHw {
        assert!(i < self.size as usize);
        unsafe { self.rx_desc.add(i) }
    }
}

/// One output item of a processed packet, landing in posted buffers.
enum RxOut {
    /// Byte payload, spread over as many posted buffers as it needs.
    Data(Vec<u8>),
    /// Repeating 64-bit pattern written to exactly `count` posted buffers;
    /// fill carries the count in its metadata word.
    Splat(u64, u32),
    /// No data; consumes exactly one meta-only post.
    MetaOnly,
}

/// Device-side view of one queue pair.
pub struct SimDevice {
    qid: u16,
    qtype: QueueType,
    elem: usize,
    tx_desc: *const SubDescHw,
    tx_comp: *mut u8,
    rx_desc: *const SubDescHw,
    rx_comp: *mut u8,
    tx_head: RingIndex,
    tx_comp_prod: RingIndex,
    rx_head: RingIndex,
    rx_comp_prod: RingIndex,
    sa_cache: HashMap<u8, Vec<u8>>,
    /// Payloads forwarded by message packets, per destination id.
    pub delivered: Vec<(u16, Vec<u8>)>,
}

// SAFETY: same aliasing contract as Ring - the pointers target the
// QueueMem allocations, which the caller keeps alive.
unsafe impl Send for SimDevice {}

impl SimDevice {
    pub fn new(mem: &QueueMem, qid: u16, qtype: QueueType) -> Self {
        Self {
            qid,
            qtype,
            elem: mem.elem,
            tx_desc: mem.tx_desc,
            tx_comp: mem.tx_comp,
            rx_desc: mem.rx_desc,
            rx_comp: mem.rx_comp,
            tx_head: RingIndex::new(mem.size),
            tx_comp_prod: RingIndex::new(mem.size),
            rx_head: RingIndex::new(mem.size),
            rx_comp_prod: RingIndex::new(mem.size),
            sa_cache: HashMap::new(),
            delivered: Vec::new(),
        }
    }

    /// Consume every doorbelled submission packet; returns how many were
    /// processed. Call after [`crate::queue::Queue::submit`].
    pub fn process(&mut self, regs: &dyn RegisterIo) -> u32 {
        let qr = QueueRegs::new(self.qid);
        let tx_db = regs.read32(qr.sub_doorbell());
        let rx_db = regs.read32(qr.comp_doorbell());

        let mut processed = 0;
        while self.tx_head.pos() != tx_db {
            let mut descs = Vec::new();
            loop {
                assert!(
                    self.tx_head.pos() != tx_db,
                    "doorbell covers a truncated packet"
                );
                let d = unsafe {
                    SubDesc::read_from(self.tx_desc.add(self.tx_head.slot() as usize))
                };
                assert_eq!(
                    d.ring_id,
                    self.tx_head.ring_id(),
                    "submission descriptor ring-id out of generation"
                );
                if descs.is_empty() {
                    assert!(d.flags.contains(SubFlags::FIRST), "packet without first flag");
                } else {
                    assert!(d.flags.contains(SubFlags::CONCAT), "broken descriptor chain");
                }
                let last = d.flags.contains(SubFlags::LAST);
                descs.push(d);
                self.tx_head.advance();
                if last {
                    break;
                }
            }
            self.execute(&descs, rx_db);
            self.write_tx_completions(descs.len() as u32);
            processed += 1;
        }
        processed
    }

    fn execute(&mut self, descs: &[SubDesc], rx_db: u32) {
        let meta = descs[0].meta;
        match self.qtype {
            QueueType::CryptoAuth => self.exec_crypto(descs, meta, rx_db),
            QueueType::MemCrc if meta >> 26 == 0x3F => self.exec_msg(descs, meta, rx_db),
            QueueType::MemCrc | QueueType::Raid => self.exec_mem(descs, meta, rx_db),
        }
    }

    fn exec_mem(&mut self, descs: &[SubDesc], meta: u32, rx_db: u32) {
        let op = MemOpcode::from_u8((meta >> mem_meta::META_OPCODE_SHIFT) as u8)
            .expect("unknown memory opcode");

        let mut meta_payload = None;
        let mut data = Vec::new();
        for d in descs {
            if d.flags.contains(SubFlags::META) {
                meta_payload = Some(d.buf);
            } else {
                data.push(*d);
            }
        }
        let seed = if meta & mem_meta::META_SEED_IN != 0 {
            let b = buf_slice(&data.remove(0));
            u32::from_le_bytes(b[..4].try_into().unwrap())
        } else {
            0
        };
        let srcs: Vec<&[u8]> = data.iter().map(buf_slice).collect();

        match op {
            MemOpcode::Noop => {
                self.complete_rx(rx_db, vec![RxOut::MetaOnly], CompError::empty(), (0, 0));
            }
            MemOpcode::Copy => {
                let payload = srcs.concat();
                self.complete_rx(rx_db, vec![RxOut::Data(payload)], CompError::empty(), (0, 0));
            }
            MemOpcode::Fill => {
                let pattern = meta_payload.expect("fill without pattern descriptor");
                let count =
                    meta >> mem_meta::META_DST_COUNT_SHIFT & mem_meta::META_DST_COUNT_MASK;
                self.complete_rx(
                    rx_db,
                    vec![RxOut::Splat(pattern, count)],
                    CompError::empty(),
                    (0, 0),
                );
            }
            MemOpcode::Compare => {
                let a = srcs[0];
                let b: Vec<u8> = srcs[1..].concat();
                assert_eq!(a.len(), b.len(), "compare sources of unequal length");
                let diff = a.iter().zip(b.iter()).position(|(x, y)| x != y);
                let (status, result) = match diff {
                    Some(off) => (CompError::MISMATCH, (off as u32, 1)),
                    None => (CompError::empty(), (0, 0)),
                };
                self.complete_rx(rx_db, vec![RxOut::MetaOnly], status, result);
            }
            MemOpcode::Crc32 | MemOpcode::Checksum32 | MemOpcode::CopyCrc32 => {
                let payload = srcs.concat();
                let sum = match op {
                    MemOpcode::Checksum32 => payload
                        .iter()
                        .fold(seed, |acc, &b| acc.wrapping_add(b as u32)),
                    _ => {
                        let mut h = crc32fast::Hasher::new_with_initial(seed);
                        h.update(&payload);
                        h.finalize()
                    }
                };
                let mut outs = Vec::new();
                if op == MemOpcode::CopyCrc32 {
                    outs.push(RxOut::Data(payload));
                }
                if meta & mem_meta::META_CRC_OUT != 0 {
                    outs.push(RxOut::Data(sum.to_le_bytes().to_vec()));
                }
                if outs.is_empty() {
                    outs.push(RxOut::MetaOnly);
                }
                self.complete_rx(rx_db, outs, CompError::empty(), (sum, 0));
            }
            MemOpcode::ParityP => {
                let p = xor_sources(&srcs);
                self.complete_rx(rx_db, vec![RxOut::Data(p)], CompError::empty(), (0, 0));
            }
            MemOpcode::ParityQ => {
                // Q coefficient math lives in the unit; the model answers
                // the protocol with a zeroed syndrome.
                let q = vec![0u8; srcs[0].len()];
                self.complete_rx(rx_db, vec![RxOut::Data(q)], CompError::empty(), (0, 0));
            }
            MemOpcode::ParityPq => {
                let p = xor_sources(&srcs);
                let q = vec![0u8; srcs[0].len()];
                self.complete_rx(
                    rx_db,
                    vec![RxOut::Data(p), RxOut::Data(q)],
                    CompError::empty(),
                    (0, 0),
                );
            }
            MemOpcode::ValidateP => {
                // Parity holds iff the XOR over data and parity is zero.
                let x = xor_sources(&srcs);
                let status = if x.iter().any(|&b| b != 0) {
                    CompError::MISMATCH
                } else {
                    CompError::empty()
                };
                self.complete_rx(rx_db, vec![RxOut::MetaOnly], status, (0, 0));
            }
            MemOpcode::ValidateQ => {
                self.complete_rx(rx_db, vec![RxOut::MetaOnly], CompError::empty(), (0, 0));
            }
        }
    }

    fn exec_msg(&mut self, descs: &[SubDesc], meta: u32, rx_db: u32) {
        let op = MsgOpcode::from_u8((meta >> msg_meta::META_MSG_OP_SHIFT & 0x3) as u8)
            .expect("unknown message opcode");
        let dest = (meta & msg_meta::META_DEST_MASK) as u16;
        let payload: Vec<u8> = descs.iter().map(buf_slice).collect::<Vec<_>>().concat();
        log::trace!("sim queue {}: {} {} bytes to {dest}", self.qid, op.name(), payload.len());
        self.delivered.push((dest, payload));
        self.complete_rx(rx_db, vec![RxOut::MetaOnly], CompError::empty(), (0, 0));
    }

    fn exec_crypto(&mut self, descs: &[SubDesc], meta: u32, rx_db: u32) {
        let op = CryptoOpcode::from_u8((meta >> crypto_meta::META_OPCODE_SHIFT) as u8)
            .expect("unknown crypto opcode");

        // Control descriptors (evict request, auth byte count) carry META;
        // the data descriptors follow in the compiler's fixed order.
        let mut data: Vec<SubDesc> = descs
            .iter()
            .filter(|d| !d.flags.contains(SubFlags::META))
            .copied()
            .collect();
        let sa_in = (meta & crypto_meta::META_SA_LOAD != 0).then(|| data.remove(0));
        let iv_in = (meta & crypto_meta::META_IV_IN != 0).then(|| data.remove(0));
        let auth_iv_in = (meta & crypto_meta::META_AUTH_IV_IN != 0).then(|| data.remove(0));
        let sign_in = (meta & crypto_meta::META_SIGN_IN != 0).then(|| data.remove(0));
        let _ = (iv_in, auth_iv_in);

        let payload: Vec<u8> = data.iter().map(buf_slice).collect::<Vec<_>>().concat();
        let sa_index = (meta >> crypto_meta::META_SA_INDEX_SHIFT & 0xFF) as u8;
        let span_bytes = (crypto_meta::SA_LINE_BYTES << (meta & 0x3)) as usize;

        // CRC32 stands in for the real digest in the model.
        let digest = crc32fast::hash(&payload);
        let mut status = CompError::empty();
        if let Some(sig) = &sign_in {
            if buf_slice(sig)[..4] != digest.to_le_bytes() {
                status |= CompError::AUTH_FAIL;
            }
        }

        let evicted = (meta & crypto_meta::META_SA_EVICT != 0).then(|| {
            self.sa_cache
                .get(&sa_index)
                .cloned()
                .unwrap_or_else(|| vec![0u8; span_bytes])
        });
        if let Some(sa) = &sa_in {
            self.sa_cache.insert(sa_index, buf_slice(sa).to_vec());
        }

        // Outputs in the completion-side order the compiler posts buffers:
        // payload, evicted SA, IV, signature, intermediate digest, CRC.
        let mut outs = Vec::new();
        let produces_payload = !matches!(op, CryptoOpcode::Auth);
        if produces_payload && !payload.is_empty() {
            outs.push(RxOut::Data(payload.clone()));
        }
        if let Some(sa) = evicted {
            outs.push(RxOut::Data(sa));
        }
        if meta & crypto_meta::META_IV_OUT != 0 {
            outs.push(RxOut::Data(vec![0u8; 16]));
        }
        if meta & crypto_meta::META_SIGN_OUT != 0 {
            outs.push(RxOut::Data(digest.to_le_bytes().to_vec()));
        }
        if meta & crypto_meta::META_AUTH_IV_OUT != 0 {
            outs.push(RxOut::Data(digest.to_le_bytes().to_vec()));
        }
        if meta & crypto_meta::META_CRC_OUT != 0 {
            outs.push(RxOut::Data(digest.to_le_bytes().to_vec()));
        }
        if outs.is_empty() {
            outs.push(RxOut::MetaOnly);
        }
        self.complete_rx(rx_db, outs, status, (digest, 0));
    }

    /// Pop the next posted completion-side descriptor.
    fn take_rx(&mut self, rx_db: u32) -> SubDesc {
        assert!(
            self.rx_head.pos() != rx_db,
            "no completion-side descriptor posted for landing"
        );
        let d = unsafe { SubDesc::read_from(self.rx_desc.add(self.rx_head.slot() as usize)) };
        assert_eq!(
            d.ring_id,
            self.rx_head.ring_id(),
            "posted descriptor ring-id out of generation"
        );
        self.rx_head.advance();
        d
    }

    /// Land one packet's outputs and write its completion-descriptor run.
    fn complete_rx(&mut self, rx_db: u32, outs: Vec<RxOut>, status: CompError, result: (u32, u32)) {
        let mut records: Vec<(u16, bool)> = Vec::new();
        for out in &outs {
            match out {
                RxOut::MetaOnly => {
                    let d = self.take_rx(rx_db);
                    assert!(
                        d.flags.contains(SubFlags::META),
                        "meta-only completion needs a meta-only post"
                    );
                    records.push((0, false));
                }
                RxOut::Data(bytes) => {
                    let mut off = 0;
                    while off < bytes.len() {
                        let d = self.take_rx(rx_db);
                        assert!(!d.flags.contains(SubFlags::META) && d.len > 0);
                        let take = (bytes.len() - off).min(d.len as usize);
                        unsafe {
                            std::ptr::copy_nonoverlapping(
                                bytes.as_ptr().add(off),
                                (d.buf & ADDR_MASK) as *mut u8,
                                take,
                            );
                        }
                        records.push((take as u16, true));
                        off += take;
                    }
                }
                RxOut::Splat(pattern, count) => {
                    for _ in 0..*count {
                        let d = self.take_rx(rx_db);
                        splat(pattern.to_le_bytes(), (d.buf & ADDR_MASK) as *mut u8, d.len);
                        records.push((d.len, true));
                    }
                }
            }
        }

        assert!(!records.is_empty(), "a packet always completes with at least one descriptor");
        let n = records.len();
        for (i, (len, used)) in records.into_iter().enumerate() {
            let last = i == n - 1;
            let mut flags = CompFlags::empty();
            if i == 0 {
                flags |= CompFlags::FIRST;
            }
            if last {
                flags |= CompFlags::LAST;
            }
            if used {
                flags |= CompFlags::BUF_USED;
            }
            if !status.is_empty() {
                flags |= CompFlags::ERROR;
            }
            let desc = CompDesc {
                flags,
                ring_id: self.rx_comp_prod.ring_id(),
                status,
                len,
                word2: if last { result.0 } else { 0 },
                word3: if last { result.1 } else { 0 },
            };
            unsafe {
                desc.write_to(
                    self.rx_comp.add(self.rx_comp_prod.slot() as usize * self.elem),
                    self.elem,
                );
            }
            self.rx_comp_prod.advance();
        }
    }

    /// One submission-side completion descriptor per consumed slot, so the
    /// software side can reclaim its capacity.
    fn write_tx_completions(&mut self, n: u32) {
        for i in 0..n {
            let mut flags = CompFlags::empty();
            if i == 0 {
                flags |= CompFlags::FIRST;
            }
            if i == n - 1 {
                flags |= CompFlags::LAST;
            }
            let desc = CompDesc {
                flags,
                ring_id: self.tx_comp_prod.ring_id(),
                status: CompError::empty(),
                len: 0,
                word2: 0,
                word3: 0,
            };
            unsafe {
                desc.write_to(
                    self.tx_comp.add(self.tx_comp_prod.slot() as usize * self.elem),
                    self.elem,
                );
            }
            self.tx_comp_prod.advance();
        }
    }
}

/// Descriptor buffer as a host slice, target-id bits stripped.
fn buf_slice(d: &SubDesc) -> &'static [u8] {
    unsafe { std::slice::from_raw_parts((d.buf & ADDR_MASK) as *const u8, d.len as usize) }
}

fn xor_sources(srcs: &[&[u8]]) -> Vec<u8> {
    let mut out = srcs[0].to_vec();
    for s in &srcs[1..] {
        assert_eq!(s.len(), out.len(), "parity sources of unequal length");
        for (o, b) in out.iter_mut().zip(s.iter()) {
            *o ^= b;
        }
    }
    out
}

fn splat(pattern: [u8; 8], dst: *mut u8, len: u16) {
    let dst = unsafe { std::slice::from_raw_parts_mut(dst, len as usize) };
    for chunk in dst.chunks_exact_mut(8) {
        chunk.copy_from_slice(&pattern);
    }
    let rem = dst.len() % 8;
    if rem > 0 {
        let start = dst.len() - rem;
        dst[start..].copy_from_slice(&pattern[..rem]);
    }
}
