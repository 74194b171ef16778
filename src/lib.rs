// UDMA Descriptor-Ring Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! # UDMA Descriptor-Ring Engine
//!
//! Producer/consumer ring protocol between software and a DMA-capable
//! offload unit, plus the transaction compilers that turn high-level
//! requests (memory copy, checksum/CRC, encryption/authentication/
//! compression, RAID parity, inter-domain message forwarding) into the
//! fixed-layout descriptors the unit consumes.
//!
//! ## Layers
//!
//! - [`ring`]: the ring primitive: capacity tracking with a safety margin,
//!   wraparound with a rotating 2-bit ring-id, deferred doorbell commit,
//!   completion scanning and acknowledgment.
//! - [`descriptor`]: bit-exact codec for the 16-byte submission descriptor
//!   and the 8/16-byte completion descriptor, little-endian throughout.
//! - [`mem`], [`crypto`], [`msg`]: one transaction compiler per accelerator
//!   personality, all following the same two-pass count/encode algorithm.
//! - [`engine`]: the per-unit handle tying queues, registers and interrupt
//!   masks together.
//! - [`sim`]: a software model of the unit, used by the tests and benches
//!   and usable as a hardware-free backend.
//!
//! The crate never allocates or maps DMA memory and never blocks: callers
//! provide mapped ring memory and buffers, and "no space" is a result, not
//! a wait.
//!
//! ## Example
//!
//! ```rust
//! use udma_rust::buffer::DmaBuf;
//! use udma_rust::engine::UdmaEngine;
//! use udma_rust::mem::MemTransaction;
//! use udma_rust::opcode::MemOpcode;
//! use udma_rust::queue::{EngineRev, QueueType};
//! use udma_rust::sim::{QueueMem, SimDevice, SimRegs};
//!
//! let mem = QueueMem::alloc(32, 16);
//! let mut engine = UdmaEngine::new(SimRegs::new());
//! engine.add_queue(&mem.config(0, QueueType::MemCrc, EngineRev::Rev1, None)).unwrap();
//! let mut dev = SimDevice::new(&mem, 0, QueueType::MemCrc);
//!
//! let src = vec![7u8; 64];
//! let dst = vec![0u8; 64];
//! let srcs = [DmaBuf::new(src.as_ptr() as u64, 64)];
//! let dsts = [DmaBuf::new(dst.as_ptr() as u64, 64)];
//!
//! let mut txn = MemTransaction::new(MemOpcode::Copy, &srcs, &dsts);
//! let used = engine.prepare_mem(0, &mut txn).unwrap();
//! engine.submit(0, used);
//! dev.process(engine.regs());
//!
//! let pkt = engine.poll(0).unwrap();
//! assert!(pkt.is_ok());
//! engine.acknowledge(0, pkt.descs);
//! assert_eq!(dst, src);
//! ```

// Module declarations
#[cfg(target_os = "linux")]
pub mod bar;
pub mod buffer;
pub mod crypto;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod mem;
pub mod msg;
pub mod opcode;
pub mod queue;
pub mod regs;
pub mod ring;
pub mod sim;

// Re-exports for convenient access
pub use buffer::DmaBuf;
pub use descriptor::{CompDesc, CompError, CompFlags, SubDesc, SubFlags};
pub use engine::UdmaEngine;
pub use error::{UdmaError, UdmaResult};
pub use opcode::{CryptoOpcode, MemOpcode, MsgOpcode};
pub use queue::{EngineRev, Queue, QueueConfig, QueueType};
pub use ring::{CompletedPacket, Ring, RingIndex, RingMem};
