// UDMA Descriptor-Ring Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Transaction compiler for the crypto/compression engine.
//!
//! Every transaction references a security-association (SA) cache slot: a
//! hardware-resident table entry holding key/mode state, addressed by a
//! small index. A transaction may evict the currently cached entry (pushed
//! out to a caller buffer) and load a new one in the same packet. Extended
//! hash modes occupy 2, 4 or 8 contiguous cache lines, which scales the
//! buffer an SA push or evict must cover.
//!
//! # Metadata word (owned by this compiler)
//!
//! | Bits    | Field                                        |
//! |---------|----------------------------------------------|
//! | [31:28] | opcode ([`CryptoOpcode`])                    |
//! | [27]    | direction: 0 encrypt/generate, 1 decrypt/validate |
//! | [26]    | SA load (new association follows)            |
//! | [25]    | SA evict (cached association pushed out)     |
//! | [24]    | IV input present                             |
//! | [23]    | IV output requested                          |
//! | [22]    | signature input present (validate)           |
//! | [21]    | signature output requested (generate)        |
//! | [20]    | inline CRC output requested                  |
//! | [19]    | auth segment: first                          |
//! | [18]    | auth segment: last                           |
//! | [17]    | intermediate auth IV input present           |
//! | [16]    | intermediate auth IV output requested        |
//! | [15:8]  | SA cache index                               |
//! | [1:0]   | SA span: log2 of the cache lines occupied    |

use crate::buffer::DmaBuf;
use crate::descriptor::{SubFlags, MAX_DESC_LEN};
use crate::error::UdmaResult;
use crate::opcode::CryptoOpcode;
use crate::queue::{Queue, QueueType};
use crate::regs::RegisterIo;

pub(crate) const META_OPCODE_SHIFT: u32 = 28;
pub(crate) const META_DECRYPT: u32 = 1 << 27;
pub(crate) const META_SA_LOAD: u32 = 1 << 26;
pub(crate) const META_SA_EVICT: u32 = 1 << 25;
pub(crate) const META_IV_IN: u32 = 1 << 24;
pub(crate) const META_IV_OUT: u32 = 1 << 23;
pub(crate) const META_SIGN_IN: u32 = 1 << 22;
pub(crate) const META_SIGN_OUT: u32 = 1 << 21;
pub(crate) const META_CRC_OUT: u32 = 1 << 20;
pub(crate) const META_AUTH_FIRST: u32 = 1 << 19;
pub(crate) const META_AUTH_LAST: u32 = 1 << 18;
pub(crate) const META_AUTH_IV_IN: u32 = 1 << 17;
pub(crate) const META_AUTH_IV_OUT: u32 = 1 << 16;
pub(crate) const META_SA_INDEX_SHIFT: u32 = 8;

/// One SA cache line in bytes.
pub const SA_LINE_BYTES: u32 = 64;

/// Cache lines an SA entry spans. Extended hash modes need wider entries;
/// all lines of one entry are pushed and evicted together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SaSpan {
    One = 0,
    Two = 1,
    Four = 2,
    Eight = 3,
}

impl SaSpan {
    /// Number of cache lines.
    #[inline]
    pub const fn lines(self) -> u32 {
        1 << self as u32
    }

    /// Total entry size in bytes.
    #[inline]
    pub const fn bytes(self) -> u32 {
        self.lines() * SA_LINE_BYTES
    }
}

/// Cipher/authentication direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Encrypt / generate signature.
    Encrypt,
    /// Decrypt / validate signature.
    Decrypt,
}

/// Split-authentication control: one hash spread across several
/// transactions via first/last/neither segments with a carried byte count
/// and an intermediate digest buffer.
#[derive(Debug, Clone, Copy)]
pub struct AuthSegment {
    pub first: bool,
    pub last: bool,
    /// Bytes hashed so far, carried in the metadata descriptor.
    pub byte_count: u32,
    /// Intermediate digest in (required unless `first`).
    pub iv_in: Option<DmaBuf>,
    /// Intermediate digest out (required unless `last`).
    pub iv_out: Option<DmaBuf>,
}

/// A crypto-engine transaction. Short-lived; compiled by [`prepare`].
#[derive(Debug)]
pub struct CryptoTransaction<'a> {
    pub op: CryptoOpcode,
    pub direction: Direction,
    /// SA cache slot this transaction runs against.
    pub sa_index: u8,
    pub sa_span: SaSpan,
    /// New association to load into the cache slot.
    pub sa_in: Option<DmaBuf>,
    /// Where the evicted association is pushed (completion side).
    pub sa_out: Option<DmaBuf>,
    pub iv_in: Option<DmaBuf>,
    pub iv_out: Option<DmaBuf>,
    /// Expected signature for validation.
    pub sign_in: Option<DmaBuf>,
    /// Generated signature destination.
    pub sign_out: Option<DmaBuf>,
    /// Inline CRC over the payload.
    pub crc_out: Option<DmaBuf>,
    pub auth: Option<AuthSegment>,
    pub srcs: &'a [DmaBuf],
    pub dsts: &'a [DmaBuf],
    pub barrier: bool,
    pub no_snoop: bool,
    pub int_en: bool,
    /// Written back by [`prepare`].
    pub descs_used: u32,
}

impl<'a> CryptoTransaction<'a> {
    pub fn new(
        op: CryptoOpcode,
        direction: Direction,
        sa_index: u8,
        srcs: &'a [DmaBuf],
        dsts: &'a [DmaBuf],
    ) -> Self {
        Self {
            op,
            direction,
            sa_index,
            sa_span: SaSpan::One,
            sa_in: None,
            sa_out: None,
            iv_in: None,
            iv_out: None,
            sign_in: None,
            sign_out: None,
            crc_out: None,
            auth: None,
            srcs,
            dsts,
            barrier: false,
            no_snoop: false,
            int_en: false,
            descs_used: 0,
        }
    }

    fn needs_meta_desc(&self) -> bool {
        self.auth.is_some()
    }

    /// Submission-side descriptor count: the SA evict request, aux inputs,
    /// the optional metadata descriptor, then the sources.
    pub fn tx_count(&self) -> u32 {
        self.sa_out.is_some() as u32
            + self.sa_in.is_some() as u32
            + self.iv_in.is_some() as u32
            + self.auth.map_or(false, |a| a.iv_in.is_some()) as u32
            + self.sign_in.is_some() as u32
            + self.needs_meta_desc() as u32
            + self.srcs.len() as u32
    }

    /// Completion-side descriptor count; never zero.
    pub fn rx_count(&self) -> u32 {
        let n = self.dsts.len() as u32
            + self.sa_out.is_some() as u32
            + self.iv_out.is_some() as u32
            + self.sign_out.is_some() as u32
            + self.auth.map_or(false, |a| a.iv_out.is_some()) as u32
            + self.crc_out.is_some() as u32;
        n.max(1)
    }

    /// Contract checks. Violations indicate caller bugs and the hardware
    /// would silently misbehave on them, so they are fatal.
    fn validate_contract(&self) {
        assert!(!self.srcs.is_empty(), "crypto transaction without sources");
        // Signature direction bits are mutually exclusive: a generate-side
        // output and a validate-side input can never ride together.
        assert!(
            self.sign_in.is_none() || self.sign_out.is_none(),
            "signature input and output on one transaction"
        );
        match self.direction {
            Direction::Encrypt => assert!(
                self.sign_in.is_none(),
                "signature input on an encrypt/generate transaction"
            ),
            Direction::Decrypt => assert!(
                self.sign_out.is_none(),
                "signature output on a decrypt/validate transaction"
            ),
        }
        if let Some(sa) = &self.sa_in {
            assert_eq!(
                sa.len,
                self.sa_span.bytes(),
                "SA load buffer does not cover {} cache lines",
                self.sa_span.lines()
            );
        }
        if let Some(sa) = &self.sa_out {
            assert_eq!(
                sa.len,
                self.sa_span.bytes(),
                "SA evict buffer does not cover {} cache lines",
                self.sa_span.lines()
            );
        }
        if let Some(auth) = &self.auth {
            assert!(self.op.has_auth(), "auth segment on {}", self.op);
            assert!(
                auth.last || self.sign_out.is_none(),
                "signature buffer on a non-final auth segment"
            );
            assert!(
                auth.first || auth.iv_in.is_some(),
                "continuation auth segment without intermediate digest input"
            );
            assert!(
                auth.last || auth.iv_out.is_some(),
                "non-final auth segment without intermediate digest output"
            );
        }
        for buf in self.srcs.iter().chain(self.dsts.iter()) {
            assert!(
                buf.len > 0 && buf.len <= MAX_DESC_LEN,
                "buffer length {} outside 1..={MAX_DESC_LEN}",
                buf.len
            );
        }
    }

    fn meta_word(&self) -> u32 {
        let mut meta = (self.op.as_u8() as u32) << META_OPCODE_SHIFT
            | (self.sa_index as u32) << META_SA_INDEX_SHIFT
            | self.sa_span as u32;
        if self.direction == Direction::Decrypt {
            meta |= META_DECRYPT;
        }
        if self.sa_in.is_some() {
            meta |= META_SA_LOAD;
        }
        if self.sa_out.is_some() {
            meta |= META_SA_EVICT;
        }
        if self.iv_in.is_some() {
            meta |= META_IV_IN;
        }
        if self.iv_out.is_some() {
            meta |= META_IV_OUT;
        }
        if self.sign_in.is_some() {
            meta |= META_SIGN_IN;
        }
        if self.sign_out.is_some() {
            meta |= META_SIGN_OUT;
        }
        if self.crc_out.is_some() {
            meta |= META_CRC_OUT;
        }
        if let Some(auth) = &self.auth {
            if auth.first {
                meta |= META_AUTH_FIRST;
            }
            if auth.last {
                meta |= META_AUTH_LAST;
            }
            if auth.iv_in.is_some() {
                meta |= META_AUTH_IV_IN;
            }
            if auth.iv_out.is_some() {
                meta |= META_AUTH_IV_OUT;
            }
        }
        meta
    }
}

enum Piece {
    /// SA evict request: no buffer, the push lands completion-side.
    EvictReq,
    Aux(DmaBuf),
    Meta(u64),
    Src(DmaBuf),
}

/// Compile a crypto-engine transaction into ring descriptors.
///
/// Same two-pass contract as the memory compiler: counts checked against
/// both rings before any write, completion side filled and committed first,
/// submission doorbell deferred to [`Queue::submit`].
pub fn prepare(
    queue: &mut Queue,
    regs: &dyn RegisterIo,
    txn: &mut CryptoTransaction<'_>,
) -> UdmaResult<u32> {
    assert_eq!(
        queue.qtype(),
        QueueType::CryptoAuth,
        "crypto transaction {} on a {:?} queue",
        txn.op,
        queue.qtype()
    );
    txn.validate_contract();

    let tx_count = txn.tx_count();
    let rx_count = txn.rx_count();
    queue.reserve(tx_count, rx_count)?;

    // Completion side: destinations, then aux outputs in fixed order.
    let mut posted = 0;
    for dst in txn.dsts {
        queue.push_rx(dst);
        posted += 1;
    }
    for out in [
        &txn.sa_out,
        &txn.iv_out,
        &txn.sign_out,
        &txn.auth.as_ref().and_then(|a| a.iv_out),
        &txn.crc_out,
    ]
    .into_iter()
    .flatten()
    {
        queue.push_rx(out);
        posted += 1;
    }
    if posted == 0 {
        queue.push_rx_meta();
    }
    queue.commit_rx(rx_count, regs);

    // Submission side: evict request ahead of everything, then the aux
    // inputs, the metadata descriptor carrying the auth byte count, and the
    // source chain.
    let meta_word = txn.meta_word();
    let auth_bcnt = txn.auth.map(|a| a.byte_count as u64);
    let auth_iv_in = txn.auth.and_then(|a| a.iv_in);
    let evict = txn.sa_out.is_some().then_some(Piece::EvictReq);
    let pieces = evict
        .into_iter()
        .chain(txn.sa_in.iter().map(|b| Piece::Aux(*b)))
        .chain(txn.iv_in.iter().map(|b| Piece::Aux(*b)))
        .chain(auth_iv_in.iter().map(|b| Piece::Aux(*b)))
        .chain(txn.sign_in.iter().map(|b| Piece::Aux(*b)))
        .chain(auth_bcnt.iter().map(|w| Piece::Meta(*w)))
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
            Piece::EvictReq => queue.push_tx(flags | SubFlags::META, 0, meta, 0),
            Piece::Aux(b) | Piece::Src(b) => {
                queue.push_tx(flags, b.len as u16, meta, b.addr_word())
            }
            Piece::Meta(w) => queue.push_tx(flags | SubFlags::META, 0, meta, w),
        }
    }

    txn.descs_used = tx_count;
    Ok(tx_count)
}
