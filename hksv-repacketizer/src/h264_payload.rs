//! RFC 6184 - RTP Payload Format for H.264 Video
//!
//! Implements the repacketizer core: a stateful RTP→NAL→RTP transform that
//! rewrites an upstream H.264 RTP stream into packets bounded by a receiver's
//! `max_packet_size`, with SPS/PPS synthesized ahead of the first IDR and SEI
//! stripped, while keeping outgoing sequence numbers, timestamps, and the
//! marker bit self-consistent.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::{RepacketizerError, RepacketizerResult};
use crate::rtp_handler::RtpPacket;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::VecDeque;

const NAL_TYPE_SEI: u8 = 6;
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;
const NAL_TYPE_IDR: u8 = 5;
const NAL_TYPE_STAP_A: u8 = 24;
const NAL_TYPE_FU_A: u8 = 28;
const STAP_A_MAX_NALS: usize = 9;

/// H.264 NAL Unit Type (from RFC 6184)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    /// Unspecified
    Unspecified = 0,
    /// Non-IDR coded slice
    NonIdrSlice = 1,
    /// Coded slice data partition A
    DataPartitionA = 2,
    /// Coded slice data partition B
    DataPartitionB = 3,
    /// Coded slice data partition C
    DataPartitionC = 4,
    /// IDR (Instantaneous Decoder Refresh) coded slice
    IdrSlice = 5,
    /// SEI (Supplemental Enhancement Information)
    Sei = 6,
    /// SPS (Sequence Parameter Set)
    Sps = 7,
    /// PPS (Picture Parameter Set)
    Pps = 8,
    /// Access unit delimiter
    AccessUnitDelimiter = 9,
    /// End of sequence
    EndOfSequence = 10,
    /// End of stream
    EndOfStream = 11,
    /// Filler data
    Filler = 12,
    /// SPS extension
    SpsExtension = 13,
    /// Prefix NAL unit
    PrefixNal = 14,
    /// Subset SPS
    SubsetSps = 15,
    /// STAP-A (aggregation of multiple single-time NAL units)
    StapA = 24,
    /// FU-A (a fragment of one NAL unit)
    FuA = 28,
    /// Reserved / not modeled individually
    Reserved,
}

impl NalUnitType {
    /// Parse a NAL unit type from the low 5 bits of a NAL header byte
    pub fn from_byte(byte: u8) -> Self {
        match byte & 0x1F {
            0 => NalUnitType::Unspecified,
            1 => NalUnitType::NonIdrSlice,
            2 => NalUnitType::DataPartitionA,
            3 => NalUnitType::DataPartitionB,
            4 => NalUnitType::DataPartitionC,
            5 => NalUnitType::IdrSlice,
            6 => NalUnitType::Sei,
            7 => NalUnitType::Sps,
            8 => NalUnitType::Pps,
            9 => NalUnitType::AccessUnitDelimiter,
            10 => NalUnitType::EndOfSequence,
            11 => NalUnitType::EndOfStream,
            12 => NalUnitType::Filler,
            13 => NalUnitType::SpsExtension,
            14 => NalUnitType::PrefixNal,
            15 => NalUnitType::SubsetSps,
            24 => NalUnitType::StapA,
            28 => NalUnitType::FuA,
            _ => NalUnitType::Reserved,
        }
    }
}

/// SPS/PPS codec configuration, synthesized ahead of the first IDR when the
/// upstream stream doesn't carry it.
///
/// Either field may be empty, in which case synthesis is silently suppressed
/// (a configuration anomaly, not a fatal error — see the crate's error
/// handling design).
#[derive(Debug, Clone, Default)]
pub struct CodecInfo {
    /// Sequence Parameter Set NAL, header byte included
    pub sps: Bytes,
    /// Picture Parameter Set NAL, header byte included
    pub pps: Bytes,
}

impl CodecInfo {
    /// True if either half of the pair is missing
    pub fn is_empty(&self) -> bool {
        self.sps.is_empty() || self.pps.is_empty()
    }
}

/// Unpack a STAP-A payload into its constituent NAL units (RFC 6184 §5.7.1).
///
/// The first byte (the STAP-A header) is skipped; what follows is a sequence
/// of `[u16 big-endian length][nal bytes]` entries.
pub fn depacketize_stap_a(payload: &Bytes) -> RepacketizerResult<Vec<Bytes>> {
    let mut nals = Vec::new();
    let mut offset = 1usize;

    while offset < payload.len() {
        if offset + 2 > payload.len() {
            return Err(RepacketizerError::CodecError(
                "truncated stap-a length prefix".to_string(),
            ));
        }
        let len = u16::from_be_bytes([payload[offset], payload[offset + 1]]) as usize;
        offset += 2;
        if offset + len > payload.len() {
            return Err(RepacketizerError::CodecError(
                "truncated stap-a nal unit".to_string(),
            ));
        }
        nals.push(payload.slice(offset..offset + len));
        offset += len;
    }

    Ok(nals)
}

/// Pack as many NALs as fit from the front of `datas` into one STAP-A
/// payload (RFC 6184 §5.7.1), bounded by `max_packet_size` and a 9-NAL cap.
///
/// Degenerate case: if even a single NAL doesn't fit alongside the STAP-A
/// framing, that NAL is popped and returned bare, without STAP-A framing.
/// This is protocol-invalid but matches the upstream reference behavior
/// rather than silently switching that NAL to FU-A fragmentation (see
/// DESIGN.md).
pub fn packetize_one_stap_a(max_packet_size: usize, datas: &mut VecDeque<Bytes>) -> Bytes {
    let mut budget = max_packet_size.saturating_sub(1 + 2);
    let mut chosen: Vec<Bytes> = Vec::new();

    while let Some(front) = datas.front() {
        if chosen.len() >= STAP_A_MAX_NALS {
            break;
        }
        let needed = 2 + front.len();
        if needed > budget {
            if chosen.is_empty() {
                let raw = datas.pop_front().expect("front() just returned Some");
                tracing::warn!(size = raw.len(), "stap a packet is too large");
                return raw;
            }
            break;
        }
        let nal = datas.pop_front().expect("front() just returned Some");
        budget -= needed;
        chosen.push(nal);
    }

    let mut header = NAL_TYPE_STAP_A | (chosen[0][0] & 0xE0);
    for nal in &chosen {
        header |= nal[0] & 0x80;
        if (nal[0] & 0x60) > (header & 0x60) {
            header = (header & !0x60) | (nal[0] & 0x60);
        }
    }

    let total: usize = chosen.iter().map(|n| 2 + n.len()).sum();
    let mut buf = BytesMut::with_capacity(1 + total);
    buf.put_u8(header);
    for nal in &chosen {
        buf.put_u16(nal.len() as u16);
        buf.put_slice(nal);
    }
    buf.freeze()
}

/// Repeatedly aggregate `datas` into STAP-A packets until the queue is empty.
pub fn packetize_stap_a(max_packet_size: usize, datas: &mut VecDeque<Bytes>) -> Vec<Bytes> {
    let mut out = Vec::new();
    while !datas.is_empty() {
        out.push(packetize_one_stap_a(max_packet_size, datas));
    }
    out
}

/// Fragment (or re-fragment) a whole NAL unit into FU-A packets (RFC 6184
/// §5.8), each bounded by `fua_max` payload bytes (excluding the 2-byte FU
/// indicator/header).
///
/// `data` normally begins with a NAL header byte. If it instead begins with
/// an FU-A header (type 28) — the "fat fragment" fast path hands its raw
/// wire bytes straight back in here — the original NAL header and start/end
/// bits are reconstituted from it first, and the caller's `no_start`/
/// `no_end` are overridden by what that fragment's own bits say.
///
/// The remainder (after the NAL header byte) is split into
/// `ceil(len / fua_max)` chunks whose sizes differ by at most one byte, the
/// larger chunks coming first — this spreads the remainder evenly rather
/// than piling it onto the last fragment.
pub fn packetize_fua(fua_max: usize, data: &Bytes, no_start: bool, no_end: bool) -> Vec<Bytes> {
    let (nal_header, payload, no_start, no_end) = if (data[0] & 0x1F) == NAL_TYPE_FU_A {
        let fu_header = data[1];
        let had_start = fu_header & 0x80 != 0;
        let had_end = fu_header & 0x40 != 0;
        let header_byte = (data[0] & 0xE0) | (fu_header & 0x1F);
        (header_byte, data.slice(2..), !had_start, !had_end)
    } else {
        (data[0], data.slice(1..), no_start, no_end)
    };

    let payload_size = payload.len();
    let num_packets = payload_size.div_ceil(fua_max).max(1);
    let chunk = payload_size / num_packets;
    let num_larger = payload_size % num_packets;

    let mut fragments = Vec::with_capacity(num_packets);
    let mut offset = 0;
    for i in 0..num_packets {
        let size = if i < num_larger { chunk + 1 } else { chunk };
        let is_start = i == 0 && !no_start;
        let is_end = i == num_packets - 1 && !no_end;

        let fu_indicator = (nal_header & 0xE0) | NAL_TYPE_FU_A;
        let mut fu_header = nal_header & 0x1F;
        if is_start {
            fu_header |= 0x80;
        }
        if is_end {
            fu_header |= 0x40;
        }

        let mut buf = BytesMut::with_capacity(2 + size);
        buf.put_u8(fu_indicator);
        buf.put_u8(fu_header);
        buf.put_slice(&payload[offset..offset + size]);
        fragments.push(buf.freeze());
        offset += size;
    }
    fragments
}

/// A stateful RTP→NAL→RTP repacketizer for one H.264 stream.
///
/// Owns `pending_fu_a`/`pending_stap_a` accumulators keyed implicitly by the
/// RTP timestamp of their first member, and an `extra_packets` counter that
/// keeps emitted sequence numbers consistent across insertions (SPS/PPS
/// synthesis, re-fragmentation) and drops (SEI, unknown NAL types).
///
/// Not thread-safe and not meant to be: one instance per stream, called
/// synchronously from whatever owns the RTP receive loop.
pub struct Repacketizer {
    max_packet_size: usize,
    fua_max: usize,
    extra_packets: i64,
    seen_sps: bool,
    pending_fu_a: Option<Vec<RtpPacket>>,
    pending_stap_a: Option<Vec<RtpPacket>>,
    codec_info: CodecInfo,
}

impl Repacketizer {
    /// Construct a repacketizer. `max_packet_size` bounds the *payload*
    /// length of emitted packets (the RTP header is not counted) and should
    /// be at least 3 to leave room for STAP-A framing; callers typically
    /// pass 1100-1300 for HKSV receivers.
    pub fn new(max_packet_size: usize, codec_info: CodecInfo) -> Self {
        Self {
            max_packet_size,
            fua_max: max_packet_size.saturating_sub(2),
            extra_packets: 0,
            seen_sps: false,
            pending_fu_a: None,
            pending_stap_a: None,
            codec_info,
        }
    }

    /// Repacketize one upstream RTP packet, returning zero or more
    /// serialized outgoing RTP packets. May return an empty vector while a
    /// STAP-A or FU-A group is being accumulated.
    pub fn repacketize(&mut self, packet: &RtpPacket) -> Vec<Bytes> {
        let mut out = Vec::new();

        if self.pending_timestamp_mismatch(&self.pending_fu_a, packet) {
            self.flush_pending_fu_a(&mut out);
        }
        if self.pending_timestamp_mismatch(&self.pending_stap_a, packet) {
            self.flush_pending_stap_a(&mut out);
        }

        if packet.payload.is_empty() {
            tracing::warn!("empty rtp payload, dropping");
            self.extra_packets -= 1;
            return out;
        }

        let nal_type = packet.payload[0] & 0x1F;
        match nal_type {
            NAL_TYPE_FU_A => self.handle_fua(packet, &mut out),
            NAL_TYPE_STAP_A => self.handle_stap_a(packet, &mut out),
            1..=23 => self.handle_single(packet, &mut out),
            other => {
                tracing::warn!(nal_type = other, "unknown nal unit type");
                self.extra_packets -= 1;
            }
        }

        out
    }

    fn pending_timestamp_mismatch(
        &self,
        pending: &Option<Vec<RtpPacket>>,
        packet: &RtpPacket,
    ) -> bool {
        match pending.as_ref().and_then(|p| p.first()) {
            Some(first) => first.header.timestamp != packet.header.timestamp,
            None => false,
        }
    }

    // ---- single NAL path (§4.2) ----

    fn handle_single(&mut self, packet: &RtpPacket, out: &mut Vec<Bytes>) {
        self.flush_pending_fu_a(out);

        let nal_type = packet.payload[0] & 0x1F;
        if nal_type == NAL_TYPE_SPS || nal_type == NAL_TYPE_PPS {
            if nal_type == NAL_TYPE_SPS {
                self.seen_sps = true;
            }
            self.pending_stap_a
                .get_or_insert_with(Vec::new)
                .push(packet.clone());
            return;
        }

        self.flush_pending_stap_a(out);

        if nal_type == NAL_TYPE_SEI {
            self.extra_packets -= 1;
            return;
        }

        if nal_type == NAL_TYPE_IDR && !self.seen_sps {
            self.maybe_send_sps_pps(packet, out);
        }

        if packet.payload.len() > self.max_packet_size {
            let fragments = self.packetize_fua(&packet.payload, false, false);
            self.create_rtp_packets(packet, fragments, out, packet.header.marker);
        } else {
            self.create_rtp_packets(
                packet,
                vec![packet.payload.clone()],
                out,
                packet.header.marker,
            );
        }
    }

    // ---- FU-A engine (§4.3) ----

    fn packetize_fua(&self, data: &Bytes, no_start: bool, no_end: bool) -> Vec<Bytes> {
        packetize_fua(self.fua_max, data, no_start, no_end)
    }

    fn handle_fua(&mut self, packet: &RtpPacket, out: &mut Vec<Bytes>) {
        self.flush_pending_stap_a(out);

        if packet.payload.len() < 2 {
            tracing::warn!("fu-a packet too short, dropping");
            self.extra_packets -= 1;
            return;
        }

        let fu_header = packet.payload[1];
        let is_start = fu_header & 0x80 != 0;
        let is_end = fu_header & 0x40 != 0;
        let original_nal_type = fu_header & 0x1F;

        if is_start && original_nal_type == NAL_TYPE_IDR && !self.seen_sps {
            self.maybe_send_sps_pps(packet, out);
        }

        if self.pending_fu_a.is_none() {
            if packet.payload.len() >= 2 * self.max_packet_size {
                let fragments = self.packetize_fua(&packet.payload, false, false);
                self.create_rtp_packets(packet, fragments, out, packet.header.marker);
                return;
            }
            self.pending_fu_a = Some(Vec::new());
        }

        self.pending_fu_a
            .as_mut()
            .expect("just ensured Some")
            .push(packet.clone());

        if is_end {
            self.flush_pending_fu_a(out);
        }
    }

    fn flush_pending_fu_a(&mut self, out: &mut Vec<Bytes>) {
        let Some(pending) = self.pending_fu_a.take() else {
            return;
        };
        if pending.is_empty() {
            return;
        }

        if pending
            .iter()
            .any(|p| p.payload.len() < 2)
        {
            tracing::error!("fua packet is missing. skipping refragmentation.");
            return;
        }

        let expected_type = pending[0].payload[1] & 0x1F;
        if pending.iter().any(|p| (p.payload[1] & 0x1F) != expected_type) {
            tracing::error!("nal type mismatch");
            return;
        }

        let mut prev_seq = pending[0].header.sequence_number;
        for p in &pending[1..] {
            if p.header.sequence_number != prev_seq.wrapping_add(1) {
                tracing::error!("fua packet is missing. skipping refragmentation.");
                return;
            }
            prev_seq = p.header.sequence_number;
        }

        let first = pending[0].clone();
        let last = pending.last().expect("checked non-empty").clone();
        let has_start = first.payload[1] & 0x80 != 0;
        let has_end = last.payload[1] & 0x40 != 0;
        let header_byte = (first.payload[0] & 0xE0) | (first.payload[1] & 0x1F);

        let body_len: usize = pending.iter().map(|p| p.payload.len() - 2).sum();
        let mut defrag = BytesMut::with_capacity(1 + body_len);
        defrag.put_u8(header_byte);
        for p in &pending {
            defrag.put_slice(&p.payload[2..]);
        }

        let fragments = self.packetize_fua(&defrag.freeze(), !has_start, !has_end);
        let marker = last.header.marker;
        self.create_rtp_packets(&first, fragments, out, marker);
        self.extra_packets -= pending.len() as i64 - 1;
    }

    // ---- STAP-A engine (§4.4) ----

    fn handle_stap_a(&mut self, packet: &RtpPacket, out: &mut Vec<Bytes>) {
        self.flush_pending_fu_a(out);

        let nals = match depacketize_stap_a(&packet.payload) {
            Ok(nals) => nals,
            Err(err) => {
                tracing::error!(%err, "failed to depacketize stap-a");
                self.extra_packets -= 1;
                return;
            }
        };

        let mut kept: VecDeque<Bytes> = VecDeque::new();
        for nal in nals {
            if nal.is_empty() {
                continue;
            }
            let nal_type = nal[0] & 0x1F;
            if nal_type == NAL_TYPE_SEI {
                continue;
            }
            if nal_type == NAL_TYPE_SPS {
                self.seen_sps = true;
            }
            kept.push_back(nal);
        }

        if kept.is_empty() {
            self.extra_packets -= 1;
            return;
        }

        let aggregates = packetize_stap_a(self.max_packet_size, &mut kept);
        self.create_rtp_packets(packet, aggregates, out, packet.header.marker);
    }

    fn flush_pending_stap_a(&mut self, out: &mut Vec<Bytes>) {
        let Some(pending) = self.pending_stap_a.take() else {
            return;
        };
        if pending.is_empty() {
            return;
        }

        let mut datas: VecDeque<Bytes> = pending.iter().map(|p| p.payload.clone()).collect();
        let mut aggregates = packetize_stap_a(self.max_packet_size, &mut datas);
        if aggregates.len() != 1 {
            tracing::error!(
                count = aggregates.len(),
                "expected only 1 packet for sps/pps stapa"
            );
            return;
        }

        let stap = aggregates.remove(0);
        let template = pending[0].clone();
        let marker = template.header.marker;
        self.create_rtp_packets(&template, vec![stap], out, marker);
        self.extra_packets -= pending.len() as i64 - 1;
    }

    // ---- SPS/PPS synthesis (§4.5) ----

    fn maybe_send_sps_pps(&mut self, template: &RtpPacket, out: &mut Vec<Bytes>) {
        if self.codec_info.is_empty() {
            return;
        }

        let mut datas: VecDeque<Bytes> = VecDeque::new();
        datas.push_back(self.codec_info.sps.clone());
        datas.push_back(self.codec_info.pps.clone());
        let mut aggregates = packetize_stap_a(self.max_packet_size, &mut datas);
        if aggregates.len() != 1 {
            tracing::error!(
                count = aggregates.len(),
                "expected only 1 packet for sps/pps stapa"
            );
            return;
        }

        let stap = aggregates.remove(0);
        self.create_rtp_packets(template, vec![stap], out, false);
        self.extra_packets += 1;
    }

    // ---- sequence rewriter (§4.6) ----

    fn create_packet(&mut self, template: &RtpPacket, payload: Bytes, marker: bool) -> Bytes {
        if payload.len() > self.max_packet_size {
            tracing::warn!(
                size = payload.len(),
                max = self.max_packet_size,
                "packet exceeded max packet size."
            );
        }

        let sequence_number =
            (template.header.sequence_number as i64 + self.extra_packets).rem_euclid(65536) as u16;

        let mut header = template.header.clone();
        header.sequence_number = sequence_number;
        header.marker = marker;

        let packet = RtpPacket {
            header,
            payload,
        };
        packet.serialize().freeze()
    }

    fn create_rtp_packets(
        &mut self,
        template: &RtpPacket,
        chunks: Vec<Bytes>,
        out: &mut Vec<Bytes>,
        had_marker: bool,
    ) {
        let len = chunks.len();
        for (i, chunk) in chunks.into_iter().enumerate() {
            if i != 0 {
                self.extra_packets += 1;
            }
            let marker = had_marker && i == len - 1;
            out.push(self.create_packet(template, chunk, marker));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp_handler::RtpHeader;

    fn header(seq: u16, ts: u32, marker: bool) -> RtpHeader {
        RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker,
            payload_type: 96,
            sequence_number: seq,
            timestamp: ts,
            ssrc: 0xCAFEBABE,
            csrc: vec![],
            extension_header: None,
        }
    }

    fn single_nal_packet(seq: u16, ts: u32, marker: bool, payload: Bytes) -> RtpPacket {
        RtpPacket {
            header: header(seq, ts, marker),
            payload,
        }
    }

    fn parse_out(bytes: &Bytes) -> RtpPacket {
        RtpPacket::parse(bytes).unwrap()
    }

    #[test]
    fn nal_unit_type_from_byte() {
        assert_eq!(NalUnitType::from_byte(0x67), NalUnitType::Sps);
        assert_eq!(NalUnitType::from_byte(0x68), NalUnitType::Pps);
        assert_eq!(NalUnitType::from_byte(0x65), NalUnitType::IdrSlice);
        assert_eq!(NalUnitType::from_byte(0x06), NalUnitType::Sei);
    }

    #[test]
    fn stap_a_round_trip_with_real_sps_pps_bytes() {
        // A real baseline-profile SPS/PPS pair (as hex, the way codec fixtures
        // show up in SDP fmtp lines) rather than synthetic filler bytes.
        let sps = Bytes::from(hex::decode("67420029965281405fa6a0a0a0a1").unwrap());
        let pps = Bytes::from(hex::decode("68ce3c80").unwrap());

        let mut queue: VecDeque<Bytes> = VecDeque::from(vec![sps.clone(), pps.clone()]);
        let packed = packetize_one_stap_a(1200, &mut queue);
        assert!(queue.is_empty());

        let unpacked = depacketize_stap_a(&packed).unwrap();
        assert_eq!(unpacked, vec![sps, pps]);
    }

    #[test]
    fn stap_a_round_trip() {
        let nals = vec![
            Bytes::from_static(&[0x67, 1, 2, 3]),
            Bytes::from_static(&[0x68, 4, 5]),
            Bytes::from_static(&[0x41, 9, 9, 9, 9, 9]),
        ];
        let mut queue: VecDeque<Bytes> = nals.clone().into();
        let packed = packetize_one_stap_a(1200, &mut queue);
        assert!(queue.is_empty());

        let unpacked = depacketize_stap_a(&packed).unwrap();
        assert_eq!(unpacked, nals);
    }

    #[test]
    fn stap_a_caps_at_nine_nals() {
        let nals: Vec<Bytes> = (0..12)
            .map(|i| Bytes::from(vec![0x61, i as u8]))
            .collect();
        let mut queue: VecDeque<Bytes> = nals.into();
        let first = packetize_one_stap_a(1200, &mut queue);
        let unpacked = depacketize_stap_a(&first).unwrap();
        assert_eq!(unpacked.len(), 9);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn stap_a_degenerate_oversized_nal_returns_raw() {
        let big = Bytes::from(vec![0x67; 50]);
        let mut queue: VecDeque<Bytes> = VecDeque::from(vec![big.clone()]);
        let out = packetize_one_stap_a(10, &mut queue);
        assert_eq!(out, big);
        assert!(queue.is_empty());
    }

    #[test]
    fn fua_fragment_sizes_differ_by_at_most_one_byte() {
        let nal = Bytes::from(vec![0x65u8; 1996]); // header + 1995 bytes payload
        let fragments = packetize_fua(498, &nal, false, false);
        assert_eq!(fragments.len(), (1995usize).div_ceil(498));

        let sizes: Vec<usize> = fragments.iter().map(|f| f.len() - 2).collect();
        let max = *sizes.iter().max().unwrap();
        let min = *sizes.iter().min().unwrap();
        assert!(max - min <= 1);
        assert_eq!(sizes.iter().sum::<usize>(), 1995);

        assert_eq!(fragments[0][1] & 0x80, 0x80, "first fragment has start bit");
        assert_eq!(fragments[0][1] & 0x40, 0, "first fragment has no end bit");
        let last = fragments.last().unwrap();
        assert_eq!(last[1] & 0x40, 0x40, "last fragment has end bit");
        assert_eq!(last[1] & 0x80, 0, "last fragment has no start bit");
        for mid in &fragments[1..fragments.len() - 1] {
            assert_eq!(mid[1] & 0xC0, 0, "middle fragments have neither bit");
        }
    }

    #[test]
    fn fua_reconstitutes_header_from_fat_fragment() {
        // A single "fat" FU-A fragment carrying the whole (fictional) NAL body.
        let mut fat = BytesMut::new();
        fat.put_u8(0x7C); // FU indicator: F=0 NRI=3 type=28
        fat.put_u8(0xA5); // FU header: S=1 E=0 R=0 type=5 (IDR)
        fat.put_slice(&[0xAA; 2000]);
        let fat = fat.freeze();

        let fragments = packetize_fua(498, &fat, false, false);
        // start bit preserved from the source fragment's own S bit, not overridden false
        assert_eq!(fragments[0][1] & 0x80, 0x80);
        assert_eq!(fragments[0][1] & 0x1F, 5);
        assert_eq!(fragments[0][0] & 0xE0, 0x60); // NRI preserved
    }

    #[test]
    fn passthrough_small_single_nal_keeps_sequence_number() {
        let codec = CodecInfo::default();
        let mut rp = Repacketizer::new(1200, codec);
        let payload = Bytes::from(vec![0x61u8; 50]); // non-IDR slice
        let packet = single_nal_packet(100, 1000, true, payload.clone());

        let out = rp.repacketize(&packet);
        assert_eq!(out.len(), 1);
        let parsed = parse_out(&out[0]);
        assert_eq!(parsed.payload, payload);
        assert_eq!(parsed.header.sequence_number, 100);
        assert!(parsed.header.marker);
    }

    #[test]
    fn oversized_idr_prepends_sps_pps_then_fragments() {
        let codec = CodecInfo {
            sps: Bytes::from(vec![0x67; 20]),
            pps: Bytes::from(vec![0x68; 20]),
        };
        let mut rp = Repacketizer::new(1000, codec);

        let mut idr = BytesMut::new();
        idr.put_u8(0x65);
        idr.put_slice(&[0xAB; 3999]);
        let idr = idr.freeze();

        let packet = single_nal_packet(10, 5000, true, idr);
        let out = rp.repacketize(&packet);

        // first packet: synthesized SPS/PPS STAP-A, no marker, no seq jump yet
        let first = parse_out(&out[0]);
        assert_eq!(first.header.sequence_number, 10);
        assert!(!first.header.marker);
        assert_eq!(first.payload[0] & 0x1F, NAL_TYPE_STAP_A);

        // remaining packets: FU-A fragments of the IDR, contiguous sequence
        for (i, frag) in out[1..].iter().enumerate() {
            let parsed = parse_out(frag);
            assert_eq!(parsed.header.sequence_number, 10 + 1 + i as u16);
            assert_eq!(parsed.payload[0] & 0x1F, NAL_TYPE_FU_A);
        }

        let last = parse_out(out.last().unwrap());
        assert!(last.header.marker, "marker only on final fragment");
        for frag in &out[1..out.len() - 1] {
            assert!(!parse_out(frag).header.marker);
        }
    }

    #[test]
    fn sei_is_dropped_and_shifts_later_sequence_numbers() {
        let mut rp = Repacketizer::new(1200, CodecInfo::default());

        let sei = single_nal_packet(5, 100, false, Bytes::from(vec![0x06u8; 10]));
        let dropped = rp.repacketize(&sei);
        assert!(dropped.is_empty());

        let slice = single_nal_packet(6, 200, true, Bytes::from(vec![0x61u8; 10]));
        let out = rp.repacketize(&slice);
        assert_eq!(out.len(), 1);
        let parsed = parse_out(&out[0]);
        assert_eq!(parsed.header.sequence_number, 5); // shifted back by the drop
    }

    #[test]
    fn stap_a_input_strips_sei_and_marks_seen_sps() {
        let mut rp = Repacketizer::new(1200, CodecInfo::default());

        let sps = Bytes::from(vec![0x67, 1, 2]);
        let pps = Bytes::from(vec![0x68, 3, 4]);
        let sei = Bytes::from(vec![0x06; 30]);
        let slice = Bytes::from(vec![0x61; 40]);

        let mut datas: VecDeque<Bytes> =
            VecDeque::from(vec![sps.clone(), pps.clone(), sei, slice.clone()]);
        let stap = packetize_one_stap_a(1200, &mut datas);

        let packet = single_nal_packet(1, 42, true, stap);
        let out = rp.repacketize(&packet);
        assert_eq!(out.len(), 1);

        let parsed = parse_out(&out[0]);
        let nals = depacketize_stap_a(&parsed.payload).unwrap();
        assert_eq!(nals, vec![sps, pps, slice]);
        assert!(rp.seen_sps);
    }

    #[test]
    fn fua_refragmentation_across_three_input_fragments() {
        let mut rp = Repacketizer::new(500, CodecInfo::default());

        fn fua_fragment(seq: u16, ts: u32, marker: bool, start: bool, end: bool, len: usize) -> RtpPacket {
            let mut buf = BytesMut::new();
            buf.put_u8(0x7C);
            let mut fu_header = 0x01u8; // type 1, non-IDR slice
            if start {
                fu_header |= 0x80;
            }
            if end {
                fu_header |= 0x40;
            }
            buf.put_u8(fu_header);
            buf.put_slice(&vec![0xEE; len]);
            single_nal_packet(seq, ts, marker, buf.freeze())
        }

        let p1 = fua_fragment(1, 777, false, true, false, 800);
        let p2 = fua_fragment(2, 777, false, false, false, 800);
        let p3 = fua_fragment(3, 777, true, false, true, 400);

        assert!(rp.repacketize(&p1).is_empty());
        assert!(rp.repacketize(&p2).is_empty());
        let out = rp.repacketize(&p3);

        assert!(!out.is_empty());
        for (i, frag) in out.iter().enumerate() {
            let parsed = parse_out(frag);
            assert_eq!(parsed.header.sequence_number, 1 + i as u16);
            assert_eq!(parsed.header.timestamp, 777);
            assert_eq!(parsed.payload[0] & 0x1F, NAL_TYPE_FU_A);
        }
        assert_eq!(parse_out(out[0]).payload[1] & 0x80, 0x80);
        assert_eq!(
            parse_out(out.last().unwrap()).payload[1] & 0x40,
            0x40
        );
        assert!(parse_out(out.last().unwrap()).header.marker);
    }

    #[test]
    fn fat_fua_fast_path_skips_buffering() {
        let mut rp = Repacketizer::new(500, CodecInfo::default());

        let mut buf = BytesMut::new();
        buf.put_u8(0x7C);
        buf.put_u8(0x81); // start bit, type 1
        buf.put_slice(&vec![0xEE; 1100]); // >= 2 * max_packet_size (500)
        let packet = single_nal_packet(1, 999, false, buf.freeze());

        let out = rp.repacketize(&packet);
        assert!(out.len() > 1);
        assert!(rp.pending_fu_a.is_none());
    }

    #[test]
    fn fua_nal_type_mismatch_drops_pending_group() {
        let mut rp = Repacketizer::new(500, CodecInfo::default());

        fn fua_fragment(seq: u16, nal_type: u8, start: bool, end: bool) -> RtpPacket {
            let mut buf = BytesMut::new();
            buf.put_u8(0x7C);
            let mut fu_header = nal_type;
            if start {
                fu_header |= 0x80;
            }
            if end {
                fu_header |= 0x40;
            }
            buf.put_u8(fu_header);
            buf.put_slice(&[0xEE; 100]);
            single_nal_packet(seq, 1, false, buf.freeze())
        }

        assert!(rp.repacketize(&fua_fragment(1, 1, true, false)).is_empty());
        // mismatched original NAL type (2 instead of 1) on the "end" fragment
        let out = rp.repacketize(&fua_fragment(2, 2, false, true));
        assert!(out.is_empty(), "mismatched group must be dropped silently");
    }
}
