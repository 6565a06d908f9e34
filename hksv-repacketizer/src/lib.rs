//! H.264 RTP repacketizer for HomeKit Secure Video receivers
//!
//! This crate rewrites an upstream H.264 RTP stream into packets bounded by
//! a receiver's `max_packet_size`, synthesizing SPS/PPS ahead of the first
//! IDR frame, stripping SEI, and re-fragmenting or re-aggregating NAL units
//! as needed while keeping sequence numbers, timestamps, and the marker bit
//! self-consistent across the rewrite.
//!
//! # Foundation
//!
//! The crate is split into:
//! - [`rtp_handler`] — RFC 3550 RTP packet parsing and serialization
//! - [`h264_payload`] — RFC 6184 H.264 payload framing and the
//!   [`h264_payload::Repacketizer`] state machine
//! - [`error`] — error types for malformed wire data
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


pub mod error;
pub mod h264_payload;
pub mod rtp_handler;

pub use error::{RepacketizerError, RepacketizerResult};
pub use h264_payload::{
    depacketize_stap_a, packetize_fua, packetize_one_stap_a, packetize_stap_a, CodecInfo,
    NalUnitType, Repacketizer,
};
pub use rtp_handler::{ExtensionHeader, RtpHeader, RtpPacket};
