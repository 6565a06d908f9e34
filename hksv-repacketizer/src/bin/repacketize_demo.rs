//! Demo: drive a `Repacketizer` over a synthetic H.264 RTP stream and print
//! the sequence/marker/size of every packet it emits.
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

use bytes::Bytes;
use hksv_repacketizer::{CodecInfo, ExtensionHeader, Repacketizer, RtpHeader, RtpPacket};

fn synthetic_header(sequence_number: u16, timestamp: u32, marker: bool) -> RtpHeader {
    RtpHeader {
        version: 2,
        padding: false,
        extension: false,
        csrc_count: 0,
        marker,
        payload_type: 96,
        sequence_number,
        timestamp,
        ssrc: 0x1337_C0DE,
        csrc: Vec::new(),
        extension_header: None::<ExtensionHeader>,
    }
}

fn main() {
    armoricore_logging::init_console_logging("repacketize-demo", "info");

    let codec_info = CodecInfo {
        sps: Bytes::from_static(&[0x67, 0x42, 0x00, 0x1F]),
        pps: Bytes::from_static(&[0x68, 0xCE, 0x3C, 0x80]),
    };
    let mut repacketizer = Repacketizer::new(1100, codec_info);

    let mut idr_payload = vec![0x65u8];
    idr_payload.extend(std::iter::repeat(0xAB).take(4000));
    let idr = RtpPacket {
        header: synthetic_header(1, 90_000, true),
        payload: Bytes::from(idr_payload),
    };

    for packet in repacketizer.repacketize(&idr) {
        let parsed = RtpPacket::parse(&packet).expect("demo emits well-formed packets");
        tracing::info!(
            seq = parsed.header.sequence_number,
            marker = parsed.header.marker,
            size = parsed.payload.len(),
            "emitted packet"
        );
    }
}
