//! Error types for the H.264 RTP repacketizer
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


use thiserror::Error;

/// Result type for repacketizer operations
pub type RepacketizerResult<T> = Result<T, RepacketizerError>;

/// Errors that can occur while parsing wire data handed to the repacketizer.
///
/// Malformed pending-group state (NAL type mismatch, a gap in FU-A sequence
/// numbers, an oversized STAP-A aggregate) is *not* represented here: per the
/// repacketizer's error handling design those are recoverable in place, logged,
/// and never surfaced as a `Result::Err`. These variants are for bytes that
/// don't parse as what they claim to be.
#[derive(Error, Debug)]
pub enum RepacketizerError {
    /// RTP packet parsing error
    #[error("RTP packet parse error: {0}")]
    RtpParseError(String),

    /// H.264 NAL/STAP-A/FU-A framing error
    #[error("codec error: {0}")]
    CodecError(String),
}
