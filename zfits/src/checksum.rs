// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! The FITS ones'-complement checksum and its 16-character ASCII encoding.
//!
//! The sum is kept as two 16-bit halves with end-around carry. Bytes are added according to
//! their position modulo 4, so feeding a stream in arbitrary chunks gives the same result as
//! feeding it at once.

use crate::header::{Header, HeaderCard};

/// Value written to `CHECKSUM` while the checksum itself is computed.
pub const CHECKSUM_PLACEHOLDER: &str = "0000000000000000";

const EXCLUDED: &[u8] = &[
    0x3a, 0x3b, 0x3c, 0x3d, 0x3e, 0x3f, 0x40, 0x5b, 0x5c, 0x5d, 0x5e, 0x5f, 0x60,
];

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checksum {
    hi: u64,
    lo: u64,
    position: u8,
}

impl Checksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, mut bytes: &[u8]) {
        while self.position != 0 {
            let Some((&byte, rest)) = bytes.split_first() else {
                break;
            };
            self.add_byte(byte);
            bytes = rest;
        }

        let words = bytes.chunks_exact(4);
        let tail = words.remainder();
        for word in words {
            self.hi += u64::from(u16::from_be_bytes([word[0], word[1]]));
            self.lo += u64::from(u16::from_be_bytes([word[2], word[3]]));
        }
        for &byte in tail {
            self.add_byte(byte);
        }
        self.fold();
    }

    fn add_byte(&mut self, byte: u8) {
        let byte = u64::from(byte);
        match self.position {
            0 => self.hi += byte << 8,
            1 => self.hi += byte,
            2 => self.lo += byte << 8,
            _ => self.lo += byte,
        }
        self.position = (self.position + 1) % 4;
    }

    fn fold(&mut self) {
        loop {
            let (hi_carry, lo_carry) = (self.hi >> 16, self.lo >> 16);
            if hi_carry == 0 && lo_carry == 0 {
                break;
            }
            self.hi = (self.hi & 0xffff) + lo_carry;
            self.lo = (self.lo & 0xffff) + hi_carry;
        }
    }

    /// Add the sum of a stream that continues this one. `other` must have been fed from a
    /// position aligned to 4 bytes of the combined stream.
    pub fn merge(&mut self, other: &Checksum) {
        self.hi += other.hi;
        self.lo += other.lo;
        self.position = other.position;
        self.fold();
    }

    pub fn value(&self) -> u32 {
        ((self.hi as u32) << 16) | self.lo as u32
    }

    /// The ASCII encoding of the complemented sum, as stored in `CHECKSUM`.
    pub fn encoded(&self) -> String {
        encode(!self.value())
    }
}

/// Seaman-Pence ASCII encoding of a 32-bit value.
pub fn encode(value: u32) -> String {
    let mut encoded = [0u8; 16];
    for (i, byte) in value.to_be_bytes().into_iter().enumerate() {
        let quotient = byte / 4 + b'0';
        let remainder = byte % 4;
        let mut ch = [quotient + remainder, quotient, quotient, quotient];
        loop {
            let mut adjusted = false;
            for &excluded in EXCLUDED {
                for j in [0, 2] {
                    if ch[j] == excluded || ch[j + 1] == excluded {
                        ch[j] += 1;
                        ch[j + 1] -= 1;
                        adjusted = true;
                    }
                }
            }
            if !adjusted {
                break;
            }
        }
        for (j, c) in ch.into_iter().enumerate() {
            encoded[4 * j + i] = c;
        }
    }
    encoded.rotate_right(1);
    encoded.iter().map(|&b| char::from(b)).collect()
}

/// Store `DATASUM` and the matching `CHECKSUM` in `header`, so that the HDU made of the rendered
/// header followed by data summing to `data` sums to all ones.
pub(crate) fn seal(header: &mut Header, data: &Checksum) {
    header.set(HeaderCard::new("DATASUM", format!("{:>10}", data.value()), ""));
    header.set(HeaderCard::new("CHECKSUM", CHECKSUM_PLACEHOLDER, ""));

    let mut sum = Checksum::new();
    sum.update(&header.render());
    sum.merge(data);
    header.set(HeaderCard::new("CHECKSUM", sum.encoded(), ""));
}
