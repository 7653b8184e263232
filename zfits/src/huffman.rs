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

//! Huffman coding of little-endian 16-bit symbols.
//!
//! A coded payload starts with one `u32` length per stream, followed by the streams. Each stream
//! holds the symbol count, the code table and the bit-packed codes, least significant bit first.

use std::{cmp::Reverse, collections::BinaryHeap};

const MAX_CODE_BITS: usize = 64;
const MAX_CODES: u64 = 1 << 16;

/// The payload would not be smaller than the input, or the input is too short to code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Overflow;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
struct Code {
    bits: u64,
    len: u8,
}

enum Node {
    Leaf,
    Branch { zero: usize, one: usize },
}

/// Code `data` as `num_streams` equally long streams and append the payload to `out`.
///
/// Gives up with [`Overflow`] as soon as the payload grows past `limit` bytes.
pub(crate) fn compress(
    data: &[u8],
    num_streams: usize,
    limit: usize,
    out: &mut Vec<u8>,
) -> Result<(), Overflow> {
    let stream_len = data.len().checked_div(num_streams).ok_or(Overflow)?;
    if stream_len < 4 {
        return Err(Overflow);
    }
    let start = out.len();
    out.resize(start + 4 * num_streams, 0);

    for (i, stream) in data.chunks_exact(stream_len).take(num_streams).enumerate() {
        let before = out.len();
        compress_stream(stream, out)?;
        let len = u32::try_from(out.len() - before).map_err(|_| Overflow)?;
        out[start + 4 * i..start + 4 * i + 4].copy_from_slice(&len.to_le_bytes());
        if out.len() - start > limit {
            return Err(Overflow);
        }
    }
    Ok(())
}

fn compress_stream(samples: &[u8], out: &mut Vec<u8>) -> Result<(), Overflow> {
    let symbols: Vec<u16> = samples
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    if symbols.len() < 2 {
        return Err(Overflow);
    }

    let counts = count_symbols(&symbols);
    let codes = build_codes(&counts)?;

    out.extend_from_slice(&(symbols.len() as u64).to_le_bytes());
    out.extend_from_slice(&(counts.len() as u64).to_le_bytes());
    for (&(symbol, _), code) in counts.iter().zip(&codes) {
        out.extend_from_slice(&symbol.to_le_bytes());
        if counts.len() == 1 {
            return Ok(());
        }
        out.push(code.len);
        out.extend_from_slice(&code.bits.to_le_bytes()[..usize::from(code.len).div_ceil(8)]);
    }

    let mut pending: u128 = 0;
    let mut pending_bits = 0;
    for symbol in symbols {
        let Ok(i) = counts.binary_search_by_key(&symbol, |&(s, _)| s) else {
            return Err(Overflow);
        };
        let code = codes[i];
        pending |= u128::from(code.bits) << pending_bits;
        pending_bits += usize::from(code.len);
        while pending_bits >= 8 {
            out.push(pending as u8);
            pending >>= 8;
            pending_bits -= 8;
        }
    }
    if pending_bits > 0 {
        out.push(pending as u8);
    }
    Ok(())
}

/// Distinct symbols in ascending order with their frequencies.
fn count_symbols(symbols: &[u16]) -> Vec<(u16, u64)> {
    let mut sorted = symbols.to_vec();
    sorted.sort_unstable();
    let mut counts: Vec<(u16, u64)> = Vec::new();
    for symbol in sorted {
        match counts.last_mut() {
            Some((last, n)) if *last == symbol => *n += 1,
            _ => counts.push((symbol, 1)),
        }
    }
    counts
}

/// Codes for `counts`, in the same order.
///
/// The two least frequent nodes are merged first. Among equal frequencies the node created
/// earlier wins, and the less frequent of the pair takes the `1` branch.
fn build_codes(counts: &[(u16, u64)]) -> Result<Vec<Code>, Overflow> {
    let mut nodes: Vec<Node> = counts.iter().map(|_| Node::Leaf).collect();
    let mut queue: BinaryHeap<Reverse<(u64, usize)>> = counts
        .iter()
        .enumerate()
        .map(|(i, &(_, n))| Reverse((n, i)))
        .collect();

    while queue.len() > 1 {
        let (Some(Reverse((n0, first))), Some(Reverse((n1, second)))) = (queue.pop(), queue.pop())
        else {
            return Err(Overflow);
        };
        nodes.push(Node::Branch {
            zero: second,
            one: first,
        });
        queue.push(Reverse((n0 + n1, nodes.len() - 1)));
    }

    let mut codes = vec![Code::default(); counts.len()];
    let Some(Reverse((_, root))) = queue.pop() else {
        return Err(Overflow);
    };
    let mut stack = vec![(root, 0u64, 0usize)];
    while let Some((node, bits, depth)) = stack.pop() {
        match nodes[node] {
            Node::Leaf => {
                codes[node] = Code {
                    bits,
                    len: depth.max(1) as u8,
                };
            }
            Node::Branch { zero, one } => {
                if depth >= MAX_CODE_BITS {
                    return Err(Overflow);
                }
                stack.push((zero, bits, depth + 1));
                stack.push((one, bits | (1 << depth), depth + 1));
            }
        }
    }
    Ok(codes)
}

#[derive(Clone, Copy, Default)]
struct TrieNode {
    children: [usize; 2],
    symbol: Option<u16>,
}

/// Decode a payload of `num_streams` streams of `stream_len` bytes each, appending to `out`.
pub(crate) fn decompress(
    payload: &[u8],
    num_streams: usize,
    stream_len: usize,
    out: &mut Vec<u8>,
) -> Result<(), &'static str> {
    let (table, mut rest) = split(payload, 4 * num_streams).ok_or("truncated length table")?;
    out.reserve(num_streams * stream_len);
    for len in table.chunks_exact(4) {
        let len = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;
        let (stream, tail) = split(rest, len).ok_or("stream runs past the block")?;
        decompress_stream(stream, stream_len / 2, out)?;
        rest = tail;
    }
    Ok(())
}

fn decompress_stream(
    stream: &[u8],
    expected: usize,
    out: &mut Vec<u8>,
) -> Result<(), &'static str> {
    let mut input = stream;
    let num_symbols = read_u64(&mut input)?;
    if num_symbols != expected as u64 {
        return Err("unexpected number of symbols");
    }
    let num_codes = read_u64(&mut input)?;
    if num_codes == 0 || num_codes > MAX_CODES {
        return Err("invalid number of codes");
    }

    if num_codes == 1 {
        let symbol = read_u16(&mut input)?.to_le_bytes();
        for _ in 0..expected {
            out.extend_from_slice(&symbol);
        }
        return Ok(());
    }

    let mut trie = vec![TrieNode::default()];
    for _ in 0..num_codes {
        let symbol = read_u16(&mut input)?;
        let (&len, tail) = input.split_first().ok_or("truncated code table")?;
        input = tail;
        let len = usize::from(len);
        if len == 0 || len > MAX_CODE_BITS {
            return Err("invalid code length");
        }
        let (raw, tail) = split(input, len.div_ceil(8)).ok_or("truncated code table")?;
        input = tail;
        let mut bytes = [0u8; 8];
        bytes[..raw.len()].copy_from_slice(raw);
        let bits = u64::from_le_bytes(bytes);

        let mut node = 0;
        for depth in 0..len {
            let bit = ((bits >> depth) & 1) as usize;
            node = match trie[node].children[bit] {
                0 => {
                    trie.push(TrieNode::default());
                    let child = trie.len() - 1;
                    trie[node].children[bit] = child;
                    child
                }
                child => child,
            };
            if trie[node].symbol.is_some() {
                return Err("ambiguous code table");
            }
        }
        if trie[node].children != [0, 0] {
            return Err("ambiguous code table");
        }
        trie[node].symbol = Some(symbol);
    }

    let mut bit = 0;
    for _ in 0..expected {
        let mut node = 0;
        let symbol = loop {
            if let Some(symbol) = trie[node].symbol {
                break symbol;
            }
            let byte = input.get(bit / 8).ok_or("truncated bit stream")?;
            let branch = usize::from((byte >> (bit % 8)) & 1);
            bit += 1;
            node = match trie[node].children[branch] {
                0 => return Err("unknown code"),
                child => child,
            };
        };
        out.extend_from_slice(&symbol.to_le_bytes());
    }
    Ok(())
}

fn split(bytes: &[u8], at: usize) -> Option<(&[u8], &[u8])> {
    (at <= bytes.len()).then(|| bytes.split_at(at))
}

fn read_u64(input: &mut &[u8]) -> Result<u64, &'static str> {
    let (head, tail) = split(input, 8).ok_or("truncated stream header")?;
    *input = tail;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(head);
    Ok(u64::from_le_bytes(bytes))
}

fn read_u16(input: &mut &[u8]) -> Result<u16, &'static str> {
    let (head, tail) = split(input, 2).ok_or("truncated code table")?;
    *input = tail;
    Ok(u16::from_le_bytes([head[0], head[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn samples(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn ties_prefer_the_earlier_node() {
        let codes = build_codes(&[(7, 1), (8, 1), (9, 2)]).unwrap();
        assert_eq!(
            codes,
            vec![
                Code { bits: 0b10, len: 2 },
                Code { bits: 0b00, len: 2 },
                Code { bits: 0b1, len: 1 },
            ]
        );
    }

    #[test]
    fn stream_layout_matches_the_camera_encoder() {
        // counts 1:5, 2:2, 3:1 give the codes 1 -> 0, 2 -> 01 and 3 -> 11, read LSB first
        let data = samples(&[1, 2, 3, 1, 2, 1, 1, 1]);
        let mut payload = Vec::new();
        compress(&data, 1, data.len() * 4, &mut payload).unwrap();

        #[rustfmt::skip]
        let expected = vec![
            30, 0, 0, 0,
            8, 0, 0, 0, 0, 0, 0, 0,
            3, 0, 0, 0, 0, 0, 0, 0,
            1, 0, 1, 0x00,
            2, 0, 2, 0x01,
            3, 0, 2, 0x03,
            0x5a, 0x00,
        ];
        assert_eq!(payload, expected);

        let mut decoded = Vec::new();
        decompress(&expected, 1, data.len(), &mut decoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn skewed_streams_shrink_and_decode() {
        let values: Vec<i16> = (0..4000).map(|i| [0, 0, 0, 1, -1, 0, 2, 0][i % 8]).collect();
        let data = samples(&values);

        let mut payload = Vec::new();
        compress(&data, 4, data.len(), &mut payload).unwrap();
        assert!(payload.len() < data.len() / 4, "{}", payload.len());

        let mut decoded = Vec::new();
        decompress(&payload, 4, data.len() / 4, &mut decoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn a_constant_stream_stores_only_its_symbol() {
        let data = samples(&[42; 100]);
        let mut payload = Vec::new();
        compress(&data, 1, data.len(), &mut payload).unwrap();
        assert_eq!(payload.len(), 4 + 8 + 8 + 2);

        let mut decoded = Vec::new();
        decompress(&payload, 1, data.len(), &mut decoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn short_streams_and_exceeded_limits_overflow() {
        let mut payload = Vec::new();
        assert_eq!(compress(&samples(&[1]), 1, 100, &mut payload), Err(Overflow));

        let data: Vec<u8> = (0..=255u8).collect();
        let mut payload = Vec::new();
        assert_eq!(compress(&data, 1, data.len(), &mut payload), Err(Overflow));
    }

    #[test]
    fn corrupt_payloads_are_rejected() {
        let data = samples(&[1, 2, 3, 1, 2, 1, 1, 1]);
        let mut payload = Vec::new();
        compress(&data, 1, data.len() * 4, &mut payload).unwrap();

        let mut out = Vec::new();
        assert!(decompress(&payload[..payload.len() - 1], 1, data.len(), &mut out).is_err());
        assert!(decompress(&payload, 1, data.len() + 2, &mut out).is_err());
        assert!(decompress(&payload[..3], 1, data.len(), &mut out).is_err());
    }
}
