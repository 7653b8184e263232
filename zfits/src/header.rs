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

//! Header cards: the 80-byte `KEY = value / comment` records that make up every FITS header.
//!
//! A [`HeaderCard`] is rendered once, when it is created, and never mutated afterwards. Setting a
//! key that already exists in a [`Header`] replaces the card at the same position.

use crate::{
    ZfitsResult,
    error::Details,
    util::{BLOCK_SIZE, CARD_SIZE},
};
use log::warn;
use std::{
    fmt,
    io::{self, Read},
};

/// Characters of a string value that fit between its quotes.
const MAX_STRING_LEN: usize = 68;

/// Keywords maintained by the writer itself.
const RESERVED_KEYWORDS: &[&str] = &[
    "BITPIX", "CHECKSUM", "DATASUM", "END", "EXTNAME", "GCOUNT", "PCOUNT", "NAXIS", "NAXIS1",
    "NAXIS2", "RAWSUM", "SIMPLE", "TFIELDS", "THEAP", "XTENSION", "ZHEAPPTR", "ZNAXIS1",
    "ZNAXIS2", "ZPCOUNT", "ZRATIO", "ZSHRINK", "ZTABLE", "ZTILELEN",
];

/// Keyword prefixes of the per-column keywords.
const RESERVED_PREFIXES: &[&str] = &["TFORM", "TUNIT", "TTYPE", "ZCTYP", "ZFORM"];

/// Keywords whose cards carry free text instead of a value.
const COMMENTARY_KEYWORDS: &[&str] = &["COMMENT", "HISTORY", ""];

/// Whether `key` is managed by the writer and therefore cannot be set by users.
pub fn is_reserved_keyword(key: &str) -> bool {
    RESERVED_KEYWORDS.contains(&key)
        || key
            .get(..5)
            .is_some_and(|prefix| RESERVED_PREFIXES.contains(&prefix))
}

/// The value of a header card.
#[derive(Clone, Debug, PartialEq)]
pub enum HeaderValue {
    Logical(bool),
    Integer(i64),
    Real(f64),
    String(String),
}

impl HeaderValue {
    fn render(&self) -> String {
        match self {
            HeaderValue::Logical(true) => "T".to_string(),
            HeaderValue::Logical(false) => "F".to_string(),
            HeaderValue::Integer(i) => i.to_string(),
            HeaderValue::Real(r) => format!("{r:?}").replace('e', "E"),
            HeaderValue::String(s) => {
                let quoted = format!("'{:<8}'", printable(s).replace('\'', "''"));
                format!("{quoted:<20}")
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HeaderValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HeaderValue::Logical(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::String(s) => f.write_str(s),
            other => f.write_str(&other.render()),
        }
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Logical(value)
    }
}

macro_rules! integer_value {
    ($($t:ty),*) => {
        $(impl From<$t> for HeaderValue {
            fn from(value: $t) -> Self {
                HeaderValue::Integer(i64::from(value))
            }
        })*
    };
}

integer_value!(i8, i16, i32, i64, u8, u16, u32);

/// Values beyond `i64::MAX` are written as reals.
macro_rules! unsigned_value {
    ($($t:ty),*) => {
        $(impl From<$t> for HeaderValue {
            fn from(value: $t) -> Self {
                i64::try_from(value).map_or(HeaderValue::Real(value as f64), HeaderValue::Integer)
            }
        })*
    };
}

unsigned_value!(u64, usize);

impl From<f32> for HeaderValue {
    fn from(value: f32) -> Self {
        HeaderValue::Real(value as f64)
    }
}

impl From<f64> for HeaderValue {
    fn from(value: f64) -> Self {
        HeaderValue::Real(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::String(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::String(value)
    }
}

/// One 80-byte header record.
#[derive(Clone, PartialEq)]
pub struct HeaderCard {
    key: String,
    value: Option<HeaderValue>,
    comment: String,
    image: [u8; CARD_SIZE],
}

impl HeaderCard {
    /// A `KEY = value / comment` card. Keys longer than 8 characters are truncated.
    pub fn new(key: &str, value: impl Into<HeaderValue>, comment: &str) -> Self {
        let key = printable(key).chars().take(8).collect::<String>();
        let value = match value.into() {
            HeaderValue::String(text) => {
                let fitted = fit_string(&text);
                if fitted.chars().count() < text.chars().count() {
                    warn!("Value of header keyword '{key}' cut to {} characters", fitted.len());
                }
                HeaderValue::String(fitted)
            }
            other => other,
        };
        let comment = printable(comment);

        let mut line = format!("{key:<8}= ");
        let rendered = value.render();
        if rendered.len() < 20 {
            line.push_str(&" ".repeat(20 - rendered.len()));
        }
        line.push_str(&rendered[..rendered.len().min(70)]);
        if line.len() < 77 {
            line.push_str(" / ");
            let room = CARD_SIZE - line.len();
            line.push_str(&comment[..comment.len().min(room)]);
        }

        Self {
            image: card_image(&line),
            key,
            value: Some(value),
            comment,
        }
    }

    /// A `COMMENT` or `HISTORY` card holding free text.
    pub fn commentary(key: &str, text: &str) -> Self {
        let key = printable(key).chars().take(8).collect::<String>();
        let text = printable(text);
        let line = format!("{key:<10}{text}");
        Self {
            image: card_image(&line),
            key,
            value: None,
            comment: text,
        }
    }

    /// The `END` card closing every header.
    pub fn end() -> Self {
        Self {
            image: card_image("END"),
            key: "END".to_string(),
            value: None,
            comment: String::new(),
        }
    }

    /// Parse one 80-byte card.
    pub fn parse(image: &[u8]) -> ZfitsResult<Self> {
        let line = std::str::from_utf8(image)
            .ok()
            .filter(|line| line.len() == CARD_SIZE && line.is_ascii())
            .ok_or_else(|| Details::InvalidCard(String::from_utf8_lossy(image).into_owned()))?;
        let key = line[..8].trim_end().to_string();

        if &line[8..10] != "= " || COMMENTARY_KEYWORDS.contains(&key.as_str()) {
            return Ok(Self {
                image: card_image(line),
                comment: line[8..].trim().to_string(),
                key,
                value: None,
            });
        }

        let (value, comment) = parse_value(&line[10..])
            .ok_or_else(|| Details::InvalidCard(line.to_string()))?;
        Ok(Self {
            image: card_image(line),
            key,
            value,
            comment,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Option<&HeaderValue> {
        self.value.as_ref()
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn as_bytes(&self) -> &[u8; CARD_SIZE] {
        &self.image
    }

    pub fn is_end(&self) -> bool {
        self.key == "END" && self.value.is_none()
    }

    /// The same card under another keyword.
    pub fn renamed(&self, key: &str) -> Self {
        match &self.value {
            Some(value) => HeaderCard::new(key, value.clone(), &self.comment),
            None => HeaderCard::commentary(key, &self.comment),
        }
    }
}

impl fmt::Debug for HeaderCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.image))
    }
}

fn printable(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect()
}

/// The longest prefix of `text` whose quoted form fits the 70 value columns of a card.
fn fit_string(text: &str) -> String {
    let mut fitted = String::new();
    let mut len = 0;
    for c in printable(text).chars() {
        len += if c == '\'' { 2 } else { 1 };
        if len > MAX_STRING_LEN {
            break;
        }
        fitted.push(c);
    }
    fitted
}

fn card_image(line: &str) -> [u8; CARD_SIZE] {
    let mut image = [b' '; CARD_SIZE];
    let n = line.len().min(CARD_SIZE);
    image[..n].copy_from_slice(&line.as_bytes()[..n]);
    image
}

/// Split the part of a card after `= ` into its value and comment.
fn parse_value(field: &str) -> Option<(Option<HeaderValue>, String)> {
    let trimmed = field.trim_start();
    if let Some(quoted) = trimmed.strip_prefix('\'') {
        let mut text = String::new();
        let mut chars = quoted.char_indices().peekable();
        let mut rest = None;
        while let Some((i, c)) = chars.next() {
            if c != '\'' {
                text.push(c);
                continue;
            }
            if chars.peek().is_some_and(|&(_, next)| next == '\'') {
                chars.next();
                text.push('\'');
                continue;
            }
            rest = Some(&quoted[i + 1..]);
            break;
        }
        let rest = rest?;
        let comment = rest
            .split_once('/')
            .map(|(_, c)| c.trim().to_string())
            .unwrap_or_default();
        return Some((
            Some(HeaderValue::String(text.trim_end().to_string())),
            comment,
        ));
    }

    let (token, comment) = match trimmed.split_once('/') {
        Some((token, comment)) => (token.trim(), comment.trim().to_string()),
        None => (trimmed.trim(), String::new()),
    };
    let value = match token {
        "" => None,
        "T" => Some(HeaderValue::Logical(true)),
        "F" => Some(HeaderValue::Logical(false)),
        _ => match token.parse::<i64>() {
            Ok(i) => Some(HeaderValue::Integer(i)),
            Err(_) => Some(HeaderValue::Real(token.replace('D', "E").parse().ok()?)),
        },
    };
    Some((value, comment))
}

/// An ordered list of header cards, without the closing `END`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Header {
    cards: Vec<HeaderCard>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cards(&self) -> &[HeaderCard] {
        &self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&HeaderCard> {
        self.position(key).map(|i| &self.cards[i])
    }

    fn position(&self, key: &str) -> Option<usize> {
        if COMMENTARY_KEYWORDS.contains(&key) {
            return None;
        }
        self.cards.iter().position(|card| card.key == key)
    }

    /// Append a card, or supersede the existing card with the same key in place. An empty
    /// comment inherits the comment of the superseded card.
    pub fn set(&mut self, card: HeaderCard) {
        match self.position(&card.key) {
            Some(i) => {
                let card = match (&card.value, card.comment.is_empty()) {
                    (Some(value), true) => {
                        HeaderCard::new(&card.key, value.clone(), &self.cards[i].comment)
                    }
                    _ => card,
                };
                self.cards[i] = card;
            }
            None => self.cards.push(card),
        }
    }

    /// Rename the card stored under `from`. Returns whether such a card existed.
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        match self.position(from) {
            Some(i) => {
                self.cards[i] = self.cards[i].renamed(to);
                true
            }
            None => false,
        }
    }

    /// Number of bytes [`render`](Self::render) produces.
    pub fn rendered_len(&self) -> usize {
        (self.cards.len() + 1).div_ceil(BLOCK_SIZE / CARD_SIZE) * BLOCK_SIZE
    }

    /// The cards, the `END` card and space padding up to the next block boundary.
    pub fn render(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.rendered_len());
        for card in &self.cards {
            out.extend_from_slice(card.as_bytes());
        }
        out.extend_from_slice(HeaderCard::end().as_bytes());
        out.resize(self.rendered_len(), b' ');
        out
    }

    /// Read cards block by block until the `END` card. Returns the header and the number of
    /// bytes consumed, always a multiple of the block size.
    pub fn read_from<R: Read>(reader: &mut R) -> ZfitsResult<(Self, usize)> {
        let mut header = Header::new();
        let mut block = vec![0u8; BLOCK_SIZE];
        let mut consumed = 0;
        loop {
            match reader.read_exact(&mut block) {
                Ok(()) => {}
                Err(e) if consumed > 0 && e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(Details::MissingEnd.into());
                }
                Err(e) => return Err(Details::ReadHeader(e).into()),
            }
            consumed += BLOCK_SIZE;
            for image in block.chunks_exact(CARD_SIZE) {
                let card = HeaderCard::parse(image)?;
                if card.is_end() {
                    return Ok((header, consumed));
                }
                if card.key.is_empty() && card.comment.is_empty() {
                    continue;
                }
                header.cards.push(card);
            }
        }
    }

    pub fn value(&self, key: &str) -> ZfitsResult<&HeaderValue> {
        self.get(key)
            .and_then(HeaderCard::value)
            .ok_or_else(|| Details::MissingKeyword(key.to_string()).into())
    }

    pub fn integer(&self, key: &str) -> ZfitsResult<i64> {
        let value = self.value(key)?;
        value.as_i64().ok_or_else(|| invalid(key, value))
    }

    /// A non-negative integer keyword as a size.
    pub fn size(&self, key: &str) -> ZfitsResult<usize> {
        let value = self.value(key)?;
        value
            .as_i64()
            .and_then(|i| usize::try_from(i).ok())
            .ok_or_else(|| invalid(key, value))
    }

    pub fn string(&self, key: &str) -> ZfitsResult<&str> {
        let value = self.value(key)?;
        value.as_str().ok_or_else(|| invalid(key, value))
    }

    pub fn logical(&self, key: &str) -> ZfitsResult<bool> {
        let value = self.value(key)?;
        value.as_bool().ok_or_else(|| invalid(key, value))
    }
}

fn invalid(key: &str, value: &HeaderValue) -> crate::Error {
    Details::InvalidKeyword {
        key: key.to_string(),
        value: value.to_string(),
    }
    .into()
}
