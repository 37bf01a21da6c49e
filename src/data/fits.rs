//! Minimal FITS codec.
//!
//! Writes and reads the subset of FITS used by the data packager: 80-byte
//! header cards in 2880-byte blocks, a one-dimensional `BITPIX = -64` primary
//! array, and `BINTABLE` extensions with fixed-width columns. All numbers are
//! big-endian.
//!
//! # Checksums
//!
//! [`Hdu::update_checksums`] adds the `DATASUM` and `CHECKSUM` keywords of the
//! FITS checksum convention: `DATASUM` is the 32-bit ones' complement sum of
//! the (padded) data, and `CHECKSUM` is a 16-character ASCII encoding chosen so
//! that the ones' complement sum of the entire HDU is `0xFFFFFFFF`.
//! [`verify`] checks both for every HDU in a byte stream.
//!
//! # Long strings
//!
//! String values that do not fit on one card are split with the `CONTINUE`
//! long-string convention: every chunk but the last ends in `&`, and the
//! following chunks sit on `CONTINUE` cards. [`FitsFile::parse`] joins them
//! back into a single value.

use std::fmt::Write as _;
use std::ops::Range;
use thiserror::Error;

/// Size of one FITS record.
pub const BLOCK_SIZE: usize = 2880;
/// Size of one header card.
pub const CARD_SIZE: usize = 80;
/// Longest string value that fits on a single card.
const MAX_STRING_LEN: usize = 68;
/// Keyword of a long-string continuation card.
const CONTINUE_KEYWORD: &str = "CONTINUE";
/// `CHECKSUM` placeholder used while summing the header.
const CHECKSUM_PLACEHOLDER: &str = "0000000000000000";

/// Errors from encoding, decoding or verifying FITS data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitsError {
    /// The stream ends inside an HDU.
    #[error("stream truncated at byte {offset}")]
    Truncated { offset: usize },

    /// No `END` card before the end of the stream.
    #[error("header starting at byte {offset} has no END card")]
    MissingEnd { offset: usize },

    /// A card could not be encoded or parsed.
    #[error("card {index} is malformed: {reason}")]
    InvalidCard { index: usize, reason: String },

    /// A required keyword is absent.
    #[error("missing keyword {0}")]
    MissingKeyword(String),

    /// A keyword holds a value of another type.
    #[error("keyword {keyword} does not hold a {expected} value")]
    WrongType {
        keyword: String,
        expected: &'static str,
    },

    /// A value is not printable ASCII or overflows its cards.
    #[error("value of {keyword} cannot be written as header cards")]
    ValueTooLong { keyword: String },

    /// Valid FITS this codec does not read.
    #[error("unsupported layout: {0}")]
    Unsupported(String),

    /// No `TTYPEn` matches the requested column.
    #[error("no column named {0}")]
    ColumnNotFound(String),

    /// The data does not match `DATASUM`.
    #[error("HDU {hdu}: DATASUM mismatch (stored {stored}, computed {computed})")]
    DatasumMismatch {
        hdu: usize,
        stored: String,
        computed: u32,
    },

    /// The HDU does not sum to negative zero.
    #[error("HDU {hdu}: CHECKSUM mismatch (HDU sums to {sum:#010x})")]
    ChecksumMismatch { hdu: usize, sum: u32 },
}

/// A typed header value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `T` or `F`.
    Logical(bool),
    /// Integer.
    Integer(i64),
    /// Floating point.
    Real(f64),
    /// Quoted ASCII string.
    Text(String),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Logical(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// One header card.
///
/// A long string value is still one `Card`; it spans several 80-byte records
/// only once encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    /// Up to eight ASCII characters.
    pub keyword: String,
    /// `None` for commentary cards such as `COMMENT` or `END`.
    pub value: Option<Value>,
    /// Text after the `/`, or the commentary text.
    pub comment: Option<String>,
}

/// Split `text` into quote-escaped chunks of at most `max` bytes.
///
/// A doubled quote is never split across chunks.
fn split_escaped(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        let width = if ch == '\'' { 2 } else { ch.len_utf8() };
        if current.len() + width > max {
            chunks.push(std::mem::take(&mut current));
        }
        if ch == '\'' {
            current.push_str("''");
        } else {
            current.push(ch);
        }
    }
    chunks.push(current);
    chunks
}

/// Blank-pad one rendered card line to 80 bytes.
fn pad_card(keyword: &str, text: &str) -> Result<[u8; CARD_SIZE], FitsError> {
    if text.len() > CARD_SIZE || !text.is_ascii() {
        return Err(FitsError::ValueTooLong {
            keyword: keyword.to_owned(),
        });
    }
    let mut card = [b' '; CARD_SIZE];
    card[..text.len()].copy_from_slice(text.as_bytes());
    Ok(card)
}

/// Shortest round-trip representation, in FITS exponent syntax.
fn format_real(value: f64) -> String {
    let mut text = format!("{value:?}").replace('e', "E");
    if !text.contains('.') && !text.contains('E') {
        text.push_str(".0");
    }
    text
}

fn format_value(keyword: &str, value: &Value) -> Result<String, FitsError> {
    let text = match value {
        Value::Logical(v) => format!("{:>20}", if *v { "T" } else { "F" }),
        Value::Integer(v) => format!("{v:>20}"),
        Value::Real(v) => format!("{:>20}", format_real(*v)),
        Value::Text(v) => {
            let escaped = v.replace('\'', "''");
            if escaped.len() > MAX_STRING_LEN || !v.is_ascii() {
                return Err(FitsError::ValueTooLong {
                    keyword: keyword.to_owned(),
                });
            }
            format!("'{escaped:<8}'")
        }
    };
    Ok(text)
}

impl Card {
    /// A value card.
    pub fn new(keyword: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            keyword: keyword.into(),
            value: Some(value.into()),
            comment: None,
        }
    }

    /// Attach a comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    fn check_keyword(&self) -> Result<(), FitsError> {
        if self.keyword.len() > 8 || !self.keyword.is_ascii() {
            return Err(FitsError::InvalidCard {
                index: 0,
                reason: format!("invalid keyword {:?}", self.keyword),
            });
        }
        Ok(())
    }

    /// Render to exactly 80 bytes.
    ///
    /// Fails with [`FitsError::ValueTooLong`] when the card needs more than
    /// one record; [`encode_records`](Self::encode_records) handles that case.
    pub fn encode(&self) -> Result<[u8; CARD_SIZE], FitsError> {
        self.check_keyword()?;
        let mut text = format!("{:<8}", self.keyword);
        match &self.value {
            Some(value) => {
                text.push_str("= ");
                text.push_str(&format_value(&self.keyword, value)?);
                if let Some(comment) = &self.comment {
                    let _ = write!(text, " / {comment}");
                }
            }
            None => {
                if let Some(comment) = &self.comment {
                    let _ = write!(text, "  {comment}");
                }
            }
        }
        pad_card(&self.keyword, &text)
    }

    /// Render to one or more 80-byte records.
    ///
    /// Strings too long for a single card continue on `CONTINUE` cards. The
    /// comment goes on the last record, on an extra empty continuation if it
    /// does not fit there.
    pub fn encode_records(&self) -> Result<Vec<[u8; CARD_SIZE]>, FitsError> {
        let text = match (self.encode(), &self.value) {
            (Ok(card), _) => return Ok(vec![card]),
            (Err(FitsError::ValueTooLong { .. }), Some(Value::Text(text))) if text.is_ascii() => {
                text
            }
            (Err(err), _) => return Err(err),
        };

        let chunks = split_escaped(text, MAX_STRING_LEN - 1);
        let last = chunks.len() - 1;
        let mut lines: Vec<String> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let amp = if i < last { "&" } else { "" };
                if i == 0 {
                    format!("{:<8}= '{chunk}{amp}'", self.keyword)
                } else {
                    format!("{CONTINUE_KEYWORD:<8}  '{chunk}{amp}'")
                }
            })
            .collect();

        if let Some(comment) = &self.comment {
            let tail = format!(" / {comment}");
            if let Some(line) = lines.last_mut() {
                if line.len() + tail.len() <= CARD_SIZE {
                    line.push_str(&tail);
                } else {
                    line.insert(line.len() - 1, '&');
                    lines.push(format!("{CONTINUE_KEYWORD:<8}  ''{tail}"));
                }
            }
        }

        lines
            .iter()
            .map(|line| pad_card(&self.keyword, line))
            .collect()
    }

    /// Parse one 80-byte card.
    pub fn decode(index: usize, bytes: &[u8]) -> Result<Self, FitsError> {
        let invalid = |reason: &str| FitsError::InvalidCard {
            index,
            reason: reason.to_owned(),
        };
        let text = std::str::from_utf8(bytes).map_err(|_| invalid("non-ASCII bytes"))?;
        if text.len() != CARD_SIZE || !text.is_ascii() {
            return Err(invalid("not an 80-character ASCII card"));
        }
        let keyword = text[..8].trim_end().to_owned();
        let continuation =
            keyword == CONTINUE_KEYWORD && text[10..].trim_start().starts_with('\'');
        if &text[8..10] != "= " && !continuation {
            let rest = text[8..].trim();
            return Ok(Self {
                keyword,
                value: None,
                comment: (!rest.is_empty()).then(|| rest.to_owned()),
            });
        }

        let field = &text[10..];
        let trimmed = field.trim_start();
        let (value, rest) = if let Some(body) = trimmed.strip_prefix('\'') {
            let (value, consumed) = parse_string(body).ok_or_else(|| invalid("unterminated string"))?;
            (Some(Value::Text(value)), &body[consumed..])
        } else {
            let (token, rest) = match trimmed.find('/') {
                Some(pos) => (&trimmed[..pos], &trimmed[pos..]),
                None => (trimmed, ""),
            };
            let value = parse_token(token.trim())
                .map_err(|reason| invalid(&reason))?;
            (value, rest)
        };
        let comment = rest
            .trim_start()
            .strip_prefix('/')
            .map(|c| c.trim().to_owned())
            .filter(|c| !c.is_empty());
        Ok(Self {
            keyword,
            value,
            comment,
        })
    }
}

/// Parse the body of a quoted string (after the opening quote).
///
/// Returns the value with trailing blanks removed and the number of bytes
/// consumed including the closing quote.
fn parse_string(body: &str) -> Option<(String, usize)> {
    let bytes = body.as_bytes();
    let mut value = String::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                value.push('\'');
                i += 2;
                continue;
            }
            return Some((value.trim_end().to_owned(), i + 1));
        }
        value.push(char::from(bytes[i]));
        i += 1;
    }
    None
}

fn parse_token(token: &str) -> Result<Option<Value>, String> {
    match token {
        "" => Ok(None),
        "T" => Ok(Some(Value::Logical(true))),
        "F" => Ok(Some(Value::Logical(false))),
        _ if token.contains(|c: char| matches!(c, '.' | 'E' | 'e' | 'D' | 'd')) => token
            .replace(|c: char| c == 'D' || c == 'd', "E")
            .parse::<f64>()
            .map(|v| Some(Value::Real(v)))
            .map_err(|e| format!("invalid real {token:?}: {e}")),
        _ => token
            .parse::<i64>()
            .map(|v| Some(Value::Integer(v)))
            .map_err(|e| format!("invalid integer {token:?}: {e}")),
    }
}

/// Ordered list of header cards (without `END`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: Vec<Card>,
}

impl Header {
    /// An empty header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a card.
    pub fn push(&mut self, card: Card) {
        self.cards.push(card);
    }

    /// Append a decoded card, joining a `CONTINUE` card onto the string
    /// before it when that string ends in `&`.
    fn push_decoded(&mut self, card: Card) {
        if card.keyword != CONTINUE_KEYWORD {
            self.cards.push(card);
            return;
        }
        let Some(Value::Text(tail)) = &card.value else {
            self.cards.push(card);
            return;
        };
        match self.cards.last_mut() {
            Some(Card {
                value: Some(Value::Text(head)),
                comment,
                ..
            }) if head.ends_with('&') => {
                head.pop();
                head.push_str(tail);
                if card.comment.is_some() {
                    *comment = card.comment;
                }
            }
            _ => self.cards.push(card),
        }
    }

    /// Replace the value of an existing keyword, or append it.
    pub fn set(&mut self, keyword: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.cards.iter_mut().find(|c| c.keyword == keyword) {
            Some(card) => card.value = Some(value),
            None => self.cards.push(Card::new(keyword, value)),
        }
    }

    /// Drop every card with `keyword`.
    pub fn remove(&mut self, keyword: &str) {
        self.cards.retain(|c| c.keyword != keyword);
    }

    /// Cards in order; a long string is one card.
    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    /// Value of the first card with `keyword`.
    pub fn get(&self, keyword: &str) -> Option<&Value> {
        self.cards
            .iter()
            .find(|c| c.keyword == keyword)
            .and_then(|c| c.value.as_ref())
    }

    fn require(&self, keyword: &str) -> Result<&Value, FitsError> {
        self.get(keyword)
            .ok_or_else(|| FitsError::MissingKeyword(keyword.to_owned()))
    }

    /// Integer value.
    pub fn get_int(&self, keyword: &str) -> Result<i64, FitsError> {
        match self.require(keyword)? {
            Value::Integer(v) => Ok(*v),
            _ => Err(FitsError::WrongType {
                keyword: keyword.to_owned(),
                expected: "integer",
            }),
        }
    }

    /// Real value; integers are widened.
    pub fn get_real(&self, keyword: &str) -> Result<f64, FitsError> {
        match self.require(keyword)? {
            Value::Real(v) => Ok(*v),
            Value::Integer(v) => Ok(*v as f64),
            _ => Err(FitsError::WrongType {
                keyword: keyword.to_owned(),
                expected: "real",
            }),
        }
    }

    /// String value, joined across continuation cards.
    pub fn get_str(&self, keyword: &str) -> Result<&str, FitsError> {
        match self.require(keyword)? {
            Value::Text(v) => Ok(v),
            _ => Err(FitsError::WrongType {
                keyword: keyword.to_owned(),
                expected: "string",
            }),
        }
    }

    /// Logical value.
    pub fn get_bool(&self, keyword: &str) -> Result<bool, FitsError> {
        match self.require(keyword)? {
            Value::Logical(v) => Ok(*v),
            _ => Err(FitsError::WrongType {
                keyword: keyword.to_owned(),
                expected: "logical",
            }),
        }
    }

    /// Encode the cards plus `END`, blank-padded to whole blocks.
    pub fn encode(&self) -> Result<Vec<u8>, FitsError> {
        let mut out = Vec::with_capacity((self.cards.len() + 1) * CARD_SIZE);
        for (index, card) in self.cards.iter().enumerate() {
            let records = card.encode_records().map_err(|err| match err {
                FitsError::InvalidCard { reason, .. } => FitsError::InvalidCard { index, reason },
                other => other,
            })?;
            for record in records {
                out.extend_from_slice(&record);
            }
        }
        let mut end = [b' '; CARD_SIZE];
        end[..3].copy_from_slice(b"END");
        out.extend_from_slice(&end);
        pad_to_block(&mut out, b' ');
        Ok(out)
    }
}

fn pad_to_block(buf: &mut Vec<u8>, fill: u8) {
    let rem = buf.len() % BLOCK_SIZE;
    if rem != 0 {
        buf.resize(buf.len() + BLOCK_SIZE - rem, fill);
    }
}

/// Ones' complement addition of two 32-bit words.
fn ones_add(a: u32, b: u32) -> u32 {
    let sum = u64::from(a) + u64::from(b);
    ((sum & 0xFFFF_FFFF) + (sum >> 32)) as u32
}

/// 32-bit ones' complement checksum of a block-aligned byte slice.
pub fn checksum(bytes: &[u8]) -> u32 {
    let mut sum: u64 = 0;
    for word in bytes.chunks(4) {
        let mut be = [0u8; 4];
        be[..word.len()].copy_from_slice(word);
        sum += u64::from(u32::from_be_bytes(be));
    }
    while sum >> 32 != 0 {
        sum = (sum & 0xFFFF_FFFF) + (sum >> 32);
    }
    sum as u32
}

/// ASCII encoding of a 32-bit checksum, avoiding punctuation characters.
pub fn encode_checksum(value: u32) -> String {
    const EXCLUDE: [u8; 13] = [
        0x3a, 0x3b, 0x3c, 0x3d, 0x3e, 0x3f, 0x40, 0x5b, 0x5c, 0x5d, 0x5e, 0x5f, 0x60,
    ];
    const OFFSET: u8 = 0x30;

    let mut ascii = [0u8; 16];
    for (i, byte) in value.to_be_bytes().into_iter().enumerate() {
        let quotient = byte / 4 + OFFSET;
        let remainder = byte % 4;
        let mut ch = [quotient; 4];
        ch[0] += remainder;
        loop {
            let mut adjusted = false;
            for pair in [0usize, 2] {
                while EXCLUDE.contains(&ch[pair]) || EXCLUDE.contains(&ch[pair + 1]) {
                    ch[pair] += 1;
                    ch[pair + 1] -= 1;
                    adjusted = true;
                }
            }
            if !adjusted {
                break;
            }
        }
        for (j, c) in ch.into_iter().enumerate() {
            ascii[4 * j + i] = c;
        }
    }
    // Rotate right by one so the string lines up with word boundaries when it
    // starts in column 12 of the card.
    ascii.rotate_right(1);
    ascii.iter().map(|&b| char::from(b)).collect()
}

/// One header-data unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Hdu {
    /// Header cards.
    pub header: Header,
    /// Data section without block padding.
    pub data: Vec<u8>,
}

fn f64_be_bytes(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

fn f64_from_be(bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut be = [0u8; 8];
            be.copy_from_slice(chunk);
            f64::from_be_bytes(be)
        })
        .collect()
}

/// Byte width of one `TFORMn` entry.
fn tform_width(tform: &str) -> Result<usize, FitsError> {
    let tform = tform.trim();
    let split = tform
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| FitsError::Unsupported(format!("TFORM {tform:?}")))?;
    let repeat: usize = if split == 0 {
        1
    } else {
        tform[..split]
            .parse()
            .map_err(|_| FitsError::Unsupported(format!("TFORM {tform:?}")))?
    };
    let size = match &tform[split..split + 1] {
        "L" | "B" | "A" => 1,
        "I" => 2,
        "J" | "E" => 4,
        "K" | "D" | "C" => 8,
        "M" => 16,
        other => return Err(FitsError::Unsupported(format!("TFORM type {other:?}"))),
    };
    Ok(repeat * size)
}

impl Hdu {
    /// Primary HDU holding a one-dimensional `f64` array.
    ///
    /// Mandatory keywords come first; `extra` cards follow in order.
    pub fn primary_f64(values: &[f64], extra: &Header) -> Self {
        let mut header = Header::new();
        header.push(Card::new("SIMPLE", true).with_comment("conforms to FITS standard"));
        header.push(Card::new("BITPIX", -64i64).with_comment("array data type"));
        header.push(Card::new("NAXIS", 1i64).with_comment("number of array dimensions"));
        header.push(Card::new("NAXIS1", values.len()));
        header.push(Card::new("EXTEND", true));
        for card in extra.cards() {
            header.push(card.clone());
        }
        Self {
            header,
            data: f64_be_bytes(values),
        }
    }

    /// `BINTABLE` extension with a single double-precision column.
    pub fn bintable_f64(name: &str, unit: &str, values: &[f64]) -> Self {
        let mut header = Header::new();
        header.push(Card::new("XTENSION", "BINTABLE").with_comment("binary table extension"));
        header.push(Card::new("BITPIX", 8i64).with_comment("array data type"));
        header.push(Card::new("NAXIS", 2i64).with_comment("number of array dimensions"));
        header.push(Card::new("NAXIS1", 8i64).with_comment("length of dimension 1"));
        header.push(Card::new("NAXIS2", values.len()).with_comment("length of dimension 2"));
        header.push(Card::new("PCOUNT", 0i64).with_comment("number of group parameters"));
        header.push(Card::new("GCOUNT", 1i64).with_comment("number of groups"));
        header.push(Card::new("TFIELDS", 1i64).with_comment("number of table fields"));
        header.push(Card::new("TTYPE1", name));
        header.push(Card::new("TFORM1", "D"));
        header.push(Card::new("TUNIT1", unit));
        Self {
            header,
            data: f64_be_bytes(values),
        }
    }

    /// Data section padded with zeros to whole blocks.
    fn padded_data(&self) -> Vec<u8> {
        let mut data = self.data.clone();
        pad_to_block(&mut data, 0);
        data
    }

    /// Ones' complement sum of the padded data.
    pub fn datasum(&self) -> u32 {
        checksum(&self.padded_data())
    }

    /// Set `DATASUM` and `CHECKSUM` from the current header and data.
    pub fn update_checksums(&mut self) -> Result<(), FitsError> {
        let datasum = self.datasum();
        self.header.remove("CHECKSUM");
        self.header.remove("DATASUM");
        self.header.push(
            Card::new("CHECKSUM", CHECKSUM_PLACEHOLDER).with_comment("HDU checksum"),
        );
        self.header
            .push(Card::new("DATASUM", datasum.to_string()).with_comment("data unit checksum"));

        let header_sum = checksum(&self.header.encode()?);
        let total = ones_add(header_sum, datasum);
        self.header.set("CHECKSUM", encode_checksum(!total));
        Ok(())
    }

    /// Header and padded data.
    pub fn encode(&self) -> Result<Vec<u8>, FitsError> {
        let mut out = self.header.encode()?;
        out.extend_from_slice(&self.padded_data());
        Ok(out)
    }

    /// Size of the data section implied by the header.
    fn data_len(header: &Header) -> Result<usize, FitsError> {
        let naxis = header.get_int("NAXIS")?;
        if naxis == 0 {
            return Ok(0);
        }
        let bitpix = header.get_int("BITPIX")?;
        let mut elements: usize = 1;
        for axis in 1..=naxis {
            let len = header.get_int(&format!("NAXIS{axis}"))?;
            elements *= usize::try_from(len)
                .map_err(|_| FitsError::Unsupported(format!("NAXIS{axis} = {len}")))?;
        }
        let bytes_per = usize::try_from(bitpix.unsigned_abs() / 8)
            .map_err(|_| FitsError::Unsupported(format!("BITPIX = {bitpix}")))?;
        let pcount = header.get_int("PCOUNT").unwrap_or(0);
        let gcount = header.get_int("GCOUNT").unwrap_or(1);
        let pcount = usize::try_from(pcount).unwrap_or(0);
        let gcount = usize::try_from(gcount).unwrap_or(1);
        Ok(bytes_per * gcount * (pcount + elements))
    }

    /// Interpret the data section as a `BITPIX = -64` array.
    pub fn data_f64(&self) -> Result<Vec<f64>, FitsError> {
        let bitpix = self.header.get_int("BITPIX")?;
        if bitpix != -64 {
            return Err(FitsError::Unsupported(format!("BITPIX = {bitpix}")));
        }
        Ok(f64_from_be(&self.data))
    }

    /// Read a double-precision column of a `BINTABLE` by name.
    pub fn column_f64(&self, name: &str) -> Result<Vec<f64>, FitsError> {
        let tfields = self.header.get_int("TFIELDS")?;
        let row_len = usize::try_from(self.header.get_int("NAXIS1")?)
            .map_err(|_| FitsError::Unsupported("negative NAXIS1".into()))?;
        let n_rows = usize::try_from(self.header.get_int("NAXIS2")?)
            .map_err(|_| FitsError::Unsupported("negative NAXIS2".into()))?;

        let mut offset = 0;
        for field in 1..=tfields {
            let tform = self.header.get_str(&format!("TFORM{field}"))?;
            let width = tform_width(tform)?;
            let ttype = self.header.get_str(&format!("TTYPE{field}")).unwrap_or("");
            if ttype == name {
                if width != 8 || !tform.trim().ends_with('D') {
                    return Err(FitsError::Unsupported(format!(
                        "column {name} has TFORM {tform:?}"
                    )));
                }
                let mut values = Vec::with_capacity(n_rows);
                for row in 0..n_rows {
                    let start = row * row_len + offset;
                    let cell = self
                        .data
                        .get(start..start + 8)
                        .ok_or(FitsError::Truncated { offset: start })?;
                    values.extend(f64_from_be(cell));
                }
                return Ok(values);
            }
            offset += width;
        }
        Err(FitsError::ColumnNotFound(name.to_owned()))
    }
}

/// Byte ranges of one HDU inside a stream.
struct RawHdu {
    header: Header,
    header_range: Range<usize>,
    /// Unpadded data.
    data_range: Range<usize>,
    /// Data including block padding.
    padded_range: Range<usize>,
}

fn split_hdus(bytes: &[u8]) -> Result<Vec<RawHdu>, FitsError> {
    let mut hdus = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let start = offset;
        let mut header = Header::new();
        let mut card_index = 0;
        let mut found_end = false;
        while !found_end {
            let block = bytes
                .get(offset..offset + BLOCK_SIZE)
                .ok_or(FitsError::MissingEnd { offset: start })?;
            for raw in block.chunks_exact(CARD_SIZE) {
                if found_end {
                    continue;
                }
                let card = Card::decode(card_index, raw)?;
                card_index += 1;
                if card.keyword == "END" && card.value.is_none() {
                    found_end = true;
                } else if !card.keyword.is_empty() || card.comment.is_some() {
                    header.push_decoded(card);
                }
            }
            offset += BLOCK_SIZE;
        }
        let header_range = start..offset;

        let data_len = Hdu::data_len(&header)?;
        let data_range = offset..offset + data_len;
        let padded_len = data_len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        let padded_range = offset..offset + padded_len;
        if padded_range.end > bytes.len() {
            return Err(FitsError::Truncated { offset: bytes.len() });
        }
        offset = padded_range.end;

        hdus.push(RawHdu {
            header,
            header_range,
            data_range,
            padded_range,
        });
    }
    Ok(hdus)
}

/// A decoded FITS stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitsFile {
    /// Primary HDU first, then extensions.
    pub hdus: Vec<Hdu>,
}

impl FitsFile {
    /// A file made of `hdus`.
    pub fn new(hdus: Vec<Hdu>) -> Self {
        Self { hdus }
    }

    /// The primary HDU.
    pub fn primary(&self) -> Option<&Hdu> {
        self.hdus.first()
    }

    /// Concatenated HDUs as written to disk.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FitsError> {
        let mut out = Vec::new();
        for hdu in &self.hdus {
            out.extend(hdu.encode()?);
        }
        Ok(out)
    }

    /// Decode every HDU in `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, FitsError> {
        let hdus = split_hdus(bytes)?
            .into_iter()
            .map(|raw| Hdu {
                header: raw.header,
                data: bytes[raw.data_range].to_vec(),
            })
            .collect();
        Ok(Self { hdus })
    }
}

/// Check `DATASUM` and `CHECKSUM` of every HDU in `bytes`.
///
/// HDUs without the keywords are skipped.
pub fn verify(bytes: &[u8]) -> Result<(), FitsError> {
    for (index, raw) in split_hdus(bytes)?.into_iter().enumerate() {
        let data_sum = checksum(&bytes[raw.padded_range.clone()]);
        if let Some(Value::Text(stored)) = raw.header.get("DATASUM") {
            if stored.parse::<u32>().ok() != Some(data_sum) {
                return Err(FitsError::DatasumMismatch {
                    hdu: index,
                    stored: stored.clone(),
                    computed: data_sum,
                });
            }
        }
        if raw.header.get("CHECKSUM").is_some() {
            let sum = ones_add(checksum(&bytes[raw.header_range.clone()]), data_sum);
            if sum != 0xFFFF_FFFF {
                return Err(FitsError::ChecksumMismatch { hdu: index, sum });
            }
        }
    }
    Ok(())
}
