//! EOSIO binary serialization for the one transaction shape the bridge emits: a single
//! `eosio.token::transfer` action.
//!
//! Layout follows the chain ABI: little-endian fixed integers, `varuint32` lengths,
//! names as base-32 packed `u64`, assets as `i64` amount plus packed symbol.

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Token contract holding the native asset.
pub const TOKEN_CONTRACT: &str = "eosio.token";
pub const TRANSFER_ACTION: &str = "transfer";
pub const ACTIVE_PERMISSION: &str = "active";

pub const NATIVE_SYMBOL: &str = "EOS";
pub const NATIVE_PRECISION: u8 = 4;
/// Largest symbol precision the chain accepts.
pub const MAX_PRECISION: u8 = 18;

fn char_to_symbol(c: u8) -> u64 {
    match c {
        b'a'..=b'z' => (c - b'a') as u64 + 6,
        b'1'..=b'5' => (c - b'1') as u64 + 1,
        _ => 0,
    }
}

/// Encode an account or action name. Characters outside `.1-5a-z` encode as `.`.
pub fn name_to_u64(name: &str) -> u64 {
    let bytes = name.as_bytes();
    let mut value = 0u64;
    for i in 0..=12 {
        let mut c = bytes.get(i).map(|b| char_to_symbol(*b)).unwrap_or(0);
        if i < 12 {
            c &= 0x1f;
            c <<= 64 - 5 * (i + 1);
        } else {
            c &= 0x0f;
        }
        value |= c;
    }
    value
}

/// Decode a packed name, trimming trailing dots.
pub fn u64_to_name(value: u64) -> String {
    const CHARMAP: &[u8] = b".12345abcdefghijklmnopqrstuvwxyz";
    let mut out = [b'.'; 13];
    let mut tmp = value;
    for i in 0..=12 {
        let (mask, shift) = if i == 0 { (0x0f, 4) } else { (0x1f, 5) };
        out[12 - i] = CHARMAP[(tmp & mask) as usize];
        tmp >>= shift;
    }
    let s = String::from_utf8_lossy(&out).into_owned();
    s.trim_end_matches('.').to_string()
}

/// Packed symbol: precision byte followed by up to seven upper-case characters.
pub fn symbol_to_u64(symbol: &str, precision: u8) -> Result<u64> {
    if precision > MAX_PRECISION {
        return Err(BridgeError::Encoding(format!(
            "symbol precision {} exceeds {}",
            precision, MAX_PRECISION
        )));
    }
    if symbol.is_empty() || symbol.len() > 7 || !symbol.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(BridgeError::Encoding(format!("invalid symbol {}", symbol)));
    }
    let mut value = precision as u64;
    for (i, b) in symbol.bytes().enumerate() {
        value |= (b as u64) << (8 * (i + 1));
    }
    Ok(value)
}

/// An amount of a token in base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub amount: i64,
    pub precision: u8,
    pub symbol: String,
}

impl Asset {
    /// Native asset holding `value` base units.
    pub fn native(value: u128) -> Result<Self> {
        let amount = i64::try_from(value)
            .map_err(|_| BridgeError::InvalidArgs(format!("value {} overflows an asset", value)))?;
        Ok(Self {
            amount,
            precision: NATIVE_PRECISION,
            symbol: NATIVE_SYMBOL.to_string(),
        })
    }

    /// Parse the `"12.3400 EOS"` display form.
    pub fn parse(s: &str) -> Result<Self> {
        let bad = || BridgeError::Encoding(format!("invalid asset {:?}", s));
        let (number, symbol) = s.trim().split_once(' ').ok_or_else(bad)?;
        let symbol = symbol.trim();
        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        let negative = int_part.starts_with('-');
        let int_digits = int_part.trim_start_matches('-');
        if int_digits.is_empty()
            || !int_digits.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(bad());
        }
        let precision = u8::try_from(frac_part.len()).map_err(|_| bad())?;
        let digits = format!("{}{}", int_digits, frac_part);
        let mut amount: i64 = digits.parse().map_err(|_| bad())?;
        if negative {
            amount = -amount;
        }
        symbol_to_u64(symbol, precision)?;
        Ok(Self {
            amount,
            precision,
            symbol: symbol.to_string(),
        })
    }

    pub fn is_native(&self) -> bool {
        self.symbol == NATIVE_SYMBOL && self.precision == NATIVE_PRECISION
    }

    /// Base units as an unsigned value; negative amounts are rejected.
    pub fn value(&self) -> Result<u128> {
        u128::try_from(self.amount)
            .map_err(|_| BridgeError::Encoding(format!("negative asset amount {}", self.amount)))
    }
}

impl std::fmt::Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.amount < 0 { "-" } else { "" };
        let abs = self.amount.unsigned_abs();
        if self.precision == 0 {
            return write!(f, "{}{} {}", sign, abs, self.symbol);
        }
        // precision is unchecked on deserialized assets
        let Some(scale) = 10u64.checked_pow(self.precision as u32) else {
            return write!(f, "{}{} {}", sign, abs, self.symbol);
        };
        write!(
            f,
            "{}{}.{:0width$} {}",
            sign,
            abs / scale,
            abs % scale,
            self.symbol,
            width = self.precision as usize
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionLevel {
    pub actor: String,
    pub permission: String,
}

/// `eosio.token::transfer` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferData {
    pub from: String,
    pub to: String,
    pub quantity: Asset,
    pub memo: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub account: String,
    pub name: String,
    pub authorization: Vec<PermissionLevel>,
    pub data: TransferData,
}

impl Action {
    /// Native-asset transfer authorized by `from@active`.
    pub fn transfer(from: &str, to: &str, quantity: Asset, memo: String) -> Self {
        Self {
            account: TOKEN_CONTRACT.to_string(),
            name: TRANSFER_ACTION.to_string(),
            authorization: vec![PermissionLevel {
                actor: from.to_string(),
                permission: ACTIVE_PERMISSION.to_string(),
            }],
            data: TransferData {
                from: from.to_string(),
                to: to.to_string(),
                quantity,
                memo,
            },
        }
    }
}

/// Transaction header plus actions, without context-free actions or extensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Seconds since the unix epoch.
    pub expiration: u32,
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    pub max_net_usage_words: u32,
    pub max_cpu_usage_ms: u8,
    pub delay_sec: u32,
    pub actions: Vec<Action>,
}

/// Append-only ABI writer.
#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn varuint32(&mut self, mut v: u32) {
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            self.buf.push(byte);
            if v == 0 {
                break;
            }
        }
    }

    pub fn bytes(&mut self, b: &[u8]) -> Result<()> {
        let len = u32::try_from(b.len())
            .map_err(|_| BridgeError::Encoding("byte field too long".into()))?;
        self.varuint32(len);
        self.buf.extend_from_slice(b);
        Ok(())
    }

    pub fn name(&mut self, name: &str) {
        self.u64(name_to_u64(name));
    }

    pub fn asset(&mut self, asset: &Asset) -> Result<()> {
        self.i64(asset.amount);
        self.u64(symbol_to_u64(&asset.symbol, asset.precision)?);
        Ok(())
    }
}

pub fn pack_transfer(data: &TransferData) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    enc.name(&data.from);
    enc.name(&data.to);
    enc.asset(&data.quantity)?;
    enc.bytes(data.memo.as_bytes())?;
    Ok(enc.into_bytes())
}

fn pack_action(enc: &mut Encoder, action: &Action) -> Result<()> {
    enc.name(&action.account);
    enc.name(&action.name);
    enc.varuint32(action.authorization.len() as u32);
    for auth in &action.authorization {
        enc.name(&auth.actor);
        enc.name(&auth.permission);
    }
    enc.bytes(&pack_transfer(&action.data)?)
}

/// Serialize `tx` in its signed form (the bytes hashed for the transaction id).
pub fn pack_transaction(tx: &Transaction) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    enc.u32(tx.expiration);
    enc.u16(tx.ref_block_num);
    enc.u32(tx.ref_block_prefix);
    enc.varuint32(tx.max_net_usage_words);
    enc.u8(tx.max_cpu_usage_ms);
    enc.varuint32(tx.delay_sec);
    // context-free actions
    enc.varuint32(0);
    enc.varuint32(tx.actions.len() as u32);
    for action in &tx.actions {
        pack_action(&mut enc, action)?;
    }
    // transaction extensions
    enc.varuint32(0);
    Ok(enc.into_bytes())
}
