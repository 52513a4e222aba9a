//! Issued-token identity and descriptors.

use crate::LedgerIndex;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Characters of the ledger's base58 address alphabet.
const ADDRESS_ALPHABET: &str = "rpshnaf39wBUDNEGHJKLM4PQRST7VWXYZ2bcdeCg65jkm8oFqi1tuvAxyz";

/// Characters allowed in a 3-character standard currency code besides ASCII alphanumerics.
const CURRENCY_SYMBOLS: &str = "?!@#$%^&*<>(){}[]|";

/// Errors when parsing token identity fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenParseError {
    #[error("invalid issuer address: {0}")]
    InvalidIssuer(String),

    #[error("invalid currency code: {0}")]
    InvalidCurrency(String),
}

/// Account that issues a token (classic address, e.g. `rXXXX...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Issuer(CompactString);

impl Issuer {
    /// Parse and validate a classic address.
    pub fn parse(raw: &str) -> Result<Self, TokenParseError> {
        let raw = raw.trim();
        let valid = raw.starts_with('r')
            && (25..=35).contains(&raw.len())
            && raw.chars().all(|c| ADDRESS_ALPHABET.contains(c));

        if valid {
            Ok(Self(CompactString::new(raw)))
        } else {
            Err(TokenParseError::InvalidIssuer(raw.to_string()))
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Issuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Currency code of an issued token.
///
/// Either a 3-character standard code or a 160-bit code written as 40 hex
/// digits (stored upper-cased).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencyCode(CompactString);

impl CurrencyCode {
    pub fn parse(raw: &str) -> Result<Self, TokenParseError> {
        let raw = raw.trim();

        if raw.len() == 3 {
            let valid = !raw.eq_ignore_ascii_case("XRP")
                && raw
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || CURRENCY_SYMBOLS.contains(c));
            if valid {
                return Ok(Self(CompactString::new(raw)));
            }
        } else if raw.len() == 40
            && raw.chars().all(|c| c.is_ascii_hexdigit())
            && raw.chars().any(|c| c != '0')
        {
            return Ok(Self(CompactString::new(raw.to_ascii_uppercase())));
        }

        Err(TokenParseError::InvalidCurrency(raw.to_string()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Whether this is a 40-hex-digit non-standard code.
    #[inline]
    pub fn is_hex(&self) -> bool {
        self.0.len() == 40
    }

    /// Human-readable form. Hex codes that decode to printable ASCII are
    /// shown decoded (trailing NUL padding removed), otherwise as-is.
    pub fn display_name(&self) -> String {
        if !self.is_hex() {
            return self.0.to_string();
        }

        let bytes: Vec<u8> = (0..self.0.len())
            .step_by(2)
            .filter_map(|i| u8::from_str_radix(&self.0[i..i + 2], 16).ok())
            .collect();

        let trimmed: &[u8] = {
            let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
            &bytes[..end]
        };

        if !trimmed.is_empty() && trimmed.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            String::from_utf8_lossy(trimmed).into_owned()
        } else {
            self.0.to_string()
        }
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of an issued token: (issuer, currency).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenId {
    pub issuer: Issuer,
    pub currency: CurrencyCode,
}

impl TokenId {
    pub fn new(issuer: Issuer, currency: CurrencyCode) -> Self {
        Self { issuer, currency }
    }

    /// Parse both parts from raw strings.
    pub fn parse(issuer: &str, currency: &str) -> Result<Self, TokenParseError> {
        Ok(Self {
            issuer: Issuer::parse(issuer)?,
            currency: CurrencyCode::parse(currency)?,
        })
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.currency, self.issuer)
    }
}

/// Trust-line transaction picked out of a ledger range scan.
///
/// Fields are raw strings from the wire; validation happens during
/// classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustLineCandidate {
    /// Issuer of the token the trust line points at.
    pub issuer: String,
    /// Currency code of the token.
    pub currency: String,
    /// Ledger the transaction was validated in.
    pub ledger_index: LedgerIndex,
    /// Account that created the trust line.
    pub account: Option<String>,
    /// Transaction hash.
    pub tx_hash: Option<String>,
}

/// Best-effort market attributes from an external market-data service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub name: Option<String>,
    pub symbol: Option<String>,
    /// Total supply as reported by the service.
    pub supply: Option<f64>,
    pub liquidity_usd: Option<f64>,
    pub price_usd: Option<f64>,
    /// Link to the trading pair page.
    pub pair_url: Option<String>,
}

impl MarketData {
    /// True when no attribute is populated.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.symbol.is_none()
            && self.supply.is_none()
            && self.liquidity_usd.is_none()
            && self.price_usd.is_none()
            && self.pair_url.is_none()
    }
}

/// Classified view of a trust-line candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenDescriptor {
    pub token: TokenId,
    /// Ledger in which the token was observed.
    pub ledger_index: LedgerIndex,
    /// First time this process has seen the token.
    pub is_new: bool,
    /// Market attributes, absent when the lookup failed or found nothing.
    pub market: Option<MarketData>,
}

impl TokenDescriptor {
    /// Display name: market name if known, else the decoded currency code.
    pub fn display_name(&self) -> String {
        self.market
            .as_ref()
            .and_then(|m| m.name.clone())
            .unwrap_or_else(|| self.token.currency.display_name())
    }
}
