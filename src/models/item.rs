//! Item records and marketplace prices.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Field key for the BUFF marketplace price.
pub const BUFF_PRICE: &str = "buff_price";
/// Field key for the UU marketplace price.
pub const UU_PRICE: &str = "uu_price";
/// Field key for the daily change string.
pub const TODAY_CHANGE: &str = "today_change";
/// Field key for the weekly change string.
pub const WEEK_CHANGE: &str = "week_change";

/// Extracted field texts for one item, keyed by field name.
pub type RawFields = BTreeMap<String, String>;

/// Extracted items keyed by item name.
pub type RawRecords = BTreeMap<String, RawFields>;

static PRICE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d[\d,]*(?:\.\d+)?").expect("valid price regex"));

/// Error returned when a price string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unparseable price: {0:?}")]
pub struct PriceParseError(pub String);

/// A marketplace price with two fractional digits, stored in hundredths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Price {
    hundredths: i64,
}

impl Price {
    pub fn from_hundredths(hundredths: i64) -> Self {
        Self { hundredths }
    }

    pub fn hundredths(&self) -> i64 {
        self.hundredths
    }

    /// Parse display text such as `"￥ 1,234.5"`.
    ///
    /// Currency symbols, whitespace and thousands separators are ignored.
    /// Digits past the second decimal place are truncated.
    pub fn parse(text: &str) -> Result<Self, PriceParseError> {
        let number = PRICE_NUMBER
            .find(text)
            .ok_or_else(|| PriceParseError(text.to_string()))?
            .as_str()
            .replace(',', "");

        let (negative, digits) = match number.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, number.as_str()),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));

        let whole: i64 = whole
            .parse()
            .map_err(|_| PriceParseError(text.to_string()))?;
        let mut frac: String = frac.chars().take(2).collect();
        while frac.len() < 2 {
            frac.push('0');
        }
        let frac: i64 = frac
            .parse()
            .map_err(|_| PriceParseError(text.to_string()))?;

        let hundredths = whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(|| PriceParseError(text.to_string()))?;

        Ok(Self {
            hundredths: if negative { -hundredths } else { hundredths },
        })
    }
}

impl FromStr for Price {
    type Err = PriceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.hundredths < 0 { "-" } else { "" };
        let abs = self.hundredths.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Serialize for Price {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(f64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(s) => Price::parse(&s).map_err(serde::de::Error::custom),
            Repr::Number(n) => Ok(Price::from_hundredths((n * 100.0).round() as i64)),
        }
    }
}

/// One item's market data.
///
/// The name is the record key; it is not repeated inside the serialized
/// value because the artifact is a name-keyed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    #[serde(skip)]
    pub name: String,
    pub buff_price: Price,
    #[serde(default)]
    pub uu_price: Option<Price>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub today_change: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub week_change: String,
}

fn null_as_empty<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Why a raw record was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("empty item name")]
    EmptyName,
    #[error("missing buff price")]
    MissingPrice,
    #[error("{field}: {source}")]
    BadPrice {
        field: &'static str,
        source: PriceParseError,
    },
}

impl ItemRecord {
    /// Build a record from extracted field texts.
    ///
    /// The BUFF price is required. A UU price is optional but must parse
    /// when present.
    pub fn from_raw(name: &str, fields: &RawFields) -> Result<Self, RecordError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RecordError::EmptyName);
        }

        let buff_text = fields
            .get(BUFF_PRICE)
            .filter(|s| !s.trim().is_empty())
            .ok_or(RecordError::MissingPrice)?;
        let buff_price = Price::parse(buff_text).map_err(|source| RecordError::BadPrice {
            field: BUFF_PRICE,
            source,
        })?;

        let uu_price = match fields.get(UU_PRICE).filter(|s| !s.trim().is_empty()) {
            Some(text) => Some(Price::parse(text).map_err(|source| RecordError::BadPrice {
                field: UU_PRICE,
                source,
            })?),
            None => None,
        };

        Ok(Self {
            name: name.to_string(),
            buff_price,
            uu_price,
            today_change: fields.get(TODAY_CHANGE).cloned().unwrap_or_default(),
            week_change: fields.get(WEEK_CHANGE).cloned().unwrap_or_default(),
        })
    }
}
