//! Unit & Money model (component A).
//!
//! Money is a fixed-point decimal, always rounded to 2 places half-away-from-zero.
//! Quantities are stored internally as an integer count of the smallest base unit
//! for their `UnitType`; display strings (`"5-200"`, `"5.5"`) are parsed/formatted
//! only at the boundary, never compared or summed directly.

use crate::errors::EngineError;
use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A monetary amount, always carried at 2 decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn from_decimal(d: Decimal) -> Self {
        Money(d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }

    pub fn parse(s: &str) -> Result<Self, EngineError> {
        let d = Decimal::from_str(s.trim())
            .map_err(|e| EngineError::Validation(format!("invalid money '{s}': {e}")))?;
        Ok(Self::from_decimal(d))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn abs(&self) -> Money {
        Money(self.0.abs())
    }

    pub fn max(self, other: Money) -> Money {
        if self.0 >= other.0 {
            self
        } else {
            other
        }
    }

    pub fn min(self, other: Money) -> Money {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }

    /// `max(0, self)`.
    pub fn floor_zero(&self) -> Money {
        if self.is_negative() {
            Money::ZERO
        } else {
            *self
        }
    }

    pub fn checked_add(&self, other: Money) -> Result<Money, EngineError> {
        self.0
            .checked_add(other.0)
            .map(Money::from_decimal)
            .ok_or_else(|| EngineError::Internal("money overflow on add".to_string()))
    }

    pub fn checked_sub(&self, other: Money) -> Result<Money, EngineError> {
        self.0
            .checked_sub(other.0)
            .map(Money::from_decimal)
            .ok_or_else(|| EngineError::Internal("money overflow on sub".to_string()))
    }

    pub fn neg(&self) -> Money {
        Money(-self.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl From<i64> for Money {
    fn from(v: i64) -> Self {
        Money(Decimal::from(v))
    }
}

/// Unit types a product may be tracked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitType {
    KgGrams,
    Kg,
    Piece,
    Bag,
    Meter,
    Foot,
    Ton,
}

impl UnitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitType::KgGrams => "kg-grams",
            UnitType::Kg => "kg",
            UnitType::Piece => "piece",
            UnitType::Bag => "bag",
            UnitType::Meter => "meter",
            UnitType::Foot => "foot",
            UnitType::Ton => "ton",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, EngineError> {
        match s {
            "kg-grams" => Ok(UnitType::KgGrams),
            "kg" => Ok(UnitType::Kg),
            "piece" => Ok(UnitType::Piece),
            "bag" => Ok(UnitType::Bag),
            "meter" => Ok(UnitType::Meter),
            "foot" => Ok(UnitType::Foot),
            "ton" => Ok(UnitType::Ton),
            other => Err(EngineError::Validation(format!("unknown unit_type: {other}"))),
        }
    }

    /// Whether this unit type allows fractional (decimal) quantities.
    fn allows_fraction(&self) -> bool {
        matches!(
            self,
            UnitType::KgGrams | UnitType::Kg | UnitType::Meter | UnitType::Foot | UnitType::Ton
        )
    }

    /// Number of base units represented by "1" of the display unit.
    /// kg-grams stores grams (3 decimal places via the kg-g split); kg,
    /// meter, foot, and ton store hundredths to keep two decimal places of
    /// precision; piece/bag are already whole units.
    pub(crate) fn base_scale(&self) -> i64 {
        match self {
            UnitType::KgGrams => 1000,
            UnitType::Kg | UnitType::Meter | UnitType::Foot | UnitType::Ton => 100,
            UnitType::Piece | UnitType::Bag => 1,
        }
    }
}

/// A quantity expressed in the smallest base unit for its `UnitType`.
/// Never compare or sum raw display strings — always go through this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quantity(pub i64);

impl Quantity {
    pub const ZERO: Quantity = Quantity(0);

    /// Parses a display-syntax quantity string for the given unit type.
    ///
    /// - `kg-grams`: `"5-200"` → 5 kg 200 g → 5200 (grams)
    /// - `kg`/`meter`/`foot`/`ton`: decimal string, e.g. `"5.5"` → 550 (hundredths)
    /// - `piece`/`bag`: integer-only, e.g. `"12"` → 12
    pub fn parse(s: &str, unit: UnitType) -> Result<Self, EngineError> {
        let s = s.trim();
        match unit {
            UnitType::KgGrams => {
                let (kg_part, g_part) = s.split_once('-').ok_or_else(|| {
                    EngineError::Validation(format!(
                        "invalid kg-grams quantity '{s}': expected 'kg-grams' syntax"
                    ))
                })?;
                let kg: i64 = kg_part
                    .parse()
                    .map_err(|_| EngineError::Validation(format!("invalid kg component in '{s}'")))?;
                let g: i64 = g_part
                    .parse()
                    .map_err(|_| EngineError::Validation(format!("invalid gram component in '{s}'")))?;
                if !(0..1000).contains(&g) {
                    return Err(EngineError::Validation(format!(
                        "gram component out of range in '{s}': must be 0-999"
                    )));
                }
                Ok(Quantity(kg * 1000 + g))
            }
            UnitType::Piece | UnitType::Bag => {
                let n: i64 = s
                    .parse()
                    .map_err(|_| EngineError::Validation(format!("invalid integer quantity '{s}' for {}", unit.as_str())))?;
                Ok(Quantity(n))
            }
            UnitType::Kg | UnitType::Meter | UnitType::Foot | UnitType::Ton => {
                let d = Decimal::from_str(s)
                    .map_err(|e| EngineError::Validation(format!("invalid decimal quantity '{s}': {e}")))?;
                let scaled = d * Decimal::from(unit.base_scale());
                let rounded = scaled.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
                let base: i64 = rounded
                    .to_string()
                    .parse()
                    .map_err(|_| EngineError::Internal(format!("quantity overflow parsing '{s}'")))?;
                Ok(Quantity(base))
            }
        }
    }

    /// Renders a base-unit quantity back into its display syntax for `unit`.
    pub fn format(&self, unit: UnitType) -> String {
        match unit {
            UnitType::KgGrams => {
                let kg = self.0.div_euclid(1000);
                let g = self.0.rem_euclid(1000);
                format!("{kg}-{g}")
            }
            UnitType::Piece | UnitType::Bag => self.0.to_string(),
            UnitType::Kg | UnitType::Meter | UnitType::Foot | UnitType::Ton => {
                let scale = unit.base_scale();
                let whole = self.0.div_euclid(scale);
                let frac = self.0.rem_euclid(scale);
                if scale == 100 {
                    format!("{whole}.{frac:02}")
                } else {
                    format!("{whole}.{frac:03}")
                }
            }
        }
    }

    pub fn checked_add(&self, other: Quantity) -> Result<Quantity, EngineError> {
        self.0
            .checked_add(other.0)
            .map(Quantity)
            .ok_or_else(|| EngineError::Internal("quantity overflow on add".to_string()))
    }

    pub fn checked_sub(&self, other: Quantity) -> Result<Quantity, EngineError> {
        self.0
            .checked_sub(other.0)
            .map(Quantity)
            .ok_or_else(|| EngineError::Internal("quantity overflow on sub".to_string()))
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn abs(&self) -> Quantity {
        Quantity(self.0.abs())
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether `unit.allows_fraction()` is exposed for callers validating item
/// input before parsing (e.g. rejecting a T-iron length on a `piece` product).
pub fn unit_allows_fraction(unit: UnitType) -> bool {
    unit.allows_fraction()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kg_grams() {
        assert_eq!(Quantity::parse("5-200", UnitType::KgGrams).unwrap(), Quantity(5200));
        assert_eq!(Quantity::parse("10-0", UnitType::KgGrams).unwrap(), Quantity(10000));
        assert_eq!(Quantity::parse("0-500", UnitType::KgGrams).unwrap(), Quantity(500));
    }

    #[test]
    fn test_format_kg_grams_roundtrip() {
        let q = Quantity::parse("2-500", UnitType::KgGrams).unwrap();
        assert_eq!(q.format(UnitType::KgGrams), "2-500");
    }

    #[test]
    fn test_parse_kg_decimal() {
        assert_eq!(Quantity::parse("5.5", UnitType::Kg).unwrap(), Quantity(550));
        assert_eq!(Quantity::parse("5", UnitType::Kg).unwrap(), Quantity(500));
    }

    #[test]
    fn test_parse_piece_integer_only() {
        assert_eq!(Quantity::parse("12", UnitType::Piece).unwrap(), Quantity(12));
        assert!(Quantity::parse("12.5", UnitType::Piece).is_err());
    }

    #[test]
    fn test_parse_foot_decimal() {
        let q = Quantity::parse("21.5", UnitType::Foot).unwrap();
        assert_eq!(q, Quantity(2150));
        assert_eq!(q.format(UnitType::Foot), "21.50");
    }

    #[test]
    fn test_invalid_gram_component() {
        assert!(Quantity::parse("5-1000", UnitType::KgGrams).is_err());
    }

    #[test]
    fn test_money_rounding_half_away_from_zero() {
        assert_eq!(Money::parse("10.005").unwrap().to_string(), "10.01");
        assert_eq!(Money::parse("10.004").unwrap().to_string(), "10.00");
        assert_eq!(Money::parse("-10.005").unwrap().to_string(), "-10.01");
    }

    #[test]
    fn test_money_floor_zero() {
        assert_eq!(Money::parse("-50.00").unwrap().floor_zero(), Money::ZERO);
        assert_eq!(Money::parse("50.00").unwrap().floor_zero(), Money::parse("50.00").unwrap());
    }

    #[test]
    fn test_from_decimal_literal_matches_parse() {
        use rust_decimal_macros::dec;
        assert_eq!(Money::from_decimal(dec!(19.99)), Money::parse("19.99").unwrap());
        assert_eq!(Money::from_decimal(dec!(-5.005)), Money::parse("-5.005").unwrap());
    }
}
