use crate::errors::{LensError, Result};
use crate::types::conversions::{
    from_base_currency, from_bps, from_ray, from_wad, ConversionError,
};
use ethers::abi::Token;
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use serde::Serialize;

// Aave V3 ReserveData field positions
const LIQUIDITY_RATE_FIELD: usize = 2;
const VARIABLE_BORROW_RATE_FIELD: usize = 4;

/// Raw `getReserveData` values, still in ray units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReserveData {
    pub asset: Address,
    pub current_liquidity_rate: U256,
    pub current_variable_borrow_rate: U256,
}

/// Reserve state with rates converted to decimals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReserveSnapshot {
    pub asset: Address,
    /// Supply APR as a fraction (0.05 == 5%).
    #[serde(with = "rust_decimal::serde::str")]
    pub liquidity_rate: Decimal,
    /// Variable borrow APR as a fraction.
    #[serde(with = "rust_decimal::serde::str")]
    pub variable_borrow_rate: Decimal,
    /// Supply APR in percent.
    #[serde(with = "rust_decimal::serde::str")]
    pub lend_rate: Decimal,
    /// Variable borrow APR in percent.
    #[serde(with = "rust_decimal::serde::str")]
    pub borrow_rate: Decimal,
}

/// Raw `getUserAccountData` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAccountData {
    pub account: Address,
    pub total_collateral_base: U256,
    pub total_debt_base: U256,
    pub available_borrows_base: U256,
    pub current_liquidation_threshold: U256,
    pub ltv: U256,
    pub health_factor: U256,
}

/// Aggregated borrower position in the pool's base currency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSnapshot {
    pub account: Address,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_collateral: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_debt: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub available_borrows: Decimal,
    /// Weighted average liquidation threshold as a fraction.
    #[serde(with = "rust_decimal::serde::str")]
    pub liquidation_threshold: Decimal,
    /// Weighted average loan-to-value as a fraction.
    #[serde(with = "rust_decimal::serde::str")]
    pub ltv: Decimal,
    /// `None` when the pool reports an unbounded health factor (no debt).
    #[serde(with = "rust_decimal::serde::str_option")]
    pub health_factor: Option<Decimal>,
}

// Struct outputs decode either as one tuple token or as a flat list
fn flatten_outputs(mut tokens: Vec<Token>) -> Vec<Token> {
    if let [Token::Tuple(fields)] = tokens.as_mut_slice() {
        return std::mem::take(fields);
    }
    tokens
}

fn uint_field(fields: &[Token], index: usize, what: &str) -> Result<U256> {
    fields
        .get(index)
        .cloned()
        .and_then(Token::into_uint)
        .ok_or_else(|| LensError::Decode(format!("{what}: expected uint at output #{index}")))
}

impl RawReserveData {
    pub fn from_tokens(asset: Address, tokens: Vec<Token>) -> Result<Self> {
        let fields = flatten_outputs(tokens);
        Ok(Self {
            asset,
            current_liquidity_rate: uint_field(&fields, LIQUIDITY_RATE_FIELD, "getReserveData")?,
            current_variable_borrow_rate: uint_field(
                &fields,
                VARIABLE_BORROW_RATE_FIELD,
                "getReserveData",
            )?,
        })
    }
}

impl RawAccountData {
    pub fn from_tokens(account: Address, tokens: Vec<Token>) -> Result<Self> {
        let fields = flatten_outputs(tokens);
        let field = |i| uint_field(&fields, i, "getUserAccountData");
        Ok(Self {
            account,
            total_collateral_base: field(0)?,
            total_debt_base: field(1)?,
            available_borrows_base: field(2)?,
            current_liquidation_threshold: field(3)?,
            ltv: field(4)?,
            health_factor: field(5)?,
        })
    }
}

impl TryFrom<RawReserveData> for ReserveSnapshot {
    type Error = ConversionError;

    fn try_from(raw: RawReserveData) -> std::result::Result<Self, Self::Error> {
        let hundred = Decimal::ONE_HUNDRED;
        let liquidity_rate = from_ray(raw.current_liquidity_rate)?;
        let variable_borrow_rate = from_ray(raw.current_variable_borrow_rate)?;

        Ok(ReserveSnapshot {
            asset: raw.asset,
            liquidity_rate,
            variable_borrow_rate,
            lend_rate: liquidity_rate
                .checked_mul(hundred)
                .ok_or(ConversionError::Overflow)?,
            borrow_rate: variable_borrow_rate
                .checked_mul(hundred)
                .ok_or(ConversionError::Overflow)?,
        })
    }
}

impl TryFrom<RawAccountData> for AccountSnapshot {
    type Error = ConversionError;

    fn try_from(raw: RawAccountData) -> std::result::Result<Self, Self::Error> {
        let health_factor = match from_wad(raw.health_factor) {
            Ok(value) => Some(value),
            Err(ConversionError::Overflow) => None,
            Err(e) => return Err(e),
        };

        Ok(AccountSnapshot {
            account: raw.account,
            total_collateral: from_base_currency(raw.total_collateral_base)?,
            total_debt: from_base_currency(raw.total_debt_base)?,
            available_borrows: from_base_currency(raw.available_borrows_base)?,
            liquidation_threshold: from_bps(raw.current_liquidation_threshold)?,
            ltv: from_bps(raw.ltv)?,
            health_factor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn uint(v: u128) -> Token {
        Token::Uint(U256::from(v))
    }

    #[test]
    fn reserve_data_decodes_from_wrapped_tuple() {
        let ray = 10u128.pow(27);
        let fields = vec![
            uint(0),
            uint(ray),
            uint(ray / 50), // 2% supply
            uint(ray),
            uint(ray / 20), // 5% variable borrow
            uint(0),
            uint(1_700_000_000),
            uint(3),
        ];
        let raw = RawReserveData::from_tokens(Address::zero(), vec![Token::Tuple(fields)]).unwrap();
        let snapshot = ReserveSnapshot::try_from(raw).unwrap();

        assert_eq!(snapshot.lend_rate, Decimal::from(2));
        assert_eq!(snapshot.borrow_rate, Decimal::from(5));
        assert_eq!(snapshot.variable_borrow_rate, Decimal::from_str("0.05").unwrap());
    }

    #[test]
    fn reserve_data_rejects_short_output() {
        let err = RawReserveData::from_tokens(Address::zero(), vec![uint(1), uint(2)]).unwrap_err();
        assert!(matches!(err, LensError::Decode(_)));
    }

    #[test]
    fn oversized_rate_is_overflow_not_panic() {
        let raw = RawReserveData {
            asset: Address::zero(),
            current_liquidity_rate: U256::exp10(54),
            current_variable_borrow_rate: U256::zero(),
        };
        assert!(matches!(ReserveSnapshot::try_from(raw), Err(ConversionError::Overflow)));

        let raw = RawReserveData {
            asset: Address::zero(),
            current_liquidity_rate: U256::zero(),
            current_variable_borrow_rate: U256::exp10(54),
        };
        assert!(matches!(ReserveSnapshot::try_from(raw), Err(ConversionError::Overflow)));
    }

    #[test]
    fn account_data_converts_units() {
        let tokens = vec![
            uint(250_000_000_000),           // 2500.00000000 collateral
            uint(100_000_000_000),           // 1000 debt
            uint(50_000_000_000),            // 500 available
            uint(8_250),                     // 82.5% threshold
            uint(8_000),                     // 80% ltv
            uint(2_062_500_000_000_000_000), // 2.0625 HF
        ];
        let raw = RawAccountData::from_tokens(Address::zero(), tokens).unwrap();
        let snapshot = AccountSnapshot::try_from(raw).unwrap();

        assert_eq!(snapshot.total_collateral, Decimal::from(2500));
        assert_eq!(snapshot.total_debt, Decimal::from(1000));
        assert_eq!(snapshot.available_borrows, Decimal::from(500));
        assert_eq!(snapshot.liquidation_threshold, Decimal::from_str("0.825").unwrap());
        assert_eq!(snapshot.ltv, Decimal::from_str("0.8").unwrap());
        assert_eq!(snapshot.health_factor, Some(Decimal::from_str("2.0625").unwrap()));
    }

    #[test]
    fn debt_free_account_has_unbounded_health_factor() {
        let mut tokens: Vec<Token> = (0..5).map(|_| uint(0)).collect();
        tokens.push(Token::Uint(U256::MAX));
        let raw = RawAccountData::from_tokens(Address::zero(), tokens).unwrap();
        let snapshot = AccountSnapshot::try_from(raw).unwrap();
        assert_eq!(snapshot.health_factor, None);
    }
}
