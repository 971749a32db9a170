use ethers::types::{Address, U256};
use ethers::utils::to_checksum;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Implied decimals of a ray (interest rates, indexes).
pub const RAY_DECIMALS: u32 = 27;
/// Implied decimals of a wad (health factor).
pub const WAD_DECIMALS: u32 = 18;
/// Aave V3 base currency amounts are quoted with 8 decimals.
pub const BASE_CURRENCY_DECIMALS: u32 = 8;
/// Basis points: 10_000 == 1.0
pub const BPS_DECIMALS: u32 = 4;

// rust_decimal keeps a 96-bit mantissa and at most 28 fractional digits
const MAX_SCALE: u32 = 28;

fn mantissa_limit() -> U256 {
    U256::one() << 96
}

/// Converts a fixed-point integer with `decimals` implied digits into an exact `Decimal`.
///
/// Values whose mantissa does not fit in 96 bits lose their lowest digits
/// (truncation toward zero) until they fit. If the integer part alone does not
/// fit, `ConversionError::Overflow` is returned.
pub fn u256_to_decimal(value: U256, decimals: u32) -> Result<Decimal, ConversionError> {
    let mut mantissa = value;
    let mut scale = decimals;
    let limit = mantissa_limit();
    let ten = U256::from(10u8);

    while scale > MAX_SCALE {
        mantissa /= ten;
        scale -= 1;
    }
    while mantissa >= limit {
        if scale == 0 {
            return Err(ConversionError::Overflow);
        }
        mantissa /= ten;
        scale -= 1;
    }

    let decimal = Decimal::try_from_i128_with_scale(mantissa.as_u128() as i128, scale)
        .map_err(|e| ConversionError::InvalidDecimal(e.to_string()))?;
    Ok(decimal.normalize())
}

/// Ray (27 decimals) to decimal.
pub fn from_ray(value: U256) -> Result<Decimal, ConversionError> {
    u256_to_decimal(value, RAY_DECIMALS)
}

/// Wad (18 decimals) to decimal.
pub fn from_wad(value: U256) -> Result<Decimal, ConversionError> {
    u256_to_decimal(value, WAD_DECIMALS)
}

pub fn from_base_currency(value: U256) -> Result<Decimal, ConversionError> {
    u256_to_decimal(value, BASE_CURRENCY_DECIMALS)
}

pub fn from_bps(value: U256) -> Result<Decimal, ConversionError> {
    u256_to_decimal(value, BPS_DECIMALS)
}

/// Canonical mixed-case (EIP-55) textual form of an address.
pub fn checksummed(addr: &Address) -> String {
    to_checksum(addr, None)
}

/// Parses an address regardless of the case it was written in.
pub fn string_to_address(s: &str) -> Result<Address, ConversionError> {
    Address::from_str(s.trim()).map_err(|e| ConversionError::InvalidAddress(format!("{s}: {e}")))
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Invalid decimal: {0}")]
    InvalidDecimal(String),
    #[error("Overflow in conversion")]
    Overflow,
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}
