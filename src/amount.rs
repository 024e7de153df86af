//! LBC amounts
//!
//! Amounts are carried as integer dewies (1 LBC = 100,000,000 dewies) and
//! rendered with trailing zeros trimmed, keeping at least one decimal.

use crate::error::WalletError;

/// Dewies per LBC
pub const COIN: u64 = 100_000_000;

const DECIMALS: usize = 8;

/// Format a signed dewies amount as an LBC string ("0.01", "-0.01", "10.0")
pub fn dewies_to_lbc(dewies: i64) -> String {
    let sign = if dewies < 0 { "-" } else { "" };
    let abs = dewies.unsigned_abs();
    let whole = abs / COIN;
    let mut fraction = format!("{:0width$}", abs % COIN, width = DECIMALS);
    while fraction.len() > 1 && fraction.ends_with('0') {
        fraction.pop();
    }
    format!("{}{}.{}", sign, whole, fraction)
}

/// Parse a non-negative decimal LBC string into dewies
pub fn lbc_to_dewies(lbc: &str) -> Result<u64, WalletError> {
    let invalid = || WalletError::Validation(format!("'{}' is not a valid LBC amount", lbc));

    let trimmed = lbc.trim();
    let (whole, fraction) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (trimmed, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if fraction.len() > DECIMALS
        || !whole.chars().all(|c| c.is_ascii_digit())
        || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }

    let whole_dewies = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<u64>()
            .ok()
            .and_then(|w| w.checked_mul(COIN))
            .ok_or_else(invalid)?
    };
    let fraction_dewies = if fraction.is_empty() {
        0
    } else {
        format!("{:0<width$}", fraction, width = DECIMALS)
            .parse::<u64>()
            .map_err(|_| invalid())?
    };

    whole_dewies.checked_add(fraction_dewies).ok_or_else(invalid)
}
