//! Exact-precision amount codec
//!
//! Converts between human decimal strings and integer base-unit strings.
//! All arithmetic runs on U256; monetary values never touch floating point.
//! Invalid input yields "0" rather than an error so UI-driven call paths
//! stay responsive.

use ethers::types::U256;
use std::cmp::Ordering;

/// Decimal precision used for derived ratios (exchange rates).
const RATIO_DECIMALS: u32 = 18;

/// Convert a human decimal string to base units.
///
/// The fractional part is padded or truncated to exactly `decimals` digits
/// before concatenation; leading zeros are stripped (keeping at least "0").
pub fn to_base_units(amount: &str, decimals: u32) -> String {
    let amount = amount.trim();
    if amount.is_empty() {
        return "0".to_string();
    }

    let mut parts = amount.splitn(2, '.');
    let int_part = parts.next().unwrap_or("");
    let frac_part = parts.next().unwrap_or("");

    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
        || (int_part.is_empty() && frac_part.is_empty())
    {
        return "0".to_string();
    }

    let mut frac = frac_part.to_string();
    frac.truncate(decimals as usize);
    while frac.len() < decimals as usize {
        frac.push('0');
    }

    let combined = format!("{}{}", int_part, frac);
    match U256::from_dec_str(&combined) {
        Ok(value) => value.to_string(),
        Err(_) => "0".to_string(),
    }
}

/// Convert a base-unit string back to a human decimal string.
///
/// Trailing fractional zeros are trimmed; the decimal point is omitted
/// entirely when the remainder is zero.
pub fn from_base_units(amount: &str, decimals: u32) -> String {
    let value = match U256::from_dec_str(amount.trim()) {
        Ok(v) => v,
        Err(_) => return "0".to_string(),
    };

    if decimals == 0 {
        return value.to_string();
    }

    let divisor = pow10(decimals);
    let whole = value / divisor;
    let rem = value % divisor;

    if rem.is_zero() {
        return whole.to_string();
    }

    let mut frac = rem.to_string();
    while frac.len() < decimals as usize {
        frac.insert(0, '0');
    }
    let frac = frac.trim_end_matches('0');

    format!("{}.{}", whole, frac)
}

/// Apply a basis-point adjustment: `amount * (10000 - bps) / 10000`.
///
/// A positive `bps` deducts (slippage-adjusted minimum); a negative `bps`
/// adds. `bps >= 10000` collapses to "0".
pub fn apply_bps(amount: &str, bps: i64) -> String {
    let value = match U256::from_dec_str(amount.trim()) {
        Ok(v) => v,
        Err(_) => return "0".to_string(),
    };

    let factor = 10_000i64 - bps;
    if factor <= 0 {
        return "0".to_string();
    }

    match value.checked_mul(U256::from(factor as u64)) {
        Some(scaled) => (scaled / U256::from(10_000u64)).to_string(),
        None => "0".to_string(),
    }
}

/// Integer-scaled ratio of two base-unit amounts, as a decimal string.
///
/// `ratio(out, out_decimals, in, in_decimals)` is the exchange rate
/// out-per-in at 18-digit precision. A zero or invalid denominator yields
/// "0".
pub fn ratio(num: &str, num_decimals: u32, den: &str, den_decimals: u32) -> String {
    let num = match U256::from_dec_str(num.trim()) {
        Ok(v) => v,
        Err(_) => return "0".to_string(),
    };
    let den = match U256::from_dec_str(den.trim()) {
        Ok(v) => v,
        Err(_) => return "0".to_string(),
    };
    if den.is_zero() {
        return "0".to_string();
    }

    // num / 10^nd over den / 10^dd, scaled to RATIO_DECIMALS digits:
    // num * 10^dd * 10^RATIO / (den * 10^nd)
    let scaled = num
        .checked_mul(pow10(den_decimals))
        .and_then(|v| v.checked_mul(pow10(RATIO_DECIMALS)));
    let divisor = den.checked_mul(pow10(num_decimals));

    match (scaled, divisor) {
        (Some(scaled), Some(divisor)) if !divisor.is_zero() => {
            from_base_units(&(scaled / divisor).to_string(), RATIO_DECIMALS)
        }
        _ => "0".to_string(),
    }
}

/// Numeric comparison of two decimal strings without floating point.
///
/// Both sides are scaled to 18 fractional digits; digits beyond that are
/// ignored. Invalid input compares as zero.
pub fn cmp_decimal(a: &str, b: &str) -> Ordering {
    let left = U256::from_dec_str(&to_base_units(a, RATIO_DECIMALS)).unwrap_or_default();
    let right = U256::from_dec_str(&to_base_units(b, RATIO_DECIMALS)).unwrap_or_default();
    left.cmp(&right)
}

fn pow10(exp: u32) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_base_units_pads_and_truncates() {
        assert_eq!(to_base_units("1.5", 18), "1500000000000000000");
        assert_eq!(to_base_units("0.000001", 6), "1");
        assert_eq!(to_base_units("123", 0), "123");
        // Extra fractional digits are truncated, not rounded
        assert_eq!(to_base_units("1.23456", 2), "123");
    }

    #[test]
    fn to_base_units_strips_leading_zeros() {
        assert_eq!(to_base_units("0001.10", 2), "110");
        assert_eq!(to_base_units("0.0", 6), "0");
    }

    #[test]
    fn to_base_units_fails_soft() {
        assert_eq!(to_base_units("", 18), "0");
        assert_eq!(to_base_units("abc", 18), "0");
        assert_eq!(to_base_units("1.2.3", 18), "0");
        assert_eq!(to_base_units("-1", 18), "0");
    }

    #[test]
    fn from_base_units_trims_and_omits_point() {
        assert_eq!(from_base_units("1500000000000000000", 18), "1.5");
        assert_eq!(from_base_units("1000000", 6), "1");
        assert_eq!(from_base_units("1", 6), "0.000001");
        assert_eq!(from_base_units("42", 0), "42");
    }

    #[test]
    fn round_trip_is_numerically_stable() {
        for (amount, decimals) in [
            ("1.5", 18u32),
            ("0.000001", 6),
            ("123456.789", 9),
            ("7", 0),
            ("0.1", 1),
        ] {
            let base = to_base_units(amount, decimals);
            let back = from_base_units(&base, decimals);
            assert_eq!(cmp_decimal(amount, &back), Ordering::Equal, "{amount}");
        }
    }

    #[test]
    fn apply_bps_deducts_slippage() {
        assert_eq!(apply_bps("1000000", 50), "995000");
        assert_eq!(apply_bps("1000000", 0), "1000000");
        // Negative bps adds headroom instead
        assert_eq!(apply_bps("1000000", -50), "1005000");
    }

    #[test]
    fn apply_bps_is_monotonic_in_bps() {
        let amounts: Vec<U256> = [0i64, 10, 50, 100, 500, 9_999]
            .iter()
            .map(|bps| U256::from_dec_str(&apply_bps("123456789", *bps)).unwrap())
            .collect();
        for pair in amounts.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
        assert_eq!(apply_bps("123456789", 10_000), "0");
    }

    #[test]
    fn ratio_gives_rate_from_base_units() {
        // 2.0 out for 1.0 in, both 18 decimals
        assert_eq!(
            ratio("2000000000000000000", 18, "1000000000000000000", 18),
            "2"
        );
        // 3000 USDC (6 decimals) for 1 ETH (18 decimals)
        assert_eq!(ratio("3000000000", 6, "1000000000000000000", 18), "3000");
        assert_eq!(ratio("1", 6, "0", 18), "0");
    }

    #[test]
    fn cmp_decimal_orders_numerically() {
        assert_eq!(cmp_decimal("105", "100"), Ordering::Greater);
        assert_eq!(cmp_decimal("0.5", "0.50"), Ordering::Equal);
        assert_eq!(cmp_decimal("99.9", "100"), Ordering::Less);
        assert_eq!(cmp_decimal("0.000000000001", "0"), Ordering::Greater);
    }
}
