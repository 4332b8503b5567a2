use std::fmt;

/// Monetary values are integer cents to keep escrow accounting exact.
/// 0.50 units of value = 50 cents.
pub type Cents = i64;

/// Format cents as a decimal string. Example: 5000 -> "50.00", 50 -> "0.50"
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Parse a decimal amount string into cents.
/// Accepts "0.5", "0.50", "50", ".5"; at most two decimal digits.
pub fn parse_cents(input: &str) -> Result<Cents, ParseCentsError> {
    let input = input.trim();
    let (negative, digits) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input),
    };

    let (units_str, frac_str) = match digits.split_once('.') {
        Some((u, f)) => (u, f),
        None => (digits, ""),
    };

    if units_str.is_empty() && frac_str.is_empty() {
        return Err(ParseCentsError::InvalidFormat);
    }

    let units: i64 = if units_str.is_empty() {
        0
    } else {
        units_str.parse().map_err(|_| ParseCentsError::InvalidFormat)?
    };

    let frac: i64 = match frac_str.len() {
        0 => 0,
        1 => frac_str.parse::<i64>().map_err(|_| ParseCentsError::InvalidFormat)? * 10,
        2 => frac_str.parse().map_err(|_| ParseCentsError::InvalidFormat)?,
        _ => return Err(ParseCentsError::TooManyDecimals),
    };

    let cents = units * 100 + frac;
    Ok(if negative { -cents } else { cents })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseCentsError {
    InvalidFormat,
    TooManyDecimals,
}

impl fmt::Display for ParseCentsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseCentsError::InvalidFormat => write!(f, "invalid money format"),
            ParseCentsError::TooManyDecimals => {
                write!(f, "amounts support at most two decimal digits")
            }
        }
    }
}

impl std::error::Error for ParseCentsError {}
