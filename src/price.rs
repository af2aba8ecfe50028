//! Price normalization and display.
//!
//! Prices are stored as decimal strings ("1234.56"). User input is treated
//! like a currency keypad: every digit typed shifts into the cents column,
//! so "R$ 12,34", "12.34" and "1234" all mean 1234 cents.

/// Extract the amount in cents from free-form input. `None` if no digits.
pub fn cents_from_input(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    // Saturate absurd inputs rather than overflow
    Some(digits.parse().unwrap_or(u64::MAX))
}

pub fn decimal_from_cents(cents: u64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

/// Normalize user input to a stored decimal string ("0.00" when empty).
pub fn normalize(text: &str) -> String {
    decimal_from_cents(cents_from_input(text).unwrap_or(0))
}

/// Render a stored price for display, pt-BR style. Strings that are not
/// plain decimals (older records held pre-formatted text) pass through.
pub fn format_brl(price: &str) -> String {
    match parse_decimal(price) {
        Some(cents) => {
            let reais = group_thousands(cents / 100);
            format!("R$ {},{:02}", reais, cents % 100)
        }
        None => price.to_string(),
    }
}

fn parse_decimal(price: &str) -> Option<u64> {
    let (whole, frac) = match price.split_once('.') {
        Some((w, f)) => (w, f),
        None => (price, ""),
    };
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let whole: u64 = whole.parse().ok()?;
    let frac: u64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<u64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    whole.checked_mul(100)?.checked_add(frac)
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    out
}
