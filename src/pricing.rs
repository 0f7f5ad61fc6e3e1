use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::LazyLock;

/// A grouped amount ("1,299.00", "1 250.50") or a plain one ("1299.00").
/// A group separator is one character followed by exactly three digits.
static AMOUNT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{1,3}(?:[, \x{00A0}\x{202F}'’]\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?")
        .expect("amount pattern compiles")
});

/// Characters storefronts use to group thousands.
const GROUP_SEPARATORS: [char; 6] = [',', ' ', '\u{00A0}', '\u{202F}', '\'', '’'];

/// Numeric amount of the first price in displayed text ("¥1,299.00", "US$ 19.99",
/// "￥99-199"), or `None` when there is none. For ranges the lower bound is returned.
pub fn normalize_price(text: &str) -> Option<Decimal> {
    let candidate = AMOUNT_REGEX.find(text)?.as_str();
    let digits: String = candidate
        .chars()
        .filter(|c| !GROUP_SEPARATORS.contains(c))
        .collect();
    Decimal::from_str(&digits).ok()
}
