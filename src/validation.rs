// validation.rs
// Parsing of raw form and spreadsheet values into typed fields.
// Parsers return the user-facing message on failure so callers can collect
// every problem of a form before answering.

use std::str::FromStr;

use chrono::NaiveDate;
use mongodb::bson::oid::ObjectId;
use rust_decimal::Decimal;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn clean(value: Option<&str>) -> String {
    value.unwrap_or_default().trim().to_string()
}

pub fn required(value: &str, message: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(message.to_string())
    } else {
        Ok(())
    }
}

pub fn parse_price(raw: &str) -> Result<Decimal, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("Price is required.".into());
    }
    let price = Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|_| "Price must be a number.".to_string())?;
    if price.is_sign_negative() && !price.is_zero() {
        return Err("Price cannot be negative.".into());
    }
    Ok(price.round_dp(2))
}

/// Opening stock of a product: a non-negative integer.
pub fn parse_quantity(raw: &str) -> Result<i64, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("Quantity is required.".into());
    }
    let quantity = raw
        .parse::<i64>()
        .map_err(|_| "Quantity must be an integer.".to_string())?;
    if quantity < 0 {
        return Err("Quantity cannot be negative.".into());
    }
    Ok(quantity)
}

/// Quantity of a purchase or outgoing entry: a positive integer.
pub fn parse_entry_quantity(raw: &str) -> Result<i64, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("Quantity is required.".into());
    }
    let quantity = raw
        .parse::<i64>()
        .map_err(|_| "Quantity must be an integer.".to_string())?;
    if quantity <= 0 {
        return Err("Quantity must be greater than zero.".into());
    }
    Ok(quantity)
}

/// Spreadsheet cells often hold integers as floats ("10.0").
pub fn parse_import_quantity(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let quantity = match raw.parse::<i64>() {
        Ok(q) => q,
        Err(_) => {
            let float = raw.parse::<f64>().ok()?;
            if !float.is_finite() {
                return None;
            }
            float.trunc() as i64
        }
    };
    (quantity >= 0).then_some(quantity)
}

/// Blank input yields `default`.
pub fn parse_date(raw: &str, default: NaiveDate) -> Result<NaiveDate, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(default);
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| "Invalid date format.".to_string())
}

pub fn parse_object_id(raw: &str) -> Option<ObjectId> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    ObjectId::from_str(raw).ok()
}

pub fn check_new_password(password: &str, confirm: &str, min_len: usize) -> Vec<String> {
    let mut errors = Vec::new();
    if password.is_empty() {
        errors.push("Password is required.".to_string());
    } else if password.chars().count() < min_len {
        errors.push(format!("Password must be at least {min_len} characters."));
    }
    if password != confirm {
        errors.push("Passwords do not match.".to_string());
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_accepts_decimals_and_rejects_negatives() {
        assert_eq!(parse_price("9.99").unwrap(), Decimal::new(999, 2));
        assert_eq!(parse_price(" 10 ").unwrap(), Decimal::new(10, 0));
        assert_eq!(parse_price("-1").unwrap_err(), "Price cannot be negative.");
        assert_eq!(parse_price("abc").unwrap_err(), "Price must be a number.");
        assert_eq!(parse_price("").unwrap_err(), "Price is required.");
    }

    #[test]
    fn entry_quantity_must_be_positive() {
        assert_eq!(parse_entry_quantity("4").unwrap(), 4);
        assert!(parse_entry_quantity("0").is_err());
        assert!(parse_entry_quantity("-3").is_err());
        assert_eq!(
            parse_entry_quantity("2.5").unwrap_err(),
            "Quantity must be an integer."
        );
    }

    #[test]
    fn product_quantity_allows_zero() {
        assert_eq!(parse_quantity("0").unwrap(), 0);
        assert!(parse_quantity("-1").is_err());
    }

    #[test]
    fn import_quantity_truncates_floats() {
        assert_eq!(parse_import_quantity("10.0"), Some(10));
        assert_eq!(parse_import_quantity("5"), Some(5));
        assert_eq!(parse_import_quantity("-2"), None);
        assert_eq!(parse_import_quantity("many"), None);
    }

    #[test]
    fn blank_date_uses_default() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(parse_date("", today).unwrap(), today);
        assert_eq!(
            parse_date("2024-01-31", today).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()
        );
        assert_eq!(parse_date("31/01/2024", today).unwrap_err(), "Invalid date format.");
    }

    #[test]
    fn password_rules_collect_every_problem() {
        let errors = check_new_password("abc", "abd", 6);
        assert_eq!(errors.len(), 2);
        assert!(check_new_password("secret1", "secret1", 6).is_empty());
    }
}
