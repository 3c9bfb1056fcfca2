//! Parsers for the cluster's quantity strings (`100m`, `16Gi`, `2`).

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Parse a quantity into its base unit as f64. Unknown suffixes yield zero
/// rather than an error: conversion is total.
pub fn parse_quantity(q: &Quantity) -> f64 {
    let raw = q.0.trim();
    if raw.is_empty() {
        return 0.0;
    }

    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e' || c == 'E'))
        .unwrap_or(raw.len());
    // An exponent suffix like `129e6` has no unit part; `find` above keeps
    // `e`/`E` inside the numeric portion.
    let (number, suffix) = raw.split_at(split);
    let value: f64 = match number.parse() {
        Ok(v) => v,
        Err(_) => return 0.0,
    };

    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0 * 1024.0,
        "Gi" => 1024.0 * 1024.0 * 1024.0,
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        _ => 0.0,
    };

    value * multiplier
}

/// CPU quantity in millicores.
pub fn cpu_millis(q: &Quantity) -> i64 {
    (parse_quantity(q) * 1000.0).round() as i64
}

/// Memory or storage quantity in bytes.
pub fn bytes(q: &Quantity) -> i64 {
    parse_quantity(q).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    #[test]
    fn cpu_quantities_normalize_to_millicores() {
        assert_eq!(cpu_millis(&q("4")), 4000);
        assert_eq!(cpu_millis(&q("100m")), 100);
        assert_eq!(cpu_millis(&q("1.5")), 1500);
        assert_eq!(cpu_millis(&q("250000000n")), 250);
    }

    #[test]
    fn memory_quantities_normalize_to_bytes() {
        assert_eq!(bytes(&q("128974848")), 128974848);
        assert_eq!(bytes(&q("1Ki")), 1024);
        assert_eq!(bytes(&q("16Gi")), 16 * 1024 * 1024 * 1024);
        assert_eq!(bytes(&q("1G")), 1_000_000_000);
        assert_eq!(bytes(&q("129e6")), 129_000_000);
    }

    #[test]
    fn malformed_quantities_yield_zero() {
        assert_eq!(bytes(&q("")), 0);
        assert_eq!(bytes(&q("abc")), 0);
        assert_eq!(bytes(&q("12Xi")), 0);
    }
}
