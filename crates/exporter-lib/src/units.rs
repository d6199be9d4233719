//! Unit normalization for exported metric values
//!
//! All conversions truncate toward zero. Historical rows were produced with
//! integer casts, so rounding here would break numeric parity.

use crate::models::TypedValue;

const BYTES_PER_MEBIBYTE: f64 = 1024.0 * 1024.0;
const BYTES_PER_MEBIBYTE_INT: i64 = 1024 * 1024;

/// Unit class of a metric, derived from its key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitClass {
    Cpu,
    Memory,
    Count,
}

impl UnitClass {
    /// Classify a metric key; "cpu" wins over "memory" when both appear
    pub fn for_key(key: &str) -> Self {
        if key.contains("cpu") {
            UnitClass::Cpu
        } else if key.contains("memory") {
            UnitClass::Memory
        } else {
            UnitClass::Count
        }
    }
}

/// Cores to millicores
pub fn cores_to_millicores(cores: f64) -> i64 {
    truncate(cores * 1000.0)
}

/// Bytes carried as a double to mebibytes
pub fn bytes_to_mebibytes(bytes: f64) -> i64 {
    truncate(bytes / BYTES_PER_MEBIBYTE)
}

/// Bytes carried as an int64 to mebibytes
pub fn int_bytes_to_mebibytes(bytes: i64) -> i64 {
    bytes / BYTES_PER_MEBIBYTE_INT
}

/// Normalize a snapshot value by key: cpu and memory read the double field,
/// everything else passes the int64 field through.
pub fn normalize_snapshot(key: &str, value: &TypedValue) -> i64 {
    match UnitClass::for_key(key) {
        UnitClass::Cpu => cores_to_millicores(value.double_or_zero()),
        UnitClass::Memory => bytes_to_mebibytes(value.double_or_zero()),
        UnitClass::Count => value.int64_or_zero(),
    }
}

/// Normalize a max recommendation value: memory reads the int64 field,
/// everything else the double field as cores.
pub fn normalize_recommendation(key: &str, value: &TypedValue) -> i64 {
    match UnitClass::for_key(key) {
        UnitClass::Memory => int_bytes_to_mebibytes(value.int64_or_zero()),
        UnitClass::Cpu | UnitClass::Count => cores_to_millicores(value.double_or_zero()),
    }
}

/// Percentile fallback policy for the cpu 95th percentile stream.
///
/// A double of exactly zero is taken to mean the value travelled in the
/// int64 field, which is then read as bytes and converted to mebibytes.
/// The two branches therefore produce different units; downstream SQL
/// relies on this exact behavior.
pub fn percentile_with_int_fallback(value: &TypedValue) -> i64 {
    let double = value.double_or_zero();
    if double != 0.0 {
        cores_to_millicores(double)
    } else {
        int_bytes_to_mebibytes(value.int64_or_zero())
    }
}

/// Cast toward zero; NaN and infinities become 0 so no null ever leaves here
fn truncate(value: f64) -> i64 {
    if value.is_finite() {
        value.trunc() as i64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_truncates_not_rounds() {
        assert_eq!(cores_to_millicores(0.2509), 250);
        assert_eq!(cores_to_millicores(1.9999), 1999);
        assert_eq!(cores_to_millicores(-0.0019), -1);
    }

    #[test]
    fn test_memory_truncates() {
        assert_eq!(bytes_to_mebibytes(2_097_151.0), 1);
        assert_eq!(bytes_to_mebibytes(2_097_152.0), 2);
        assert_eq!(int_bytes_to_mebibytes(3_145_727), 2);
    }

    #[test]
    fn test_snapshot_by_key() {
        let cpu = TypedValue::double(0.5);
        let mem = TypedValue::double(268_435_456.0);
        let count = TypedValue::int64(7);

        assert_eq!(normalize_snapshot("cpu_requested_cores", &cpu), 500);
        assert_eq!(normalize_snapshot("memory_limit_bytes", &mem), 256);
        assert_eq!(normalize_snapshot("container_count", &count), 7);
        // hpa_cpu is a cpu key
        assert_eq!(normalize_snapshot("hpa_cpu", &TypedValue::double(0.8)), 800);
    }

    #[test]
    fn test_missing_values_become_zero() {
        assert_eq!(normalize_snapshot("container_count", &TypedValue::default()), 0);
        assert_eq!(normalize_snapshot("cpu_limit_cores", &TypedValue::default()), 0);
        assert_eq!(cores_to_millicores(f64::NAN), 0);
    }

    #[test]
    fn test_recommendation_memory_uses_int_field() {
        let value = TypedValue::int64(2_097_152);
        assert_eq!(normalize_recommendation("memory_request_recommendations", &value), 2);
    }

    #[test]
    fn test_percentile_fallback_branches() {
        assert_eq!(percentile_with_int_fallback(&TypedValue::double(0.25)), 250);

        let int_only = TypedValue {
            double_value: Some(0.0),
            int64_value: Some(3_145_728),
        };
        assert_eq!(percentile_with_int_fallback(&int_only), 3);
        assert_eq!(percentile_with_int_fallback(&TypedValue::default()), 0);
    }
}
