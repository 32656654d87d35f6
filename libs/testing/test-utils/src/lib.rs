//! Shared test infrastructure for the pricing catalog crates
//!
//! - `TestDatabase`: PostgreSQL container with the catalog schema applied (feature: "postgres")
//! - `TestDataBuilder`: deterministic SKUs, regions and names per test
//!
//! ```rust,no_run
//! use test_utils::{TestDatabase, TestDataBuilder};
//!
//! #[tokio::test]
//! async fn my_catalog_test() {
//!     let db = TestDatabase::new().await;
//!     let data = TestDataBuilder::from_test_name("my_catalog_test");
//!
//!     let sku = data.sku("m5-xlarge");
//!     let location = data.location();
//! }
//! ```

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::TestDatabase;

const LOCATIONS: [&str; 6] = [
    "us-east-1",
    "us-west-2",
    "eu-west-1",
    "eu-central-1",
    "ap-southeast-1",
    "ap-northeast-1",
];

/// Seeded generator for catalog identities.
///
/// Two tests with different names never produce the same SKU, so they can
/// share one database without their upserts colliding.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Seed derived from the test name
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let data = TestDataBuilder::from_test_name("test_upsert_price");
    /// assert_eq!(data.sku("a"), TestDataBuilder::from_test_name("test_upsert_price").sku("a"));
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Provider SKU unique to this test, e.g. `TEST-1A2B3C4D-m5-xlarge`
    pub fn sku(&self, suffix: &str) -> String {
        format!("TEST-{:08X}-{}", self.seed as u32, suffix)
    }

    /// Region picked from a fixed list
    pub fn location(&self) -> &'static str {
        LOCATIONS[(self.seed % LOCATIONS.len() as u64) as usize]
    }

    /// Service name unique to this test, so scope-wide queries stay isolated
    pub fn service(&self, base: &str) -> String {
        format!("{}-{}", base, self.seed)
    }

    pub fn name(&self, prefix: &str, suffix: &str) -> String {
        format!("test-{}-{}-{}", prefix, self.seed, suffix)
    }
}

/// Test assertion helpers
pub mod assertions {
    /// Assert that an optional value is Some
    pub fn assert_some<T>(value: Option<T>, context: &str) -> T {
        value.unwrap_or_else(|| panic!("{}: expected Some, got None", context))
    }

    /// Compare decimal amounts rendered as strings, ignoring trailing zeros
    pub fn assert_amount_eq(actual: impl ToString, expected: &str, context: &str) {
        let trim = |s: String| {
            if s.contains('.') {
                s.trim_end_matches('0').trim_end_matches('.').to_string()
            } else {
                s
            }
        };
        let actual = trim(actual.to_string());
        let expected = trim(expected.to_string());
        assert_eq!(actual, expected, "{}: expected {}, got {}", context, expected, actual);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_builder_deterministic() {
        let a = TestDataBuilder::new(42);
        let b = TestDataBuilder::new(42);

        assert_eq!(a.sku("x"), b.sku("x"));
        assert_eq!(a.location(), b.location());
        assert_eq!(a.service("AmazonEC2"), b.service("AmazonEC2"));
    }

    #[test]
    fn test_data_builder_different_names() {
        let a = TestDataBuilder::from_test_name("test1");
        let b = TestDataBuilder::from_test_name("test2");

        assert_ne!(a.sku("x"), b.sku("x"));
        assert_ne!(a.service("AmazonEC2"), b.service("AmazonEC2"));
    }

    #[test]
    fn test_assert_amount_eq_ignores_scale() {
        assertions::assert_amount_eq("146.0000", "146", "monthly cost");
        assertions::assert_amount_eq("0.4600", "0.46", "hourly cost");
        assertions::assert_amount_eq("100", "100", "integers untouched");
    }
}
