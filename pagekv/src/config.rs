//! Store configuration.
//!
//! A `StoreConfig` is passed explicitly to `Store::open`. It can also be
//! loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `PAGEKV_PAGE_SIZE`: Bytes per page (default: `8192`)
//! - `PAGEKV_MIN_FILL_PERCENT`: Fraction of a page below which a node is
//!   under-populated; also where splits cut (default: `0.5`)
//! - `PAGEKV_MAX_FILL_PERCENT`: Fraction of a page above which a node is
//!   split (default: `0.9`)
//!
//! # Invariants
//!
//! - `page_size` is within `MIN_PAGE_SIZE..=MAX_PAGE_SIZE`
//! - `0 < min_fill_percent < max_fill_percent <= 1`
//! - a node one maximum-size item past the split threshold still fits in a page
//! - a node with no split point plus one more maximum-size item still fits
//!   in a page

#![allow(clippy::cast_precision_loss)]

use crate::storage::btree::{MAX_ELEMENT_SIZE, NODE_HEADER_SIZE};
use crate::storage::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE, PAGE_ID_SIZE};

const PAGE_SIZE_VAR: &str = "PAGEKV_PAGE_SIZE";
const MIN_FILL_VAR: &str = "PAGEKV_MIN_FILL_PERCENT";
const MAX_FILL_VAR: &str = "PAGEKV_MAX_FILL_PERCENT";

/// Page size and fill thresholds for a store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreConfig {
    /// Bytes per page.
    pub page_size: usize,
    /// Fraction of `page_size` used as the underflow threshold and split point.
    pub min_fill_percent: f64,
    /// Fraction of `page_size` above which a node is over-populated.
    pub max_fill_percent: f64,
}

/// Error returned when loading or validating configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value is out of range or could not be parsed.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl StoreConfig {
    /// Default minimum fill fraction.
    pub const DEFAULT_MIN_FILL_PERCENT: f64 = 0.5;
    /// Default maximum fill fraction.
    pub const DEFAULT_MAX_FILL_PERCENT: f64 = 0.9;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            min_fill_percent: Self::DEFAULT_MIN_FILL_PERCENT,
            max_fill_percent: Self::DEFAULT_MAX_FILL_PERCENT,
        }
    }

    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub const fn with_fill_percents(mut self, min: f64, max: f64) -> Self {
        self.min_fill_percent = min;
        self.max_fill_percent = max;
        self
    }

    /// Underflow threshold in bytes.
    #[must_use]
    pub fn min_threshold(&self) -> f64 {
        self.min_fill_percent * self.page_size as f64
    }

    /// Overflow threshold in bytes.
    #[must_use]
    pub fn max_threshold(&self) -> f64 {
        self.max_fill_percent * self.page_size as f64
    }

    /// Check the invariants listed in the module docs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(ConfigError::InvalidValue {
                name: "page_size".to_string(),
                message: format!(
                    "{} is outside {MIN_PAGE_SIZE}..={MAX_PAGE_SIZE}",
                    self.page_size
                ),
            });
        }

        if !(self.min_fill_percent > 0.0 && self.min_fill_percent < self.max_fill_percent) {
            return Err(ConfigError::InvalidValue {
                name: "min_fill_percent".to_string(),
                message: format!(
                    "{} must be above 0 and below max_fill_percent ({})",
                    self.min_fill_percent, self.max_fill_percent
                ),
            });
        }

        if self.max_fill_percent > 1.0 {
            return Err(ConfigError::InvalidValue {
                name: "max_fill_percent".to_string(),
                message: format!("{} must not exceed 1", self.max_fill_percent),
            });
        }

        if self.max_threshold() + MAX_ELEMENT_SIZE as f64 >= self.page_size as f64 {
            return Err(ConfigError::InvalidValue {
                name: "max_fill_percent".to_string(),
                message: format!(
                    "{} leaves no room for a {MAX_ELEMENT_SIZE}-byte item past the split threshold of a {}-byte page",
                    self.max_fill_percent, self.page_size
                ),
            });
        }

        // A node whose leading items stay under the minimum threshold has no
        // split point and may hold one maximum-size item past it. The next
        // insert adds another before any split runs.
        let unsplittable = self
            .min_threshold()
            .max((NODE_HEADER_SIZE + PAGE_ID_SIZE) as f64);
        if unsplittable + (2 * MAX_ELEMENT_SIZE + 1) as f64 > self.page_size as f64 {
            return Err(ConfigError::InvalidValue {
                name: "min_fill_percent".to_string(),
                message: format!(
                    "{} leaves no room for two {MAX_ELEMENT_SIZE}-byte items in an unsplittable node of a {}-byte page",
                    self.min_fill_percent, self.page_size
                ),
            });
        }

        Ok(())
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but does not parse, or if the
    /// resulting configuration fails `validate`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::new();
        let config = Self {
            page_size: load_var(PAGE_SIZE_VAR, defaults.page_size)?,
            min_fill_percent: load_var(MIN_FILL_VAR, defaults.min_fill_percent)?,
            max_fill_percent: load_var(MAX_FILL_VAR, defaults.max_fill_percent)?,
        };
        config.validate()?;
        Ok(config)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn load_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' could not be parsed"),
        }),
        Err(_) => Ok(default),
    }
}
