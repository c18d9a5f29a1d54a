//! Lock-free statistics for the Lumen runtime.
//!
//! Two cells, both a single [`AtomicU64`] read and written with
//! [`Ordering::Relaxed`]:
//!
//! - [`Counter`] counts events and only grows.
//! - [`Gauge`] holds the latest `f64` reading (field coherence, say).
//!
//! Both serialize as bare JSON numbers, so a stats struct made of them
//! exports as a flat object.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Event count. Only grows.
pub struct Counter(AtomicU64);

/// Latest `f64` reading, stored as raw bits.
pub struct Gauge(AtomicU64);

impl Counter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn from_value(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }
}

impl Gauge {
    /// A gauge reading `0.0` (whose bit pattern is zero).
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn from_value(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }
}

/// Default, snapshot-on-clone, Debug and number-shaped serde for a cell
/// with `get() -> $value` and `from_value($value)`.
macro_rules! cell_impls {
    ($cell:ident, $value:ty) => {
        impl Default for $cell {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Clone for $cell {
            fn clone(&self) -> Self {
                Self::from_value(self.get())
            }
        }

        impl fmt::Debug for $cell {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($cell), self.get())
            }
        }

        impl serde::Serialize for $cell {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serde::Serialize::serialize(&self.get(), serializer)
            }
        }

        impl<'de> serde::Deserialize<'de> for $cell {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                <$value as serde::Deserialize>::deserialize(deserializer).map(Self::from_value)
            }
        }
    };
}

cell_impls!(Counter, u64);
cell_impls!(Gauge, f64);
