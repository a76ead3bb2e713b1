//! Typed quantities used on the network model.
//!
//! Every field that carries a physical unit on [`Bus`](crate::Bus),
//! [`Line`](crate::Line) or [`Transformer`](crate::Transformer) uses one of
//! these wrappers so MW cannot be added to Mvar and degrees cannot be passed
//! where radians are expected. They are `#[repr(transparent)]` and serialize
//! as bare numbers, so topology files stay plain JSON/YAML/TOML.
//!
//! Per-unit helpers live here as well: base impedance and base current for a
//! voltage level on the system MVA base.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Neg, Sub};

macro_rules! quantity {
    ($(#[$meta:meta])* $name:ident, $symbol:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(pub f64);

        impl $name {
            #[inline]
            pub const fn new(value: f64) -> Self {
                Self(value)
            }

            #[inline]
            pub const fn value(self) -> f64 {
                self.0
            }

            #[inline]
            pub fn abs(self) -> Self {
                Self(self.0.abs())
            }

            #[inline]
            pub fn is_finite(self) -> bool {
                self.0.is_finite()
            }
        }

        impl Add for $name {
            type Output = Self;
            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $name {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl Neg for $name {
            type Output = Self;
            fn neg(self) -> Self {
                Self(-self.0)
            }
        }

        impl Mul<f64> for $name {
            type Output = Self;
            fn mul(self, rhs: f64) -> Self {
                Self(self.0 * rhs)
            }
        }

        impl Div<f64> for $name {
            type Output = Self;
            fn div(self, rhs: f64) -> Self {
                Self(self.0 / rhs)
            }
        }

        impl std::iter::Sum for $name {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                Self(iter.map(|q| q.0).sum())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:.4} {}", self.0, $symbol)
            }
        }
    };
}

quantity!(
    /// Active power (MW)
    Megawatts,
    "MW"
);
quantity!(
    /// Reactive power (Mvar)
    Megavars,
    "Mvar"
);
quantity!(
    /// Apparent power (MVA), used for ratings and the system base
    MegavoltAmperes,
    "MVA"
);
quantity!(
    /// Dimensionless per-unit magnitude on the relevant base
    PerUnit,
    "pu"
);
quantity!(
    /// Line-to-line voltage (kV)
    Kilovolts,
    "kV"
);
quantity!(
    /// Angle in degrees, the unit bus angles are reported in
    Degrees,
    "°"
);
quantity!(
    /// Current (kA)
    Kiloamperes,
    "kA"
);

impl PerUnit {
    pub const ONE: Self = Self(1.0);
}

impl Kilovolts {
    /// Base impedance of this voltage level on `base_mva`: Z = kV² / MVA (Ω).
    #[inline]
    pub fn base_impedance_ohm(self, base_mva: f64) -> f64 {
        self.0 * self.0 / base_mva
    }

    /// Base current of this voltage level on `base_mva`: I = MVA / (√3·kV).
    #[inline]
    pub fn base_current(self, base_mva: f64) -> Kiloamperes {
        Kiloamperes(base_mva / (3f64.sqrt() * self.0))
    }
}
