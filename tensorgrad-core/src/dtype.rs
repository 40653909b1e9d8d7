use std::{
    fmt::Debug,
    ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign},
};

#[cfg(feature = "bfloat")]
use half::bf16;
#[cfg(feature = "half")]
use half::f16;

/// Type which has an exponential.
pub trait Expable {
    fn exp(&self) -> Self
    where
        Self: Sized;
}

impl Expable for f32 {
    fn exp(&self) -> Self {
        f32::exp(*self)
    }
}

impl Expable for f64 {
    fn exp(&self) -> Self {
        f64::exp(*self)
    }
}

#[cfg(feature = "bfloat")]
impl Expable for bf16 {
    fn exp(&self) -> Self {
        bf16::from_f64_const(self.to_f64_const().exp())
    }
}

#[cfg(feature = "half")]
impl Expable for f16 {
    fn exp(&self) -> Self {
        f16::from_f64_const(self.to_f64_const().exp())
    }
}

pub trait DTypeOps:
    Copy
    + Add<Output = Self>
    + Div<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + PartialOrd
    + Expable
{
}

/// Marker trait for tensor datatypes. Only floating point types implement it,
/// gradients of integral tensors are not meaningful.
pub trait DType: Debug + Clone + DTypeOps + Send + Sync + 'static {
    const ZERO: Self;
    const ONE: Self;
    const NAME: &'static str;

    fn to_f64(&self) -> f64;
    fn from_f64(x: f64) -> Self;

    /// The larger of `self` and `other`; `self` if they are unordered.
    fn maximum(self, other: Self) -> Self {
        if other > self {
            other
        } else {
            self
        }
    }
}

macro_rules! dtype {
    ($rt:ident, $zero:expr, $one:expr) => {
        impl DTypeOps for $rt {}
        impl DType for $rt {
            const ZERO: $rt = $zero;
            const ONE: $rt = $one;
            const NAME: &'static str = stringify!($rt);

            fn to_f64(&self) -> f64 {
                *self as f64
            }
            fn from_f64(x: f64) -> Self {
                x as $rt
            }
        }
    };
}

dtype!(f32, 0f32, 1f32);
dtype!(f64, 0f64, 1f64);

macro_rules! half_dtype {
    ($rt:ident) => {
        impl DTypeOps for $rt {}
        impl DType for $rt {
            const ZERO: $rt = $rt::from_f64_const(0.0);
            const ONE: $rt = $rt::from_f64_const(1.0);
            const NAME: &'static str = stringify!($rt);

            fn to_f64(&self) -> f64 {
                self.to_f64_const()
            }
            fn from_f64(x: f64) -> Self {
                Self::from_f64_const(x)
            }
        }
    };
}

#[cfg(feature = "half")]
half_dtype!(f16);
#[cfg(feature = "bfloat")]
half_dtype!(bf16);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maximum_prefers_larger() {
        assert_eq!(2.0f32.maximum(-1.0), 2.0);
        assert_eq!((-3.0f64).maximum(0.0), 0.0);
        assert_eq!(f64::NAME, "f64");
    }

    #[cfg(feature = "half")]
    #[test]
    fn f16_goes_through_f64() {
        let x = f16::from_f64(1.0);
        assert_eq!(x.exp().to_f64(), f16::from_f64(std::f64::consts::E).to_f64());
        assert_eq!(<f16 as DType>::ONE.to_f64(), 1.0);
    }
}
