pub use nalgebra::Vector3;
use num_traits::{Bounded, ToPrimitive};

/// An (x, y, z) position read from a scan.
pub type Vertex = Vector3<f64>;

// A coordinate is written back in the type it was read as, so scaling has
// to happen per storage type. Integers round to nearest and saturate.
pub trait ScaleField: Copy {
    fn scaled(self, factor: f64) -> Self;
}

impl ScaleField for f32 {
    fn scaled(self, factor: f64) -> f32 {
        (f64::from(self) * factor) as f32
    }
}

impl ScaleField for f64 {
    fn scaled(self, factor: f64) -> f64 {
        self * factor
    }
}

fn saturating_round<T>(value: T, factor: f64) -> T
where
    T: num_traits::NumCast + Bounded + ToPrimitive + Copy,
{
    let rounded = (value.to_f64().unwrap_or_default() * factor).round();
    match <T as num_traits::NumCast>::from(rounded) {
        Some(v) => v,
        None if rounded < 0.0 => T::min_value(),
        None => T::max_value(),
    }
}

macro_rules! integer_scale_field {
    ($($t:ty),*) => {
        $(
            impl ScaleField for $t {
                fn scaled(self, factor: f64) -> $t {
                    saturating_round(self, factor)
                }
            }
        )*
    };
}

integer_scale_field!(i8, u8, i16, u16, i32, u32);

pub fn scale_vertex(vertex: &Vertex, factor: f64) -> Vertex {
    vertex * factor
}

/// Like [`scale_vertex`], but `None` when a finite coordinate overflows to
/// infinity. NaN and infinite inputs are passed through as they are.
pub fn checked_scale_vertex(vertex: &Vertex, factor: f64) -> Option<Vertex> {
    let scaled = scale_vertex(vertex, factor);
    let overflowed = vertex
        .iter()
        .zip(scaled.iter())
        .any(|(before, after)| before.is_finite() && !after.is_finite());
    (!overflowed).then_some(scaled)
}
