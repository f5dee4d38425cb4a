//! Capacity growth policy for [`ZeroCopyBuffer`](crate::ZeroCopyBuffer).

/// Determines the capacity of the owned storage allocated when a buffer runs out
/// of room.
///
/// The new capacity is the largest of the required length, the current capacity
/// multiplied by `factor`, and `min_capacity`, clamped to what can actually be
/// allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthPolicy {
    min_capacity: usize,
    factor: usize,
}

impl GrowthPolicy {
    /// Creates a policy with the given minimum non-zero capacity and growth factor.
    ///
    /// # Panics
    ///
    /// Panics if `factor` is zero.
    pub const fn new(min_capacity: usize, factor: usize) -> GrowthPolicy {
        assert!(factor >= 1, "growth factor must be at least 1");
        GrowthPolicy {
            min_capacity,
            factor,
        }
    }

    /// Grows to exactly the required length.
    pub const fn exact() -> GrowthPolicy {
        GrowthPolicy::new(0, 1)
    }

    /// The default policy for elements of type `T`: doubling, with a minimum of
    /// 8 elements, or a single element when `T` is larger than 1 KiB.
    pub const fn for_element<T>() -> GrowthPolicy {
        let min_capacity = if std::mem::size_of::<T>() <= 1024 { 8 } else { 1 };
        GrowthPolicy::new(min_capacity, 2)
    }

    #[inline]
    pub fn min_capacity(&self) -> usize {
        self.min_capacity
    }

    #[inline]
    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Computes the capacity to allocate when `required` elements must fit into a
    /// buffer whose current capacity is `current`. The result never exceeds `limit`
    /// unless `required` itself does.
    pub fn next_capacity(&self, current: usize, required: usize, limit: usize) -> usize {
        let scaled = current.checked_mul(self.factor).unwrap_or(limit);
        scaled.max(self.min_capacity).min(limit).max(required)
    }
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        GrowthPolicy::new(8, 2)
    }
}
