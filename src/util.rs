/// Round `size` up to the next multiple of `align`.
///
/// `align` must be a power of two.
pub fn align_up(size: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (size + align - 1) & !(align - 1)
}

/// Number of `unit`-sized pieces needed to cover `size` bytes.
pub fn div_round_up(size: usize, unit: usize) -> usize {
    (size + unit - 1) / unit
}
