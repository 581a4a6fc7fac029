//! Power-of-two alignment.


/// Round `val` up to a multiple of `1 << order`.
#[inline]
pub const fn align_up(val: usize, order: usize) -> usize {
    let mask = (1usize << order) - 1;
    (val + mask) & !mask
}

/// Round `val` down to a multiple of `1 << order`.
#[inline]
pub const fn align_down(val: usize, order: usize) -> usize {
    val & !((1usize << order) - 1)
}

/// FDT blocks and property values are padded to 32-bit cells.
#[inline]
pub const fn align_cell(val: usize) -> usize {
    align_up(val, 2)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_to_cells() {
        assert_eq!(align_cell(0), 0);
        assert_eq!(align_cell(1), 4);
        assert_eq!(align_cell(4), 4);
        assert_eq!(align_cell(13), 16);
        assert_eq!(align_down(13, 2), 12);
        assert_eq!(align_up(0x1001, 12), 0x2000);
    }
}
