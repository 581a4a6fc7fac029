//! Bit operations on byte arrays, used as bitmaps.

#[inline(always)]
pub const fn change_bit_u8(val: u8, pos: usize) -> u8 {
    val ^ ((1usize << pos) as u8)
}

/// Returns the number of bytes needed to hold `bits` bits.
#[inline(always)]
pub const fn bits_to_bytes(bits: usize) -> usize {
    (bits + 7) / 8
}

#[inline]
pub fn test_bit(bits: &[u8], pos: usize) -> bool {
    bits.get(pos / 8).map_or(false, |b| (b >> (pos % 8)) & 1 != 0)
}

#[inline]
pub fn set_bit(bits: &mut [u8], pos: usize) {
    if let Some(b) = bits.get_mut(pos / 8) {
        *b |= 1u8 << (pos % 8);
    }
}

#[inline]
pub fn clear_bit(bits: &mut [u8], pos: usize) {
    if let Some(b) = bits.get_mut(pos / 8) {
        *b &= !(1u8 << (pos % 8));
    }
}

#[inline]
pub fn change_bit_array(bits: &mut [u8], pos: usize) {
    if let Some(b) = bits.get_mut(pos / 8) {
        *b = change_bit_u8(*b, pos % 8);
    }
}

/// Flip the bit on `pos` index of the `bits` array, and return true if the **old value** is 1,
/// otherwise return false.
#[inline]
pub fn test_and_change_bit_array(bits: &mut [u8], pos: usize) -> bool {
    let old = test_bit(bits, pos);
    change_bit_array(bits, pos);
    old
}

/// Iterate over the index of every set bit, lowest first.
pub fn for_each_set_bit(bits: &[u8]) -> impl Iterator<Item = usize> + '_ {
    bits.iter().enumerate().flat_map(|(i, &b)| {
        (0..8usize).filter(move |&n| (b >> n) & 1 != 0).map(move |n| i * 8 + n)
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn set_test_clear() {
        let mut map = [0u8; bits_to_bytes(20)];
        assert_eq!(map.len(), 3);
        set_bit(&mut map, 0);
        set_bit(&mut map, 17);
        assert!(test_bit(&map, 17));
        assert!(!test_bit(&map, 16));
        clear_bit(&mut map, 17);
        assert!(!test_bit(&map, 17));
        // Out of range is ignored.
        set_bit(&mut map, 100);
        assert!(!test_bit(&map, 100));
    }

    #[test]
    fn test_and_change_returns_old() {
        let mut map = [0u8; 2];
        assert!(!test_and_change_bit_array(&mut map, 9));
        assert!(test_and_change_bit_array(&mut map, 9));
        assert_eq!(map, [0, 0]);
    }

    #[test]
    fn iterate_set_bits() {
        let mut map = [0u8; 4];
        for pos in [1, 8, 30] {
            set_bit(&mut map, pos);
        }
        assert_eq!(for_each_set_bit(&map).collect::<Vec<_>>(), [1, 8, 30]);
    }
}
