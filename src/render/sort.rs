//! LSD radix sort of 32-bit depth keys with `u32` payloads.
//!
//! Each pass runs three dispatches over `THREADS_PER_GROUP_1D`-element
//! blocks: a per-block digit histogram, an exclusive scan over the
//! bucket-major histogram table, and a stable per-block scatter.

use crate::compute::{dispatch_1d, ScatterSlice, THREADS_PER_GROUP_1D};
use crate::error::{MeshSplatError, Result};

pub const RADIX_BITS: u32 = 8;
pub const RADIX_BUCKETS: usize = 1 << RADIX_BITS;
pub const RADIX_PASSES: u32 = u32::BITS / RADIX_BITS;
const DIGIT_MASK: u32 = RADIX_BUCKETS as u32 - 1;

const BLOCK: usize = THREADS_PER_GROUP_1D as usize;

// Even pass count: sorted data lands back in the caller's arrays.
const _: () = assert!(RADIX_PASSES % 2 == 0);

/// Scratch elements needed by [`exclusive_scan`] for `count` inputs.
pub fn required_block_sum_elements(count: usize) -> usize {
    if count == 0 {
        return 1;
    }

    let mut total = 0usize;
    let mut blocks = count.div_ceil(BLOCK);
    loop {
        total = total.saturating_add(blocks);
        if blocks <= 1 {
            break;
        }
        blocks = blocks.div_ceil(BLOCK);
    }
    total.max(1)
}

pub fn required_histogram_elements(count: usize) -> usize {
    count.div_ceil(BLOCK).max(1) * RADIX_BUCKETS
}

/// In-place exclusive prefix sum (wrapping), block-recursive.
pub fn exclusive_scan(data: &mut [u32], block_sums: &mut [u32]) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    let required = required_block_sum_elements(data.len());
    if block_sums.len() < required {
        return Err(MeshSplatError::CapacityExceeded {
            requested: required,
            ceiling: block_sums.len(),
        });
    }
    scan_recursive(data, block_sums);
    Ok(())
}

fn scan_recursive(data: &mut [u32], scratch: &mut [u32]) {
    let count = data.len();
    if count == 0 {
        return;
    }
    let num_blocks = count.div_ceil(BLOCK);
    let (sums, rest) = scratch.split_at_mut(num_blocks);

    {
        let data_out = ScatterSlice::new(data);
        let sums_out = ScatterSlice::new(sums);
        dispatch_1d(count, THREADS_PER_GROUP_1D, |block, range| {
            let mut acc = 0u32;
            for i in range {
                // SAFETY: blocks own disjoint index ranges.
                let value = unsafe { data_out.read(i) };
                unsafe { data_out.write(i, acc) };
                acc = acc.wrapping_add(value);
            }
            // SAFETY: one writer per block.
            unsafe { sums_out.write(block, acc) };
        });
    }

    if num_blocks > 1 {
        scan_recursive(sums, rest);
        let sums = &*sums;
        let data_out = ScatterSlice::new(data);
        dispatch_1d(count, THREADS_PER_GROUP_1D, |block, range| {
            let offset = sums[block];
            for i in range {
                // SAFETY: blocks own disjoint index ranges.
                unsafe { data_out.write(i, data_out.read(i).wrapping_add(offset)) };
            }
        });
    }
}

/// Borrowed ping-pong and histogram storage for one sort.
pub struct SortScratch<'a> {
    pub keys: &'a mut [u32],
    pub values: &'a mut [u32],
    pub histograms: &'a mut [u32],
    pub block_sums: &'a mut [u32],
}

impl SortScratch<'_> {
    fn check(&self, count: usize) -> Result<()> {
        let checks = [
            (count, self.keys.len()),
            (count, self.values.len()),
            (required_histogram_elements(count), self.histograms.len()),
            (
                required_block_sum_elements(required_histogram_elements(count)),
                self.block_sums.len(),
            ),
        ];
        for (requested, ceiling) in checks {
            if requested > ceiling {
                return Err(MeshSplatError::CapacityExceeded { requested, ceiling });
            }
        }
        Ok(())
    }
}

/// Sorts `keys[..count]` ascending and applies the same permutation to
/// `values[..count]`. Stable. `count == 0` touches nothing.
pub fn radix_sort(
    keys: &mut [u32],
    values: &mut [u32],
    count: usize,
    mut scratch: SortScratch<'_>,
) -> Result<()> {
    if count == 0 {
        return Ok(());
    }
    if keys.len() < count || values.len() < count {
        return Err(MeshSplatError::CapacityExceeded {
            requested: count,
            ceiling: keys.len().min(values.len()),
        });
    }
    scratch.check(count)?;

    let num_blocks = count.div_ceil(BLOCK);
    let histogram_count = num_blocks * RADIX_BUCKETS;
    let histograms = &mut scratch.histograms[..histogram_count];

    let mut keys_in_a = true;
    let (keys_a, values_a) = (&mut keys[..count], &mut values[..count]);
    let (keys_b, values_b) = (&mut scratch.keys[..count], &mut scratch.values[..count]);

    for pass in 0..RADIX_PASSES {
        let shift = pass * RADIX_BITS;
        let (keys_in, values_in, keys_out, values_out) = if keys_in_a {
            (&*keys_a, &*values_a, &mut *keys_b, &mut *values_b)
        } else {
            (&*keys_b, &*values_b, &mut *keys_a, &mut *values_a)
        };

        build_histograms(keys_in, histograms, num_blocks, shift);
        exclusive_scan(histograms, scratch.block_sums)?;
        scatter(keys_in, values_in, keys_out, values_out, histograms, num_blocks, shift);

        keys_in_a = !keys_in_a;
    }
    debug_assert!(keys_in_a);
    Ok(())
}

fn digit(key: u32, shift: u32) -> usize {
    ((key >> shift) & DIGIT_MASK) as usize
}

// Bucket-major layout: hist[d * num_blocks + block], so the scanned table
// gives each block its global output offset for every digit.
fn build_histograms(keys: &[u32], histograms: &mut [u32], num_blocks: usize, shift: u32) {
    let out = ScatterSlice::new(histograms);
    dispatch_1d(keys.len(), THREADS_PER_GROUP_1D, |block, range| {
        let mut local = [0u32; RADIX_BUCKETS];
        for &key in &keys[range] {
            local[digit(key, shift)] += 1;
        }
        for (d, &n) in local.iter().enumerate() {
            // SAFETY: (digit, block) cells are unique to this block.
            unsafe { out.write(d * num_blocks + block, n) };
        }
    });
}

fn scatter(
    keys_in: &[u32],
    values_in: &[u32],
    keys_out: &mut [u32],
    values_out: &mut [u32],
    offsets: &[u32],
    num_blocks: usize,
    shift: u32,
) {
    let keys_out = ScatterSlice::new(keys_out);
    let values_out = ScatterSlice::new(values_out);
    dispatch_1d(keys_in.len(), THREADS_PER_GROUP_1D, |block, range| {
        let mut cursor = [0u32; RADIX_BUCKETS];
        for (d, c) in cursor.iter_mut().enumerate() {
            *c = offsets[d * num_blocks + block];
        }
        for i in range {
            let key = keys_in[i];
            let slot = &mut cursor[digit(key, shift)];
            // SAFETY: the scanned histogram gives every (digit, block) a disjoint
            // output range sized to its count.
            unsafe {
                keys_out.write(*slot as usize, key);
                values_out.write(*slot as usize, values_in[i]);
            }
            *slot += 1;
        }
    });
}

/// Order-preserving map from `f32` to `u32`: `a < b` implies `key(a) < key(b)`.
pub fn float_to_ordered_key(value: f32) -> u32 {
    let bits = value.to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::ComputeContext;
    use rand::{Rng, SeedableRng};

    fn sort_with_fresh_scratch(keys: &mut [u32], values: &mut [u32]) {
        let n = keys.len();
        let mut keys_b = vec![0; n];
        let mut values_b = vec![0; n];
        let mut hist = vec![0; required_histogram_elements(n)];
        let mut sums = vec![0; required_block_sum_elements(hist.len())];
        radix_sort(
            keys,
            values,
            n,
            SortScratch {
                keys: &mut keys_b,
                values: &mut values_b,
                histograms: &mut hist,
                block_sums: &mut sums,
            },
        )
        .unwrap();
    }

    #[test]
    fn sorts_three_keys_with_payload() {
        let mut keys = vec![5, 1, 3];
        let mut values = vec![0xA, 0xB, 0xC];
        sort_with_fresh_scratch(&mut keys, &mut values);
        assert_eq!(keys, vec![1, 3, 5]);
        assert_eq!(values, vec![0xB, 0xC, 0xA]);
    }

    #[test]
    fn empty_sort_is_a_no_op() {
        let mut keys: Vec<u32> = vec![9, 8];
        let mut values: Vec<u32> = vec![1, 2];
        radix_sort(
            &mut keys,
            &mut values,
            0,
            SortScratch {
                keys: &mut [],
                values: &mut [],
                histograms: &mut [],
                block_sums: &mut [],
            },
        )
        .unwrap();
        assert_eq!(keys, vec![9, 8]);
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn undersized_scratch_is_rejected() {
        let mut keys = vec![3, 2, 1];
        let mut values = vec![0, 1, 2];
        let mut small = vec![0u32; 1];
        let err = radix_sort(
            &mut keys,
            &mut values,
            3,
            SortScratch {
                keys: &mut vec![0; 3],
                values: &mut vec![0; 3],
                histograms: &mut small,
                block_sums: &mut vec![0; 8],
            },
        );
        assert!(matches!(err, Err(MeshSplatError::CapacityExceeded { .. })));
    }

    #[test]
    fn random_keys_match_stable_sort() {
        let ctx = ComputeContext::new(Some(4)).unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let n: usize = 100_000;
        // Narrow key range forces plenty of ties.
        let mut keys: Vec<u32> = (0..n).map(|_| rng.random_range(0..5_000u32) << 12).collect();
        let mut values: Vec<u32> = (0..n as u32).collect();

        let mut expected: Vec<(u32, u32)> = keys.iter().copied().zip(values.iter().copied()).collect();
        expected.sort_by_key(|&(k, _)| k);

        ctx.install(|| sort_with_fresh_scratch(&mut keys, &mut values));

        let got: Vec<(u32, u32)> = keys.into_iter().zip(values).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn full_width_keys_sort() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut keys: Vec<u32> = (0..3000).map(|_| rng.random()).collect();
        let mut values: Vec<u32> = (0..3000).collect();
        let original = keys.clone();
        sort_with_fresh_scratch(&mut keys, &mut values);
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
        for (k, v) in keys.iter().zip(&values) {
            assert_eq!(original[*v as usize], *k);
        }
    }

    #[test]
    fn block_scan_matches_sequential_past_two_levels() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(99);
        let n = BLOCK * BLOCK + 1234;
        let input: Vec<u32> = (0..n).map(|_| rng.random_range(0..16)).collect();
        let mut data = input.clone();
        let mut sums = vec![0; required_block_sum_elements(n)];
        exclusive_scan(&mut data, &mut sums).unwrap();

        let mut acc = 0u32;
        for (i, &x) in input.iter().enumerate() {
            assert_eq!(data[i], acc, "mismatch at {i}");
            acc += x;
        }
    }

    #[test]
    fn block_sum_scratch_covers_each_level() {
        assert_eq!(required_block_sum_elements(0), 1);
        assert_eq!(required_block_sum_elements(256), 1);
        assert_eq!(required_block_sum_elements(257), 3);
        assert_eq!(required_block_sum_elements(256 * 256 + 1), 257 + 2 + 1);
    }

    #[test]
    fn ordered_float_keys_are_monotonic() {
        let values = [-1e9_f32, -2.5, -0.0, 0.0, 1e-7, 0.5, 3.0, 1e9];
        for w in values.windows(2) {
            assert!(float_to_ordered_key(w[0]) <= float_to_ordered_key(w[1]));
        }
        assert!(float_to_ordered_key(0.1) < float_to_ordered_key(0.2));
    }
}
