//! Gather pass: reorders quad transforms into draw order.

use rayon::prelude::*;

use crate::compute::THREADS_PER_GROUP_1D;
use crate::error::{MeshSplatError, Result};

use super::{DrawIndexedIndirect, QuadTransform};

/// `out[i] = transforms[sorted_slots[i]]` for `i < count`, plus the draw command.
///
/// `transforms` is the prepass output in append order; `sorted_slots` is the
/// sorted value array, whose entries index that order.
pub fn gather_transforms(
    sorted_slots: &[u32],
    transforms: &[QuadTransform],
    out: &mut [QuadTransform],
    count: usize,
) -> Result<DrawIndexedIndirect> {
    if count > sorted_slots.len() || count > out.len() {
        return Err(MeshSplatError::CapacityExceeded {
            requested: count,
            ceiling: sorted_slots.len().min(out.len()),
        });
    }
    let instance_count = u32::try_from(count)?;

    out[..count]
        .par_chunks_mut(THREADS_PER_GROUP_1D as usize)
        .zip(sorted_slots[..count].par_chunks(THREADS_PER_GROUP_1D as usize))
        .try_for_each(|(dst, src)| {
            for (o, &slot) in dst.iter_mut().zip(src) {
                *o = *transforms.get(slot as usize).ok_or_else(|| {
                    MeshSplatError::Other(format!("gather index {slot} out of range"))
                })?;
            }
            Ok::<(), MeshSplatError>(())
        })?;

    Ok(DrawIndexedIndirect::quads(instance_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn tagged(n: usize) -> Vec<QuadTransform> {
        (0..n)
            .map(|i| QuadTransform {
                center: [i as f32, 0.0, 0.0, 1.0],
                axes: [0.0; 4],
                source_index: (i * 7) as u32,
            })
            .collect()
    }

    #[test]
    fn gathered_slots_match_permutation() {
        let n = 1000;
        let transforms = tagged(n);
        let mut perm: Vec<u32> = (0..n as u32).collect();
        perm.shuffle(&mut rand::rngs::StdRng::seed_from_u64(5));

        let mut out = vec![QuadTransform::default(); n];
        let cmd = gather_transforms(&perm, &transforms, &mut out, n).unwrap();
        assert_eq!(cmd.instance_count, n as u32);
        assert_eq!(cmd.index_count, 6);
        for i in 0..n {
            assert_eq!(out[i], transforms[perm[i] as usize]);
        }
    }

    #[test]
    fn empty_gather_writes_nothing() {
        let mut out = vec![QuadTransform::default(); 2];
        let cmd = gather_transforms(&[], &[], &mut out, 0).unwrap();
        assert_eq!(cmd.instance_count, 0);
        assert_eq!(out, vec![QuadTransform::default(); 2]);
    }

    #[test]
    fn out_of_range_slot_is_an_error() {
        let transforms = tagged(2);
        let mut out = vec![QuadTransform::default(); 1];
        assert!(gather_transforms(&[5], &transforms, &mut out, 1).is_err());
    }
}
