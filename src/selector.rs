//! Randomised clip selection covering a target duration.
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{CoreError, Result};
use crate::model::{MediaSegment, SelectionResult};

fn usable(duration: f64) -> f64 {
    if duration.is_finite() && duration > 0.0 {
        duration
    } else {
        0.0
    }
}

/// Pick segments from `pool` until their durations add up to at least `target`.
///
/// The pool is walked in shuffled order; once every segment has been used the
/// order is reshuffled and the walk starts over, so nothing repeats within a
/// pass. The last segment is taken whole even when it overshoots.
pub fn select<R>(pool: &[MediaSegment], target: f64, rng: &mut R) -> Result<SelectionResult>
where
    R: Rng + ?Sized,
{
    if pool.is_empty() {
        return Err(CoreError::EmptyPool("clip pool is empty".into()));
    }
    if !target.is_finite() {
        return Err(CoreError::InsufficientDuration {
            target,
            accumulated: 0.0,
        });
    }

    let pool_total: f64 = pool.iter().map(|s| usable(s.duration)).sum();
    if target > 0.0 && pool_total <= 0.0 {
        return Err(CoreError::InsufficientDuration {
            target,
            accumulated: 0.0,
        });
    }

    let max_passes = if target > 0.0 {
        (target / pool_total).ceil() as u32 + 1
    } else {
        1
    };

    let mut order: Vec<usize> = (0..pool.len()).collect();
    let mut result = SelectionResult::default();

    while result.passes < max_passes {
        order.shuffle(rng);
        result.passes += 1;
        for &idx in &order {
            let segment = &pool[idx];
            result.total_duration += usable(segment.duration);
            result.segments.push(segment.clone());
            if result.total_duration >= target {
                return Ok(result);
            }
        }
    }

    Err(CoreError::InsufficientDuration {
        target,
        accumulated: result.total_duration,
    })
}
