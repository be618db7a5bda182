use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use tracing::info;

/// Seed shared by every reproducible draw in the pipeline.
pub const SAMPLE_SEED: u64 = 42;

/// Row positions of a uniform draw of `amount` rows out of `len`, without replacement.
/// Positions are returned in ascending order.
pub fn sample_positions(len: usize, amount: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut positions = index::sample(&mut rng, len, amount.min(len)).into_vec();
    positions.sort_unstable();
    positions
}

/// Reduces the frame to exactly `sample_size` rows when it is larger than that. A missing
/// (or zero) sample size, or a frame that is already small enough, passes through untouched.
pub fn sample_rows(df: &DataFrame, sample_size: Option<usize>) -> PolarsResult<DataFrame> {
    let Some(target) = sample_size.filter(|&n| n > 0) else {
        return Ok(df.clone());
    };
    if df.height() <= target {
        return Ok(df.clone());
    }

    let sampled = take_positions(df, &sample_positions(df.height(), target, SAMPLE_SEED))?;
    info!(rows = target, "sampled dataset for performance");
    Ok(sampled)
}

pub fn take_positions(df: &DataFrame, positions: &[usize]) -> PolarsResult<DataFrame> {
    let indices: Vec<IdxSize> = positions.iter().map(|&idx| idx as IdxSize).collect();
    df.take(&IdxCa::from_vec("sample".into(), indices))
}
