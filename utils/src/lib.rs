//! This crate provides various convenience functions and utilities.

/// Generate a random vector of triplets.
///
/// Seeded, so test runs are reproducible.
pub fn random_vectors(n: usize) -> Vec<[f64; 3]> {
    use rand::{distributions::Uniform, rngs::StdRng, Rng, SeedableRng};
    let mut rng: StdRng = SeedableRng::from_seed([3; 32]);
    let range = Uniform::new(-1.0, 1.0);
    (0..n)
        .map(move |_| [rng.sample(range), rng.sample(range), rng.sample(range)])
        .collect()
}

/// Generate `n` random scalars in `[lo, hi)` from a fixed seed.
pub fn random_scalars(n: usize, lo: f64, hi: f64) -> Vec<f64> {
    use rand::{distributions::Uniform, rngs::StdRng, Rng, SeedableRng};
    let mut rng: StdRng = SeedableRng::from_seed([7; 32]);
    let range = Uniform::new(lo, hi);
    (0..n).map(move |_| rng.sample(range)).collect()
}

/// Maximum absolute value over an iterator of floats.
pub fn inf_norm<I, T: num_traits::Float>(iter: I) -> T
where
    I: IntoIterator<Item = T>,
{
    iter.into_iter()
        .map(|x| x.abs())
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Less))
        .unwrap_or(T::zero())
}
