use rand::Rng;

/// Samples from Gamma(shape, 1): Marsaglia-Tsang for `shape >= 1`, with the
/// Ahrens-Dieter boost transform for `shape < 1`.
pub fn sample<R: Rng>(rng: &mut R, shape: f64) -> f64 {
    if shape < 1.0 {
        let u: f64 = rng.gen();
        return sample(rng, shape + 1.0) * u.powf(1.0 / shape);
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();

    loop {
        let u1: f64 = rng.gen::<f64>().max(1e-15);
        let u2: f64 = rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();

        let v = (1.0 + c * z).powi(3);
        if v <= 0.0 {
            continue;
        }

        let u: f64 = rng.gen();
        if u < 1.0 - 0.0331 * z.powi(4) || u.ln() < 0.5 * z * z + d * (1.0 - v + v.ln()) {
            return d * v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gamma_samples_are_positive() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            assert!(sample(&mut rng, 3.5) > 0.0);
            assert!(sample(&mut rng, 0.5) > 0.0);
        }
    }
}
