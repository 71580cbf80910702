//! Synthetic position generator: a bounded random walk used when no real
//! fix can be acquired, so a trip keeps producing plausible samples
//! instead of failing.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::Fix;

pub struct SyntheticWalk {
    rng: StdRng,
    lat: f64,
    lng: f64,
    jitter_degrees: f64,
}

impl SyntheticWalk {
    /// Start a walk at the reference point. Pass a seed for deterministic
    /// output in tests; `None` seeds from entropy.
    pub fn new(lat: f64, lng: f64, jitter_degrees: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            lat,
            lng,
            jitter_degrees,
        }
    }

    /// Produce the next fix: a small bounded offset from the previous
    /// coordinate, with plausible accuracy, speed and heading.
    pub fn step(&mut self) -> Fix {
        let j = self.jitter_degrees;
        self.lat = (self.lat + self.rng.gen_range(-j..=j)).clamp(-90.0, 90.0);
        self.lng = (self.lng + self.rng.gen_range(-j..=j)).clamp(-180.0, 180.0);

        Fix {
            lat: self.lat,
            lng: self.lng,
            accuracy: Some(self.rng.gen_range(5.0..=30.0)),
            speed: Some(self.rng.gen_range(0.0..=12.0)),
            heading: Some(self.rng.gen_range(0.0..360.0)),
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_stays_within_jitter_bound() {
        let mut walk = SyntheticWalk::new(22.9676, 76.0534, 0.0008, Some(42));
        let (mut prev_lat, mut prev_lng) = (22.9676, 76.0534);
        for _ in 0..200 {
            let fix = walk.step();
            assert!((fix.lat - prev_lat).abs() <= 0.0008 + f64::EPSILON);
            assert!((fix.lng - prev_lng).abs() <= 0.0008 + f64::EPSILON);
            prev_lat = fix.lat;
            prev_lng = fix.lng;
        }
    }

    #[test]
    fn test_metadata_is_plausible_and_bounded() {
        let mut walk = SyntheticWalk::new(22.9676, 76.0534, 0.0008, Some(7));
        for _ in 0..100 {
            let fix = walk.step();
            let accuracy = fix.accuracy.unwrap();
            let speed = fix.speed.unwrap();
            let heading = fix.heading.unwrap();
            assert!((5.0..=30.0).contains(&accuracy));
            assert!((0.0..=12.0).contains(&speed));
            assert!((0.0..360.0).contains(&heading));
        }
    }

    #[test]
    fn test_seeded_walks_are_reproducible() {
        let mut a = SyntheticWalk::new(22.9676, 76.0534, 0.0008, Some(99));
        let mut b = SyntheticWalk::new(22.9676, 76.0534, 0.0008, Some(99));
        for _ in 0..20 {
            let (fa, fb) = (a.step(), b.step());
            assert_eq!(fa.lat, fb.lat);
            assert_eq!(fa.lng, fb.lng);
        }
    }

    #[test]
    fn test_coordinates_stay_in_valid_range_at_the_poles() {
        let mut walk = SyntheticWalk::new(89.9999, 179.9999, 0.001, Some(1));
        for _ in 0..100 {
            let fix = walk.step();
            assert!((-90.0..=90.0).contains(&fix.lat));
            assert!((-180.0..=180.0).contains(&fix.lng));
        }
    }
}
