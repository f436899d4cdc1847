//! Per-session randomized browser fingerprint and humanized timing (§4.3).
//! A pure value type: no state is shared across sessions, a fresh profile
//! is generated per scraping session.

use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1366, 768), (1440, 900), (1536, 864)];

/// Phoenix metro center, used as the anchor for geolocation jitter.
const METRO_LAT: f64 = 33.4484;
const METRO_LON: f64 = -112.0740;
const METRO_JITTER_DEGREES: f64 = 0.15;

#[derive(Debug, Clone)]
pub struct AntiDetectionProfile {
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub timezone: &'static str,
    pub latitude: f64,
    pub longitude: f64,
    pub languages: Vec<&'static str>,
}

impl AntiDetectionProfile {
    /// Build a fresh, independently randomized profile for one session.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            user_agent: USER_AGENTS.choose(&mut rng).unwrap().to_string(),
            viewport: *VIEWPORTS.choose(&mut rng).unwrap(),
            timezone: "America/Phoenix",
            latitude: METRO_LAT + rng.gen_range(-METRO_JITTER_DEGREES..METRO_JITTER_DEGREES),
            longitude: METRO_LON + rng.gen_range(-METRO_JITTER_DEGREES..METRO_JITTER_DEGREES),
            languages: vec!["en-US", "en"],
        }
    }

    /// Uniform jitter between `min` and `max`, plus an exponentially
    /// distributed component capped at 15s, used to pace inter-request
    /// timing so requests never land at a fixed cadence.
    pub async fn humanized_delay(&self, min: Duration, max: Duration) {
        tokio::time::sleep(Self::delay_duration(min, max)).await;
    }

    fn delay_duration(min: Duration, max: Duration) -> Duration {
        let mut rng = rand::thread_rng();
        let base = if max > min {
            rng.gen_range(min..max)
        } else {
            min
        };
        let lambda = 1.0_f64;
        let exp_component = -(1.0 - rng.gen::<f64>()).ln() / lambda;
        let extra = Duration::from_secs_f64(exp_component.min(15.0));
        base + extra
    }

    /// Interpolates a small number of steps (3-5) between two points, each
    /// with 10-50ms jitter, matching how a human drags a pointer rather
    /// than teleporting it.
    pub async fn humanized_move(&self, target: (f64, f64, f64, f64)) -> Vec<(f64, f64)> {
        let mut rng = rand::thread_rng();
        let steps = rng.gen_range(3..=5);
        let (x0, y0, x1, y1) = target;
        let mut path = Vec::with_capacity(steps);
        for i in 1..=steps {
            let t = i as f64 / steps as f64;
            path.push((x0 + (x1 - x0) * t, y0 + (y1 - y0) * t));
            tokio::time::sleep(Duration::from_millis(rng.gen_range(10..=50))).await;
        }
        path
    }

    /// 50-150ms per character, simulating keystroke cadence.
    pub async fn humanized_type(&self, text: &str) {
        let mut rng = rand::thread_rng();
        for _ in text.chars() {
            tokio::time::sleep(Duration::from_millis(rng.gen_range(50..=150))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geolocation_stays_within_metro_jitter_bounds() {
        for _ in 0..50 {
            let profile = AntiDetectionProfile::generate();
            assert!((profile.latitude - METRO_LAT).abs() <= METRO_JITTER_DEGREES);
            assert!((profile.longitude - METRO_LON).abs() <= METRO_JITTER_DEGREES);
        }
    }

    #[test]
    fn delay_duration_respects_the_floor() {
        let d = AntiDetectionProfile::delay_duration(Duration::from_millis(100), Duration::from_millis(200));
        assert!(d >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn humanized_move_produces_three_to_five_steps() {
        let profile = AntiDetectionProfile::generate();
        let path = profile.humanized_move((0.0, 0.0, 100.0, 100.0)).await;
        assert!(path.len() >= 3 && path.len() <= 5);
        let last = *path.last().unwrap();
        assert!((last.0 - 100.0).abs() < 1e-6);
    }
}
