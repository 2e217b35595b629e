use rand::Rng;

const MINUTE_MS: f64 = 60_000.0;

/// Starting offset into a pool of `n` keys:
/// `floor(now_ms / 60000 + rand * n) mod n`, with `rand` in `[0, 1)`.
///
/// The minute bucket biases requests in the same minute toward the same key; the
/// random term spreads them over the whole pool. There is no shared counter, so
/// independent server instances need no coordination.
pub fn select_start(now_ms: u64, rand: f64, n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    let rand = rand.clamp(0.0, 1.0);
    let raw = (now_ms as f64 / MINUTE_MS + rand * n as f64).floor();
    (raw as u64 % n as u64) as usize
}

/// Visits every index in `0..n` exactly once, starting at `start`.
pub fn rotation_order(start: usize, n: usize) -> Vec<usize> {
    (0..n).map(|i| (start + i) % n).collect()
}

pub trait KeySelector: Send + Sync {
    fn start_index(&self, n: usize) -> usize;
}

/// Wall clock plus thread-local randomness.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockJitterSelector;

impl KeySelector for ClockJitterSelector {
    fn start_index(&self, n: usize) -> usize {
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let rand = rand::thread_rng().gen_range(0.0..1.0);
        select_start(now_ms, rand, n)
    }
}

/// Always starts at the same offset (modulo pool size).
#[derive(Debug, Clone, Copy)]
pub struct FixedSelector(pub usize);

impl KeySelector for FixedSelector {
    fn start_index(&self, n: usize) -> usize {
        if n == 0 { 0 } else { self.0 % n }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn start_is_deterministic_for_fixed_time_and_seed() {
        let now_ms = 1_760_000_000_000u64;
        let draw = |seed: u64| StdRng::seed_from_u64(seed).gen_range(0.0..1.0);
        assert_eq!(
            select_start(now_ms, draw(7), 5),
            select_start(now_ms, draw(7), 5)
        );
    }

    #[test]
    fn start_follows_minute_bucket_without_jitter() {
        // 29_333_333 minutes since epoch; 29_333_333 % 4 == 1.
        let now_ms = 29_333_333u64 * 60_000 + 59_999;
        assert_eq!(select_start(now_ms, 0.0, 4), 1);
        // Next minute moves the start by one.
        assert_eq!(select_start(now_ms + 1, 0.0, 4), 2);
    }

    #[test]
    fn jitter_spans_the_whole_pool() {
        let now_ms = 0u64;
        assert_eq!(select_start(now_ms, 0.0, 3), 0);
        assert_eq!(select_start(now_ms, 0.34, 3), 1);
        assert_eq!(select_start(now_ms, 0.67, 3), 2);
        assert_eq!(select_start(now_ms, 0.999, 3), 2);
    }

    #[test]
    fn start_is_always_in_range() {
        let mut rng = StdRng::seed_from_u64(42);
        for n in 1..=7 {
            for _ in 0..200 {
                let now_ms = rng.gen_range(0..4_000_000_000_000u64);
                let r = rng.gen_range(0.0..1.0);
                assert!(select_start(now_ms, r, n) < n);
            }
        }
        assert_eq!(select_start(123, 0.5, 0), 0);
    }

    #[test]
    fn rotation_visits_each_key_once() {
        assert_eq!(rotation_order(2, 5), vec![2, 3, 4, 0, 1]);
        for n in 1..=7 {
            for start in 0..n {
                let mut order = rotation_order(start, n);
                assert_eq!(order[0], start);
                order.sort_unstable();
                assert_eq!(order, (0..n).collect::<Vec<_>>());
            }
        }
        assert!(rotation_order(0, 0).is_empty());
    }

    #[test]
    fn fixed_selector_wraps() {
        assert_eq!(FixedSelector(5).start_index(3), 2);
        assert_eq!(FixedSelector(5).start_index(0), 0);
        assert!(ClockJitterSelector.start_index(6) < 6);
    }
}
