//! Host resource sizing
//!
//! Decides how many threads the engine may use for intra-op parallelism.

use crate::config::ThreadConfig;

/// Number of online cores, or 1 if it cannot be determined
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// `clamp(cores - headroom, min, max)`, with the subtraction done in signed
/// arithmetic so low-core devices still get `min` threads.
pub fn thread_count(cores: usize, config: &ThreadConfig) -> i32 {
    let cores = i32::try_from(cores).unwrap_or(i32::MAX);
    let max = config.max.max(config.min);
    cores.saturating_sub(config.headroom).clamp(config.min, max)
}

/// Thread count for this machine
pub fn recommended_threads(config: &ThreadConfig) -> i32 {
    thread_count(available_cores(), config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_count_typical_phone() {
        let config = ThreadConfig::default();
        assert_eq!(thread_count(8, &config), 4);
        assert_eq!(thread_count(5, &config), 3);
    }

    #[test]
    fn test_thread_count_low_core_devices() {
        let config = ThreadConfig::default();
        assert_eq!(thread_count(1, &config), 2);
        assert_eq!(thread_count(2, &config), 2);
        assert_eq!(thread_count(0, &config), 2);
    }

    #[test]
    fn test_thread_count_inverted_bounds() {
        let config = ThreadConfig {
            min: 3,
            max: 1,
            headroom: 0,
        };
        assert_eq!(thread_count(16, &config), 3);
    }

    #[test]
    fn test_available_cores_is_positive() {
        assert!(available_cores() >= 1);
    }
}
