//! Buffer pool configuration.

use granite_common::constants::DEFAULT_POOL_SIZE;

/// Configuration for a parallel buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames per pool instance.
    pub pool_size: usize,
    /// Number of pool instances pages are sharded over.
    pub num_instances: usize,
}

impl BufferPoolConfig {
    /// Creates a single-instance configuration with the given frame count.
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            num_instances: 1,
        }
    }

    /// Sets the number of instances.
    pub fn with_instances(mut self, num_instances: usize) -> Self {
        self.num_instances = num_instances;
        self
    }

    /// Total frames across all instances.
    pub fn total_frames(&self) -> usize {
        self.pool_size * self.num_instances
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.pool_size == 0 {
            return Err("pool_size must be > 0");
        }
        if self.num_instances == 0 {
            return Err("num_instances must be > 0");
        }
        Ok(())
    }
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = BufferPoolConfig::new(16).with_instances(4);
        assert_eq!(config.pool_size, 16);
        assert_eq!(config.num_instances, 4);
        assert_eq!(config.total_frames(), 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero() {
        assert!(BufferPoolConfig::new(0).validate().is_err());
        assert!(BufferPoolConfig::new(8)
            .with_instances(0)
            .validate()
            .is_err());
    }
}
