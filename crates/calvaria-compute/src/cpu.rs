//! CPU compute backend using Rayon for shared-memory parallelism.

use crate::backend::{BackendType, ComputeBackend, ComputeError, DeviceInfo};

/// CPU backend that parallelises work across threads via Rayon.
pub struct CpuBackend {
    num_threads: usize,
    pool: Option<rayon::ThreadPool>,
}

impl CpuBackend {
    /// Create a new CPU backend using the global Rayon pool.
    pub fn new() -> Self {
        Self {
            num_threads: rayon::current_num_threads(),
            pool: None,
        }
    }

    /// Create a CPU backend with a dedicated pool of `num_threads` threads.
    pub fn with_threads(num_threads: usize) -> Result<Self, ComputeError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| ComputeError::Unavailable(e.to_string()))?;
        Ok(Self {
            num_threads,
            pool: Some(pool),
        })
    }

    fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: format!("CPU ({} threads)", self.num_threads),
            backend_type: BackendType::Cpu,
            compute_units: Some(self.num_threads),
        }
    }

    fn parallel_fill(
        &self,
        len: usize,
        fill_fn: &(dyn Fn(usize) -> f64 + Send + Sync),
    ) -> Result<Vec<f64>, ComputeError> {
        use rayon::prelude::*;

        // Indexed collect keeps output order independent of scheduling.
        let data: Vec<f64> = self.install(|| (0..len).into_par_iter().map(fill_fn).collect());

        if data.len() != len {
            return Err(ComputeError::LengthMismatch {
                expected: len,
                produced: data.len(),
            });
        }
        Ok(data)
    }

    fn for_each_index(&self, len: usize, task: &(dyn Fn(usize) + Send + Sync)) {
        use rayon::prelude::*;

        self.install(|| (0..len).into_par_iter().for_each(task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::SerialBackend;

    #[test]
    fn test_matches_serial_bit_for_bit() {
        let f = |i: usize| (i as f64 * 0.37).sin() / (1.0 + i as f64);
        let serial = SerialBackend::new().parallel_fill(4096, &f).unwrap();
        let cpu = CpuBackend::with_threads(4).unwrap().parallel_fill(4096, &f).unwrap();
        assert_eq!(serial, cpu);
    }
}
