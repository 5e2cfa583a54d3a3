//! Single-threaded backend that runs every work item on the calling thread.

use crate::backend::{BackendType, ComputeBackend, ComputeError, DeviceInfo};

/// Backend that evaluates work items in index order on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialBackend;

impl SerialBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ComputeBackend for SerialBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "Serial (calling thread)".into(),
            backend_type: BackendType::Serial,
            compute_units: Some(1),
        }
    }

    fn parallel_fill(
        &self,
        len: usize,
        fill_fn: &(dyn Fn(usize) -> f64 + Send + Sync),
    ) -> Result<Vec<f64>, ComputeError> {
        Ok((0..len).map(fill_fn).collect())
    }

    fn for_each_index(&self, len: usize, task: &(dyn Fn(usize) + Send + Sync)) {
        for i in 0..len {
            task(i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fill_is_index_ordered() {
        let backend = SerialBackend::new();
        let out = backend.parallel_fill(5, &|i| (i * i) as f64).unwrap();
        assert_eq!(out, vec![0.0, 1.0, 4.0, 9.0, 16.0]);
    }

    #[test]
    fn test_for_each_visits_every_index_once() {
        let backend = SerialBackend::new();
        let sum = AtomicUsize::new(0);
        backend.for_each_index(10, &|i| {
            sum.fetch_add(i, Ordering::Relaxed);
        });
        assert_eq!(sum.load(Ordering::Relaxed), 45);
    }
}
