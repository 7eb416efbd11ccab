//! Admission gate bounding how many units run at once.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;

use super::error::FetchError;

/// A semaphore that also tracks how many holders are inside and the most
/// that ever were at the same time.
#[derive(Debug)]
pub struct AdmissionGate {
    semaphore: Semaphore,
    limit: usize,
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
}

impl AdmissionGate {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Semaphore::new(limit),
            limit,
            in_flight: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Most units ever admitted at the same time.
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    /// Wait for a slot, then run `work` inside it.
    pub async fn run<F, T>(&self, work: F) -> Result<T, FetchError>
    where
        F: Future<Output = T>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| FetchError::fatal("admission gate closed"))?;

        let _inside = Inside::enter(self);
        Ok(work.await)
    }
}

struct Inside<'a> {
    gate: &'a AdmissionGate,
}

impl<'a> Inside<'a> {
    fn enter(gate: &'a AdmissionGate) -> Self {
        let now = gate.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        gate.high_water.fetch_max(now, Ordering::SeqCst);
        Self { gate }
    }
}

impl Drop for Inside<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
