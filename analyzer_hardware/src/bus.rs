//! Shared I2C bus handles.
//!
//! One `SharedI2c` exists per physical segment and is cloned into every
//! facade wired to that segment. The mutex is held for the duration of a
//! whole transaction, so concurrent channel tasks never interleave
//! register accesses on the same bus; facades on different buses proceed
//! in parallel.

use std::sync::{Arc, Mutex, MutexGuard};

use rppal::i2c::I2c;

use crate::error::{HwError, Result};

#[derive(Clone)]
pub struct SharedI2c {
    inner: Arc<Mutex<I2c>>,
}

impl SharedI2c {
    /// Open the numbered I2C bus (`/dev/i2c-<n>`).
    pub fn open(bus: u8) -> Result<Self> {
        let i2c = I2c::with_bus(bus).map_err(|e| HwError::I2c(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(i2c)),
        })
    }

    /// Acquire the bus for one transaction. A poisoned lock can only come
    /// from a panicked holder mid-transaction; recover the handle, the next
    /// transaction re-addresses the slave anyway.
    pub fn acquire(&self) -> MutexGuard<'_, I2c> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        }
    }
}
