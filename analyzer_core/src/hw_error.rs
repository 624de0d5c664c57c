//! Maps `Box<dyn Error>` from the facade trait boundaries to typed errors.
//!
//! The traits in `analyzer_traits` use `Box<dyn Error + Send + Sync>` for
//! maximum flexibility; this module converts those to the typed channel
//! error, with a feature-gated path for `analyzer_hardware::HwError`
//! downcasting.

use crate::error::ChannelError;

/// Map a trait-boundary error to a typed `ChannelError`. Everything coming
/// out of a facade is treated as a transient bus error; the scheduler's
/// retry budget decides when it becomes a fault.
pub fn map_bus_error(e: &(dyn std::error::Error + 'static)) -> ChannelError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<analyzer_hardware::error::HwError>() {
            return ChannelError::Bus(hw.to_string());
        }
    }
    ChannelError::Bus(e.to_string())
}
