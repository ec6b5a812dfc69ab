//! Logging shim.
//!
//! The core logs the boot decisions it makes through whichever hook the
//! environment provides: the `log` facade on hosted builds, `defmt` on
//! embedded builds with an RTT transport.  With neither feature enabled the
//! macros evaluate their arguments and discard them, so values that are only
//! mentioned in log lines do not trip unused warnings.

#![allow(unused_macros)]

macro_rules! info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        ::log::info!($($arg)*);
        #[cfg(all(feature = "defmt", not(feature = "log")))]
        ::defmt::info!($($arg)*);
        #[cfg(not(any(feature = "log", feature = "defmt")))]
        let _ = ($($arg)*);
    }};
}

macro_rules! warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        ::log::warn!($($arg)*);
        #[cfg(all(feature = "defmt", not(feature = "log")))]
        ::defmt::warn!($($arg)*);
        #[cfg(not(any(feature = "log", feature = "defmt")))]
        let _ = ($($arg)*);
    }};
}
