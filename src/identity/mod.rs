//! Per-browser identity: the device identifier and the user profile snapshot.
//! Keep the public surface thin and split implementation across sub-modules.

mod device;
mod fingerprint;
mod profile;

pub use device::{fallback_device_id, DeviceIdentity, DeviceIdentityResolver, DeviceOrigin, FALLBACK_PREFIX};
pub use fingerprint::{EnvironmentFingerprinter, EnvironmentSignals, Fingerprinter};
pub use profile::{Role, UserProfile, ADMIN_ROLES};
