//! Device UID derivation.

use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};

// The machine ID must not change while rocd is running. Normally it
// never changes at all, but it's an external resource, so it is read
// once and cached.
static MACHINE_ID: OnceCell<String> = OnceCell::new();

/// Pin the machine id instead of reading it from the host.
///
/// Must be called before the first UID is computed; later calls are
/// ignored. Useful for reproducible UIDs in tests and sandboxes.
pub fn pin_machine_id(id: impl Into<String>) {
    let _ = MACHINE_ID.set(id.into());
}

fn machine_id() -> &'static str {
    MACHINE_ID.get_or_init(|| match machine_uid::get() {
        Ok(id) => id,
        Err(err) => panic!("failed to get machine id: {err}"),
    })
}

/// Derive the stable UID of a device from its system name.
///
/// The UID is a hash of the machine id and the system name, displayed
/// as hex with a `-` separator every 8 nibbles. The same device on the
/// same machine always maps to the same UID.
#[must_use]
pub fn make_device_uid(system_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("machine={},device={}", machine_id(), system_name));
    let digest = hasher.finalize();

    let mut uid = String::with_capacity(digest.len() * 2 + digest.len() / 4);
    for (i, byte) in digest.iter().enumerate() {
        if i > 0 && i % 4 == 0 {
            uid.push('-');
        }
        uid.push_str(&format!("{byte:02x}"));
    }

    uid
}
