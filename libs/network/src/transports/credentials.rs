//! Sender credentials of the current process

use bus_codec::Credentials;
use nix::unistd::{getegid, geteuid, getgid, getgroups, getpid, getuid};
use tracing::debug;

const SECURITY_LABEL_PATH: &str = "/proc/self/attr/current";

/// Credentials of this process, captured once per connection
pub fn process_credentials() -> Credentials {
    let supplementary_gids = match getgroups() {
        Ok(groups) => groups.into_iter().map(|g| g.as_raw()).collect(),
        Err(e) => {
            debug!(error = %e, "Supplementary groups unavailable");
            Vec::new()
        }
    };

    Credentials {
        pid: u32::try_from(getpid().as_raw()).ok(),
        uid: Some(getuid().as_raw()),
        euid: Some(geteuid().as_raw()),
        gid: Some(getgid().as_raw()),
        egid: Some(getegid().as_raw()),
        supplementary_gids,
        security_label: security_label(),
    }
}

fn security_label() -> Option<String> {
    let raw = std::fs::read_to_string(SECURITY_LABEL_PATH).ok()?;
    let label = raw.trim_end_matches(['\0', '\n']).trim();
    (!label.is_empty()).then(|| label.to_string())
}
