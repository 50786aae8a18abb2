use std::path::{Path, PathBuf};

use tasklink_core::config::root_at;

pub const DAEMON_SOCKET: &str = "daemon.sock";

/// `<home>/.tasklink/daemon.sock`
pub fn socket_path(home: &Path) -> PathBuf {
    root_at(home).join(DAEMON_SOCKET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_lives_in_tasklink_root() {
        let path = socket_path(Path::new("/home/ada"));
        assert_eq!(path, PathBuf::from("/home/ada/.tasklink/daemon.sock"));
    }
}
