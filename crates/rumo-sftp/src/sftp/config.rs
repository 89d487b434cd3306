// ── Endpoint config loading ──────────────────────────────────────────────────

use crate::sftp::types::EndpointConfig;
use log::{debug, warn};
use std::path::Path;

/// Read and validate the endpoint config at `path`.
///
/// A missing file, unparsable JSON or a blank required field all yield
/// `None`; the reason is logged, never returned.
pub fn load_config(path: &Path) -> Option<EndpointConfig> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No SFTP config at {}", path.display());
            return None;
        }
        Err(e) => {
            warn!("Failed to read SFTP config {}: {}", path.display(), e);
            return None;
        }
    };
    parse_config(&raw).or_else(|| {
        warn!("Ignoring invalid SFTP config {}", path.display());
        None
    })
}

/// Parse a config document; `None` when it is not a usable endpoint.
pub fn parse_config(raw: &str) -> Option<EndpointConfig> {
    let config: EndpointConfig = match serde_json::from_str(raw) {
        Ok(c) => c,
        Err(e) => {
            warn!("SFTP config parse error: {}", e);
            return None;
        }
    };
    if let Some(field) = config.missing_field() {
        warn!("SFTP config is missing required field '{}'", field);
        return None;
    }
    Some(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(&dir.path().join("sftp.json")).is_none());
    }

    #[test]
    fn valid_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sftp.json");
        std::fs::write(
            &path,
            r#"{"host":"h","port":22,"username":"u","password":"p","remotePath":"/r"}"#,
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.host, "h");
        assert_eq!(cfg.remote_path, "/r");
        assert_eq!(cfg.password.as_deref(), Some("p"));
    }

    #[test]
    fn garbage_is_absent() {
        assert!(parse_config("{ not json").is_none());
        assert!(parse_config("[]").is_none());
    }

    #[test]
    fn empty_host_is_absent() {
        assert!(parse_config(r#"{"host":"","username":"u","remotePath":"/r"}"#).is_none());
        assert!(parse_config(r#"{"host":"h","username":"u"}"#).is_none());
    }
}
