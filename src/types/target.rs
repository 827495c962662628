//! SSH target address handling.
//!
//! Normalises a saved device address into a `host:port` string suitable
//! for dialing, appending the default SSH port when none is given.

use std::net::{IpAddr, SocketAddr};

/// Port used when an address carries none.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Error type for address parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("invalid address: {0}")]
    InvalidFormat(String),
    #[error("invalid port in address: {0}")]
    InvalidPort(String),
}

/// Ensure an address has a port, appending `:22` when it is missing.
///
/// Addresses that already carry a port are returned unchanged. Anything that
/// is neither an IP address nor a valid hostname is rejected.
///
/// ```
/// use idiot::types::add_port;
///
/// assert_eq!(add_port("192.168.1.10").unwrap(), "192.168.1.10:22");
/// assert_eq!(add_port("192.168.1.10:2222").unwrap(), "192.168.1.10:2222");
/// assert!(add_port("not an address").is_err());
/// ```
pub fn add_port(addr: &str) -> Result<String, TargetError> {
    add_port_or(addr, DEFAULT_SSH_PORT)
}

/// Like [`add_port`], appending `default_port` instead of 22.
pub fn add_port_or(addr: &str, default_port: u16) -> Result<String, TargetError> {
    let addr = addr.trim();

    if addr.parse::<SocketAddr>().is_ok() {
        return Ok(addr.to_string());
    }

    if let Ok(ip) = addr.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port).to_string());
    }

    // Bracketed IPv6 without a port, e.g. "[fe80::1]".
    if let Some(inner) = addr.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        if let Ok(ip) = inner.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, default_port).to_string());
        }
        return Err(TargetError::InvalidFormat(addr.to_string()));
    }

    if let Some((host, port)) = addr.rsplit_once(':') {
        if !is_valid_hostname(host) {
            return Err(TargetError::InvalidFormat(addr.to_string()));
        }
        port.parse::<u16>()
            .map_err(|_| TargetError::InvalidPort(addr.to_string()))?;
        return Ok(addr.to_string());
    }

    if is_valid_hostname(addr) {
        return Ok(format!("{}:{}", addr, default_port));
    }

    Err(TargetError::InvalidFormat(addr.to_string()))
}

/// Split an address into host and port, using `default_port` when the
/// address carries none.
pub fn split_host_port(addr: &str, default_port: u16) -> Result<(String, u16), TargetError> {
    let with_port = add_port_or(addr, default_port)?;

    if let Ok(socket) = with_port.parse::<SocketAddr>() {
        return Ok((socket.ip().to_string(), socket.port()));
    }

    let (host, port) = with_port
        .rsplit_once(':')
        .ok_or_else(|| TargetError::InvalidFormat(addr.to_string()))?;
    let port = port
        .parse()
        .map_err(|_| TargetError::InvalidPort(addr.to_string()))?;
    Ok((host.to_string(), port))
}

/// Check if a string is a valid hostname.
pub fn is_valid_hostname(s: &str) -> bool {
    if s.is_empty() || s.len() > 253 {
        return false;
    }

    // Single-label names are allowed for local hosts.
    // Each label must be 1-63 characters.
    for label in s.split('.') {
        if label.is_empty() || label.len() > 63 {
            return false;
        }
        if !label.chars().next().map_or(false, |c| c.is_ascii_alphanumeric()) {
            return false;
        }
        if !label.chars().last().map_or(false, |c| c.is_ascii_alphanumeric()) {
            return false;
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_port_appends_default() {
        assert_eq!(add_port("192.168.1.10").unwrap(), "192.168.1.10:22");
        assert_eq!(add_port("raspberrypi.local").unwrap(), "raspberrypi.local:22");
    }

    #[test]
    fn test_add_port_keeps_existing_port() {
        assert_eq!(add_port("192.168.1.10:2222").unwrap(), "192.168.1.10:2222");
        assert_eq!(add_port("printer.lan:8022").unwrap(), "printer.lan:8022");
    }

    #[test]
    fn test_add_port_ipv6() {
        assert_eq!(add_port("fe80::1").unwrap(), "[fe80::1]:22");
        assert_eq!(add_port("[fe80::1]").unwrap(), "[fe80::1]:22");
        assert_eq!(add_port("[fe80::1]:2200").unwrap(), "[fe80::1]:2200");
    }

    #[test]
    fn test_add_port_rejects_garbage() {
        assert!(matches!(
            add_port("not an address"),
            Err(TargetError::InvalidFormat(_))
        ));
        assert!(add_port("").is_err());
        assert!(matches!(
            add_port("host:notaport"),
            Err(TargetError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("192.168.1.10", DEFAULT_SSH_PORT).unwrap(),
            ("192.168.1.10".to_string(), 22)
        );
        assert_eq!(
            split_host_port("nas.local:2222", DEFAULT_SSH_PORT).unwrap(),
            ("nas.local".to_string(), 2222)
        );
        assert_eq!(
            split_host_port("[fe80::1]:22", DEFAULT_SSH_PORT).unwrap(),
            ("fe80::1".to_string(), 22)
        );
    }

    #[test]
    fn test_split_host_port_uses_configured_default() {
        assert_eq!(
            split_host_port("192.168.1.10", 2222).unwrap(),
            ("192.168.1.10".to_string(), 2222)
        );
        assert_eq!(
            split_host_port("pi.lan", 2222).unwrap(),
            ("pi.lan".to_string(), 2222)
        );
        // An explicit port still wins.
        assert_eq!(
            split_host_port("192.168.1.10:22", 2222).unwrap(),
            ("192.168.1.10".to_string(), 22)
        );
        assert_eq!(add_port_or("[fe80::1]", 8022).unwrap(), "[fe80::1]:8022");
    }

    #[test]
    fn test_valid_hostname() {
        assert!(is_valid_hostname("example.com"));
        assert!(is_valid_hostname("my-server"));
        assert!(!is_valid_hostname(""));
        assert!(!is_valid_hostname("-invalid.com"));
        assert!(!is_valid_hostname("has space"));
    }
}
