//! Utility functions for minidsm

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Base URL other processes can use to reach a bound listener.
/// Wildcard binds are advertised on loopback.
pub fn http_url(addr: SocketAddr) -> String {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        ip => ip,
    };
    format!("http://{}", SocketAddr::new(ip, addr.port()))
}

/// Validate a symbolic object name
pub fn validate_name(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::Error::InvalidArgument("name cannot be empty".into()));
    }
    if name.len() > 1024 {
        return Err(crate::Error::InvalidArgument(
            "name too long (max 1024 bytes)".into(),
        ));
    }
    if name.chars().any(char::is_control) {
        return Err(crate::Error::InvalidArgument(
            "name cannot contain control characters".into(),
        ));
    }
    Ok(())
}
