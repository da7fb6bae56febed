//! Scheme selection for bare host/port URLs.
//!
//! The SFU signaling URL is frequently handed to callers as a host, not a
//! full `ws://`/`wss://` URL (local dev servers run plaintext, everything
//! else is expected to be behind TLS). This mirrors the same judgment call
//! `forwarder`'s uplink config makes for its receiver URL.

/// Returns `true` for loopback and RFC1918 private hosts, where it is normal
/// to run a plaintext signaling server during local development.
pub fn is_local_or_private_host(host: &str) -> bool {
    let host = host.split(':').next().unwrap_or(host);

    if host == "localhost" || host.ends_with(".local") {
        return true;
    }

    match host.parse::<std::net::IpAddr>() {
        Ok(std::net::IpAddr::V4(v4)) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local()
        }
        Ok(std::net::IpAddr::V6(v6)) => v6.is_loopback(),
        Err(_) => false,
    }
}

/// Picks `ws` for local/private hosts and `wss` everywhere else, unless the
/// caller already supplied a scheme.
pub fn resolve_scheme(host_or_url: &str) -> String {
    if host_or_url.contains("://") {
        return host_or_url.to_owned();
    }
    let scheme = if is_local_or_private_host(host_or_url) {
        "ws"
    } else {
        "wss"
    };
    format!("{scheme}://{host_or_url}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_and_private_hosts_are_local() {
        assert!(is_local_or_private_host("localhost"));
        assert!(is_local_or_private_host("localhost:8787"));
        assert!(is_local_or_private_host("127.0.0.1"));
        assert!(is_local_or_private_host("127.0.0.1:8787"));
        assert!(is_local_or_private_host("192.168.1.40"));
        assert!(is_local_or_private_host("10.0.0.5"));
        assert!(is_local_or_private_host("machine.local"));
    }

    #[test]
    fn public_hosts_are_not_local() {
        assert!(!is_local_or_private_host("sfu.example.com"));
        assert!(!is_local_or_private_host("1.2.3.4"));
    }

    #[test]
    fn resolve_scheme_picks_plaintext_for_local_and_tls_for_public() {
        assert_eq!(resolve_scheme("localhost:8787"), "ws://localhost:8787");
        assert_eq!(resolve_scheme("sfu.example.com"), "wss://sfu.example.com");
        assert_eq!(
            resolve_scheme("wss://already-schemed.example.com"),
            "wss://already-schemed.example.com"
        );
    }
}
