use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use uuid::Uuid;
use chrono::{DateTime, Local, Utc};

pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn format_timestamp(timestamp: i64) -> String {
    let dt = DateTime::from_timestamp(timestamp, 0)
        .unwrap_or_else(|| Utc::now());
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Name for a saved live capture, e.g. `capture-20240301-141502.pcap`.
pub fn capture_filename(at: DateTime<Local>) -> String {
    format!("capture-{}.pcap", at.format("%Y%m%d-%H%M%S"))
}

/// Reduce a user supplied file name to a safe base name.
///
/// Directory components (either separator) are dropped, only ASCII
/// alphanumerics and `._-` survive, and leading dots are stripped so the
/// result can neither climb out of a directory nor name a hidden file.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(*c, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_start_matches(|c: char| c == '.' || c == '_').to_string();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

pub fn is_public_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => is_public_v4(ipv4),
        IpAddr::V6(ipv6) => is_public_v6(ipv6),
    }
}

/// String form used by packet records. Anything that does not parse as an
/// address (MACs, `N/A`) is not public.
pub fn is_public_addr(addr: &str) -> bool {
    addr.parse::<IpAddr>()
        .map(|ip| is_public_ip(&ip))
        .unwrap_or(false)
}

fn is_public_v4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    let shared = octets[0] == 100 && (octets[1] & 0xc0) == 64;
    let benchmarking = octets[0] == 198 && (octets[1] & 0xfe) == 18;
    let reserved = octets[0] >= 240;

    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || shared
        || benchmarking
        || reserved)
}

fn is_public_v6(ip: &Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_public_v4(&mapped);
    }

    let first = ip.segments()[0];
    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;
    let documentation = first == 0x2001 && ip.segments()[1] == 0x0db8;

    !(ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || unique_local
        || link_local
        || documentation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_session_id_generation() {
        let id1 = generate_session_id();
        let id2 = generate_session_id();
        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 36); // UUID length
    }

    #[test]
    fn test_public_ip_detection() {
        assert!(!is_public_addr("192.168.1.5"));
        assert!(!is_public_addr("10.0.0.1"));
        assert!(!is_public_addr("172.16.0.1"));
        assert!(!is_public_addr("127.0.0.1"));
        assert!(!is_public_addr("224.0.0.251"));
        assert!(!is_public_addr("255.255.255.255"));
        assert!(!is_public_addr("fe80::1"));
        assert!(!is_public_addr("fd00::1"));
        assert!(!is_public_addr("ff02::fb"));
        assert!(!is_public_addr("aa:bb:cc:dd:ee:ff"));
        assert!(!is_public_addr("N/A"));

        assert!(is_public_addr("8.8.8.8"));
        assert!(is_public_addr("1.1.1.1"));
        assert!(is_public_addr("2606:4700:4700::1111"));
    }

    #[test]
    fn test_capture_filename() {
        let at = Local.with_ymd_and_hms(2024, 3, 1, 14, 15, 2).unwrap();
        assert_eq!(capture_filename(at), "capture-20240301-141502.pcap");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("capture-1.pcap").as_deref(), Some("capture-1.pcap"));
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename("..\\..\\boot.ini").as_deref(), Some("boot.ini"));
        assert_eq!(sanitize_filename("/tmp/.hidden").as_deref(), Some("hidden"));
        assert_eq!(sanitize_filename("my capture.pcap").as_deref(), Some("my_capture.pcap"));
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename(""), None);
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
    }
}
