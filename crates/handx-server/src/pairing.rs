//! Pairing URL shown at startup.

use std::net::{IpAddr, UdpSocket};

/// Host clients should dial. A wildcard bind is replaced by this machine's
/// outward-facing IPv4 address, or `localhost` if there is none.
pub fn display_host(bind_host: &str) -> String {
    match bind_host {
        "" | "0.0.0.0" => local_ipv4().unwrap_or_else(|| "localhost".to_string()),
        host => host.to_string(),
    }
}

/// IPv4 address of the interface the OS would route outbound traffic
/// through, if it is not loopback. Connecting a UDP socket sends nothing.
fn local_ipv4() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip.to_string()),
        _ => None,
    }
}

pub fn connection_url(host: &str, port: u16, path: &str, token: &str) -> String {
    format!("ws://{host}:{port}{path}?token={token}")
}

/// Text block printed to stdout for the operator.
pub fn banner(url: &str, token_lifetime_secs: u64) -> String {
    let rule = "=".repeat(60);
    format!(
        "{rule}\n handx gateway ready\n\n Connect a client to:\n   {url}\n\n Token expires in {} minutes.\n{rule}",
        token_lifetime_secs / 60
    )
}
