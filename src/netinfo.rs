//! Best-effort discovery of the machine's LAN-facing address.

use std::net::{IpAddr, UdpSocket};

/// Returns the local address other devices on the network can reach.
///
/// Connecting a UDP socket toward a public resolver makes the OS pick
/// the outward-facing source address; no datagram is ever sent. `None`
/// means no usable route — the server still starts, the user just has
/// to look the address up themselves.
pub fn local_address() -> Option<IpAddr> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(("8.8.8.8", 80)).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}
