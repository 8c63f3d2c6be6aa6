//! Hand-assembled frames for unit tests. Checksums are left at zero since
//! nothing in the decoder verifies them.

use std::net::Ipv6Addr;
use super::capture::Frame;

pub const CLIENT_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
pub const GATEWAY_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0xfe];

pub fn ethernet(dst: [u8; 6], src: [u8; 6], ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(14 + payload.len());
    out.extend_from_slice(&dst);
    out.extend_from_slice(&src);
    out.extend_from_slice(&ethertype.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn ipv4(src: [u8; 4], dst: [u8; 4], protocol: u8, payload: &[u8]) -> Vec<u8> {
    let total = (20 + payload.len()) as u16;
    let mut out = vec![0x45, 0x00];
    out.extend_from_slice(&total.to_be_bytes());
    out.extend_from_slice(&[0x00, 0x01, 0x40, 0x00, 64, protocol, 0, 0]);
    out.extend_from_slice(&src);
    out.extend_from_slice(&dst);
    out.extend_from_slice(payload);
    out
}

pub fn ipv6(src: Ipv6Addr, dst: Ipv6Addr, next_header: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0x60, 0, 0, 0];
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.push(next_header);
    out.push(64);
    out.extend_from_slice(&src.octets());
    out.extend_from_slice(&dst.octets());
    out.extend_from_slice(payload);
    out
}

pub fn tcp(sport: u16, dport: u16, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(20 + payload.len());
    out.extend_from_slice(&sport.to_be_bytes());
    out.extend_from_slice(&dport.to_be_bytes());
    out.extend_from_slice(&1u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.push(5 << 4);
    out.push(flags);
    out.extend_from_slice(&64240u16.to_be_bytes());
    out.extend_from_slice(&[0, 0, 0, 0]);
    out.extend_from_slice(payload);
    out
}

pub fn udp(sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&sport.to_be_bytes());
    out.extend_from_slice(&dport.to_be_bytes());
    out.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(payload);
    out
}

fn frame(ts_sec: i64, data: Vec<u8>) -> Frame {
    let len = data.len() as u32;
    Frame::new(ts_sec, 0, len, data)
}

pub fn tcp_frame(
    ts_sec: i64,
    src: [u8; 4],
    sport: u16,
    dst: [u8; 4],
    dport: u16,
    flags: u8,
    payload: &[u8],
) -> Frame {
    let segment = tcp(sport, dport, flags, payload);
    frame(ts_sec, ethernet(GATEWAY_MAC, CLIENT_MAC, 0x0800, &ipv4(src, dst, 6, &segment)))
}

pub fn udp_frame(ts_sec: i64, src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16, payload: &[u8]) -> Frame {
    let datagram = udp(sport, dport, payload);
    frame(ts_sec, ethernet(GATEWAY_MAC, CLIENT_MAC, 0x0800, &ipv4(src, dst, 17, &datagram)))
}

pub fn udp6_frame(ts_sec: i64, src: Ipv6Addr, sport: u16, dst: Ipv6Addr, dport: u16, payload: &[u8]) -> Frame {
    let datagram = udp(sport, dport, payload);
    frame(ts_sec, ethernet(GATEWAY_MAC, CLIENT_MAC, 0x86dd, &ipv6(src, dst, 17, &datagram)))
}

pub fn icmp_echo_frame(ts_sec: i64, src: [u8; 4], dst: [u8; 4]) -> Frame {
    let mut echo = vec![8, 0, 0, 0, 0x00, 0x2a, 0x00, 0x01];
    echo.extend_from_slice(b"abcdefgh");
    frame(ts_sec, ethernet(GATEWAY_MAC, CLIENT_MAC, 0x0800, &ipv4(src, dst, 1, &echo)))
}

pub fn arp_frame(
    ts_sec: i64,
    op: u16,
    sender_mac: [u8; 6],
    sender_ip: [u8; 4],
    target_mac: [u8; 6],
    target_ip: [u8; 4],
) -> Frame {
    let mut body = vec![0x00, 0x01, 0x08, 0x00, 6, 4];
    body.extend_from_slice(&op.to_be_bytes());
    body.extend_from_slice(&sender_mac);
    body.extend_from_slice(&sender_ip);
    body.extend_from_slice(&target_mac);
    body.extend_from_slice(&target_ip);
    frame(ts_sec, ethernet([0xff; 6], sender_mac, 0x0806, &body))
}
