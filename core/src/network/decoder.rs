use pnet::packet::arp::{ArpOperations, ArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::DecodeError;
use super::capture::{Frame, LINKTYPE_ETHERNET, LINKTYPE_IPV4, LINKTYPE_IPV6, LINKTYPE_RAW};
use super::dns::{self, DnsMessage, DNS_PORT};
use super::http::{self, HttpRequestLine};

const ETHERNET_HEADER_LEN: usize = 14;
const ARP_LEN: usize = 28;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const TCP_MIN_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;
const ICMP_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerKind {
    Ethernet,
    #[serde(rename = "ARP")]
    Arp,
    IPv4,
    IPv6,
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "ICMP")]
    Icmp,
    #[serde(rename = "DNS")]
    Dns,
    #[serde(rename = "HTTP")]
    Http,
    Raw,
}

impl LayerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerKind::Ethernet => "Ethernet",
            LayerKind::Arp => "ARP",
            LayerKind::IPv4 => "IPv4",
            LayerKind::IPv6 => "IPv6",
            LayerKind::Tcp => "TCP",
            LayerKind::Udp => "UDP",
            LayerKind::Icmp => "ICMP",
            LayerKind::Dns => "DNS",
            LayerKind::Http => "HTTP",
            LayerKind::Raw => "Raw",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a whole packet, most specific layer first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "DNS")]
    Dns,
    #[serde(rename = "ICMP")]
    Icmp,
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "ARP")]
    Arp,
    Other,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Dns => "DNS",
            Protocol::Icmp => "ICMP",
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Arp => "ARP",
            Protocol::Other => "Other",
        }
    }

    fn classify(layers: &[DecodedLayer]) -> Self {
        let has = |kind: LayerKind| layers.iter().any(|l| l.name == kind);
        if has(LayerKind::Http) {
            Protocol::Http
        } else if has(LayerKind::Dns) {
            Protocol::Dns
        } else if has(LayerKind::Icmp) {
            Protocol::Icmp
        } else if has(LayerKind::Tcp) {
            Protocol::Tcp
        } else if has(LayerKind::Udp) {
            Protocol::Udp
        } else if has(LayerKind::Arp) {
            Protocol::Arp
        } else {
            Protocol::Other
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedLayer {
    pub name: LayerKind,
    pub fields: BTreeMap<String, String>,
}

impl DecodedLayer {
    pub fn new(name: LayerKind) -> Self {
        Self {
            name,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: &str, value: impl ToString) -> Self {
        self.fields.insert(field.to_string(), value.to_string());
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    fn raw(bytes: &[u8]) -> Self {
        DecodedLayer::new(LayerKind::Raw)
            .with("length", bytes.len())
            .with("load", hex::encode(bytes))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketRecord {
    pub frame_number: u64,
    pub ts_sec: i64,
    pub ts_usec: u32,
    pub source: String,
    pub destination: String,
    pub protocol: Protocol,
    pub length: usize,
    pub original_length: u32,
    pub summary: String,
    pub layers: Vec<DecodedLayer>,
    /// Transport payload (TCP or UDP), when non-empty.
    #[serde(skip)]
    pub payload: Option<Vec<u8>>,
    /// Where decoding stopped early, if it did.
    pub decode_error: Option<String>,
}

impl PacketRecord {
    pub fn has_layer(&self, kind: LayerKind) -> bool {
        self.layers.iter().any(|l| l.name == kind)
    }

    pub fn layer(&self, kind: LayerKind) -> Option<&DecodedLayer> {
        self.layers.iter().find(|l| l.name == kind)
    }

    /// Whether the packet carries an IPv4 or IPv6 header, i.e. whether
    /// `source`/`destination` are IP addresses.
    pub fn is_ip(&self) -> bool {
        self.has_layer(LayerKind::IPv4) || self.has_layer(LayerKind::IPv6)
    }

    pub fn source_port(&self) -> Option<u16> {
        self.transport_field("sport")
    }

    pub fn destination_port(&self) -> Option<u16> {
        self.transport_field("dport")
    }

    fn transport_field(&self, field: &str) -> Option<u16> {
        self.layer(LayerKind::Tcp)
            .or_else(|| self.layer(LayerKind::Udp))
            .and_then(|l| l.get(field))
            .and_then(|v| v.parse().ok())
    }
}

/// Everything learned about one frame while walking its layers.
#[derive(Default)]
struct Dissection {
    layers: Vec<DecodedLayer>,
    source: Option<String>,
    destination: Option<String>,
    sport: Option<u16>,
    dport: Option<u16>,
    payload: Option<Vec<u8>>,
    error: Option<DecodeError>,
    tcp_flags: Option<String>,
    icmp: Option<(u8, u8)>,
    arp_is_request: Option<bool>,
    dns: Option<DnsMessage>,
    http: Option<HttpRequestLine>,
}

impl Dissection {
    fn push(&mut self, layer: DecodedLayer) {
        self.layers.push(layer);
    }

    /// The layer starting at `bytes` did not parse: keep the bytes as Raw.
    fn fail(&mut self, bytes: &[u8], error: DecodeError) {
        self.layers.push(DecodedLayer::raw(bytes));
        self.error = Some(error);
    }

    /// Bytes nobody claims. Kept as Raw when there are any.
    fn rest(&mut self, bytes: &[u8]) {
        if !bytes.is_empty() {
            self.layers.push(DecodedLayer::raw(bytes));
        }
    }

    fn set_endpoints(&mut self, source: String, destination: String) {
        self.source = Some(source);
        self.destination = Some(destination);
    }
}

/// Turns raw frames into [`PacketRecord`]s. Never fails: whatever cannot be
/// decoded ends up in a trailing `Raw` layer.
pub struct FrameDecoder {
    link_type: u32,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(LINKTYPE_ETHERNET)
    }
}

impl FrameDecoder {
    pub fn new(link_type: u32) -> Self {
        Self { link_type }
    }

    pub fn decode(&self, frame: &Frame, frame_number: u64) -> PacketRecord {
        let data = frame.data.as_slice();
        let mut d = Dissection::default();

        match self.link_type {
            LINKTYPE_ETHERNET => self.dissect_ethernet(data, &mut d),
            LINKTYPE_RAW | LINKTYPE_IPV4 | LINKTYPE_IPV6 => self.dissect_raw_ip(data, &mut d),
            other => d.fail(
                data,
                DecodeError::invalid("link", format!("unsupported link type {}", other)),
            ),
        }

        let protocol = Protocol::classify(&d.layers);
        let summary = Self::summarize(protocol, &d);
        if let Some(ref err) = d.error {
            log::debug!("Frame {}: {}", frame_number, err);
        }

        PacketRecord {
            frame_number,
            ts_sec: frame.ts_sec,
            ts_usec: frame.ts_usec,
            source: d.source.unwrap_or_else(|| "N/A".to_string()),
            destination: d.destination.unwrap_or_else(|| "N/A".to_string()),
            protocol,
            length: data.len(),
            original_length: frame.original_length,
            summary,
            layers: d.layers,
            payload: d.payload,
            decode_error: d.error.map(|e| e.to_string()),
        }
    }

    fn dissect_ethernet(&self, data: &[u8], d: &mut Dissection) {
        let Some(eth) = EthernetPacket::new(data) else {
            return d.fail(data, DecodeError::truncated("Ethernet", ETHERNET_HEADER_LEN, data.len()));
        };

        let ethertype = eth.get_ethertype();
        d.set_endpoints(eth.get_source().to_string(), eth.get_destination().to_string());
        d.push(
            DecodedLayer::new(LayerKind::Ethernet)
                .with("dst", eth.get_destination())
                .with("src", eth.get_source())
                .with("type", format!("0x{:04x}", ethertype.0)),
        );

        let payload = &data[ETHERNET_HEADER_LEN..];
        match ethertype {
            EtherTypes::Arp => self.dissect_arp(payload, d),
            EtherTypes::Ipv4 => self.dissect_ipv4(payload, d),
            EtherTypes::Ipv6 => self.dissect_ipv6(payload, d),
            _ => d.rest(payload),
        }
    }

    fn dissect_raw_ip(&self, data: &[u8], d: &mut Dissection) {
        match data.first().map(|b| b >> 4) {
            Some(4) => self.dissect_ipv4(data, d),
            Some(6) => self.dissect_ipv6(data, d),
            Some(v) => d.fail(data, DecodeError::invalid("IP", format!("unknown IP version {}", v))),
            None => d.fail(data, DecodeError::truncated("IP", 1, 0)),
        }
    }

    fn dissect_arp(&self, data: &[u8], d: &mut Dissection) {
        let Some(arp) = ArpPacket::new(data) else {
            return d.fail(data, DecodeError::truncated("ARP", ARP_LEN, data.len()));
        };
        if arp.get_hw_addr_len() != 6 || arp.get_proto_addr_len() != 4 {
            return d.fail(
                data,
                DecodeError::invalid(
                    "ARP",
                    format!(
                        "unsupported address sizes hw={} proto={}",
                        arp.get_hw_addr_len(),
                        arp.get_proto_addr_len()
                    ),
                ),
            );
        }

        let operation = arp.get_operation();
        let is_request = operation == ArpOperations::Request;
        if is_request {
            d.set_endpoints(
                arp.get_sender_proto_addr().to_string(),
                arp.get_target_proto_addr().to_string(),
            );
        } else {
            d.set_endpoints(
                arp.get_sender_hw_addr().to_string(),
                arp.get_target_hw_addr().to_string(),
            );
        }
        d.arp_is_request = Some(is_request);

        d.push(
            DecodedLayer::new(LayerKind::Arp)
                .with("hwtype", format!("0x{:04x}", arp.get_hardware_type().0))
                .with("ptype", format!("0x{:04x}", arp.get_protocol_type().0))
                .with("hwlen", arp.get_hw_addr_len())
                .with("plen", arp.get_proto_addr_len())
                .with("op", operation.0)
                .with("hwsrc", arp.get_sender_hw_addr())
                .with("psrc", arp.get_sender_proto_addr())
                .with("hwdst", arp.get_target_hw_addr())
                .with("pdst", arp.get_target_proto_addr()),
        );
        // Anything past the fixed ARP body is Ethernet padding.
    }

    fn dissect_ipv4(&self, data: &[u8], d: &mut Dissection) {
        let Some(ip) = Ipv4Packet::new(data) else {
            return d.fail(data, DecodeError::truncated("IPv4", IPV4_MIN_HEADER_LEN, data.len()));
        };
        if ip.get_version() != 4 {
            return d.fail(data, DecodeError::invalid("IPv4", format!("version {}", ip.get_version())));
        }
        let header_len = ip.get_header_length() as usize * 4;
        if header_len < IPV4_MIN_HEADER_LEN {
            return d.fail(data, DecodeError::invalid("IPv4", format!("header length {}", header_len)));
        }
        if header_len > data.len() {
            return d.fail(data, DecodeError::truncated("IPv4", header_len, data.len()));
        }
        // Zero shows up with segmentation offload: the length runs to the
        // end of the captured data.
        let total_len = match ip.get_total_length() as usize {
            0 => data.len(),
            n => n,
        };
        if total_len < header_len {
            return d.fail(data, DecodeError::invalid("IPv4", format!("total length {}", total_len)));
        }

        let protocol = ip.get_next_level_protocol();
        let flags = ip.get_flags();
        let fragment_offset = ip.get_fragment_offset();
        d.set_endpoints(ip.get_source().to_string(), ip.get_destination().to_string());
        d.push(
            DecodedLayer::new(LayerKind::IPv4)
                .with("version", 4)
                .with("ihl", ip.get_header_length())
                .with("tos", format!("0x{:02x}", (ip.get_dscp() << 2) | ip.get_ecn()))
                .with("len", total_len)
                .with("id", ip.get_identification())
                .with("flags", ipv4_flags(flags))
                .with("frag", fragment_offset)
                .with("ttl", ip.get_ttl())
                .with("proto", protocol.0)
                .with("chksum", format!("0x{:04x}", ip.get_checksum()))
                .with("src", ip.get_source())
                .with("dst", ip.get_destination()),
        );

        // Bytes past total_length are link padding; a short capture just
        // ends the payload early.
        let end = total_len.min(data.len());
        let payload = &data[header_len..end];
        if fragment_offset != 0 {
            return d.rest(payload);
        }
        self.dissect_transport(protocol, payload, d);
    }

    fn dissect_ipv6(&self, data: &[u8], d: &mut Dissection) {
        let Some(ip) = Ipv6Packet::new(data) else {
            return d.fail(data, DecodeError::truncated("IPv6", IPV6_HEADER_LEN, data.len()));
        };
        if ip.get_version() != 6 {
            return d.fail(data, DecodeError::invalid("IPv6", format!("version {}", ip.get_version())));
        }

        let payload_len = ip.get_payload_length() as usize;
        let next_header = ip.get_next_header();
        d.set_endpoints(ip.get_source().to_string(), ip.get_destination().to_string());
        d.push(
            DecodedLayer::new(LayerKind::IPv6)
                .with("version", 6)
                .with("tc", ip.get_traffic_class())
                .with("fl", ip.get_flow_label())
                .with("plen", payload_len)
                .with("nh", next_header.0)
                .with("hlim", ip.get_hop_limit())
                .with("src", ip.get_source())
                .with("dst", ip.get_destination()),
        );

        let end = if payload_len == 0 {
            data.len()
        } else {
            (IPV6_HEADER_LEN + payload_len).min(data.len())
        };
        self.dissect_transport(next_header, &data[IPV6_HEADER_LEN..end], d);
    }

    fn dissect_transport(&self, protocol: IpNextHeaderProtocol, payload: &[u8], d: &mut Dissection) {
        match protocol {
            IpNextHeaderProtocols::Tcp => self.dissect_tcp(payload, d),
            IpNextHeaderProtocols::Udp => self.dissect_udp(payload, d),
            IpNextHeaderProtocols::Icmp => self.dissect_icmp(payload, 4, d),
            IpNextHeaderProtocols::Icmpv6 => self.dissect_icmp(payload, 6, d),
            _ => d.rest(payload),
        }
    }

    fn dissect_tcp(&self, data: &[u8], d: &mut Dissection) {
        let Some(tcp) = TcpPacket::new(data) else {
            return d.fail(data, DecodeError::truncated("TCP", TCP_MIN_HEADER_LEN, data.len()));
        };
        let header_len = tcp.get_data_offset() as usize * 4;
        if header_len < TCP_MIN_HEADER_LEN {
            return d.fail(data, DecodeError::invalid("TCP", format!("data offset {}", header_len)));
        }
        if header_len > data.len() {
            return d.fail(data, DecodeError::truncated("TCP", header_len, data.len()));
        }

        // Read the flag byte directly so the CWR/ECE bits line up the same
        // way regardless of how pnet splits the reserved bits.
        let flags = tcp_flags(data[13]);
        let sport = tcp.get_source();
        let dport = tcp.get_destination();
        d.sport = Some(sport);
        d.dport = Some(dport);
        d.push(
            DecodedLayer::new(LayerKind::Tcp)
                .with("sport", sport)
                .with("dport", dport)
                .with("seq", tcp.get_sequence())
                .with("ack", tcp.get_acknowledgement())
                .with("dataofs", tcp.get_data_offset())
                .with("flags", &flags)
                .with("window", tcp.get_window())
                .with("chksum", format!("0x{:04x}", tcp.get_checksum()))
                .with("urgptr", tcp.get_urgent_ptr())
                .with("options", hex::encode(&data[TCP_MIN_HEADER_LEN..header_len])),
        );
        d.tcp_flags = Some(flags);

        let payload = &data[header_len..];
        if payload.is_empty() {
            return;
        }
        d.payload = Some(payload.to_vec());

        match http::parse_request(payload) {
            Some(request) => {
                let mut layer = DecodedLayer::new(LayerKind::Http)
                    .with("method", &request.method)
                    .with("path", &request.uri);
                if let Some(ref version) = request.version {
                    layer = layer.with("version", version);
                }
                if let Some(ref host) = request.host {
                    layer = layer.with("host", host);
                }
                d.push(layer);
                d.http = Some(request);
            }
            None => d.rest(payload),
        }
    }

    fn dissect_udp(&self, data: &[u8], d: &mut Dissection) {
        let Some(udp) = UdpPacket::new(data) else {
            return d.fail(data, DecodeError::truncated("UDP", UDP_HEADER_LEN, data.len()));
        };

        let sport = udp.get_source();
        let dport = udp.get_destination();
        let declared = udp.get_length() as usize;
        d.sport = Some(sport);
        d.dport = Some(dport);
        d.push(
            DecodedLayer::new(LayerKind::Udp)
                .with("sport", sport)
                .with("dport", dport)
                .with("len", declared)
                .with("chksum", format!("0x{:04x}", udp.get_checksum())),
        );

        let end = if declared >= UDP_HEADER_LEN {
            declared.min(data.len())
        } else {
            data.len()
        };
        let payload = &data[UDP_HEADER_LEN..end];
        if payload.is_empty() {
            return;
        }
        d.payload = Some(payload.to_vec());

        if sport != DNS_PORT && dport != DNS_PORT {
            return d.rest(payload);
        }
        match dns::parse(payload) {
            Ok(message) => {
                let mut layer = DecodedLayer::new(LayerKind::Dns)
                    .with("id", message.id)
                    .with("qr", if message.is_response { 1 } else { 0 })
                    .with("opcode", message.opcode)
                    .with("rcode", message.rcode)
                    .with("qdcount", message.question_count)
                    .with("ancount", message.answer_count)
                    .with("nscount", message.authority_count)
                    .with("arcount", message.additional_count);
                if let Some(question) = message.questions.first() {
                    layer = layer
                        .with("qname", &question.name)
                        .with("qtype", dns::record_type_name(question.qtype));
                }
                if !message.answers.is_empty() {
                    let answers: Vec<String> = message
                        .answers
                        .iter()
                        .map(|a| format!("{} {} {}", a.name, dns::record_type_name(a.rtype), a.data))
                        .collect();
                    layer = layer.with("answers", answers.join("; "));
                }
                d.push(layer);
                d.dns = Some(message);
            }
            Err(e) => d.fail(payload, e),
        }
    }

    fn dissect_icmp(&self, data: &[u8], version: u8, d: &mut Dissection) {
        let Some(icmp) = IcmpPacket::new(data) else {
            return d.fail(data, DecodeError::truncated("ICMP", 4, data.len()));
        };

        let icmp_type = icmp.get_icmp_type().0;
        let icmp_code = icmp.get_icmp_code().0;
        let mut layer = DecodedLayer::new(LayerKind::Icmp)
            .with("version", version)
            .with("type", icmp_type)
            .with("code", icmp_code)
            .with("chksum", format!("0x{:04x}", icmp.get_checksum()));

        let is_echo = match version {
            4 => icmp_type == 0 || icmp_type == 8,
            _ => icmp_type == 128 || icmp_type == 129,
        };
        if is_echo && data.len() >= ICMP_HEADER_LEN {
            layer = layer
                .with("id", u16::from_be_bytes([data[4], data[5]]))
                .with("seq", u16::from_be_bytes([data[6], data[7]]));
        }
        d.push(layer);
        d.icmp = Some((icmp_type, icmp_code));

        if data.len() > ICMP_HEADER_LEN {
            d.rest(&data[ICMP_HEADER_LEN..]);
        }
    }

    fn summarize(protocol: Protocol, d: &Dissection) -> String {
        let src = d.source.as_deref().unwrap_or("N/A");
        let dst = d.destination.as_deref().unwrap_or("N/A");

        let templated = match protocol {
            Protocol::Http => d.http.as_ref().map(|r| r.request_line.clone()),
            Protocol::Dns => d.dns.as_ref().map(|m| match (m.is_response, m.first_question()) {
                (false, Some(name)) => format!("DNS Query {}", name),
                (true, Some(name)) => format!("DNS Response for {}", name),
                (false, None) => "DNS Query".to_string(),
                (true, None) => "DNS Response".to_string(),
            }),
            Protocol::Icmp => d
                .icmp
                .map(|(t, c)| format!("ICMP {} -> {} Type={} Code={}", src, dst, t, c)),
            Protocol::Tcp => match (d.sport, d.dport, d.tcp_flags.as_ref()) {
                (Some(sp), Some(dp), Some(flags)) => {
                    Some(format!("TCP {}:{} -> {}:{} Flags={}", src, sp, dst, dp, flags))
                }
                _ => None,
            },
            Protocol::Udp => match (d.sport, d.dport) {
                (Some(sp), Some(dp)) => Some(format!("UDP {}:{} -> {}:{}", src, sp, dst, dp)),
                _ => None,
            },
            Protocol::Arp => d.arp_is_request.and_then(|is_request| {
                let arp = d.layers.iter().find(|l| l.name == LayerKind::Arp)?;
                let psrc = arp.get("psrc")?;
                if is_request {
                    Some(format!("ARP Request who-has {} tell {}", arp.get("pdst")?, psrc))
                } else {
                    Some(format!("ARP Reply {} is-at {}", psrc, arp.get("hwsrc")?))
                }
            }),
            Protocol::Other => None,
        };

        templated.unwrap_or_else(|| {
            let names: Vec<&str> = d.layers.iter().map(|l| l.name.as_str()).collect();
            if names.is_empty() {
                "Empty frame".to_string()
            } else {
                names.join(" / ")
            }
        })
    }
}

/// TCP flags as letters in `FSRPAUEC` order, e.g. `S`, `SA`, `PA`.
fn tcp_flags(flags: u8) -> String {
    const LETTERS: [(u8, char); 8] = [
        (0x01, 'F'),
        (0x02, 'S'),
        (0x04, 'R'),
        (0x08, 'P'),
        (0x10, 'A'),
        (0x20, 'U'),
        (0x40, 'E'),
        (0x80, 'C'),
    ];

    LETTERS
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, letter)| *letter)
        .collect()
}

fn ipv4_flags(flags: u8) -> String {
    let mut parts = Vec::new();
    if flags & 0b100 != 0 { parts.push("RF"); }
    if flags & 0b010 != 0 { parts.push("DF"); }
    if flags & 0b001 != 0 { parts.push("MF"); }
    parts.join("+")
}
