use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::events::{AnalysisEvent, EventSink};
use crate::utils::{generate_session_id, is_public_addr};
use super::capture::Frame;
use super::decoder::{FrameDecoder, LayerKind, PacketRecord, Protocol};
use super::geo::GeoLocation;
use super::hexdump;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    #[serde(rename = "Credential exposure")]
    CredentialExposure,
    #[serde(rename = "Port Scan")]
    PortScan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
    /// Frame that triggered the alert. Port scans are judged over the whole
    /// capture and carry none.
    pub frame: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopTalker {
    pub ip: String,
    pub bytes: u64,
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineBucket {
    pub time: i64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub source: String,
    pub target: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub frame: u64,
    pub method: String,
    pub host: String,
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketDetail {
    #[serde(flatten)]
    pub record: PacketRecord,
    pub hex_dump: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub session_id: String,
    pub generated_at: DateTime<Utc>,
    pub total_packets: usize,
    pub unique_ip_pairs: usize,
    pub protocol_stats: BTreeMap<String, usize>,
    pub timeline: Vec<TimelineBucket>,
    pub conversations: Vec<Conversation>,
    pub top_talkers: Vec<TopTalker>,
    pub alerts: Vec<Alert>,
    pub dns_queries: Vec<String>,
    pub http_requests: Vec<HttpRequest>,
    pub packets: Vec<PacketDetail>,
    /// Public addresses in order of first appearance.
    pub external_ips: Vec<String>,
    pub geoip: Vec<GeoLocation>,
    /// Records the container reader had to drop.
    pub skipped_frames: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct AnalysisOptions {
    pub port_scan_threshold: usize,
    pub top_talkers_limit: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            port_scan_threshold: 5,
            top_talkers_limit: 10,
        }
    }
}

impl From<&AnalysisConfig> for AnalysisOptions {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            port_scan_threshold: config.port_scan_threshold,
            top_talkers_limit: config.top_talkers_limit,
        }
    }
}

/// Running totals keyed by `K`, remembering first-seen order.
#[derive(Debug)]
struct OrderedCounter<K> {
    index: HashMap<K, usize>,
    entries: Vec<(K, u64)>,
}

impl<K: Eq + Hash + Clone> OrderedCounter<K> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }

    fn add(&mut self, key: K, amount: u64) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 += amount,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, amount));
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn into_entries(self) -> Vec<(K, u64)> {
        self.entries
    }
}

/// One forward pass over decoded packets.
///
/// Credential alerts are raised (and published) as each packet arrives;
/// port scans need the final counts and only appear from [`finish`].
///
/// [`finish`]: AnalysisAggregator::finish
pub struct AnalysisAggregator {
    options: AnalysisOptions,
    events: EventSink,
    total_packets: usize,
    protocol_stats: BTreeMap<String, usize>,
    timeline: BTreeMap<i64, usize>,
    conversations: OrderedCounter<(String, String)>,
    talkers: OrderedCounter<String>,
    port_hits: OrderedCounter<(String, u16)>,
    alerts: Vec<Alert>,
    dns_queries: Vec<String>,
    seen_queries: HashSet<String>,
    http_requests: Vec<HttpRequest>,
    packets: Vec<PacketDetail>,
    external_ips: Vec<String>,
    seen_external: HashSet<String>,
}

impl AnalysisAggregator {
    pub fn new(options: AnalysisOptions) -> Self {
        Self {
            options,
            events: EventSink::disabled(),
            total_packets: 0,
            protocol_stats: BTreeMap::new(),
            timeline: BTreeMap::new(),
            conversations: OrderedCounter::new(),
            talkers: OrderedCounter::new(),
            port_hits: OrderedCounter::new(),
            alerts: Vec::new(),
            dns_queries: Vec::new(),
            seen_queries: HashSet::new(),
            http_requests: Vec::new(),
            packets: Vec::new(),
            external_ips: Vec::new(),
            seen_external: HashSet::new(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Fold one packet into every view. `raw` is the frame the record was
    /// decoded from, used for the hex dump.
    pub fn push(&mut self, record: PacketRecord, raw: &[u8]) {
        self.total_packets += 1;
        *self
            .protocol_stats
            .entry(record.protocol.as_str().to_string())
            .or_insert(0) += 1;
        *self.timeline.entry(record.ts_sec).or_insert(0) += 1;

        if record.is_ip() {
            self.track_ip_packet(&record);
        }

        if record.protocol == Protocol::Dns {
            self.track_dns(&record);
        }

        if record.protocol == Protocol::Http {
            self.track_http(&record);
        }

        self.packets.push(PacketDetail {
            hex_dump: hexdump::render(raw),
            record,
        });
    }

    fn track_ip_packet(&mut self, record: &PacketRecord) {
        let bytes = record.length as u64;
        let src = &record.source;
        let dst = &record.destination;

        self.conversations.add((src.clone(), dst.clone()), bytes);
        self.talkers.add(src.clone(), bytes);

        for addr in [src, dst] {
            if is_public_addr(addr) && self.seen_external.insert(addr.clone()) {
                self.external_ips.push(addr.clone());
            }
        }

        if !record.has_layer(LayerKind::Tcp) {
            return;
        }
        if let Some(dport) = record.destination_port() {
            self.port_hits.add((src.clone(), dport), 1);
        }
        if let Some(ref payload) = record.payload {
            for message in scan_for_credentials(payload, dst) {
                self.raise(Alert {
                    kind: AlertKind::CredentialExposure,
                    message,
                    frame: Some(record.frame_number),
                });
            }
        }
    }

    fn track_dns(&mut self, record: &PacketRecord) {
        let Some(dns) = record.layer(LayerKind::Dns) else {
            return;
        };
        if dns.get("qr") != Some("0") {
            return;
        }
        if let Some(name) = dns.get("qname") {
            if self.seen_queries.insert(name.to_string()) {
                self.dns_queries.push(name.to_string());
            }
        }
    }

    fn track_http(&mut self, record: &PacketRecord) {
        let Some(http) = record.layer(LayerKind::Http) else {
            return;
        };
        self.http_requests.push(HttpRequest {
            frame: record.frame_number,
            method: http.get("method").unwrap_or_default().to_string(),
            host: http.get("host").unwrap_or_default().to_string(),
            uri: http.get("path").unwrap_or_default().to_string(),
        });
    }

    fn raise(&mut self, alert: Alert) {
        log::warn!("{}", alert.message);
        self.events.emit(AnalysisEvent::Alert(alert.clone()));
        self.alerts.push(alert);
    }

    pub fn finish(mut self) -> AnalysisReport {
        let threshold = self.options.port_scan_threshold as u64;
        let port_hits = std::mem::replace(&mut self.port_hits, OrderedCounter::new());
        for ((ip, port), count) in port_hits.into_entries() {
            if count > threshold {
                self.raise(Alert {
                    kind: AlertKind::PortScan,
                    message: format!("{} scanning port {} ({} hits)", ip, port, count),
                    frame: None,
                });
            }
        }

        let mut talkers = self.talkers.into_entries();
        // Stable sort keeps first-seen order among equal byte counts.
        talkers.sort_by(|a, b| b.1.cmp(&a.1));
        let top_talkers = talkers
            .into_iter()
            .take(self.options.top_talkers_limit)
            .enumerate()
            .map(|(i, (ip, bytes))| TopTalker { ip, bytes, rank: i + 1 })
            .collect();

        let unique_ip_pairs = self.conversations.len();
        let conversations = self
            .conversations
            .into_entries()
            .into_iter()
            .map(|((source, target), bytes)| Conversation { source, target, bytes })
            .collect();

        let timeline = self
            .timeline
            .into_iter()
            .map(|(time, count)| TimelineBucket { time, count })
            .collect();

        let report = AnalysisReport {
            session_id: generate_session_id(),
            generated_at: Utc::now(),
            total_packets: self.total_packets,
            unique_ip_pairs,
            protocol_stats: self.protocol_stats,
            timeline,
            conversations,
            top_talkers,
            alerts: self.alerts,
            dns_queries: self.dns_queries,
            http_requests: self.http_requests,
            packets: self.packets,
            external_ips: self.external_ips,
            geoip: Vec::new(),
            skipped_frames: 0,
        };

        self.events.emit(AnalysisEvent::AnalysisComplete {
            session_id: report.session_id.clone(),
            total_packets: report.total_packets,
            alerts: report.alerts.len(),
        });

        report
    }
}

/// Decode and aggregate a whole frame sequence. Frame numbers start at 1.
pub fn analyze_frames(
    frames: &[Frame],
    link_type: u32,
    options: AnalysisOptions,
    events: EventSink,
) -> AnalysisReport {
    let decoder = FrameDecoder::new(link_type);
    let mut aggregator = AnalysisAggregator::new(options).with_events(events);

    for (i, frame) in frames.iter().enumerate() {
        let record = decoder.decode(frame, i as u64 + 1);
        aggregator.push(record, &frame.data);
    }

    aggregator.finish()
}

/// Cleartext credential heuristics over one TCP payload. Each check is
/// independent, so one payload can produce up to three messages.
pub fn scan_for_credentials(payload: &[u8], destination: &str) -> Vec<String> {
    let text = String::from_utf8_lossy(payload);
    let lower = text.to_lowercase();
    let mut found = Vec::new();

    if text.contains("Authorization: Basic") {
        found.push(format!("Cleartext HTTP Auth found in packet to {}", destination));
    }

    let mentions_password = lower.contains("pass ") || lower.contains("password");
    let mentions_user = lower.contains("user ") || lower.contains("login");
    if mentions_password && mentions_user {
        found.push(format!("Potential Login/Password found for {}", destination));
    }

    if lower.contains("api-key") || lower.contains("apikey") {
        found.push(format!("Potential API Key header found to {}", destination));
    }

    found
}
