//! Entry points used by the CLI (or any other front end): analyze an
//! uploaded capture, run a live capture, hand back a saved one.

use std::sync::Arc;
use std::time::Duration;
use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::events::{AnalysisEvent, EventSink};
use crate::network::analysis::{self, AnalysisOptions, AnalysisReport};
use crate::network::capture::{CaptureReader, CaptureWriter, Frame, LINKTYPE_ETHERNET};
use crate::network::geo::{GeoCache, GeoLocator, GeoProvider, IpApiProvider};
use crate::network::live::{LiveCaptureAdapter, PnetCaptureAdapter};
use crate::utils::{capture_filename, sanitize_filename};
use crate::{NetsiftError, Result};

/// Extra time granted to the capture thread past its own deadline.
const CAPTURE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceEntry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureAction {
    #[default]
    Analyze,
    Save,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveCaptureRequest {
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub packet_count: Option<usize>,
    #[serde(default)]
    pub action: CaptureAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum LiveCaptureOutcome {
    Analyzed(Box<AnalysisReport>),
    Saved { filename: String, count: usize },
}

pub struct AnalysisService<P = IpApiProvider> {
    config: Config,
    geo: Option<GeoLocator<P>>,
    adapter: Arc<dyn LiveCaptureAdapter>,
    events: EventSink,
}

impl AnalysisService<IpApiProvider> {
    /// Service wired to ip-api.com and the local capture devices.
    pub fn new(config: Config, cache: Arc<GeoCache>) -> Result<Self> {
        let geo = if config.analysis.enable_geolocation {
            Some(GeoLocator::new(IpApiProvider::from_config(&config.analysis)?, cache))
        } else {
            None
        };
        Ok(Self::with_parts(config, geo, Arc::new(PnetCaptureAdapter::new())))
    }
}

impl<P: GeoProvider> AnalysisService<P> {
    pub fn with_parts(
        config: Config,
        geo: Option<GeoLocator<P>>,
        adapter: Arc<dyn LiveCaptureAdapter>,
    ) -> Self {
        Self {
            config,
            geo,
            adapter,
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Full report for the bytes of a pcap file.
    pub async fn analyze_capture(&self, bytes: &[u8]) -> Result<AnalysisReport> {
        if bytes.is_empty() {
            return Err(NetsiftError::Validation("No capture data provided".to_string()));
        }

        let parsed = CaptureReader::parse(bytes)?;
        for skipped in &parsed.errors {
            log::warn!(
                "Skipped record {} at offset {}: {}",
                skipped.record,
                skipped.offset,
                skipped.reason
            );
        }
        let short = parsed.frames.iter().filter(|f| f.is_truncated()).count();
        if short > 0 {
            log::debug!("{} frames were captured shorter than their original length", short);
        }
        self.events.emit(AnalysisEvent::FramesParsed {
            frames: parsed.frames.len(),
            skipped: parsed.errors.len(),
        });

        let mut report = self
            .analyze_frames(&parsed.frames, parsed.header.link_type)
            .await;
        report.skipped_frames = parsed.errors.len();
        Ok(report)
    }

    async fn analyze_frames(&self, frames: &[Frame], link_type: u32) -> AnalysisReport {
        let mut report = analysis::analyze_frames(
            frames,
            link_type,
            AnalysisOptions::from(&self.config.analysis),
            self.events.clone(),
        );

        if let Some(ref geo) = self.geo {
            report.geoip = geo
                .enrich(&report.external_ips, self.config.analysis.geo_lookup_limit)
                .await;
        }

        log::info!(
            "Analysis {} complete: {} packets, {} alerts",
            report.session_id,
            report.total_packets,
            report.alerts.len()
        );
        report
    }

    pub fn list_interfaces(&self) -> Result<Vec<InterfaceEntry>> {
        Ok(self
            .adapter
            .list_interfaces()?
            .into_iter()
            .map(|info| InterfaceEntry {
                name: info.display_name,
                value: info.device_handle,
            })
            .collect())
    }

    pub async fn live_capture(&self, request: LiveCaptureRequest) -> Result<LiveCaptureOutcome> {
        let interface = request
            .interface
            .filter(|name| !name.trim().is_empty())
            .or_else(|| self.config.capture.default_interface.clone())
            .ok_or_else(|| {
                NetsiftError::Validation(
                    "No interface selected and no default_interface configured".to_string(),
                )
            })?;

        let max_packets = request.packet_count.unwrap_or(self.config.capture.packet_count);
        if max_packets == 0 {
            return Err(NetsiftError::Validation("packet_count must be at least 1".to_string()));
        }
        let timeout = Duration::from_secs(self.config.capture.timeout_secs);

        self.events.emit(AnalysisEvent::CaptureStarted {
            interface: interface.clone(),
            max_packets,
        });

        let frames = self.run_capture(&interface, max_packets, timeout).await?;

        self.events.emit(AnalysisEvent::CaptureFinished {
            interface: interface.clone(),
            frames: frames.len(),
        });

        match request.action {
            CaptureAction::Analyze => {
                let report = self.analyze_frames(&frames, LINKTYPE_ETHERNET).await;
                Ok(LiveCaptureOutcome::Analyzed(Box::new(report)))
            }
            CaptureAction::Save => {
                let dir = self.config.staging_dir();
                tokio::fs::create_dir_all(&dir).await?;

                let filename = capture_filename(Local::now());
                let bytes = CaptureWriter::write(&frames, LINKTYPE_ETHERNET);
                tokio::fs::write(dir.join(&filename), bytes).await?;

                log::info!("Saved {} packets to {}", frames.len(), filename);
                Ok(LiveCaptureOutcome::Saved {
                    filename,
                    count: frames.len(),
                })
            }
        }
    }

    async fn run_capture(
        &self,
        interface: &str,
        max_packets: usize,
        timeout: Duration,
    ) -> Result<Vec<Frame>> {
        let adapter = self.adapter.clone();
        let name = interface.to_string();
        let handle =
            tokio::task::spawn_blocking(move || adapter.capture(&name, max_packets, timeout));

        match tokio::time::timeout(timeout + CAPTURE_GRACE, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(NetsiftError::CaptureDevice(format!(
                "Capture task on {} failed: {}",
                interface, e
            ))),
            Err(_) => Err(NetsiftError::CaptureDevice(format!(
                "Capture on {} did not finish within {:?}",
                interface,
                timeout + CAPTURE_GRACE
            ))),
        }
    }

    /// Contents of a previously saved capture from the staging directory.
    pub async fn download_capture(&self, filename: &str) -> Result<Vec<u8>> {
        let name = sanitize_filename(filename)
            .ok_or_else(|| NetsiftError::Validation(format!("Invalid filename: {}", filename)))?;
        let path = self.config.staging_dir().join(&name);

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(tokio::fs::read(path).await?),
            Ok(_) => Err(NetsiftError::NotFound(name)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(NetsiftError::NotFound(name)),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::capture::LINKTYPE_ETHERNET;
    use crate::network::fixtures::*;
    use crate::network::geo::tests::CountingProvider;
    use crate::network::live::tests::StaticAdapter;
    use crate::network::live::InterfaceInfo;

    fn staging_config() -> Config {
        let mut config = Config::default();
        config.capture.staging_dir =
            Some(std::env::temp_dir().join(format!("netsift-test-{}", uuid::Uuid::new_v4())));
        config
    }

    fn sample_frames() -> Vec<Frame> {
        vec![
            tcp_frame(1, [10, 0, 0, 5], 40000, [93, 184, 216, 34], 80, 0x02, b""),
            udp_frame(2, [192, 168, 1, 5], 5000, [8, 8, 8, 8], 53, b"\x00"),
        ]
    }

    fn service(config: Config, frames: Vec<Frame>) -> AnalysisService<CountingProvider> {
        let adapter = StaticAdapter {
            interfaces: vec![InterfaceInfo {
                display_name: "eth0 [10.0.0.5]".to_string(),
                device_handle: "eth0".to_string(),
            }],
            frames,
        };
        let geo = GeoLocator::new(CountingProvider::default(), Arc::new(GeoCache::new()));
        AnalysisService::with_parts(config, Some(geo), Arc::new(adapter))
    }

    #[tokio::test]
    async fn test_empty_upload_is_rejected() {
        let svc = service(Config::default(), Vec::new());
        let err = svc.analyze_capture(&[]).await.unwrap_err();
        assert!(matches!(err, NetsiftError::Validation(_)));
    }

    #[tokio::test]
    async fn test_garbage_upload_is_a_format_error() {
        let svc = service(Config::default(), Vec::new());
        let err = svc.analyze_capture(b"definitely not a pcap file").await.unwrap_err();
        assert!(matches!(err, NetsiftError::Format(_)));
    }

    #[tokio::test]
    async fn test_analyze_capture_enriches_public_peers() {
        let svc = service(Config::default(), Vec::new());
        let bytes = CaptureWriter::write(&sample_frames(), LINKTYPE_ETHERNET);

        let report = svc.analyze_capture(&bytes).await.unwrap();
        assert_eq!(report.total_packets, 2);
        assert_eq!(report.skipped_frames, 0);
        assert_eq!(report.external_ips, vec!["93.184.216.34", "8.8.8.8"]);
        assert_eq!(report.geoip.len(), 2);

        let geo = svc.geo.as_ref().unwrap();
        assert_eq!(geo.cache().len(), 2);
    }

    #[tokio::test]
    async fn test_oversize_record_is_counted_as_skipped() {
        let mut frames = sample_frames();
        frames.push(tcp_frame(3, [10, 0, 0, 5], 40001, [10, 0, 0, 6], 8080, 0x18, &[0x41; 100]));
        let mut bytes = CaptureWriter::write(&frames, LINKTYPE_ETHERNET);
        // Shrink the snapshot length below the last record only.
        bytes[16..20].copy_from_slice(&60u32.to_le_bytes());

        let (sink, rx) = EventSink::channel();
        let svc = service(Config::default(), Vec::new()).with_events(sink);
        let report = svc.analyze_capture(&bytes).await.unwrap();

        assert_eq!(report.total_packets, 2);
        assert_eq!(report.skipped_frames, 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            AnalysisEvent::FramesParsed { frames: 2, skipped: 1 }
        );
    }

    #[tokio::test]
    async fn test_geolocation_can_be_disabled() {
        let adapter = StaticAdapter { interfaces: Vec::new(), frames: Vec::new() };
        let svc: AnalysisService<CountingProvider> =
            AnalysisService::with_parts(Config::default(), None, Arc::new(adapter));
        let bytes = CaptureWriter::write(&sample_frames(), LINKTYPE_ETHERNET);

        let report = svc.analyze_capture(&bytes).await.unwrap();
        assert_eq!(report.external_ips.len(), 2);
        assert!(report.geoip.is_empty());
    }

    #[tokio::test]
    async fn test_geo_lookup_limit_applies() {
        let mut config = Config::default();
        config.analysis.geo_lookup_limit = 1;
        let svc = service(config, Vec::new());
        let bytes = CaptureWriter::write(&sample_frames(), LINKTYPE_ETHERNET);

        let report = svc.analyze_capture(&bytes).await.unwrap();
        assert_eq!(report.geoip.len(), 1);
        assert_eq!(svc.geo.as_ref().unwrap().cache().len(), 1);
    }

    #[test]
    fn test_list_interfaces_maps_entries() {
        let svc = service(Config::default(), Vec::new());
        let entries = svc.list_interfaces().unwrap();
        assert_eq!(
            entries,
            vec![InterfaceEntry {
                name: "eth0 [10.0.0.5]".to_string(),
                value: "eth0".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_live_capture_needs_an_interface() {
        let svc = service(Config::default(), sample_frames());
        let err = svc.live_capture(LiveCaptureRequest::default()).await.unwrap_err();
        assert!(matches!(err, NetsiftError::Validation(_)));
    }

    #[tokio::test]
    async fn test_live_capture_falls_back_to_default_interface() {
        let mut config = Config::default();
        config.capture.default_interface = Some("eth0".to_string());
        let (sink, rx) = EventSink::channel();
        let svc = service(config, sample_frames()).with_events(sink);

        let outcome = svc.live_capture(LiveCaptureRequest::default()).await.unwrap();
        match outcome {
            LiveCaptureOutcome::Analyzed(report) => assert_eq!(report.total_packets, 2),
            other => panic!("unexpected outcome {:?}", other),
        }

        let events: Vec<AnalysisEvent> = rx.try_iter().collect();
        assert!(matches!(events[0], AnalysisEvent::CaptureStarted { max_packets: 30, .. }));
        assert!(matches!(events[1], AnalysisEvent::CaptureFinished { frames: 2, .. }));
    }

    #[tokio::test]
    async fn test_live_capture_device_errors_propagate() {
        let svc = service(Config::default(), sample_frames());
        let request = LiveCaptureRequest {
            interface: Some("wlan9".to_string()),
            ..Default::default()
        };
        let err = svc.live_capture(request).await.unwrap_err();
        assert!(matches!(err, NetsiftError::CaptureDevice(_)));

        let silent = service(Config::default(), Vec::new());
        let request = LiveCaptureRequest {
            interface: Some("eth0".to_string()),
            ..Default::default()
        };
        assert!(silent.live_capture(request).await.is_err());
    }

    #[tokio::test]
    async fn test_save_then_download() {
        let config = staging_config();
        let staging = config.staging_dir();
        let svc = service(config, sample_frames());

        let request = LiveCaptureRequest {
            interface: Some("eth0".to_string()),
            packet_count: Some(1),
            action: CaptureAction::Save,
        };
        let (filename, count) = match svc.live_capture(request).await.unwrap() {
            LiveCaptureOutcome::Saved { filename, count } => (filename, count),
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(count, 1);
        assert!(filename.starts_with("capture-") && filename.ends_with(".pcap"));

        let bytes = svc.download_capture(&filename).await.unwrap();
        let parsed = CaptureReader::parse(&bytes).unwrap();
        assert_eq!(parsed.frames, sample_frames()[..1].to_vec());

        // Traversal collapses to the base name inside the staging dir.
        let sneaky = format!("../../{}", filename);
        assert_eq!(svc.download_capture(&sneaky).await.unwrap(), bytes);

        std::fs::remove_dir_all(staging).unwrap();
    }

    #[tokio::test]
    async fn test_download_missing_and_invalid_names() {
        let svc = service(staging_config(), Vec::new());

        let err = svc.download_capture("capture-19700101-000000.pcap").await.unwrap_err();
        assert!(matches!(err, NetsiftError::NotFound(_)));

        let err = svc.download_capture("../..").await.unwrap_err();
        assert!(matches!(err, NetsiftError::Validation(_)));

        // A directory with a valid-looking name is not a capture.
        let staging = svc.config().staging_dir();
        std::fs::create_dir_all(staging.join("saved.pcap")).unwrap();
        let err = svc.download_capture("saved.pcap").await.unwrap_err();
        assert!(matches!(err, NetsiftError::NotFound(_)));
        std::fs::remove_dir_all(staging).unwrap();
    }

    #[test]
    fn test_request_defaults_from_json() {
        let request: LiveCaptureRequest = serde_json::from_str(r#"{"action":"save"}"#).unwrap();
        assert_eq!(request.action, CaptureAction::Save);
        assert!(request.interface.is_none());
        assert!(request.packet_count.is_none());
    }
}
