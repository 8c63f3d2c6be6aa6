use std::path::Path;
use std::sync::Arc;
use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use log::info;

use netsift_core::{
    network::{AnalysisReport, GeoCache},
    service::{CaptureAction, LiveCaptureOutcome, LiveCaptureRequest},
    utils::format_timestamp,
    AnalysisService, Config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = Command::new("netsift")
        .version("0.1.0")
        .author("itsbryanman <dev@piranhaswarm.com>")
        .about("Packet capture decoding and traffic analysis")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config/default.json")
                .global(true)
        )
        .subcommand(
            Command::new("analyze")
                .about("Analyze a pcap file")
                .arg(
                    Arg::new("file")
                        .short('f')
                        .long("file")
                        .value_name("PCAP")
                        .help("Capture file to analyze")
                        .required(true)
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("JSON")
                        .help("Where to write the JSON report")
                )
        )
        .subcommand(
            Command::new("interfaces")
                .about("List capture interfaces")
        )
        .subcommand(
            Command::new("capture")
                .about("Capture live traffic, then analyze or save it")
                .arg(
                    Arg::new("interface")
                        .short('i')
                        .long("interface")
                        .value_name("INTERFACE")
                        .help("Network interface to capture from (defaults to capture.default_interface)")
                )
                .arg(
                    Arg::new("count")
                        .short('n')
                        .long("count")
                        .value_name("PACKETS")
                        .help("Maximum number of packets to capture")
                        .value_parser(clap::value_parser!(usize))
                )
                .arg(
                    Arg::new("save")
                        .long("save")
                        .help("Save the capture to the staging directory instead of analyzing it")
                        .action(ArgAction::SetTrue)
                )
        )
        .subcommand(
            Command::new("download")
                .about("Copy a saved capture out of the staging directory")
                .arg(
                    Arg::new("name")
                        .long("name")
                        .value_name("FILENAME")
                        .help("Name returned by a saved capture")
                        .required(true)
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("PATH")
                        .help("Destination path (defaults to the sanitized name)")
                )
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("config/default.json");
    let config = Config::load(config_path);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.logging.level.as_str()))
        .init();

    let cache = Arc::new(GeoCache::from_config(&config.analysis));
    let service = AnalysisService::new(config, cache)?;

    match matches.subcommand() {
        Some(("analyze", sub_matches)) => run_analyze_mode(&service, sub_matches).await?,
        Some(("interfaces", _)) => run_interfaces_mode(&service)?,
        Some(("capture", sub_matches)) => run_capture_mode(&service, sub_matches).await?,
        Some(("download", sub_matches)) => run_download_mode(&service, sub_matches).await?,
        _ => {
            eprintln!("No subcommand provided. Use --help for usage information.");
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn run_analyze_mode(service: &AnalysisService, args: &ArgMatches) -> anyhow::Result<()> {
    let file = args
        .get_one::<String>("file")
        .context("missing --file")?;
    info!("Analyzing {}", file);

    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file))?;
    let report = service.analyze_capture(&bytes).await?;

    print_report(&report);
    save_report(&report, args.get_one::<String>("output"))?;
    Ok(())
}

fn run_interfaces_mode(service: &AnalysisService) -> anyhow::Result<()> {
    let interfaces = service.list_interfaces()?;
    if interfaces.is_empty() {
        println!("No capture interfaces found");
    }
    for entry in interfaces {
        println!("{:<16} {}", entry.value, entry.name);
    }
    Ok(())
}

async fn run_capture_mode(service: &AnalysisService, args: &ArgMatches) -> anyhow::Result<()> {
    let request = LiveCaptureRequest {
        interface: args.get_one::<String>("interface").cloned(),
        packet_count: args.get_one::<usize>("count").copied(),
        action: if args.get_flag("save") {
            CaptureAction::Save
        } else {
            CaptureAction::Analyze
        },
    };

    match service.live_capture(request).await? {
        LiveCaptureOutcome::Analyzed(report) => {
            print_report(&report);
            save_report(&report, None)?;
        }
        LiveCaptureOutcome::Saved { filename, count } => {
            println!("Saved {} packets as {}", count, filename);
            println!("Retrieve with: netsift download --name {}", filename);
        }
    }
    Ok(())
}

async fn run_download_mode(service: &AnalysisService, args: &ArgMatches) -> anyhow::Result<()> {
    let name = args.get_one::<String>("name").context("missing --name")?;
    let bytes = service.download_capture(name).await?;

    let output = match args.get_one::<String>("output") {
        Some(path) => path.clone(),
        None => netsift_core::utils::sanitize_filename(name).context("invalid filename")?,
    };
    std::fs::write(&output, &bytes).with_context(|| format!("writing {}", output))?;

    info!("Wrote {} bytes to {}", bytes.len(), output);
    Ok(())
}

fn print_report(report: &AnalysisReport) {
    println!("\n=== CAPTURE ANALYSIS ===");
    println!("Session ID: {}", report.session_id);
    println!("Packets: {}", report.total_packets);
    if report.skipped_frames > 0 {
        println!("Skipped records: {}", report.skipped_frames);
    }
    if let (Some(first), Some(last)) = (report.timeline.first(), report.timeline.last()) {
        println!("Span: {} to {}", format_timestamp(first.time), format_timestamp(last.time));
    }
    println!("Unique IP pairs: {}", report.unique_ip_pairs);

    println!("\n--- Protocols ---");
    for (protocol, count) in &report.protocol_stats {
        println!("{}: {}", protocol, count);
    }

    if !report.top_talkers.is_empty() {
        println!("\n--- Top Talkers ---");
        for talker in &report.top_talkers {
            println!("{:>2}. {} ({} bytes)", talker.rank, talker.ip, talker.bytes);
        }
    }

    if !report.dns_queries.is_empty() {
        println!("\n--- DNS Queries ---");
        for name in &report.dns_queries {
            println!("{}", name);
        }
    }

    if !report.http_requests.is_empty() {
        println!("\n--- HTTP Requests ---");
        for request in &report.http_requests {
            println!("#{} {} {}{}", request.frame, request.method, request.host, request.uri);
        }
    }

    if !report.alerts.is_empty() {
        println!("\n--- Alerts ---");
        for alert in &report.alerts {
            match alert.frame {
                Some(frame) => println!("[frame {}] {}", frame, alert.message),
                None => println!("{}", alert.message),
            }
        }
    }

    if !report.geoip.is_empty() {
        println!("\n--- Geolocation ---");
        for location in &report.geoip {
            println!(
                "{}: {}, {} ({:.3}, {:.3})",
                location.ip, location.city, location.country, location.latitude, location.longitude
            );
        }
    }
}

fn save_report(report: &AnalysisReport, output: Option<&String>) -> anyhow::Result<()> {
    let output_file = match output {
        Some(path) => path.clone(),
        None => {
            std::fs::create_dir_all("results").ok();
            format!("results/report_{}.json", report.session_id)
        }
    };
    if let Some(parent) = Path::new(&output_file).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let json_output = serde_json::to_string_pretty(report)?;
    std::fs::write(&output_file, json_output)?;

    info!("Report saved to: {}", output_file);
    Ok(())
}
