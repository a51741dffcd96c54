//! Simulate command - stream textures to one synthetic client.
//!
//! Requests every texture in an asset directory (or a generated set), drives
//! a client session until everything is delivered, Ctrl+C is pressed, or the
//! time limit passes, then prints the session counters.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use texstream::source::AssetSource;
use texstream::{
    AgentId, ChannelSink, ClientSession, DirectoryAssetSource, ImageManager, ImagePacket,
    LayeredDecoder, MemoryAssetSource, StreamSnapshot, TextureId, TextureRequest,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::common::load_config;
use crate::error::CliError;

/// How often the driver checks whether every transfer finished.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Arguments for the simulate command.
pub struct SimulateArgs {
    pub config: Option<PathBuf>,
    pub assets: Option<PathBuf>,
    pub textures: usize,
    pub size: usize,
    pub layers: usize,
    pub packets_per_tick: Option<u32>,
    pub discard_level: i8,
    pub time_limit: Option<u64>,
    pub json: bool,
}

/// Result of one simulated session.
struct SimulationReport {
    agent: AgentId,
    requested: usize,
    delivered: HashMap<TextureId, u32>,
    not_found: usize,
    snapshot: StreamSnapshot,
}

/// Run the simulate command.
pub fn run(args: SimulateArgs) -> Result<(), CliError> {
    let (config, _) = load_config(args.config.as_deref())?;
    let mut streaming = config.streaming;
    if let Some(packets) = args.packets_per_tick {
        streaming.packets_per_tick = packets;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Runtime(format!("Failed to start runtime: {}", e)))?;

    let (assets, textures) = match &args.assets {
        Some(dir) => {
            let textures = list_assets(dir)?;
            let source: Arc<dyn AssetSource> = Arc::new(DirectoryAssetSource::new(dir.clone()));
            (source, textures)
        }
        None => {
            let (source, textures) = generate_assets(args.textures, args.size);
            let source: Arc<dyn AssetSource> = Arc::new(source);
            (source, textures)
        }
    };

    if textures.is_empty() {
        return Err(CliError::Config("No textures to stream".to_string()));
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Received shutdown signal, stopping session...");
        signal.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let agent = AgentId::random();
    let report = runtime.block_on(async move {
        let (sink, mut packets) = ChannelSink::new();
        let manager = Arc::new(ImageManager::new(
            agent,
            streaming,
            assets,
            Arc::new(LayeredDecoder::new(args.layers)),
            Arc::new(sink),
            tokio::runtime::Handle::current(),
        ));

        let collector = tokio::spawn(async move {
            let mut delivered: HashMap<TextureId, u32> = HashMap::new();
            let mut not_found = 0;
            while let Some((_, packet)) = packets.recv().await {
                match packet {
                    ImagePacket::NotFound { texture } => {
                        debug!(texture = %texture, "Texture not found");
                        not_found += 1;
                    }
                    packet => *delivered.entry(packet.texture()).or_default() += 1,
                }
            }
            (delivered, not_found)
        });

        for (i, texture) in textures.iter().enumerate() {
            // Earlier textures are more urgent.
            let priority = (textures.len() - i) as f32;
            manager.submit(
                &TextureRequest::new(*texture, priority)
                    .with_discard_level(args.discard_level)
                    .with_sequence(1),
            );
        }
        info!(agent = %agent, textures = textures.len(), "Requests submitted");

        let session = tokio::spawn(ClientSession::new(manager.clone()).run(shutdown.clone()));

        let deadline = args.time_limit.map(Duration::from_secs);
        let started = tokio::time::Instant::now();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {
                    let timed_out = deadline.is_some_and(|limit| started.elapsed() >= limit);
                    if manager.count() == 0 || timed_out {
                        shutdown.cancel();
                        break;
                    }
                }
            }
        }

        let snapshot = session
            .await
            .map_err(|e| CliError::Runtime(format!("Session task failed: {}", e)))?;
        drop(manager);

        let (delivered, not_found) = collector
            .await
            .map_err(|e| CliError::Runtime(format!("Collector task failed: {}", e)))?;

        Ok::<_, CliError>(SimulationReport {
            agent,
            requested: textures.len(),
            delivered,
            not_found,
            snapshot,
        })
    })?;

    if args.json {
        print_json(&report)
    } else {
        print_report(&report);
        Ok(())
    }
}

/// Texture ids of every `<uuid>.j2c` file in `dir`, sorted.
fn list_assets(dir: &Path) -> Result<Vec<TextureId>, CliError> {
    let mut textures = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("j2c") {
            continue;
        }
        if let Some(id) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse().ok())
        {
            textures.push(id);
        }
    }
    textures.sort();
    Ok(textures)
}

/// `count` random textures of `size` bytes held in memory.
fn generate_assets(count: usize, size: usize) -> (MemoryAssetSource, Vec<TextureId>) {
    let source = MemoryAssetSource::new();
    let textures: Vec<TextureId> = (0..count).map(|_| TextureId::random()).collect();
    for (i, texture) in textures.iter().enumerate() {
        source.insert(*texture, Bytes::from(vec![(i % 251) as u8; size]));
    }
    (source, textures)
}

fn print_report(report: &SimulationReport) {
    let complete = report.snapshot.transfers_completed;
    println!("texstream simulation v{}", texstream::VERSION);
    println!("==========================");
    println!();
    println!("Agent:     {}", report.agent);
    println!(
        "Textures:  {} requested, {} complete, {} not found",
        report.requested, complete, report.not_found
    );
    println!(
        "Delivered: {} packets to {} textures",
        report.delivered.values().sum::<u32>(),
        report.delivered.len()
    );
    println!();
    println!("{}", report.snapshot);
}

fn print_json(report: &SimulationReport) -> Result<(), CliError> {
    let delivered: HashMap<String, u32> = report
        .delivered
        .iter()
        .map(|(texture, packets)| (texture.to_string(), *packets))
        .collect();
    let value = serde_json::json!({
        "agent": report.agent.to_string(),
        "requested": report.requested,
        "not_found": report.not_found,
        "delivered": delivered,
        "metrics": report.snapshot,
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
