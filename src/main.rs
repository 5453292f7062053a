//! syncproxy demo
//!
//! Runs a core hub and a client hub in one process, joined by an in-memory
//! link, and walks a mixer object through the init handshake and a few
//! request/receive rounds.
//!
//! ## Usage
//!
//! ```bash
//! # Default run
//! syncproxy-demo
//!
//! # More rounds, debug output, JSONL logs under ./logs
//! syncproxy-demo --rounds 5 -vv --log-dir ./logs
//!
//! # Hub settings from a file
//! syncproxy-demo --config hub.json
//! ```

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use syncproxy_core::logging::LoggingBuilder;
use syncproxy_core::{
    drive, ClassDescriptor, EventEmitter, EventSource, HubConfig, MemoryLink, MethodDecl,
    PropertyMap, ProxyMode, Reflect, SyncCore, SyncHub, SyncableObject, TypeTag, Value,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// syncproxy - object synchronization demo
#[derive(Parser, Debug)]
#[command(name = "syncproxy-demo")]
#[command(version = "0.1.0")]
#[command(about = "Core and client hubs synchronizing a mixer in memory")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Hub settings as JSON
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write JSONL logs under this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Volume the core starts with
    #[arg(long, default_value_t = 40)]
    volume: i64,

    /// Number of volume requests the client sends
    #[arg(short, long, default_value_t = 3)]
    rounds: u32,
}

// ============================================================================
// Demo objects
// ============================================================================

struct Mixer {
    core: SyncCore,
    volume: i64,
    muted: bool,
}

impl Mixer {
    fn new(name: &str, volume: i64) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            core: SyncCore::new(name),
            volume,
            muted: false,
        }))
    }
}

impl Reflect for Mixer {
    fn describe(&self) -> ClassDescriptor {
        ClassDescriptor::new("Mixer")
            .method("setVolume", &[TypeTag::Int], |m: &mut Mixer, args| {
                m.volume = args[0].as_i64().unwrap_or_default();
                Ok(None)
            })
            .method("setMuted", &[TypeTag::Bool], |m: &mut Mixer, args| {
                m.muted = args[0].as_bool().unwrap_or_default();
                Ok(None)
            })
            .method_with(
                MethodDecl::new("requestSetVolume", &[TypeTag::Int], |m: &mut Mixer, args| {
                    let volume = args[0].as_i64().unwrap_or_default();
                    if !(0..=100).contains(&volume) {
                        return Ok(Some(Value::Bool(false)));
                    }
                    m.volume = volume;
                    m.core.sync("setVolume", vec![Value::Int(volume)]);
                    m.core.emit("volumeChanged", vec![Value::Int(volume)]);
                    Ok(Some(Value::Bool(true)))
                })
                .returns(TypeTag::Bool),
            )
            .method(
                "receiveSetVolume",
                &[TypeTag::Int, TypeTag::Bool],
                |m: &mut Mixer, args| {
                    let accepted = args[1].as_bool().unwrap_or_default();
                    info!(object = %m.core.object_name(), volume = ?args[0], accepted, "Volume request answered");
                    Ok(None)
                },
            )
            .event("volumeChanged", &[TypeTag::Int])
    }
}

impl EventSource for Mixer {
    fn emitter(&self) -> &EventEmitter {
        self.core.emitter()
    }
}

impl SyncableObject for Mixer {
    fn core(&self) -> &SyncCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SyncCore {
        &mut self.core
    }

    fn to_property_map(&self) -> PropertyMap {
        PropertyMap::from([
            ("volume".to_string(), Value::Int(self.volume)),
            ("muted".to_string(), Value::Bool(self.muted)),
        ])
    }

    fn apply_property_map(&mut self, properties: &PropertyMap) {
        if let Some(volume) = properties.get("volume").and_then(Value::as_i64) {
            self.volume = volume;
        }
        if let Some(muted) = properties.get("muted").and_then(Value::as_bool) {
            self.muted = muted;
        }
    }
}

/// Client-side listener for relayed mixer events
#[derive(Default)]
struct VolumeMeter {
    readings: Vec<i64>,
}

impl Reflect for VolumeMeter {
    fn describe(&self) -> ClassDescriptor {
        ClassDescriptor::new("VolumeMeter").method(
            "onVolumeChanged",
            &[TypeTag::Int],
            |meter: &mut VolumeMeter, args| {
                meter.readings.push(args[0].as_i64().unwrap_or_default());
                Ok(None)
            },
        )
    }
}

// ============================================================================
// Setup
// ============================================================================

fn setup_logging(verbosity: u8, log_dir: Option<PathBuf>) -> Result<()> {
    let mut builder = LoggingBuilder::new("demo");
    if std::env::var_os("RUST_LOG").is_none() {
        let filter = match verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        builder = builder.with_filter(filter);
    }
    if let Some(dir) = log_dir {
        builder = builder.with_logs_dir(dir);
    }
    builder.init().context("failed to set up logging")
}

fn load_config(path: Option<&PathBuf>) -> Result<HubConfig> {
    match path {
        Some(path) => HubConfig::from_json_file(path)
            .with_context(|| format!("failed to load hub config from {}", path.display())),
        None => Ok(HubConfig::default()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.log_dir.clone())?;
    let config = load_config(cli.config.as_ref())?;

    let mut core_hub = SyncHub::with_config(HubConfig {
        mode: ProxyMode::Server,
        ..config.clone()
    });
    let mut client_hub = SyncHub::with_config(HubConfig {
        mode: ProxyMode::Client,
        ..config
    });

    let (core_end, client_end) = MemoryLink::pair();
    let to_client = core_hub.add_peer(core_end.link.clone())?;
    let to_core = client_hub.add_peer(client_end.link.clone())?;

    let core_mixer = Mixer::new("main", cli.volume);
    core_hub.synchronize(&core_mixer)?;
    core_hub.attach_event(&*core_mixer.borrow(), "volumeChanged", None)?;

    let client_mixer = Mixer::new("main", 0);
    let meter = Rc::new(RefCell::new(VolumeMeter::default()));
    client_hub.attach_receiver("volumeChanged(int)", &meter, "onVolumeChanged")?;
    client_hub.synchronize(&client_mixer)?;

    let cancel = CancellationToken::new();
    let script = {
        let cancel = cancel.clone();
        let client_mixer = Rc::clone(&client_mixer);
        let start = cli.volume;
        let rounds = cli.rounds;
        async move {
            let ready = tokio::time::timeout(Duration::from_secs(1), async {
                while !client_mixer.borrow().is_initialized() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await;
            if ready.is_err() {
                cancel.cancel();
                return false;
            }
            info!(volume = client_mixer.borrow().volume, "Client mixer initialized");

            for round in 1..=rounds {
                let volume = start + i64::from(round) * 10;
                client_mixer
                    .borrow()
                    .core
                    .request("requestSetVolume", vec![Value::Int(volume)]);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            cancel.cancel();
            true
        }
    };

    let (_, _, initialized) = tokio::join!(
        drive(&mut core_hub, to_client, core_end.frames, cancel.clone()),
        drive(&mut client_hub, to_core, client_end.frames, cancel.clone()),
        script,
    );
    if !initialized {
        anyhow::bail!("client mixer was never initialized");
    }

    println!("core volume:    {}", core_mixer.borrow().volume);
    println!("client volume:  {}", client_mixer.borrow().volume);
    println!("meter readings: {:?}", meter.borrow().readings);
    println!();
    println!("{}", core_hub.stats());
    println!("{}", client_hub.stats());
    Ok(())
}
