// # dnsinkd - DNS/IPAM Reconciler Daemon
//
// This daemon is a THIN integration layer:
// - Reconciliation logic lives in dnsink-core
// - HTTP lives in the adapter crates
// - Configuration is via environment variables ONLY
//
// The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing tracing and the runtime
// 3. Wiring the notification source and the backends
// 4. Running the engine until SIGINT/SIGTERM or the end of the input
//
// ## Configuration
//
// ### General
// - `DNSINK_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
// - `DNSINK_SOURCE`: NDJSON notification file, `-` for stdin (default: -)
// - `DNSINK_BACKEND`: openstack, memory (default: openstack)
// - `DNSINK_EVENT_CHANNEL_CAPACITY`: Engine event buffer (default: 1000)
//
// ### Fixed-address handler (compute instances)
// - `DNSINK_FIXED_ENABLED`: true/false (default: true)
// - `DNSINK_FIXED_EXCHANGE`: Control exchange (default: nova)
// - `DNSINK_FIXED_TOPICS`: Comma-separated topics (default: notifications)
// - `DNSINK_FIXED_ZONE_ID`: Forward zone id (required when enabled)
// - `DNSINK_FIXED_REVERSE_ZONE_ID`: Reverse zone override (optional)
// - `DNSINK_FIXED_ZONE_OWNER_TENANT_ID`: Owner of candidate reverse zones (optional)
// - `DNSINK_FIXED_IPAM_PREFIX_ID`: IPAM prefix of fixed addresses (optional)
//
// ### Floating-address handler (floating IPs)
// - `DNSINK_FLOATING_ENABLED`, `DNSINK_FLOATING_EXCHANGE` (default: neutron),
//   `DNSINK_FLOATING_TOPICS`, `DNSINK_FLOATING_ZONE_ID`,
//   `DNSINK_FLOATING_ZONE_OWNER_TENANT_ID`, `DNSINK_FLOATING_IPAM_PREFIX_ID`
//   (defaults to `DNSINK_NETBOX_FLOATING_PREFIX_ID`)
//
// ### OpenStack (openstack backend)
// - `DNSINK_OS_AUTH_URL`, `DNSINK_OS_USERNAME`, `DNSINK_OS_PASSWORD`,
//   `DNSINK_OS_PROJECT_NAME` (required)
// - `DNSINK_OS_USER_DOMAIN_NAME`, `DNSINK_OS_PROJECT_DOMAIN_NAME` (default: Default)
// - `DNSINK_OS_REGION_NAME`, `DNSINK_DESIGNATE_ENDPOINT`, `DNSINK_NOVA_ENDPOINT`
//
// ### NetBox (optional IPAM)
// - `DNSINK_NETBOX_URL`: Enables IPAM synchronization when set
// - `DNSINK_NETBOX_TOKEN`: API token
// - `DNSINK_NETBOX_FLOATING_PREFIX_ID`: Prefix of the floating address pool
//
// ### Memory backend
// - `DNSINK_MEMORY_ZONES`: Comma-separated `id=name` zones to start with
//
// ## Example
//
// ```bash
// export DNSINK_OS_AUTH_URL=https://keystone.example.org:5000/v3
// export DNSINK_OS_USERNAME=dnsink
// export DNSINK_OS_PASSWORD=...
// export DNSINK_OS_PROJECT_NAME=admin
// export DNSINK_FIXED_ZONE_ID=2d5a0f6e-...
// export DNSINK_FLOATING_ZONE_ID=9b1c7c2a-...
//
// tail -F /var/log/notifications.ndjson | dnsinkd
// ```

use anyhow::{Context, Result};
use dnsink_core::model::Zone;
use dnsink_core::{
    Backends, EngineEvent, FixedHandlerConfig, FloatingHandlerConfig, HandlerRegistry,
    MemoryComputeService, MemoryDnsService, NotificationSource, SinkConfig, SinkEngine,
};
use dnsink_source_ndjson::NdjsonSource;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(feature = "netbox")]
use dnsink_netbox::{NetboxConfig, NetboxIpam};
#[cfg(feature = "openstack")]
use dnsink_openstack::{DesignateDns, KeystoneSession, NovaCompute, OpenStackConfig};

/// Source value selecting standard input
const STDIN_SOURCE: &str = "-";

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum SinkExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<SinkExitCode> for ExitCode {
    fn from(code: SinkExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    log_level: String,
    source: String,
    backend: String,
    sink: SinkConfig,
    memory_zones: Vec<Zone>,
    #[cfg(feature = "openstack")]
    openstack: Option<OpenStackConfig>,
    netbox_url: Option<String>,
    #[cfg(feature = "netbox")]
    netbox: Option<NetboxConfig>,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any variable lookup
    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let opt = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        let mut fixed = FixedHandlerConfig::new(opt("DNSINK_FIXED_ZONE_ID").unwrap_or_default());
        fixed.enabled = flag(&opt, "DNSINK_FIXED_ENABLED", true)?;
        if let Some(exchange) = opt("DNSINK_FIXED_EXCHANGE") {
            fixed.control_exchange = exchange;
        }
        if let Some(topics) = opt("DNSINK_FIXED_TOPICS") {
            fixed.notification_topics = split_list(&topics);
        }
        fixed.reverse_zone_id = opt("DNSINK_FIXED_REVERSE_ZONE_ID");
        fixed.zone_owner_tenant_id = opt("DNSINK_FIXED_ZONE_OWNER_TENANT_ID");
        fixed.ipam_prefix_id = opt("DNSINK_FIXED_IPAM_PREFIX_ID");

        let mut floating =
            FloatingHandlerConfig::new(opt("DNSINK_FLOATING_ZONE_ID").unwrap_or_default());
        floating.enabled = flag(&opt, "DNSINK_FLOATING_ENABLED", true)?;
        if let Some(exchange) = opt("DNSINK_FLOATING_EXCHANGE") {
            floating.control_exchange = exchange;
        }
        if let Some(topics) = opt("DNSINK_FLOATING_TOPICS") {
            floating.notification_topics = split_list(&topics);
        }
        floating.zone_owner_tenant_id = opt("DNSINK_FLOATING_ZONE_OWNER_TENANT_ID");
        floating.ipam_prefix_id = opt("DNSINK_FLOATING_IPAM_PREFIX_ID")
            .or_else(|| opt("DNSINK_NETBOX_FLOATING_PREFIX_ID"));

        let mut sink = SinkConfig {
            fixed,
            floating,
            ..SinkConfig::default()
        };
        if let Some(capacity) = opt("DNSINK_EVENT_CHANNEL_CAPACITY") {
            sink.engine.event_channel_capacity = capacity.trim().parse().with_context(|| {
                format!("DNSINK_EVENT_CHANNEL_CAPACITY must be a number. Got: {}", capacity)
            })?;
        }

        let backend = opt("DNSINK_BACKEND").unwrap_or_else(|| "openstack".to_string());

        let memory_zones = opt("DNSINK_MEMORY_ZONES")
            .map(|zones| {
                split_list(&zones)
                    .into_iter()
                    .map(|entry| match entry.split_once('=') {
                        Some((id, name)) => Ok(Zone::new(id.trim(), name.trim())),
                        None => anyhow::bail!(
                            "DNSINK_MEMORY_ZONES entries must be id=name. Got: {}",
                            entry
                        ),
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        #[cfg(feature = "openstack")]
        let openstack = if backend == "openstack" {
            let required = |key: &str| {
                opt(key).with_context(|| format!("{} is required for the openstack backend", key))
            };
            let mut os = OpenStackConfig::new(
                required("DNSINK_OS_AUTH_URL")?,
                required("DNSINK_OS_USERNAME")?,
                required("DNSINK_OS_PASSWORD")?,
                required("DNSINK_OS_PROJECT_NAME")?,
            );
            if let Some(domain) = opt("DNSINK_OS_USER_DOMAIN_NAME") {
                os.user_domain_name = domain;
            }
            if let Some(domain) = opt("DNSINK_OS_PROJECT_DOMAIN_NAME") {
                os.project_domain_name = domain;
            }
            os.region_name = opt("DNSINK_OS_REGION_NAME");
            os.designate_endpoint = opt("DNSINK_DESIGNATE_ENDPOINT");
            os.nova_endpoint = opt("DNSINK_NOVA_ENDPOINT");
            Some(os)
        } else {
            None
        };

        let netbox_url = opt("DNSINK_NETBOX_URL");

        #[cfg(feature = "netbox")]
        let netbox = match netbox_url {
            Some(ref url) => Some(NetboxConfig {
                url: url.clone(),
                api_token: opt("DNSINK_NETBOX_TOKEN").context(
                    "DNSINK_NETBOX_TOKEN is required when DNSINK_NETBOX_URL is set",
                )?,
                floating_ip_prefix_id: opt("DNSINK_NETBOX_FLOATING_PREFIX_ID"),
            }),
            None => None,
        };

        Ok(Self {
            log_level: opt("DNSINK_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            source: opt("DNSINK_SOURCE").unwrap_or_else(|| STDIN_SOURCE.to_string()),
            backend,
            sink,
            memory_zones,
            #[cfg(feature = "openstack")]
            openstack,
            netbox_url,
            #[cfg(feature = "netbox")]
            netbox,
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "DNSINK_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        match self.backend.as_str() {
            "memory" => {}
            #[cfg(feature = "openstack")]
            "openstack" => {}
            #[cfg(not(feature = "openstack"))]
            "openstack" => anyhow::bail!(
                "DNSINK_BACKEND=openstack requires dnsinkd built with the openstack feature"
            ),
            _ => anyhow::bail!(
                "DNSINK_BACKEND '{}' is not supported. Supported backends: openstack, memory",
                self.backend
            ),
        }

        self.sink.validate()?;

        #[cfg(feature = "openstack")]
        {
            if let Some(ref openstack) = self.openstack {
                openstack.validate()?;
            }
        }

        if self.netbox_url.is_some() && !cfg!(feature = "netbox") {
            anyhow::bail!("DNSINK_NETBOX_URL is set but dnsinkd was built without the netbox feature");
        }
        #[cfg(feature = "netbox")]
        {
            if let Some(ref netbox) = self.netbox {
                netbox.validate()?;
            }
        }

        if self.source != STDIN_SOURCE && !std::path::Path::new(&self.source).is_file() {
            anyhow::bail!("DNSINK_SOURCE does not name a readable file: {}", self.source);
        }

        Ok(())
    }
}

/// Parse a boolean variable, falling back to `default` when unset
fn flag(opt: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    match opt(key).map(|v| v.trim().to_lowercase()).as_deref() {
        None => Ok(default),
        Some("true" | "1" | "yes" | "on") => Ok(true),
        Some("false" | "0" | "no" | "off") => Ok(false),
        Some(other) => anyhow::bail!("{} must be true or false. Got: {}", key, other),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return SinkExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return SinkExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return SinkExitCode::ConfigError.into();
    }

    info!("Starting dnsinkd daemon");
    info!(
        "Configuration loaded: backend={}, source={}, fixed={}, floating={}",
        config.backend, config.source, config.sink.fixed.enabled, config.sink.floating.enabled
    );

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return SinkExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            SinkExitCode::RuntimeError
        } else {
            SinkExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let backends = build_backends(&config).await?;
    let registry = HandlerRegistry::from_config(&config.sink, backends);
    for subscription in registry.subscriptions() {
        info!(
            "Handler {} listening on {} {:?} for {:?}",
            subscription.handler,
            subscription.exchange,
            subscription.topics,
            subscription.event_types
        );
    }

    let source: Box<dyn NotificationSource> = if config.source == STDIN_SOURCE {
        Box::new(NdjsonSource::stdin())
    } else {
        Box::new(NdjsonSource::open(&config.source)?)
    };

    let (engine, mut events) = SinkEngine::new(source, registry, config.sink.engine.clone())?;

    let monitor = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_engine_event(&event);
        }
    });

    info!("Starting reconciliation engine");
    engine.run().await?;

    // Closing the engine closes the event channel
    drop(engine);
    if let Err(e) = monitor.await {
        warn!("Engine event monitor ended abnormally: {}", e);
    }

    info!("Shutting down daemon");
    Ok(())
}

/// Create the backends selected by the configuration
async fn build_backends(config: &Config) -> Result<Backends> {
    #[allow(unused_mut)]
    let mut backends = match config.backend.as_str() {
        #[cfg(feature = "openstack")]
        "openstack" => {
            let credentials = config
                .openstack
                .clone()
                .context("OpenStack credentials are not configured")?;
            let session = Arc::new(KeystoneSession::new(credentials)?);
            info!("Using Designate and Nova via Keystone");
            Backends::new(
                Arc::new(DesignateDns::new(session.clone())),
                Arc::new(NovaCompute::new(session)),
            )
        }
        _ => {
            warn!("Using in-memory backends; nothing outside this process is changed");
            let dns = MemoryDnsService::new();
            for zone in &config.memory_zones {
                debug!("Seeding memory zone {} ({})", zone.name, zone.id);
                dns.add_zone(zone.clone()).await;
            }
            Backends::new(Arc::new(dns), Arc::new(MemoryComputeService::new()))
        }
    };

    #[cfg(feature = "netbox")]
    {
        if let Some(ref netbox) = config.netbox {
            info!("Synchronizing addresses with NetBox at {}", netbox.url);
            backends = backends.with_ipam(Arc::new(NetboxIpam::new(netbox)?));
        }
    }

    Ok(backends)
}

fn log_engine_event(event: &EngineEvent) {
    match event {
        EngineEvent::Started { handlers } => info!("Engine running with {} handler(s)", handlers),
        EngineEvent::NotificationIgnored {
            exchange,
            event_type,
        } => debug!("Ignored {} from {}", event_type, exchange),
        EngineEvent::NotificationRejected { event_type, error } => {
            warn!("Rejected {}: {}", event_type, error)
        }
        EngineEvent::EventProcessed {
            handler,
            event_type,
            applied,
            unchanged,
            skipped,
            failed,
        } => {
            if *failed > 0 {
                warn!(
                    "{} {}: {} step(s) failed ({} applied, {} unchanged, {} skipped)",
                    handler, event_type, failed, applied, unchanged, skipped
                );
            } else {
                debug!(
                    "{} {}: {} applied, {} unchanged, {} skipped",
                    handler, event_type, applied, unchanged, skipped
                );
            }
        }
        EngineEvent::Stopped { reason } => info!("Engine stopped: {}", reason),
    }
}
