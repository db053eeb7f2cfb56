use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use sctid::{CacheManagerConfig, ComponentType, Namespace, Partition, RegistrationConfig};
use sctid_cis::CisConfig;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Runtime configuration for the `sctid` binary.
///
/// Connection settings and cache tuning are shared by every subcommand and
/// may be given as flags or environment variables (a `.env` file in the
/// working directory is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "sctid",
    version,
    about = "Reserve, register and validate SNOMED CT identifiers"
)]
pub struct CliArgs {
    #[command(flatten)]
    pub authority: AuthorityArgs,

    #[command(flatten)]
    pub cache: CacheArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Settings for the remote identifier authority.
#[derive(Args, Debug, Clone)]
pub struct AuthorityArgs {
    /// Root of the authority's API, e.g. `https://cis.example.org/api/`.
    ///
    /// Required by every command that talks to the authority.
    ///
    /// Environment variable: `CIS_API_URL`
    #[arg(long, env = "CIS_API_URL")]
    pub cis_api_url: Option<Url>,

    /// Session token for the authority.
    ///
    /// Environment variable: `CIS_TOKEN`
    #[arg(long, env = "CIS_TOKEN", default_value = "", hide_env_values = true)]
    pub cis_token: String,

    /// Username used to log in when the token is rejected.
    ///
    /// Environment variable: `CIS_USERNAME`
    #[arg(long, env = "CIS_USERNAME")]
    pub cis_username: Option<String>,

    /// Password used to log in when the token is rejected.
    ///
    /// Environment variable: `CIS_PASSWORD`
    #[arg(long, env = "CIS_PASSWORD", hide_env_values = true)]
    pub cis_password: Option<String>,

    /// Hard deadline for one bulk job, in seconds.
    ///
    /// Environment variable: `CIS_TIMEOUT`
    #[arg(long, env = "CIS_TIMEOUT", default_value_t = 120)]
    pub cis_timeout: u64,

    /// How often a running job's status is polled, in milliseconds.
    ///
    /// Environment variable: `CIS_POLL_INTERVAL_MS`
    #[arg(long, env = "CIS_POLL_INTERVAL_MS", default_value_t = 500)]
    pub cis_poll_interval_ms: u64,

    /// Largest number of identifiers sent in one bulk job.
    ///
    /// Environment variable: `CIS_MAX_BULK_SIZE`
    #[arg(long, env = "CIS_MAX_BULK_SIZE", default_value_t = 1000)]
    pub cis_max_bulk_size: usize,

    /// Pause before retrying after a rejected status poll, in seconds.
    ///
    /// Environment variable: `CIS_TRANSIENT_COOLDOWN`
    #[arg(long, env = "CIS_TRANSIENT_COOLDOWN", default_value_t = 5)]
    pub cis_transient_cooldown: u64,

    /// Environment variable: `CIS_MAX_TRANSIENT_RETRIES`
    #[arg(long, env = "CIS_MAX_TRANSIENT_RETRIES", default_value_t = 3)]
    pub cis_max_transient_retries: usize,

    /// Environment variable: `CIS_SOFTWARE_NAME`
    #[arg(long, env = "CIS_SOFTWARE_NAME", default_value_t = String::from("sctid"))]
    pub cis_software_name: String,

    /// Environment variable: `CIS_SCHEME_NAME`
    #[arg(long, env = "CIS_SCHEME_NAME", default_value_t = String::from("SNOMEDID"))]
    pub cis_scheme_name: String,
}

/// Cache tier tuning, used by `reserve-block`.
#[derive(Args, Debug, Clone)]
pub struct CacheArgs {
    /// Base capacity of each concept cache. Description caches hold twice as
    /// many identifiers and relationship caches four times as many.
    ///
    /// Environment variable: `PREFETCH_COUNT`
    #[arg(long, env = "PREFETCH_COUNT", default_value_t = 1000)]
    pub prefetch_count: usize,

    /// Comma separated namespaces that get caches.
    ///
    /// Environment variable: `CACHED_NAMESPACES`
    #[arg(long, env = "CACHED_NAMESPACES", value_delimiter = ',', default_value = "0")]
    pub cached_namespaces: Vec<u32>,

    /// Environment variable: `TOP_UP_LEVEL`
    #[arg(long, env = "TOP_UP_LEVEL", default_value_t = 0.7)]
    pub top_up_level: f64,

    /// Environment variable: `CRITICAL_LEVEL`
    #[arg(long, env = "CRITICAL_LEVEL", default_value_t = 0.1)]
    pub critical_level: f64,

    /// Refill loop period, in seconds.
    ///
    /// Environment variable: `POLLING_INTERVAL`
    #[arg(long, env = "POLLING_INTERVAL", default_value_t = 600)]
    pub polling_interval: u64,

    /// How long a consumer waits for a cache, in milliseconds.
    ///
    /// Environment variable: `LOCK_WAIT_LIMIT_MS`
    #[arg(long, env = "LOCK_WAIT_LIMIT_MS", default_value_t = 5000)]
    pub lock_wait_limit_ms: u64,

    /// Environment variable: `REGISTRATION_CHUNK_SIZE`
    #[arg(long, env = "REGISTRATION_CHUNK_SIZE", default_value_t = 1000)]
    pub registration_chunk_size: usize,

    /// Environment variable: `REGISTRATION_FLUSH_INTERVAL`
    #[arg(long, env = "REGISTRATION_FLUSH_INTERVAL", default_value_t = 30)]
    pub registration_flush_interval: u64,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Reserve identifiers straight from the authority and print them.
    BulkReserve {
        #[arg(long, default_value_t = 0)]
        namespace: u32,
        /// Two digit partition, e.g. `10` for extension concepts.
        #[arg(long)]
        partition: String,
        #[arg(long)]
        quantity: usize,
        /// Write identifiers here instead of stdout, one per line.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Reserve a block for one commit through the cache tier and print it.
    ReserveBlock {
        #[arg(long, default_value_t = 0)]
        namespace: u32,
        #[arg(long, default_value_t = 0)]
        concepts: usize,
        #[arg(long, default_value_t = 0)]
        descriptions: usize,
        #[arg(long, default_value_t = 0)]
        relationships: usize,
        #[arg(long, value_enum, default_value_t = SourceKind::Remote)]
        source: SourceKind,
        /// Register every identifier in the block after printing it.
        #[arg(long, default_value_t = false)]
        register: bool,
    },
    /// Register identifiers with the authority.
    Register {
        #[arg(long, default_value_t = 0)]
        namespace: u32,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Check identifiers for a valid shape, partition and check digit.
    Validate {
        /// Require every identifier to be of this component type.
        #[arg(long, value_enum)]
        component_type: Option<ComponentArg>,
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

/// Where `reserve-block` gets identifiers from.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Minted in-process from a per-partition counter.
    Sequential,
    /// Minted in-process from random item ids.
    Random,
    /// Reserved from the authority.
    Remote,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentArg {
    Concept,
    Description,
    Relationship,
}

impl From<ComponentArg> for ComponentType {
    fn from(arg: ComponentArg) -> Self {
        match arg {
            ComponentArg::Concept => Self::Concept,
            ComponentArg::Description => Self::Description,
            ComponentArg::Relationship => Self::Relationship,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Task {
    BulkReserve {
        namespace: Namespace,
        partition: Partition,
        quantity: usize,
        output: Option<PathBuf>,
    },
    ReserveBlock {
        namespace: Namespace,
        concepts: usize,
        descriptions: usize,
        relationships: usize,
        source: SourceKind,
        register: bool,
    },
    Register {
        namespace: Namespace,
        ids: Vec<String>,
    },
    Validate {
        component_type: Option<ComponentType>,
        ids: Vec<String>,
    },
}

impl Task {
    pub fn needs_authority(&self) -> bool {
        match self {
            Self::BulkReserve { .. } | Self::Register { .. } => true,
            Self::ReserveBlock { source, .. } => *source == SourceKind::Remote,
            Self::Validate { .. } => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub task: Task,
    pub cache: CacheManagerConfig,
    pub registration: RegistrationConfig,
    /// Present whenever the task talks to the authority.
    pub authority: Option<CisConfig>,
}

impl TryFrom<CliArgs> for AppConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let task = match args.command {
            Command::BulkReserve {
                namespace,
                partition,
                quantity,
                output,
            } => {
                if quantity == 0 {
                    bail!("--quantity must be greater than 0");
                }
                let namespace = Namespace::new(namespace);
                let partition: Partition = partition
                    .parse()
                    .with_context(|| format!("invalid --partition {partition:?}"))?;
                if partition.is_extension() == namespace.is_international() {
                    bail!("partition {partition} does not belong to namespace {namespace}");
                }
                Task::BulkReserve {
                    namespace,
                    partition,
                    quantity,
                    output,
                }
            }
            Command::ReserveBlock {
                namespace,
                concepts,
                descriptions,
                relationships,
                source,
                register,
            } => {
                if register && source != SourceKind::Remote {
                    bail!("--register needs --source remote");
                }
                Task::ReserveBlock {
                    namespace: Namespace::new(namespace),
                    concepts,
                    descriptions,
                    relationships,
                    source,
                    register,
                }
            }
            Command::Register { namespace, ids } => Task::Register {
                namespace: Namespace::new(namespace),
                ids,
            },
            Command::Validate {
                component_type,
                ids,
            } => Task::Validate {
                component_type: component_type.map(ComponentType::from),
                ids,
            },
        };

        let cache_args = args.cache;
        if cache_args.cached_namespaces.is_empty() {
            bail!("CACHED_NAMESPACES must name at least one namespace");
        }
        let cache = CacheManagerConfig {
            prefetch_count: cache_args.prefetch_count,
            namespaces: cache_args
                .cached_namespaces
                .into_iter()
                .map(Namespace::new)
                .collect(),
            top_up_level: cache_args.top_up_level,
            critical_level: cache_args.critical_level,
            polling_interval: Duration::from_secs(cache_args.polling_interval),
            lock_wait_limit: Duration::from_millis(cache_args.lock_wait_limit_ms),
        };
        cache.validate()?;

        let registration = RegistrationConfig {
            chunk_size: cache_args.registration_chunk_size,
            flush_interval: Duration::from_secs(cache_args.registration_flush_interval),
        };
        registration.validate()?;

        let authority = if task.needs_authority() {
            Some(authority_config(args.authority)?)
        } else {
            None
        };

        Ok(Self {
            task,
            cache,
            registration,
            authority,
        })
    }
}

fn authority_config(args: AuthorityArgs) -> anyhow::Result<CisConfig> {
    let Some(base_url) = args.cis_api_url else {
        bail!("CIS_API_URL is required for this command");
    };
    if args.cis_token.is_empty() && args.cis_username.is_none() {
        bail!("either CIS_TOKEN or CIS_USERNAME/CIS_PASSWORD must be set");
    }

    let mut config = CisConfig::new(base_url, args.cis_token);
    config.username = args.cis_username;
    config.password = args.cis_password;
    config.timeout = Duration::from_secs(args.cis_timeout);
    config.poll_interval = Duration::from_millis(args.cis_poll_interval_ms);
    config.max_bulk_size = args.cis_max_bulk_size;
    config.transient_cooldown = Duration::from_secs(args.cis_transient_cooldown);
    config.max_transient_retries = args.cis_max_transient_retries;
    config.software_name = args.cis_software_name;
    config.scheme_name = args.cis_scheme_name;
    config.validate()?;
    Ok(config)
}
