//! Gatekeeper configuration.
//!
//! Environment variables provide the base values; a YAML file named by
//! `GATEKEEPER_CONFIG` overrides any field it sets. The result is validated
//! once, before any key material is loaded.
use anyhow::{Context, Result, bail};
use gatekeeper_authz::{Algorithm, KeyFamily, ResolverMode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_BIND: &str = "127.0.0.1:8081";
pub const DEFAULT_METRICS_BIND: &str = "127.0.0.1:9090";
pub const DEFAULT_PATH_PREFIX: &str = "/secure";
pub const DEFAULT_COOKIE_NAME: &str = "jwt";
pub const DEFAULT_ORIGINAL_URI_HEADER: &str = "x-original-uri";
pub const DEFAULT_RESOLVER_TIMEOUT_MS: u64 = 30;
pub const DEFAULT_STORE_KEY_ID: &str = "default";
pub const DEFAULT_PG_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_PG_CONNECT_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_PG_ACQUIRE_TIMEOUT_MS: u64 = 30;

#[derive(Debug, Clone)]
pub struct GatekeeperConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    pub path_prefix: String,
    pub cookie_name: String,
    pub original_uri_header: String,
    pub system_error_status: u16,
    pub token: TokenConfig,
    pub resolver: ResolverConfig,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub memory_seed: MemorySeed,
}

#[derive(Clone)]
pub struct TokenConfig {
    pub algorithm: Algorithm,
    pub leeway_seconds: u64,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub groups_claim: String,
    pub key_source: KeySource,
    pub secret: Option<String>,
    pub pem_path: Option<PathBuf>,
    pub jwks_url: Option<String>,
    pub store_key_id: String,
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("algorithm", &self.algorithm)
            .field("leeway_seconds", &self.leeway_seconds)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("groups_claim", &self.groups_claim)
            .field("key_source", &self.key_source)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("pem_path", &self.pem_path)
            .field("jwks_url", &self.jwks_url)
            .field("store_key_id", &self.store_key_id)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Secret,
    PemFile,
    JwksUrl,
    Store,
}

impl KeySource {
    pub fn as_str(self) -> &'static str {
        match self {
            KeySource::Secret => "secret",
            KeySource::PemFile => "pem_file",
            KeySource::JwksUrl => "jwks_url",
            KeySource::Store => "store",
        }
    }
}

impl FromStr for KeySource {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "secret" => Ok(KeySource::Secret),
            "pem_file" | "pem" => Ok(KeySource::PemFile),
            "jwks_url" | "jwks" => Ok(KeySource::JwksUrl),
            "store" => Ok(KeySource::Store),
            other => bail!("unknown key source: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub mode: ResolverMode,
    pub timeout_ms: u64,
    pub privileged_groups: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" | "pg" => Ok(StorageBackend::Postgres),
            other => bail!("unknown storage backend: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

/// Initial contents for the in-memory store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemorySeed {
    #[serde(default)]
    pub subjects: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub keys: Vec<SeedKey>,
}

#[derive(Clone, Deserialize)]
pub struct SeedKey {
    pub key_id: String,
    pub algorithm: String,
    pub key_material: String,
}

impl std::fmt::Debug for SeedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Deserialize)]
struct GatekeeperConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    path_prefix: Option<String>,
    cookie_name: Option<String>,
    original_uri_header: Option<String>,
    system_error_status: Option<u16>,
    token: Option<TokenConfigOverride>,
    resolver: Option<ResolverConfigOverride>,
    storage: Option<String>,
    postgres: Option<PostgresConfigOverride>,
    memory: Option<MemorySeed>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenConfigOverride {
    algorithm: Option<String>,
    leeway_seconds: Option<u64>,
    issuer: Option<String>,
    audience: Option<String>,
    groups_claim: Option<String>,
    key_source: Option<String>,
    secret: Option<String>,
    pem_path: Option<PathBuf>,
    jwks_url: Option<String>,
    store_key_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResolverConfigOverride {
    mode: Option<String>,
    timeout_ms: Option<u64>,
    privileged_groups: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct PostgresConfigOverride {
    url: Option<String>,
    max_connections: Option<u32>,
    connect_timeout_ms: Option<u64>,
    acquire_timeout_ms: Option<u64>,
}

impl GatekeeperConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env_or("GATEKEEPER_BIND", DEFAULT_BIND)
            .parse()
            .with_context(|| "parse GATEKEEPER_BIND")?;
        let metrics_bind = env_or("GATEKEEPER_METRICS_BIND", DEFAULT_METRICS_BIND)
            .parse()
            .with_context(|| "parse GATEKEEPER_METRICS_BIND")?;
        let system_error_status = env_or("GATEKEEPER_SYSTEM_ERROR_STATUS", "500")
            .parse()
            .with_context(|| "parse GATEKEEPER_SYSTEM_ERROR_STATUS")?;

        let token = TokenConfig {
            algorithm: parse_algorithm(&env_or("GATEKEEPER_JWT_ALGORITHM", "HS256"))?,
            leeway_seconds: env_or("GATEKEEPER_JWT_LEEWAY_SECONDS", "0")
                .parse()
                .with_context(|| "parse GATEKEEPER_JWT_LEEWAY_SECONDS")?,
            issuer: env_opt("GATEKEEPER_JWT_ISSUER"),
            audience: env_opt("GATEKEEPER_JWT_AUDIENCE"),
            groups_claim: env_or("GATEKEEPER_JWT_GROUPS_CLAIM", "groups"),
            key_source: env_or("GATEKEEPER_JWT_KEY_SOURCE", "secret")
                .parse::<KeySource>()
                .with_context(|| "parse GATEKEEPER_JWT_KEY_SOURCE")?,
            secret: env_opt("GATEKEEPER_JWT_SECRET"),
            pem_path: env_opt("GATEKEEPER_JWT_PEM_PATH").map(PathBuf::from),
            jwks_url: env_opt("GATEKEEPER_JWT_JWKS_URL"),
            store_key_id: env_or("GATEKEEPER_JWT_STORE_KEY_ID", DEFAULT_STORE_KEY_ID),
        };

        let resolver = ResolverConfig {
            mode: parse_resolver_mode(&env_or("GATEKEEPER_RESOLVER_MODE", "claims"))?,
            timeout_ms: env_or(
                "GATEKEEPER_RESOLVER_TIMEOUT_MS",
                &DEFAULT_RESOLVER_TIMEOUT_MS.to_string(),
            )
            .parse()
            .with_context(|| "parse GATEKEEPER_RESOLVER_TIMEOUT_MS")?,
            privileged_groups: split_list(&env_or(
                "GATEKEEPER_PRIVILEGED_GROUPS",
                "admin,Administrators",
            )),
        };

        let postgres = match env_opt("GATEKEEPER_POSTGRES_URL") {
            Some(url) => Some(PostgresConfig {
                url,
                max_connections: env_or(
                    "GATEKEEPER_POSTGRES_MAX_CONNECTIONS",
                    &DEFAULT_PG_MAX_CONNECTIONS.to_string(),
                )
                .parse()
                .with_context(|| "parse GATEKEEPER_POSTGRES_MAX_CONNECTIONS")?,
                connect_timeout_ms: env_or(
                    "GATEKEEPER_POSTGRES_CONNECT_TIMEOUT_MS",
                    &DEFAULT_PG_CONNECT_TIMEOUT_MS.to_string(),
                )
                .parse()
                .with_context(|| "parse GATEKEEPER_POSTGRES_CONNECT_TIMEOUT_MS")?,
                acquire_timeout_ms: env_or(
                    "GATEKEEPER_POSTGRES_ACQUIRE_TIMEOUT_MS",
                    &DEFAULT_PG_ACQUIRE_TIMEOUT_MS.to_string(),
                )
                .parse()
                .with_context(|| "parse GATEKEEPER_POSTGRES_ACQUIRE_TIMEOUT_MS")?,
            }),
            None => None,
        };

        Ok(Self {
            bind_addr,
            metrics_bind,
            path_prefix: env_or("GATEKEEPER_PATH_PREFIX", DEFAULT_PATH_PREFIX),
            cookie_name: env_or("GATEKEEPER_COOKIE_NAME", DEFAULT_COOKIE_NAME),
            original_uri_header: env_or(
                "GATEKEEPER_ORIGINAL_URI_HEADER",
                DEFAULT_ORIGINAL_URI_HEADER,
            ),
            system_error_status,
            token,
            resolver,
            storage: env_or("GATEKEEPER_STORAGE", "memory")
                .parse::<StorageBackend>()
                .with_context(|| "parse GATEKEEPER_STORAGE")?,
            postgres,
            memory_seed: MemorySeed::default(),
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Some(path) = env_opt("GATEKEEPER_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read GATEKEEPER_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Overlay the fields set in a YAML document onto this config.
    pub fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: GatekeeperConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse gatekeeper config yaml")?;
        if let Some(value) = override_cfg.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.path_prefix {
            self.path_prefix = value;
        }
        if let Some(value) = override_cfg.cookie_name {
            self.cookie_name = value;
        }
        if let Some(value) = override_cfg.original_uri_header {
            self.original_uri_header = value;
        }
        if let Some(value) = override_cfg.system_error_status {
            self.system_error_status = value;
        }
        if let Some(token) = override_cfg.token {
            self.apply_token(token)?;
        }
        if let Some(resolver) = override_cfg.resolver {
            if let Some(value) = resolver.mode {
                self.resolver.mode = parse_resolver_mode(&value)?;
            }
            if let Some(value) = resolver.timeout_ms {
                self.resolver.timeout_ms = value;
            }
            if let Some(value) = resolver.privileged_groups {
                self.resolver.privileged_groups = value;
            }
        }
        if let Some(value) = override_cfg.storage {
            self.storage = value.parse::<StorageBackend>().with_context(|| "parse storage")?;
        }
        if let Some(pg) = override_cfg.postgres {
            self.apply_postgres(pg)?;
        }
        if let Some(seed) = override_cfg.memory {
            self.memory_seed = seed;
        }
        Ok(())
    }

    fn apply_token(&mut self, token: TokenConfigOverride) -> Result<()> {
        let current = &mut self.token;
        if let Some(value) = token.algorithm {
            current.algorithm = parse_algorithm(&value)?;
        }
        if let Some(value) = token.leeway_seconds {
            current.leeway_seconds = value;
        }
        if token.issuer.is_some() {
            current.issuer = token.issuer;
        }
        if token.audience.is_some() {
            current.audience = token.audience;
        }
        if let Some(value) = token.groups_claim {
            current.groups_claim = value;
        }
        if let Some(value) = token.key_source {
            current.key_source = value.parse::<KeySource>().with_context(|| "parse token.key_source")?;
        }
        if token.secret.is_some() {
            current.secret = token.secret;
        }
        if token.pem_path.is_some() {
            current.pem_path = token.pem_path;
        }
        if token.jwks_url.is_some() {
            current.jwks_url = token.jwks_url;
        }
        if let Some(value) = token.store_key_id {
            current.store_key_id = value;
        }
        Ok(())
    }

    fn apply_postgres(&mut self, pg: PostgresConfigOverride) -> Result<()> {
        let base = match (self.postgres.take(), pg.url) {
            (Some(mut existing), Some(url)) => {
                existing.url = url;
                existing
            }
            (Some(existing), None) => existing,
            (None, Some(url)) => PostgresConfig {
                url,
                max_connections: DEFAULT_PG_MAX_CONNECTIONS,
                connect_timeout_ms: DEFAULT_PG_CONNECT_TIMEOUT_MS,
                acquire_timeout_ms: DEFAULT_PG_ACQUIRE_TIMEOUT_MS,
            },
            (None, None) => bail!("postgres section requires url"),
        };
        self.postgres = Some(PostgresConfig {
            max_connections: pg.max_connections.unwrap_or(base.max_connections),
            connect_timeout_ms: pg.connect_timeout_ms.unwrap_or(base.connect_timeout_ms),
            acquire_timeout_ms: pg.acquire_timeout_ms.unwrap_or(base.acquire_timeout_ms),
            url: base.url,
        });
        Ok(())
    }

    /// Reject combinations that cannot produce a working verifier or store.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.system_error_status, 403 | 500) {
            bail!(
                "system_error_status must be 403 or 500, got {}",
                self.system_error_status
            );
        }
        if self.cookie_name.trim().is_empty() {
            bail!("cookie_name must not be empty");
        }
        if self.resolver.timeout_ms == 0 {
            bail!("resolver.timeout_ms must be positive");
        }
        if self.storage == StorageBackend::Postgres && self.postgres.is_none() {
            bail!("postgres storage requires GATEKEEPER_POSTGRES_URL or a postgres.url entry");
        }

        let family = KeyFamily::of(self.token.algorithm);
        match self.token.key_source {
            KeySource::Secret => {
                if family != KeyFamily::Hmac {
                    bail!(
                        "key_source secret only works with HS* algorithms, not {:?}",
                        self.token.algorithm
                    );
                }
                if self.token.secret.as_deref().is_none_or(str::is_empty) {
                    bail!("key_source secret requires GATEKEEPER_JWT_SECRET");
                }
            }
            KeySource::PemFile => {
                if family == KeyFamily::Hmac {
                    bail!("key_source pem_file requires an asymmetric algorithm");
                }
                if self.token.pem_path.is_none() {
                    bail!("key_source pem_file requires GATEKEEPER_JWT_PEM_PATH");
                }
            }
            KeySource::JwksUrl => {
                if self.token.jwks_url.is_none() {
                    bail!("key_source jwks_url requires GATEKEEPER_JWT_JWKS_URL");
                }
            }
            KeySource::Store => {}
        }
        Ok(())
    }

    /// True when either the resolver or key loading reads the identity store.
    pub fn needs_store(&self) -> bool {
        self.resolver.mode == ResolverMode::Store || self.token.key_source == KeySource::Store
    }
}

pub fn parse_algorithm(value: &str) -> Result<Algorithm> {
    Algorithm::from_str(value.trim()).with_context(|| format!("unsupported jwt algorithm: {value}"))
}

fn parse_resolver_mode(value: &str) -> Result<ResolverMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "claims" | "inline" => Ok(ResolverMode::Claims),
        "store" => Ok(ResolverMode::Store),
        other => bail!("unknown resolver mode: {other}"),
    }
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
