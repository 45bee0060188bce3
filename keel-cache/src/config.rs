//! Cache configuration types.

use crate::error::{CacheError, CacheResult};
use crate::traits::Lifetime;
use std::path::PathBuf;

#[cfg(feature = "redis")]
use keel_redis::{ClusterStrategy, RedisConfig};

/// Selected backend method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMethod {
    /// Plain filesystem store.
    File,
    /// Filesystem store with symlink tag index.
    AdvancedFile,
    /// Embedded SQLite store.
    Sqlite,
    /// Single-node Redis.
    Redis,
    /// Clustered Redis.
    RedisCluster,
    /// Memcache daemon via the ascii protocol client.
    Memcache,
    /// Memcache daemon via the binary protocol client.
    Memcached,
    /// In-process memory store.
    Apc,
    /// Cache disabled; every call is answered by the no-op driver.
    Session,
}

impl CacheMethod {
    /// Parse the configuration-surface identifier.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(Self::File),
            "advancedfile" => Some(Self::AdvancedFile),
            "sqlite" => Some(Self::Sqlite),
            "redis" => Some(Self::Redis),
            "redis-cluster" => Some(Self::RedisCluster),
            "memcache" => Some(Self::Memcache),
            "memcached" => Some(Self::Memcached),
            "apc" => Some(Self::Apc),
            "session" => Some(Self::Session),
            _ => None,
        }
    }
}

impl std::fmt::Display for CacheMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::File => "file",
            Self::AdvancedFile => "advancedfile",
            Self::Sqlite => "sqlite",
            Self::Redis => "redis",
            Self::RedisCluster => "redis-cluster",
            Self::Memcache => "memcache",
            Self::Memcached => "memcached",
            Self::Apc => "apc",
            Self::Session => "session",
        };
        f.write_str(s)
    }
}

/// Cache configuration, consumed once at facade construction.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Which backend to use.
    pub method: CacheMethod,

    /// Prefix applied to every physical key, so multiple logical namespaces
    /// can share one physical store.
    pub prefix: Option<String>,

    /// Default lifetime in seconds when the caller omits one. `0` = never
    /// expires.
    pub default_lifetime: Lifetime,

    /// Cache directory for file-based backends.
    pub cache_dir: PathBuf,

    /// Entry file extension for file-based backends.
    pub file_extension: String,

    /// Database file path for the SQLite backend.
    pub sqlite_path: Option<PathBuf>,

    /// Redis connection settings (single node and cluster).
    #[cfg(feature = "redis")]
    pub redis: RedisConfig,

    /// Memcache daemon host.
    pub memcache_host: String,

    /// Memcache daemon port.
    pub memcache_port: u16,

    /// Surface driver errors at debug level detail.
    pub debug: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            method: CacheMethod::Session,
            prefix: None,
            default_lifetime: 3600,
            cache_dir: PathBuf::from("./cache"),
            file_extension: ".cache".to_string(),
            sqlite_path: None,
            #[cfg(feature = "redis")]
            redis: RedisConfig::default(),
            memcache_host: "localhost".to_string(),
            memcache_port: 11211,
            debug: false,
        }
    }
}

impl CacheConfig {
    /// Plain file cache rooted at `dir`.
    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self {
            method: CacheMethod::File,
            cache_dir: dir.into(),
            ..Default::default()
        }
    }

    /// File cache with symlink tag index rooted at `dir`.
    pub fn advanced_file(dir: impl Into<PathBuf>) -> Self {
        Self {
            method: CacheMethod::AdvancedFile,
            cache_dir: dir.into(),
            ..Default::default()
        }
    }

    /// Embedded SQLite cache stored at `path`.
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            method: CacheMethod::Sqlite,
            sqlite_path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Single-node Redis cache.
    #[cfg(feature = "redis")]
    pub fn redis(redis: RedisConfig) -> Self {
        Self {
            method: CacheMethod::Redis,
            redis,
            ..Default::default()
        }
    }

    /// Clustered Redis cache. `nodes` is the comma-separated seed list from
    /// the configuration surface.
    #[cfg(feature = "redis")]
    pub fn redis_cluster(nodes: &str, strategy: ClusterStrategy) -> Self {
        let nodes: Vec<String> = nodes
            .split(',')
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        Self {
            method: CacheMethod::RedisCluster,
            redis: RedisConfig::builder()
                .cluster_nodes(nodes)
                .strategy(strategy)
                .build(),
            ..Default::default()
        }
    }

    /// Memcache daemon via the ascii protocol client.
    pub fn memcache(host: impl Into<String>, port: u16) -> Self {
        Self {
            method: CacheMethod::Memcache,
            memcache_host: host.into(),
            memcache_port: port,
            ..Default::default()
        }
    }

    /// Memcache daemon via the binary protocol client.
    pub fn memcached(host: impl Into<String>, port: u16) -> Self {
        Self {
            method: CacheMethod::Memcached,
            memcache_host: host.into(),
            memcache_port: port,
            ..Default::default()
        }
    }

    /// In-process memory cache.
    pub fn apc() -> Self {
        Self {
            method: CacheMethod::Apc,
            ..Default::default()
        }
    }

    /// Disabled cache: the no-op driver answers everything.
    pub fn session() -> Self {
        Self::default()
    }

    /// Load configuration from `KEEL_CACHE_*` environment variables.
    ///
    /// Unset or unparseable variables leave the defaults in place; an
    /// unknown method falls back to `session` (cache disabled) rather than
    /// failing startup.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(method) = std::env::var("KEEL_CACHE_METHOD") {
            if let Some(method) = CacheMethod::parse(&method) {
                config.method = method;
            }
        }
        if let Ok(prefix) = std::env::var("KEEL_CACHE_PREFIX") {
            config.prefix = Some(prefix);
        }
        if let Ok(lifetime) = std::env::var("KEEL_CACHE_LIFETIME") {
            if let Ok(lifetime) = lifetime.parse() {
                config.default_lifetime = lifetime;
            }
        }
        if let Ok(dir) = std::env::var("KEEL_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Ok(ext) = std::env::var("KEEL_CACHE_EXTENSION") {
            config.file_extension = ext;
        }
        if let Ok(path) = std::env::var("KEEL_CACHE_SQLITE_PATH") {
            config.sqlite_path = Some(PathBuf::from(path));
        }
        if let Ok(host) = std::env::var("KEEL_CACHE_MEMCACHE_HOST") {
            config.memcache_host = host;
        }
        if let Ok(port) = std::env::var("KEEL_CACHE_MEMCACHE_PORT") {
            if let Ok(port) = port.parse() {
                config.memcache_port = port;
            }
        }
        if std::env::var("KEEL_CACHE_DEBUG").is_ok() {
            config.debug = true;
        }
        #[cfg(feature = "redis")]
        {
            config.redis = RedisConfig::from_env().build();
        }

        config
    }

    /// Set the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set the default lifetime in seconds.
    pub fn with_lifetime(mut self, seconds: Lifetime) -> Self {
        self.default_lifetime = seconds;
        self
    }

    /// Set the entry file extension.
    pub fn with_extension(mut self, ext: impl Into<String>) -> Self {
        self.file_extension = ext.into();
        self
    }

    /// Enable debug-level error surfacing.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Validate that the fields the selected method needs are present.
    pub fn validate(&self) -> CacheResult<()> {
        match self.method {
            CacheMethod::File | CacheMethod::AdvancedFile => {
                if self.cache_dir.as_os_str().is_empty() {
                    return Err(CacheError::Config("cache_dir is required".into()));
                }
            }
            CacheMethod::Sqlite => {
                if self.sqlite_path.is_none() {
                    return Err(CacheError::Config("sqlite_path is required".into()));
                }
            }
            #[cfg(feature = "redis")]
            CacheMethod::RedisCluster => {
                if self.redis.cluster_nodes.is_empty() {
                    return Err(CacheError::Config("cluster nodes are required".into()));
                }
            }
            CacheMethod::Memcache | CacheMethod::Memcached => {
                if self.memcache_host.is_empty() {
                    return Err(CacheError::Config("memcache_host is required".into()));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Build the physical key with the configured prefix.
    pub fn build_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, key),
            None => key.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parse_roundtrip() {
        for name in [
            "file",
            "advancedfile",
            "sqlite",
            "redis",
            "redis-cluster",
            "memcache",
            "memcached",
            "apc",
            "session",
        ] {
            let method = CacheMethod::parse(name).unwrap();
            assert_eq!(method.to_string(), name);
        }
        assert!(CacheMethod::parse("varnish").is_none());
    }

    #[test]
    fn test_file_config() {
        let config = CacheConfig::file("/tmp/cache").with_prefix("shop.").with_lifetime(600);
        assert_eq!(config.method, CacheMethod::File);
        assert_eq!(config.default_lifetime, 600);
        assert_eq!(config.build_key("p42"), "shop.p42");
        config.validate().unwrap();
    }

    #[test]
    fn test_build_key_without_prefix() {
        let config = CacheConfig::file("/tmp/cache");
        assert_eq!(config.build_key("p42"), "p42");
    }

    #[test]
    fn test_sqlite_requires_path() {
        let config = CacheConfig {
            method: CacheMethod::Sqlite,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(CacheConfig::sqlite("/tmp/cache.db").validate().is_ok());
    }

    #[cfg(feature = "redis")]
    #[test]
    fn test_cluster_node_parsing() {
        let config = CacheConfig::redis_cluster(
            "10.0.0.1:7000, 10.0.0.2:7001,",
            keel_redis::ClusterStrategy::DistributeReads,
        );
        assert_eq!(config.redis.cluster_nodes.len(), 2);
        config.validate().unwrap();
    }
}
