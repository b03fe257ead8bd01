use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::gate::delegate::HttpDelegator;
use crate::gate::Gate;
use crate::logs::LogsConfig;
use crate::proxy::Upstream;
use crate::rule::{Rule, RuleEntry};
use crate::server::GateServer;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Path of the config file. Defaults to env `AUTHGATE_CONFIG`, then
    /// `/etc/authgate/config.toml`.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl ConfigArgs {
    const CONFIG_ENV: &str = "AUTHGATE_CONFIG";
    const DEFAULT_CONFIG_PATH: &str = "/etc/authgate/config.toml";

    pub fn load(&self) -> Result<GateConfig> {
        let path = match self.config.as_ref() {
            Some(path) => path.clone(),
            None => match env::var_os(Self::CONFIG_ENV) {
                Some(path) => PathBuf::from(path),
                None => PathBuf::from(Self::DEFAULT_CONFIG_PATH),
            },
        };
        GateConfig::load(&path)
    }
}

pub trait CommonConfig {
    /// Expands and validates the config. `dir` is the directory of the
    /// config file, relative paths are resolved against it.
    fn complete(&mut self, dir: &Path) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    #[serde(default = "GateConfig::default_bind")]
    pub bind: String,

    /// Where admitted requests are forwarded to.
    #[serde(default)]
    pub upstream: String,

    #[serde(default)]
    pub ssl: bool,

    #[serde(default)]
    pub cert_path: String,

    #[serde(default)]
    pub key_path: String,

    pub keep_alive_secs: Option<u64>,

    pub workers: Option<u64>,

    #[serde(default = "GateConfig::default_payload_limit_mib")]
    pub payload_limit_mib: u64,

    /// Total timeout for one upstream exchange. No timeout when unset.
    pub upstream_timeout_secs: Option<u64>,

    #[serde(default)]
    pub delegation: DelegationConfig,

    #[serde(default)]
    pub logs: LogsConfig,

    #[serde(default)]
    pub rules: Vec<RuleEntry>,

    #[serde(skip)]
    parsed_rules: Vec<Rule>,

    #[serde(skip)]
    upstream_url: Option<Url>,
}

impl CommonConfig for GateConfig {
    fn complete(&mut self, dir: &Path) -> Result<()> {
        self.bind = expandenv("bind", &self.bind)?;
        if self.bind.is_empty() {
            bail!("bind is required");
        }

        self.upstream = expandenv("upstream", &self.upstream)?;
        if self.upstream.is_empty() {
            bail!("upstream is required");
        }
        self.upstream_url = Some(parse_http_url(&self.upstream).context("upstream")?);

        if self.ssl {
            self.cert_path = expandenv("cert_path", &self.cert_path)?;
            if self.cert_path.is_empty() {
                bail!("cert_path is required when ssl is enabled");
            }
            self.cert_path = resolve_path(dir, &self.cert_path);

            self.key_path = expandenv("key_path", &self.key_path)?;
            if self.key_path.is_empty() {
                bail!("key_path is required when ssl is enabled");
            }
            self.key_path = resolve_path(dir, &self.key_path);
        }

        if let Some(keep_alive_secs) = self.keep_alive_secs {
            if keep_alive_secs == 0 {
                bail!("keep_alive_secs must be greater than 0");
            }
        }

        if let Some(workers) = self.workers {
            if workers == 0 {
                bail!("workers must be greater than 0");
            }
        }

        if self.payload_limit_mib < Self::MIN_PAYLOAD_LIMIT_MIB
            || self.payload_limit_mib > Self::MAX_PAYLOAD_LIMIT_MIB
        {
            bail!(
                "payload_limit_mib must be in range [{}, {}]",
                Self::MIN_PAYLOAD_LIMIT_MIB,
                Self::MAX_PAYLOAD_LIMIT_MIB
            );
        }

        if let Some(upstream_timeout_secs) = self.upstream_timeout_secs {
            if upstream_timeout_secs == 0 {
                bail!("upstream_timeout_secs must be greater than 0");
            }
        }

        self.delegation.complete(dir).context("delegation")?;

        let mut parsed_rules = Vec::with_capacity(self.rules.len());
        for (idx, entry) in self.rules.iter().enumerate() {
            let rule = entry.build().with_context(|| format!("rules[{idx}]"))?;
            parsed_rules.push(rule);
        }
        self.parsed_rules = parsed_rules;

        Ok(())
    }
}

impl GateConfig {
    const MIN_PAYLOAD_LIMIT_MIB: u64 = 1;
    const MAX_PAYLOAD_LIMIT_MIB: u64 = 1024;

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("read config file '{}'", path.display()))?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&data, dir).with_context(|| format!("load config file '{}'", path.display()))
    }

    pub fn parse(data: &str, dir: &Path) -> Result<Self> {
        let mut cfg: GateConfig = toml::from_str(data).context("parse config toml")?;
        cfg.complete(dir).context("validate config")?;
        Ok(cfg)
    }

    /// The validated rules, in declaration order.
    pub fn parsed_rules(&self) -> &[Rule] {
        &self.parsed_rules
    }

    pub fn build_gate(&self) -> Result<Arc<Gate>> {
        let delegator = HttpDelegator::new(&self.delegation).context("init delegator")?;
        let gate = Gate::new(self.parsed_rules.clone(), Arc::new(delegator));
        Ok(Arc::new(gate))
    }

    pub fn build_upstream(&self) -> Result<Upstream> {
        let url = match self.upstream_url.as_ref() {
            Some(url) => url.clone(),
            None => bail!("upstream is not validated"),
        };

        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(self.delegation.connect_timeout_secs));
        if let Some(timeout) = self.upstream_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }
        let client = builder.build().context("build upstream client")?;

        Ok(Upstream::new(url, client))
    }

    pub fn build_server(&self, gate: Arc<Gate>) -> Result<GateServer> {
        let upstream = self.build_upstream().context("init upstream")?;

        let mut srv = GateServer::new(self.bind.clone(), gate, upstream);
        if self.ssl {
            srv.set_ssl(&self.cert_path, &self.key_path)?;
        }

        if let Some(keep_alive_secs) = self.keep_alive_secs {
            srv.set_keep_alive_secs(keep_alive_secs);
        }

        if let Some(workers) = self.workers {
            srv.set_workers(workers);
        }

        srv.set_payload_limit_mib(self.payload_limit_mib);

        Ok(srv)
    }

    fn default_bind() -> String {
        String::from("127.0.0.1:8080")
    }

    fn default_payload_limit_mib() -> u64 {
        10
    }
}

/// Settings of the shared client used to call authorization endpoints.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DelegationConfig {
    #[serde(default = "DelegationConfig::default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "DelegationConfig::default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "DelegationConfig::default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout_secs(),
            connect_timeout_secs: Self::default_connect_timeout_secs(),
            pool_max_idle_per_host: Self::default_pool_max_idle_per_host(),
        }
    }
}

impl CommonConfig for DelegationConfig {
    fn complete(&mut self, _dir: &Path) -> Result<()> {
        if self.timeout_secs < Self::MIN_TIMEOUT_SECS || self.timeout_secs > Self::MAX_TIMEOUT_SECS
        {
            bail!(
                "timeout_secs must be in range [{}, {}]",
                Self::MIN_TIMEOUT_SECS,
                Self::MAX_TIMEOUT_SECS
            );
        }

        if self.connect_timeout_secs < Self::MIN_TIMEOUT_SECS
            || self.connect_timeout_secs > Self::MAX_CONNECT_TIMEOUT_SECS
        {
            bail!(
                "connect_timeout_secs must be in range [{}, {}]",
                Self::MIN_TIMEOUT_SECS,
                Self::MAX_CONNECT_TIMEOUT_SECS
            );
        }

        if self.pool_max_idle_per_host == 0 {
            bail!("pool_max_idle_per_host must be greater than 0");
        }

        Ok(())
    }
}

impl DelegationConfig {
    const MIN_TIMEOUT_SECS: u64 = 1;
    const MAX_TIMEOUT_SECS: u64 = 300;
    const MAX_CONNECT_TIMEOUT_SECS: u64 = 60;

    fn default_timeout_secs() -> u64 {
        10
    }

    fn default_connect_timeout_secs() -> u64 {
        3
    }

    fn default_pool_max_idle_per_host() -> usize {
        32
    }
}

/// See: [`shellexpand::full`].
pub fn expandenv(name: &str, s: impl AsRef<str>) -> Result<String> {
    let s =
        shellexpand::full(s.as_ref()).with_context(|| format!("expand env value for '{name}'"))?;
    Ok(s.to_string())
}

/// Parses an absolute `http` or `https` url.
pub fn parse_http_url(raw: &str) -> Result<Url> {
    let parsed = match Url::parse(raw) {
        Ok(url) => url,
        Err(_) => bail!("invalid url '{raw}'"),
    };

    match parsed.scheme() {
        "http" | "https" => {}
        _ => bail!(
            "invalid url scheme, expect 'http' or 'https', not '{}'",
            parsed.scheme()
        ),
    }

    if parsed.host_str().is_none() {
        bail!("url '{raw}' has no host");
    }

    Ok(parsed)
}

fn resolve_path(dir: &Path, path: &str) -> String {
    let path = Path::new(path);
    if path.is_absolute() {
        return format!("{}", path.display());
    }
    format!("{}", dir.join(path).display())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &str) -> Result<GateConfig> {
        GateConfig::parse(data, Path::new("/etc/authgate"))
    }

    #[test]
    fn test_parse() {
        let cfg = parse(
            r#"
            upstream = "http://127.0.0.1:9000"

            [delegation]
            timeout_secs = 5

            [[rules]]
            path = "/admin"
            endpoint = "http://auth.local/check"
            headers = ["Authorization"]
            except = ["/admin/public"]
            passthrough = true

            [[rules]]
            path = "/api"
            endpoint = "http://auth.local/api"
            header_or_query = [{ header = "X-Api-Key", query = "api_key" }]
            redirect = "https://login.local/?next={uri_escaped}"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.bind, "127.0.0.1:8080");
        assert_eq!(cfg.delegation.timeout_secs, 5);
        assert_eq!(cfg.delegation.connect_timeout_secs, 3);
        assert_eq!(cfg.delegation.pool_max_idle_per_host, 32);
        assert_eq!(cfg.payload_limit_mib, 10);

        let rules = cfg.parsed_rules();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].path, "/admin");
        assert!(rules[0].passthrough);
        assert_eq!(rules[1].path, "/api");
        assert_eq!(rules[1].header_or_query[0].query, "api_key");
        assert!(rules[1].redirect.is_some());
    }

    #[test]
    fn test_shorthand_rules() {
        let cfg = parse(
            r#"
            upstream = "http://127.0.0.1:9000"
            rules = ["/private", { path = "/admin", allow_root = true }]
            "#,
        )
        .unwrap();
        let rules = cfg.parsed_rules();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].path, "/private");
        assert!(rules[0].endpoint.is_none());
        assert!(rules[1].allow_root);
    }

    #[test]
    fn test_ssl_paths() {
        let cfg = parse(
            r#"
            upstream = "https://backend.local"
            ssl = true
            cert_path = "pki/cert.pem"
            key_path = "/var/lib/authgate/key.pem"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.cert_path, "/etc/authgate/pki/cert.pem");
        assert_eq!(cfg.key_path, "/var/lib/authgate/key.pem");
    }

    #[test]
    fn test_invalid() {
        let cases = [
            // Missing upstream.
            "",
            r#"upstream = "backend.local""#,
            r#"
            upstream = "http://backend.local"
            ssl = true
            "#,
            r#"
            upstream = "http://backend.local"
            workers = 0
            "#,
            r#"
            upstream = "http://backend.local"
            payload_limit_mib = 0
            "#,
            r#"
            upstream = "http://backend.local"
            [delegation]
            timeout_secs = 0
            "#,
            r#"
            upstream = "http://backend.local"
            [delegation]
            pool_max_idle_per_host = 0
            "#,
            // Rule without path.
            r#"
            upstream = "http://backend.local"
            [[rules]]
            endpoint = "http://auth.local/check"
            "#,
            // Unknown keys, at every level.
            r#"
            upstream = "http://backend.local"
            upstram = "http://other.local"
            "#,
            r#"
            upstream = "http://backend.local"
            [delegation]
            timeout = 5
            "#,
            r#"
            upstream = "http://backend.local"
            [logs]
            levle = "debug"
            "#,
            r#"
            upstream = "http://backend.local"
            [[rules]]
            path = "/admin"
            pathh = "/other"
            "#,
            // Malformed endpoint fails at load time.
            r#"
            upstream = "http://backend.local"
            [[rules]]
            path = "/admin"
            endpoint = "http//auth.local"
            "#,
        ];
        for case in cases {
            assert!(parse(case).is_err(), "expect error for config: {case}");
        }
    }

    #[test]
    fn test_parse_http_url() {
        assert!(parse_http_url("http://auth.local/check").is_ok());
        assert!(parse_http_url("https://auth.local:8443").is_ok());
        assert!(parse_http_url("unix:///run/auth.sock").is_err());
        assert!(parse_http_url("/check").is_err());
    }
}
