use actix_web::http::header::HeaderName;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{expandenv, parse_http_url};
use crate::gate::path::Pattern;

/// A credential that can be supplied either as a header or as a query
/// parameter. The header wins when both are present.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderOrQuery {
    pub header: String,
    pub query: String,
}

/// An entry of the `rules` list in the config file.
///
/// A bare string is shorthand for a rule that only sets `path`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RuleEntry {
    Path(String),
    Block(RuleConfig),
}

impl RuleEntry {
    pub fn build(&self) -> Result<Rule> {
        match self {
            RuleEntry::Path(path) => RuleConfig {
                path: path.clone(),
                ..Default::default()
            }
            .build(),
            RuleEntry::Block(cfg) => cfg.build(),
        }
    }
}

/// The raw, unvalidated form of a [`Rule`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    #[serde(default)]
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Sub-paths that are never protected by this rule.
    #[serde(default)]
    pub except: Vec<String>,

    #[serde(default)]
    pub headers: Vec<String>,

    #[serde(default)]
    pub optional_headers: Vec<String>,

    #[serde(default)]
    pub queries: Vec<String>,

    #[serde(default)]
    pub optional_queries: Vec<String>,

    #[serde(default)]
    pub header_or_query: Vec<HeaderOrQuery>,

    /// Location template used instead of a status code when the request is
    /// denied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,

    #[serde(default)]
    pub allow_root: bool,

    #[serde(default)]
    pub passthrough: bool,

    #[serde(default)]
    pub strip_header: bool,
}

impl RuleConfig {
    pub fn build(&self) -> Result<Rule> {
        let path = expandenv("path", &self.path)?;
        check_path(&path).context("path")?;

        let mut except = Vec::with_capacity(self.except.len());
        for (idx, raw) in self.except.iter().enumerate() {
            let excepted = expandenv("except", raw)?;
            check_path(&excepted).with_context(|| format!("except[{idx}]"))?;
            except.push(Pattern::new(&excepted));
        }

        check_header_names(&self.headers).context("headers")?;
        check_header_names(&self.optional_headers).context("optional_headers")?;
        check_query_names(&self.queries).context("queries")?;
        check_query_names(&self.optional_queries).context("optional_queries")?;
        for (idx, pair) in self.header_or_query.iter().enumerate() {
            check_header_name(&pair.header)
                .and_then(|_| check_query_name(&pair.query))
                .with_context(|| format!("header_or_query[{idx}]"))?;
        }

        let endpoint = match self.endpoint.as_ref() {
            Some(raw) => {
                let raw = expandenv("endpoint", raw)?;
                Some(parse_http_url(&raw).context("endpoint")?)
            }
            None => None,
        };

        let redirect = match self.redirect.as_ref() {
            Some(raw) => {
                let redirect = expandenv("redirect", raw)?;
                if redirect.is_empty() {
                    bail!("redirect cannot be empty");
                }
                Some(redirect)
            }
            None => None,
        };

        Ok(Rule {
            pattern: Pattern::new(&path),
            path,
            except,
            headers: self.headers.clone(),
            optional_headers: self.optional_headers.clone(),
            queries: self.queries.clone(),
            optional_queries: self.optional_queries.clone(),
            header_or_query: self.header_or_query.clone(),
            endpoint,
            redirect,
            allow_root: self.allow_root,
            passthrough: self.passthrough,
            strip_header: self.strip_header,
        })
    }
}

/// A validated protected-path policy. Rules are immutable once loaded and
/// shared by every request evaluation.
#[derive(Debug, Clone)]
pub struct Rule {
    /// As configured. Never empty, always starts with `/`.
    pub path: String,
    pub pattern: Pattern,
    pub except: Vec<Pattern>,

    pub headers: Vec<String>,
    pub optional_headers: Vec<String>,
    pub queries: Vec<String>,
    pub optional_queries: Vec<String>,
    pub header_or_query: Vec<HeaderOrQuery>,

    /// Authorization endpoint. Without one every governed request is treated
    /// as a failed delegation.
    pub endpoint: Option<Url>,
    pub redirect: Option<String>,

    pub allow_root: bool,
    pub passthrough: bool,
    pub strip_header: bool,
}

impl Rule {
    /// Names of every header this rule may read credentials from.
    pub fn credential_headers(&self) -> impl Iterator<Item = &str> {
        self.headers
            .iter()
            .chain(self.optional_headers.iter())
            .map(String::as_str)
            .chain(self.header_or_query.iter().map(|hq| hq.header.as_str()))
    }
}

fn check_path(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("path cannot be empty");
    }
    if !path.starts_with('/') {
        bail!("path must start with '/', found '{path}'");
    }
    Ok(())
}

fn check_header_names(names: &[String]) -> Result<()> {
    for name in names {
        check_header_name(name)?;
    }
    Ok(())
}

fn check_header_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("header name cannot be empty");
    }
    if HeaderName::from_bytes(name.as_bytes()).is_err() {
        bail!("invalid header name '{name}'");
    }
    Ok(())
}

fn check_query_names(names: &[String]) -> Result<()> {
    for name in names {
        check_query_name(name)?;
    }
    Ok(())
}

fn check_query_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("query name cannot be empty");
    }
    Ok(())
}
