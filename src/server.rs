use std::sync::Arc;
use std::time::Duration;

use actix_web::web::{self, Data, PayloadConfig};
use actix_web::{App, HttpServer};
use anyhow::{Context, Result};
use log::{info, warn};
use sd_notify::NotifyState;

#[cfg(feature = "ssl")]
use openssl::ssl::{SslAcceptor, SslAcceptorBuilder, SslFiletype, SslMethod};

use crate::gate::Gate;
use crate::middleware::Authorize;
use crate::proxy::{self, Upstream};

/// Listens for inbound requests, guards them with the gate and relays the
/// admitted ones upstream.
pub struct GateServer {
    bind: String,

    gate: Arc<Gate>,
    upstream: Data<Upstream>,

    #[cfg(feature = "ssl")]
    ssl: Option<SslAcceptorBuilder>,

    keep_alive_secs: Option<u64>,
    workers: Option<u64>,

    payload_limit_mib: u64,
}

impl GateServer {
    const DEFAULT_PAYLOAD_LIMIT_MIB: u64 = 10;

    pub fn new(bind: String, gate: Arc<Gate>, upstream: Upstream) -> Self {
        Self {
            bind,
            gate,
            upstream: Data::new(upstream),
            #[cfg(feature = "ssl")]
            ssl: None,
            keep_alive_secs: None,
            workers: None,
            payload_limit_mib: Self::DEFAULT_PAYLOAD_LIMIT_MIB,
        }
    }

    #[cfg(feature = "ssl")]
    pub fn set_ssl(&mut self, cert_path: &str, key_path: &str) -> Result<()> {
        let mut builder =
            SslAcceptor::mozilla_intermediate(SslMethod::tls()).context("init ssl acceptor")?;

        builder
            .set_private_key_file(key_path, SslFiletype::PEM)
            .context("load ssl key file")?;
        builder
            .set_certificate_chain_file(cert_path)
            .context("load ssl cert file")?;

        self.ssl = Some(builder);
        Ok(())
    }

    #[cfg(not(feature = "ssl"))]
    pub fn set_ssl(&mut self, _cert_path: &str, _key_path: &str) -> Result<()> {
        anyhow::bail!("ssl is not supported by this build, please enable the `ssl` feature")
    }

    pub fn set_keep_alive_secs(&mut self, keep_alive_secs: u64) {
        self.keep_alive_secs = Some(keep_alive_secs);
    }

    pub fn set_workers(&mut self, workers: u64) {
        self.workers = Some(workers);
    }

    pub fn set_payload_limit_mib(&mut self, payload_limit_mib: u64) {
        self.payload_limit_mib = payload_limit_mib;
    }

    pub async fn run(mut self) -> Result<()> {
        let gate = self.gate.clone();
        let upstream = self.upstream.clone();
        let payload_limit = (self.payload_limit_mib * 1024 * 1024) as usize;
        let mut srv = HttpServer::new(move || {
            App::new()
                .app_data(upstream.clone())
                .app_data(PayloadConfig::new(payload_limit))
                .wrap(Authorize::new(gate.clone()))
                .default_service(web::route().to(proxy::handle))
        });

        #[cfg(feature = "ssl")]
        let ssl = self.ssl.take();
        #[cfg(not(feature = "ssl"))]
        let ssl: Option<std::convert::Infallible> = None;

        srv = match ssl {
            #[cfg(feature = "ssl")]
            Some(ssl) => {
                info!("Binding to https://{}", self.bind);
                srv.bind_openssl(&self.bind, ssl).context("bind with ssl")?
            }
            #[cfg(not(feature = "ssl"))]
            Some(never) => match never {},
            None => {
                warn!("Using HTTP (without SSL), credentials travel in plain text");
                info!("Binding to http://{}", self.bind);
                srv.bind(&self.bind).context("bind without ssl")?
            }
        };

        if let Some(keep_alive) = self.keep_alive_secs {
            srv = srv.keep_alive(Duration::from_secs(keep_alive));
        }
        if let Some(workers) = self.workers {
            srv = srv.workers(workers as usize);
        }

        sd_notify::notify(true, &[NotifyState::Ready]).context("notify systemd")?;
        info!(
            "Starting gate server with {} rules",
            self.gate.rules().len()
        );
        srv.run().await.context("run server")?;

        info!("Server stopped by user");
        Ok(())
    }
}
