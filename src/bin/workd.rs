// Copyright 2026 The Vimana Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use core::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use futures::future::try_join;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use mimalloc::MiMalloc;
use tokio::net::{TcpListener, UnixListener};
use tokio::select;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::watch;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server as TonicServer;
use tracing::{Instrument, Level, event, trace_span};
use workd_config::workd::{DataPlaneConfig, WorkdConfig};
use workd_error::{Error, ResultExt, make_input_err};
use workd_runtime::image_store::ImageStore;
use workd_runtime::ipam::SubnetIpAllocator;
use workd_runtime::pod_pool::PodPool;
use workd_service::cri_server::CriServer;
use workd_service::data_plane::DataPlaneRouter;
use workd_service::image_server::ImageServer;
use workd_service::proxy_loader::HttpProxyLoader;
use workd_util::task::TaskExecutor;
use workd_util::{background_spawn, init_tracing};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Work node runtime: serves CRI to the Kubelet and routes component traffic.
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    /// Config file to use.
    #[clap(value_parser)]
    config_file: String,
}

/// Resolves once SIGINT or SIGTERM arrives.
async fn wait_for_shutdown_signal(mut sigterm: Signal) {
    select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => event!(Level::WARN, "Process terminated via SIGINT"),
            Err(err) => event!(Level::ERROR, ?err, "Failed to listen to SIGINT"),
        },
        _ = sigterm.recv() => event!(Level::WARN, "Process terminated via SIGTERM"),
    }
}

async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    if shutdown_rx.wait_for(|shutdown| *shutdown).await.is_err() {
        event!(Level::ERROR, "Shutdown channel closed without a shutdown");
    }
}

async fn serve_cri(
    socket_path: String,
    runtime_server: CriServer,
    image_server: ImageServer,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Error> {
    match tokio::fs::remove_file(&socket_path).await {
        Ok(()) => event!(Level::INFO, %socket_path, "Removed stale CRI socket"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).err_tip(|| format!("Could not remove stale socket {socket_path}"));
        }
    }
    if let Some(parent) = Path::new(&socket_path).parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .err_tip(|| format!("Could not create directory for {socket_path}"))?;
    }
    let listener = UnixListener::bind(&socket_path)
        .err_tip(|| format!("Could not bind CRI socket {socket_path}"))?;
    event!(Level::WARN, %socket_path, "CRI server ready");

    let result = TonicServer::builder()
        .add_service(runtime_server.into_service())
        .add_service(image_server.into_service())
        .serve_with_incoming_shutdown(
            UnixListenerStream::new(listener),
            wait_for_shutdown(shutdown_rx),
        )
        .await
        .err_tip(|| "CRI server failed");

    // Unlinked so the next start can bind again.
    if let Err(err) = tokio::fs::remove_file(&socket_path).await {
        event!(Level::WARN, %socket_path, ?err, "Could not remove CRI socket");
    }
    result
}

async fn serve_data_plane(
    config: DataPlaneConfig,
    router: Arc<DataPlaneRouter>,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Error> {
    let socket_addr = config
        .listen_address
        .parse::<SocketAddr>()
        .map_err(|e| make_input_err!("Invalid address '{}' - {e:?}", config.listen_address))?;
    let tcp_listener = TcpListener::bind(&socket_addr).await?;
    let http = auto::Builder::new(TaskExecutor::default());
    let svc = router.into_router();
    event!(Level::WARN, %socket_addr, "Data plane ready");

    let shutdown = wait_for_shutdown(shutdown_rx);
    tokio::pin!(shutdown);
    loop {
        select! {
            accept_result = tcp_listener.accept() => {
                match accept_result {
                    Ok((tcp_stream, remote_addr)) => {
                        let (http, svc) = (http.clone(), svc.clone());
                        background_spawn!(
                            target: "workd::data_plane",
                            "http_connection",
                            async move {
                                if let Err(err) = http
                                    .serve_connection(
                                        TokioIo::new(tcp_stream),
                                        TowerToHyperService::new(svc),
                                    )
                                    .await
                                {
                                    event!(
                                        target: "workd::data_plane",
                                        Level::ERROR,
                                        ?err,
                                        "Failed serving data plane connection"
                                    );
                                }
                            },
                            ?remote_addr,
                            ?socket_addr
                        );
                    }
                    Err(err) => {
                        event!(Level::ERROR, ?err, "Failed to accept tcp connection");
                    }
                }
            },
            () = &mut shutdown => {
                event!(Level::WARN, %socket_addr, "Data plane stopped accepting");
                return Ok(());
            },
        }
    }
}

async fn inner_main(cfg: WorkdConfig) -> Result<(), Error> {
    let ip_allocator = SubnetIpAllocator::from_config(&cfg.ipam)
        .err_tip(|| "While configuring pod address allocation")?;
    let pool = Arc::new(PodPool::new(
        &cfg.pool,
        Arc::new(ip_allocator),
        Arc::new(HttpProxyLoader::new(&cfg.loader)),
    ));

    let sigterm = signal(SignalKind::terminate()).err_tip(|| "Failed to listen to SIGTERM")?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    background_spawn!("shutdown_signal", async move {
        wait_for_shutdown_signal(sigterm).await;
        shutdown_tx.send_replace(true);
    });

    event!(
        Level::WARN,
        version = env!("WORKD_APP_VERSION"),
        commit = env!("WORKD_GIT_COMMIT_HASH"),
        "Starting workd"
    );
    let router = Arc::new(DataPlaneRouter::new(pool.clone(), &cfg.data_plane));
    let image_server = ImageServer::new(pool.clone(), Arc::new(ImageStore::new()));
    try_join(
        serve_cri(
            cfg.cri.socket_path,
            CriServer::new(pool),
            image_server,
            shutdown_rx.clone(),
        ),
        serve_data_plane(cfg.data_plane, router, shutdown_rx),
    )
    .await?;
    event!(Level::WARN, "Successfully shut down workd");
    Ok(())
}

async fn get_config() -> Result<WorkdConfig, Box<dyn core::error::Error>> {
    let args = Args::parse();
    let json_contents = String::from_utf8(
        std::fs::read(&args.config_file)
            .err_tip(|| format!("Could not open config file {}", args.config_file))?,
    )?;
    Ok(serde_json5::from_str(&json_contents)?)
}

fn main() -> Result<(), Box<dyn core::error::Error>> {
    init_tracing()?;

    let cfg = futures::executor::block_on(get_config())?;

    #[allow(clippy::disallowed_methods)]
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime
            .block_on(inner_main(cfg).instrument(trace_span!("main")))
            .err_tip(|| "main() function failed")?;
    }
    Ok(())
}
