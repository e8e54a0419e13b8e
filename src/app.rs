//! Application wiring and lifecycle.
//!
//! `App::new` is a configuration-driven dependency injector: database,
//! stores, queues, the accrual client and the five pipeline stages. `run`
//! supervises the stages, the HTTP server and the signal handlers, and
//! unwinds everything on the first fatal error or suspend signal.

use crate::accrual::response::AccrualResponse;
use crate::accrual::retriever::{self, Retriever};
use crate::accrual::router::Router as StatusRouter;
use crate::accrual::writer::{self, InvalidWriter, ProcessedWriter, ProcessingWriter, processing};
use crate::accrual::{AccrualClient, ClientConfig, QUEUE_CAPACITY};
use crate::api::{self, AppState};
use crate::auth::AuthService;
use crate::config::Config;
use crate::models::OrderId;
use crate::profile;
use crate::queue::Queue;
use crate::store::{Database, OrderStore, UserStore, WithdrawalStore};
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct App {
    config: Config,
    state: AppState,
    retriever: Retriever<AccrualClient>,
    router: StatusRouter,
    processing_writer: ProcessingWriter<OrderStore>,
    invalid_writer: InvalidWriter<OrderStore>,
    processed_writer: ProcessedWriter<OrderStore>,
}

impl App {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let database = Database::connect(&config.database_uri)
            .await
            .context("can't connect to the database")?;
        database.migrate().await.context("can't apply migrations")?;

        let pool = database.pool().clone();
        let orders = OrderStore::new(pool.clone());
        let users = UserStore::new(pool.clone());
        let withdrawals = WithdrawalStore::new(pool);

        let auth = Arc::new(AuthService::new(users.clone(), config.app_secret.clone()));

        let order_queue: Queue<OrderId> = Queue::new(QUEUE_CAPACITY);
        let router_queue: Queue<AccrualResponse> = Queue::new(QUEUE_CAPACITY);
        let processing_queue: Queue<AccrualResponse> = Queue::new(QUEUE_CAPACITY);
        let invalid_queue: Queue<AccrualResponse> = Queue::new(QUEUE_CAPACITY);
        let processed_queue: Queue<AccrualResponse> = Queue::new(QUEUE_CAPACITY);

        // Recovery: orders still in a non-terminal status are rediscovered
        // from the database and queued before any stage starts.
        let unprocessed = orders
            .find_unprocessed_ids()
            .await
            .context("can't recover unprocessed orders")?;
        info!(count = unprocessed.len(), "recovered unprocessed orders");
        for order_id in unprocessed {
            order_queue.push(order_id).await;
        }

        let client = Arc::new(
            AccrualClient::new(ClientConfig::new(config.accrual_address.clone()))
                .context("can't build the accrual client")?,
        );
        let order_store = Arc::new(orders.clone());

        let retriever = Retriever::new(
            client,
            order_queue.clone(),
            router_queue.clone(),
            retriever::Config {
                concurrency: config.retriever_concurrency,
                ..retriever::Config::default()
            },
        );

        let router = StatusRouter::new(
            order_queue.clone(),
            router_queue,
            processing_queue.clone(),
            invalid_queue.clone(),
            processed_queue.clone(),
            config.router_concurrency,
        );

        let processing_writer = ProcessingWriter::new(
            order_queue.clone(),
            processing_queue,
            Arc::clone(&order_store),
            processing::Config {
                concurrency: config.processing_concurrency,
                batch_size: config.update_batch_size,
                ..processing::Config::default()
            },
        );

        let invalid_writer = InvalidWriter::new(
            invalid_queue,
            Arc::clone(&order_store),
            writer::Config {
                concurrency: config.invalid_concurrency,
                batch_size: config.update_batch_size,
                ..writer::Config::default()
            },
        );

        let processed_writer = ProcessedWriter::new(
            processed_queue,
            order_store,
            writer::Config {
                concurrency: config.processed_concurrency,
                batch_size: config.update_batch_size,
                ..writer::Config::default()
            },
        );

        let state = AppState {
            auth,
            orders,
            users,
            withdrawals,
            order_queue,
        };

        Ok(Self {
            config,
            state,
            retriever,
            router,
            processing_writer,
            invalid_writer,
            processed_writer,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            config,
            state,
            retriever,
            router,
            processing_writer,
            invalid_writer,
            processed_writer,
        } = self;

        let cancel = CancellationToken::new();

        let listener = tokio::net::TcpListener::bind(&config.run_address)
            .await
            .with_context(|| format!("can't bind {}", config.run_address))?;
        info!(address = %config.run_address, "HTTP server listening");

        let mut server = {
            let cancel = cancel.clone();
            let app = api::router(state);
            tokio::spawn(async move {
                let shutdown = {
                    let cancel = cancel.clone();
                    async move { cancel.cancelled().await }
                };
                if let Err(err) = axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown)
                    .await
                {
                    error!(error = %err, "server error");
                    cancel.cancel();
                }
            })
        };

        let mut stages: JoinSet<anyhow::Result<()>> = JoinSet::new();
        {
            let cancel = cancel.clone();
            stages.spawn(async move { retriever.run(cancel).await.context("retriever stage") });
        }
        {
            let cancel = cancel.clone();
            stages.spawn(async move { router.run(cancel).await.context("router stage") });
        }
        {
            let cancel = cancel.clone();
            stages.spawn(async move {
                processing_writer
                    .run(cancel)
                    .await
                    .context("processing writer stage")
            });
        }
        {
            let cancel = cancel.clone();
            stages.spawn(async move {
                invalid_writer
                    .run(cancel)
                    .await
                    .context("invalid writer stage")
            });
        }
        {
            let cancel = cancel.clone();
            stages.spawn(async move {
                processed_writer
                    .run(cancel)
                    .await
                    .context("processed writer stage")
            });
        }

        let signals = tokio::spawn(watch_signals(
            cancel.clone(),
            PathBuf::from(config.cpu_profile_file.clone()),
            config.cpu_profile_duration(),
        ));

        // Error sink: the first stage error cancels the shared token; every
        // other stage observes it and exits after its in-flight activation.
        let mut failure: Option<anyhow::Error> = None;
        while let Some(finished) = stages.join_next().await {
            match finished {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(error = %err, "stage failed, shutting down");
                    failure.get_or_insert(err);
                    cancel.cancel();
                }
                Err(err) => {
                    error!(error = %err, "stage panicked, shutting down");
                    failure.get_or_insert(err.into());
                    cancel.cancel();
                }
            }
        }

        info!("trying to shutdown server gracefully");
        match tokio::time::timeout(config.shutdown_timeout(), &mut server).await {
            Ok(Ok(())) => info!("server was shutdown successfully"),
            Ok(Err(err)) => error!(error = %err, "server task failed"),
            Err(_) => {
                warn!("server drain exceeded the shutdown timeout");
                server.abort();
            }
        }

        let _ = signals.await;

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Suspend signals cancel the shared token; SIGUSR1 captures a CPU profile.
async fn watch_signals(
    cancel: CancellationToken,
    profile_path: PathBuf,
    profile_duration: Duration,
) {
    let outcome = async {
        let mut hangup = signal(SignalKind::hangup())?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut quit = signal(SignalKind::quit())?;
        let mut user_defined1 = signal(SignalKind::user_defined1())?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return std::io::Result::Ok(false),
                _ = hangup.recv() => return Ok(true),
                _ = interrupt.recv() => return Ok(true),
                _ = terminate.recv() => return Ok(true),
                _ = quit.recv() => return Ok(true),
                _ = user_defined1.recv() => {
                    info!("SIGUSR1 received, starting CPU profile capture");
                    // Capture in the background so suspend signals stay responsive.
                    let path = profile_path.clone();
                    tokio::spawn(async move {
                        match profile::capture_cpu(&path, profile_duration).await {
                            Ok(()) => info!(path = %path.display(), "CPU profile capture finished"),
                            Err(err) => warn!(error = %err, "CPU profile capture failed"),
                        }
                    });
                }
            }
        }
    }
    .await;

    match outcome {
        Ok(true) => {
            info!("received suspend signal");
            cancel.cancel();
        }
        Ok(false) => {}
        Err(err) => {
            error!(error = %err, "can't register signal handlers");
            cancel.cancel();
        }
    }
}
