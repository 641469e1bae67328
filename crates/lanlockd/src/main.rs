//! lanlockd - LAN exam proctoring coordinator
//!
//! This is the main entry point for the coordinator daemon.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization
//! - Exam engine (session state machine, roster, violations)
//! - Sandbox for student code submissions
//! - TCP server and event fan-out

use anyhow::{Context, Result};
use clap::Parser;
use lanlock_api::{
    Command, ErrorCode, ErrorInfo, Event, EventPayload, Response, ResponsePayload,
};
use lanlock_config::{load_config, Settings};
use lanlock_core::{CoreError, CoreEvent, ExamEngine, OpenLobbyParams};
use lanlock_net::{Audience, NetServer, Scope, ServerMessage};
use lanlock_sandbox::Sandbox;
use lanlock_store::{NewStudent, SqliteStore, Store};
use lanlock_util::{default_config_path, ConnId, StudentId};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// lanlockd - exam session coordinator for a proctored LAN
#[derive(Parser, Debug)]
#[command(name = "lanlockd")]
#[command(about = "Exam session coordinator for a proctored LAN", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/lanlock/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Bind address override (or set LANLOCK_BIND env var)
    #[arg(short, long, env = "LANLOCK_BIND")]
    bind: Option<SocketAddr>,

    /// Data directory override (or set LANLOCK_DATA_DIR env var)
    #[arg(short, long, env = "LANLOCK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Main service state
struct Service {
    settings: Settings,
    engine: Arc<ExamEngine>,
    sandbox: Arc<Sandbox>,
    server: Arc<NetServer>,
    store: Arc<dyn Store>,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        // Load configuration; a missing file means defaults, so the daemon
        // can run on a lab machine with zero setup
        let settings = if args.config.exists() {
            load_config(&args.config)
                .with_context(|| format!("Failed to load config from {:?}", args.config))?
        } else {
            info!(config_path = %args.config.display(), "No config file, using defaults");
            Settings::default()
        };

        let bind_addr = args.bind.unwrap_or(settings.server.bind_addr);
        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| settings.server.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join("lanlockd.db");
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );
        info!(db_path = %db_path.display(), "Store initialized");

        let engine = Arc::new(ExamEngine::new(store.clone())?);
        let sandbox = Arc::new(Sandbox::new(settings.sandbox.clone()));

        let mut server = NetServer::new(bind_addr);
        server.start().await?;

        Ok(Self {
            settings,
            engine,
            sandbox,
            server: Arc::new(server),
            store,
        })
    }

    async fn run(self) -> Result<()> {
        let mut messages = self
            .server
            .take_message_receiver()
            .await
            .context("Message receiver should be available")?;

        let accept = self.server.clone();
        tokio::spawn(async move {
            if let Err(e) = accept.run().await {
                error!(error = %e, "Server error");
            }
        });

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;

        // The stale sweep runs on the heartbeat cadence
        let mut sweep_timer = tokio::time::interval(self.settings.heartbeat.interval);

        info!(addr = %self.server.local_addr(), "Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }

                _ = sweep_timer.tick() => {
                    let now = lanlock_util::now();
                    match self.engine.sweep(self.settings.heartbeat.timeout, now) {
                        Ok(events) => self.publish(events),
                        Err(e) => warn!(error = %e, "Stale sweep failed"),
                    }
                }

                Some(msg) = messages.recv() => {
                    self.handle_message(msg).await;
                }
            }
        }

        // Clients render a "coordinator gone" screen on this; the session
        // record itself survives in the store for a restart
        self.server.push(Scope::All, Event::new(EventPayload::Shutdown));
        if !self.store.is_healthy() {
            warn!("Store unhealthy at shutdown");
        }

        info!("Shutdown complete");
        Ok(())
    }

    /// Fan engine events out to the audiences they concern
    fn publish(&self, events: Vec<CoreEvent>) {
        for event in events {
            match event {
                CoreEvent::SessionChanged(session) => {
                    self.server
                        .push(Scope::All, Event::new(EventPayload::SessionChanged(session)));
                }
                CoreEvent::RosterChanged(roster) => {
                    self.server
                        .push(Scope::Proctors, Event::new(EventPayload::RosterUpdate(roster)));
                }
                CoreEvent::ViolationLogged(violation) => {
                    self.server.push(
                        Scope::Proctors,
                        Event::new(EventPayload::ViolationAlert {
                            student_id: violation.student_id,
                            kind: violation.kind,
                            details: violation.details,
                            timestamp: violation.timestamp,
                        }),
                    );
                }
            }
        }
    }

    async fn handle_message(&self, msg: ServerMessage) {
        match msg {
            ServerMessage::Request { conn_id, request } => {
                if let Some(response) = self
                    .handle_command(conn_id, request.request_id, request.command)
                    .await
                {
                    let _ = self.server.send_response(&conn_id, response).await;
                }
            }

            ServerMessage::Connected { conn_id, addr } => {
                debug!(conn_id = %conn_id, addr = %addr, "Connection opened");
            }

            ServerMessage::Disconnected { conn_id, audience } => {
                debug!(conn_id = %conn_id, "Connection closed");
                if let Audience::Student(id) = audience {
                    match self.engine.disconnect(&id) {
                        Ok(events) => self.publish(events),
                        Err(e) => warn!(student_id = %id, error = %e, "Disconnect handling failed"),
                    }
                }
            }
        }
    }

    /// Dispatch one command. Returns `None` when a spawned task owns the
    /// response (sandbox jobs answer from their own task so a compile does
    /// not stall the daemon loop).
    async fn handle_command(
        &self,
        conn_id: ConnId,
        request_id: u64,
        command: Command,
    ) -> Option<Response> {
        let now = lanlock_util::now();

        let response = match command {
            // Shared surface

            Command::Ping => Response::success(request_id, ResponsePayload::Pong),

            Command::GetSession => match self.engine.session() {
                Ok(session) => {
                    Response::success(request_id, ResponsePayload::Session(session))
                }
                Err(e) => error_response(request_id, e),
            },

            // Student surface

            Command::Connect {
                student_id,
                name,
                password,
                display_count,
                displays,
            } => {
                if displays.is_some() {
                    debug!(student_id = %student_id, "Display metadata attached to connect");
                }
                let address = self
                    .server
                    .peer_addr(&conn_id)
                    .await
                    .map(|a| a.to_string())
                    .unwrap_or_default();
                let student = NewStudent {
                    id: student_id.clone(),
                    name,
                    address,
                };
                match self
                    .engine
                    .connect(student, password.as_deref(), display_count, now)
                {
                    Ok((session, events)) => {
                        self.server.bind_student(&conn_id, student_id).await;
                        self.publish(events);
                        Response::success(request_id, ResponsePayload::Connected { session })
                    }
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::Heartbeat { focused } => {
                let id = match self.student_binding(&conn_id).await {
                    Ok(id) => id,
                    Err(response) => return Some(respond(request_id, response)),
                };
                match self.engine.heartbeat(&id, focused, now) {
                    Ok(events) => {
                        self.publish(events);
                        Response::success(request_id, ResponsePayload::Ack)
                    }
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::FocusChanged { focused } => {
                let id = match self.student_binding(&conn_id).await {
                    Ok(id) => id,
                    Err(response) => return Some(respond(request_id, response)),
                };
                match self.engine.focus_changed(&id, focused, now) {
                    Ok(events) => {
                        self.publish(events);
                        Response::success(request_id, ResponsePayload::Ack)
                    }
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::ExitRequest { reason } => {
                let id = match self.student_binding(&conn_id).await {
                    Ok(id) => id,
                    Err(response) => return Some(respond(request_id, response)),
                };
                let name = match self.engine.student(&id) {
                    Ok(Some(row)) => row.name,
                    Ok(None) => {
                        return Some(error_response(request_id, CoreError::NotRegistered(id)))
                    }
                    Err(e) => return Some(error_response(request_id, e)),
                };
                info!(student_id = %id, "Exit requested");
                self.server.push(
                    Scope::Proctors,
                    Event::new(EventPayload::ExitRequested {
                        student_id: id,
                        student_name: name,
                        reason,
                        requested_at: now,
                    }),
                );
                Response::success(request_id, ResponsePayload::Ack)
            }

            Command::SaveAnswer { question_id, value } => {
                let id = match self.student_binding(&conn_id).await {
                    Ok(id) => id,
                    Err(response) => return Some(respond(request_id, response)),
                };
                match self.engine.save_answer(&id, &question_id, &value, now) {
                    Ok(()) => Response::success(request_id, ResponsePayload::Ack),
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::SaveAnswers { answers } => {
                let id = match self.student_binding(&conn_id).await {
                    Ok(id) => id,
                    Err(response) => return Some(respond(request_id, response)),
                };
                match self.engine.save_answers(&id, &answers, now) {
                    Ok(()) => Response::success(request_id, ResponsePayload::Ack),
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::GetAnswers => {
                let id = match self.student_binding(&conn_id).await {
                    Ok(id) => id,
                    Err(response) => return Some(respond(request_id, response)),
                };
                match self.engine.answers_for(&id) {
                    Ok(answers) => {
                        Response::success(request_id, ResponsePayload::Answers(answers))
                    }
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::SubmitExam => {
                let id = match self.student_binding(&conn_id).await {
                    Ok(id) => id,
                    Err(response) => return Some(respond(request_id, response)),
                };
                match self.engine.submit(&id, now) {
                    Ok(events) => {
                        self.publish(events);
                        Response::success(request_id, ResponsePayload::Ack)
                    }
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::RunCode {
                language,
                source,
                stdin,
            } => {
                if let Err(response) = self.student_binding(&conn_id).await {
                    return Some(respond(request_id, response));
                }
                let sandbox = self.sandbox.clone();
                let server = self.server.clone();
                tokio::spawn(async move {
                    let response = match sandbox.run(language, &source, &stdin).await {
                        Ok(report) => {
                            Response::success(request_id, ResponsePayload::Run(report))
                        }
                        Err(e) => {
                            error!(error = %e, "Sandbox run failed");
                            Response::error(
                                request_id,
                                ErrorInfo::new(ErrorCode::InternalError, e.to_string()),
                            )
                        }
                    };
                    let _ = server.send_response(&conn_id, response).await;
                });
                return None;
            }

            Command::RunTests {
                language,
                source,
                cases,
            } => {
                if let Err(response) = self.student_binding(&conn_id).await {
                    return Some(respond(request_id, response));
                }
                let sandbox = self.sandbox.clone();
                let server = self.server.clone();
                tokio::spawn(async move {
                    let response = match sandbox.run_tests(language, &source, &cases).await {
                        Ok(report) => {
                            Response::success(request_id, ResponsePayload::TestRun(report))
                        }
                        Err(e) => {
                            error!(error = %e, "Sandbox test run failed");
                            Response::error(
                                request_id,
                                ErrorInfo::new(ErrorCode::InternalError, e.to_string()),
                            )
                        }
                    };
                    let _ = server.send_response(&conn_id, response).await;
                });
                return None;
            }

            // Proctor surface

            Command::ProctorConnect => {
                self.server.bind_proctor(&conn_id).await;
                info!(conn_id = %conn_id, "Proctor connected");
                match self.engine.session() {
                    Ok(session) => {
                        Response::success(request_id, ResponsePayload::Session(session))
                    }
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::OpenLobby {
                title,
                rules,
                exit_code,
                reg_password,
                eligible_ids,
            } => {
                if let Err(response) = self.proctor_binding(&conn_id).await {
                    return Some(respond(request_id, response));
                }
                let params = OpenLobbyParams {
                    title,
                    rules,
                    exit_code,
                    reg_password,
                    eligible_ids,
                };
                match self.engine.open_lobby(params, now) {
                    Ok((session, events)) => {
                        self.publish(events);
                        Response::success(request_id, ResponsePayload::Session(session))
                    }
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::StartExam { duration_minutes } => {
                if let Err(response) = self.proctor_binding(&conn_id).await {
                    return Some(respond(request_id, response));
                }
                match self.engine.start_exam(duration_minutes, now) {
                    Ok((session, events)) => {
                        self.publish(events);
                        Response::success(request_id, ResponsePayload::Session(session))
                    }
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::StopExam => {
                if let Err(response) = self.proctor_binding(&conn_id).await {
                    return Some(respond(request_id, response));
                }
                match self.engine.stop_exam(now) {
                    Ok((session, events)) => {
                        self.publish(events);
                        Response::success(request_id, ResponsePayload::Session(session))
                    }
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::ResetExam => {
                if let Err(response) = self.proctor_binding(&conn_id).await {
                    return Some(respond(request_id, response));
                }
                match self.engine.reset() {
                    Ok((session, events)) => {
                        self.publish(events);
                        Response::success(request_id, ResponsePayload::Session(session))
                    }
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::GetRoster => {
                if let Err(response) = self.proctor_binding(&conn_id).await {
                    return Some(respond(request_id, response));
                }
                match self.engine.roster() {
                    Ok(roster) => Response::success(request_id, ResponsePayload::Roster(roster)),
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::GetViolations { student_id } => {
                if let Err(response) = self.proctor_binding(&conn_id).await {
                    return Some(respond(request_id, response));
                }
                match self.engine.violations(student_id.as_ref()) {
                    Ok(violations) => {
                        Response::success(request_id, ResponsePayload::Violations(violations))
                    }
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::GetResults => {
                if let Err(response) = self.proctor_binding(&conn_id).await {
                    return Some(respond(request_id, response));
                }
                match self.engine.results() {
                    Ok(results) => {
                        Response::success(request_id, ResponsePayload::Results(results))
                    }
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::ExitApprove { student_id } => {
                if let Err(response) = self.proctor_binding(&conn_id).await {
                    return Some(respond(request_id, response));
                }
                info!(student_id = %student_id, "Exit approved");
                self.server.push(
                    Scope::Student(student_id.clone()),
                    Event::new(EventPayload::ExitDecision {
                        student_id,
                        approved: true,
                    }),
                );
                Response::success(request_id, ResponsePayload::Ack)
            }

            Command::ExitDeny { student_id } => {
                if let Err(response) = self.proctor_binding(&conn_id).await {
                    return Some(respond(request_id, response));
                }
                info!(student_id = %student_id, "Exit denied");
                self.server.push(
                    Scope::Student(student_id.clone()),
                    Event::new(EventPayload::ExitDecision {
                        student_id,
                        approved: false,
                    }),
                );
                Response::success(request_id, ResponsePayload::Ack)
            }
        };

        Some(response)
    }

    /// Resolve the student identity this connection is bound to
    async fn student_binding(&self, conn_id: &ConnId) -> Result<StudentId, ErrorInfo> {
        match self.server.audience_of(conn_id).await {
            Some(Audience::Student(id)) => Ok(id),
            _ => Err(ErrorInfo::new(
                ErrorCode::NotRegistered,
                "Connection is not bound to a student; send connect first",
            )),
        }
    }

    /// Require this connection to be bound as a proctor
    async fn proctor_binding(&self, conn_id: &ConnId) -> Result<(), ErrorInfo> {
        match self.server.audience_of(conn_id).await {
            Some(Audience::Proctor) => Ok(()),
            _ => Err(ErrorInfo::new(
                ErrorCode::InvalidRequest,
                "Proctor binding required; send proctor_connect first",
            )),
        }
    }
}

fn respond(request_id: u64, error: ErrorInfo) -> Response {
    Response::error(request_id, error)
}

fn error_response(request_id: u64, err: CoreError) -> Response {
    let code = match &err {
        CoreError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
        CoreError::InvalidDuration(_) => ErrorCode::InvalidRequest,
        CoreError::NotEligible(_) => ErrorCode::NotEligible,
        CoreError::BadCredential => ErrorCode::BadCredential,
        CoreError::NotRegistered(_) => ErrorCode::NotRegistered,
        CoreError::Store(_) => ErrorCode::StorageError,
    };
    Response::error(request_id, ErrorInfo::new(code, err.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "lanlockd starting");

    let service = Service::new(&args).await?;
    service.run().await
}
