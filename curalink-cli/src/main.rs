//! Curalink CLI
//!
//! Development harness for the Curalink client core: sign in, inspect
//! stored sessions, and send requests through the authenticated
//! pipeline from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Sign in with email and password
//! curalink login amira@example.com --password secret
//!
//! # Show the stored sessions for both roles
//! curalink status
//!
//! # Send an authenticated request through the pipeline
//! curalink request GET /appointments
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use curalink_core::{
    create_store, ApiConfig, ConnectivityMonitor, RequestContext, RequestExecutor, Role,
    SessionManager, TokenStore, UserProfile,
};
use tracing_subscriber::{fmt, EnvFilter};

mod config;

#[derive(Parser)]
#[command(name = "curalink")]
#[command(about = "Development harness for the Curalink client core")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        /// Email address of the account
        email: String,

        /// Account password
        #[arg(short, long)]
        password: String,
    },

    /// Complete an email one-time-code sign-in
    VerifyOtp {
        /// Email address the code was sent to
        email: String,

        /// One-time code from the email
        code: String,
    },

    /// Show the stored sessions for both roles
    Status,

    /// Force a token refresh
    Refresh {
        /// Role to refresh (patient, doctor); defaults to the active role
        role: Option<String>,
    },

    /// Send a request through the authenticated pipeline
    Request {
        /// HTTP method (GET, POST, PUT, DELETE)
        method: String,

        /// Absolute path on the backend, e.g. /appointments
        path: String,

        /// JSON body to send
        #[arg(short, long)]
        data: Option<String>,

        /// Send without authentication
        #[arg(long)]
        public: bool,

        /// Role to run as (patient, doctor)
        #[arg(short, long)]
        role: Option<String>,
    },

    /// Check whether the backend is reachable
    Probe,

    /// Discard stored credentials
    Logout {
        /// Role to log out (patient, doctor); defaults to the active role
        role: Option<String>,

        /// Log out both roles
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (api_config, config_path) = config::load_config(cli.config)?;
    tracing::debug!(path = ?config_path, "loaded configuration");

    let app = App::new(api_config)?;

    match cli.command {
        Commands::Login { email, password } => app.login(&email, &password).await,
        Commands::VerifyOtp { email, code } => app.verify_otp(&email, &code).await,
        Commands::Status => app.status().await,
        Commands::Refresh { role } => app.refresh(role.as_deref()).await,
        Commands::Request {
            method,
            path,
            data,
            public,
            role,
        } => {
            app.request(&method, &path, data.as_deref(), public, role.as_deref())
                .await
        }
        Commands::Probe => app.probe().await,
        Commands::Logout { role, all } => app.logout(role.as_deref(), all).await,
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();
}

/// Everything a command needs, wired once per invocation.
struct App {
    config: Arc<ApiConfig>,
    store: Arc<dyn TokenStore>,
    session: SessionManager,
    executor: RequestExecutor,
}

impl App {
    fn new(config: ApiConfig) -> Result<Self> {
        let config = Arc::new(config);
        let store = create_store(true);
        let session = SessionManager::new(config.clone(), store.clone())?;
        let monitor = Arc::new(ConnectivityMonitor::new(config.clone())?);
        let executor = RequestExecutor::new(config.clone(), session.clone(), monitor)?;
        Ok(Self {
            config,
            store,
            session,
            executor,
        })
    }

    async fn login(&self, email: &str, password: &str) -> Result<()> {
        let profile = self.session.login_with_password(email, password).await?;
        self.report_signed_in(&profile);
        Ok(())
    }

    async fn verify_otp(&self, email: &str, code: &str) -> Result<()> {
        let profile = self.session.login_with_otp(email, code).await?;
        self.report_signed_in(&profile);
        Ok(())
    }

    fn report_signed_in(&self, profile: &UserProfile) {
        let name = profile.full_name.as_deref().unwrap_or(&profile.email);
        println!("Signed in as {} ({})", name, self.session.active_role());
    }

    async fn status(&self) -> Result<()> {
        println!("Sessions ({}):", self.config.environment);
        for role in Role::ALL {
            let marker = if role == self.session.active_role() {
                "*"
            } else {
                " "
            };
            match self.store.get(role).await? {
                Some(record) => {
                    let expiry = match record.expires_at {
                        Some(at) if at > Utc::now() => {
                            format!("expires in {}", format_duration(at - Utc::now()))
                        }
                        Some(_) => "expired".to_string(),
                        None => "expiry unknown".to_string(),
                    };
                    let refresh = if record.has_refresh_token() {
                        "refresh token stored"
                    } else {
                        "no refresh token"
                    };
                    println!("{marker} {role}: {expiry}, {refresh}");
                }
                None => println!("{marker} {role}: signed out"),
            }
        }
        Ok(())
    }

    async fn refresh(&self, role: Option<&str>) -> Result<()> {
        let role = self.parse_role_or_active(role)?;
        let record = self.session.refresh(role).await?;
        match record.expires_at {
            Some(at) => println!(
                "Refreshed {} token, expires in {}",
                role,
                format_duration(at - Utc::now())
            ),
            None => println!("Refreshed {role} token"),
        }
        Ok(())
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        data: Option<&str>,
        public: bool,
        role: Option<&str>,
    ) -> Result<()> {
        let mut ctx = match method.to_ascii_uppercase().as_str() {
            "GET" => RequestContext::get(path),
            "POST" => RequestContext::post(path),
            "PUT" => RequestContext::put(path),
            "DELETE" => RequestContext::delete(path),
            other => bail!("unsupported method: {other}"),
        };
        if let Some(data) = data {
            let payload: serde_json::Value =
                serde_json::from_str(data).context("--data is not valid JSON")?;
            ctx = ctx.json(&payload)?;
        }
        if public {
            ctx = ctx.public();
        }
        if let Some(role) = role {
            ctx = ctx.for_role(parse_role(role)?);
        }

        let body = self.executor.execute(ctx).await?;
        match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
            Err(_) => println!("{}", String::from_utf8_lossy(&body)),
        }
        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        let ctx = RequestContext::get(self.config.health_path.clone()).public();
        match self.executor.execute(ctx).await {
            Ok(_) => println!("Backend is reachable"),
            Err(err) => {
                println!("Backend is unreachable: {err}");
                self.executor.monitor().stop();
                return Ok(());
            }
        }

        // With a stored session, also exercise the authenticated path.
        let role = self.session.active_role();
        if self.store.get(role).await?.is_some() {
            match self.session.ensure_authenticated(role).await {
                Ok(()) => println!("Stored {role} session is usable"),
                Err(err) => println!("Stored {role} session is not usable: {err}"),
            }
        }
        Ok(())
    }

    async fn logout(&self, role: Option<&str>, all: bool) -> Result<()> {
        if all {
            self.session.reset().await?;
            println!("Signed out everywhere");
            return Ok(());
        }
        let role = self.parse_role_or_active(role)?;
        self.session.logout(role).await?;
        println!("Signed out {role}");
        Ok(())
    }

    fn parse_role_or_active(&self, role: Option<&str>) -> Result<Role> {
        match role {
            Some(value) => parse_role(value),
            None => Ok(self.session.active_role()),
        }
    }
}

fn parse_role(value: &str) -> Result<Role> {
    value.parse().map_err(|e: String| anyhow::anyhow!(e))
}

fn format_duration(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    if secs >= 3_600 {
        format!("{}h{:02}m", secs / 3_600, (secs % 3_600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}
