use clap::{Parser, Subcommand};

mod app;
mod auth;
mod config;
mod error;
mod extract;
mod images;
mod recipes;
mod state;
mod storage;

#[cfg(test)]
mod memory;

use anyhow::Context;
use validator::Validate;

use crate::{
    auth::{
        dto::CreateUserRequest,
        repo::{PgUserRepo, UserRepo},
        repo_types::User,
    },
    config::AppConfig,
    state::AppState,
};

#[derive(Parser)]
#[command(name = "recipe-api", version, about = "Recipe management API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Create an account with staff and superuser flags set.
    CreateSuperuser {
        #[arg(long, env = "SUPERUSER_EMAIL")]
        email: String,
        #[arg(long, env = "SUPERUSER_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, default_value = "")]
        name: String,
    },
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "recipe_api=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let config = AppConfig::from_env()?;
            let state = AppState::init(config).await?;
            let config = state.config.clone();
            let app = app::build_app(state);
            app::serve(app, &config).await?;
        }
        Command::CreateSuperuser {
            email,
            password,
            name,
        } => {
            // Only the database is needed here; storage and JWT settings are not read.
            let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
            let users = PgUserRepo::new(state::connect_db(&database_url).await?);
            let user = create_superuser(
                &users,
                CreateUserRequest {
                    email,
                    password,
                    name,
                },
            )
            .await?;
            tracing::info!(user_id = %user.id, email = %user.email, "superuser created");
        }
    }

    Ok(())
}

/// Applies the same field rules as `POST /user/create` before inserting.
async fn create_superuser(users: &dyn UserRepo, request: CreateUserRequest) -> anyhow::Result<User> {
    request.validate().context("invalid superuser details")?;
    let user =
        auth::services::create_superuser(users, &request.email, &request.password, &request.name).await?;
    Ok(user)
}
