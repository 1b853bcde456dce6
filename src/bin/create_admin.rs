use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use study_server::{
    config::Config,
    server::Server,
    user::{Role, SignupRequest, create_user, find_by_email, set_role},
    utils::init_log,
};

/// Create an administrator, or promote an existing account.
#[derive(Debug, Parser)]
struct Args {
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long)]
    database: Option<PathBuf>,
    #[arg(short, long)]
    email: String,
    /// Used only when the account does not exist yet
    #[arg(short, long)]
    username: Option<String>,
    /// Falls back to the ADMIN_PASSWORD environment variable
    #[arg(short, long)]
    password: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = init_log(None)?;
    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(database) = args.database {
        config.database = database;
    }
    let server = Server::connect(config).await?;
    let db = &server.database;

    let profile = match find_by_email(db, &args.email).await? {
        Some(profile) => set_role(db, profile.id, Role::Admin).await?,
        None => {
            let password = match args.password {
                Some(password) => password,
                None => dotenvy::var("ADMIN_PASSWORD")
                    .context("new account needs --password or ADMIN_PASSWORD")?,
            };
            let username = args
                .username
                .or_else(|| args.email.split('@').next().map(str::to_string))
                .context("cannot derive a username from the email")?;
            let req = SignupRequest {
                email: args.email.clone(),
                password,
                username,
                display_name: None,
            };
            create_user(db, req, Role::Admin).await?
        }
    };
    println!("{} ({}) is an administrator", profile.username, profile.email);
    Ok(())
}
