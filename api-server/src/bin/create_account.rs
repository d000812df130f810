use std::io::{self, Write};

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use mailflow_api::auth::{AuthConfig, JwtService};

#[derive(Parser, Debug)]
#[command(
    name = "create_account",
    about = "Create a mailflow account and print an access token for it"
)]
struct Args {
    /// Email address for the account (case insensitive).
    #[arg(long)]
    email: String,

    /// Optional display name to associate with the account.
    #[arg(long)]
    display_name: Option<String>,

    /// Issue a token for an existing account instead of failing.
    #[arg(long)]
    reuse: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    let email = args.email.trim().to_lowercase();

    if !email.contains('@') {
        writeln!(io::stderr(), "error: email must contain '@'")?;
        std::process::exit(1);
    }

    let auth_config = AuthConfig::from_env()?;
    let jwt = JwtService::from_config(&auth_config)?;

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;

    let existing: Option<(i32, i32)> = sqlx::query_as(
        "SELECT id, token_version FROM users WHERE lower(email) = lower($1)",
    )
    .bind(&email)
    .fetch_optional(&pool)
    .await?;

    let (user_id, token_version) = match existing {
        Some(found) if args.reuse => found,
        Some(_) => {
            writeln!(
                io::stderr(),
                "error: an account with email '{email}' already exists (use --reuse)."
            )?;
            std::process::exit(1);
        }
        None => {
            sqlx::query_as::<_, (i32, i32)>(
                "INSERT INTO users (email, display_name) VALUES ($1, $2) RETURNING id, token_version",
            )
            .bind(&email)
            .bind(args.display_name.as_deref())
            .fetch_one(&pool)
            .await?
        }
    };

    let token = jwt.issue_access_token(user_id, &email, token_version)?;

    log::info!("account {} ready for {}", user_id, email);
    println!("user_id={user_id}");
    println!("expires_at={}", token.expires_at.to_rfc3339());
    println!("token={}", token.token);

    Ok(())
}
