use std::io::{self, Write};

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use case_api::auth::config::PasswordCost;
use case_api::auth::passwords::PasswordService;
use case_api::auth::routes::is_valid_email;
use case_api::db::ensure_schema;

#[derive(Parser, Debug)]
#[command(
    name = "create_user",
    about = "Create a Case API account, including admins that cannot self-register"
)]
struct Args {
    /// Username for the account; together with the email it identifies the account.
    #[arg(long)]
    username: String,

    /// Email address for the account.
    #[arg(long)]
    email: String,

    /// Plaintext password to hash and store for this user.
    #[arg(long)]
    password: String,

    /// Role to assign (`user` or `admin`).
    #[arg(long, default_value = "user")]
    role: String,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    let username = args.username.trim();
    let email = args.email.trim();

    if username.is_empty() {
        writeln!(io::stderr(), "error: username must not be empty")?;
        std::process::exit(1);
    }
    if !is_valid_email(email) {
        writeln!(io::stderr(), "error: '{email}' is not a valid email")?;
        std::process::exit(1);
    }

    let role = match args.role.trim().to_lowercase().as_str() {
        "admin" => "admin",
        "user" => "user",
        other => {
            writeln!(
                io::stderr(),
                "error: unsupported role '{other}'. Use 'user' or 'admin'."
            )?;
            std::process::exit(1);
        }
    };

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;
    ensure_schema(&pool).await?;

    let defaults = PasswordCost::default();
    let password_service = PasswordService::with_cost(PasswordCost {
        m_cost_kib: env_or("CASE_ARGON2_M_COST_KIB", defaults.m_cost_kib),
        t_cost: env_or("CASE_ARGON2_T_COST", defaults.t_cost),
        p_cost: env_or("CASE_ARGON2_P_COST", defaults.p_cost),
    })?;
    let password_hash = password_service.hash_password(&args.password)?;

    let mut tx = pool.begin().await?;

    let user_id: Option<i32> = sqlx::query_scalar(
        "INSERT INTO users (username, email, password, role) VALUES ($1, $2, $3, $4) \
         ON CONFLICT (username, email) DO NOTHING RETURNING id",
    )
    .bind(username)
    .bind(email)
    .bind(&password_hash)
    .bind(role)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(user_id) = user_id else {
        writeln!(
            io::stderr(),
            "error: user '{username}' with email '{email}' already exists."
        )?;
        std::process::exit(1);
    };

    sqlx::query("INSERT INTO existents (username, email) VALUES ($1, $2) ON CONFLICT DO NOTHING")
        .bind(username)
        .bind(email)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    println!("Created {role} user '{username}' <{email}> with id {user_id}");
    Ok(())
}
