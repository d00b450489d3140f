use clap::Parser;
use miette::{IntoDiagnostic, Result};
use penumbra::{settings, storage, web};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "penumbra",
    version,
    about = "Rule-based authorization service"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // init storage (database)
    let db = storage::init(&settings.database).await?;

    // ensure the bootstrap admin exists
    ensure_admin(&db).await?;

    // Expired sessions are already rejected on read; this just reclaims the rows
    match storage::cleanup_expired_sessions(&db).await {
        Ok(removed) if removed > 0 => tracing::info!(removed, "Removed expired sessions"),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Expired-session cleanup failed"),
    }

    // start web server
    web::serve(settings, db).await?;
    Ok(())
}

/// Seed an empty database so the service is usable out of the box: an
/// `admin` role carrying a manage-all rule, and an `admin` user holding it.
async fn ensure_admin(db: &sea_orm::DatabaseConnection) -> Result<()> {
    let role = match storage::get_role_by_name(db, "admin")
        .await
        .into_diagnostic()?
    {
        Some(role) => role,
        None => {
            let role = storage::create_role(db, "admin", Some("Full access".to_string()), 100)
                .await
                .into_diagnostic()?;
            storage::add_role_rule(db, &role.id, "manage", "all", None, false)
                .await
                .into_diagnostic()?;
            tracing::info!("Created admin role with a manage-all rule");
            role
        }
    };

    if storage::get_user_by_username(db, "admin")
        .await
        .into_diagnostic()?
        .is_none()
    {
        let user = storage::create_user(
            db,
            "admin",
            "password123",
            Some("admin@example.com".to_string()),
        )
        .await
        .into_diagnostic()?;
        storage::assign_role(db, &user.subject, &role.id)
            .await
            .into_diagnostic()?;
        tracing::info!("Created default admin user (username: admin, password: password123)");
    }
    Ok(())
}
