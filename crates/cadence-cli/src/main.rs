mod config;
mod daemon;
mod scan_cmd;
mod serve_cmd;
mod status_cmd;
mod trigger_cmd;

use clap::{Parser, Subcommand};

use cadence_db::pool;

use config::CadenceConfig;

#[derive(Parser)]
#[command(name = "cadence", about = "Advances periodized training plans one week at a time")]
struct Cli {
    /// Database URL (overrides CADENCE_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Generator program (overrides CADENCE_GENERATOR env var)
    #[arg(long, global = true)]
    generator: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a cadence config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/cadence")]
        db_url: String,
        /// Program that generates one week of plan content
        #[arg(long)]
        generator_command: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the cadence database (requires config file or env vars)
    DbInit,
    /// Generate the next week of every plan that is behind schedule
    Scan {
        /// List the plans that are behind without generating anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Generate a plan's next week now, regardless of the calendar
    Trigger {
        /// Plan ID
        plan_id: String,
    },
    /// Mark abandoned generation leases as failed
    Sweep,
    /// Show a plan's position, leases and archived weeks
    Status {
        /// Plan ID
        plan_id: String,
    },
    /// Run scheduled scans and sweeps until interrupted
    Run,
    /// Run the scheduler with an HTTP trigger API
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8470)]
        port: u16,
    },
}

/// Execute the `cadence init` command: write config file.
fn cmd_init(db_url: &str, generator_command: Option<String>, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: Some(db_url.to_string()),
            max_connections: None,
        },
        generator: config::GeneratorSection {
            command: generator_command.clone(),
            args: Vec::new(),
        },
        ..config::ConfigFile::default()
    };

    config::save_config_to(&cfg, &path)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    match generator_command {
        Some(command) => println!("  generator.command = {command}"),
        None => println!("  generator.command is unset; add it before `cadence run`"),
    }
    println!();
    println!("Next: run `cadence db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `cadence db-init` command: create database and run migrations.
async fn cmd_db_init(resolved: &CadenceConfig) -> anyhow::Result<()> {
    println!("Initializing cadence database...");

    if pool::ensure_database_exists(&resolved.db_config).await? {
        println!("Created database {}", resolved.db_config.database_url);
    }
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table:<18} {count} rows");
    }

    db_pool.close().await;

    println!("cadence db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let Cli {
        database_url,
        generator,
        command,
    } = Cli::parse();
    let resolve = || CadenceConfig::resolve(database_url.as_deref(), generator.as_deref());

    match command {
        Commands::Init {
            db_url,
            generator_command,
            force,
        } => {
            cmd_init(&db_url, generator_command, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(&resolve()?).await?;
        }
        Commands::Status { plan_id } => {
            let resolved = resolve()?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = status_cmd::run_status(&db_pool, &plan_id).await;
            db_pool.close().await;
            result?;
        }
        Commands::Scan { dry_run } => {
            let resolved = resolve()?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = if dry_run {
                scan_cmd::run_dry_scan(&daemon::build_scanner(db_pool.clone())).await
            } else {
                match daemon::build_scheduler(&resolved, db_pool.clone()) {
                    Ok(scheduler) => scan_cmd::run_scan(&scheduler).await,
                    Err(e) => Err(e),
                }
            };
            db_pool.close().await;
            result?;
        }
        Commands::Trigger { plan_id } => {
            let resolved = resolve()?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let scheduler = daemon::build_scheduler(&resolved, db_pool.clone())?;
            let result = trigger_cmd::run_trigger(&scheduler, &plan_id).await;
            db_pool.close().await;
            result?;
        }
        Commands::Sweep => {
            let resolved = resolve()?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let scheduler = daemon::build_scheduler(&resolved, db_pool.clone())?;
            let result = scan_cmd::run_sweep(&scheduler).await;
            db_pool.close().await;
            result?;
        }
        Commands::Run => {
            let resolved = resolve()?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let scheduler = daemon::build_scheduler(&resolved, db_pool.clone())?;
            let result = daemon::run_daemon(&scheduler).await;
            db_pool.close().await;
            result?;
        }
        Commands::Serve { bind, port } => {
            let resolved = resolve()?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let scheduler = daemon::build_scheduler(&resolved, db_pool.clone())?;
            let result = serve_cmd::run_serve(scheduler, &bind, port).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test_util {
    use std::sync::{Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serialize tests that read or write process environment variables.
    pub fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }
}
