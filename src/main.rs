#![allow(clippy::result_large_err)]

use dotenvy::dotenv;
use fieldops::{
    Engine, Error, Result,
    config::{self, database},
    services::{Clock, DbOperatorDirectory, DisabledTransport, HttpMailTransport, MailTransport, SystemClock},
};
use std::{env, sync::Arc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

enum Command {
    Tick,
    Trigger(i64),
}

fn parse_command(args: &[String]) -> Result<Command> {
    match args {
        [] => Ok(Command::Tick),
        [cmd] if cmd == "tick" => Ok(Command::Tick),
        [cmd, id] if cmd == "trigger" => id.parse().map(Command::Trigger).map_err(|_| Error::Config {
            message: format!("Rule id must be a number, got {id:?}"),
        }),
        _ => Err(Error::Config {
            message: "Usage: fieldops [tick | trigger <rule-id>]".to_string(),
        }),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file, env vars can also be set externally
    dotenv().ok();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = parse_command(&args)?;

    // 3. Load settings
    let settings = config::load_default_config()
        .inspect_err(|e| error!("Failed to load configuration: {}", e))?;

    // 4. Connect and make sure the schema exists
    let db = database::create_connection(&settings.database)
        .await
        .inspect(|_| info!("Database connected."))
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect_err(|e| error!("Failed to create tables: {}", e))?;

    // 5. Pick the mail transport; without a relay every alert is only logged
    let api_key = env::var("MAIL_API_KEY").ok().or_else(|| settings.mail.api_key.clone());
    let mailer: Arc<dyn MailTransport> = match &settings.mail.endpoint {
        Some(endpoint) => Arc::new(HttpMailTransport::new(
            endpoint.clone(),
            api_key,
            settings.mail.from.clone(),
            settings.mail_timeout(),
        )?),
        None => {
            warn!("No mail relay configured, emailed alerts will fail until one is set.");
            Arc::new(DisabledTransport)
        }
    };

    let clock = Arc::new(SystemClock);
    let engine = Engine::new(
        db.clone(),
        mailer,
        Arc::new(DbOperatorDirectory::new(db)),
        clock,
        &settings,
    )?;

    // 6. Run the requested job once; an external cron owns the cadence
    match command {
        Command::Tick => {
            engine
                .run_scheduled_tick(SystemClock.now())
                .await
                .inspect_err(|e| error!("Scheduler tick failed: {}", e))?;
        }
        Command::Trigger(rule_id) => {
            let sent = engine
                .trigger_rule_now(rule_id)
                .await
                .inspect_err(|e| error!("Rule {} failed: {}", rule_id, e))?;
            info!(rule_id, sent, "Rule triggered.");
        }
    }

    Ok(())
}
