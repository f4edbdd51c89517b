mod cli;

use std::io;
use std::sync::Arc;

use clap::Parser;
use cli::{DevCmd, GlobalOpts, Opts, OptsCmd};
use quotebot::commentary::{CommentError, OpenAiCommentGenerator};
use quotebot::platform::{Platform as _, XPlatform};
use quotebot::selection::select_candidates;
use quotebot::server::{self, ServerError};
use quotebot::{Bot, BotError, LOG_TARGET};
use quotebot_core::Timestamp;
use quotebot_db::{Database, DbError};
use quotebot_util_error::FmtCompact as _;
use quotebot_x_api::{XApiClient, XApiError};
use serde_json::json;
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Snafu)]
pub enum CliError {
    #[snafu(display("Logging initialization failed"))]
    Logging,
    #[snafu(display("Unable to determine a data dir; pass --data-dir"))]
    NoDataDir,
    #[snafu(display("Data dir error"))]
    DataDir { source: io::Error },
    #[snafu(display("Missing required setting: {name}"))]
    MissingSetting { name: &'static str },
    #[snafu(display("Database error"))]
    Database { source: DbError },
    #[snafu(display("X API error"))]
    XApi { source: XApiError },
    #[snafu(display("Comment generator error"))]
    Comment { source: CommentError },
    #[snafu(display("Run cycle failed"))]
    Bot { source: BotError },
    #[snafu(display("HTTP server error"))]
    Server { source: ServerError },
    #[snafu(display("JSON error"))]
    Json { source: serde_json::Error },
}

pub type CliResult<T> = std::result::Result<T, CliError>;

#[snafu::report]
#[tokio::main]
async fn main() -> CliResult<()> {
    init_logging()?;
    install_panic_hook();

    let opts = Opts::parse();
    handle_cmd(opts).await
}

async fn handle_cmd(opts: Opts) -> CliResult<()> {
    match opts.cmd {
        OptsCmd::Serve { listen, run_key } => {
            if run_key.is_empty() {
                return MissingSettingSnafu {
                    name: "QUOTEBOT_RUN_KEY",
                }
                .fail();
            }
            let bot = Arc::new(make_bot(&opts.global).await?);
            let listener = server::bind(listen).await.context(ServerSnafu)?;
            server::serve(listener, bot, run_key)
                .await
                .context(ServerSnafu)?;
        }
        OptsCmd::RunOnce => {
            let bot = make_bot(&opts.global).await?;
            match bot.run_cycle().await {
                Ok(result) => print_json(&json!({ "ok": true, "result": result }))?,
                Err(err) => {
                    print_json(&json!({ "ok": false, "error": err.fmt_compact().to_string() }))?;
                    return Err(err).context(BotSnafu);
                }
            }
        }
        OptsCmd::Dev(DevCmd::Search) => {
            let db = open_db(&opts.global).await?;
            let platform = make_platform(&opts.global)?;
            let config = opts.global.tuning.to_config();
            let query = config.search_query();

            let posts = platform
                .search(&query, config.search_max_results)
                .await
                .context(XApiSnafu)?;
            let found = posts.len();
            let selected = select_candidates(posts, &db, &config, Timestamp::now())
                .await
                .context(DatabaseSnafu)?;

            print_json(&json!({
                "query": query,
                "found": found,
                "selected": selected,
            }))?;
        }
        OptsCmd::Dev(DevCmd::Queue) => {
            let db = open_db(&opts.global).await?;
            let state = db.get_state().await.context(DatabaseSnafu)?;
            let pending = db.list_pending().await.context(DatabaseSnafu)?;

            print_json(&json!({
                "state": state,
                "queue_size": pending.len(),
                "pending": pending,
            }))?;
        }
    }

    Ok(())
}

fn print_json(value: &serde_json::Value) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value).context(JsonSnafu)?);
    Ok(())
}

async fn open_db(global: &GlobalOpts) -> CliResult<Database> {
    let data_dir = global.data_dir().context(NoDataDirSnafu)?;
    let path = Database::mk_db_path(data_dir)
        .await
        .context(DataDirSnafu)?;
    info!(target: LOG_TARGET, path = %path.display(), "Opening database");
    Database::open(path).await.context(DatabaseSnafu)
}

fn make_platform(global: &GlobalOpts) -> CliResult<XPlatform> {
    let bearer_token = global
        .x
        .x_bearer_token
        .clone()
        .context(MissingSettingSnafu {
            name: "X_BEARER_TOKEN",
        })?;
    // Search-only commands run without it
    let user_access_token = global.x.x_user_access_token.clone().unwrap_or_default();

    let client = XApiClient::builder()
        .base_url(global.x.x_api_base.clone())
        .timeout(global.x.timeout())
        .rate_limit_policy(global.x.rate_limit_policy)
        .build()
        .context(XApiSnafu)?;

    Ok(XPlatform::new(client, bearer_token, user_access_token))
}

async fn make_bot(global: &GlobalOpts) -> CliResult<Bot> {
    global
        .x
        .x_user_access_token
        .as_ref()
        .context(MissingSettingSnafu {
            name: "X_USER_ACCESS_TOKEN",
        })?;
    let platform = make_platform(global)?;

    let api_key = global
        .openai
        .openai_api_key
        .clone()
        .context(MissingSettingSnafu {
            name: "OPENAI_API_KEY",
        })?;
    let generator = OpenAiCommentGenerator::builder()
        .api_key(api_key)
        .base_url(global.openai.openai_api_base.clone())
        .model(global.openai.openai_model.clone())
        .build()
        .context(CommentSnafu)?;

    let db = open_db(global).await?;
    let config = global.tuning.to_config();
    info!(target: LOG_TARGET, ?config, "Bot configuration");

    Ok(Bot::new(
        Arc::new(db),
        Arc::new(platform),
        Arc::new(generator),
        config,
    ))
}

pub fn init_logging() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|_| CliError::Logging)?;

    Ok(())
}

/// Panics end up in the log too, not only on raw stderr.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        error!(target: LOG_TARGET, panic = %info, "Panicked");
        default_hook(info);
    }));
}
