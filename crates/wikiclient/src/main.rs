use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use wikiclient_core::revisions::DEFAULT_RECENT_LIMIT;
use wikiclient_core::search::{DEFAULT_MEMBERS_LIMIT, DEFAULT_SEARCH_LIMIT, DEFAULT_SITEINFO_PROPS};
use wikiclient_core::types::ProtectionLevel;
use wikiclient_core::users::{DEFAULT_CONTRIBUTIONS_LIMIT, UserLookup};
use wikiclient_core::{ClientOptions, WikiClient, load_config};

const DEFAULT_CONFIG_PATH: &str = "wikiclient.toml";

#[derive(Debug, Parser)]
#[command(
    name = "wikiclient",
    version,
    about = "Query, edit and watch MediaWiki and Fandom wikis"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "TOML config file")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "URL", help = "Override the wiki host")]
    host: Option<String>,
    #[arg(short, long, global = true, action = clap::ArgAction::Count, help = "Increase log verbosity")]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Fetch a page summary")]
    Page(PageArgs),
    #[command(about = "Show the revision history of a page")]
    History(TitleArgs),
    #[command(about = "Fetch a user by name or numeric id")]
    User(UserArgs),
    #[command(about = "Fetch a single revision")]
    Revision(RevisionArgs),
    #[command(about = "Full-text search; prints matching titles")]
    Search(SearchArgs),
    #[command(about = "List members of a category")]
    Category(CategoryArgs),
    #[command(about = "Print site information")]
    Siteinfo(SiteinfoArgs),
    #[command(about = "List the newest recent changes")]
    Recent(RecentArgs),
    #[command(about = "Poll recent changes and print events as JSON lines")]
    Watch(WatchArgs),
    #[command(about = "Replace page text (requires WIKI_BOT_USER/WIKI_BOT_PASS)")]
    Edit(EditArgs),
    #[command(about = "Delete a page (requires WIKI_BOT_USER/WIKI_BOT_PASS)")]
    Delete(DeleteArgs),
    #[command(about = "Protect a page (requires WIKI_BOT_USER/WIKI_BOT_PASS)")]
    Protect(ProtectArgs),
    #[command(about = "Undo every revision after the given one")]
    Revert(RevertArgs),
    #[command(about = "Block a user (requires WIKI_BOT_USER/WIKI_BOT_PASS)")]
    Block(BlockArgs),
}

#[derive(Debug, Args)]
struct PageArgs {
    title: String,
    #[arg(long, help = "Include wikitext content")]
    content: bool,
}

#[derive(Debug, Args)]
struct TitleArgs {
    title: String,
}

#[derive(Debug, Args)]
struct UserArgs {
    #[arg(help = "User name, or numeric id with --id")]
    user: String,
    #[arg(long, help = "Treat USER as a numeric user id")]
    id: bool,
    #[arg(long, help = "Also list recent contributions")]
    contributions: bool,
    #[arg(long, default_value_t = DEFAULT_CONTRIBUTIONS_LIMIT)]
    limit: u32,
}

#[derive(Debug, Args)]
struct RevisionArgs {
    revid: i64,
}

#[derive(Debug, Args)]
struct SearchArgs {
    query: String,
    #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
    limit: u32,
}

#[derive(Debug, Args)]
struct CategoryArgs {
    category: String,
    #[arg(long, default_value_t = DEFAULT_MEMBERS_LIMIT)]
    limit: u32,
}

#[derive(Debug, Args)]
struct SiteinfoArgs {
    #[arg(long, default_value = DEFAULT_SITEINFO_PROPS)]
    prop: String,
}

#[derive(Debug, Args)]
struct RecentArgs {
    #[arg(long, default_value_t = DEFAULT_RECENT_LIMIT)]
    limit: u32,
}

#[derive(Debug, Args)]
struct WatchArgs {
    #[arg(long, value_name = "MS", help = "Poll interval; defaults to the configured value")]
    interval_ms: Option<u64>,
    #[arg(long, help = "Stop after this many cycles (the first only seeds the cursor)")]
    cycles: Option<u32>,
}

#[derive(Debug, Args)]
struct EditArgs {
    title: String,
    #[arg(long, value_name = "PATH", help = "Read new text from a file instead of --text")]
    file: Option<PathBuf>,
    #[arg(long)]
    text: Option<String>,
    #[arg(long)]
    summary: Option<String>,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    title: String,
    #[arg(long)]
    reason: Option<String>,
}

#[derive(Debug, Args)]
struct ProtectArgs {
    title: String,
    #[arg(long, value_parser = ["sysop", "autoconfirmed", "all"], default_value = "sysop")]
    level: String,
    #[arg(long, default_value = "infinite")]
    expiry: String,
    #[arg(long)]
    reason: Option<String>,
}

#[derive(Debug, Args)]
struct RevertArgs {
    title: String,
    revid: i64,
    #[arg(long)]
    summary: Option<String>,
}

#[derive(Debug, Args)]
struct BlockArgs {
    user: String,
    #[arg(long, default_value = "infinite")]
    expiry: String,
    #[arg(long, default_value = "")]
    reason: String,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Some(command) = cli.command else {
        let mut command = Cli::command();
        command.print_help()?;
        println!();
        return Ok(());
    };
    let client = build_client(cli.config.as_ref(), cli.host.as_deref())?;

    match command {
        Commands::Page(args) => run_page(&client, args),
        Commands::History(TitleArgs { title }) => {
            print_json(&client.pages().history(&title)?)
        }
        Commands::User(args) => run_user(&client, args),
        Commands::Revision(RevisionArgs { revid }) => {
            print_json(&client.revisions().fetch(revid)?)
        }
        Commands::Search(SearchArgs { query, limit }) => {
            for title in client.search().search(&query, limit)? {
                println!("{title}");
            }
            Ok(())
        }
        Commands::Category(CategoryArgs { category, limit }) => {
            for member in client.categories().members(&category, limit)? {
                println!("{}", member.title);
            }
            Ok(())
        }
        Commands::Siteinfo(SiteinfoArgs { prop }) => print_json(&client.meta().site_info(&prop)?),
        Commands::Recent(RecentArgs { limit }) => print_json(&client.revisions().recent(limit)?),
        Commands::Watch(args) => run_watch(&client, args),
        Commands::Edit(args) => run_edit(&client, args),
        Commands::Delete(DeleteArgs { title, reason }) => {
            login_from_env(&client)?;
            if client.pages().delete(&title, reason.as_deref())? {
                println!("deleted: {title}");
            } else {
                println!("already absent: {title}");
            }
            Ok(())
        }
        Commands::Protect(args) => {
            login_from_env(&client)?;
            let level = match args.level.as_str() {
                "autoconfirmed" => ProtectionLevel::Autoconfirmed,
                "all" => ProtectionLevel::None,
                _ => ProtectionLevel::Sysop,
            };
            client
                .pages()
                .protect(&args.title, level, &args.expiry, args.reason.as_deref())?;
            println!("protected: {} ({})", args.title, level.as_str());
            Ok(())
        }
        Commands::Revert(RevertArgs {
            title,
            revid,
            summary,
        }) => {
            login_from_env(&client)?;
            if client.pages().revert_to(&title, revid, summary.as_deref())? {
                println!("reverted {title} to revision {revid}");
            } else {
                println!("{title} is already at revision {revid}");
            }
            Ok(())
        }
        Commands::Block(BlockArgs {
            user,
            expiry,
            reason,
        }) => {
            login_from_env(&client)?;
            client.users().block(&user, &expiry, &reason)?;
            println!("blocked: {user} ({expiry})");
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_client(config: Option<&PathBuf>, host: Option<&str>) -> Result<WikiClient> {
    let config_path = config
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let options = resolve_options(&config_path, host)?;
    Ok(WikiClient::new(options)?)
}

/// `--host` outranks `WIKI_HOST` and `[wiki].host`, and is validated along
/// with the rest of the settings.
fn resolve_options(config_path: &Path, host: Option<&str>) -> Result<ClientOptions> {
    let config = load_config(config_path)?;
    let options = config
        .resolve_with(|key| match (key, host) {
            ("WIKI_HOST", Some(host)) => Some(host.to_string()),
            _ => std::env::var(key).ok(),
        })
        .with_context(|| {
            format!(
                "invalid client settings; pass --host or check {}",
                config_path.display()
            )
        })?;
    Ok(options)
}

fn login_from_env(client: &WikiClient) -> Result<()> {
    let username = std::env::var("WIKI_BOT_USER")
        .context("WIKI_BOT_USER is required for write commands")?;
    let password = std::env::var("WIKI_BOT_PASS")
        .context("WIKI_BOT_PASS is required for write commands")?;
    let name = client
        .login(&username, &password)
        .with_context(|| format!("failed to log in as {username}"))?;
    tracing::info!(user = %name, "authenticated");
    Ok(())
}

fn run_page(client: &WikiClient, args: PageArgs) -> Result<()> {
    let mut page = client.pages().fetch(&args.title)?;
    if !args.content {
        page.content = None;
        page.revisions.clear();
    }
    print_json(&page)
}

fn run_user(client: &WikiClient, args: UserArgs) -> Result<()> {
    let lookup = if args.id {
        let id = args
            .user
            .parse::<i64>()
            .with_context(|| format!("`{}` is not a numeric user id", args.user))?;
        UserLookup::Id(id)
    } else {
        UserLookup::Name(args.user.clone())
    };
    let user = client.users().fetch(lookup)?;
    print_json(&user)?;
    if args.contributions {
        print_json(&client.users().contributions(&user.name, args.limit)?)?;
    }
    Ok(())
}

fn run_watch(client: &WikiClient, args: WatchArgs) -> Result<()> {
    client.events().subscribe_all(|event| match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(error) => tracing::warn!(error = %error, "failed to encode event"),
    });
    client
        .poller()
        .on_error(|error| eprintln!("poll failed: {error}"));
    let interval = args
        .interval_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| client.options().poll_interval());

    match args.cycles {
        Some(cycles) => {
            for cycle in 0..cycles {
                if cycle > 0 {
                    thread::sleep(interval);
                }
                client.poller().poll();
            }
            Ok(())
        }
        None => {
            client.poller().start_polling(interval)?;
            loop {
                thread::park();
            }
        }
    }
}

fn run_edit(client: &WikiClient, args: EditArgs) -> Result<()> {
    let text = match (args.file, args.text) {
        (Some(path), None) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, Some(text)) => text,
        (Some(_), Some(_)) => bail!("pass either --file or --text, not both"),
        (None, None) => bail!("one of --file or --text is required"),
    };
    login_from_env(client)?;
    let outcome = client
        .pages()
        .edit(&args.title, &text, args.summary.as_deref())?;
    if outcome.changed() {
        println!(
            "edited: {} (revision {})",
            args.title,
            outcome
                .newrevid
                .map(|revid| revid.to_string())
                .unwrap_or_else(|| "?".to_string())
        );
    } else {
        println!("no change: {}", args.title);
    }
    Ok(())
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
