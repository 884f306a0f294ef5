use std::process::ExitCode;

use clap::{Arg, ArgAction, Command};
use url::Url;

use webmentions::configuration::{get_configuration, Config};
use webmentions::db;
use webmentions::net;
use webmentions::orchestrator::Orchestrator;
use webmentions::telemetry;

fn main() -> ExitCode {
    let matches = Command::new("webmentions")
        .version(clap::crate_version!())
        .about("Webmention/Pingback discovery and dispatch pipeline")
        .arg(
            Arg::new("site")
                .long("site")
                .value_name("URL")
                .help("Scan a site ad-hoc: discover its feed and check every entry")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("page")
                .long("page")
                .value_name("URL")
                .help("Scan a single page ad-hoc, as a synthetic one-entry feed")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("register")
                .long("register")
                .value_name("URL")
                .help("Register a site's feed for periodic scanning")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("real")
                .long("real")
                .help("Actually send mentions; without this flag, only print what would be sent")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .help("Increase log verbosity (repeatable)")
                .action(ArgAction::Count),
        )
        .get_matches();

    let verbosity = matches.get_count("verbose");
    let subscriber = telemetry::get_subscriber(verbosity, std::io::stdout);
    telemetry::init_global_default(subscriber);

    let modes_supplied = ["site", "page", "register"]
        .iter()
        .filter(|name| matches.contains_id(**name))
        .count();

    if modes_supplied > 1 {
        eprintln!("at most one of --site, --page, --register may be given");
        return ExitCode::FAILURE;
    }

    let config = match get_configuration() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("unable to load configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start the async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config, &matches)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config, matches: &clap::ArgMatches) -> anyhow::Result<()> {
    let pool = db::init_pool(&config.database).await?;
    let client = net::build_client(
        &config.http.user_agent,
        config.http.timeout(),
        config.http.max_redirects,
    )?;

    let orchestrator = Orchestrator::new(pool, client);
    let dry_run = !matches.get_flag("real");

    if let Some(site) = matches.get_one::<String>("site") {
        let site_url = Url::parse(site)?;
        orchestrator.scan_site(&site_url, dry_run).await?;
    } else if let Some(page) = matches.get_one::<String>("page") {
        let page_url = Url::parse(page)?;
        orchestrator.scan_page(&page_url, dry_run).await;
    } else if let Some(register) = matches.get_one::<String>("register") {
        let site_url = Url::parse(register)?;
        orchestrator.register(&site_url).await?;
    } else {
        orchestrator.drain(dry_run).await?;
    }

    Ok(())
}
