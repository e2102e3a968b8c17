use std::io::Write;

use clap::Parser;
use resio_engine::{
    CacheConfig, CatalogEntry, EngineConfig, FetchTrace, OrganizationFilter, ResourceEngine,
};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

mod cli;
mod error;

use cli::{CliArgs, Command};
use error::AppError;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        // Log the full error for debugging
        error!(error = ?e, "Command failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    // Parse command-line arguments
    let args = CliArgs::parse();

    // Setup logging. Payload bytes go to stdout, so logs go to stderr.
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    let mut builder = EngineConfig::builder().with_stage(&args.stage);
    if let Some(url) = &args.catalog_url {
        builder = builder.with_catalog_url(url);
    }
    let cache = CacheConfig {
        enabled: !args.no_cache,
        disk_path: args.cache_dir.clone(),
        remote_endpoint: args.remote_cache.clone(),
        ..CacheConfig::default()
    };
    let config = builder.with_cache_config(cache).build();

    let engine = ResourceEngine::new(config)?;

    match args.command {
        Command::Resolve {
            ref organization,
            ref language,
            ref subject,
        } => run_resolve(&engine, &args, organization, language, subject).await,
        Command::Get {
            ref organization,
            ref language,
            ref subject,
            ref ingredient,
            ref path,
            ref output,
        } => {
            run_get(
                &engine,
                &args,
                organization,
                language,
                subject,
                ingredient.as_deref(),
                path.as_deref(),
                output.as_deref(),
            )
            .await
        }
    }
}

async fn run_resolve(
    engine: &ResourceEngine,
    args: &CliArgs,
    organizations: &[String],
    language: &str,
    subject: &str,
) -> Result<(), AppError> {
    let filter = organization_filter(organizations);
    let resolution = match engine
        .resolve(&filter, language, subject, args.force_refresh)
        .await
    {
        Ok(resolution) => resolution,
        Err(e) => {
            emit_trace(args, e.trace());
            return Err(e.into());
        }
    };

    for failure in &resolution.failed {
        warn!(
            organization = ?failure.organization,
            reason = failure.reason,
            "organization query failed during fan-out"
        );
    }
    info!(
        entries = resolution.entries.len(),
        partial = resolution.is_partial(),
        "catalog resolved"
    );

    emit_trace(args, &resolution.trace);
    println!("{}", serde_json::to_string_pretty(&resolution.entries)?);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_get(
    engine: &ResourceEngine,
    args: &CliArgs,
    organization: &str,
    language: &str,
    subject: &str,
    ingredient: Option<&str>,
    path: Option<&str>,
    output: Option<&std::path::Path>,
) -> Result<(), AppError> {
    if ingredient.is_none() && path.is_none() {
        return Err(AppError::InvalidInput(
            "one of --ingredient or --path is required".into(),
        ));
    }

    let filter = OrganizationFilter::One(organization.to_string());
    let resolution = match engine
        .resolve(&filter, language, subject, args.force_refresh)
        .await
    {
        Ok(resolution) => resolution,
        Err(e) => {
            emit_trace(args, e.trace());
            return Err(e.into());
        }
    };
    let entry = &resolution.entries[0];
    info!(
        resource = entry.version_key(),
        candidates = resolution.entries.len(),
        "using first matched entry"
    );

    let result = match (ingredient, path) {
        (Some(ingredient), _) => engine.get_ingredient(entry, ingredient, args.force_refresh).await,
        (None, Some(path)) => engine.get_file(entry, path, args.force_refresh).await,
        (None, None) => unreachable!("validated above"),
    };
    let content = match result {
        Ok(content) => content,
        Err(e) => {
            emit_trace(args, e.trace());
            return Err(e.into());
        }
    };

    emit_trace(args, &content.trace);
    write_payload(entry, &content.bytes, output)?;
    Ok(())
}

fn organization_filter(organizations: &[String]) -> OrganizationFilter {
    match organizations {
        [] => OrganizationFilter::All,
        [one] => OrganizationFilter::One(one.clone()),
        many => OrganizationFilter::Many(many.to_vec()),
    }
}

fn write_payload(
    entry: &CatalogEntry,
    bytes: &[u8],
    output: Option<&std::path::Path>,
) -> Result<(), AppError> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, bytes)?;
            info!(
                resource = entry.version_key(),
                path = %path.display(),
                size = bytes.len(),
                "file written"
            );
        }
        None => {
            std::io::stdout().write_all(bytes)?;
        }
    }
    Ok(())
}

fn emit_trace(args: &CliArgs, trace: &FetchTrace) {
    if !args.trace {
        return;
    }
    match serde_json::to_string_pretty(trace) {
        Ok(json) => eprintln!("{json}"),
        Err(e) => warn!(error = %e, "failed to serialize fetch trace"),
    }
}
