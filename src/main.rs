use chrono::{TimeDelta, Utc};
use clap::Parser;
use color_eyre::eyre::{Result, WrapErr, eyre};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use vignette::ImageCache;
use vignette::domain::entities::{ImageId, ImageRequest, Size};
use vignette::infrastructure::config::{CacheConfig, CliArgs, Command, SizeArgs};

fn init_logging(config: &CacheConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = &config.log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<CacheConfig> {
    let mut config =
        CacheConfig::load(args.config.as_deref()).wrap_err("Failed to load configuration")?;
    config.apply_args(args);
    Ok(config)
}

fn identifier_request(id: String, options: Option<String>, size: SizeArgs) -> ImageRequest {
    let request = match options {
        Some(options) => ImageRequest::variant(id, options),
        None => ImageRequest::identifier(id),
    };

    match (size.width, size.height) {
        (Some(width), Some(height)) => request.with_exact_size(Size::new(width, height), size.scale),
        _ => request,
    }
}

async fn run(cache: ImageCache, command: Command) -> Result<()> {
    match command {
        Command::Put { file, id, options } => {
            let image = image::open(&file)
                .wrap_err_with(|| format!("Failed to read {}", file.display()))?;

            let stored = match (id, options) {
                (None, None) => cache.store_image_async(image).await?,
                (None, Some(_)) => return Err(eyre!("--options requires --id")),
                (Some(id), None) => {
                    cache
                        .store_image_for_identifier_async(image, ImageId::new(id))
                        .await?
                }
                (Some(id), Some(options)) => {
                    cache
                        .store_image_for_request_async(image, ImageRequest::variant(id, options))
                        .await?
                }
            };
            println!("{} {}", stored.identifier, stored.options);
        }
        Command::Get {
            id,
            options,
            size,
            dynamic,
            out,
        } => {
            let request = identifier_request(id.clone(), options, size);
            let found = if dynamic {
                cache.execute_request_in_dynamic_cache_async(request).await?
            } else {
                cache.execute_request_async(request).await?
            };
            let found = found.ok_or_else(|| eyre!("No image matches {id}"))?;

            found
                .image
                .save(&out)
                .wrap_err_with(|| format!("Failed to write {}", out.display()))?;
            println!(
                "{} {} ({})",
                out.display(),
                found.dimensions(),
                found.source
            );
        }
        Command::Delete { id, options } => {
            let request = match options {
                Some(options) => ImageRequest::variant(id, options),
                None => ImageRequest::identifier(id),
            };
            let removed = cache.store().delete_async(request).await?;
            println!("removed {removed}");
        }
        Command::Clean { older_than } => {
            let age = i64::try_from(older_than)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .ok_or_else(|| eyre!("--older-than {older_than} is out of range"))?;
            let threshold = Utc::now()
                .checked_sub_signed(age)
                .ok_or_else(|| eyre!("--older-than {older_than} is out of range"))?;

            let removed = cache.clean_cache_using_access_date_async(threshold).await?;
            println!("removed {removed}");
        }
        Command::Stats => {
            let entries = cache.store().entry_count_async().await?;
            println!("location: {}", cache.location().display());
            println!("entries:  {entries}");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;

    init_logging(&config)?;

    info!(version = vignette::VERSION, store = %config.store_path().display(), "Starting Vignette");

    let cache = ImageCache::open(&config).wrap_err("Failed to open image cache")?;

    run(cache, args.command).await
}
