use anyhow::Context;
use clap::Parser;
use snapclass_classifiers::{ClassifierSession, EventBus, LoadEvent, ModelHandle};
use snapclass_demo::cli::{Cli, Commands, ModelArgs};
use snapclass_demo::output::{ImageReport, ModelSummary};
use snapclass_demo::settings::{LogFormat, SnapclassSettings};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Classify {
            model,
            labels,
            top_k,
            json,
            images,
        } => {
            let mut settings = load_settings(&model)?;
            if labels.is_some() {
                settings.labels = labels;
            }
            if let Some(top_k) = top_k {
                settings.top_k = top_k;
            }

            let session = ClassifierSession::from_config(&settings.classifier_config())?;
            load_with_progress(&session).await?;

            let mut reports = Vec::with_capacity(images.len());
            for path in &images {
                let image = image::open(path)
                    .with_context(|| format!("Failed to decode {}", path.display()))?;
                let predictions = session.predict(&image)?;
                tracing::debug!(
                    "Classified {} ({} predictions)",
                    path.display(),
                    predictions.len()
                );

                reports.push(ImageReport {
                    image: path.display().to_string(),
                    predictions,
                });
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for report in &reports {
                    print!("{}", report.render());
                }
            }
        }

        Commands::Inspect { model, json } => {
            let settings = load_settings(&model)?;
            let session = ClassifierSession::from_config(&settings.classifier_config())?;
            let handle = load_with_progress(&session).await?;

            let summary =
                ModelSummary::new(&handle, &session.location().to_string(), session.labels());
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!();
                print!("{}", summary.render());
            }
        }
    }

    Ok(())
}

fn load_settings(args: &ModelArgs) -> anyhow::Result<SnapclassSettings> {
    let mut settings = SnapclassSettings::load(&args.config)?;
    settings.apply_model_args(args);
    init_logging(args.verbose, settings.log.format);
    Ok(settings)
}

/// Load the session's model, printing progress events to stderr
async fn load_with_progress(session: &ClassifierSession) -> anyhow::Result<ModelHandle> {
    let bus = EventBus::default();
    let mut events = bus.subscribe();

    let renderer = tokio::spawn(async move {
        let mut last_decile = None;
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            match event {
                // one line per 10% is plenty for a terminal
                LoadEvent::Progress { fraction } => {
                    let decile = (fraction * 10.0) as u32;
                    if last_decile != Some(decile) {
                        last_decile = Some(decile);
                        eprintln!("  {}", event.message());
                    }
                }
                LoadEvent::Attempt { .. } => {
                    last_decile = None;
                    eprintln!("  {}", event.message());
                }
                LoadEvent::Failed { .. } => eprintln!("  ✗ {}", event.message()),
                LoadEvent::Loaded { .. } => eprintln!("  ✓ {}", event.message()),
                _ => eprintln!("  {}", event.message()),
            }
        }
    });

    let result = session.load(&bus).await;
    drop(bus);
    let _ = renderer.await;

    result.context("Model could not be loaded")
}

fn init_logging(verbose: bool, format: LogFormat) {
    let filter = if verbose {
        "snapclass=debug,snapclass_demo=debug,snapclass_classifiers=debug"
    } else {
        "snapclass=info,snapclass_demo=info,snapclass_classifiers=info"
    };

    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
    );

    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}
