//! forge-preview - serve or inline-render a generated bundle

mod cli;
mod frame;

use std::future::Future;
use std::sync::Arc;

use clap::Parser;
use preview_engine::{
    ChannelEventSink, CodeBundle, DisabledSandbox, GenerationStatus, GenerationUpdate, NodeSandbox,
    PreviewConfig, PreviewController, PreviewError, SandboxExecutor, StdProcessSpawner,
    SystemOpener,
};

use cli::{Cli, HostError};
use frame::FileFrameTarget;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run(cli).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), HostError> {
    let config_dir = cli.config_dir()?;
    let config = PreviewConfig::load(&config_dir).await?;
    log::debug!("Loaded configuration from {:?}", config_dir);

    let bundle = cli.load_bundle().await?;

    let executor: Arc<dyn SandboxExecutor> = if cli.fallback_only {
        Arc::new(DisabledSandbox::new("sandbox disabled by --fallback-only"))
    } else {
        Arc::new(NodeSandbox::new(
            config.sandbox.clone(),
            Arc::new(StdProcessSpawner::new()),
        ))
    };

    let (events, mut rx) = ChannelEventSink::new();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => log::warn!("Failed to encode event: {}", e),
            }
        }
    });

    let target = Arc::new(FileFrameTarget::new(cli.frame_out.clone()));
    let controller = PreviewController::new(executor, target)
        .with_config(&config)
        .with_events(Arc::new(events))
        .with_opener(Arc::new(SystemOpener));

    log::info!("forge-preview starting ({} bundle)", bundle.framework);

    let preview = async {
        present(&controller, &cli, bundle).await?;
        log::info!("Previewing; press Ctrl-C to stop");
        std::future::pending::<()>().await;
        Ok::<(), HostError>(())
    };

    until_interrupted(&controller, preview, tokio::signal::ctrl_c()).await
}

/// Drive `work` until it finishes or `interrupt` fires, then dispose.
///
/// An interrupt also cancels a boot or install still in progress.
async fn until_interrupted<W, I>(
    controller: &PreviewController,
    work: W,
    interrupt: I,
) -> Result<(), HostError>
where
    W: Future<Output = Result<(), HostError>>,
    I: Future<Output = std::io::Result<()>>,
{
    let result = tokio::select! {
        result = work => result,
        signal = interrupt => {
            log::info!("Interrupted; shutting down");
            signal.map_err(HostError::Signal)
        }
    };

    controller.dispose().await;
    result
}

/// Deliver the bundle, report status and optionally open the preview
async fn present(
    controller: &PreviewController,
    cli: &Cli,
    bundle: CodeBundle,
) -> Result<(), HostError> {
    match &cli.project_id {
        Some(project_id) => {
            let update = GenerationUpdate {
                project_id: project_id.clone(),
                status: GenerationStatus::Completed,
                bundle: Some(serde_json::to_value(&bundle)?),
                error: None,
            };
            controller.on_generation(update).await?;
        }
        None => {
            controller.submit(bundle).await?;
        }
    }

    println!("{}", serde_json::to_string_pretty(&controller.status())?);

    if cli.open {
        match controller.open_externally() {
            Ok(url) => log::info!("Opened {}", url),
            Err(PreviewError::NotSandboxed) => {
                log::warn!("Preview is rendered inline; nothing to open externally")
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
