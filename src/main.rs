use std::{process, sync::Arc};

use disegno::{
    application::{error::AppError, render::RenderService, submission::SubmissionService},
    cache::{ArtifactStore, CacheCoordinator, FsStore, MemoryStore},
    config,
    domain::{format::RenderFormat, source},
    infra::{
        http::{HttpState, build_router},
        renderer::MermaidCli,
        telemetry,
    },
};
use tokio::net::TcpListener;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    // Telemetry may have failed before installing a subscriber.
    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(AppError::from)?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::RenderFile(args) => run_render_file(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let renderer = MermaidCli::new(
        settings.render.mermaid_cli_path.clone(),
        settings.render.timeout,
    );
    let render = Arc::new(RenderService::new(Arc::new(renderer)));
    let submissions = Arc::new(SubmissionService::new(&settings.site.public_base_url));

    let store: Arc<dyn ArtifactStore> = match settings.cache.directory.as_ref() {
        Some(directory) => {
            info!(directory = %directory.display(), "using filesystem artifact store");
            let store = FsStore::new(directory.clone()).map_err(|err| {
                AppError::unexpected(format!(
                    "failed to open cache directory {}: {err}",
                    directory.display()
                ))
            })?;
            Arc::new(store)
        }
        None => {
            info!(
                capacity = settings.cache.memory_capacity.get(),
                "using in-memory artifact store"
            );
            Arc::new(MemoryStore::new(settings.cache.memory_capacity))
        }
    };
    let cache = Arc::new(CacheCoordinator::new(store));

    let router = build_router(HttpState {
        submissions,
        render,
        cache,
    });

    let listener = TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| {
            AppError::unexpected(format!("failed to bind {}: {err}", settings.server.addr))
        })?;
    let local_addr = listener
        .local_addr()
        .map_err(|err| AppError::unexpected(format!("failed to read local address: {err}")))?;

    info!(
        addr = %local_addr,
        public_base_url = %settings.site.public_base_url,
        "disegno listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to install shutdown signal handler");
        return;
    }
    info!("shutdown signal received");
}

async fn run_render_file(
    settings: config::Settings,
    args: config::RenderFileArgs,
) -> Result<(), AppError> {
    use disegno::application::render::DiagramRenderer;

    let format = RenderFormat::from_path_segment(&args.format).ok_or_else(|| {
        AppError::validation(format!(
            "unsupported format `{}`; expected one of: svg, png",
            args.format
        ))
    })?;

    let raw = tokio::fs::read_to_string(&args.input).await.map_err(|err| {
        AppError::validation(format!("failed to read {}: {err}", args.input.display()))
    })?;

    let canonical = source::canonicalize(&raw);
    if canonical.is_empty() {
        return Err(AppError::validation(
            "diagram source is empty after canonicalization",
        ));
    }

    let renderer = MermaidCli::new(
        settings.render.mermaid_cli_path.clone(),
        settings.render.timeout,
    );
    let bytes = renderer
        .render(&canonical, format)
        .await
        .map_err(|err| AppError::unexpected(format!("render failed: {err}")))?;

    match args.output.as_ref() {
        Some(path) => {
            tokio::fs::write(path, &bytes).await.map_err(|err| {
                AppError::unexpected(format!("failed to write {}: {err}", path.display()))
            })?;
            info!(
                path = %path.display(),
                format = %format,
                bytes = bytes.len(),
                "diagram written"
            );
        }
        None => {
            use std::io::Write;
            std::io::stdout()
                .write_all(&bytes)
                .map_err(|err| AppError::unexpected(format!("failed to write stdout: {err}")))?;
        }
    }

    Ok(())
}
