use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zeniji_comfyui::config::ComfyUIConfig;
use zeniji_comfyui::error::GenerationError;
use zeniji_comfyui::manager::PortraitClient;
use zeniji_render::{save_artifact, Args, RenderRequest};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zeniji_render=info,zeniji_comfyui=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let request = match RenderRequest::try_from(Args::parse()) {
        Ok(request) => request,
        Err(e) => {
            tracing::error!(error = %e, "Invalid arguments");
            std::process::exit(2);
        }
    };

    let config = match ComfyUIConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(2);
        }
    };

    tracing::info!(
        api_url = %config.api_url(),
        style = %config.style,
        "Rendering portrait",
    );

    let client = PortraitClient::new(config);
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling render");
            ctrl_c.cancel();
        }
    });

    let prompt = request.prompt.text();
    let result = client.render(&prompt, &cancel).await;
    let elapsed = client.last_render_duration().await.unwrap_or_default();

    let code = match result {
        Ok(artifact) => {
            match save_artifact(&request.output_dir, chrono::Local::now(), &artifact.bytes) {
                Ok(path) => {
                    tracing::info!(
                        path = %path.display(),
                        bytes = artifact.bytes.len(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Portrait saved",
                    );
                    0
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to write portrait");
                    1
                }
            }
        }
        Err(GenerationError::ArtifactTimeout { prompt_id }) => {
            tracing::error!(prompt_id = %prompt_id, "Job completed without an image");
            match client.history(&prompt_id).await {
                Ok(history) => tracing::info!(prompt_id = %prompt_id, %history, "Server history"),
                Err(e) => tracing::warn!(error = %e, "History lookup failed"),
            }
            1
        }
        Err(e) => {
            if e.is_server_down() {
                tracing::error!(error = %e, "ComfyUI server is not available");
            } else {
                tracing::error!(error = %e, "Portrait render failed");
            }
            1
        }
    };

    client.shutdown().await;
    std::process::exit(code);
}
