use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Url};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "facevault", about = "facevault face registry CLI")]
struct Cli {
    /// Base URL of the facevaultd API
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the face in an image
    Register {
        /// Image containing exactly one face
        image: PathBuf,
        /// Name for the face (generated if omitted)
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Recognize the face in an image
    Recognize {
        image: PathBuf,
        /// Maximum distance for a match (server default if omitted)
        #[arg(short, long)]
        tolerance: Option<f32>,
    },
    /// List registered faces
    List,
    /// Delete a face by name, or by id with --id
    Delete {
        #[arg(required_unless_present = "id", conflicts_with = "id")]
        name: Option<String>,
        #[arg(long)]
        id: Option<i64>,
    },
    /// Reload the server's face cache
    Refresh,
    /// Show daemon status
    Status,
}

struct Api {
    client: Client,
    base: Url,
}

impl Api {
    fn new(server: &str) -> Result<Self> {
        let base = Url::parse(server).with_context(|| format!("invalid server URL '{server}'"))?;
        Ok(Self {
            client: Client::new(),
            base,
        })
    }

    /// Append percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("server URL cannot be a base: {}", self.base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let response = request
            .send()
            .await
            .with_context(|| format!("failed to reach facevaultd at {}", self.base))?;
        let status = response.status();
        tracing::debug!(url = %response.url(), %status, "response received");
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("unexpected response from server (HTTP {status})"))?;
        unwrap_envelope(body)
    }
}

/// Extract `data` from a success envelope or turn an error envelope into an error.
fn unwrap_envelope(mut body: Value) -> Result<Value> {
    match body["status"].as_str() {
        Some("success") => Ok(body["data"].take()),
        _ => {
            let code = body["error"]["code"].as_str().unwrap_or("UNKNOWN");
            let message = body["error"]["message"].as_str().unwrap_or("no message");
            bail!("{code}: {message}")
        }
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

async fn image_form(path: &Path) -> Result<Form> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image")
        .to_string();
    let part = Part::bytes(bytes)
        .file_name(file_name)
        .mime_str(mime_for(path))?;
    Ok(Form::new().part("file", part))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let api = Api::new(&cli.server)?;

    let data = match cli.command {
        Commands::Register { image, name } => {
            let mut form = image_form(&image).await?;
            if let Some(name) = name {
                form = form.text("name", name);
            }
            let url = api.endpoint(&["faces"])?;
            api.send(api.client.post(url).multipart(form)).await?
        }
        Commands::Recognize { image, tolerance } => {
            let mut form = image_form(&image).await?;
            if let Some(tolerance) = tolerance {
                form = form.text("tolerance", tolerance.to_string());
            }
            let url = api.endpoint(&["faces", "recognize"])?;
            api.send(api.client.post(url).multipart(form)).await?
        }
        Commands::List => {
            let url = api.endpoint(&["faces"])?;
            api.send(api.client.get(url)).await?
        }
        Commands::Delete { name, id } => {
            let url = match (id, name.as_deref()) {
                (Some(id), _) => api.endpoint(&["faces", "id", &id.to_string()])?,
                (None, Some(name)) => api.endpoint(&["faces", name])?,
                (None, None) => bail!("a name or --id is required"),
            };
            api.send(api.client.delete(url)).await?
        }
        Commands::Refresh => {
            let url = api.endpoint(&["faces", "refresh"])?;
            api.send(api.client.post(url)).await?
        }
        Commands::Status => {
            let url = api.endpoint(&["status"])?;
            api.send(api.client.get(url)).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_encodes_segments() {
        let api = Api::new("http://127.0.0.1:8000").unwrap();
        assert_eq!(
            api.endpoint(&["faces", "Juan Pérez"]).unwrap().as_str(),
            "http://127.0.0.1:8000/faces/Juan%20P%C3%A9rez"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let api = Api::new("http://vault.local/api/").unwrap();
        assert_eq!(
            api.endpoint(&["faces", "id", "7"]).unwrap().as_str(),
            "http://vault.local/api/faces/id/7"
        );
    }

    #[test]
    fn test_unwrap_envelope() {
        let data = unwrap_envelope(json!({"status": "success", "data": {"count": 0}})).unwrap();
        assert_eq!(data, json!({"count": 0}));

        let err = unwrap_envelope(json!({
            "status": "error",
            "error": {"code": "NOT_FOUND", "message": "no face found for name 'x'"}
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "NOT_FOUND: no face found for name 'x'");
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(mime_for(Path::new("a.png")), "image/png");
        assert_eq!(mime_for(Path::new("a")), "application/octet-stream");
    }

    #[test]
    fn test_delete_requires_name_or_id() {
        assert!(Cli::try_parse_from(["facevault", "delete"]).is_err());
        assert!(Cli::try_parse_from(["facevault", "delete", "Juan"]).is_ok());
        assert!(Cli::try_parse_from(["facevault", "delete", "--id", "3"]).is_ok());
        assert!(Cli::try_parse_from(["facevault", "delete", "Juan", "--id", "3"]).is_err());
    }
}
