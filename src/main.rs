use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use texd_client::config::DEFAULT_SERVER;
use texd_client::diagnostics;
use texd_client::document::Document;
use texd_client::models::*;
use texd_client::{build_request, Client, ClientConfig, PreconditionError, ProtocolPolicy};

#[derive(Parser)]
#[command(name = "texd-client")]
#[command(about = "Submit TeX documents to a texd rendering service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base URL of the rendering service
    #[arg(long, global = true, env = "TEXD_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Give up on a request after this many seconds (default: wait forever)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Report 422 responses with an unknown content type instead of dropping them
    #[arg(long, global = true)]
    strict_protocol: bool,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a set of files
    Render {
        /// Files to upload; each is sent under its file name
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Name of the file to compile (default: first .tex file)
        #[arg(long)]
        main: Option<String>,

        /// How files other than the main one are sent. `reference` sends only
        /// their hash; files the service doesn't have are uploaded again.
        #[arg(long, value_enum, default_value_t = UploadArg::Inline)]
        upload: UploadArg,

        #[command(flatten)]
        job: JobArgs,
    },
    /// Render the built-in sample document
    Sample {
        #[command(flatten)]
        job: JobArgs,
    },
    /// Print the service status once
    Status,
    /// Poll the service status until interrupted
    Watch {
        /// Seconds between polls
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
}

#[derive(Args)]
struct JobArgs {
    /// TeX engine (default: the service's default engine)
    #[arg(long)]
    engine: Option<String>,

    /// Docker image to compile in (container mode only)
    #[arg(long)]
    image: Option<String>,

    /// What the service sends back when compilation fails
    #[arg(long, value_enum, default_value_t = ErrorsArg::Full)]
    errors: ErrorsArg,

    /// Where to write the PDF
    #[arg(long, short, default_value = "output.pdf")]
    output: PathBuf,

    /// Print only the error lines of a returned compile log
    #[arg(long)]
    condense: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum UploadArg {
    /// Send contents with every render
    Inline,
    /// Send contents and keep them in the service's reference store
    Store,
    /// Send only the reference id
    Reference,
}

impl From<UploadArg> for UploadMode {
    fn from(arg: UploadArg) -> Self {
        match arg {
            UploadArg::Inline => UploadMode::Inline,
            UploadArg::Store => UploadMode::Store,
            UploadArg::Reference => UploadMode::Reference,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ErrorsArg {
    /// Full compile log
    Full,
    /// Only the error lines of the log
    Condensed,
    /// Structured JSON status
    None,
}

impl From<ErrorsArg> for Option<ErrorVerbosity> {
    fn from(arg: ErrorsArg) -> Self {
        match arg {
            ErrorsArg::Full => Some(ErrorVerbosity::Full),
            ErrorsArg::Condensed => Some(ErrorVerbosity::Condensed),
            ErrorsArg::None => None,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // 1. Initialize Logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let policy = if cli.strict_protocol {
        ProtocolPolicy::Strict
    } else {
        ProtocolPolicy::Lenient
    };
    let config = ClientConfig::new(&cli.server)
        .with_context(|| format!("invalid server URL {:?}", cli.server))?
        .with_timeout(cli.timeout.map(Duration::from_secs))
        .with_policy(policy);

    match cli.command {
        Commands::Render { files, main, upload, job } => {
            let document = load_document(&files, main.as_deref(), upload.into()).await?;
            render(config, document, job).await
        }
        Commands::Sample { job } => render(config, Document::with_sample(), job).await,
        Commands::Status => {
            let client = Client::connect(config, Document::with_sample())?;
            match client.fetch_status().await {
                Ok(status) => {
                    println!("{}", serde_json::to_string_pretty(&status)?);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    error!("{}", e);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::Watch { interval } => {
            let config = config.with_poll_interval(Duration::from_secs(interval.max(1)));
            let client = Client::connect(config, Document::with_sample())?;
            info!("🛰️ Watching {} every {}s", client.config().server, interval.max(1));
            let poller = client.spawn_poller();
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            poller.abort();
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Builds a document from files on disk. Every file becomes a file entry
/// named after it; `main` picks the entry to compile. The main file is always
/// sent inline, the others with `upload`.
async fn load_document(paths: &[PathBuf], main: Option<&str>, upload: UploadMode) -> Result<Document> {
    let mut document = Document::empty();
    let placeholder = document.main_id();

    for path in paths {
        let file = LocalFile::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let id = document.create_file_entry();
        document.attach_local_file(id, Some(file));
    }

    let chosen = match main {
        Some(name) => document.entries().iter().find(|e| e.name == name),
        None => document
            .entries()
            .iter()
            .skip(1)
            .find(|e| Path::new(&e.name).extension().is_some_and(|ext| ext == "tex"))
            .or_else(|| document.entries().get(1)),
    }
    .map(|e| e.id);

    match chosen {
        Some(id) => document.set_main(id),
        None => warn!("main file {:?} is not among the uploaded files", main.unwrap_or_default()),
    }
    document.remove_entry(placeholder);

    let assets: Vec<EntryId> = document
        .entries()
        .iter()
        .map(|e| e.id)
        .filter(|&id| Some(id) != chosen)
        .collect();
    for id in assets {
        document.set_upload_mode(id, upload);
    }

    for (name, count) in document.duplicate_name_counts() {
        if count > 1 {
            warn!("{} files are named {:?}; the service will only keep one", count, name);
        }
    }
    Ok(document)
}

async fn render(config: ClientConfig, document: Document, job: JobArgs) -> Result<ExitCode> {
    // Nothing goes over the wire for a document that can't be submitted.
    if let Err(e) = build_request(&document, &SubmissionOptions::default()) {
        error!("cannot submit: {}", e);
        return Ok(ExitCode::from(2));
    }
    let client = Client::connect(config, document)?;

    // Service defaults first, so explicit flags win over them.
    if let Err(e) = client.fetch_status().await {
        warn!("continuing without service defaults: {}", e);
    }
    let store = client.store();
    if job.engine.is_some() {
        store.select_engine(job.engine).await;
    }
    if job.image.is_some() {
        store.select_image(job.image).await;
    }
    store.select_errors(job.errors.into()).await;

    let outcome = match client.submit_restoring_references().await {
        Ok(outcome) => outcome,
        Err(e @ PreconditionError::DanglingMain(_)) => {
            error!("cannot submit: {}", e);
            return Ok(ExitCode::from(2));
        }
    };

    match outcome {
        Some(pdf @ RenderOutcome::Pdf(_)) => {
            let pdf = pdf.pdf_bytes().context("service sent an undecodable PDF")?;
            tokio::fs::write(&job.output, &pdf)
                .await
                .with_context(|| format!("failed to write {}", job.output.display()))?;
            info!("✅ Wrote {} ({} bytes)", job.output.display(), pdf.len());
            Ok(ExitCode::SUCCESS)
        }
        Some(RenderOutcome::Log(log)) => {
            if job.condense {
                print!("{}", diagnostics::condense(&log));
            } else {
                println!("{}", log);
            }
            let errors = diagnostics::extract_errors(&log);
            error!("❌ Compilation failed with {} error(s)", errors.len());
            for diagnostic in errors {
                match diagnostic.line {
                    Some(line) => eprintln!("{}:{}: {}", diagnostic.file, line, diagnostic.message),
                    None => eprintln!("{}: {}", diagnostic.file, diagnostic.message),
                }
            }
            Ok(ExitCode::FAILURE)
        }
        Some(RenderOutcome::Status(failure)) => {
            error!("❌ Render failed ({:?}): {}", failure.category, failure.error);
            println!("{}", serde_json::to_string_pretty(&failure)?);
            Ok(ExitCode::FAILURE)
        }
        Some(RenderOutcome::Error(info)) => {
            error!("❌ {}", info);
            Ok(ExitCode::FAILURE)
        }
        None => {
            warn!("service sent a response that could not be interpreted");
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::header, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn job(output: PathBuf) -> JobArgs {
        JobArgs {
            engine: None,
            image: None,
            errors: ErrorsArg::Full,
            output,
            condense: false,
        }
    }

    async fn write_files(dir: &Path, files: &[(&str, &str)]) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for (name, text) in files {
            let path = dir.join(name);
            tokio::fs::write(&path, text).await.unwrap();
            paths.push(path);
        }
        paths
    }

    #[tokio::test]
    async fn test_load_document_picks_main_and_upload_mode() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_files(dir.path(), &[("logo.png", "PNG"), ("paper.tex", "x"), ("refs.bib", "@x")]).await;

        let document = load_document(&paths, None, UploadMode::Reference).await.unwrap();
        let main = document.main_entry().unwrap();
        assert_eq!(main.name, "paper.tex");
        assert_eq!(main.upload, UploadMode::Inline);
        assert_eq!(document.entries().len(), 3);
        for entry in document.entries().iter().filter(|e| e.id != main.id) {
            assert_eq!(entry.upload, UploadMode::Reference);
        }
    }

    #[tokio::test]
    async fn test_unknown_main_exits_before_any_request() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().fallback(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                ([(header::CONTENT_TYPE, "application/pdf")], "%PDF")
            }
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let paths = write_files(dir.path(), &[("paper.tex", "x")]).await;
        let document = load_document(&paths, Some("missing.tex"), UploadMode::Inline).await.unwrap();

        let config = ClientConfig::new(&format!("http://{}", addr)).unwrap();
        let code = render(config, document, job(dir.path().join("out.pdf"))).await.unwrap();
        assert_eq!(code, ExitCode::from(2));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}

