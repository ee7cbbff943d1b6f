use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, path::PathBuf, str::FromStr};

const DEFAULT_READ_CONCURRENCY: usize = 4;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Which object backend the gateway talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Remote S3-compatible bucket through the AWS SDK.
    S3,
    /// In-process store, contents are lost on exit.
    Memory,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown backend `{}` (expected `s3` or `memory`)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub backend: BackendKind,
    pub legacy_bucket_paths: bool,
    pub read_concurrency: usize,
    pub max_upload_bytes: usize,
}

/// One-shot upload requested on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadJob {
    pub path: PathBuf,
    pub folder: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "HTTP gateway for files kept in a single S3 bucket")]
pub struct Args {
    /// Host to bind to (overrides FILE_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Bucket every file lives in (overrides FILE_GATEWAY_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// AWS region (overrides FILE_GATEWAY_REGION, else the AWS default chain)
    #[arg(long)]
    pub region: Option<String>,

    /// Custom S3 endpoint, e.g. MinIO or LocalStack (overrides FILE_GATEWAY_ENDPOINT_URL)
    #[arg(long)]
    pub endpoint_url: Option<String>,

    /// Use path-style bucket addressing
    #[arg(long)]
    pub force_path_style: bool,

    /// Object backend (overrides FILE_GATEWAY_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Encode the folder into the bucket name (`bucket/folder`) instead of the key
    #[arg(long)]
    pub legacy_bucket_paths: bool,

    /// Parallel reads when loading a directory (overrides FILE_GATEWAY_READ_CONCURRENCY)
    #[arg(long)]
    pub read_concurrency: Option<usize>,

    /// Largest accepted upload body in bytes (overrides FILE_GATEWAY_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Upload this local file and exit
    #[arg(long, value_name = "PATH")]
    pub upload: Option<PathBuf>,

    /// Folder used together with --upload
    #[arg(long, requires = "upload")]
    pub folder: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and an optional upload job.
    pub fn from_env_and_args() -> Result<(Self, Option<UploadJob>)> {
        Self::resolve(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge parsed arguments over values looked up through `lookup`.
    pub fn resolve(
        args: Args,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(Self, Option<UploadJob>)> {
        // --- Environment fallback ---
        let env_host = lookup("FILE_GATEWAY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var(&lookup, "FILE_GATEWAY_PORT")?.unwrap_or(3000);
        let env_read_concurrency =
            parse_var(&lookup, "FILE_GATEWAY_READ_CONCURRENCY")?.unwrap_or(DEFAULT_READ_CONCURRENCY);
        let env_max_upload =
            parse_var(&lookup, "FILE_GATEWAY_MAX_UPLOAD_BYTES")?.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);
        let env_backend = parse_var(&lookup, "FILE_GATEWAY_BACKEND")?.unwrap_or(BackendKind::S3);
        let env_path_style = parse_var(&lookup, "FILE_GATEWAY_FORCE_PATH_STYLE")?.unwrap_or(false);
        let env_legacy = parse_var(&lookup, "FILE_GATEWAY_LEGACY_BUCKET_PATHS")?.unwrap_or(false);

        // --- Merge ---
        let bucket = args
            .bucket
            .or_else(|| lookup("FILE_GATEWAY_BUCKET"))
            .filter(|b| !b.trim().is_empty())
            .context("a bucket name is required (--bucket or FILE_GATEWAY_BUCKET)")?;

        let read_concurrency = args.read_concurrency.unwrap_or(env_read_concurrency);
        if read_concurrency == 0 {
            bail!("read concurrency must be at least 1");
        }

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            bucket,
            region: args.region.or_else(|| lookup("FILE_GATEWAY_REGION")),
            endpoint_url: args
                .endpoint_url
                .or_else(|| lookup("FILE_GATEWAY_ENDPOINT_URL")),
            force_path_style: args.force_path_style || env_path_style,
            backend: args.backend.unwrap_or(env_backend),
            legacy_bucket_paths: args.legacy_bucket_paths || env_legacy,
            read_concurrency,
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        };

        let job = args.upload.map(|path| UploadJob {
            path,
            folder: args.folder,
        });

        Ok((cfg, job))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("parsing {} value `{}`: {}", name, value, err)),
        None => Ok(None),
    }
}
