use std::env;
use std::sync::OnceLock;
use thiserror::Error;

/// Default Pinecone index queried and written by the service.
pub const DEFAULT_INDEX_NAME: &str = "caseforai-embeddings";
/// Default Gemini embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "models/gemini-embedding-001";
/// Default Gemini REST base URL.
pub const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
/// Default S3 bucket for archived uploads.
pub const DEFAULT_BUCKET_NAME: &str = "caseforai-bucket";
/// Default AWS region.
pub const DEFAULT_AWS_REGION: &str = "us-east-1";
/// Default chunk window, in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;
/// Default overlap between consecutive chunk windows, in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
/// Default cap on multipart request bodies.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
/// Default HTTP listen port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing required environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the docsearch server.
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the Pinecone control and data planes.
    pub pinecone_api_key: String,
    /// Name of the Pinecone index holding chunk vectors.
    pub pinecone_index_name: String,
    /// Data-plane host of the index; resolved through the control plane when absent.
    pub pinecone_index_host: Option<String>,
    /// Namespace used for upserts and queries (empty selects the default namespace).
    pub pinecone_namespace: String,
    /// API key for the Gemini embeddings API.
    pub google_api_key: String,
    /// Gemini embedding model identifier.
    pub embedding_model: String,
    /// Optional output dimensionality requested from the embedding model.
    pub embedding_dimension: Option<usize>,
    /// Base URL of the Gemini REST API.
    pub gemini_api_url: String,
    /// AWS access key used to sign archive requests.
    pub aws_access_key_id: String,
    /// AWS secret key used to sign archive requests.
    pub aws_secret_access_key: String,
    /// Optional AWS session token for temporary credentials.
    pub aws_session_token: Option<String>,
    /// AWS region of the archive bucket.
    pub aws_region: String,
    /// Bucket receiving archived uploads.
    pub s3_bucket_name: String,
    /// Custom S3-compatible endpoint (MinIO, LocalStack); switches to path-style addressing.
    pub s3_endpoint_url: Option<String>,
    /// Chunk window size in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunk windows in characters.
    pub chunk_overlap: usize,
    /// Largest accepted upload request body in bytes.
    pub max_upload_bytes: usize,
    /// HTTP listen port.
    pub server_port: u16,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let chunk_size = parse_optional("CHUNK_SIZE")?.unwrap_or(DEFAULT_CHUNK_SIZE);
        let chunk_overlap = parse_optional("CHUNK_OVERLAP")?.unwrap_or(DEFAULT_CHUNK_OVERLAP);
        if chunk_size == 0 {
            return Err(ConfigError::InvalidValue("CHUNK_SIZE".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(ConfigError::InvalidValue("CHUNK_OVERLAP".into()));
        }

        Ok(Self {
            pinecone_api_key: load_env("PINECONE_API_KEY")?,
            pinecone_index_name: load_env_optional("PINECONE_INDEX_NAME")
                .unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string()),
            pinecone_index_host: load_env_optional("PINECONE_INDEX_HOST"),
            pinecone_namespace: load_env_optional("PINECONE_NAMESPACE").unwrap_or_default(),
            google_api_key: load_env("GOOGLE_API_KEY")?,
            embedding_model: load_env_optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            embedding_dimension: parse_optional("EMBEDDING_DIMENSION")?,
            gemini_api_url: load_env_optional("GEMINI_API_URL")
                .unwrap_or_else(|| DEFAULT_GEMINI_API_URL.to_string()),
            aws_access_key_id: load_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: load_env("AWS_SECRET_ACCESS_KEY")?,
            aws_session_token: load_env_optional("AWS_SESSION_TOKEN"),
            aws_region: load_env_optional("AWS_REGION")
                .unwrap_or_else(|| DEFAULT_AWS_REGION.to_string()),
            s3_bucket_name: load_env_optional("AWS_S3_BUCKET_NAME")
                .unwrap_or_else(|| DEFAULT_BUCKET_NAME.to_string()),
            s3_endpoint_url: load_env_optional("AWS_ENDPOINT_URL"),
            chunk_size,
            chunk_overlap,
            max_upload_bytes: parse_optional("MAX_UPLOAD_BYTES")?
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            server_port: parse_optional("SERVER_PORT")?.unwrap_or(DEFAULT_SERVER_PORT),
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    load_env_optional(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        index = %config.pinecone_index_name,
        namespace = %config.pinecone_namespace,
        bucket = %config.s3_bucket_name,
        region = %config.aws_region,
        model = %config.embedding_model,
        chunk_size = config.chunk_size,
        chunk_overlap = config.chunk_overlap,
        server_port = config.server_port,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}
