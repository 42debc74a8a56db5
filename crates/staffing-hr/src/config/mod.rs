use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub workflow: WorkflowConfig,
    pub persistence: Option<PersistenceConfig>,
    pub docuseal: Option<DocusealConfig>,
    pub storage: StorageConfig,
    pub email: Option<EmailConfig>,
    pub encryption_key: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let workflow = WorkflowConfig {
            call_timeout: Duration::from_secs(parse_number("EXTERNAL_CALL_TIMEOUT_SECS", 15)?),
            submission_expiry_days: parse_number("SUBMISSION_EXPIRY_DAYS", 30)?,
            invitation_validity_days: parse_number("INVITATION_VALIDITY_DAYS", 7)?,
            onboarding_portal_url: env::var("ONBOARDING_PORTAL_URL")
                .unwrap_or_else(|_| "http://localhost:3000/onboarding".to_string()),
        };

        let persistence = optional("PERSISTENCE_API_URL").map(|base_url| PersistenceConfig {
            base_url,
            api_token: optional("PERSISTENCE_API_TOKEN"),
        });

        let docuseal = optional("DOCUSEAL_API_URL").map(|api_url| {
            let app_url = optional("DOCUSEAL_APP_URL").unwrap_or_else(|| {
                api_url
                    .trim_end_matches('/')
                    .trim_end_matches("/api")
                    .to_string()
            });
            DocusealConfig {
                api_url,
                app_url,
                api_key: optional("DOCUSEAL_API_KEY"),
                encrypted_api_key: optional("DOCUSEAL_API_KEY_ENCRYPTED"),
                hr_signer_email: optional("HR_SIGNER_EMAIL"),
                hr_signer_name: optional("HR_SIGNER_NAME")
                    .unwrap_or_else(|| "HR Department".to_string()),
            }
        });

        let s3 = optional("S3_BUCKET").map(|bucket| S3Config {
            bucket,
            region: optional("S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            endpoint: optional("S3_ENDPOINT"),
            access_key_id: optional("S3_ACCESS_KEY_ID").unwrap_or_default(),
            secret_access_key: optional("S3_SECRET_ACCESS_KEY").unwrap_or_default(),
        });
        let storage = StorageConfig {
            s3,
            local_dir: PathBuf::from(
                optional("LOCAL_STORAGE_DIR").unwrap_or_else(|| "./storage".to_string()),
            ),
        };

        let email = match optional("SMTP_HOST") {
            Some(host) => Some(EmailConfig {
                host,
                port: parse_number("SMTP_PORT", 587)?,
                username: optional("SMTP_USERNAME").unwrap_or_default(),
                password: optional("SMTP_PASSWORD").unwrap_or_default(),
                implicit_tls: optional("SMTP_IMPLICIT_TLS")
                    .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                    .unwrap_or(false),
                from: optional("MAIL_FROM").unwrap_or_else(|| "no-reply@localhost".to_string()),
            }),
            None => None,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            workflow,
            persistence,
            docuseal,
            storage,
            email,
            encryption_key: optional("ENCRYPTION_KEY"),
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_number<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
        None => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Timeouts and validity windows shared by the workflow services.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub call_timeout: Duration,
    pub submission_expiry_days: i64,
    pub invitation_validity_days: i64,
    pub onboarding_portal_url: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(15),
            submission_expiry_days: 30,
            invitation_validity_days: 7,
            onboarding_portal_url: "http://localhost:3000/onboarding".to_string(),
        }
    }
}

/// REST persistence backend holding employees and their child collections.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub base_url: String,
    pub api_token: Option<String>,
}

/// DocuSeal API access and the HR counter-signer identity.
#[derive(Clone)]
pub struct DocusealConfig {
    pub api_url: String,
    pub app_url: String,
    pub api_key: Option<String>,
    pub encrypted_api_key: Option<String>,
    pub hr_signer_email: Option<String>,
    pub hr_signer_name: String,
}

impl fmt::Debug for DocusealConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocusealConfig")
            .field("api_url", &self.api_url)
            .field("app_url", &self.app_url)
            .field("hr_signer_email", &self.hr_signer_email)
            .field("hr_signer_name", &self.hr_signer_name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub s3: Option<S3Config>,
    pub local_dir: PathBuf,
}

#[derive(Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct EmailConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub implicit_tls: bool,
    pub from: String,
}

impl fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("implicit_tls", &self.implicit_tls)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be a number (found '{value}')")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
