use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::str::FromStr;

/// Default SSO base URL used when `SSO_BASE_URL` is not set.
/// Override in tests to point at a mock server.
pub const DEFAULT_SSO_BASE_URL: &str = "http://localhost:8080";

/// Default GitHub token endpoint used when `GITHUB_TOKEN_URL` is not set.
/// Override in tests to point at a mock server.
pub const DEFAULT_GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";

/// Default GitLab token endpoint used when `GITLAB_TOKEN_URL` is not set.
/// Override in tests to point at a mock server.
pub const DEFAULT_GITLAB_TOKEN_URL: &str = "https://gitlab.com/oauth/token";

/// Default Bitbucket token endpoint used when `BITBUCKET_TOKEN_URL` is not set.
/// Override in tests to point at a mock server.
pub const DEFAULT_BITBUCKET_TOKEN_URL: &str = "https://bitbucket.org/site/oauth2/access_token";

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Master secret used to derive the token encryption key. Any length;
    /// it is hashed, never stored.
    #[arg(long, env)]
    token_encryption_secret: Option<String>,

    /// The base URL of the internal SSO deployment.
    #[arg(long, env, default_value = DEFAULT_SSO_BASE_URL)]
    sso_base_url: String,

    /// The SSO realm holding platform user accounts.
    #[arg(long, env, default_value = "main")]
    pub sso_realm: String,

    /// The confidential client ID this service authenticates to the SSO with.
    #[arg(long, env)]
    sso_client_id: Option<String>,

    /// The confidential client secret this service authenticates to the SSO with.
    #[arg(long, env)]
    sso_client_secret: Option<String>,

    /// The service-account client ID with admin rights on the realm.
    #[arg(long, env)]
    sso_admin_client_id: Option<String>,

    /// The service-account client secret with admin rights on the realm.
    #[arg(long, env)]
    sso_admin_client_secret: Option<String>,

    /// The OAuth2 client ID registered with GitHub.
    #[arg(long, env)]
    github_client_id: Option<String>,

    /// The OAuth2 client secret registered with GitHub.
    #[arg(long, env)]
    github_client_secret: Option<String>,

    /// The GitHub token endpoint URL.
    #[arg(long, env, default_value = DEFAULT_GITHUB_TOKEN_URL)]
    github_token_url: String,

    /// The OAuth2 client ID registered with GitLab.
    #[arg(long, env)]
    gitlab_client_id: Option<String>,

    /// The OAuth2 client secret registered with GitLab.
    #[arg(long, env)]
    gitlab_client_secret: Option<String>,

    /// The GitLab token endpoint URL.
    #[arg(long, env, default_value = DEFAULT_GITLAB_TOKEN_URL)]
    gitlab_token_url: String,

    /// The OAuth2 client ID registered with Bitbucket.
    #[arg(long, env)]
    bitbucket_client_id: Option<String>,

    /// The OAuth2 client secret registered with Bitbucket.
    #[arg(long, env)]
    bitbucket_client_secret: Option<String>,

    /// The Bitbucket token endpoint URL.
    #[arg(long, env, default_value = DEFAULT_BITBUCKET_TOKEN_URL)]
    bitbucket_token_url: String,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    /// Returns the master token encryption secret, if configured.
    pub fn token_encryption_secret(&self) -> Option<String> {
        self.token_encryption_secret.clone()
    }

    /// Returns the SSO base URL.
    pub fn sso_base_url(&self) -> &str {
        &self.sso_base_url
    }

    /// Returns the SSO confidential client ID, if configured.
    pub fn sso_client_id(&self) -> Option<String> {
        self.sso_client_id.clone()
    }

    /// Returns the SSO confidential client secret, if configured.
    pub fn sso_client_secret(&self) -> Option<String> {
        self.sso_client_secret.clone()
    }

    /// Returns the SSO admin service-account client ID, if configured.
    pub fn sso_admin_client_id(&self) -> Option<String> {
        self.sso_admin_client_id.clone()
    }

    /// Returns the SSO admin service-account client secret, if configured.
    pub fn sso_admin_client_secret(&self) -> Option<String> {
        self.sso_admin_client_secret.clone()
    }

    /// Returns the GitHub OAuth2 client ID, if configured.
    pub fn github_client_id(&self) -> Option<String> {
        self.github_client_id.clone()
    }

    /// Returns the GitHub OAuth2 client secret, if configured.
    pub fn github_client_secret(&self) -> Option<String> {
        self.github_client_secret.clone()
    }

    /// Returns the GitHub token endpoint URL.
    pub fn github_token_url(&self) -> &str {
        &self.github_token_url
    }

    /// Returns the GitLab OAuth2 client ID, if configured.
    pub fn gitlab_client_id(&self) -> Option<String> {
        self.gitlab_client_id.clone()
    }

    /// Returns the GitLab OAuth2 client secret, if configured.
    pub fn gitlab_client_secret(&self) -> Option<String> {
        self.gitlab_client_secret.clone()
    }

    /// Returns the GitLab token endpoint URL.
    pub fn gitlab_token_url(&self) -> &str {
        &self.gitlab_token_url
    }

    /// Returns the Bitbucket OAuth2 client ID, if configured.
    pub fn bitbucket_client_id(&self) -> Option<String> {
        self.bitbucket_client_id.clone()
    }

    /// Returns the Bitbucket OAuth2 client secret, if configured.
    pub fn bitbucket_client_secret(&self) -> Option<String> {
        self.bitbucket_client_secret.clone()
    }

    /// Returns the Bitbucket token endpoint URL.
    pub fn bitbucket_token_url(&self) -> &str {
        &self.bitbucket_token_url
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }
}
