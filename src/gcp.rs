use std::{
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

pub use goauth::scopes::Scope;
use goauth::{
    GoErr,
    auth::{JwtClaims, Token},
    credentials::Credentials,
};
use http::header::{AUTHORIZATION, HeaderValue};
use smpl_jwt::Jwt;
use snafu::{ResultExt, Snafu};

/// A token is replaced once less than this much of its lifetime is left.
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 200;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum GcpError {
    #[snafu(display("Invalid GCP credentials: {}", source))]
    InvalidCredentials { source: serde_json::Error },
    #[snafu(display("Invalid RSA key in GCP credentials: {}", source))]
    InvalidRsaKey { source: GoErr },
    #[snafu(display("Failed to get OAuth token: {}", source))]
    GetToken { source: GoErr },
}

/// OAuth token source for Google Cloud APIs.
#[derive(Clone, Debug)]
pub enum GcpAuthenticator {
    Credentials(Arc<InnerCreds>),
    /// Sends requests without credentials. Used against emulators and in tests.
    None,
}

#[derive(Debug)]
pub struct InnerCreds {
    creds: Credentials,
    scope: Scope,
    token: RwLock<CachedToken>,
}

#[derive(Debug)]
struct CachedToken {
    token: Token,
    fetched_at: Instant,
}

impl CachedToken {
    fn new(token: Token) -> Self {
        Self {
            token,
            fetched_at: Instant::now(),
        }
    }

    fn expired(&self) -> bool {
        token_expired(
            self.token.expires_in() as u64,
            self.fetched_at.elapsed(),
        )
    }
}

fn token_expired(expires_in_secs: u64, age: Duration) -> bool {
    age + Duration::from_secs(TOKEN_EXPIRY_MARGIN_SECS) >= Duration::from_secs(expires_in_secs)
}

impl GcpAuthenticator {
    /// Builds an authenticator from a service account key document and fetches a first token.
    pub async fn from_json(key_json: &str, scope: Scope) -> Result<Self, GcpError> {
        let creds = parse_credentials(key_json)?;
        let token = RwLock::new(CachedToken::new(fetch_token(&creds, &scope).await?));
        Ok(Self::Credentials(Arc::new(InnerCreds {
            creds,
            scope,
            token,
        })))
    }

    pub fn make_token(&self) -> Option<String> {
        match self {
            Self::Credentials(inner) => inner.make_token(),
            Self::None => None,
        }
    }

    pub fn apply<T>(&self, request: &mut http::Request<T>) {
        if let Some(token) = self.make_token() {
            match HeaderValue::from_str(&token) {
                Ok(value) => {
                    request.headers_mut().insert(AUTHORIZATION, value);
                }
                Err(error) => error!(message = "Invalid GCP authentication token.", %error),
            }
        }
    }

    /// Fetches a new token when the current one is about to expire.
    pub async fn refresh_if_expired(&self) -> Result<(), GcpError> {
        match self {
            Self::Credentials(inner) if inner.expired() => inner.regenerate_token().await,
            _ => Ok(()),
        }
    }
}

impl InnerCreds {
    fn expired(&self) -> bool {
        self.token.read().map_or(true, |cached| cached.expired())
    }

    async fn regenerate_token(&self) -> Result<(), GcpError> {
        let token = fetch_token(&self.creds, &self.scope).await?;
        debug!(message = "Renewed GCP authentication token.", expires_in = token.expires_in());
        if let Ok(mut current) = self.token.write() {
            *current = CachedToken::new(token);
        }
        Ok(())
    }

    fn make_token(&self) -> Option<String> {
        let cached = self.token.read().ok()?;
        Some(format!(
            "{} {}",
            cached.token.token_type(),
            cached.token.access_token()
        ))
    }
}

/// Parses a service account key document.
pub fn parse_credentials(key_json: &str) -> Result<Credentials, GcpError> {
    serde_json::from_str::<Credentials>(key_json).context(InvalidCredentialsSnafu)
}

async fn fetch_token(creds: &Credentials, scope: &Scope) -> Result<Token, GcpError> {
    let claims = JwtClaims::new(
        creds.iss(),
        std::slice::from_ref(scope),
        creds.token_uri(),
        None,
        None,
    );
    let rsa_key = creds.rsa_key().context(InvalidRsaKeySnafu)?;
    let jwt = Jwt::new(claims, rsa_key, None);

    debug!(
        message = "Fetching GCP authentication token.",
        project = ?creds.project(),
        iss = ?creds.iss(),
        token_uri = ?creds.token_uri(),
    );
    goauth::get_token(&jwt, creds)
        .await
        .context(GetTokenSnafu)
}
