use serde::Deserialize;

/// Fallback signing secret for local development only. Refused when
/// APP_ENV=production.
const INSECURE_DEV_SECRET: &str = "your-secret-key-change-in-production";

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_hours: i64,
}

/// Circulation policy knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct LoanConfig {
    pub loan_period_days: i64,
    pub renewal_limit: i32,
    pub max_books_per_patron: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub loans: LoanConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let production = std::env::var("APP_ENV")
            .map(|v| v == "production")
            .unwrap_or(false);

        let secret = match std::env::var("JWT_SECRET") {
            Ok(s) if !s.is_empty() => s,
            _ if production => {
                anyhow::bail!("JWT_SECRET must be set when APP_ENV=production")
            }
            _ => {
                tracing::warn!("JWT_SECRET not set; using insecure development default");
                INSECURE_DEV_SECRET.to_string()
            }
        };

        let jwt = JwtConfig {
            secret,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "bookhive".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "bookhive-users".into()),
            ttl_hours: std::env::var("JWT_TTL_HOURS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(24),
        };

        let loans = LoanConfig {
            loan_period_days: std::env::var("LOAN_PERIOD_DAYS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(14),
            renewal_limit: std::env::var("RENEWAL_LIMIT")
                .ok()
                .and_then(|v| v.parse::<i32>().ok())
                .unwrap_or(1),
            max_books_per_patron: std::env::var("MAX_BOOKS_PER_PATRON")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(5),
        };

        Ok(Self {
            database_url,
            jwt,
            loans,
        })
    }
}
