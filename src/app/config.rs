//! Typed gateway configuration.
//!
//! Everything is read once at startup and validated eagerly so that a bad
//! bank entry fails the process immediately rather than on first use.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::SecretString;

use crate::domain::{BankProfile, ConfigError, InternalLedger, PrefixRoute};

use super::routing::BankRegistry;

/// Circuit breaker tuning shared by every destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip a closed circuit.
    pub failure_threshold: u32,
    /// Time an open circuit waits before letting a probe through.
    pub cooldown: Duration,
    /// Probe successes needed to close a half-open circuit.
    pub close_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            close_threshold: 2,
        }
    }
}

/// Ingress rate limiting configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Admitted transaction requests per client per window
    pub requests_per_window: u32,
    /// Width of the sliding window
    pub window: Duration,
    /// Requests per second for health endpoints
    pub health_rps: u32,
    /// Burst size for health endpoints
    pub health_burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 100,
            window: Duration::from_secs(60),
            health_rps: 100,
            health_burst: 100,
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub secret_key: SecretString,
    pub database_url: Option<String>,
    pub source_system: String,
    pub internal: InternalLedger,
    pub banks: Vec<BankProfile>,
    pub prefix_routes: Vec<PrefixRoute>,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub audit_timeout: Duration,
}

const DEFAULT_EXTERNAL_BANKS: &str = "MINIBANK_A,MINIBANK_B";

fn default_prefixes(code: &str) -> &'static str {
    match code {
        "MINIBANK_A" => "5678",
        "MINIBANK_B" => "9012",
        _ => "",
    }
}

fn default_bank_url(code: &str) -> &'static str {
    match code {
        "MINIBANK_A" => "http://localhost:8003",
        "MINIBANK_B" => "http://localhost:8004",
        _ => "",
    }
}

impl GatewayConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let secret_key = env.required("SECRET_KEY")?;
        let core_url = env.required("CORE_URL")?;

        let internal = InternalLedger {
            bank_code: env.string_or("INTERNAL_BANK_CODE", "MINIBANK"),
            base_url: core_url,
            account_prefix: env.string_or("INTERNAL_ACCOUNT_PREFIX", "101"),
            timeout_ms: env.parse_or::<u64>("TIMEOUT", 30)?.saturating_mul(1000),
        };

        let mut banks = Vec::new();
        let mut prefix_routes = Vec::new();
        for code in env
            .string_or("EXTERNAL_BANKS", DEFAULT_EXTERNAL_BANKS)
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            let enabled = env.bool_or(&format!("{code}_ENABLED"), true)?;
            let api_key = match env.get(&format!("{code}_API_KEY")) {
                Some(key) => key,
                None if enabled => {
                    return Err(ConfigError::MissingEnvVar(format!("{code}_API_KEY")));
                }
                None => String::new(),
            };
            let profile = BankProfile::new(
                code,
                env.string_or(&format!("{code}_URL"), default_bank_url(code)),
                &api_key,
            )
            .with_enabled(enabled)
            .with_timeout_ms(
                env.parse_or::<u64>(&format!("{code}_TIMEOUT"), 15)?
                    .saturating_mul(1000),
            );
            banks.push(profile);

            let prefixes = env.string_or(&format!("{code}_PREFIXES"), default_prefixes(code));
            prefix_routes.extend(
                prefixes
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(|p| PrefixRoute::new(p, code)),
            );
        }

        let config = Self {
            host: env.string_or("HOST", "0.0.0.0"),
            port: env.parse_or("PORT", 3000)?,
            secret_key: SecretString::from(secret_key),
            database_url: env.get("DATABASE_URL"),
            source_system: env.string_or("SOURCE_SYSTEM", "service"),
            internal,
            banks,
            prefix_routes,
            min_amount: env.parse_or("MIN_TRANSACTION_AMOUNT", Decimal::from(10_000))?,
            max_amount: env.parse_or("MAX_TRANSACTION_AMOUNT", Decimal::from(100_000_000))?,
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: env.parse_or("CIRCUIT_BREAKER_THRESHOLD", 5)?,
                cooldown: Duration::from_secs(env.parse_or("CIRCUIT_BREAKER_TIMEOUT", 60)?),
                close_threshold: env.parse_or("CIRCUIT_BREAKER_CLOSE_THRESHOLD", 2)?,
            },
            rate_limit: RateLimitConfig {
                requests_per_window: env.parse_or("RATE_LIMIT", 100)?,
                ..RateLimitConfig::default()
            },
            audit_timeout: Duration::from_millis(env.parse_or("AUDIT_TIMEOUT_MS", 5000)?),
        };

        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would only surface as failures at request time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("CORE_URL", &self.internal.base_url)?;
        if self.internal.timeout_ms == 0 {
            return Err(ConfigError::invalid("TIMEOUT", "must be greater than zero"));
        }
        if self.min_amount <= Decimal::ZERO {
            return Err(ConfigError::invalid(
                "MIN_TRANSACTION_AMOUNT",
                "must be positive",
            ));
        }
        if self.min_amount > self.max_amount {
            return Err(ConfigError::invalid(
                "MAX_TRANSACTION_AMOUNT",
                "must not be lower than MIN_TRANSACTION_AMOUNT",
            ));
        }
        if self.rate_limit.requests_per_window == 0 {
            return Err(ConfigError::invalid("RATE_LIMIT", "must be greater than zero"));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "CIRCUIT_BREAKER_THRESHOLD",
                "must be greater than zero",
            ));
        }
        if self.circuit_breaker.close_threshold == 0 {
            return Err(ConfigError::invalid(
                "CIRCUIT_BREAKER_CLOSE_THRESHOLD",
                "must be greater than zero",
            ));
        }
        for bank in &self.banks {
            validate_url(&format!("{}_URL", bank.code), &bank.base_url)?;
            if bank.timeout_ms == 0 {
                return Err(ConfigError::invalid(
                    format!("{}_TIMEOUT", bank.code),
                    "must be greater than zero",
                ));
            }
        }
        self.registry().map(|_| ())
    }

    /// Builds the immutable bank registry used by the routing engine.
    pub fn registry(&self) -> Result<BankRegistry, ConfigError> {
        BankRegistry::new(
            self.internal.clone(),
            self.banks.clone(),
            self.prefix_routes.clone(),
        )
    }

    /// Longest downstream deadline any destination is configured with.
    #[must_use]
    pub fn max_call_timeout(&self) -> Duration {
        let longest = self
            .banks
            .iter()
            .map(|bank| bank.timeout_ms)
            .fold(self.internal.timeout_ms, u64::max);
        Duration::from_millis(longest)
    }

    /// Address the HTTP server binds to.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn validate_url(key: &str, value: &str) -> Result<(), ConfigError> {
    let url = reqwest::Url::parse(value)
        .map_err(|e| ConfigError::invalid(key, format!("invalid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::invalid(
            key,
            format!("unsupported scheme '{other}'"),
        )),
    }
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::invalid(key, e.to_string())),
            None => Ok(default),
        }
    }

    fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                other => Err(ConfigError::invalid(
                    key,
                    format!("expected a boolean, got '{other}'"),
                )),
            },
            None => Ok(default),
        }
    }
}
