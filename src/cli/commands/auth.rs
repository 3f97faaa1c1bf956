use clap::{Arg, ArgMatches, Command};

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_EMAIL_TOKEN_TTL_SECONDS: &str = "email-token-ttl-seconds";
pub const ARG_EMAIL_RESEND_COOLDOWN_SECONDS: &str = "email-resend-cooldown-seconds";
pub const ARG_CHALLENGE_TTL_SECONDS: &str = "challenge-ttl-seconds";
pub const ARG_OAUTH_STATE_TTL_SECONDS: &str = "oauth-state-ttl-seconds";
pub const ARG_TOTP_ISSUER: &str = "totp-issuer";

#[derive(Debug, Clone)]
pub struct Options {
    pub frontend_base_url: String,
    pub email_token_ttl_seconds: i64,
    pub resend_cooldown_seconds: i64,
    pub challenge_ttl_seconds: i64,
    pub oauth_state_ttl_seconds: i64,
    pub totp_issuer: String,
}

impl Options {
    /// Parse auth flow arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_string = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };
        let get_seconds = |id: &str| {
            let value = matches.get_one::<i64>(id).copied().unwrap_or_default();
            if value > 0 {
                Ok(value)
            } else {
                Err(anyhow::anyhow!("--{id} must be positive"))
            }
        };

        Ok(Self {
            frontend_base_url: get_string(ARG_FRONTEND_BASE_URL)?,
            email_token_ttl_seconds: get_seconds(ARG_EMAIL_TOKEN_TTL_SECONDS)?,
            resend_cooldown_seconds: get_seconds(ARG_EMAIL_RESEND_COOLDOWN_SECONDS)?,
            challenge_ttl_seconds: get_seconds(ARG_CHALLENGE_TTL_SECONDS)?,
            oauth_state_ttl_seconds: get_seconds(ARG_OAUTH_STATE_TTL_SECONDS)?,
            totp_issuer: get_string(ARG_TOTP_ISSUER)?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL used for CORS, verification links, and OAuth redirects")
                .env("THANAWY_AUTH_FRONTEND_BASE_URL")
                .default_value("https://thanawy.app"),
        )
        .arg(
            Arg::new(ARG_EMAIL_TOKEN_TTL_SECONDS)
                .long(ARG_EMAIL_TOKEN_TTL_SECONDS)
                .help("Email verification token TTL in seconds")
                .env("THANAWY_AUTH_EMAIL_TOKEN_TTL_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_EMAIL_RESEND_COOLDOWN_SECONDS)
                .long(ARG_EMAIL_RESEND_COOLDOWN_SECONDS)
                .help("Cooldown before resending verification emails")
                .env("THANAWY_AUTH_EMAIL_RESEND_COOLDOWN_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_CHALLENGE_TTL_SECONDS)
                .long(ARG_CHALLENGE_TTL_SECONDS)
                .help("Two-factor login challenge TTL in seconds")
                .env("THANAWY_AUTH_CHALLENGE_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_OAUTH_STATE_TTL_SECONDS)
                .long(ARG_OAUTH_STATE_TTL_SECONDS)
                .help("OAuth CSRF state cookie TTL in seconds")
                .env("THANAWY_AUTH_OAUTH_STATE_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_TOTP_ISSUER)
                .long(ARG_TOTP_ISSUER)
                .help("Issuer label shown in authenticator apps")
                .env("THANAWY_AUTH_TOTP_ISSUER")
                .default_value("ThanaWy"),
        )
}
