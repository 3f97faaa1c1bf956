use clap::{Arg, ArgMatches, Command};

pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_ACCESS_TTL_SECONDS: &str = "access-ttl-seconds";
pub const ARG_REFRESH_TTL_SECONDS: &str = "refresh-ttl-seconds";

// HS256 keys shorter than the hash output weaken the MAC.
const MIN_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct Options {
    pub secret: String,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
}

impl Options {
    /// Parse token signing arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the signing secret is missing or too short.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let secret = matches.get_one::<String>(ARG_TOKEN_SECRET).cloned();
        let secret = match secret {
            Some(value) if !value.trim().is_empty() => value,
            _ => anyhow::bail!("missing required argument: --{ARG_TOKEN_SECRET}"),
        };

        if secret.len() < MIN_SECRET_BYTES {
            anyhow::bail!("--{ARG_TOKEN_SECRET} must be at least {MIN_SECRET_BYTES} bytes");
        }

        let access_ttl_seconds = matches
            .get_one::<i64>(ARG_ACCESS_TTL_SECONDS)
            .copied()
            .unwrap_or(crate::tokens::DEFAULT_ACCESS_TTL_SECONDS);
        let refresh_ttl_seconds = matches
            .get_one::<i64>(ARG_REFRESH_TTL_SECONDS)
            .copied()
            .unwrap_or(crate::tokens::DEFAULT_REFRESH_TTL_SECONDS);

        if access_ttl_seconds <= 0 || refresh_ttl_seconds <= 0 {
            anyhow::bail!("token TTLs must be positive");
        }
        if refresh_ttl_seconds <= access_ttl_seconds {
            anyhow::bail!("--{ARG_REFRESH_TTL_SECONDS} must exceed --{ARG_ACCESS_TTL_SECONDS}");
        }

        Ok(Self {
            secret,
            access_ttl_seconds,
            refresh_ttl_seconds,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("HS256 signing secret for access and refresh tokens")
                .long_help(
                    "HS256 signing secret for access and refresh tokens. All instances must share this secret; rotating it invalidates every outstanding token.",
                )
                .env("THANAWY_AUTH_TOKEN_SECRET"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL_SECONDS)
                .long(ARG_ACCESS_TTL_SECONDS)
                .help("Access token TTL in seconds")
                .env("THANAWY_AUTH_ACCESS_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL_SECONDS)
                .long(ARG_REFRESH_TTL_SECONDS)
                .help("Refresh token and session TTL in seconds")
                .env("THANAWY_AUTH_REFRESH_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64)),
        )
}
