//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the
//! appropriate action, such as starting the API server with its full
//! configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{auth, oauth, tokens};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let token_opts = tokens::Options::parse(matches)?;
    let auth_opts = auth::Options::parse(matches)?;
    let oauth_opts = oauth::Options::parse(matches)?;

    let (google_client_id, google_client_secret) = split_credentials(oauth_opts.google);
    let (facebook_client_id, facebook_client_secret) = split_credentials(oauth_opts.facebook);

    Ok(Action::Server(Args {
        port,
        dsn,
        token_secret: SecretString::from(token_opts.secret),
        access_ttl_seconds: token_opts.access_ttl_seconds,
        refresh_ttl_seconds: token_opts.refresh_ttl_seconds,
        frontend_base_url: auth_opts.frontend_base_url,
        email_token_ttl_seconds: auth_opts.email_token_ttl_seconds,
        resend_cooldown_seconds: auth_opts.resend_cooldown_seconds,
        challenge_ttl_seconds: auth_opts.challenge_ttl_seconds,
        oauth_state_ttl_seconds: auth_opts.oauth_state_ttl_seconds,
        totp_issuer: auth_opts.totp_issuer,
        public_base_url: oauth_opts.public_base_url,
        google_client_id,
        google_client_secret,
        facebook_client_id,
        facebook_client_secret,
    }))
}

fn split_credentials(
    credentials: Option<oauth::Credentials>,
) -> (Option<String>, Option<SecretString>) {
    match credentials {
        Some(credentials) => (
            Some(credentials.client_id),
            Some(SecretString::from(credentials.client_secret)),
        ),
        None => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::actions::Action;

    #[test]
    fn token_secret_required() {
        temp_env::with_vars(
            [
                ("THANAWY_AUTH_TOKEN_SECRET", None::<&str>),
                ("THANAWY_AUTH_DSN", Some("postgres://localhost/thanawy")),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["thanawy-auth"]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(
                        err.to_string()
                            .contains("missing required argument: --token-secret")
                    );
                }
            },
        );
    }

    #[test]
    fn full_arguments_build_server_action() {
        temp_env::with_vars(
            [
                ("THANAWY_AUTH_GOOGLE_CLIENT_ID", None::<&str>),
                ("THANAWY_AUTH_GOOGLE_CLIENT_SECRET", None::<&str>),
                ("THANAWY_AUTH_FACEBOOK_CLIENT_ID", None::<&str>),
                ("THANAWY_AUTH_FACEBOOK_CLIENT_SECRET", None::<&str>),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec![
                    "thanawy-auth",
                    "--dsn",
                    "postgres://localhost/thanawy",
                    "--token-secret",
                    "0123456789abcdef0123456789abcdef",
                    "--google-client-id",
                    "g-id",
                    "--google-client-secret",
                    "g-secret",
                ]);

                let result = handler(&matches);
                assert!(result.is_ok());
                if let Ok(Action::Server(args)) = result {
                    assert_eq!(args.port, 8080);
                    assert_eq!(args.dsn, "postgres://localhost/thanawy");
                    assert_eq!(args.google_client_id.as_deref(), Some("g-id"));
                    assert!(args.google_client_secret.is_some());
                    assert!(args.facebook_client_id.is_none());
                    assert_eq!(args.totp_issuer, "ThanaWy");
                }
            },
        );
    }
}
