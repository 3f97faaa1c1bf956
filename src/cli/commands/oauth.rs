use clap::{Arg, ArgMatches, Command};

pub const ARG_PUBLIC_BASE_URL: &str = "public-base-url";
pub const ARG_GOOGLE_CLIENT_ID: &str = "google-client-id";
pub const ARG_GOOGLE_CLIENT_SECRET: &str = "google-client-secret";
pub const ARG_FACEBOOK_CLIENT_ID: &str = "facebook-client-id";
pub const ARG_FACEBOOK_CLIENT_SECRET: &str = "facebook-client-secret";

/// Credentials for one provider; present only when both halves were supplied.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub public_base_url: String,
    pub google: Option<Credentials>,
    pub facebook: Option<Credentials>,
}

impl Options {
    /// Parse OAuth provider arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a provider has a client id without a secret or
    /// the other way around.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let public_base_url = get_non_empty(ARG_PUBLIC_BASE_URL)
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_PUBLIC_BASE_URL}"))?;

        let google = credentials(
            get_non_empty(ARG_GOOGLE_CLIENT_ID),
            get_non_empty(ARG_GOOGLE_CLIENT_SECRET),
            ARG_GOOGLE_CLIENT_ID,
            ARG_GOOGLE_CLIENT_SECRET,
        )?;
        let facebook = credentials(
            get_non_empty(ARG_FACEBOOK_CLIENT_ID),
            get_non_empty(ARG_FACEBOOK_CLIENT_SECRET),
            ARG_FACEBOOK_CLIENT_ID,
            ARG_FACEBOOK_CLIENT_SECRET,
        )?;

        Ok(Self {
            public_base_url,
            google,
            facebook,
        })
    }
}

fn credentials(
    id: Option<String>,
    secret: Option<String>,
    id_arg: &str,
    secret_arg: &str,
) -> anyhow::Result<Option<Credentials>> {
    match (id, secret) {
        (Some(client_id), Some(client_secret)) => Ok(Some(Credentials {
            client_id,
            client_secret,
        })),
        (None, None) => Ok(None),
        (Some(_), None) => anyhow::bail!("--{id_arg} requires --{secret_arg}"),
        (None, Some(_)) => anyhow::bail!("--{secret_arg} requires --{id_arg}"),
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PUBLIC_BASE_URL)
                .long(ARG_PUBLIC_BASE_URL)
                .help("Public base URL of this service, used to build OAuth callback URLs")
                .env("THANAWY_AUTH_PUBLIC_BASE_URL")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_ID)
                .long(ARG_GOOGLE_CLIENT_ID)
                .help("Google OAuth client id")
                .env("THANAWY_AUTH_GOOGLE_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_SECRET)
                .long(ARG_GOOGLE_CLIENT_SECRET)
                .help("Google OAuth client secret")
                .env("THANAWY_AUTH_GOOGLE_CLIENT_SECRET"),
        )
        .arg(
            Arg::new(ARG_FACEBOOK_CLIENT_ID)
                .long(ARG_FACEBOOK_CLIENT_ID)
                .help("Facebook OAuth client id")
                .env("THANAWY_AUTH_FACEBOOK_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_FACEBOOK_CLIENT_SECRET)
                .long(ARG_FACEBOOK_CLIENT_SECRET)
                .help("Facebook OAuth client secret")
                .env("THANAWY_AUTH_FACEBOOK_CLIENT_SECRET"),
        )
}
