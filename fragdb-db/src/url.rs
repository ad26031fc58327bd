use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use std::path::PathBuf;

pub fn postgres_url_from_environment() -> String {
    #[derive(Debug, Deserialize)]
    struct PostgresConfig {
        user: String,
        password: Option<String>,
        password_file: Option<PathBuf>,
        host: Option<String>,
        db: String,
    }
    let provider = figment::providers::Env::prefixed("POSTGRES_");
    let config: PostgresConfig = figment::Figment::from(provider)
        .extract()
        .expect("Postgres configuration environment variable(s) missing or invalid");

    let password = match (config.password, config.password_file) {
        (Some(password), _) => password,
        (None, Some(path)) => {
            std::fs::read_to_string(path).expect("Failed to read postgres password file")
        }
        (None, None) => panic!("One of POSTGRES_PASSWORD or POSTGRES_PASSWORD_FILE must be set"),
    };

    // Secrets written by tooling tend to pick up a trailing newline; anything
    // else in the password must survive intact.
    let password = password.strip_suffix('\n').unwrap_or(&password);
    let password = utf8_percent_encode(password, NON_ALPHANUMERIC);

    format!(
        "postgres://{}:{}@{}/{}",
        config.user,
        password,
        config.host.as_deref().unwrap_or("localhost"),
        config.db
    )
}
