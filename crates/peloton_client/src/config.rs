//! Credential resolution and endpoint configuration.
//!
//! Credentials come from the first satisfied source, in order:
//! 1. an explicit `--env-file` path,
//! 2. the file named by `PELOTON_ENV_FILE`,
//! 3. `.env` in the working directory,
//! 4. `.envfile` in the working directory,
//! 5. the process environment.
//!
//! Sources are never merged. Env files are parsed without touching the process environment.

use secrecy::SecretString;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const USERNAME_VAR: &str = "PELOTON_USERNAME";
pub const PASSWORD_VAR: &str = "PELOTON_PASSWORD";
pub const ENV_FILE_VAR: &str = "PELOTON_ENV_FILE";
pub const API_BASE_URL_VAR: &str = "PELOTON_API_BASE_URL";
pub const AUTH_BASE_URL_VAR: &str = "PELOTON_AUTH_BASE_URL";

/// Env files looked up in the working directory when nothing is named explicitly.
pub const DEFAULT_ENV_FILES: [&str; 2] = [".env", ".envfile"];

pub const DEFAULT_API_BASE_URL: &str = "https://api.onepeloton.com";
pub const DEFAULT_AUTH_BASE_URL: &str = "https://auth.onepeloton.com";

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("missing required credential(s): {}", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),
    #[error("env file not found: {}", .0.display())]
    CredentialFileNotFound(PathBuf),
    #[error("invalid env file {}: {reason}", .path.display())]
    InvalidCredentialFile { path: PathBuf, reason: String },
}

#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into().into()),
        }
    }

    /// Read `PELOTON_USERNAME` / `PELOTON_PASSWORD` through `get`.
    ///
    /// Both must be present and non-empty; the error names every variable that is not.
    pub fn from_env_with<F>(mut get: F) -> Result<Self, CredentialsError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let username = get(USERNAME_VAR).filter(|v| !v.is_empty());
        let password = get(PASSWORD_VAR).filter(|v| !v.is_empty());

        match (username, password) {
            (Some(username), Some(password)) => Ok(Self::new(username, password)),
            (username, password) => {
                let mut missing = Vec::new();
                if username.is_none() {
                    missing.push(USERNAME_VAR);
                }
                if password.is_none() {
                    missing.push(PASSWORD_VAR);
                }
                Err(CredentialsError::MissingCredentials(missing))
            }
        }
    }
}

/// A place credentials may be loaded from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialSource {
    /// Path given with `--env-file`.
    EnvFileFlag(PathBuf),
    /// Path named by `PELOTON_ENV_FILE`.
    EnvFileVar(PathBuf),
    /// `.env` or `.envfile` in the working directory.
    WorkingDirFile(PathBuf),
    ProcessEnv,
}

impl CredentialSource {
    /// Explicitly named files must exist; implicit ones are skipped when absent.
    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::EnvFileFlag(_) | Self::EnvFileVar(_))
    }
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnvFileFlag(p) => write!(f, "--env-file {}", p.display()),
            Self::EnvFileVar(p) => write!(f, "{ENV_FILE_VAR}={}", p.display()),
            Self::WorkingDirFile(p) => write!(f, "{}", p.display()),
            Self::ProcessEnv => f.write_str("process environment"),
        }
    }
}

/// Walks the credential sources in precedence order.
#[derive(Clone, Debug)]
pub struct CredentialResolver {
    env_file: Option<PathBuf>,
    working_dir: PathBuf,
}

impl CredentialResolver {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            env_file: None,
            working_dir: working_dir.into(),
        }
    }

    /// Set the `--env-file` override. Relative paths resolve against the working directory.
    pub fn with_env_file(mut self, env_file: Option<PathBuf>) -> Self {
        self.env_file = env_file;
        self
    }

    pub fn resolve(&self) -> Result<Credentials, CredentialsError> {
        self.resolve_with(|k| std::env::var(k).ok())
    }

    /// Testable variant of [`resolve`](Self::resolve) reading the process
    /// environment through `get`.
    pub fn resolve_with<F>(&self, mut get: F) -> Result<Credentials, CredentialsError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        for source in self.file_sources(&mut get) {
            let path = match &source {
                CredentialSource::EnvFileFlag(p)
                | CredentialSource::EnvFileVar(p)
                | CredentialSource::WorkingDirFile(p) => p,
                CredentialSource::ProcessEnv => continue,
            };

            if !path.is_file() {
                if source.is_explicit() {
                    return Err(CredentialsError::CredentialFileNotFound(path.clone()));
                }
                continue;
            }

            let vars = match read_env_file(path) {
                Ok(vars) => vars,
                Err(e) if !source.is_explicit() => {
                    debug!(%source, error = %e, "env file unreadable, skipping");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !source.is_explicit()
                && !vars.contains_key(USERNAME_VAR)
                && !vars.contains_key(PASSWORD_VAR)
            {
                debug!(%source, "env file defines no credentials, skipping");
                continue;
            }

            debug!(%source, "resolving credentials");
            return Credentials::from_env_with(|k| vars.get(k).cloned());
        }

        debug!(source = %CredentialSource::ProcessEnv, "resolving credentials");
        Credentials::from_env_with(get)
    }

    /// File-backed sources in precedence order.
    pub fn file_sources<F>(&self, get: &mut F) -> Vec<CredentialSource>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut sources = Vec::with_capacity(4);
        if let Some(path) = &self.env_file {
            sources.push(CredentialSource::EnvFileFlag(
                self.absolutize(&expand_home(path, &mut *get)),
            ));
        }
        if let Some(path) = get(ENV_FILE_VAR).filter(|v| !v.is_empty()) {
            sources.push(CredentialSource::EnvFileVar(
                self.absolutize(&expand_home(Path::new(&path), &mut *get)),
            ));
        }
        sources.extend(
            DEFAULT_ENV_FILES
                .iter()
                .map(|name| CredentialSource::WorkingDirFile(self.working_dir.join(name))),
        );
        sources
    }

    fn absolutize(&self, path: &Path) -> PathBuf {
        self.working_dir.join(path)
    }
}

fn expand_home<F>(path: &Path, get: &mut F) -> PathBuf
where
    F: FnMut(&str) -> Option<String>,
{
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match get("HOME").filter(|h| !h.is_empty()) {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, CredentialsError> {
    let invalid = |e: dotenvy::Error| CredentialsError::InvalidCredentialFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    dotenvy::from_path_iter(path)
        .map_err(invalid)?
        .map(|item| item.map_err(invalid))
        .collect()
}

/// Base URLs the adapters talk to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    pub api_base_url: String,
    pub auth_base_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE_URL, DEFAULT_AUTH_BASE_URL)
    }
}

impl Endpoints {
    pub fn new(api_base_url: &str, auth_base_url: &str) -> Self {
        Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            auth_base_url: auth_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_env() -> Self {
        Self::from_env_with(|k| std::env::var(k).ok())
    }

    pub fn from_env_with<F>(mut get: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        let api = get(API_BASE_URL_VAR).filter(|v| !v.is_empty());
        let auth = get(AUTH_BASE_URL_VAR).filter(|v| !v.is_empty());
        Self::new(
            api.as_deref().unwrap_or(DEFAULT_API_BASE_URL),
            auth.as_deref().unwrap_or(DEFAULT_AUTH_BASE_URL),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::fs;

    fn env_of(pairs: &[(&str, &str)]) -> impl FnMut(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    fn write_creds(path: &Path, user: &str, pass: &str) {
        fs::write(
            path,
            format!("{USERNAME_VAR}={user}\n{PASSWORD_VAR}={pass}\n"),
        )
        .expect("write env file");
    }

    #[test]
    fn from_env_reads_values() {
        let creds = Credentials::from_env_with(env_of(&[
            (USERNAME_VAR, "rider"),
            (PASSWORD_VAR, "hunter2"),
        ]))
        .expect("creds");
        assert_eq!(creds.username, "rider");
        assert_eq!(creds.password.expose_secret(), "hunter2");
    }

    #[test]
    fn from_env_missing_username_is_named() {
        let err = Credentials::from_env_with(env_of(&[(PASSWORD_VAR, "pw")])).unwrap_err();
        match err {
            CredentialsError::MissingCredentials(vars) => assert_eq!(vars, vec![USERNAME_VAR]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn from_env_empty_values_count_as_missing() {
        let err = Credentials::from_env_with(env_of(&[(USERNAME_VAR, ""), (PASSWORD_VAR, "")]))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing required credential(s): PELOTON_USERNAME, PELOTON_PASSWORD"
        );
    }

    #[test]
    fn debug_output_redacts_password() {
        let creds = Credentials::new("rider", "hunter2");
        let dbg = format!("{creds:?}");
        assert!(dbg.contains("rider"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn process_env_used_when_no_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let creds = CredentialResolver::new(dir.path())
            .resolve_with(env_of(&[(USERNAME_VAR, "env-user"), (PASSWORD_VAR, "env-pw")]))
            .expect("creds");
        assert_eq!(creds.username, "env-user");
    }

    #[test]
    fn nothing_configured_reports_missing_username() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = CredentialResolver::new(dir.path())
            .resolve_with(env_of(&[]))
            .unwrap_err();
        match err {
            CredentialsError::MissingCredentials(vars) => {
                assert!(vars.contains(&USERNAME_VAR));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn precedence_is_flag_then_var_then_dotenv_then_envfile_then_process() {
        let dir = tempfile::tempdir().expect("tempdir");
        let flag = dir.path().join("flag.env");
        let named = dir.path().join("named.env");
        write_creds(&flag, "flag-user", "pw");
        write_creds(&named, "var-user", "pw");
        write_creds(&dir.path().join(".env"), "dotenv-user", "pw");
        write_creds(&dir.path().join(".envfile"), "envfile-user", "pw");

        let named_str = named.to_string_lossy().into_owned();
        let process = [
            (USERNAME_VAR, "process-user"),
            (PASSWORD_VAR, "pw"),
            (ENV_FILE_VAR, named_str.as_str()),
        ];

        let resolver = CredentialResolver::new(dir.path());
        let with_flag = resolver.clone().with_env_file(Some(flag.clone()));
        assert_eq!(
            with_flag.resolve_with(env_of(&process)).unwrap().username,
            "flag-user"
        );
        assert_eq!(
            resolver.resolve_with(env_of(&process)).unwrap().username,
            "var-user"
        );

        let no_var = &process[..2];
        assert_eq!(
            resolver.resolve_with(env_of(no_var)).unwrap().username,
            "dotenv-user"
        );

        fs::remove_file(dir.path().join(".env")).unwrap();
        assert_eq!(
            resolver.resolve_with(env_of(no_var)).unwrap().username,
            "envfile-user"
        );

        fs::remove_file(dir.path().join(".envfile")).unwrap();
        assert_eq!(
            resolver.resolve_with(env_of(no_var)).unwrap().username,
            "process-user"
        );
    }

    #[test]
    fn missing_flag_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = CredentialResolver::new(dir.path())
            .with_env_file(Some(PathBuf::from("nope.env")))
            .resolve_with(env_of(&[(USERNAME_VAR, "u"), (PASSWORD_VAR, "p")]))
            .unwrap_err();
        match err {
            CredentialsError::CredentialFileNotFound(path) => {
                assert_eq!(path, dir.path().join("nope.env"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_env_file_var_target_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_creds(&dir.path().join(".env"), "dotenv-user", "pw");
        let err = CredentialResolver::new(dir.path())
            .resolve_with(env_of(&[(ENV_FILE_VAR, "/definitely/not/here.env")]))
            .unwrap_err();
        assert!(matches!(err, CredentialsError::CredentialFileNotFound(_)));
    }

    #[test]
    fn empty_env_file_var_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let creds = CredentialResolver::new(dir.path())
            .resolve_with(env_of(&[
                (ENV_FILE_VAR, ""),
                (USERNAME_VAR, "u"),
                (PASSWORD_VAR, "p"),
            ]))
            .expect("creds");
        assert_eq!(creds.username, "u");
    }

    #[test]
    fn winning_file_is_not_merged_with_process_env() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(".env"), format!("{USERNAME_VAR}=file-user\n")).unwrap();
        let err = CredentialResolver::new(dir.path())
            .resolve_with(env_of(&[(USERNAME_VAR, "u"), (PASSWORD_VAR, "p")]))
            .unwrap_err();
        match err {
            CredentialsError::MissingCredentials(vars) => assert_eq!(vars, vec![PASSWORD_VAR]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn implicit_file_without_credentials_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(".env"), "DATABASE_URL=postgres://localhost\n").unwrap();
        let creds = CredentialResolver::new(dir.path())
            .resolve_with(env_of(&[(USERNAME_VAR, "u"), (PASSWORD_VAR, "p")]))
            .expect("creds");
        assert_eq!(creds.username, "u");
    }

    #[test]
    fn explicit_file_without_credentials_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("other.env");
        fs::write(&path, "DATABASE_URL=postgres://localhost\n").unwrap();
        let err = CredentialResolver::new(dir.path())
            .with_env_file(Some(path))
            .resolve_with(env_of(&[(USERNAME_VAR, "u"), (PASSWORD_VAR, "p")]))
            .unwrap_err();
        assert!(matches!(err, CredentialsError::MissingCredentials(ref v) if v.len() == 2));
    }

    #[test]
    fn quoted_values_and_comments_are_parsed() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join(".env"),
            "# peloton\nPELOTON_USERNAME=\"rider@example.com\"\nPELOTON_PASSWORD='p@ss word'\n",
        )
        .unwrap();
        let creds = CredentialResolver::new(dir.path())
            .resolve_with(env_of(&[]))
            .expect("creds");
        assert_eq!(creds.username, "rider@example.com");
        assert_eq!(creds.password.expose_secret(), "p@ss word");
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.env");
        fs::write(&path, "this is not valid\n").unwrap();
        let err = CredentialResolver::new(dir.path())
            .with_env_file(Some(path.clone()))
            .resolve_with(env_of(&[]))
            .unwrap_err();
        match err {
            CredentialsError::InvalidCredentialFile { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn malformed_implicit_file_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(".env"), "this is not valid\n").unwrap();
        let creds = CredentialResolver::new(dir.path())
            .resolve_with(env_of(&[(USERNAME_VAR, "u"), (PASSWORD_VAR, "p")]))
            .expect("creds");
        assert_eq!(creds.username, "u");
    }

    #[test]
    fn tilde_expands_against_home() {
        let home = tempfile::tempdir().expect("home");
        let cwd = tempfile::tempdir().expect("cwd");
        write_creds(&home.path().join("peloton.env"), "home-user", "pw");
        let home_str = home.path().to_string_lossy().into_owned();
        let creds = CredentialResolver::new(cwd.path())
            .resolve_with(env_of(&[
                ("HOME", home_str.as_str()),
                (ENV_FILE_VAR, "~/peloton.env"),
            ]))
            .expect("creds");
        assert_eq!(creds.username, "home-user");
    }

    #[test]
    fn endpoints_default_and_override() {
        assert_eq!(
            Endpoints::from_env_with(env_of(&[])),
            Endpoints {
                api_base_url: DEFAULT_API_BASE_URL.into(),
                auth_base_url: DEFAULT_AUTH_BASE_URL.into(),
            }
        );
        let ep = Endpoints::from_env_with(env_of(&[
            (API_BASE_URL_VAR, "http://localhost:9000/"),
            (AUTH_BASE_URL_VAR, "http://localhost:9001"),
        ]));
        assert_eq!(ep.api_base_url, "http://localhost:9000");
        assert_eq!(ep.auth_base_url, "http://localhost:9001");
    }
}
