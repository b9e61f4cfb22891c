//! Earthdata credentials in a `.netrc` file.
//!
//! The NDSI listing and its signed downloads require an Earthdata login.
//! [`ensure_netrc`] writes the machine entry once from the
//! `EARTHDATA_USERNAME` / `EARTHDATA_PASSWORD` environment variables when
//! no netrc exists yet; [`Netrc`] reads it back so the NDSI client can
//! attach basic auth to requests for the configured machine.

use std::path::{Path, PathBuf};

use crate::SourceError;

/// Environment variable holding the Earthdata user name.
pub const USERNAME_ENV: &str = "EARTHDATA_USERNAME";

/// Environment variable holding the Earthdata password.
pub const PASSWORD_ENV: &str = "EARTHDATA_PASSWORD";

/// A login for one machine.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub login: String,
    /// Password.
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"***")
            .finish()
    }
}

/// Parsed `.netrc` contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Netrc {
    machines: Vec<(String, Credentials)>,
    default: Option<Credentials>,
}

impl Netrc {
    /// Parses netrc text (`machine`, `login`, `password`, `default`
    /// tokens; `account` and `macdef` are skipped).
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut netrc = Self::default();
        let mut tokens = text.split_whitespace();

        // (machine name or None for `default`, login, password)
        let mut current: Option<(Option<String>, String, String)> = None;

        let flush = |netrc: &mut Self, entry: Option<(Option<String>, String, String)>| {
            if let Some((machine, login, password)) = entry {
                let creds = Credentials { login, password };
                match machine {
                    Some(host) => netrc.machines.push((host, creds)),
                    None => netrc.default = Some(creds),
                }
            }
        };

        while let Some(token) = tokens.next() {
            match token {
                "machine" => {
                    flush(&mut netrc, current.take());
                    let host = tokens.next().unwrap_or_default().to_string();
                    current = Some((Some(host), String::new(), String::new()));
                }
                "default" => {
                    flush(&mut netrc, current.take());
                    current = Some((None, String::new(), String::new()));
                }
                "login" => {
                    if let (Some(entry), Some(value)) = (current.as_mut(), tokens.next()) {
                        value.clone_into(&mut entry.1);
                    }
                }
                "password" => {
                    if let (Some(entry), Some(value)) = (current.as_mut(), tokens.next()) {
                        value.clone_into(&mut entry.2);
                    }
                }
                "account" => {
                    tokens.next();
                }
                "macdef" => {
                    tokens.next();
                }
                _ => {}
            }
        }
        flush(&mut netrc, current.take());

        netrc
    }

    /// Reads and parses the netrc at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Io`] if the file cannot be read.
    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let text = std::fs::read_to_string(path).map_err(|e| SourceError::io(path, e))?;
        Ok(Self::parse(&text))
    }

    /// Credentials for `host`, falling back to the `default` entry.
    #[must_use]
    pub fn credentials_for(&self, host: &str) -> Option<&Credentials> {
        self.machines
            .iter()
            .find(|(machine, _)| machine.eq_ignore_ascii_case(host))
            .map(|(_, creds)| creds)
            .or(self.default.as_ref())
    }
}

/// `$HOME/.netrc`, if `HOME` is set.
#[must_use]
pub fn default_netrc_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".netrc"))
}

/// Writes a netrc entry for `machine` at `path` unless the file exists.
///
/// Returns `true` if the file was written. The file is created with mode
/// `0600` on Unix.
///
/// # Errors
///
/// Returns [`SourceError::Configuration`] if the file is absent and either
/// credential is missing, or [`SourceError::Io`] if it cannot be written.
pub fn ensure_netrc(
    path: &Path,
    machine: &str,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<bool, SourceError> {
    if path.exists() {
        log::debug!("Using existing credentials in {}", path.display());
        return Ok(false);
    }

    let (Some(username), Some(password)) = (
        username.filter(|u| !u.is_empty()),
        password.filter(|p| !p.is_empty()),
    ) else {
        log::error!("Missing {USERNAME_ENV} or {PASSWORD_ENV} in environment.");
        return Err(SourceError::Configuration(format!(
            "missing {USERNAME_ENV} or {PASSWORD_ENV} and no credentials at {}",
            path.display()
        )));
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SourceError::io(parent, e))?;
    }
    std::fs::write(
        path,
        format!("machine {machine}\nlogin {username}\npassword {password}\n"),
    )
    .map_err(|e| SourceError::io(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| SourceError::io(path, e))?;
    }

    log::info!("Wrote credentials for {machine} to {}", path.display());
    Ok(true)
}

/// [`ensure_netrc`] with the credentials taken from [`USERNAME_ENV`] and
/// [`PASSWORD_ENV`].
///
/// # Errors
///
/// See [`ensure_netrc`].
pub fn ensure_netrc_from_env(path: &Path, machine: &str) -> Result<bool, SourceError> {
    let username = std::env::var(USERNAME_ENV).ok();
    let password = std::env::var(PASSWORD_ENV).ok();
    ensure_netrc(path, machine, username.as_deref(), password.as_deref())
}
