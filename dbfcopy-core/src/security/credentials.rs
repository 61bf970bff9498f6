//! SQL login credentials with automatic memory zeroing.

use zeroize::{Zeroize, Zeroizing};

/// SQL Server login that zeroes its memory on drop.
///
/// # Example
///
/// ```rust
/// use dbfcopy_core::security::Credentials;
///
/// let creds = Credentials::new("loader".to_string(), Some("secret".to_string()));
/// assert_eq!(creds.username(), "loader");
/// assert!(!format!("{:?}", creds).contains("secret"));
/// ```
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct Credentials {
    username: Zeroizing<String>,
    password: Zeroizing<Option<String>>,
}

impl Credentials {
    pub fn new(username: String, password: Option<String>) -> Self {
        Self {
            username: Zeroizing::new(username),
            password: Zeroizing::new(password),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Exposes the password for the authentication handshake only.
    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username())
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
