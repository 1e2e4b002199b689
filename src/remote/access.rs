use std::path::PathBuf;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// Login details shared by every agent of one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAccess {
    pub user_name: String,
    pub identity_file: Option<PathBuf>,
    pub port: u16,
}

impl RemoteAccess {
    #[must_use]
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            identity_file: None,
            port: DEFAULT_SSH_PORT,
        }
    }

    #[must_use]
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Home directory of the login user on a worker host.
    #[must_use]
    pub fn user_home(&self) -> String {
        if self.user_name == "root" {
            "/root".to_owned()
        } else {
            format!("/home/{}", self.user_name)
        }
    }
}
