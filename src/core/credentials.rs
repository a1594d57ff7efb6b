//! Where the ssh password for a fleet run comes from.

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// Read from the named environment variable.
    Environment(String),
    /// Ask on the terminal.
    Prompt,
    Provided(String),
}

impl CredentialSource {
    /// Environment variable when it is set and non-empty, otherwise a prompt.
    pub fn from_env_or_prompt(var: &str) -> Self {
        match std::env::var(var) {
            Ok(value) if !value.is_empty() => CredentialSource::Environment(var.to_string()),
            _ => CredentialSource::Prompt,
        }
    }

    pub fn resolve(&self) -> Result<String> {
        match self {
            CredentialSource::Environment(var) => match std::env::var(var) {
                Ok(value) if !value.is_empty() => Ok(value),
                _ => Err(Error::validation_missing_argument(vec![var.clone()])
                    .with_hint(format!("Export {} with the ssh password", var))),
            },
            CredentialSource::Prompt => prompt_password(),
            CredentialSource::Provided(value) => Ok(value.clone()),
        }
    }
}

fn prompt_password() -> Result<String> {
    if !std::io::IsTerminal::is_terminal(&std::io::stdin()) {
        return Err(Error::validation_missing_argument(vec!["password".to_string()])
            .with_hint("Set the password environment variable when running non-interactively"));
    }

    dialoguer::Password::new()
        .with_prompt("SSH password")
        .interact()
        .map_err(|e| Error::internal_io(e.to_string(), Some("read password".to_string())))
}
