//! Interactive prompts.

use std::io::BufRead;

use anyhow::{Result, bail};
use dialoguer::{Confirm, Password};
use zeroize::Zeroizing;

/// Where vault passwords come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordSource {
    Terminal,
    /// First line of stdin, for scripting.
    Stdin,
}

/// Prompt for a new password, asking twice on a terminal.
pub fn new_password(source: PasswordSource) -> Result<Zeroizing<String>> {
    let password = match source {
        PasswordSource::Terminal => Zeroizing::new(
            Password::new()
                .with_prompt("New vault password")
                .with_confirmation("Repeat password", "Passwords do not match")
                .interact()?,
        ),
        PasswordSource::Stdin => read_line(&mut std::io::stdin().lock())?,
    };
    if password.is_empty() {
        bail!("Password must not be empty");
    }
    Ok(password)
}

/// Prompt for an existing password.
pub fn password(source: PasswordSource) -> Result<Zeroizing<String>> {
    match source {
        PasswordSource::Terminal => Ok(Zeroizing::new(
            Password::new().with_prompt("Vault password").interact()?,
        )),
        PasswordSource::Stdin => read_line(&mut std::io::stdin().lock()),
    }
}

/// Ask a yes/no question. `assume_yes` skips the prompt.
pub fn confirm(prompt: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    Ok(Confirm::new().with_prompt(prompt).default(false).interact()?)
}

/// Approve replacing an existing identity.
///
/// Only `--yes` approves it when passwords come from stdin; there is no
/// terminal to ask on.
pub fn confirm_replace(question: &str, yes: bool, source: PasswordSource) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    match source {
        PasswordSource::Terminal => confirm(question, false),
        PasswordSource::Stdin => bail!("pass --yes to replace the existing identity"),
    }
}

/// Read one line, without its line terminator.
fn read_line(reader: &mut impl BufRead) -> Result<Zeroizing<String>> {
    let mut line = Zeroizing::new(String::new());
    if reader.read_line(&mut line)? == 0 {
        bail!("No password on stdin");
    }
    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed);
    Ok(line)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn read_line_strips_terminator_only() {
        let mut input = &b" secret pw \r\nnext"[..];
        assert_eq!(read_line(&mut input).unwrap().as_str(), " secret pw ");
    }

    #[test]
    fn read_line_rejects_empty_input() {
        let mut input = &b""[..];
        assert!(read_line(&mut input).is_err());
    }

    #[test]
    fn assume_yes_skips_prompt() {
        assert!(confirm("Pin?", true).unwrap());
    }

    #[test]
    fn stdin_passwords_do_not_imply_replace() {
        let err = confirm_replace("Replace?", false, PasswordSource::Stdin).unwrap_err();
        assert!(err.to_string().contains("--yes"));
        assert!(confirm_replace("Replace?", true, PasswordSource::Stdin).unwrap());
    }
}
