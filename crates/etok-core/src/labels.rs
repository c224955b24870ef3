pub const APPROVALS_ANNOTATION_PREFIX: &str = "approvals.etok.dev/";
pub const APPROVED: &str = "approved";

pub const CREATED_BY_LABEL: &str = "app.kubernetes.io/created-by";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const WORKSPACE_LABEL: &str = "etok.dev/workspace";

pub const GITHUB_CHECK_RUN_ID_LABEL: &str = "etok.dev/github-checkrun-id";
pub const GITHUB_CHECK_RUN_NAME_LABEL: &str = "etok.dev/github-checkrun-name";
pub const GITHUB_SHA_LABEL: &str = "etok.dev/github-sha";
pub const GITHUB_OWNER_LABEL: &str = "etok.dev/github-owner";
pub const GITHUB_REPO_LABEL: &str = "etok.dev/github-repo";
pub const GITHUB_COMMAND_LABEL: &str = "etok.dev/github-command";
pub const GITHUB_INSTALL_ID_LABEL: &str = "etok.dev/github-app-install-id";
pub const GITHUB_TRIGGERED_LABEL: &str = "etok.dev/github-triggered";

pub fn approval_key(run: &str) -> String {
    format!("{}{}", APPROVALS_ANNOTATION_PREFIX, run)
}

/// Checks a value against the Kubernetes label value syntax: at most 63
/// characters, alphanumerics plus `-`, `_` and `.`, beginning and ending with
/// an alphanumeric.
pub fn validate_label_value(value: &str) -> anyhow::Result<()> {
    if value.is_empty() {
        return Ok(());
    }

    if value.len() > 63 {
        return Err(anyhow::anyhow!(
            "invalid label value {:?}: must be no more than 63 characters",
            value
        ));
    }

    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    let alphanumeric_ends = value
        .chars()
        .next()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false)
        && value
            .chars()
            .last()
            .map(|c| c.is_ascii_alphanumeric())
            .unwrap_or(false);

    if !valid_chars || !alphanumeric_ends {
        return Err(anyhow::anyhow!("invalid label value {:?}", value));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_label_value() {
        assert!(validate_label_value("").is_ok());
        assert!(validate_label_value("leg100").is_ok());
        assert!(validate_label_value("etok_e2e.repo-1").is_ok());
        assert!(validate_label_value("a0f4c1b9e1a54a1a6b3e4a0b7c9d1e2f3a4b5c6d").is_ok());

        assert!(validate_label_value("-leading").is_err());
        assert!(validate_label_value("has space").is_err());
        assert!(validate_label_value("owner/repo").is_err());
        assert!(validate_label_value(&"x".repeat(64)).is_err());
    }

    #[test]
    fn test_approval_key() {
        assert_eq!(approval_key("run-12345"), "approvals.etok.dev/run-12345");
    }
}
