use std::fmt;

pub type ManageResult<T> = Result<T, ManageError>;

#[derive(Debug)]
pub enum ManageError {
    InvalidArgument(String),
    InvalidArgumentType(String),
    MissingIdentifier(String),
    AlreadyExists(String),
    NotFound(String),
    AccessDenied(String),
    InaccessibleAccountNewBucketsPath(String),
    InvalidAccountDistinguishedName(String),
    AccountAccessKeyFlagComplexity,
    AccountSecretKeyFlagComplexity,
    AccessKeyAlreadyExists(String),
    AccountDeleteForbiddenHasBuckets(String),
    UpgradeFailed { cause: String },
    UpgradeStatusFailed(String),
    UpgradeHistoryFailed(String),
    InvalidUpgradeAction(String),
    Io(std::io::Error),
    Malformed(String),
}

impl ManageError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::InvalidArgumentType(_) => "InvalidArgumentType",
            Self::MissingIdentifier(_) => "MissingIdentifier",
            Self::AlreadyExists(_) => "AlreadyExists",
            Self::NotFound(_) => "NotFound",
            Self::AccessDenied(_) => "AccessDenied",
            Self::InaccessibleAccountNewBucketsPath(_) => "InaccessibleAccountNewBucketsPath",
            Self::InvalidAccountDistinguishedName(_) => "InvalidAccountDistinguishedName",
            Self::AccountAccessKeyFlagComplexity => "AccountAccessKeyFlagComplexity",
            Self::AccountSecretKeyFlagComplexity => "AccountSecretKeyFlagComplexity",
            Self::AccessKeyAlreadyExists(_) => "AccessKeyAlreadyExists",
            Self::AccountDeleteForbiddenHasBuckets(_) => "AccountDeleteForbiddenHasBuckets",
            Self::UpgradeFailed { .. } => "UpgradeFailed",
            Self::UpgradeStatusFailed(_) => "UpgradeStatusFailed",
            Self::UpgradeHistoryFailed(_) => "UpgradeHistoryFailed",
            Self::InvalidUpgradeAction(_) => "InvalidUpgradeAction",
            Self::Io(_) => "IO",
            Self::Malformed(_) => "Malformed",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::InvalidArgument(detail) => detail.clone(),
            Self::InvalidArgumentType(detail) => detail.clone(),
            Self::MissingIdentifier(detail) => format!("missing identifier: {detail}"),
            Self::AlreadyExists(detail) => format!("already exists: {detail}"),
            Self::NotFound(detail) => format!("not found: {detail}"),
            Self::AccessDenied(detail) => detail.clone(),
            Self::InaccessibleAccountNewBucketsPath(path) => {
                format!("account new_buckets_path is not accessible: {path}")
            }
            Self::InvalidAccountDistinguishedName(name) => {
                format!("account distinguished name could not be resolved: {name}")
            }
            Self::AccountAccessKeyFlagComplexity => {
                "access_key must be exactly 20 alphanumeric characters".to_string()
            }
            Self::AccountSecretKeyFlagComplexity => {
                "secret_key must be exactly 40 characters from the base64 alphabet".to_string()
            }
            Self::AccessKeyAlreadyExists(key) => {
                format!("access key already belongs to another account: {key}")
            }
            Self::AccountDeleteForbiddenHasBuckets(name) => {
                format!("account {name} cannot be deleted while it owns buckets")
            }
            Self::UpgradeFailed { cause } => format!("upgrade failed: {cause}"),
            Self::UpgradeStatusFailed(detail) => detail.clone(),
            Self::UpgradeHistoryFailed(detail) => detail.clone(),
            Self::InvalidUpgradeAction(action) => format!("invalid upgrade action: {action}"),
            Self::Io(err) => err.to_string(),
            Self::Malformed(detail) => format!("malformed config file: {detail}"),
        }
    }

    pub fn cause(&self) -> Option<String> {
        match self {
            Self::UpgradeFailed { cause } => Some(cause.clone()),
            _ => None,
        }
    }

    /// Errors that stem from how the command was invoked rather than from
    /// the state of the system. The CLI maps these to exit code 1.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_)
                | Self::InvalidArgumentType(_)
                | Self::MissingIdentifier(_)
                | Self::InvalidUpgradeAction(_)
        )
    }
}

impl fmt::Display for ManageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for ManageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ManageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::ManageError;
    use std::io;

    #[test]
    fn codes_are_stable() {
        let cases: &[(ManageError, &str)] = &[
            (ManageError::InvalidArgument("x".into()), "InvalidArgument"),
            (
                ManageError::InvalidArgumentType("x".into()),
                "InvalidArgumentType",
            ),
            (ManageError::MissingIdentifier("name".into()), "MissingIdentifier"),
            (ManageError::AlreadyExists("a".into()), "AlreadyExists"),
            (ManageError::NotFound("a".into()), "NotFound"),
            (ManageError::AccessDenied("locked".into()), "AccessDenied"),
            (
                ManageError::InaccessibleAccountNewBucketsPath("/p".into()),
                "InaccessibleAccountNewBucketsPath",
            ),
            (
                ManageError::InvalidAccountDistinguishedName("u".into()),
                "InvalidAccountDistinguishedName",
            ),
            (
                ManageError::AccountAccessKeyFlagComplexity,
                "AccountAccessKeyFlagComplexity",
            ),
            (
                ManageError::AccountSecretKeyFlagComplexity,
                "AccountSecretKeyFlagComplexity",
            ),
            (
                ManageError::AccessKeyAlreadyExists("K".into()),
                "AccessKeyAlreadyExists",
            ),
            (
                ManageError::AccountDeleteForbiddenHasBuckets("a".into()),
                "AccountDeleteForbiddenHasBuckets",
            ),
            (
                ManageError::UpgradeFailed { cause: "c".into() },
                "UpgradeFailed",
            ),
            (
                ManageError::UpgradeStatusFailed("s".into()),
                "UpgradeStatusFailed",
            ),
            (
                ManageError::UpgradeHistoryFailed("h".into()),
                "UpgradeHistoryFailed",
            ),
            (
                ManageError::InvalidUpgradeAction("drop".into()),
                "InvalidUpgradeAction",
            ),
            (
                ManageError::Io(io::Error::new(io::ErrorKind::Other, "io")),
                "IO",
            ),
            (ManageError::Malformed("bad".into()), "Malformed"),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), *code);
        }
    }

    #[test]
    fn upgrade_failed_exposes_cause() {
        let err = ManageError::UpgradeFailed {
            cause: "system does not exist".into(),
        };
        assert_eq!(err.cause().expect("cause"), "system does not exist");
        assert!(err.message().contains("system does not exist"));
    }

    #[test]
    fn usage_errors_are_flagged() {
        assert!(ManageError::InvalidArgument("x".into()).is_usage());
        assert!(ManageError::MissingIdentifier("name".into()).is_usage());
        assert!(ManageError::InvalidUpgradeAction("x".into()).is_usage());
        assert!(!ManageError::NotFound("a".into()).is_usage());
        assert!(!ManageError::UpgradeFailed { cause: "c".into() }.is_usage());
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = ManageError::NotFound("accounts/a1.json".into());
        let text = err.to_string();
        assert!(text.starts_with("NotFound"));
        assert!(text.contains("accounts/a1.json"));
    }

    #[test]
    fn io_errors_convert_and_keep_source() {
        let err: ManageError = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.code(), "IO");
        assert!(std::error::Error::source(&err).is_some());
    }
}
