use thiserror::Error;

/// All errors generated in `tickhub-data`.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum DataError {
    #[error("invalid symbol '{input}': {reason}")]
    InvalidSymbol { input: String, reason: &'static str },

    #[error("maximum tracked symbols reached ({max})")]
    SubscriptionLimit { max: usize },

    #[error("connection is not registered")]
    UnknownConnection,

    #[error("SocketError: {0}")]
    Socket(String),

    #[error("HttpError: {0}")]
    Http(String),

    #[error("backfill rejected for {symbol}: {detail}")]
    BackfillRejected { symbol: String, detail: String },

    #[error("backfill response malformed for {symbol}: {detail}")]
    MalformedResponse { symbol: String, detail: String },

    #[error("credential unavailable: {0}")]
    Credential(String),

    #[error("invalid url: {0}")]
    Url(String),
}

impl DataError {
    /// Determine if a backfill attempt that produced this error should place
    /// the symbol into failure cooldown.
    ///
    /// Local gating (rate budget, invalid requests) never cools a symbol down;
    /// only an upstream call that actually failed does.
    pub fn should_cooldown(&self) -> bool {
        matches!(
            self,
            DataError::Http(_)
                | DataError::BackfillRejected { .. }
                | DataError::MalformedResponse { .. }
        )
    }
}

impl From<reqwest::Error> for DataError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for DataError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(value.to_string())
    }
}

impl From<url::ParseError> for DataError {
    fn from(value: url::ParseError) -> Self {
        Self::Url(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_error_should_cooldown() {
        struct TestCase {
            input: DataError,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: http transport failures cool the symbol down
                input: DataError::Http("connection refused".to_string()),
                expected: true,
            },
            TestCase {
                // TC1: provider-side rejection cools the symbol down
                input: DataError::BackfillRejected {
                    symbol: "NSE:RELIANCE-EQ".to_string(),
                    detail: "invalid symbol".to_string(),
                },
                expected: true,
            },
            TestCase {
                // TC2: unparseable payload cools the symbol down
                input: DataError::MalformedResponse {
                    symbol: "NSE:RELIANCE-EQ".to_string(),
                    detail: "expected array".to_string(),
                },
                expected: true,
            },
            TestCase {
                // TC3: local validation failure never cools down
                input: DataError::InvalidSymbol {
                    input: "reliance".to_string(),
                    reason: "missing exchange separator ':'",
                },
                expected: false,
            },
            TestCase {
                // TC4: registry cap is a local policy, not an upstream failure
                input: DataError::SubscriptionLimit { max: 50 },
                expected: false,
            },
            TestCase {
                // TC5: streaming socket errors are handled by reconnection
                input: DataError::Socket("connection reset by peer".to_string()),
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(
                test.input.should_cooldown(),
                test.expected,
                "TC{} failed",
                index
            );
        }
    }

    #[test]
    fn test_error_messages_are_descriptive() {
        let error = DataError::SubscriptionLimit { max: 6 };
        assert_eq!(error.to_string(), "maximum tracked symbols reached (6)");

        let error = DataError::InvalidSymbol {
            input: "reliance".to_string(),
            reason: "missing exchange separator ':'",
        };
        assert!(error.to_string().contains("reliance"));
        assert!(error.to_string().contains(':'));
    }
}
