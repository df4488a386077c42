use crate::exit_codes::ExitCode;

/// A failed `volley run`, tagged with the exit code it maps to.
#[derive(Debug)]
pub struct RunError {
    code: ExitCode,
    error: anyhow::Error,
}

impl RunError {
    pub fn invalid_input(error: impl Into<anyhow::Error>) -> Self {
        Self {
            code: ExitCode::InvalidInput,
            error: error.into(),
        }
    }

    pub fn runtime(error: impl Into<anyhow::Error>) -> Self {
        Self {
            code: ExitCode::RuntimeError,
            error: error.into(),
        }
    }

    /// Config problems are the user's input; setup failures and engine faults are not.
    pub fn from_core(context: &'static str, err: volley_core::Error) -> Self {
        let code = if err.is_config() {
            ExitCode::InvalidInput
        } else if matches!(err, volley_core::Error::SetupFailure(_)) {
            ExitCode::SetupFailed
        } else {
            ExitCode::RuntimeError
        };
        Self {
            code,
            error: anyhow::Error::new(err).context(context),
        }
    }

    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        self.code
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.error)
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_exit_codes() {
        let config = RunError::from_core("x", volley_core::Error::InvalidVus);
        assert_eq!(config.exit_code(), ExitCode::InvalidInput);

        let fault = RunError::from_core("x", volley_core::Error::EngineFault("boom".into()));
        assert_eq!(fault.exit_code(), ExitCode::RuntimeError);

        let setup = RunError::from_core("x", volley_core::Error::SetupFailure("down".into()));
        assert_eq!(setup.exit_code(), ExitCode::SetupFailed);
    }

    #[test]
    fn display_includes_the_context_chain() {
        let err = RunError::from_core("invalid run configuration", volley_core::Error::InvalidVus);
        let text = err.to_string();
        assert!(text.starts_with("invalid run configuration: "), "{text}");
    }
}
