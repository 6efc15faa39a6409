//! Command execution on the NAS.
//!
//! Everything above this module talks to the remote host through
//! [`RemoteExecutor`]: one command string in, combined stdout+stderr out.
//! [`ssh::SshSession`] is the production implementation.

pub mod ssh;

use crate::error::RemoteError;

#[allow(async_fn_in_trait)] // used through generics only, never as dyn
pub trait RemoteExecutor {
    /// Run `command` through the remote shell and return its combined output.
    ///
    /// A non-zero exit status is an error; the output printed so far travels
    /// with it in [`RemoteError::Exit`].
    async fn execute(&self, command: &str) -> Result<String, RemoteError>;
}

/// Minimal shell escaping: wrap in single quotes, escape embedded single quotes.
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::RemoteExecutor;
    use crate::error::RemoteError;

    /// Replays canned responses in order and records every command it was given.
    #[derive(Default)]
    pub struct ScriptedExecutor {
        responses: Mutex<VecDeque<Result<String, RemoteError>>>,
        pub commands: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn ok(self, output: &str) -> Self {
            self.responses
                .lock()
                .unwrap()
                .push_back(Ok(output.to_string()));
            self
        }

        pub fn fail(self, output: &str) -> Self {
            self.responses.lock().unwrap().push_back(Err(RemoteError::Exit {
                status: 1,
                output: output.to_string(),
            }));
            self
        }

        pub fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    impl RemoteExecutor for ScriptedExecutor {
        async fn execute(&self, command: &str) -> Result<String, RemoteError> {
            self.commands.lock().unwrap().push(command.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RemoteError::Exit {
                    status: 127,
                    output: format!("unexpected command: {command}"),
                }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_escape_basic() {
        assert_eq!(shell_escape("/share/CACHEDEV1_DATA"), "'/share/CACHEDEV1_DATA'");
    }

    #[test]
    fn shell_escape_with_quotes() {
        assert_eq!(shell_escape("it's a vm"), "'it'\\''s a vm'");
    }
}
