use std::process::Command;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::Instrument;

use crate::DiscoveryError;

/// A helper program launched as a child process, which reports something we need by printing a
/// JSON object on stdout.
///
/// The helper is terminated when this is dropped.  Its stdin is held open until then, since
/// native messaging hosts treat a closed stdin as the signal to exit.
#[derive(Debug)]
pub(crate) struct HelperProcess {
    _child: tokio::process::Child,
    _stdin: tokio::process::ChildStdin,
    stdout: tokio::process::ChildStdout,
    span: tracing::Span,
}

impl HelperProcess {
    pub(crate) fn spawn(command: Command) -> Result<Self, DiscoveryError> {
        let mut command: tokio::process::Command = command.into();

        command
            .kill_on_drop(true)
            .stdin(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped());

        let program = command.as_std().get_program().to_string_lossy().to_string();
        let args = command
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect::<Vec<_>>();

        tracing::debug!(%program, args = %args.join(" "), "Spawning helper as child process");

        let mut child = command.spawn().map_err(|e| DiscoveryError::SpawnHelper {
            source: e,
            program,
            args,
        })?;

        let pid = child.id();
        tracing::debug!(pid, "Helper process spawned");

        let stdin = child.stdin.take().expect("BUG: stdin is hard-coded as piped");
        let stdout = child.stdout.take().expect("BUG: stdout is hard-coded as piped");
        let stderr = child.stderr.take().expect("BUG: stderr is hard-coded as piped");
        let span = tracing::info_span!("helper_process", pid);

        tokio::spawn(
            async move {
                let mut lines = BufReader::new(stderr).lines();

                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("{}", line);
                }
            }
            .instrument(tracing::info_span!("helper_process_stderr", pid)),
        );

        Ok(Self {
            _child: child,
            _stdin: stdin,
            stdout,
            span,
        })
    }

    /// Read stdout until it contains a complete JSON object, and return that object.
    ///
    /// Anything before the first `{` is skipped; native messaging hosts prefix each message with
    /// a binary length.
    pub(crate) async fn read_json_object(&mut self, timeout: Duration) -> Result<JsonValue, DiscoveryError> {
        let span = self.span.clone();
        let read = async {
            let mut output = Vec::new();
            let mut buf = [0u8; 4096];

            loop {
                let count = self
                    .stdout
                    .read(&mut buf)
                    .await
                    .map_err(|e| DiscoveryError::ReadHelper { source: e })?;

                if count == 0 {
                    return Err(DiscoveryError::HelperExited {
                        output: String::from_utf8_lossy(&output).into_owned(),
                    });
                }

                output.extend_from_slice(&buf[..count]);
                tracing::trace!(bytes = output.len(), "Read helper output");

                if let Some(object) = parse_first_json_object(&output) {
                    return Ok(object);
                }
            }
        };

        match tokio::time::timeout(timeout, read.instrument(span)).await {
            Ok(result) => result,
            Err(_) => Err(DiscoveryError::HelperTimedOut { timeout }),
        }
    }
}

/// Parse the first JSON object in `output`, if it's complete yet.
fn parse_first_json_object(output: &[u8]) -> Option<JsonValue> {
    let start = output.iter().position(|b| *b == b'{')?;

    match serde_json::Deserializer::from_slice(&output[start..])
        .into_iter::<JsonValue>()
        .next()
    {
        Some(Ok(value)) => Some(value),
        Some(Err(e)) if e.is_eof() => None,
        Some(Err(e)) => {
            tracing::trace!(error = %e, "Helper output is not valid JSON (yet)");
            None
        }
        None => None,
    }
}

/// Tests for this rely on UNIX-specific commands, so on Windows we'll just have to assume this
/// works for now.
#[cfg(all(unix, test))]
mod tests {
    use super::*;
    use crate::testing;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn parse_skips_prefix() {
        assert_eq!(
            parse_first_json_object(b"\x1a\x00\x00\x00{\"a\": 1}trailing"),
            Some(json!({"a": 1}))
        );
        assert_eq!(parse_first_json_object(b"no object here"), None);
        assert_eq!(parse_first_json_object(b"{\"a\": [1, 2"), None);
    }

    #[tokio::test]
    async fn reads_object_and_ignores_the_rest() {
        testing::init_test_logging();

        let mut helper = HelperProcess::spawn(shell(
            r#"printf 'XXXX{"mcpServers": {"mypc": {"url": "https://127.0.0.1:31173/sse"}}}'; echo "started" >&2; sleep 30"#,
        ))
        .unwrap();

        let object = helper.read_json_object(Duration::from_secs(5)).await.unwrap();
        assert_eq!(object["mcpServers"]["mypc"]["url"], json!("https://127.0.0.1:31173/sse"));
    }

    #[tokio::test]
    async fn object_split_across_writes() {
        testing::init_test_logging();

        let mut helper = HelperProcess::spawn(shell(r#"printf '{"a": '; sleep 0.2; printf '[1, 2]}'; sleep 30"#)).unwrap();

        let object = helper.read_json_object(Duration::from_secs(5)).await.unwrap();
        assert_eq!(object, json!({"a": [1, 2]}));
    }

    #[tokio::test]
    async fn exit_without_object() {
        testing::init_test_logging();

        let mut helper = HelperProcess::spawn(shell("printf 'not json'")).unwrap();

        assert_matches!(
            helper.read_json_object(Duration::from_secs(5)).await,
            Err(DiscoveryError::HelperExited { output }) if output == "not json"
        );
    }

    #[tokio::test]
    async fn silent_helper_times_out() {
        testing::init_test_logging();

        let mut helper = HelperProcess::spawn(shell("sleep 30")).unwrap();

        assert_matches!(
            helper.read_json_object(Duration::from_millis(200)).await,
            Err(DiscoveryError::HelperTimedOut { .. })
        );
    }

    #[tokio::test]
    async fn missing_program() {
        testing::init_test_logging();

        assert_matches!(
            HelperProcess::spawn(Command::new("/nonexistent/mcplink-helper")),
            Err(DiscoveryError::SpawnHelper { program, .. }) if program == "/nonexistent/mcplink-helper"
        );
    }
}
