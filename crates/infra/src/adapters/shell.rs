use std::process::Command;

use tracing::debug;

use super::{AdapterError, StepAdapter, StepOutcome, StepRequest};

const OUTPUT_LIMIT: usize = 1024;

/// Runs the step's `command` with `sh -c`.
///
/// Config keys: `workdir` (string) sets the working directory. A step without
/// a command succeeds without a tool call; a non-zero exit is a failed attempt.
#[derive(Debug, Default, Copy, Clone)]
pub struct ShellAdapter;

fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(OUTPUT_LIMIT.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_string()
}

impl StepAdapter for ShellAdapter {
    fn name(&self) -> &str {
        "shell"
    }

    fn execute(&self, request: &StepRequest<'_>) -> Result<StepOutcome, AdapterError> {
        let Some(command) = request
            .step
            .command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
        else {
            return Ok(StepOutcome {
                tool_calls: 0,
                artifacts: request.step.artifacts.clone(),
                output: None,
            });
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        match request.config.get("workdir") {
            Some(serde_json::Value::String(dir)) => {
                cmd.current_dir(dir);
            }
            Some(other) => {
                return Err(AdapterError::Config(format!(
                    "workdir must be a string, got {other}"
                )));
            }
            None => {}
        }

        debug!(
            job_id = %request.job_id,
            step_id = %request.step.id,
            attempt = request.attempt,
            "running shell step"
        );
        let output = cmd.output()?;
        if !output.status.success() {
            return Err(AdapterError::CommandFailed {
                code: output.status.code(),
                stderr: tail(&output.stderr),
            });
        }

        let stdout = tail(&output.stdout);
        Ok(StepOutcome {
            tool_calls: 1,
            artifacts: request.step.artifacts.clone(),
            output: (!stdout.is_empty()).then_some(stdout),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use jobward_core::{JobId, StepSpec};

    fn run(command: Option<&str>) -> Result<StepOutcome, AdapterError> {
        let job_id = JobId::parse("shell_job").unwrap();
        let step = StepSpec {
            id: "s1".to_string(),
            command: command.map(str::to_string),
            executed: true,
            ..StepSpec::default()
        };
        let config = BTreeMap::new();
        ShellAdapter.execute(&StepRequest {
            job_id: &job_id,
            step_index: 0,
            step: &step,
            attempt: 1,
            config: &config,
        })
    }

    #[test]
    fn successful_command_counts_one_tool_call() {
        let outcome = run(Some("echo hello")).unwrap();
        assert_eq!(outcome.tool_calls, 1);
        assert_eq!(outcome.output.as_deref(), Some("hello"));
    }

    #[test]
    fn non_zero_exit_is_a_failure() {
        let err = run(Some("echo broken >&2; exit 3")).unwrap_err();
        match err {
            AdapterError::CommandFailed { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_command_is_a_no_op() {
        let outcome = run(None).unwrap();
        assert_eq!(outcome.tool_calls, 0);
    }

    #[test]
    fn tail_keeps_the_end_of_long_output() {
        let long = "x".repeat(OUTPUT_LIMIT + 10) + "END";
        let kept = tail(long.as_bytes());
        assert_eq!(kept.chars().count(), OUTPUT_LIMIT);
        assert!(kept.ends_with("END"));
    }
}
