use super::{AdapterError, StepAdapter, StepOutcome, StepRequest};

/// Succeeds immediately, reporting one tool call and the step's declared artifacts.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoopAdapter;

impl StepAdapter for NoopAdapter {
    fn name(&self) -> &str {
        "noop"
    }

    fn execute(&self, request: &StepRequest<'_>) -> Result<StepOutcome, AdapterError> {
        Ok(StepOutcome {
            tool_calls: 1,
            artifacts: request.step.artifacts.clone(),
            output: None,
        })
    }
}
