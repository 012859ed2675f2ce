//! The shared execution pipeline.
//!
//! A concrete tool contributes a descriptor and up to four hooks; the
//! [`ToolExecutor`] owns everything else. The per-call order is strict:
//! validate → breaker-admit → semaphore-acquire → spawn → drain+wait →
//! release → record → return. The breaker observes the outcome before
//! metrics are recorded, and metrics recording can never fail the call.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_breaker::{BreakerError, CircuitBreaker};
use warden_metrics::{ExecutionStatus, ToolMetrics};
use warden_types::{ErrorContext, ErrorKind, ToolInput, ToolOutput};

use crate::args;
use crate::errors::ToolError;
use crate::exec::{self, ExecutionRequest};
use crate::spec::{ToolInfo, ToolSpec};
use crate::target::{self, ParsedTarget};

/// A concrete tool policy plugged into the shared pipeline.
///
/// Hooks are synchronous: every step before the spawn is non-blocking by
/// contract, and file probes (wordlist bounds) are small and local.
pub trait ExecutableTool: Send + Sync {
    /// The immutable descriptor.
    fn spec(&self) -> &ToolSpec;

    /// Target authorization on top of the global policy.
    ///
    /// The default accepts host-shaped targets (private address, private
    /// network, lab hostname). URL-oriented tools override this.
    fn validate_target(&self, target: &str) -> Result<ParsedTarget, ToolError> {
        target::parse_host_target(target)
    }

    /// Per-tool semantic validation over the sanitized tokens.
    ///
    /// May normalize (e.g. clamp a rate into policy bounds); returns the
    /// tokens to execute with.
    fn validate_tokens(
        &self,
        tokens: Vec<String>,
        _target: &ParsedTarget,
    ) -> Result<Vec<String>, ToolError> {
        Ok(tokens)
    }

    /// Optimizer: inject conservative defaults the caller did not specify.
    ///
    /// Must never override a caller-supplied value, and every injected
    /// token must already be admissible under the descriptor.
    fn shape_args(&self, tokens: Vec<String>) -> Vec<String> {
        tokens
    }

    /// Post-execution result shaping.
    fn finish_output(&self, output: ToolOutput) -> ToolOutput {
        output
    }

    /// Introspection record for discovery endpoints.
    fn tool_info(&self) -> ToolInfo {
        ToolInfo::from_spec(self.spec())
    }
}

/// Owns one tool plus the shared machinery around it.
///
/// The registry constructs executors, passing in the breaker and metrics it
/// owns; the tool itself never reaches back into either.
pub struct ToolExecutor {
    tool: Arc<dyn ExecutableTool>,
    breaker: CircuitBreaker,
    metrics: Option<ToolMetrics>,
    semaphore: OnceCell<Arc<Semaphore>>,
}

impl ToolExecutor {
    /// Wire a tool to its breaker and (optional) metrics wrapper.
    pub fn new(
        tool: Arc<dyn ExecutableTool>,
        breaker: CircuitBreaker,
        metrics: Option<ToolMetrics>,
    ) -> Self {
        Self {
            tool,
            breaker,
            metrics,
            semaphore: OnceCell::new(),
        }
    }

    /// The wrapped tool.
    pub fn tool(&self) -> &Arc<dyn ExecutableTool> {
        &self.tool
    }

    /// The tool's breaker (for health checks and stats endpoints).
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run one invocation end to end. Never panics, never throws: every
    /// failure path returns a structured [`ToolOutput`].
    pub async fn run(&self, input: ToolInput) -> ToolOutput {
        let correlation_id = input
            .correlation_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let spec = self.tool.spec();
        debug!(
            tool = %spec.name,
            target = %input.target,
            correlation_id = %correlation_id,
            "invocation received"
        );

        let request = match self.prepare(&input) {
            Ok(request) => request,
            Err(err) => {
                // Validation failures are resolved locally: no breaker, no
                // subprocess.
                return self.finish_failure(err, &input, correlation_id);
            }
        };

        let gated = self.execute_gated(request);
        let result = self
            .breaker
            .call_with(gated, ToolError::counts_toward_breaker)
            .await;

        match result {
            Ok(captured) => {
                let elapsed_sec = captured.elapsed_sec;
                let mut output = ToolOutput::completed(
                    captured.stdout,
                    captured.stderr,
                    captured.returncode,
                    elapsed_sec,
                    correlation_id.clone(),
                );
                output.truncated_stdout = captured.truncated_stdout;
                output.truncated_stderr = captured.truncated_stderr;
                if captured.returncode != 0 {
                    output.error =
                        Some(format!("command exited with status {}", captured.returncode));
                }
                let status = if captured.returncode == 0 {
                    ExecutionStatus::Success
                } else {
                    ExecutionStatus::Failure
                };
                self.record(status, output.error_type, elapsed_sec);
                info!(
                    tool = %spec.name,
                    correlation_id = %correlation_id,
                    returncode = captured.returncode,
                    elapsed_sec,
                    "invocation finished"
                );
                self.tool.finish_output(output)
            }
            Err(BreakerError::Open { retry_after, .. }) => {
                self.finish_rejected(retry_after, &input, correlation_id)
            }
            Err(BreakerError::Inner(err)) => self.finish_failure(err, &input, correlation_id),
        }
    }

    /// Validation and shaping: everything that happens before any await.
    fn prepare(&self, input: &ToolInput) -> Result<ExecutionRequest, ToolError> {
        let spec = self.tool.spec();
        let parsed = self.tool.validate_target(&input.target)?;
        let tokens = args::sanitize_extra_args(&input.extra_args, spec)?;
        let tokens = self.tool.validate_tokens(tokens, &parsed)?;
        let shaped = self.tool.shape_args(tokens);
        // Shaping is idempotent under validation; anything else is a policy
        // bug, not caller error.
        args::check_flag_policy(&shaped, spec).map_err(|e| ToolError::Internal {
            reason: format!("shaped arguments failed re-validation: {e}"),
        })?;
        Ok(ExecutionRequest {
            command: spec.command.clone(),
            args: shaped,
            target: input.target.clone(),
            timeout: spec.effective_timeout(input.timeout_sec),
            max_stdout_bytes: spec.max_stdout_bytes,
            max_stderr_bytes: spec.max_stderr_bytes,
        })
    }

    /// Concurrency gate plus subprocess execution (the breaker-protected part).
    async fn execute_gated(
        &self,
        request: ExecutionRequest,
    ) -> Result<exec::CapturedOutput, ToolError> {
        let semaphore = self
            .semaphore
            .get_or_init(|| {
                let permits = self.tool.spec().concurrency;
                async move { Arc::new(Semaphore::new(permits)) }
            })
            .await
            .clone();
        let _permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| ToolError::ResourceExhausted {
                reason: "concurrency gate closed".to_string(),
            })?;
        let _active = self.metrics.as_ref().map(ToolMetrics::begin_execution);
        exec::execute(request).await
        // Permit and gauge guard drop here, on every path.
    }

    /// Build, record, and log the output for an execution-path failure.
    fn finish_failure(
        &self,
        err: ToolError,
        input: &ToolInput,
        correlation_id: String,
    ) -> ToolOutput {
        let spec = self.tool.spec();
        let kind = err.kind();
        let context = ErrorContext::new(kind, err.to_string(), &spec.name, &input.target);
        warn!(
            tool = %spec.name,
            correlation_id = %correlation_id,
            error_type = %kind,
            error = %context.message,
            suggestion = %context.recovery_suggestion,
            "invocation failed"
        );

        let (mut output, status) = match err {
            ToolError::Timeout {
                stdout,
                stderr,
                truncated_stdout,
                truncated_stderr,
                elapsed_sec,
                timeout_sec,
            } => {
                let mut output =
                    ToolOutput::timed_out(stdout, stderr, elapsed_sec, correlation_id);
                output.truncated_stdout = truncated_stdout;
                output.truncated_stderr = truncated_stderr;
                output.annotate("timeout_sec", serde_json::json!(timeout_sec));
                (output, ExecutionStatus::Timeout)
            }
            other => (
                ToolOutput::failure(kind, other.to_string(), correlation_id),
                ExecutionStatus::Failure,
            ),
        };
        output.annotate(
            "recovery_suggestion",
            serde_json::json!(context.recovery_suggestion),
        );
        let elapsed = output.execution_time;
        self.record(status, Some(kind), elapsed);
        self.tool.finish_output(output)
    }

    /// Build the output for a breaker rejection (no subprocess ran).
    fn finish_rejected(
        &self,
        retry_after: Duration,
        input: &ToolInput,
        correlation_id: String,
    ) -> ToolOutput {
        let spec = self.tool.spec();
        let kind = ErrorKind::CircuitBreakerOpen;
        let context = ErrorContext::new(
            kind,
            format!("circuit breaker open, retry after {:.0}s", retry_after.as_secs_f64()),
            &spec.name,
            &input.target,
        );
        warn!(
            tool = %spec.name,
            correlation_id = %correlation_id,
            retry_after_sec = retry_after.as_secs_f64(),
            "invocation rejected by circuit breaker"
        );
        let mut output = ToolOutput::failure(kind, context.message.clone(), correlation_id);
        output.annotate("retry_after_sec", serde_json::json!(retry_after.as_secs_f64()));
        output.annotate(
            "recovery_suggestion",
            serde_json::json!(context.recovery_suggestion),
        );
        self.record(ExecutionStatus::Failure, Some(kind), 0.0);
        self.tool.finish_output(output)
    }

    fn record(&self, status: ExecutionStatus, kind: Option<ErrorKind>, elapsed_sec: f64) {
        if let Some(metrics) = &self.metrics {
            metrics.record_execution(status, kind, elapsed_sec);
        }
    }
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("tool", &self.tool.spec().name)
            .finish()
    }
}
