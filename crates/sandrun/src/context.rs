use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use rquickjs::{AsyncContext, AsyncRuntime, Ctx, Function, Value, async_with};
use tokio::time::Instant;
use tracing::debug;

use crate::{
    TRACE_TARGET_SCRIPT,
    capability::{self, Bridge, Capability, CapabilitySet, sanitize_message},
    config::Limits,
    credentials::Credentials,
    error::{Error, Result},
    host::Host,
    id::RunId,
    limiter::{MemoryLimiter, MemoryMeter},
    marshal,
};

const ENTRY_POINT: &str = "run";

/// Lifecycle of one isolation context. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
    Created,
    GlobalsBound,
    CapabilitiesInstalled,
    ScriptCompiled,
    EntryPointInvoked,
    Completed,
    Failed,
    TimedOut,
}

impl ContextState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

/// What error classification needs to know about the context, cloned into
/// every `with` closure.
#[derive(Clone)]
struct Guard {
    interrupted: Arc<AtomicBool>,
    meter: Arc<MemoryMeter>,
    timeout: Duration,
    memory_limit_mb: u64,
}

impl Guard {
    fn timed_out(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }

    /// The terminal error a resource limit forces, whatever the guest threw.
    fn limit_hit(&self) -> Option<Error> {
        if self.timed_out() {
            Some(Error::ExecutionTimeout(self.timeout))
        } else if self.meter.exceeded() {
            Some(Error::MemoryLimitExceeded(self.memory_limit_mb))
        } else {
            None
        }
    }

    fn classify(&self, ctx: &Ctx<'_>, err: rquickjs::Error) -> Error {
        let thrown = matches!(err, rquickjs::Error::Exception).then(|| ctx.catch());
        if let Some(limit) = self.limit_hit() {
            return limit;
        }
        match (err, thrown) {
            (_, Some(thrown)) => Self::classify_thrown(ctx, thrown),
            (rquickjs::Error::Allocation, _) => Error::MemoryLimitExceeded(self.memory_limit_mb),
            (other, _) => Error::Internal(other.to_string()),
        }
    }

    fn classify_thrown<'js>(ctx: &Ctx<'js>, thrown: Value<'js>) -> Error {
        let Some(exception) = thrown.as_exception() else {
            let rendered = marshal::to_json(thrown).map_or_else(|e| e, |json| match json {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            });
            return Error::Guest(sanitize_message(&format!("Uncaught {rendered}")));
        };

        if let Some(message) = capability::thrown_by_host(ctx, exception.as_object()) {
            return Error::CapabilityFailure(message);
        }
        let name: String = exception.get("name").unwrap_or_default();
        let message = exception.message().unwrap_or_default();
        let message = if name.is_empty() || name == "Error" {
            message
        } else {
            format!("{name}: {message}")
        };
        Error::Guest(sanitize_message(&message))
    }
}

/// One QuickJS runtime and context, owned by a single run and dropped with
/// it.
pub(crate) struct IsolationContext {
    run_id: RunId,
    state: ContextState,
    deadline: Instant,
    guard: Guard,
    // Declared before `runtime` so the context is released first.
    context: AsyncContext,
    runtime: AsyncRuntime,
}

impl IsolationContext {
    /// Allocate a runtime with the run's memory ceiling and an interrupt
    /// handler that aborts guest code once `deadline` has passed.
    pub async fn create(run_id: RunId, limits: &Limits, deadline: Instant) -> Result<Self> {
        let meter = MemoryMeter::new(limits.memory_limit_bytes);
        let runtime = AsyncRuntime::new_with_alloc(MemoryLimiter::new(Arc::clone(&meter)))
            .map_err(|e| match e {
                rquickjs::Error::Allocation => Error::MemoryLimitExceeded(limits.memory_limit_mb),
                other => Error::Internal(format!("failed to allocate runtime: {other}")),
            })?;
        runtime.set_max_stack_size(limits.max_stack_size).await;

        let interrupted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&interrupted);
        let std_deadline = deadline.into_std();
        runtime
            .set_interrupt_handler(Some(Box::new(move || {
                if std::time::Instant::now() >= std_deadline {
                    flag.store(true, Ordering::Relaxed);
                    true
                } else {
                    false
                }
            })))
            .await;

        let context = AsyncContext::full(&runtime).await.map_err(|e| match e {
            rquickjs::Error::Allocation => Error::MemoryLimitExceeded(limits.memory_limit_mb),
            other => Error::Internal(format!("failed to create context: {other}")),
        })?;

        debug!(target: TRACE_TARGET_SCRIPT, %run_id, state = ?ContextState::Created, "isolation context created");
        Ok(Self {
            run_id,
            state: ContextState::Created,
            deadline,
            guard: Guard {
                interrupted,
                meter,
                timeout: limits.timeout,
                memory_limit_mb: limits.memory_limit_mb,
            },
            context,
            runtime,
        })
    }

    pub const fn state(&self) -> ContextState {
        self.state
    }

    /// Bytes currently allocated by the guest heap.
    pub async fn heap_bytes(&self) -> i64 {
        self.runtime.memory_usage().await.malloc_size
    }

    fn expect_state(&self, expected: ContextState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::Internal(format!(
                "isolation context is {:?}, expected {expected:?}",
                self.state
            )))
        }
    }

    fn enter(&mut self, next: ContextState) {
        debug!(target: TRACE_TARGET_SCRIPT, run_id = %self.run_id, from = ?self.state, to = ?next, "isolation context transition");
        self.state = next;
    }

    /// Record a failure and move to the matching terminal state.
    fn fail(&mut self, err: Error) -> Error {
        let next = if matches!(err, Error::ExecutionTimeout(_)) {
            ContextState::TimedOut
        } else {
            ContextState::Failed
        };
        self.enter(next);
        err
    }

    /// Make sure the fresh global object is the only namespace and none of
    /// the names the engine owns are already taken.
    pub async fn bind_globals(&mut self) -> Result<()> {
        self.expect_state(ContextState::Created)?;
        let taken = self
            .context
            .with(|ctx| {
                let globals = ctx.globals();
                Capability::ALL
                    .iter()
                    .map(|c| c.global_name())
                    .chain([ENTRY_POINT])
                    .filter(|name| globals.contains_key(*name).unwrap_or(true))
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .await;
        if !taken.is_empty() {
            return Err(self.fail(Error::Internal(format!(
                "global namespace already defines {}",
                taken.join(", ")
            ))));
        }
        self.enter(ContextState::GlobalsBound);
        Ok(())
    }

    pub async fn install_capabilities<H: Host>(
        &mut self,
        host: Arc<H>,
        capabilities: CapabilitySet,
        http_timeout: Option<Duration>,
    ) -> Result<()> {
        self.expect_state(ContextState::GlobalsBound)?;
        let bridge = Bridge {
            host,
            run_id: self.run_id.clone(),
            http_timeout,
        };
        let guard = self.guard.clone();
        let installed = self
            .context
            .with(|ctx| {
                capability::install(&ctx, capabilities, &bridge).map_err(|e| guard.classify(&ctx, e))
            })
            .await;
        if let Err(e) = installed {
            return Err(self.fail(e));
        }
        self.enter(ContextState::CapabilitiesInstalled);
        Ok(())
    }

    /// Evaluate the script once at top level.
    pub async fn compile(&mut self, source: &str) -> Result<()> {
        self.expect_state(ContextState::CapabilitiesInstalled)?;
        let guard = self.guard.clone();
        let compiled = self
            .context
            .with(|ctx| {
                ctx.eval::<(), _>(source).map_err(|e| match guard.classify(&ctx, e) {
                    Error::Guest(message) | Error::CapabilityFailure(message) => {
                        Error::CompileFailure(message)
                    }
                    other => other,
                })
            })
            .await;
        if let Err(e) = compiled {
            return Err(self.fail(e));
        }
        self.enter(ContextState::ScriptCompiled);
        Ok(())
    }

    /// Call `run` with a deep copy of `credentials`, await it if it returns a
    /// promise, and copy the settled value out.
    ///
    /// `run` is looked up exactly once, in the same turn that calls it.
    pub async fn invoke(&mut self, credentials: &Credentials) -> Result<serde_json::Value> {
        self.expect_state(ContextState::ScriptCompiled)?;

        let guard = self.guard.clone();
        let deadline = self.deadline;
        let input = serde_json::Value::Object(credentials.as_map().clone());
        let outcome: Invocation = async_with!(self.context => |ctx| {
            let call = async {
                let entry = match find_entry_point(&ctx) {
                    Ok(Some(entry)) => entry,
                    Ok(None) => return Invocation::NotCalled(Error::MissingEntryPoint),
                    Err(e) => return Invocation::NotCalled(guard.classify(&ctx, e)),
                };
                let settled = async {
                    let input = marshal::from_json(&ctx, &input).map_err(Error::Internal)?;
                    let returned: Value = entry.call((input,)).map_err(|e| guard.classify(&ctx, e))?;
                    let settled = match returned.try_into_promise() {
                        Ok(promise) => promise
                            .into_future::<Value>()
                            .await
                            .map_err(|e| guard.classify(&ctx, e))?,
                        Err(value) => value,
                    };
                    marshal::to_json(settled)
                        .map_err(|e| guard.limit_hit().unwrap_or(Error::SerializationError(e)))
                };
                Invocation::Called(settled.await)
            };
            match tokio::time::timeout_at(deadline, call).await {
                Ok(outcome) => outcome,
                Err(_) => Invocation::Called(Err(Error::ExecutionTimeout(guard.timeout))),
            }
        })
        .await;

        match outcome {
            Invocation::NotCalled(e) => Err(self.fail(e)),
            Invocation::Called(result) => {
                self.enter(ContextState::EntryPointInvoked);
                match result {
                    Ok(value) => {
                        self.enter(ContextState::Completed);
                        Ok(value)
                    }
                    Err(e) => Err(self.fail(e)),
                }
            }
        }
    }
}

enum Invocation {
    /// Lookup failed, so `run` never ran.
    NotCalled(Error),
    Called(Result<serde_json::Value>),
}

/// `run` as a global property, or as a top-level `let`/`const`/`class`
/// binding which lives in the global lexical scope instead.
fn find_entry_point<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<Option<Function<'js>>> {
    let global: Value<'js> = ctx.globals().get(ENTRY_POINT)?;
    if let Some(f) = global.as_function() {
        return Ok(Some(f.clone()));
    }
    let lexical: Value<'js> = ctx.eval(format!(
        "typeof {ENTRY_POINT} === 'function' ? {ENTRY_POINT} : undefined"
    ))?;
    Ok(lexical.into_function())
}
