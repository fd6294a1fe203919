//! Request dispatcher.
//!
//! Handles one work request at a time in three steps:
//!
//! 1. **plan**: the tooling environment turns the raw compile request into a
//!    compilation script
//! 2. **compile**: the compile environment evaluates the script and returns
//!    a [`Signal`]
//! 3. **package**: the tooling environment assembles the output archive
//!
//! The signal drives the compile cache: `Ok` keeps the environment, `reload`
//! succeeds and then discards it, `restart` discards it and runs the script
//! again on a fresh one, up to `max_restarts` times.
//!
//! Nothing escapes [`Dispatcher::handle`]: every failure becomes a failed
//! [`WorkResponse`] and the worker keeps serving.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use cljw_protocol::{CompileRequest, ErrorCode, Signal, WorkError, WorkRequest, WorkResponse};

use crate::cache::{Acquired, CacheError};
use crate::config::WorkerConfig;
use crate::digest::DigestMap;
use crate::environment::{Environment, EnvironmentError, EnvironmentFactory, Invocation};
use crate::roles::{Role, RoleCaches};
use crate::transcript::Transcript;

/// Errors from handling one request.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    Work(#[from] WorkError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("{role} environment: {source}")]
    Invoke {
        role: Role,
        #[source]
        source: EnvironmentError,
    },

    #[error("{entry_point} returned {found}, expected a compilation script")]
    UnexpectedPlan { entry_point: String, found: Value },

    #[error("compiler requested a restart {attempts} times in a row")]
    RestartLoop { attempts: u32 },
}

impl DispatchError {
    /// Map onto the error reported to the build tool.
    pub fn to_work_error(&self) -> WorkError {
        match self {
            Self::Work(e) => e.clone(),
            Self::Cache(CacheError::Create { role, source }) => WorkError::with_data(
                ErrorCode::EnvironmentFailed,
                format!("failed to create {} environment: {}", role, source),
                serde_json::json!({ "role": role }),
            ),
            Self::Cache(CacheError::Load {
                location, source, ..
            }) => match source {
                EnvironmentError::Resolution { reason, .. } => {
                    WorkError::resolution_failed(location, reason)
                }
                EnvironmentError::Guest { message, .. } => {
                    WorkError::resolution_failed(location, message)
                }
                other => WorkError::with_data(
                    ErrorCode::EnvironmentFailed,
                    format!("environment failed while loading '{}': {}", location, other),
                    serde_json::json!({ "location": location }),
                ),
            },
            Self::Invoke {
                source: EnvironmentError::Guest {
                    entry_point,
                    message,
                    ..
                },
                ..
            } => WorkError::compiler_failed(entry_point, message),
            Self::Invoke { role, source } => WorkError::with_data(
                ErrorCode::EnvironmentFailed,
                format!("{} environment failed: {}", role, source),
                serde_json::json!({ "role": role }),
            ),
            Self::UnexpectedPlan { .. } => WorkError::guest_protocol(self.to_string()),
            Self::RestartLoop { attempts } => WorkError::restart_loop(*attempts),
        }
    }
}

/// Owns both role caches and the factory that fills them.
pub struct Dispatcher<F: EnvironmentFactory> {
    config: WorkerConfig,
    factory: F,
    caches: RoleCaches,
    tooling_key: DigestMap,
}

impl<F: EnvironmentFactory> Dispatcher<F> {
    pub fn new(config: WorkerConfig, factory: F) -> Self {
        Self {
            config,
            factory,
            caches: RoleCaches::new(),
            tooling_key: DigestMap::new(),
        }
    }

    /// Guard the tooling environment with digests of its classpath.
    pub fn with_tooling_key(mut self, key: DigestMap) -> Self {
        self.tooling_key = key;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn caches(&self) -> &RoleCaches {
        &self.caches
    }

    /// Handle one request. Always produces a response.
    pub fn handle(&mut self, request: &WorkRequest) -> WorkResponse {
        let mut transcript = Transcript::new(request.is_verbose());
        let result = self.process(request, &mut transcript);

        let response = match result {
            Ok(signal) => {
                debug!(request_id = request.request_id, ?signal, "request succeeded");
                WorkResponse::success(request.request_id, String::new())
            }
            Err(e) => {
                let error = e.to_work_error();
                warn!(request_id = request.request_id, code = %error.code, "{}", error.message);
                transcript.fail(&error);
                WorkResponse::failure(request.request_id, String::new())
            }
        };

        let output = transcript.into_output();
        if !output.is_empty() {
            info!(request_id = request.request_id, "worker output:\n{}", output.trim_end());
        }
        WorkResponse { output, ..response }
    }

    /// Discard every live environment.
    pub fn shutdown(&mut self) -> usize {
        let discarded = self.caches.discard_all();
        info!(discarded, "environments released");
        discarded
    }

    fn process(
        &mut self,
        request: &WorkRequest,
        transcript: &mut Transcript,
    ) -> Result<Signal, DispatchError> {
        let payload = request
            .payload()
            .ok_or_else(|| WorkError::invalid_request("request has no arguments"))?;
        transcript.remember("request", payload);

        let compile = CompileRequest::from_json(payload)?;

        let script = self.plan(payload, transcript)?;
        transcript.remember("script", script.as_str());

        let signal = self.compile(&compile, request, &script, transcript)?;

        let packaged = self.package(payload, transcript);

        if signal == Signal::OkThenInvalidate {
            self.caches.get_mut(Role::Compile).discard();
            transcript.note("compile environment discarded (reload)");
        }

        packaged.map(|()| signal)
    }

    fn plan(&mut self, payload: &str, transcript: &mut Transcript) -> Result<String, DispatchError> {
        let entry_point = self.config.entry_points.plan.clone();
        let invocation = self.invoke_tooling(&entry_point, payload, transcript)?;
        match invocation.value {
            Value::String(script) => Ok(script),
            found => Err(DispatchError::UnexpectedPlan { entry_point, found }),
        }
    }

    fn compile(
        &mut self,
        compile: &CompileRequest,
        request: &WorkRequest,
        script: &str,
        transcript: &mut Transcript,
    ) -> Result<Signal, DispatchError> {
        let key = DigestMap::for_request(&compile.classpath, &request.inputs);
        let entry_point = self.config.entry_points.compile.clone();
        let mut restarts = 0;

        loop {
            let Acquired {
                acquisition,
                environment,
            } = self.caches.get_mut(Role::Compile).acquire(
                &mut self.factory,
                key.clone(),
                &compile.classpath,
            )?;
            transcript.note(format!(
                "compile environment {}: {}",
                environment.id(),
                acquisition
            ));

            let result = environment.invoke(&entry_point, script);
            let invocation = self.settle(Role::Compile, result, transcript)?;
            let signal = Signal::from_value(&invocation.value)?;
            if signal != Signal::Retry {
                return Ok(signal);
            }

            restarts += 1;
            self.caches.get_mut(Role::Compile).discard();
            if restarts > self.config.max_restarts {
                return Err(DispatchError::RestartLoop { attempts: restarts });
            }
            info!(restarts, "compiler requested a restart");
            transcript.note("compile environment discarded (restart)");
        }
    }

    fn package(&mut self, payload: &str, transcript: &mut Transcript) -> Result<(), DispatchError> {
        let Some(entry_point) = self.config.entry_points.package().map(str::to_string) else {
            return Ok(());
        };
        self.invoke_tooling(&entry_point, payload, transcript)?;
        Ok(())
    }

    fn invoke_tooling(
        &mut self,
        entry_point: &str,
        payload: &str,
        transcript: &mut Transcript,
    ) -> Result<Invocation, DispatchError> {
        let Acquired {
            acquisition,
            environment,
        } = self.caches.get_mut(Role::Tooling).acquire(
            &mut self.factory,
            self.tooling_key.clone(),
            &self.config.guest.tooling_classpath,
        )?;
        transcript.note(format!(
            "tooling environment {}: {}",
            environment.id(),
            acquisition
        ));

        let result = environment.invoke(entry_point, payload);
        self.settle(Role::Tooling, result, transcript)
    }

    /// Record the guest's output. A guest error leaves the environment as
    /// it is; any other failure means the guest host is unusable.
    fn settle(
        &mut self,
        role: Role,
        result: Result<Invocation, EnvironmentError>,
        transcript: &mut Transcript,
    ) -> Result<Invocation, DispatchError> {
        match result {
            Ok(invocation) => {
                transcript.guest(&invocation.output);
                Ok(invocation)
            }
            Err(source) => {
                match &source {
                    EnvironmentError::Guest { output, .. } => transcript.guest(output),
                    _ => {
                        warn!(%role, error = %source, "environment failed, discarding");
                        self.caches.get_mut(role).discard();
                    }
                }
                Err(DispatchError::Invoke { role, source })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EntryPoints;
    use crate::mock::{EnvironmentEvent, MockFactory};
    use cljw_protocol::Input;
    use serde_json::json;

    const SCRIPT: &str = "(compile 'app.core)";

    fn entry_points() -> EntryPoints {
        EntryPoints::default()
    }

    fn scripted() -> MockFactory {
        let factory = MockFactory::new();
        factory.respond(&entry_points().plan, json!(SCRIPT));
        factory
    }

    fn request(inputs: &[(&str, &str)]) -> WorkRequest {
        let classpath: Vec<&str> = inputs.iter().map(|(path, _)| *path).collect();
        let payload = json!({
            "aot": ["app.core"],
            "classes-dir": "out/classes",
            "classpath": classpath,
            "output-jar": "out/app.jar",
        });
        WorkRequest::new(
            vec![payload.to_string()],
            inputs
                .iter()
                .map(|(path, digest)| Input::new(*path, *digest))
                .collect(),
        )
    }

    fn compile_env<F: EnvironmentFactory>(dispatcher: &Dispatcher<F>) -> Option<crate::EnvironmentId> {
        dispatcher
            .caches()
            .get(Role::Compile)
            .environment()
            .map(|env| env.id())
    }

    #[test]
    fn test_identical_requests_share_environments() {
        let factory = scripted();
        let mut dispatcher = Dispatcher::new(WorkerConfig::default(), factory.clone());

        let first = dispatcher.handle(&request(&[("a.jar", "d1")]));
        let env = compile_env(&dispatcher);
        let second = dispatcher.handle(&request(&[("a.jar", "d1")]));

        assert_eq!(first.exit_code, 0, "{}", first.output);
        assert_eq!(second.exit_code, 0, "{}", second.output);
        assert_eq!(compile_env(&dispatcher), env);
        assert_eq!(factory.created(Role::Compile).len(), 1);
        assert_eq!(factory.created(Role::Tooling).len(), 1);
    }

    #[test]
    fn test_request_runs_plan_compile_package() {
        let factory = scripted();
        let mut dispatcher = Dispatcher::new(WorkerConfig::default(), factory.clone());
        dispatcher.handle(&request(&[("a.jar", "d1")]));

        let eps = entry_points();
        let tooling = factory.created(Role::Tooling)[0];
        let compile = factory.created(Role::Compile)[0];
        assert_eq!(factory.invocations(tooling), vec![eps.plan, eps.package]);
        assert_eq!(factory.invocations(compile), vec![eps.compile]);
    }

    #[test]
    fn test_package_can_be_disabled() {
        let factory = scripted();
        let mut config = WorkerConfig::default();
        config.entry_points.package = String::new();
        let mut dispatcher = Dispatcher::new(config, factory.clone());

        let response = dispatcher.handle(&request(&[]));

        assert!(response.is_success());
        let tooling = factory.created(Role::Tooling)[0];
        assert_eq!(factory.invocations(tooling), vec![entry_points().plan]);
    }

    #[test]
    fn test_reload_succeeds_then_discards() {
        let factory = scripted();
        factory.respond_once(&entry_points().compile, json!("reload"));
        let mut dispatcher = Dispatcher::new(WorkerConfig::default(), factory.clone());

        let response = dispatcher.handle(&request(&[("a.jar", "d1")]));
        assert_eq!(response.exit_code, 0);
        assert!(compile_env(&dispatcher).is_none());

        let first = factory.created(Role::Compile)[0];
        assert_eq!(factory.discards(first), 1);

        dispatcher.handle(&request(&[("a.jar", "d1")]));
        let created = factory.created(Role::Compile);
        assert_eq!(created.len(), 2);
        assert_ne!(created[0], created[1]);
        assert_eq!(factory.created(Role::Tooling).len(), 1);
    }

    #[test]
    fn test_reload_teardown_follows_packaging() {
        let factory = scripted();
        factory.respond_once(&entry_points().compile, json!(":rules-clojure.compile/reload"));
        let mut dispatcher = Dispatcher::new(WorkerConfig::default(), factory.clone());
        dispatcher.handle(&request(&[]));

        let compile = factory.created(Role::Compile)[0];
        let tooling = factory.created(Role::Tooling)[0];
        let events = factory.events();
        let packaged = events
            .iter()
            .position(|e| {
                matches!(e, EnvironmentEvent::Invoked { id, entry_point }
                    if *id == tooling && *entry_point == entry_points().package)
            })
            .unwrap();
        let discarded = events
            .iter()
            .position(|e| *e == EnvironmentEvent::Discarded { id: compile })
            .unwrap();
        assert!(packaged < discarded);
    }

    #[test]
    fn test_reload_teardown_survives_failed_packaging() {
        let factory = scripted();
        factory
            .respond_once(&entry_points().compile, json!("reload"))
            .fail_once(&entry_points().package, "cannot write out/app.jar");
        let mut dispatcher = Dispatcher::new(WorkerConfig::default(), factory.clone());

        let response = dispatcher.handle(&request(&[("a.jar", "d1")]));

        assert_eq!(response.exit_code, 1);
        assert!(response.output.contains("COMPILER_FAILED"), "{}", response.output);
        assert!(response.output.contains("cannot write out/app.jar"));
        assert!(compile_env(&dispatcher).is_none());
        let compile = factory.created(Role::Compile)[0];
        assert_eq!(factory.discards(compile), 1);
        assert_eq!(factory.live(Role::Tooling), Some(factory.created(Role::Tooling)[0]));
    }

    #[test]
    fn test_restart_then_success() {
        let factory = scripted();
        factory.respond_once(&entry_points().compile, json!("restart"));
        let mut dispatcher = Dispatcher::new(WorkerConfig::default(), factory.clone());

        let response = dispatcher.handle(&request(&[("a.jar", "d1")]));

        assert_eq!(response.exit_code, 0, "{}", response.output);
        let created = factory.created(Role::Compile);
        assert_eq!(created.len(), 2);
        assert_eq!(factory.discards(created[0]), 1);
        assert_eq!(compile_env(&dispatcher), Some(created[1]));
        assert!(factory.overlaps().is_empty());
    }

    #[test]
    fn test_restart_twice_fails() {
        let factory = scripted();
        factory
            .respond_once(&entry_points().compile, json!("restart"))
            .respond_once(&entry_points().compile, json!("restart"));
        let mut dispatcher = Dispatcher::new(WorkerConfig::default(), factory.clone());

        let response = dispatcher.handle(&request(&[("a.jar", "d1")]));

        assert_eq!(response.exit_code, 1);
        assert!(response.output.contains("RESTART_LOOP"), "{}", response.output);
        assert!(compile_env(&dispatcher).is_none());
        assert_eq!(factory.created(Role::Compile).len(), 2);

        let next = dispatcher.handle(&request(&[("a.jar", "d1")]));
        assert!(next.is_success());
    }

    #[test]
    fn test_zero_restarts_allowed() {
        let factory = scripted();
        factory.respond_once(&entry_points().compile, json!("restart"));
        let mut config = WorkerConfig::default();
        config.max_restarts = 0;
        let mut dispatcher = Dispatcher::new(config, factory.clone());

        let response = dispatcher.handle(&request(&[]));

        assert!(!response.is_success());
        assert!(response.output.contains("1 times"), "{}", response.output);
        assert_eq!(factory.created(Role::Compile).len(), 1);
    }

    #[test]
    fn test_compiler_error_keeps_environment() {
        let factory = scripted();
        factory.fail_once(&entry_points().compile, "Syntax error compiling at (app/core.clj:3:1)");
        let mut dispatcher = Dispatcher::new(WorkerConfig::default(), factory.clone());

        let response = dispatcher.handle(&request(&[("a.jar", "d1")]));
        let env = compile_env(&dispatcher);

        assert_eq!(response.exit_code, 1);
        assert!(response.output.contains("COMPILER_FAILED"));
        assert!(response.output.contains("Syntax error"));
        assert!(response.output.contains("request: {"));
        assert!(response.output.contains(&format!("script: {}", SCRIPT)));
        assert!(env.is_some());

        dispatcher.handle(&request(&[("a.jar", "d1")]));
        assert_eq!(compile_env(&dispatcher), env);
    }

    #[test]
    fn test_invalid_payload_creates_nothing() {
        let factory = scripted();
        let mut dispatcher = Dispatcher::new(WorkerConfig::default(), factory.clone());

        let mut bad = WorkRequest::new(vec!["{not json".to_string()], Vec::new());
        bad.request_id = 7;
        let response = dispatcher.handle(&bad);

        assert_eq!(response.exit_code, 1);
        assert_eq!(response.request_id, 7);
        assert!(response.output.starts_with("INVALID_REQUEST"));
        assert!(response.output.contains("request: {not json"));
        assert!(factory.events().is_empty());
    }

    #[test]
    fn test_missing_arguments() {
        let mut dispatcher = Dispatcher::new(WorkerConfig::default(), scripted());
        let response = dispatcher.handle(&WorkRequest::default());
        assert!(response.output.contains("no arguments"));
    }

    #[test]
    fn test_unresolvable_location() {
        let factory = scripted();
        factory.fail_location("missing.jar");
        let mut dispatcher = Dispatcher::new(WorkerConfig::default(), factory.clone());

        let response = dispatcher.handle(&request(&[("missing.jar", "d1")]));

        assert!(!response.is_success());
        assert!(response.output.contains("RESOLUTION_FAILED"));
        assert!(response.output.contains("missing.jar"));
        assert!(compile_env(&dispatcher).is_none());
    }

    #[test]
    fn test_unknown_signal_is_protocol_error() {
        let factory = scripted();
        factory.respond_once(&entry_points().compile, json!("recompile"));
        let mut dispatcher = Dispatcher::new(WorkerConfig::default(), factory.clone());

        let response = dispatcher.handle(&request(&[]));

        assert!(response.output.contains("GUEST_PROTOCOL"));
    }

    #[test]
    fn test_plan_must_return_script() {
        let factory = MockFactory::new();
        let mut dispatcher = Dispatcher::new(WorkerConfig::default(), factory.clone());

        let response = dispatcher.handle(&request(&[]));

        assert!(response.output.contains("GUEST_PROTOCOL"));
        assert!(response.output.contains("expected a compilation script"));
        assert!(factory.created(Role::Compile).is_empty());
    }

    #[test]
    fn test_verbose_requests_report_cache_decisions() {
        let mut dispatcher = Dispatcher::new(WorkerConfig::default(), scripted());
        let mut verbose = request(&[("a.jar", "d1")]);
        verbose.verbosity = 1;

        dispatcher.handle(&verbose);
        let response = dispatcher.handle(&verbose);

        assert!(response.output.contains("compile environment env-2: reused"), "{}", response.output);
        assert!(response.output.contains("tooling environment env-1: reused"));
    }

    #[test]
    fn test_guest_output_is_returned() {
        let factory = scripted();
        factory.queue(
            &entry_points().compile,
            crate::mock::MockReply::Value {
                value: Value::Null,
                output: "Compiling app.core".to_string(),
            },
        );
        let mut dispatcher = Dispatcher::new(WorkerConfig::default(), factory);

        let response = dispatcher.handle(&request(&[]));

        assert_eq!(response.output, "Compiling app.core\n");
    }

    #[test]
    fn test_tooling_key_guards_tooling_environment() {
        let factory = scripted();
        let key: DigestMap = [("rules-clojure.jar", "t1")].into_iter().collect();
        let mut dispatcher =
            Dispatcher::new(WorkerConfig::default(), factory.clone()).with_tooling_key(key);

        dispatcher.handle(&request(&[]));
        dispatcher.handle(&request(&[]));

        assert_eq!(factory.created(Role::Tooling).len(), 1);
    }

    #[test]
    fn test_shutdown_discards_everything() {
        let factory = scripted();
        let mut dispatcher = Dispatcher::new(WorkerConfig::default(), factory.clone());
        dispatcher.handle(&request(&[("a.jar", "d1")]));

        assert_eq!(dispatcher.shutdown(), 2);
        assert_eq!(factory.live(Role::Compile), None);
        assert_eq!(factory.live(Role::Tooling), None);
        assert!(factory.leaked().is_empty());
    }
}
